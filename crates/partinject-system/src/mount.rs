//! Scoped mounts backed by the host `mount`/`umount` binaries.

use crate::command::ToolCommand;
use log::{debug, info, warn};
use partinject_core::error::{InjectError, InjectResult};
use partinject_provider::{MountedFs, Mounter};
use std::ffi::OsString;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

static STAGING_SEQ: AtomicU64 = AtomicU64::new(0);

/// Mounts partitions onto fresh directories under a staging root.
#[derive(Debug, Clone)]
pub struct SystemMounter {
    mount: ToolCommand,
    umount: ToolCommand,
    options: Option<String>,
    staging_root: PathBuf,
    umount_attempts: u32,
    umount_retry_delay: Duration,
}

impl SystemMounter {
    pub(crate) fn new(
        mount: ToolCommand,
        umount: ToolCommand,
        options: Option<String>,
        staging_root: PathBuf,
    ) -> Self {
        Self {
            mount,
            umount,
            options,
            staging_root,
            umount_attempts: 1,
            umount_retry_delay: Duration::ZERO,
        }
    }

    pub(crate) fn with_umount_retries(mut self, attempts: u32, delay: Duration) -> Self {
        self.umount_attempts = attempts.max(1);
        self.umount_retry_delay = delay;
        self
    }

    fn release_failed_mount(&self, mountpoint: &Path) {
        match self.umount.run([mountpoint.as_os_str()]) {
            Ok(out) if out.success() => {
                warn!("detached leftover mount at {}", mountpoint.display())
            }
            Ok(out) => debug!(
                "umount {} after failed mount: {} (exit code {})",
                mountpoint.display(),
                out.diagnostic(),
                out.status
            ),
            Err(err) => debug!("umount {} after failed mount: {err}", mountpoint.display()),
        }
    }

    fn create_staging_dir(&self) -> InjectResult<PathBuf> {
        fs::create_dir_all(&self.staging_root)?;
        loop {
            let seq = STAGING_SEQ.fetch_add(1, Ordering::Relaxed);
            let candidate = self
                .staging_root
                .join(format!("partinject-{}-{seq}", process::id()));
            match fs::create_dir(&candidate) {
                Ok(()) => return Ok(candidate),
                Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
                Err(err) => return Err(err.into()),
            }
        }
    }
}

impl Mounter for SystemMounter {
    type Error = InjectError;
    type Mount = SystemMount;

    fn mount(&self, device: &Path) -> InjectResult<SystemMount> {
        let mountpoint = self.create_staging_dir()?;

        let mut args: Vec<OsString> = Vec::new();
        if let Some(options) = self.options.as_deref().filter(|o| !o.trim().is_empty()) {
            args.push("-o".into());
            args.push(options.trim().into());
        }
        args.push(device.as_os_str().to_os_string());
        args.push(mountpoint.as_os_str().to_os_string());

        let failure = match self.mount.run(&args) {
            Ok(out) if out.success() => None,
            Ok(out) => Some(format!("{} (exit code {})", out.diagnostic(), out.status)),
            Err(err) => Some(err.to_string()),
        };
        if let Some(reason) = failure {
            // A killed or failing `mount` may still have attached the filesystem.
            self.release_failed_mount(&mountpoint);
            remove_staging_dir(&mountpoint);
            return Err(InjectError::Mount {
                device: device.to_path_buf(),
                reason,
            });
        }

        info!("mounted {} at {}", device.display(), mountpoint.display());
        Ok(SystemMount {
            mountpoint,
            device: device.to_path_buf(),
            umount: self.umount.clone(),
            attempts: self.umount_attempts,
            retry_delay: self.umount_retry_delay,
        })
    }
}

/// A mounted partition; dropping it unmounts and removes the mount point.
#[derive(Debug)]
pub struct SystemMount {
    mountpoint: PathBuf,
    device: PathBuf,
    umount: ToolCommand,
    attempts: u32,
    retry_delay: Duration,
}

impl SystemMount {
    fn try_unmount(&self) -> bool {
        for attempt in 1..=self.attempts {
            match self.umount.run([self.mountpoint.as_os_str()]) {
                Ok(out) if out.success() => return true,
                Ok(out) => warn!(
                    "umount {} failed (attempt {attempt}/{}): {} (exit code {})",
                    self.mountpoint.display(),
                    self.attempts,
                    out.diagnostic(),
                    out.status
                ),
                Err(err) => warn!(
                    "umount {} failed (attempt {attempt}/{}): {err}",
                    self.mountpoint.display(),
                    self.attempts
                ),
            }
            if attempt < self.attempts {
                thread::sleep(self.retry_delay);
            }
        }
        false
    }
}

impl MountedFs for SystemMount {
    fn root(&self) -> &Path {
        &self.mountpoint
    }
}

impl Drop for SystemMount {
    fn drop(&mut self) {
        if self.try_unmount() {
            debug!("unmounted {} from {}", self.device.display(), self.mountpoint.display());
            remove_staging_dir(&self.mountpoint);
        } else {
            warn!(
                "{} is still mounted at {}; leaving the mount point in place",
                self.device.display(),
                self.mountpoint.display()
            );
        }
    }
}

// Non-recursive on purpose: a mount point that is still populated is left alone.
fn remove_staging_dir(path: &Path) {
    if let Err(err) = fs::remove_dir(path) {
        if err.kind() != ErrorKind::NotFound {
            debug!("unable to remove staging directory {}: {err}", path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::tests::fake_binary;
    use tempfile::tempdir;

    fn mounter(dir: &Path, mount_body: &str, umount_body: &str) -> SystemMounter {
        let mount = fake_binary(dir, "mount", mount_body);
        let umount = fake_binary(dir, "umount", umount_body);
        SystemMounter::new(
            ToolCommand::new(mount, None),
            ToolCommand::new(umount, None),
            None,
            dir.join("staging"),
        )
    }

    #[test]
    fn guard_unmounts_and_removes_mount_point() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("umount.log");
        let m = mounter(
            dir.path(),
            "mkdir \"$2/etc\"",
            &format!("echo \"$1\" >> {}; rmdir \"$1/etc\"", log.display()),
        );

        let mount = m.mount(Path::new("/dev/sda2")).unwrap();
        let root = mount.root().to_path_buf();
        assert!(root.starts_with(dir.path().join("staging")));
        assert!(root.join("etc").is_dir());

        drop(mount);
        assert!(!root.exists());
        assert_eq!(
            fs::read_to_string(&log).unwrap().trim(),
            root.display().to_string()
        );
    }

    #[test]
    fn mount_failure_is_reported_and_cleaned_up() {
        let dir = tempdir().unwrap();
        let m = mounter(
            dir.path(),
            "echo 'mount: wrong fs type, bad option, bad superblock' >&2; exit 32",
            "exit 0",
        );

        match m.mount(Path::new("/dev/sda1")) {
            Err(InjectError::Mount { device, reason }) => {
                assert_eq!(device, PathBuf::from("/dev/sda1"));
                assert!(reason.contains("wrong fs type"));
                assert!(reason.contains("exit code 32"));
            }
            other => panic!("unexpected result {other:?}"),
        }
        let leftovers = fs::read_dir(dir.path().join("staging")).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn timed_out_mount_is_detached_before_cleanup() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("umount.log");
        let mount = fake_binary(dir.path(), "mount", "touch \"$2/mounted\"; exec sleep 5");
        let umount = fake_binary(
            dir.path(),
            "umount",
            &format!("echo \"$1\" >> {}; rm -f \"$1/mounted\"", log.display()),
        );
        let m = SystemMounter::new(
            ToolCommand::new(mount, Some(Duration::from_millis(200))),
            ToolCommand::new(umount, None),
            None,
            dir.path().join("staging"),
        );

        let err = m.mount(Path::new("/dev/sda1")).unwrap_err();
        assert!(err.is_mount_failure());
        assert!(err.to_string().contains("timed out"));

        let calls = fs::read_to_string(&log).unwrap();
        assert_eq!(calls.lines().count(), 1);
        assert!(calls.trim().starts_with(dir.path().join("staging").to_str().unwrap()));
        let leftovers = fs::read_dir(dir.path().join("staging")).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn missing_mount_binary_counts_as_mount_failure() {
        let dir = tempdir().unwrap();
        let m = SystemMounter::new(
            ToolCommand::new(dir.path().join("no-such-mount"), None),
            ToolCommand::new(dir.path().join("no-such-umount"), None),
            None,
            dir.path().join("staging"),
        );
        let err = m.mount(Path::new("/dev/sdz1")).unwrap_err();
        assert!(err.is_mount_failure());
    }

    #[test]
    fn options_are_passed_before_device() {
        let dir = tempdir().unwrap();
        let args = dir.path().join("args");
        let mount = fake_binary(dir.path(), "mount", &format!("echo \"$@\" > {}", args.display()));
        let umount = fake_binary(dir.path(), "umount", "exit 0");
        let m = SystemMounter::new(
            ToolCommand::new(mount, None),
            ToolCommand::new(umount, None),
            Some("ro,noexec".into()),
            dir.path().join("staging"),
        );

        let guard = m.mount(Path::new("/dev/vda3")).unwrap();
        let expected = format!("-o ro,noexec /dev/vda3 {}", guard.root().display());
        drop(guard);
        assert_eq!(fs::read_to_string(&args).unwrap().trim(), expected);
    }

    #[test]
    fn failed_unmount_retries_then_keeps_mount_point() {
        let dir = tempdir().unwrap();
        let attempts = dir.path().join("attempts");
        let m = mounter(
            dir.path(),
            "exit 0",
            &format!("echo x >> {}; echo 'umount: target is busy' >&2; exit 32", attempts.display()),
        )
        .with_umount_retries(3, Duration::from_millis(1));

        let guard = m.mount(Path::new("/dev/sdb1")).unwrap();
        let root = guard.root().to_path_buf();
        drop(guard);

        assert!(root.is_dir());
        assert_eq!(fs::read_to_string(&attempts).unwrap().lines().count(), 3);
    }

    #[test]
    fn each_mount_gets_a_fresh_directory() {
        let dir = tempdir().unwrap();
        let m = mounter(dir.path(), "exit 0", "exit 0");
        let first = m.mount(Path::new("/dev/sda1")).unwrap();
        let first_root = first.root().to_path_buf();
        drop(first);
        let second = m.mount(Path::new("/dev/sda2")).unwrap();
        assert_ne!(first_root, second.root());
    }
}
