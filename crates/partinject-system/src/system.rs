//! System-backed collaborators assembled from configuration.

use crate::command::{resolve_binary, ToolCommand};
use crate::lsblk::{select_install_device, LsblkCommand};
use crate::mount::SystemMounter;
use crate::parted::PartedCommand;
use partinject_core::error::{InjectError, InjectResult};
use partinject_core::{InjectConfig, InjectFilesProvider};
use partinject_provider::{BlockDeviceProvider, PartitionDescriptor};

pub const DEFAULT_PARTED_PATHS: &[&str] = &["/usr/sbin/parted", "/sbin/parted", "/usr/bin/parted"];
pub const DEFAULT_LSBLK_PATHS: &[&str] = &["/usr/bin/lsblk", "/bin/lsblk"];
pub const DEFAULT_MOUNT_PATHS: &[&str] = &["/usr/bin/mount", "/bin/mount"];
pub const DEFAULT_UMOUNT_PATHS: &[&str] = &["/usr/bin/umount", "/bin/umount"];

/// Install-disk discovery and partition enumeration via `lsblk` and `parted`.
#[derive(Debug, Clone)]
pub struct SystemBlockDevices {
    parted: PartedCommand,
    lsblk: Option<LsblkCommand>,
    install_device: Option<String>,
    min_size_bytes: u64,
}

impl SystemBlockDevices {
    /// Build the provider, resolving tool paths from `config`.
    ///
    /// `lsblk` is only required when no install device is configured.
    pub fn from_config(config: &InjectConfig) -> InjectResult<Self> {
        let timeout = config.command_timeout();
        let parted = ToolCommand::new(
            resolve_binary("parted", config.disk.parted_path.as_deref(), DEFAULT_PARTED_PATHS)?,
            timeout,
        );
        let install_device = config.install_device();
        let lsblk = match install_device {
            Some(_) => None,
            None => Some(LsblkCommand::new(ToolCommand::new(
                resolve_binary("lsblk", config.disk.lsblk_path.as_deref(), DEFAULT_LSBLK_PATHS)?,
                timeout,
            ))),
        };

        Ok(Self {
            parted: PartedCommand::new(parted),
            lsblk,
            install_device,
            min_size_bytes: config.disk.min_size_bytes,
        })
    }
}

impl BlockDeviceProvider for SystemBlockDevices {
    type Error = InjectError;

    fn os_install_device(&self) -> InjectResult<String> {
        if let Some(device) = &self.install_device {
            return Ok(device.clone());
        }

        let lsblk = self.lsblk.as_ref().ok_or_else(|| {
            InjectError::InvalidConfig(
                "no install device configured and lsblk is unavailable".into(),
            )
        })?;
        let disks = lsblk.list_disks()?;
        select_install_device(&disks, self.min_size_bytes)
            .map(|disk| disk.name.clone())
            .ok_or_else(|| {
                let seen: Vec<String> = disks
                    .iter()
                    .map(|disk| format!("{} ({} bytes)", disk.name, disk.size))
                    .collect();
                InjectError::Provider(format!(
                    "no disk of at least {} bytes found for installation; saw [{}]. Set disk.install_device to choose one explicitly",
                    self.min_size_bytes,
                    seen.join(", ")
                ))
            })
    }

    fn list_partitions(&self, device: &str) -> InjectResult<Vec<PartitionDescriptor>> {
        self.parted.list_partitions(device)
    }
}

impl SystemMounter {
    /// Build the mounter, resolving `mount`/`umount` and staging settings from `config`.
    pub fn from_config(config: &InjectConfig) -> InjectResult<Self> {
        let timeout = config.command_timeout();
        let mount = ToolCommand::new(
            resolve_binary("mount", config.mount.mount_path.as_deref(), DEFAULT_MOUNT_PATHS)?,
            timeout,
        );
        let umount = ToolCommand::new(
            resolve_binary("umount", config.mount.umount_path.as_deref(), DEFAULT_UMOUNT_PATHS)?,
            timeout,
        );
        Ok(Self::new(mount, umount, config.mount.options.clone(), config.staging_root())
            .with_umount_retries(config.mount.umount_attempts, config.umount_retry_delay()))
    }
}

/// The `inject_files` provider wired to the host tools described by `config`.
pub fn system_inject_provider(
    config: &InjectConfig,
) -> InjectResult<InjectFilesProvider<SystemBlockDevices, SystemMounter>> {
    let devices = SystemBlockDevices::from_config(config)?;
    let mounter = SystemMounter::from_config(config)?;
    Ok(InjectFilesProvider::new(devices, mounter).with_target_dir(config.target_dir()))
}
