//! Write caller-supplied files onto the located root partition.

use crate::error::{InjectError, InjectResult};
use crate::locator::with_partition_path;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use log::info;
use partinject_provider::{BlockDeviceProvider, Mounter};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Component, Path, PathBuf};

/// Destination path -> base64 encoded file content.
pub type FileMap = BTreeMap<String, String>;

/// Mount the partition carrying `target_dir` and write every entry of
/// `files` relative to that partition's root.
///
/// The first failing entry aborts the run; files written before it stay on
/// disk. The partition is unmounted before this returns either way.
pub fn inject_files<D, M>(
    devices: &D,
    mounter: &M,
    target_dir: &str,
    files: &FileMap,
) -> InjectResult<()>
where
    D: BlockDeviceProvider<Error = InjectError>,
    M: Mounter<Error = InjectError>,
{
    with_partition_path(devices, mounter, target_dir, |located| {
        let base = located.path.parent().unwrap_or(located.mount_root);
        for (destination, encoded) in files {
            let content = decode_content(destination, encoded)?;
            let fname = resolve_destination(base, located.mount_root, destination)?;
            check_symlinks(located.mount_root, &fname, destination)?;
            info!("injecting {destination} into {}", fname.display());
            write_file(&fname, &content)?;
            info!(
                "wrote {} bytes to {} (sha256 {})",
                content.len(),
                fname.display(),
                hex::encode(Sha256::digest(&content))
            );
        }
        Ok(())
    })
}

/// Decode standard base64, ignoring embedded whitespace such as line wraps.
pub fn decode_content(destination: &str, encoded: &str) -> InjectResult<Vec<u8>> {
    let compact: String = encoded
        .chars()
        .filter(|ch| !ch.is_ascii_whitespace())
        .collect();
    STANDARD
        .decode(compact.as_bytes())
        .map_err(|source| InjectError::Decode {
            destination: destination.to_string(),
            source,
        })
}

/// Resolve `destination` against `base`, collapsing `.` and `..`.
///
/// Leading separators are dropped, so `/network/config` and
/// `network/config` land on the same file. The result must stay strictly
/// below `boundary`.
pub fn resolve_destination(base: &Path, boundary: &Path, destination: &str) -> InjectResult<PathBuf> {
    let relative = destination.trim_start_matches('/');
    if relative.is_empty() {
        return Err(InjectError::InvalidDestination {
            destination: destination.to_string(),
            reason: "destination path is empty".into(),
        });
    }

    let resolved = normalize_path(&base.join(relative));
    let boundary = normalize_path(boundary);
    if resolved == boundary || !resolved.starts_with(&boundary) {
        return Err(InjectError::InvalidDestination {
            destination: destination.to_string(),
            reason: format!(
                "resolves to {}, outside the partition mounted at {}",
                resolved.display(),
                boundary.display()
            ),
        });
    }
    Ok(resolved)
}

/// Reject a resolved path whose existing parent directory, or the file
/// itself when it is a symlink, points outside `boundary` on disk.
///
/// [`resolve_destination`] is lexical only; this follows symlinks already
/// present on the image (for example an absolute `etc/localtime` link).
pub fn check_symlinks(boundary: &Path, resolved: &Path, destination: &str) -> InjectResult<()> {
    let root = boundary.canonicalize()?;
    let escapes = |what: &Path| InjectError::InvalidDestination {
        destination: destination.to_string(),
        reason: format!(
            "{} follows a symlink outside the partition mounted at {}",
            what.display(),
            boundary.display()
        ),
    };

    // A missing parent is left for the write to report.
    if let Some(parent) = resolved.parent() {
        if let Ok(real) = parent.canonicalize() {
            if !real.starts_with(&root) {
                return Err(escapes(parent));
            }
        }
    }

    let is_link = fs::symlink_metadata(resolved)
        .map(|meta| meta.file_type().is_symlink())
        .unwrap_or(false);
    if is_link {
        match resolved.canonicalize() {
            Ok(real) if real.starts_with(&root) && real != root => {}
            _ => return Err(escapes(resolved)),
        }
    }
    Ok(())
}

/// Lexical normalisation; the filesystem is not consulted.
fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

// Parent directories are not created; a missing one surfaces as a write error.
fn write_file(path: &Path, content: &[u8]) -> InjectResult<()> {
    let write_err = |source: std::io::Error| InjectError::Write {
        path: path.to_path_buf(),
        source,
    };
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .map_err(write_err)?;
    file.write_all(content).map_err(write_err)?;
    file.sync_all().map_err(write_err)
}
