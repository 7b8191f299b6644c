//! Partition discovery.
//!
//! Walks the install disk's partitions in table order, mounts each eligible
//! one on a private mount point and stops at the first partition that holds
//! the requested directory. The caller only ever sees the mounted path from
//! inside the closure handed to [`with_partition_path`]; the mount is
//! released before the function returns, on every exit path.

use crate::error::{InjectError, InjectResult};
use log::{debug, info, warn};
use partinject_provider::{BlockDeviceProvider, MountedFs, Mounter, PartitionDescriptor};
use std::path::{Path, PathBuf};

/// Partition flags that mark boot firmware or LVM physical volumes.
pub const SKIPPED_FLAGS: &[&str] = &["esp", "lvm"];

/// Where the requested directory was found. Only valid inside the scope
/// that received it.
#[derive(Debug)]
pub struct Located<'a> {
    /// Absolute path of the requested directory under the mount point.
    pub path: &'a Path,
    /// Mount point of the partition holding `path`.
    pub mount_root: &'a Path,
    /// Device node that was mounted (e.g. `/dev/nvme0n1p2`).
    pub partition_device: &'a str,
    pub partition: &'a PartitionDescriptor,
}

/// Outcome of probing a single partition.
enum Probe<G> {
    Found { mount: G, path: PathBuf },
    Missing,
    Unmountable,
}

/// Build the device node for partition `index` of `device`.
///
/// NVMe namespaces separate the partition number with `p`
/// (`/dev/nvme0n1p1`); SCSI-style disks append it directly (`/dev/sda1`).
pub fn partition_device_path(device: &str, index: u32) -> String {
    let delimiter = if device.contains("nvme") { "p" } else { "" };
    format!("{device}{delimiter}{index}")
}

/// True when `partition` is never mounted during the scan.
pub fn is_skipped(partition: &PartitionDescriptor) -> bool {
    SKIPPED_FLAGS.iter().any(|flag| partition.has_flag(flag))
}

/// Find the first partition containing the directory `relative`, keep it
/// mounted while `scope` runs, then unmount and return `scope`'s result.
///
/// Mount failures skip the partition. Any other collaborator error aborts the
/// scan. When no partition matches, the error lists every enumerated
/// partition, including the ones skipped by flag.
pub fn with_partition_path<D, M, T, F>(
    devices: &D,
    mounter: &M,
    relative: &str,
    scope: F,
) -> InjectResult<T>
where
    D: BlockDeviceProvider<Error = InjectError>,
    M: Mounter<Error = InjectError>,
    F: FnOnce(&Located<'_>) -> InjectResult<T>,
{
    let relative = relative.trim_start_matches('/');
    let root_dev = devices.os_install_device()?;
    let partitions = devices.list_partitions(&root_dev)?;
    debug!(
        "scanning {} partition(s) on {root_dev} for /{relative}",
        partitions.len()
    );

    for part in &partitions {
        if is_skipped(part) {
            debug!("skipping partition {part}");
            continue;
        }

        let part_path = partition_device_path(&root_dev, part.index);
        match probe_partition(mounter, part, &part_path, relative)? {
            Probe::Found { mount, path } => {
                info!("path found: /{relative} on {part_path}");
                let located = Located {
                    path: &path,
                    mount_root: mount.root(),
                    partition_device: &part_path,
                    partition: part,
                };
                let result = scope(&located);
                drop(mount);
                return result;
            }
            Probe::Missing | Probe::Unmountable => continue,
        }
    }

    Err(InjectError::PathNotFound {
        path: relative.to_string(),
        scanned: partitions,
    })
}

fn probe_partition<M>(
    mounter: &M,
    part: &PartitionDescriptor,
    part_path: &str,
    relative: &str,
) -> InjectResult<Probe<M::Mount>>
where
    M: Mounter<Error = InjectError>,
{
    let mount = match mounter.mount(Path::new(part_path)) {
        Ok(mount) => mount,
        Err(err) if err.is_mount_failure() => {
            warn!("failure when inspecting partition {part}: {err}");
            return Ok(Probe::Unmountable);
        }
        Err(err) => return Err(err),
    };

    let found = mount.root().join(relative);
    debug!("checking for path {} on {part_path}", found.display());
    if found.is_dir() {
        Ok(Probe::Found { mount, path: found })
    } else {
        Ok(Probe::Missing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nvme_devices_use_p_delimiter() {
        assert_eq!(partition_device_path("/dev/nvme0n1", 1), "/dev/nvme0n1p1");
        assert_eq!(partition_device_path("/dev/nvme1n2", 12), "/dev/nvme1n2p12");
    }

    #[test]
    fn other_devices_append_index() {
        assert_eq!(partition_device_path("/dev/sda", 1), "/dev/sda1");
        assert_eq!(partition_device_path("/dev/vdb", 3), "/dev/vdb3");
        assert_eq!(partition_device_path("/dev/mmcblk0", 2), "/dev/mmcblk02");
    }

    #[test]
    fn esp_and_lvm_partitions_are_skipped() {
        assert!(is_skipped(&PartitionDescriptor::new(1, ["boot", "esp"])));
        assert!(is_skipped(&PartitionDescriptor::new(2, ["lvm"])));
        assert!(!is_skipped(&PartitionDescriptor::new(3, ["boot"])));
        assert!(!is_skipped(&PartitionDescriptor::new(4, ["LVM"])));
        assert!(!is_skipped(&PartitionDescriptor::new(5, Vec::<String>::new())));
    }
}
