#![forbid(unsafe_code)]

//! Host integrations for partinject.
//!
//! - `parted -m` for partition enumeration
//! - `lsblk` for install-disk autodetection
//! - `mount`/`umount` for scoped mounts on private staging directories

mod command;
mod lsblk;
mod mount;
mod parted;
mod system;

pub use mount::{SystemMount, SystemMounter};
pub use system::{
    system_inject_provider, SystemBlockDevices, DEFAULT_LSBLK_PATHS, DEFAULT_MOUNT_PATHS,
    DEFAULT_PARTED_PATHS, DEFAULT_UMOUNT_PATHS,
};
