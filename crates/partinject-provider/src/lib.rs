#![forbid(unsafe_code)]

//! Collaborator contracts shared across partinject.
//!
//! The locator and injector in `partinject-core` only talk to disks and
//! mounts through these traits, so host integrations (`partinject-system`)
//! and test doubles can be swapped freely.

pub mod disk;
pub mod mount;

pub use disk::{BlockDeviceProvider, PartitionDescriptor};
pub use mount::{MountedFs, Mounter};
