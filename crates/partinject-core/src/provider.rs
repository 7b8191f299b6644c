//! Collaborator contracts used by the locator and injector.
//!
//! The traits live in `partinject-provider` so host integrations can
//! implement them without pulling in the core crate's configuration and
//! registry types.

pub use partinject_provider::{BlockDeviceProvider, MountedFs, Mounter, PartitionDescriptor};
