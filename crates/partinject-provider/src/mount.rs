//! Provider contract for scoped mounts.
//!
//! A successful `Mounter::mount` hands back a guard; the filesystem stays
//! mounted for exactly as long as the guard lives and is released when it is
//! dropped, whichever way the owning scope exits.

use std::error::Error;
use std::path::Path;

/// A live mount. Dropping the value unmounts it.
pub trait MountedFs {
    /// Directory the filesystem is currently mounted on.
    fn root(&self) -> &Path;
}

/// Mounts block devices onto fresh, private mount points.
pub trait Mounter {
    type Error: Error + Send + Sync + 'static;
    type Mount: MountedFs;

    /// Mount `device` and return the guard that owns the mount.
    fn mount(&self, device: &Path) -> Result<Self::Mount, Self::Error>;
}
