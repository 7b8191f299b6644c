//! Provider contract for whole-disk and partition enumeration.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt;

/// One partition as reported by the enumeration collaborator.
///
/// Only `index` and `flags` take part in partition selection; the remaining
/// fields are carried along for diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionDescriptor {
    /// Partition number as used in the device node name (`/dev/sda2` -> 2).
    pub index: u32,
    #[serde(default)]
    pub start_mib: u64,
    #[serde(default)]
    pub end_mib: u64,
    #[serde(default)]
    pub size_mib: u64,
    /// Filesystem type as probed by the partitioning tool (may be empty).
    #[serde(default)]
    pub filesystem: String,
    /// Partition label/name (may be empty).
    #[serde(default)]
    pub name: String,
    /// Partition flags such as `boot`, `esp`, `lvm`.
    #[serde(default)]
    pub flags: BTreeSet<String>,
}

impl PartitionDescriptor {
    pub fn new<I, S>(index: u32, flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            index,
            flags: flags.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Returns true when `flag` is present (exact, case-sensitive match).
    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.contains(flag)
    }
}

impl fmt::Display for PartitionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.index)?;
        if !self.filesystem.is_empty() {
            write!(f, " {}", self.filesystem)?;
        }
        if !self.name.is_empty() {
            write!(f, " \"{}\"", self.name)?;
        }
        if self.size_mib > 0 {
            write!(f, " {}MiB", self.size_mib)?;
        }
        if !self.flags.is_empty() {
            let flags: Vec<&str> = self.flags.iter().map(String::as_str).collect();
            write!(f, " [{}]", flags.join(","))?;
        }
        Ok(())
    }
}

/// Access to the disk selected for operating-system installation.
pub trait BlockDeviceProvider {
    type Error: Error + Send + Sync + 'static;

    /// Whole-disk device path targeted by the install (e.g. `/dev/sda`).
    fn os_install_device(&self) -> Result<String, Self::Error>;

    /// Partitions on `device`, in the order the partition table reports them.
    fn list_partitions(&self, device: &str) -> Result<Vec<PartitionDescriptor>, Self::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn has_flag_is_case_sensitive() {
        let part = PartitionDescriptor::new(1, ["boot", "esp"]);
        assert!(part.has_flag("esp"));
        assert!(!part.has_flag("ESP"));
        assert!(!part.has_flag("lvm"));
    }

    #[test]
    fn display_includes_flags_and_filesystem() {
        let mut part = PartitionDescriptor::new(2, ["lvm"]);
        part.filesystem = "ext4".into();
        part.size_mib = 512;
        assert_eq!(part.to_string(), "#2 ext4 512MiB [lvm]");
        assert_eq!(PartitionDescriptor::new(3, Vec::<String>::new()).to_string(), "#3");
    }
}
