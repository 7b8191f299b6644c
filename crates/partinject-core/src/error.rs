//! Error types shared by the locator, injector and step registry.

use partinject_provider::PartitionDescriptor;
use std::path::PathBuf;
use thiserror::Error;

pub type InjectResult<T> = Result<T, InjectError>;

#[derive(Debug, Error)]
pub enum InjectError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("provider error: {0}")]
    Provider(String),

    /// The mount utility could not be run or rejected the device.
    #[error("failed to mount {}: {reason}", .device.display())]
    Mount { device: PathBuf, reason: String },

    #[error("no partition found with path {path}, scanned: {}", render_scanned(.scanned))]
    PathNotFound {
        path: String,
        scanned: Vec<PartitionDescriptor>,
    },

    #[error("content for {destination} is not valid base64: {source}")]
    Decode {
        destination: String,
        #[source]
        source: base64::DecodeError,
    },

    #[error("failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid destination `{destination}`: {reason}")]
    InvalidDestination { destination: String, reason: String },

    #[error("invalid step arguments: {0}")]
    InvalidArguments(String),

    #[error("no provider offers deploy step `{0}`")]
    UnknownStep(String),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl InjectError {
    /// True for failures the locator treats as "this partition is not usable".
    pub fn is_mount_failure(&self) -> bool {
        matches!(self, InjectError::Mount { .. })
    }
}

fn render_scanned(scanned: &[PartitionDescriptor]) -> String {
    let parts: Vec<String> = scanned.iter().map(ToString::to_string).collect();
    format!("[{}]", parts.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_not_found_lists_every_scanned_partition() {
        let err = InjectError::PathNotFound {
            path: "etc".into(),
            scanned: vec![
                PartitionDescriptor::new(1, ["esp"]),
                PartitionDescriptor::new(2, Vec::<String>::new()),
            ],
        };
        assert_eq!(
            err.to_string(),
            "no partition found with path etc, scanned: [#1 [esp], #2]"
        );
    }

    #[test]
    fn only_mount_errors_are_mount_failures() {
        let mount = InjectError::Mount {
            device: PathBuf::from("/dev/sda1"),
            reason: "wrong fs type".into(),
        };
        assert!(mount.is_mount_failure());
        assert_eq!(mount.to_string(), "failed to mount /dev/sda1: wrong fs type");
        assert!(!InjectError::Provider("boom".into()).is_mount_failure());
    }
}
