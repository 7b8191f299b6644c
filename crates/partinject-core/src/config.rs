//! Configuration model and helpers used by partinject services.

use crate::error::{InjectError, InjectResult};
use log::info;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/partinject.toml";
pub const INSTALL_DEVICE_ENV: &str = "PARTINJECT_INSTALL_DEVICE";
const DEFAULT_TARGET_DIR: &str = "etc";

/// How the install disk is chosen and which tools inspect it.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DiskCfg {
    /// Whole-disk device to inject into. Autodetected when unset.
    #[serde(default)]
    pub install_device: Option<String>,

    /// Smallest disk considered during autodetection.
    #[serde(default = "default_min_size_bytes")]
    pub min_size_bytes: u64,

    #[serde(default)]
    pub parted_path: Option<String>,

    #[serde(default)]
    pub lsblk_path: Option<String>,
}

fn default_min_size_bytes() -> u64 {
    4 * 1024 * 1024 * 1024
}

impl Default for DiskCfg {
    fn default() -> Self {
        Self {
            install_device: None,
            min_size_bytes: default_min_size_bytes(),
            parted_path: None,
            lsblk_path: None,
        }
    }
}

/// Mount/unmount tooling and staging behaviour.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MountCfg {
    #[serde(default)]
    pub mount_path: Option<String>,

    #[serde(default)]
    pub umount_path: Option<String>,

    /// Passed to `mount -o` when set.
    #[serde(default)]
    pub options: Option<String>,

    /// Parent directory for temporary mount points (defaults to the system temp dir).
    #[serde(default)]
    pub staging_root: Option<String>,

    #[serde(default = "default_umount_attempts")]
    pub umount_attempts: u32,

    #[serde(default = "default_umount_retry_delay_ms")]
    pub umount_retry_delay_ms: u64,
}

fn default_umount_attempts() -> u32 {
    3
}

fn default_umount_retry_delay_ms() -> u64 {
    1_000
}

impl Default for MountCfg {
    fn default() -> Self {
        Self {
            mount_path: None,
            umount_path: None,
            options: None,
            staging_root: None,
            umount_attempts: default_umount_attempts(),
            umount_retry_delay_ms: default_umount_retry_delay_ms(),
        }
    }
}

/// Knobs applied to every external command.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct CommandCfg {
    /// Kill external tools after this many seconds; 0 waits indefinitely.
    #[serde(default)]
    pub timeout_secs: u64,
}

/// Injection target settings.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct InjectCfg {
    /// Directory that identifies the root partition; files land in its parent.
    #[serde(default = "default_target_dir")]
    pub target_dir: String,
}

fn default_target_dir() -> String {
    DEFAULT_TARGET_DIR.to_string()
}

impl Default for InjectCfg {
    fn default() -> Self {
        Self {
            target_dir: default_target_dir(),
        }
    }
}

/// Top-level configuration snapshot loaded from disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct InjectConfig {
    #[serde(default)]
    pub disk: DiskCfg,

    #[serde(default)]
    pub mount: MountCfg,

    #[serde(default)]
    pub commands: CommandCfg,

    #[serde(default)]
    pub inject: InjectCfg,

    #[serde(skip)]
    pub path: PathBuf,
}

impl InjectConfig {
    /// Load `path` when it exists, otherwise fall back to built-in defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> InjectResult<Self> {
        let path = path.as_ref();
        if path.exists() {
            return Self::load(path);
        }
        info!(
            "no configuration at {}; using built-in defaults",
            path.display()
        );
        Ok(Self {
            path: path.to_path_buf(),
            ..Self::default()
        })
    }

    /// Read a config file from disk, detect format, and validate basics.
    pub fn load<P: AsRef<Path>>(path: P) -> InjectResult<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let is_yaml = matches!(
            path.extension().and_then(|ext| ext.to_str()),
            Some(ext) if ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml")
        );
        let mut cfg = if is_yaml {
            serde_yaml::from_str::<Self>(&contents)?
        } else {
            toml::from_str::<Self>(&contents)?
        };

        cfg.path = path.to_path_buf();

        let issues = cfg.validate();
        if !issues.is_empty() {
            return Err(InjectError::InvalidConfig(issues.join("; ")));
        }

        Ok(cfg)
    }

    /// Perform a validation pass and return human-readable issues.
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();

        if let Some(device) = &self.disk.install_device {
            if !device.trim().starts_with('/') {
                issues.push(format!(
                    "disk.install_device must be an absolute device path, got `{device}`"
                ));
            }
        }

        let target = self.inject.target_dir.trim().trim_matches('/');
        if target.is_empty() {
            issues.push("inject.target_dir must not be empty".to_string());
        } else if target.split('/').any(|segment| segment == "..") {
            issues.push("inject.target_dir must not contain `..` segments".to_string());
        }

        if self.mount.umount_attempts == 0 {
            issues.push("mount.umount_attempts must be at least 1".to_string());
        }

        for (key, value) in [
            ("disk.parted_path", &self.disk.parted_path),
            ("disk.lsblk_path", &self.disk.lsblk_path),
            ("mount.mount_path", &self.mount.mount_path),
            ("mount.umount_path", &self.mount.umount_path),
        ] {
            if matches!(value, Some(path) if path.trim().is_empty()) {
                issues.push(format!("{key} must not be empty when set"));
            }
        }

        issues
    }

    /// Resolve the configured install device, honouring `PARTINJECT_INSTALL_DEVICE`.
    pub fn install_device(&self) -> Option<String> {
        if let Ok(value) = env::var(INSTALL_DEVICE_ENV) {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
        self.disk
            .install_device
            .as_deref()
            .map(str::trim)
            .filter(|device| !device.is_empty())
            .map(str::to_string)
    }

    /// Relative directory searched for on each partition.
    pub fn target_dir(&self) -> &str {
        self.inject.target_dir.trim().trim_matches('/')
    }

    /// Timeout for external commands; `None` means wait indefinitely.
    pub fn command_timeout(&self) -> Option<Duration> {
        match self.commands.timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn umount_retry_delay(&self) -> Duration {
        Duration::from_millis(self.mount.umount_retry_delay_ms)
    }

    /// Directory under which temporary mount points are created.
    pub fn staging_root(&self) -> PathBuf {
        self.mount
            .staging_root
            .as_deref()
            .map(str::trim)
            .filter(|root| !root.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(env::temp_dir)
    }
}
