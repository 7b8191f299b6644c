//! The `inject_files` deploy step.

use crate::error::{InjectError, InjectResult};
use crate::injector::{inject_files, FileMap};
use crate::step::{json_kind, ArgInfo, DeployStep, DeployStepProvider, HardwareSupport};
use partinject_provider::{BlockDeviceProvider, Mounter};
use serde_json::Value;
use std::collections::BTreeMap;

pub const PROVIDER_NAME: &str = "InjectFilesHardwareManager";
pub const PROVIDER_VERSION: &str = "1";
pub const INJECT_FILES_STEP: &str = "inject_files";
pub const FILES_ARG: &str = "files";
const DEFAULT_TARGET_DIR: &str = "etc";

/// Publishes `inject_files` and runs it against the install disk.
#[derive(Debug, Clone)]
pub struct InjectFilesProvider<D, M> {
    devices: D,
    mounter: M,
    target_dir: String,
}

impl<D, M> InjectFilesProvider<D, M>
where
    D: BlockDeviceProvider<Error = InjectError>,
    M: Mounter<Error = InjectError>,
{
    pub fn new(devices: D, mounter: M) -> Self {
        Self {
            devices,
            mounter,
            target_dir: DEFAULT_TARGET_DIR.to_string(),
        }
    }

    /// Search for `target_dir` instead of `etc` when locating the root partition.
    pub fn with_target_dir(mut self, target_dir: impl Into<String>) -> Self {
        self.target_dir = target_dir.into();
        self
    }

    pub fn target_dir(&self) -> &str {
        &self.target_dir
    }

    /// Write `files` onto the partition holding the target directory.
    pub fn inject(&self, files: &FileMap) -> InjectResult<()> {
        inject_files(&self.devices, &self.mounter, &self.target_dir, files)
    }
}

impl<D, M> DeployStepProvider for InjectFilesProvider<D, M>
where
    D: BlockDeviceProvider<Error = InjectError>,
    M: Mounter<Error = InjectError>,
{
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn version(&self) -> &str {
        PROVIDER_VERSION
    }

    fn evaluate_support(&self) -> HardwareSupport {
        HardwareSupport::ServiceProvider
    }

    fn deploy_steps(&self) -> Vec<DeployStep> {
        let mut argsinfo = BTreeMap::new();
        argsinfo.insert(
            FILES_ARG.to_string(),
            ArgInfo {
                required: true,
                description: "Mapping between file paths and their base64 encoded contents"
                    .to_string(),
            },
        );
        vec![DeployStep {
            interface: "deploy".to_string(),
            step: INJECT_FILES_STEP.to_string(),
            priority: 0,
            reboot_requested: false,
            abortable: true,
            argsinfo,
        }]
    }

    fn execute(&self, step: &str, args: &Value) -> InjectResult<()> {
        if step != INJECT_FILES_STEP {
            return Err(InjectError::UnknownStep(step.to_string()));
        }
        let files = files_from_args(args)?;
        self.inject(&files)
    }
}

/// Extract the `files` argument as a destination -> base64 map.
pub fn files_from_args(args: &Value) -> InjectResult<FileMap> {
    let value = args.get(FILES_ARG).ok_or_else(|| {
        InjectError::InvalidArguments(format!("missing required argument `{FILES_ARG}`"))
    })?;
    let Value::Object(entries) = value else {
        return Err(InjectError::InvalidArguments(format!(
            "`{FILES_ARG}` must be an object mapping paths to base64 content, got {}",
            json_kind(value)
        )));
    };

    entries
        .iter()
        .map(|(destination, content)| match content {
            Value::String(encoded) => Ok((destination.clone(), encoded.clone())),
            other => Err(InjectError::InvalidArguments(format!(
                "content for `{destination}` must be a base64 string, got {}",
                json_kind(other)
            ))),
        })
        .collect()
}
