//! Core building blocks shared by partinject binaries.
//!
//! The partition locator, the file injector and the deploy-step registry live
//! here; host integrations plug in through the traits re-exported from
//! [`provider`].

pub mod config;
pub mod error;
pub mod inject_step;
pub mod injector;
pub mod locator;
pub mod logging;
pub mod provider;
pub mod step;

pub use config::InjectConfig;
pub use error::{InjectError, InjectResult};
pub use inject_step::InjectFilesProvider;
pub use injector::{inject_files, FileMap};
pub use locator::{partition_device_path, with_partition_path, Located};
pub use step::{ArgInfo, DeployStep, DeployStepProvider, HardwareSupport, StepRegistry};
