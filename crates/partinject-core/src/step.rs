//! Deploy-step contracts and the explicit provider registry.
//!
//! Providers are registered by the host binary, never discovered. When
//! several providers publish the same step, the one reporting the highest
//! [`HardwareSupport`] runs it; ties go to the provider registered first.

use crate::error::{InjectError, InjectResult};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// How well a provider matches the current machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HardwareSupport {
    None = 0,
    Generic = 1,
    Mainline = 2,
    ServiceProvider = 3,
}

/// Documentation for one step argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgInfo {
    pub required: bool,
    pub description: String,
}

/// A step the orchestrator may schedule during deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployStep {
    pub interface: String,
    pub step: String,
    pub priority: u32,
    pub reboot_requested: bool,
    pub abortable: bool,
    #[serde(default)]
    pub argsinfo: BTreeMap<String, ArgInfo>,
}

impl DeployStep {
    /// Names of arguments flagged as required.
    pub fn required_args(&self) -> impl Iterator<Item = &str> {
        self.argsinfo
            .iter()
            .filter(|(_, info)| info.required)
            .map(|(name, _)| name.as_str())
    }
}

/// A deploy step together with the provider that publishes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegisteredStep {
    pub provider: String,
    pub support: HardwareSupport,
    #[serde(flatten)]
    pub step: DeployStep,
}

/// Capability implemented by anything that contributes deploy steps.
pub trait DeployStepProvider {
    fn name(&self) -> &str;

    fn version(&self) -> &str;

    /// Rate this provider against the running hardware.
    fn evaluate_support(&self) -> HardwareSupport;

    fn deploy_steps(&self) -> Vec<DeployStep>;

    /// Run `step` with orchestrator-supplied `args` (a JSON object).
    fn execute(&self, step: &str, args: &Value) -> InjectResult<()>;
}

/// Ordered collection of providers consulted for step listing and dispatch.
#[derive(Default)]
pub struct StepRegistry {
    providers: Vec<Box<dyn DeployStepProvider>>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Box<dyn DeployStepProvider>) -> &mut Self {
        debug!(
            "registered deploy step provider {} v{}",
            provider.name(),
            provider.version()
        );
        self.providers.push(provider);
        self
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Every step from supporting providers, best-supported providers first.
    pub fn deploy_steps(&self) -> Vec<RegisteredStep> {
        let mut rated: Vec<(HardwareSupport, &dyn DeployStepProvider)> = self
            .providers
            .iter()
            .map(|provider| (provider.evaluate_support(), provider.as_ref()))
            .filter(|(support, _)| *support > HardwareSupport::None)
            .collect();
        // Stable sort keeps registration order among equals.
        rated.sort_by(|a, b| b.0.cmp(&a.0));

        rated
            .into_iter()
            .flat_map(|(support, provider)| {
                provider
                    .deploy_steps()
                    .into_iter()
                    .map(move |step| RegisteredStep {
                        provider: provider.name().to_string(),
                        support,
                        step,
                    })
            })
            .collect()
    }

    /// Run `step` on the best provider that publishes it.
    pub fn dispatch(&self, step: &str, args: &Value) -> InjectResult<()> {
        let mut selected: Option<(HardwareSupport, &dyn DeployStepProvider, DeployStep)> = None;
        for provider in &self.providers {
            let support = provider.evaluate_support();
            if support == HardwareSupport::None {
                continue;
            }
            let Some(found) = provider.deploy_steps().into_iter().find(|s| s.step == step) else {
                continue;
            };
            if selected.as_ref().map_or(true, |(best, _, _)| support > *best) {
                selected = Some((support, provider.as_ref(), found));
            }
        }

        let (_, provider, definition) =
            selected.ok_or_else(|| InjectError::UnknownStep(step.to_string()))?;
        check_required_args(&definition, args)?;

        info!("running deploy step {step} via {}", provider.name());
        provider.execute(step, args)
    }
}

fn check_required_args(step: &DeployStep, args: &Value) -> InjectResult<()> {
    let object = match args {
        Value::Object(map) => Some(map),
        Value::Null => None,
        other => {
            return Err(InjectError::InvalidArguments(format!(
                "arguments for `{}` must be a JSON object, got {}",
                step.step,
                json_kind(other)
            )))
        }
    };

    let missing: Vec<&str> = step
        .required_args()
        .filter(|name| object.map_or(true, |map| !map.contains_key(*name)))
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(InjectError::InvalidArguments(format!(
            "step `{}` is missing required argument(s): {}",
            step.step,
            missing.join(", ")
        )))
    }
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    struct Recorder {
        name: &'static str,
        support: HardwareSupport,
        steps: Vec<DeployStep>,
        calls: Arc<Mutex<Vec<(String, String)>>>,
    }

    impl DeployStepProvider for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        fn version(&self) -> &str {
            "1"
        }

        fn evaluate_support(&self) -> HardwareSupport {
            self.support
        }

        fn deploy_steps(&self) -> Vec<DeployStep> {
            self.steps.clone()
        }

        fn execute(&self, step: &str, _args: &Value) -> InjectResult<()> {
            self.calls
                .lock()
                .unwrap()
                .push((self.name.to_string(), step.to_string()));
            Ok(())
        }
    }

    fn step(name: &str, required: &[&str]) -> DeployStep {
        DeployStep {
            interface: "deploy".into(),
            step: name.into(),
            priority: 0,
            reboot_requested: false,
            abortable: true,
            argsinfo: required
                .iter()
                .map(|arg| {
                    (
                        arg.to_string(),
                        ArgInfo {
                            required: true,
                            description: String::new(),
                        },
                    )
                })
                .collect(),
        }
    }

    fn recorder(
        name: &'static str,
        support: HardwareSupport,
        steps: Vec<DeployStep>,
        calls: &Arc<Mutex<Vec<(String, String)>>>,
    ) -> Box<dyn DeployStepProvider> {
        Box::new(Recorder {
            name,
            support,
            steps,
            calls: calls.clone(),
        })
    }

    #[test]
    fn dispatch_prefers_highest_support_then_registration_order() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut registry = StepRegistry::new();
        registry
            .register(recorder("generic", HardwareSupport::Generic, vec![step("a", &[])], &calls))
            .register(recorder("first", HardwareSupport::ServiceProvider, vec![step("a", &[])], &calls))
            .register(recorder("second", HardwareSupport::ServiceProvider, vec![step("a", &[])], &calls));

        registry.dispatch("a", &json!({})).unwrap();
        assert_eq!(
            calls.lock().unwrap().as_slice(),
            &[("first".to_string(), "a".to_string())]
        );
    }

    #[test]
    fn unsupported_providers_are_ignored() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut registry = StepRegistry::new();
        registry.register(recorder("off", HardwareSupport::None, vec![step("a", &[])], &calls));

        assert!(registry.deploy_steps().is_empty());
        match registry.dispatch("a", &Value::Null) {
            Err(InjectError::UnknownStep(name)) => assert_eq!(name, "a"),
            other => panic!("unexpected result {other:?}"),
        }
        assert!(calls.lock().unwrap().is_empty());
    }

    #[test]
    fn missing_required_arguments_are_reported() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut registry = StepRegistry::new();
        registry.register(recorder(
            "files",
            HardwareSupport::ServiceProvider,
            vec![step("inject", &["files"])],
            &calls,
        ));

        for args in [json!({}), Value::Null] {
            match registry.dispatch("inject", &args) {
                Err(InjectError::InvalidArguments(message)) => assert!(message.contains("files")),
                other => panic!("unexpected result {other:?}"),
            }
        }
        assert!(matches!(
            registry.dispatch("inject", &json!(["files"])),
            Err(InjectError::InvalidArguments(_))
        ));
        assert!(calls.lock().unwrap().is_empty());
    }

    #[test]
    fn deploy_steps_are_ordered_by_support_and_tagged() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut registry = StepRegistry::new();
        registry
            .register(recorder("low", HardwareSupport::Generic, vec![step("x", &[])], &calls))
            .register(recorder("high", HardwareSupport::Mainline, vec![step("y", &[])], &calls));

        let steps = registry.deploy_steps();
        let names: Vec<(&str, &str)> = steps
            .iter()
            .map(|s| (s.provider.as_str(), s.step.step.as_str()))
            .collect();
        assert_eq!(names, vec![("high", "y"), ("low", "x")]);

        let rendered = serde_json::to_value(&steps[0]).unwrap();
        assert_eq!(rendered["provider"], "high");
        assert_eq!(rendered["step"], "y");
        assert_eq!(rendered["support"], "mainline");
        assert_eq!(rendered["interface"], "deploy");
    }
}
