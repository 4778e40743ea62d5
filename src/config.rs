//! Pipeline configuration: stage descriptors, run policy and file loaders.

use crate::backend::transport::DEFAULT_TIMEOUT;
use crate::backend::BackoffConfig;
use crate::client::Params;
use crate::error::Result;
use crate::PipelineError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;

/// Default deadline for one whole stage, prompt to report entry.
pub const DEFAULT_STAGE_TIMEOUT_SECS: u64 = 300;

/// Immutable descriptor of one stage.
///
/// # Example
///
/// ```
/// use prompt_pipeline::StageConfig;
/// use serde_json::json;
///
/// let stage = StageConfig::new("greet", "template", "mock")
///     .with_component_params(json!({"template": "say hi to {text}"}))
///     .with_client_params(json!({"echo": true}))
///     .with_store_variable(false);
/// assert_eq!(stage.store_variable_override, Some(false));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StageConfig {
    pub stage_id: String,

    /// Registered component kind (e.g. `"persona"`).
    #[serde(alias = "component")]
    pub component_kind: String,

    #[serde(default)]
    pub component_params: Value,

    /// Registered client kind (e.g. `"baidu"`).
    #[serde(alias = "client")]
    pub client_kind: String,

    #[serde(default)]
    pub client_params: Value,

    /// Replaces the component's own `if_store_variable` flag.
    #[serde(
        default,
        alias = "if_store_variable",
        alias = "if_store_variable_override",
        skip_serializing_if = "Option::is_none"
    )]
    pub store_variable_override: Option<bool>,

    /// Replaces the component's own `if_post_process` flag.
    #[serde(
        default,
        alias = "if_post_process",
        alias = "if_post_process_override",
        skip_serializing_if = "Option::is_none"
    )]
    pub post_process_override: Option<bool>,

    /// Per-call parameters handed to the client on every call of this stage.
    #[serde(default, skip_serializing_if = "Params::is_empty")]
    pub request_overrides: Params,
}

impl StageConfig {
    pub fn new(
        stage_id: impl Into<String>,
        component_kind: impl Into<String>,
        client_kind: impl Into<String>,
    ) -> Self {
        Self {
            stage_id: stage_id.into(),
            component_kind: component_kind.into(),
            component_params: Value::Null,
            client_kind: client_kind.into(),
            client_params: Value::Null,
            store_variable_override: None,
            post_process_override: None,
            request_overrides: Params::new(),
        }
    }

    pub fn with_component_params(mut self, params: Value) -> Self {
        self.component_params = params;
        self
    }

    pub fn with_client_params(mut self, params: Value) -> Self {
        self.client_params = params;
        self
    }

    pub fn with_store_variable(mut self, enabled: bool) -> Self {
        self.store_variable_override = Some(enabled);
        self
    }

    pub fn with_post_process(mut self, enabled: bool) -> Self {
        self.post_process_override = Some(enabled);
        self
    }

    pub fn with_request_override(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.request_overrides.insert(key.into(), value.into());
        self
    }
}

/// What the orchestrator does after a stage fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Record the failure and feed the stage's output to the next stage.
    #[default]
    Continue,
    /// Stop after the failed stage; the run ends `Aborted`.
    Halt,
}

/// A whole pipeline as loaded from a configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub stages: Vec<StageConfig>,

    #[serde(default)]
    pub failure_policy: FailurePolicy,

    #[serde(default = "default_stage_timeout_secs")]
    pub stage_timeout_secs: u64,
}

fn default_stage_timeout_secs() -> u64 {
    DEFAULT_STAGE_TIMEOUT_SECS
}

impl PipelineConfig {
    pub fn new(stages: Vec<StageConfig>) -> Self {
        Self {
            stages,
            failure_policy: FailurePolicy::default(),
            stage_timeout_secs: DEFAULT_STAGE_TIMEOUT_SECS,
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    #[cfg(feature = "yaml")]
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Load a JSON file, or a YAML file (`.yaml`/`.yml`) when the `yaml`
    /// feature is enabled.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);

        match extension.as_deref() {
            #[cfg(feature = "yaml")]
            Some("yaml") | Some("yml") => Self::from_yaml_str(&contents),
            #[cfg(not(feature = "yaml"))]
            Some("yaml") | Some("yml") => Err(PipelineError::config(format!(
                "{} is YAML; enable the `yaml` feature to load it",
                path.display()
            ))),
            _ => Self::from_json_str(&contents),
        }
    }

    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }
}

// Parameter helpers shared by component and client factories.

/// Params as an owned object; `null` counts as empty.
pub(crate) fn params_object(value: &Value, what: &str) -> Result<Params> {
    match value {
        Value::Null => Ok(Params::new()),
        Value::Object(map) => Ok(map.clone()),
        other => Err(PipelineError::config(format!(
            "{}: parameters must be an object, got {}",
            what, other
        ))),
    }
}

/// Remove a string parameter, failing when it is missing or empty.
pub(crate) fn take_required_str(params: &mut Params, key: &str, what: &str) -> Result<String> {
    match take_optional_str(params, key, what)? {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(PipelineError::config(format!(
            "{}: missing required field {}",
            what, key
        ))),
    }
}

/// Remove an optional string parameter.
pub(crate) fn take_optional_str(params: &mut Params, key: &str, what: &str) -> Result<Option<String>> {
    match params.remove(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(other) => Err(PipelineError::config(format!(
            "{}: field {} must be a string, got {}",
            what, key, other
        ))),
    }
}

/// Remove an optional boolean parameter.
pub(crate) fn take_bool(params: &mut Params, key: &str, what: &str) -> Result<Option<bool>> {
    match params.remove(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(b)),
        Some(other) => Err(PipelineError::config(format!(
            "{}: field {} must be a boolean, got {}",
            what, key, other
        ))),
    }
}

/// HTTP settings every vendor client accepts.
#[derive(Debug, Clone)]
pub(crate) struct TransportSettings {
    pub timeout: Duration,
    pub backoff: BackoffConfig,
}

/// Remove the reserved `timeout` (seconds) and `backoff` (preset) keys.
pub(crate) fn take_transport_settings(params: &mut Params, what: &str) -> Result<TransportSettings> {
    let timeout = match params.remove("timeout") {
        None | Some(Value::Null) => DEFAULT_TIMEOUT,
        Some(value) => match value.as_f64() {
            Some(secs) if secs > 0.0 && secs.is_finite() => Duration::from_secs_f64(secs),
            _ => {
                return Err(PipelineError::config(format!(
                    "{}: timeout must be a positive number of seconds, got {}",
                    what, value
                )))
            }
        },
    };

    let backoff = match take_optional_str(params, "backoff", what)? {
        Some(name) => BackoffConfig::from_name(&name)?,
        None => BackoffConfig::none(),
    };

    Ok(TransportSettings { timeout, backoff })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stage_config_from_json_with_aliases() {
        let config = PipelineConfig::from_json_str(
            r#"{
                "stages": [{
                    "stage_id": "persona",
                    "component": "persona",
                    "component_params": {"system": "You are a chef"},
                    "client_kind": "baidu",
                    "client_params": {"api_key": "ak"},
                    "if_store_variable": false,
                    "request_overrides": {"temperature": 0.2}
                }]
            }"#,
        )
        .unwrap();

        let stage = &config.stages[0];
        assert_eq!(stage.component_kind, "persona");
        assert_eq!(stage.store_variable_override, Some(false));
        assert_eq!(stage.post_process_override, None);
        assert_eq!(stage.request_overrides["temperature"], json!(0.2));
        assert_eq!(config.failure_policy, FailurePolicy::Continue);
        assert_eq!(config.stage_timeout(), Duration::from_secs(300));
    }

    #[test]
    fn test_stage_config_accepts_override_field_names() {
        let stage: StageConfig = serde_json::from_value(json!({
            "stage_id": "s",
            "component_kind": "persona",
            "client_kind": "mock",
            "if_store_variable_override": false,
            "if_post_process_override": true
        }))
        .unwrap();
        assert_eq!(stage.store_variable_override, Some(false));
        assert_eq!(stage.post_process_override, Some(true));
    }

    #[test]
    fn test_stage_config_rejects_unknown_fields() {
        let err = PipelineConfig::from_json_str(
            r#"{"stages": [{
                "stage_id": "s",
                "component_kind": "persona",
                "client_kind": "mock",
                "if_store_variable_overide": false
            }]}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("unknown field"));
    }

    #[test]
    fn test_failure_policy_parses() {
        let config = PipelineConfig::from_json_str(
            r#"{"stages": [], "failure_policy": "halt", "stage_timeout_secs": 5}"#,
        )
        .unwrap();
        assert_eq!(config.failure_policy, FailurePolicy::Halt);
        assert_eq!(config.stage_timeout_secs, 5);
    }

    #[test]
    fn test_missing_required_stage_field_is_error() {
        let result = PipelineConfig::from_json_str(r#"{"stages": [{"stage_id": "a"}]}"#);
        assert!(matches!(result, Err(PipelineError::Json(_))));
    }

    #[test]
    fn test_from_path_missing_file() {
        let result = PipelineConfig::from_path("/definitely/not/here.json");
        assert!(matches!(result, Err(PipelineError::Io(_))));
    }

    #[test]
    fn test_from_path_reads_json() {
        let path = std::env::temp_dir().join(format!("pipeline-config-{}.json", std::process::id()));
        std::fs::write(
            &path,
            r#"{"stages": [{"stage_id": "t", "component_kind": "template", "client_kind": "mock"}]}"#,
        )
        .unwrap();
        let config = PipelineConfig::from_path(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(config.stages.len(), 1);
        assert_eq!(config.stages[0].client_params, Value::Null);
    }

    #[cfg(feature = "yaml")]
    #[test]
    fn test_from_yaml_str() {
        let config = PipelineConfig::from_yaml_str(
            "stages:\n  - stage_id: t\n    component_kind: template\n    client_kind: mock\nfailure_policy: halt\n",
        )
        .unwrap();
        assert_eq!(config.failure_policy, FailurePolicy::Halt);
    }

    #[test]
    fn test_required_str_helpers() {
        let mut params = params_object(&json!({"a": "x", "b": "", "c": 3}), "test").unwrap();
        assert_eq!(take_required_str(&mut params, "a", "test").unwrap(), "x");
        assert!(take_required_str(&mut params, "b", "test").is_err());
        assert!(take_optional_str(&mut params, "c", "test").is_err());
        assert!(params.is_empty());
        assert!(params_object(&json!([1]), "test").is_err());
    }

    #[test]
    fn test_transport_settings() {
        let mut params = params_object(&json!({"timeout": 2.5, "backoff": "standard", "x": 1}), "t").unwrap();
        let settings = take_transport_settings(&mut params, "t").unwrap();
        assert_eq!(settings.timeout, Duration::from_millis(2500));
        assert_eq!(settings.backoff.max_retries, 3);
        assert_eq!(params.len(), 1);

        let mut defaults = Params::new();
        let settings = take_transport_settings(&mut defaults, "t").unwrap();
        assert_eq!(settings.timeout, DEFAULT_TIMEOUT);
        assert_eq!(settings.backoff.max_retries, 0);

        let mut bad = params_object(&json!({"timeout": -1}), "t").unwrap();
        assert!(take_transport_settings(&mut bad, "t").is_err());
    }
}
