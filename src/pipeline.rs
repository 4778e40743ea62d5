use crate::{
    client::LlmClient,
    components::Component,
    config::{FailurePolicy, PipelineConfig, StageConfig, DEFAULT_STAGE_TIMEOUT_SECS},
    error::Result,
    events::{emit, Event, EventHandler},
    parsing,
    registry::{ClientRegistry, ComponentRegistry},
    report::{ExecutionReport, ReportEntry, RunResult, RunStatus},
    store::ExecutionStateStore,
    types::{ReplyEnvelope, StageData},
    PipelineError,
};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;
use tracing::{debug, info, info_span, warn, Instrument};

/// Where a stage is in its cycle; recorded on log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StagePhase {
    Prompting,
    Dispatching,
    PostProcessing,
    Storing,
    Reporting,
}

impl StagePhase {
    fn as_str(self) -> &'static str {
        match self {
            StagePhase::Prompting => "prompting",
            StagePhase::Dispatching => "dispatching",
            StagePhase::PostProcessing => "post_processing",
            StagePhase::Storing => "storing",
            StagePhase::Reporting => "reporting",
        }
    }
}

/// A stage with its component and client constructed for one run.
struct ResolvedStage<'a> {
    config: &'a StageConfig,
    component: Box<dyn Component>,
    client: Arc<dyn LlmClient>,
}

impl ResolvedStage<'_> {
    fn stores_variable(&self) -> bool {
        self.config
            .store_variable_override
            .unwrap_or_else(|| self.component.if_store_variable())
    }

    fn post_processes(&self) -> bool {
        self.config
            .post_process_override
            .unwrap_or_else(|| self.component.if_post_process())
    }
}

/// Sequential executor for configured LLM stages.
///
/// Each stage builds a prompt from the previous stage's output and the run's
/// [`ExecutionStateStore`], sends it through its client, parses the reply,
/// optionally post-processes it and optionally stores a variable for later
/// stages. Every attempted stage leaves one [`ReportEntry`].
///
/// Components and clients are constructed afresh at the start of every
/// [`execute`](Pipeline::execute), before any stage runs.
///
/// # Example
///
/// ```
/// use prompt_pipeline::{Pipeline, StageConfig, StageData};
/// use serde_json::json;
///
/// # tokio_test::block_on(async {
/// let pipeline = Pipeline::builder()
///     .add_stage(
///         StageConfig::new("echo", "template", "mock")
///             .with_component_params(json!({"template": "Say hi to {text}"}))
///             .with_client_params(json!({"response": "{\"text\": \"hi, Ada\"}"})),
///     )
///     .build()
///     .unwrap();
///
/// let result = pipeline.execute(StageData::from_text("Ada")).await.unwrap();
/// assert!(result.success);
/// assert_eq!(result.final_output.text(), "hi, Ada");
/// # });
/// ```
pub struct Pipeline {
    stages: Vec<StageConfig>,
    components: ComponentRegistry,
    clients: ClientRegistry,
    failure_policy: FailurePolicy,
    stage_timeout: Duration,
    cancellation: Option<Arc<AtomicBool>>,
    event_handler: Option<Arc<dyn EventHandler>>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stage_ids())
            .field("failure_policy", &self.failure_policy)
            .field("stage_timeout", &self.stage_timeout)
            .field("has_cancellation", &self.cancellation.is_some())
            .field("has_event_handler", &self.event_handler.is_some())
            .finish()
    }
}

impl Pipeline {
    /// Create a new pipeline builder with the built-in registries.
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Build a pipeline from a loaded configuration with the built-in kinds.
    pub fn from_config(config: PipelineConfig) -> Result<Self> {
        Self::builder().config(config).build()
    }

    pub fn stages(&self) -> &[StageConfig] {
        &self.stages
    }

    pub fn stage_ids(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.stage_id.as_str()).collect()
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }

    fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(|cancel| cancel.load(Ordering::Relaxed))
    }

    /// Construct every stage's component and client.
    fn resolve(&self) -> Result<Vec<ResolvedStage<'_>>> {
        self.stages
            .iter()
            .map(|config| {
                let in_stage = |e: PipelineError| match e {
                    PipelineError::InvalidConfig(msg) => {
                        PipelineError::config(format!("stage '{}': {}", config.stage_id, msg))
                    }
                    other => other,
                };
                let component = self
                    .components
                    .build(&config.component_kind, &config.component_params)
                    .map_err(in_stage)?;
                let client = self
                    .clients
                    .build(&config.client_kind, &config.client_params)
                    .map_err(in_stage)?;
                Ok(ResolvedStage {
                    config,
                    component,
                    client,
                })
            })
            .collect()
    }

    /// Run every stage in order on `input`.
    ///
    /// Returns `Err` only for configuration problems found before the first
    /// stage. Stage failures are recorded in the report; with
    /// [`FailurePolicy::Continue`] the run goes on, with
    /// [`FailurePolicy::Halt`] it ends [`RunStatus::Aborted`]. A set
    /// cancellation flag is honoured between stages and also ends the run
    /// `Aborted`.
    pub async fn execute(&self, input: StageData) -> Result<RunResult> {
        let resolved = self.resolve()?;
        let total = resolved.len();

        let mut state = ExecutionStateStore::new();
        let mut report = ExecutionReport::new();
        let mut current = input;
        let mut status = RunStatus::Completed;

        info!(stages = total, "pipeline run started");

        for (index, stage) in resolved.iter().enumerate() {
            if self.is_cancelled() {
                info!(stage_id = %stage.config.stage_id, "cancellation requested, stopping run");
                status = RunStatus::Aborted;
                break;
            }

            emit(
                &self.event_handler,
                Event::StageStart {
                    stage_id: stage.config.stage_id.clone(),
                    index,
                    total,
                },
            );

            let span = info_span!("stage", stage_id = %stage.config.stage_id, index);
            let entry = self
                .run_stage(stage, &current, &mut state)
                .instrument(span)
                .await?;

            let failed = !entry.success;
            current = entry.processed_output.clone();
            emit(
                &self.event_handler,
                Event::StageEnd {
                    stage_id: entry.stage_id.clone(),
                    success: entry.success,
                },
            );
            report.push(entry);

            if failed && self.failure_policy == FailurePolicy::Halt {
                warn!(stage_id = %stage.config.stage_id, "stage failed, halting run");
                status = RunStatus::Aborted;
                break;
            }
        }

        let success = status == RunStatus::Completed && report.all_succeeded();
        info!(
            success,
            status = ?status,
            attempted = report.len(),
            total_tokens = report.total_tokens(),
            "pipeline run finished"
        );
        emit(&self.event_handler, Event::RunEnd { success, status });

        Ok(RunResult {
            success,
            status,
            execution_report: report,
            final_output: current,
            state,
        })
    }

    /// Run one resolved stage and build its report entry.
    ///
    /// A failure envelope is parsed like any other reply, so its
    /// `API call failed: ...` diagnostic becomes the output text and still
    /// goes through `post_process` when the stage post-processes. A persona
    /// stage with a reply prefix therefore reports `"<prefix>API call failed: ..."`
    /// as `processed_output`; `error` and `success` carry the failure itself.
    async fn run_stage(
        &self,
        stage: &ResolvedStage<'_>,
        input: &StageData,
        state: &mut ExecutionStateStore,
    ) -> Result<ReportEntry> {
        let stage_id = &stage.config.stage_id;

        debug!(phase = StagePhase::Prompting.as_str(), component = stage.component.kind());
        let prompt = stage.component.generate_prompt(input, state);

        debug!(phase = StagePhase::Dispatching.as_str(), model = stage.client.model());
        let reply = match tokio::time::timeout(
            self.stage_timeout,
            stage.client.response(&prompt, &stage.config.request_overrides),
        )
        .await
        {
            Ok(reply) => reply,
            Err(_) => {
                warn!(timeout = ?self.stage_timeout, "stage deadline exceeded");
                ReplyEnvelope::failure(
                    PipelineError::Timeout(self.stage_timeout),
                    stage.client.usage_shape(),
                    stage.client.model(),
                )
            }
        };

        let parsed = parsing::parse_reply(&reply.content);
        if let (Some(reason), None) = (&parsed.fallback, &reply.error) {
            warn!(%reason, "reply parsed leniently");
            emit(
                &self.event_handler,
                Event::ParseFallback {
                    stage_id: stage_id.clone(),
                    reason: reason.clone(),
                },
            );
        }
        let lenient = parsed.is_lenient();
        let mut output = parsed.data;

        if stage.post_processes() {
            debug!(phase = StagePhase::PostProcessing.as_str());
            output = stage.component.post_process(output);
        }

        if stage.stores_variable() {
            if let Some(value) = stage.component.store_variable_in_pipeline() {
                debug!(phase = StagePhase::Storing.as_str());
                state.store(stage_id.clone(), value)?;
            }
        }

        let error = reply.error.clone().or(parsed.fallback);
        let success = error.is_none();
        debug!(phase = StagePhase::Reporting.as_str(), success, lenient);

        Ok(ReportEntry {
            stage_id: stage_id.clone(),
            prompt,
            raw_reply: reply.content,
            processed_output: output,
            success,
            error,
            lenient,
            tokens: reply.tokens,
            model: reply.model,
        })
    }
}

/// Builder for [`Pipeline`].
pub struct PipelineBuilder {
    stages: Vec<StageConfig>,
    components: ComponentRegistry,
    clients: ClientRegistry,
    failure_policy: FailurePolicy,
    stage_timeout: Duration,
    cancellation: Option<Arc<AtomicBool>>,
    event_handler: Option<Arc<dyn EventHandler>>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self {
            stages: Vec::new(),
            components: ComponentRegistry::with_builtins(),
            clients: ClientRegistry::with_builtins(),
            failure_policy: FailurePolicy::default(),
            stage_timeout: Duration::from_secs(DEFAULT_STAGE_TIMEOUT_SECS),
            cancellation: None,
            event_handler: None,
        }
    }

    /// Add a stage to the pipeline.
    pub fn add_stage(mut self, stage: StageConfig) -> Self {
        self.stages.push(stage);
        self
    }

    /// Take stages, failure policy and stage timeout from a loaded config.
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.stage_timeout = config.stage_timeout();
        self.failure_policy = config.failure_policy;
        self.stages.extend(config.stages);
        self
    }

    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Deadline for one stage's client call.
    pub fn stage_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout = timeout;
        self
    }

    /// Replace the component registry.
    pub fn components(mut self, registry: ComponentRegistry) -> Self {
        self.components = registry;
        self
    }

    /// Replace the client registry.
    pub fn clients(mut self, registry: ClientRegistry) -> Self {
        self.clients = registry;
        self
    }

    pub fn register_component<F>(mut self, kind: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&Value) -> Result<Box<dyn Component>> + Send + Sync + 'static,
    {
        self.components.register(kind, factory);
        self
    }

    pub fn register_client<F>(mut self, kind: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&Value) -> Result<Arc<dyn LlmClient>> + Send + Sync + 'static,
    {
        self.clients.register(kind, factory);
        self
    }

    /// Set a cancellation flag checked before each stage.
    pub fn with_cancellation(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancellation = Some(cancel);
        self
    }

    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.event_handler = Some(handler);
        self
    }

    /// Build the pipeline, validating stage ids and kinds.
    ///
    /// Kind parameters (credentials, URLs, templates) are checked when a run
    /// starts, where components and clients are constructed.
    pub fn build(self) -> Result<Pipeline> {
        if self.stages.is_empty() {
            return Err(PipelineError::config("Pipeline must have at least one stage"));
        }
        if self.stage_timeout.is_zero() {
            return Err(PipelineError::config("stage timeout must be greater than zero"));
        }

        let mut seen = HashSet::new();
        for stage in &self.stages {
            if stage.stage_id.trim().is_empty() {
                return Err(PipelineError::config("stage_id must not be empty"));
            }
            if !seen.insert(stage.stage_id.as_str()) {
                return Err(PipelineError::config(format!(
                    "duplicate stage_id '{}'",
                    stage.stage_id
                )));
            }
            if !self.components.contains(&stage.component_kind) {
                return Err(PipelineError::config(format!(
                    "stage '{}': unknown component kind '{}'",
                    stage.stage_id, stage.component_kind
                )));
            }
            if !self.clients.contains(&stage.client_kind) {
                return Err(PipelineError::config(format!(
                    "stage '{}': unknown client kind '{}'",
                    stage.stage_id, stage.client_kind
                )));
            }
        }

        Ok(Pipeline {
            stages: self.stages,
            components: self.components,
            clients: self.clients,
            failure_policy: self.failure_policy,
            stage_timeout: self.stage_timeout,
            cancellation: self.cancellation,
            event_handler: self.event_handler,
        })
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
