//! # Prompt Pipeline
//!
//! Sequential LLM stage pipelines driven by configuration.
//!
//! Each stage pairs a **component** (builds the prompt, optionally reshapes
//! the reply and publishes a variable) with a **client** (talks to one LLM
//! vendor and always answers with a normalized envelope). Stages run one at a
//! time; each stage's output is the next stage's input, and every stage can
//! read the variables stored by the stages before it.
//!
//! ## Core Concepts
//!
//! - **[`Pipeline`]**: resolves stage kinds, drives the main loop, applies the
//!   [`FailurePolicy`] and produces a [`RunResult`].
//! - **[`Component`]**: prompt logic with two fixed capability flags
//!   (`if_store_variable`, `if_post_process`).
//! - **[`LlmClient`]**: `prompt -> ReplyEnvelope`, never an error. Vendor
//!   backends: [`BaiduBackend`](backend::BaiduBackend) (access-token auth
//!   with one refresh-and-retry), [`OpenAiBackend`](backend::OpenAiBackend)
//!   and [`MockBackend`](backend::MockBackend).
//! - **[`ExecutionStateStore`]**: write-once, ordered per-run variables.
//! - **[`ExecutionReport`]**: one [`ReportEntry`] per attempted stage.
//!
//! Only configuration problems come back as `Err`. Vendor outages, rejected
//! credentials, timeouts and non-JSON replies are recorded in the report.
//!
//! ## Quick Start
//!
//! ```no_run
//! use prompt_pipeline::{Pipeline, PipelineConfig, StageData};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::from_path("config/pipeline.example.json")?;
//!     let pipeline = Pipeline::from_config(config)?;
//!
//!     let result = pipeline
//!         .execute(StageData::from_text("what is your favorite food"))
//!         .await?;
//!     for entry in &result.execution_report {
//!         println!("{}: success={} {}", entry.stage_id, entry.success, entry.raw_reply);
//!     }
//!     println!("{}", result.final_output.text());
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod client;
pub mod components;
pub mod config;
pub mod error;
pub mod events;
pub mod parsing;
pub mod pipeline;
pub mod prompt;
pub mod registry;
pub mod report;
pub mod store;
pub mod types;

pub use backend::{BackoffConfig, BaiduBackend, MockBackend, OpenAiBackend};
pub use client::{merge_params, BackendClient, LlmClient, Params};
pub use components::{Component, PersonaComponent, TemplateComponent, TranslateComponent};
pub use config::{FailurePolicy, PipelineConfig, StageConfig};
pub use error::{PipelineError, Result};
pub use events::{Event, EventHandler, FnEventHandler};
pub use pipeline::{Pipeline, PipelineBuilder};
pub use registry::{ClientRegistry, ComponentRegistry};
pub use report::{ExecutionReport, ReportEntry, RunResult, RunStatus};
pub use store::ExecutionStateStore;
pub use types::{ReplyEnvelope, StageData, TokenUsage};
