//! Event hooks for stage lifecycle.
//!
//! Provides an optional, non-intrusive way to observe a run. The pipeline
//! emits events as stages start and finish, when a reply has to be wrapped
//! as text, and when the run ends. Implement [`EventHandler`] for progress
//! output or metrics.

use crate::report::RunStatus;
use std::sync::Arc;

/// Events emitted during a pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A stage is about to build its prompt.
    StageStart {
        stage_id: String,
        /// Zero-based position in the pipeline.
        index: usize,
        /// Number of configured stages.
        total: usize,
    },
    /// A stage's report entry was recorded.
    StageEnd {
        stage_id: String,
        success: bool,
    },
    /// A reply was not a `{"text": ...}` envelope and was wrapped as text.
    ParseFallback {
        stage_id: String,
        reason: String,
    },
    /// The run finished.
    RunEnd {
        success: bool,
        status: RunStatus,
    },
}

/// Handler for run lifecycle events.
///
/// This is entirely optional; pipelines work without an event handler.
///
/// # Example
///
/// ```
/// use prompt_pipeline::events::{Event, EventHandler};
///
/// struct PrintHandler;
///
/// impl EventHandler for PrintHandler {
///     fn on_event(&self, event: Event) {
///         match event {
///             Event::StageStart { stage_id, index, total } => {
///                 println!("[{}/{}] {}", index + 1, total, stage_id)
///             }
///             Event::StageEnd { stage_id, success } => println!("{} ok={}", stage_id, success),
///             _ => {}
///         }
///     }
/// }
/// ```
pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: Event);
}

/// Emit an event if a handler is present. No-op otherwise.
pub(crate) fn emit(handler: &Option<Arc<dyn EventHandler>>, event: Event) {
    if let Some(ref h) = handler {
        h.on_event(event);
    }
}

/// An [`EventHandler`] backed by a closure.
///
/// # Example
///
/// ```
/// use prompt_pipeline::events::{Event, FnEventHandler};
/// use std::sync::Arc;
///
/// let handler = Arc::new(FnEventHandler(|event: Event| {
///     if let Event::ParseFallback { stage_id, reason } = event {
///         eprintln!("{}: {}", stage_id, reason);
///     }
/// }));
/// ```
pub struct FnEventHandler<F: Fn(Event) + Send + Sync>(pub F);

impl<F: Fn(Event) + Send + Sync> EventHandler for FnEventHandler<F> {
    fn on_event(&self, event: Event) {
        (self.0)(event);
    }
}
