//! Per-stage execution report and the run result.

use crate::store::ExecutionStateStore;
use crate::types::{StageData, TokenUsage};
use serde::Serialize;

/// What happened in one attempted stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportEntry {
    pub stage_id: String,
    pub prompt: String,
    /// Reply `content` exactly as the client returned it.
    pub raw_reply: String,
    /// Parsed and (if enabled) post-processed output fed to the next stage.
    pub processed_output: StageData,
    /// `false` when the client failed or the reply had to be wrapped as text.
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// The reply was not a `{"text": ...}` envelope and was wrapped.
    pub lenient: bool,
    pub tokens: TokenUsage,
    pub model: String,
}

/// Append-only, ordered list of [`ReportEntry`]s.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ExecutionReport {
    entries: Vec<ReportEntry>,
}

impl ExecutionReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: ReportEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[ReportEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn all_succeeded(&self) -> bool {
        self.entries.iter().all(|e| e.success)
    }

    pub fn entry(&self, stage_id: &str) -> Option<&ReportEntry> {
        self.entries.iter().find(|e| e.stage_id == stage_id)
    }

    /// Sum of `total_tokens` over all entries.
    pub fn total_tokens(&self) -> u64 {
        self.entries.iter().map(|e| e.tokens.total()).sum()
    }
}

impl<'a> IntoIterator for &'a ExecutionReport {
    type Item = &'a ReportEntry;
    type IntoIter = std::slice::Iter<'a, ReportEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every configured stage was attempted.
    Completed,
    /// The run stopped early (halt policy or cancellation).
    Aborted,
}

/// Outcome of [`Pipeline::execute`](crate::Pipeline::execute).
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    /// Every stage succeeded and the run completed.
    pub success: bool,
    pub status: RunStatus,
    pub execution_report: ExecutionReport,
    /// Output of the last attempted stage (the input, if none ran).
    pub final_output: StageData,
    /// Store contents at the end of the run.
    pub state: ExecutionStateStore,
}
