//! Cross-stage memory for a single pipeline run.

use crate::error::Result;
use crate::PipelineError;
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::Value;

/// Ordered `stage_id -> value` slots written by stages of one run.
///
/// Each slot is written at most once; a second write for the same stage id is
/// rejected. Components only ever see `&ExecutionStateStore`, so a stage
/// cannot observe or make writes outside its own `store` step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionStateStore {
    slots: Vec<(String, Value)>,
}

impl ExecutionStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write the slot for `stage_id`.
    pub fn store(&mut self, stage_id: impl Into<String>, value: Value) -> Result<()> {
        let stage_id = stage_id.into();
        if self.contains(&stage_id) {
            return Err(PipelineError::StateConflict(stage_id));
        }
        self.slots.push((stage_id, value));
        Ok(())
    }

    pub fn get(&self, stage_id: &str) -> Option<&Value> {
        self.slots
            .iter()
            .find(|(id, _)| id == stage_id)
            .map(|(_, value)| value)
    }

    pub fn contains(&self, stage_id: &str) -> bool {
        self.slots.iter().any(|(id, _)| id == stage_id)
    }

    /// Stage ids in write order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.slots.iter().map(|(id, _)| id.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.slots.iter().map(|(id, value)| (id.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl Serialize for ExecutionStateStore {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.slots.len()))?;
        for (id, value) in &self.slots {
            map.serialize_entry(id, value)?;
        }
        map.end()
    }
}
