//! Kind-name registries for components and clients.
//!
//! Stage configurations name their component and client by kind. A run
//! resolves every kind through these registries before its first stage, so
//! an unknown kind or bad parameters fail the run up front.

use crate::backend::{baidu, mock, openai};
use crate::client::LlmClient;
use crate::components::{Component, PersonaComponent, TemplateComponent, TranslateComponent};
use crate::error::Result;
use crate::PipelineError;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Builds a component from its stage parameters.
pub type ComponentFactory = Box<dyn Fn(&Value) -> Result<Box<dyn Component>> + Send + Sync>;

/// Builds a client from its stage parameters.
pub type ClientFactory = Box<dyn Fn(&Value) -> Result<Arc<dyn LlmClient>> + Send + Sync>;

/// Component factories by kind name.
pub struct ComponentRegistry {
    factories: HashMap<String, ComponentFactory>,
}

impl ComponentRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// `persona`, `translate` and `template`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("persona", |params| {
            Ok(Box::new(PersonaComponent::from_params(params)?) as Box<dyn Component>)
        });
        registry.register("translate", |params| {
            Ok(Box::new(TranslateComponent::from_params(params)?) as Box<dyn Component>)
        });
        registry.register("template", |params| {
            Ok(Box::new(TemplateComponent::from_params(params)?) as Box<dyn Component>)
        });
        registry
    }

    /// Add or replace a kind.
    pub fn register<F>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn(&Value) -> Result<Box<dyn Component>> + Send + Sync + 'static,
    {
        self.factories.insert(kind.into(), Box::new(factory));
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    /// Registered kind names, sorted.
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.factories.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    pub fn build(&self, kind: &str, params: &Value) -> Result<Box<dyn Component>> {
        let factory = self.factories.get(kind).ok_or_else(|| {
            PipelineError::config(format!(
                "unknown component kind '{}' (registered: {})",
                kind,
                self.kinds().join(", ")
            ))
        })?;
        factory(params)
    }
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// Client factories by kind name.
pub struct ClientRegistry {
    factories: HashMap<String, ClientFactory>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// `baidu`, `openai` and `mock`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("baidu", |params| {
            Ok(Arc::new(baidu::client_from_params(params)?) as Arc<dyn LlmClient>)
        });
        registry.register("openai", |params| {
            Ok(Arc::new(openai::client_from_params(params)?) as Arc<dyn LlmClient>)
        });
        registry.register("mock", |params| {
            Ok(Arc::new(mock::client_from_params(params)?) as Arc<dyn LlmClient>)
        });
        registry
    }

    pub fn register<F>(&mut self, kind: impl Into<String>, factory: F)
    where
        F: Fn(&Value) -> Result<Arc<dyn LlmClient>> + Send + Sync + 'static,
    {
        self.factories.insert(kind.into(), Box::new(factory));
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }

    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.factories.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    /// Construct a fresh client; credentials are never shared between builds.
    pub fn build(&self, kind: &str, params: &Value) -> Result<Arc<dyn LlmClient>> {
        let factory = self.factories.get(kind).ok_or_else(|| {
            PipelineError::config(format!(
                "unknown client kind '{}' (registered: {})",
                kind,
                self.kinds().join(", ")
            ))
        })?;
        factory(params)
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
