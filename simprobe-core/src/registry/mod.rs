//! Per-model metadata: which module to read features from and the softmax
//! temperature fitted for each similarity objective.
//!
//! The table is JSON shaped as
//! `{ model: { module: { "module_name": str, "temperature": { objective: f64 } } } }`.

pub mod family;

pub use family::ModelFamily;

use crate::error::{ProbeError, ProbeResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Temperature used when the registry has none for a model.
pub const DEFAULT_TEMPERATURE: f64 = 1.0;

/// One `(model, module)` cell.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module_name: Option<String>,
    #[serde(default)]
    pub temperature: BTreeMap<String, f64>,
}

/// Model → module key → entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelRegistry {
    models: BTreeMap<String, BTreeMap<String, ModuleEntry>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_str(content: &str) -> ProbeResult<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Unlike results tables, a registry that is asked for must exist.
    pub fn load(path: &Path) -> ProbeResult<Self> {
        if !path.exists() {
            return Err(ProbeError::not_found(format!(
                "model registry not found: {}",
                path.display()
            )));
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    pub fn insert(&mut self, model: impl Into<String>, module: impl Into<String>, entry: ModuleEntry) {
        self.models
            .entry(model.into())
            .or_default()
            .insert(module.into(), entry);
    }

    pub fn models(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }

    pub fn entry(&self, model: &str, module: &str) -> Option<&ModuleEntry> {
        self.models.get(model)?.get(module)
    }

    /// Concrete layer name for `module` of `model`. Missing is a configuration
    /// error: features cannot be located without it.
    pub fn module_name(&self, model: &str, module: &str) -> ProbeResult<&str> {
        self.entry(model, module)
            .and_then(|e| e.module_name.as_deref())
            .ok_or_else(|| {
                ProbeError::config(format!(
                    "no module_name for model '{model}' and module '{module}' in registry"
                ))
            })
    }

    /// Fitted temperature, or [`DEFAULT_TEMPERATURE`] with a warning.
    pub fn temperature(&self, model: &str, module: &str, objective: &str) -> f64 {
        match self
            .entry(model, module)
            .and_then(|e| e.temperature.get(objective))
        {
            Some(&t) if t.is_finite() && t > 0.0 => t,
            Some(&t) => {
                tracing::warn!(model, module, objective, temperature = t, "invalid temperature in registry; using 1.0");
                DEFAULT_TEMPERATURE
            }
            None => {
                tracing::warn!(model, module, objective, "missing temperature in registry; using 1.0");
                DEFAULT_TEMPERATURE
            }
        }
    }
}
