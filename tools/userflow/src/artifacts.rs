//! Gathered artifacts and the in-session runner options that travel with them.

use crate::errors::FlowError;
use crate::resolver::ResolvedConfig;
use crate::types::GatherMode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatherContext {
    pub gather_mode: GatherMode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlArtifact {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_url: Option<String>,
    pub final_url: String,
}

/// Artifact bag produced by a gather backend.
///
/// Only the gather context and URL are interpreted here; every other artifact
/// is carried through untouched for the audit engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifacts {
    #[serde(rename = "GatherContext")]
    pub gather_context: GatherContext,
    #[serde(rename = "URL")]
    pub url: UrlArtifact,
    #[serde(flatten)]
    pub other: BTreeMap<String, Value>,
}

impl Artifacts {
    pub fn new(gather_mode: GatherMode, final_url: impl Into<String>) -> Self {
        Self {
            gather_context: GatherContext { gather_mode },
            url: UrlArtifact {
                requested_url: None,
                final_url: final_url.into(),
            },
            other: BTreeMap::new(),
        }
    }

    pub fn with_requested_url(mut self, requested_url: impl Into<String>) -> Self {
        self.url.requested_url = Some(requested_url.into());
        self
    }

    pub fn with_artifact(mut self, key: impl Into<String>, value: Value) -> Self {
        self.other.insert(key.into(), value);
        self
    }

    pub fn gather_mode(&self) -> GatherMode {
        self.gather_context.gather_mode
    }

    pub fn final_url(&self) -> &str {
        &self.url.final_url
    }

    pub fn has_artifact(&self, key: &str) -> bool {
        self.other.contains_key(key)
    }
}

/// Computation cache shared by every audit invocation that receives the same
/// runner options. Clones share storage.
#[derive(Debug, Clone, Default)]
pub struct ComputedCache {
    entries: Arc<Mutex<HashMap<String, Value>>>,
}

impl ComputedCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn insert(&self, key: impl Into<String>, value: Value) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), value);
    }

    pub fn get_or_compute<F>(&self, key: &str, compute: F) -> Result<Value, FlowError>
    where
        F: FnOnce() -> Result<Value, FlowError>,
    {
        if let Some(hit) = self.get(key) {
            return Ok(hit);
        }
        // Computed outside the lock; a racing writer for the same key stores an equal value.
        let value = compute()?;
        self.insert(key, value.clone());
        Ok(value)
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn shares_storage_with(&self, other: &ComputedCache) -> bool {
        Arc::ptr_eq(&self.entries, &other.entries)
    }
}

/// Resolved configuration plus warm cache. Only exists for steps gathered in
/// the current process; never serialized.
#[derive(Debug, Clone)]
pub struct RunnerOptions {
    pub config: Arc<ResolvedConfig>,
    pub computed_cache: ComputedCache,
}

impl RunnerOptions {
    pub fn new(config: ResolvedConfig) -> Self {
        Self {
            config: Arc::new(config),
            computed_cache: ComputedCache::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GatherResult {
    pub artifacts: Artifacts,
    pub runner_options: RunnerOptions,
}
