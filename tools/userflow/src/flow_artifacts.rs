//! Serialized flow format: the only form in which a flow outlives the
//! process. Runner options are never part of it.

use crate::artifacts::Artifacts;
use crate::errors::FlowError;
use crate::flow::FlowStep;
use crate::logging::append_run_log;
use crate::options::ConfigContext;
use crate::reconcile::{FlowResult, Reconciler};
use crate::runtime::FileSystem;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatherStep {
    pub artifacts: Artifacts,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_context: Option<ConfigContext>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowArtifacts {
    pub gather_steps: Vec<GatherStep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl FlowArtifacts {
    pub fn from_json(text: &str) -> Result<Self, FlowError> {
        serde_json::from_str(text).map_err(|e| FlowError::Serialization(e.to_string()))
    }

    pub fn to_json_pretty(&self) -> Result<String, FlowError> {
        serde_json::to_string_pretty(self).map_err(|e| FlowError::Serialization(e.to_string()))
    }

    pub fn load(fs: &dyn FileSystem, path: &Path) -> Result<Self, FlowError> {
        let flow = Self::from_json(&fs.read_to_string(path)?)?;
        append_run_log(
            "info",
            "flow.artifacts.loaded",
            json!({
                "path": path.display().to_string(),
                "step_count": flow.gather_steps.len(),
                "name": flow.name,
            }),
        );
        Ok(flow)
    }

    pub fn save(&self, fs: &dyn FileSystem, path: &Path) -> Result<(), FlowError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs.create_dir_all(parent)?;
        }
        fs.write_string(path, &self.to_json_pretty()?)?;
        append_run_log(
            "info",
            "flow.artifacts.saved",
            json!({
                "path": path.display().to_string(),
                "step_count": self.gather_steps.len(),
            }),
        );
        Ok(())
    }

    pub fn steps(&self) -> Vec<FlowStep> {
        self.gather_steps
            .iter()
            .cloned()
            .map(FlowStep::Persisted)
            .collect()
    }

    pub fn into_steps(self) -> Vec<FlowStep> {
        self.gather_steps
            .into_iter()
            .map(FlowStep::Persisted)
            .collect()
    }

    /// Finalizes the reloaded flow. `flow_config` must be the config the flow
    /// was originally recorded with.
    pub fn audit(
        &self,
        reconciler: &Reconciler<'_>,
        flow_config: Option<&Value>,
    ) -> Result<FlowResult, FlowError> {
        reconciler.audit_steps(&self.steps(), self.name.as_deref(), flow_config)
    }
}
