//! Reference audit engine: checks that every configured audit has the
//! artifact it needs and records a manifest of the outcome.

use crate::artifacts::{Artifacts, RunnerOptions};
use crate::errors::FlowError;
use crate::logging::append_run_log;
use crate::runtime::AuditEngine;
use crate::types::GatherMode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

pub struct AuditDefinition {
    pub id: &'static str,
    pub required_artifact: &'static str,
    pub modes: &'static [GatherMode],
}

const NAV: GatherMode = GatherMode::Navigation;
const SPAN: GatherMode = GatherMode::Timespan;
const SNAP: GatherMode = GatherMode::Snapshot;

pub const AUDIT_CATALOG: &[AuditDefinition] = &[
    AuditDefinition { id: "first-contentful-paint", required_artifact: "Trace", modes: &[NAV] },
    AuditDefinition { id: "largest-contentful-paint", required_artifact: "Trace", modes: &[NAV] },
    AuditDefinition { id: "cumulative-layout-shift", required_artifact: "Trace", modes: &[NAV, SPAN] },
    AuditDefinition { id: "total-blocking-time", required_artifact: "Trace", modes: &[NAV, SPAN] },
    AuditDefinition { id: "network-requests", required_artifact: "DevtoolsLog", modes: &[NAV, SPAN] },
    AuditDefinition { id: "document-title", required_artifact: "DocumentTitle", modes: &[NAV, SNAP] },
    AuditDefinition { id: "color-contrast", required_artifact: "Accessibility", modes: &[NAV, SNAP] },
    AuditDefinition { id: "image-alt", required_artifact: "Accessibility", modes: &[NAV, SNAP] },
];

pub fn find_audit(id: &str) -> Option<&'static AuditDefinition> {
    AUDIT_CATALOG.iter().find(|def| def.id == id)
}

pub fn default_audits_for(mode: GatherMode) -> Vec<String> {
    AUDIT_CATALOG
        .iter()
        .filter(|def| def.modes.contains(&mode))
        .map(|def| def.id.to_string())
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Collected,
    MissingArtifact,
    Unknown,
}

impl AuditStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Collected => "collected",
            Self::MissingArtifact => "missing_artifact",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditOutcome {
    pub id: String,
    pub status: AuditStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_artifact: Option<String>,
}

/// Per-step audit report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub gather_mode: GatherMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_url: Option<String>,
    pub final_url: String,
    pub config_fingerprint: String,
    pub settings: Map<String, Value>,
    pub audits: Vec<AuditOutcome>,
}

impl Report {
    pub fn collected_count(&self) -> usize {
        self.audits
            .iter()
            .filter(|a| a.status == AuditStatus::Collected)
            .count()
    }
}

pub const ARTIFACT_INDEX_KEY: &str = "artifact-index";

#[derive(Debug, Clone, Copy, Default)]
pub struct ManifestAuditEngine;

impl AuditEngine for ManifestAuditEngine {
    fn audit(
        &self,
        artifacts: &Artifacts,
        options: &RunnerOptions,
    ) -> Result<Option<Report>, FlowError> {
        let config = &options.config;
        if artifacts.gather_mode() != config.gather_mode {
            append_run_log(
                "warn",
                "audit.gather_mode.mismatch",
                json!({
                    "final_url": artifacts.final_url(),
                    "artifacts_mode": artifacts.gather_mode().as_str(),
                    "config_mode": config.gather_mode.as_str(),
                }),
            );
            return Ok(None);
        }

        let index = options
            .computed_cache
            .get_or_compute(ARTIFACT_INDEX_KEY, || {
                Ok(Value::Array(
                    artifacts.other.keys().cloned().map(Value::String).collect(),
                ))
            })?;
        let available = index.as_array().cloned().unwrap_or_default();
        let has = |name: &str| available.iter().any(|v| v.as_str() == Some(name));

        let audits = config
            .audits
            .iter()
            .map(|id| match find_audit(id) {
                Some(def) => AuditOutcome {
                    id: id.clone(),
                    status: if has(def.required_artifact) {
                        AuditStatus::Collected
                    } else {
                        AuditStatus::MissingArtifact
                    },
                    required_artifact: Some(def.required_artifact.to_string()),
                },
                None => AuditOutcome {
                    id: id.clone(),
                    status: AuditStatus::Unknown,
                    required_artifact: None,
                },
            })
            .collect();

        Ok(Some(Report {
            gather_mode: artifacts.gather_mode(),
            requested_url: artifacts.url.requested_url.clone(),
            final_url: artifacts.final_url().to_string(),
            config_fingerprint: config.fingerprint(),
            settings: config.settings.clone(),
            audits,
        }))
    }
}
