//! Deterministic config resolution shared by live gathering and reconstruction.

use crate::audit::default_audits_for;
use crate::errors::FlowError;
use crate::options::ConfigContext;
use crate::runtime::ConfigResolver;
use crate::types::GatherMode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedConfig {
    pub gather_mode: GatherMode,
    pub skip_about_blank: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extends: Option<String>,
    pub settings: Map<String, Value>,
    pub audits: Vec<String>,
}

impl ResolvedConfig {
    /// sha256 of the canonical JSON form. Object keys serialize sorted.
    pub fn fingerprint(&self) -> String {
        let rendered = serde_json::to_vec(self).unwrap_or_default();
        let digest = Sha256::digest(&rendered);
        digest.iter().map(|b| format!("{b:02x}")).collect()
    }

    pub fn setting_bool(&self, key: &str) -> Option<bool> {
        self.settings.get(key).and_then(Value::as_bool)
    }
}

fn default_settings() -> Map<String, Value> {
    let defaults = json!({
        "disableStorageReset": false,
        "formFactor": "mobile",
        "throttlingMethod": "simulate",
        "maxWaitForLoad": 45000,
        "locale": "en-US",
    });
    match defaults {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Layers built-in defaults, the config document's `settings`, and the
/// context's settings overrides, in that order.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultConfigResolver;

impl ConfigResolver for DefaultConfigResolver {
    fn resolve(
        &self,
        config: Option<&Value>,
        context: &ConfigContext,
    ) -> Result<ResolvedConfig, FlowError> {
        let empty = Map::new();
        let document = match config {
            None | Some(Value::Null) => &empty,
            Some(Value::Object(map)) => map,
            Some(other) => {
                return Err(FlowError::InvalidConfig(format!(
                    "config must be a JSON object, got {other}"
                )))
            }
        };

        let mut settings = default_settings();
        match document.get("settings") {
            None | Some(Value::Null) => {}
            Some(Value::Object(overlay)) => {
                for (key, value) in overlay {
                    settings.insert(key.clone(), value.clone());
                }
            }
            Some(_) => {
                return Err(FlowError::InvalidConfig(
                    "config.settings must be an object".to_string(),
                ))
            }
        }
        if let Some(overrides) = &context.settings_overrides {
            for (key, value) in overrides.to_settings_map() {
                settings.insert(key, value);
            }
        }

        let gather_mode = context.gather_mode.unwrap_or(GatherMode::Navigation);
        let audits = match document.get("audits") {
            None | Some(Value::Null) => default_audits_for(gather_mode),
            Some(Value::Array(entries)) => entries
                .iter()
                .map(|entry| {
                    entry.as_str().map(str::to_string).ok_or_else(|| {
                        FlowError::InvalidConfig("config.audits entries must be strings".to_string())
                    })
                })
                .collect::<Result<Vec<_>, _>>()?,
            Some(_) => {
                return Err(FlowError::InvalidConfig(
                    "config.audits must be an array".to_string(),
                ))
            }
        };

        Ok(ResolvedConfig {
            gather_mode,
            skip_about_blank: context.skip_about_blank.unwrap_or(false),
            config_path: context.config_path.clone(),
            extends: document
                .get("extends")
                .and_then(Value::as_str)
                .map(str::to_string),
            settings,
            audits,
        })
    }
}
