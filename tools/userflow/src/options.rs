//! Flow-level and step-level options, and the pure merge that produces the
//! effective options handed to a gather backend.

use crate::types::GatherMode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disable_storage_reset: Option<bool>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl SettingsOverrides {
    /// All overrides as a settings map, typed keys included.
    pub fn to_settings_map(&self) -> Map<String, Value> {
        let mut map = self.other.clone();
        if let Some(value) = self.disable_storage_reset {
            map.insert("disableStorageReset".to_string(), Value::Bool(value));
        }
        map
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_about_blank: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings_overrides: Option<SettingsOverrides>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gather_mode: Option<GatherMode>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl ConfigContext {
    pub fn with_gather_mode(&self, gather_mode: GatherMode) -> Self {
        Self {
            gather_mode: Some(gather_mode),
            ..self.clone()
        }
    }
}

/// Options supplied once when a flow is created.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlowOptions {
    pub name: Option<String>,
    pub config: Option<Value>,
    pub config_context: Option<ConfigContext>,
}

/// Options supplied with a single recording call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepOptions {
    pub step_name: Option<String>,
    pub config: Option<Value>,
    pub config_context: Option<ConfigContext>,
}

impl StepOptions {
    pub fn named(step_name: impl Into<String>) -> Self {
        Self {
            step_name: Some(step_name.into()),
            ..Self::default()
        }
    }
}

/// Effective options for one gather call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GatherOptions {
    pub step_name: Option<String>,
    pub config: Option<Value>,
    pub config_context: Option<ConfigContext>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepDefaults {
    None,
    Navigation { repeat_navigation: bool },
}

/// Merges flow options, step options and mode defaults, in increasing priority.
///
/// Step-level `config` and `configContext` replace the flow-level ones whole.
/// Defaults only fill values that are still unset after that.
pub fn merge_step_options(
    base: &FlowOptions,
    step: Option<&StepOptions>,
    defaults: StepDefaults,
) -> GatherOptions {
    let step_name = step.and_then(|s| s.step_name.clone());
    let config = step
        .and_then(|s| s.config.clone())
        .or_else(|| base.config.clone());
    let mut config_context = step
        .and_then(|s| s.config_context.clone())
        .or_else(|| base.config_context.clone());

    if let StepDefaults::Navigation { repeat_navigation } = defaults {
        let mut context = config_context.unwrap_or_default();
        let mut overrides = context.settings_overrides.take().unwrap_or_default();
        context.skip_about_blank.get_or_insert(true);
        // Repeat navigations continue a warm session instead of a cold load.
        if repeat_navigation {
            overrides.disable_storage_reset.get_or_insert(true);
        }
        context.settings_overrides = Some(overrides);
        config_context = Some(context);
    }

    GatherOptions {
        step_name,
        config,
        config_context,
    }
}
