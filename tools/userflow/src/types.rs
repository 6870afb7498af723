use serde::{Deserialize, Serialize};

/// Collection strategy a step's artifacts were gathered with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatherMode {
    Navigation,
    Timespan,
    Snapshot,
}

impl GatherMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "navigation" => Some(Self::Navigation),
            "timespan" => Some(Self::Timespan),
            "snapshot" => Some(Self::Snapshot),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Navigation => "navigation",
            Self::Timespan => "timespan",
            Self::Snapshot => "snapshot",
        }
    }

    pub fn report_label(self) -> &'static str {
        match self {
            Self::Navigation => "Navigation report",
            Self::Timespan => "Timespan report",
            Self::Snapshot => "Snapshot report",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecorderState {
    Idle,
    TimespanActive,
}

impl RecorderState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::TimespanActive => "timespan_active",
        }
    }
}
