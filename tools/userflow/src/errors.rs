use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlowError {
    #[error("conflicting operation: {0}")]
    ConflictingOperation(String),
    #[error("no timespan in progress")]
    NoActiveOperation,
    #[error("need at least one step before getting the result")]
    EmptyFlow,
    #[error("step \"{step}\" did not return a result")]
    StepAuditFailed { step: String },
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("gather backend error: {0}")]
    Backend(String),
    #[error("audit error: {0}")]
    Audit(String),
    #[error("io error: {0}")]
    Io(String),
    #[error("config parse error: {0}")]
    ConfigParse(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("cli error: {0}")]
    Cli(String),
}

impl FlowError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConflictingOperation(_) => "conflicting_operation",
            Self::NoActiveOperation => "no_active_operation",
            Self::EmptyFlow => "empty_flow",
            Self::StepAuditFailed { .. } => "step_audit_failed",
            Self::InvalidUrl(_) => "invalid_url",
            Self::Backend(_) => "backend",
            Self::Audit(_) => "audit",
            Self::Io(_) => "io",
            Self::ConfigParse(_) => "config_parse",
            Self::InvalidConfig(_) => "invalid_config",
            Self::Serialization(_) => "serialization",
            Self::Cli(_) => "cli",
        }
    }
}
