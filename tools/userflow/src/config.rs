use crate::errors::FlowError;
use crate::logging::{DEFAULT_DISK_BUDGET_BYTES, DEFAULT_MAX_PAYLOAD_BYTES};
use crate::report::ReportFormat;
use crate::runtime::FileSystem;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub config_path: Option<PathBuf>,
    pub flow_config_path: Option<PathBuf>,
    pub name: Option<String>,
    pub output_path: Option<PathBuf>,
    pub format: Option<ReportFormat>,
    pub parallelism: Option<u32>,
    pub no_log: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppConfig {
    pub flow: FlowSection,
    pub audit: AuditSection,
    pub report: ReportSection,
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FlowSection {
    pub name: Option<String>,
    /// JSON config document used as the flow-level base config.
    pub config_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuditSection {
    pub parallelism: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReportSection {
    pub format: ReportFormat,
    pub output_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingSection {
    pub enabled: bool,
    pub path: PathBuf,
    pub max_payload_bytes: usize,
    pub budget_bytes: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            flow: FlowSection {
                name: None,
                config_path: None,
            },
            audit: AuditSection { parallelism: 1 },
            report: ReportSection {
                format: ReportFormat::Markdown,
                output_path: PathBuf::from("flow-report.md"),
            },
            logging: LoggingSection {
                enabled: true,
                path: PathBuf::from(".userflow/logs/run.jsonl"),
                max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
                budget_bytes: DEFAULT_DISK_BUDGET_BYTES,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PartialAppConfig {
    flow: Option<PartialFlowSection>,
    audit: Option<PartialAuditSection>,
    report: Option<PartialReportSection>,
    logging: Option<PartialLoggingSection>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PartialFlowSection {
    name: Option<String>,
    config_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PartialAuditSection {
    parallelism: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PartialReportSection {
    format: Option<ReportFormat>,
    output_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PartialLoggingSection {
    enabled: Option<bool>,
    path: Option<PathBuf>,
    max_payload_bytes: Option<usize>,
    budget_bytes: Option<u64>,
}

/// Defaults, then the TOML file, then CLI overrides. Relative paths are
/// resolved against `process_cwd`.
pub fn load_config(
    overrides: &CliOverrides,
    process_cwd: &Path,
    fs: &dyn FileSystem,
) -> Result<AppConfig, FlowError> {
    let mut cfg = AppConfig::default();

    if let Some(path) = &overrides.config_path {
        let path = absolutize_path(process_cwd, path);
        let file_contents = fs.read_to_string(&path)?;
        let partial: PartialAppConfig = toml::from_str(&file_contents)
            .map_err(|e| FlowError::ConfigParse(e.to_string()))?;
        merge_partial_config(&mut cfg, partial);
    }

    apply_cli_overrides(&mut cfg, overrides);

    cfg.flow.config_path = cfg
        .flow
        .config_path
        .as_ref()
        .map(|p| absolutize_path(process_cwd, p));
    cfg.report.output_path = absolutize_path(process_cwd, &cfg.report.output_path);
    cfg.logging.path = absolutize_path(process_cwd, &cfg.logging.path);

    validate_config(&cfg)?;
    Ok(cfg)
}

fn merge_partial_config(cfg: &mut AppConfig, partial: PartialAppConfig) {
    if let Some(flow) = partial.flow {
        if let Some(name) = flow.name {
            cfg.flow.name = Some(name);
        }
        if let Some(config_path) = flow.config_path {
            cfg.flow.config_path = Some(config_path);
        }
    }

    if let Some(audit) = partial.audit {
        if let Some(parallelism) = audit.parallelism {
            cfg.audit.parallelism = parallelism;
        }
    }

    if let Some(report) = partial.report {
        if let Some(format) = report.format {
            cfg.report.format = format;
        }
        if let Some(output_path) = report.output_path {
            cfg.report.output_path = output_path;
        }
    }

    if let Some(logging) = partial.logging {
        if let Some(value) = logging.enabled {
            cfg.logging.enabled = value;
        }
        if let Some(value) = logging.path {
            cfg.logging.path = value;
        }
        if let Some(value) = logging.max_payload_bytes {
            cfg.logging.max_payload_bytes = value;
        }
        if let Some(value) = logging.budget_bytes {
            cfg.logging.budget_bytes = value;
        }
    }
}

fn apply_cli_overrides(cfg: &mut AppConfig, overrides: &CliOverrides) {
    if let Some(path) = &overrides.flow_config_path {
        cfg.flow.config_path = Some(path.clone());
    }
    if let Some(name) = &overrides.name {
        cfg.flow.name = Some(name.clone());
    }
    if let Some(path) = &overrides.output_path {
        cfg.report.output_path = path.clone();
    }
    if let Some(format) = overrides.format {
        cfg.report.format = format;
    }
    if let Some(parallelism) = overrides.parallelism {
        cfg.audit.parallelism = parallelism;
    }
    if overrides.no_log {
        cfg.logging.enabled = false;
    }
}

fn absolutize_path(base: &Path, value: &Path) -> PathBuf {
    if value.is_absolute() {
        value.to_path_buf()
    } else {
        base.join(value)
    }
}

fn validate_config(cfg: &AppConfig) -> Result<(), FlowError> {
    if cfg.audit.parallelism == 0 {
        return Err(FlowError::InvalidConfig(
            "audit.parallelism must be greater than zero".to_string(),
        ));
    }
    if cfg.report.output_path.as_os_str().is_empty() {
        return Err(FlowError::InvalidConfig(
            "report.output_path must not be empty".to_string(),
        ));
    }
    if cfg.logging.max_payload_bytes == 0 {
        return Err(FlowError::InvalidConfig(
            "logging.max_payload_bytes must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

/// Reads the flow-level base config document, if one is configured.
pub fn load_flow_config(cfg: &AppConfig, fs: &dyn FileSystem) -> Result<Option<Value>, FlowError> {
    let Some(path) = &cfg.flow.config_path else {
        return Ok(None);
    };
    let raw = fs.read_to_string(path)?;
    let value: Value = serde_json::from_str(&raw)
        .map_err(|e| FlowError::ConfigParse(format!("{}: {e}", path.display())))?;
    if !value.is_object() {
        return Err(FlowError::InvalidConfig(format!(
            "{} must contain a JSON object",
            path.display()
        )));
    }
    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::FakeFileSystem;

    #[test]
    fn defaults_are_valid_and_relative_paths_resolve_against_cwd() {
        let fs = FakeFileSystem::default();
        let cfg = load_config(&CliOverrides::default(), Path::new("/work"), &fs).expect("cfg");
        assert_eq!(cfg.audit.parallelism, 1);
        assert_eq!(cfg.report.output_path, PathBuf::from("/work/flow-report.md"));
        assert_eq!(cfg.logging.path, PathBuf::from("/work/.userflow/logs/run.jsonl"));
    }

    #[test]
    fn file_values_merge_and_cli_wins() {
        let fs = FakeFileSystem::with_file(
            "/work/userflow.toml",
            "[audit]\nparallelism = 4\n\n[report]\nformat = \"json\"\noutput_path = \"out/flow.json\"\n",
        );
        let overrides = CliOverrides {
            config_path: Some(PathBuf::from("userflow.toml")),
            parallelism: Some(2),
            no_log: true,
            ..CliOverrides::default()
        };
        let cfg = load_config(&overrides, Path::new("/work"), &fs).expect("cfg");
        assert_eq!(cfg.audit.parallelism, 2);
        assert_eq!(cfg.report.format, ReportFormat::Json);
        assert_eq!(cfg.report.output_path, PathBuf::from("/work/out/flow.json"));
        assert!(!cfg.logging.enabled);
    }

    #[test]
    fn rejects_zero_parallelism_and_unknown_keys() {
        let fs = FakeFileSystem::with_file("/c.toml", "[audit]\nparallelism = 0\n");
        let overrides = CliOverrides {
            config_path: Some(PathBuf::from("/c.toml")),
            ..CliOverrides::default()
        };
        let err = load_config(&overrides, Path::new("/"), &fs).expect_err("invalid");
        assert!(matches!(err, FlowError::InvalidConfig(m) if m.contains("parallelism")));

        let fs = FakeFileSystem::with_file("/c.toml", "[audit]\nworkers = 3\n");
        let err = load_config(&overrides, Path::new("/"), &fs).expect_err("unknown");
        assert!(matches!(err, FlowError::ConfigParse(_)));
    }

    #[test]
    fn flow_config_must_be_a_json_object() {
        let fs = FakeFileSystem::with_file("/flow.json", "[1, 2]");
        let mut cfg = AppConfig::default();
        cfg.flow.config_path = Some(PathBuf::from("/flow.json"));
        assert!(matches!(
            load_flow_config(&cfg, &fs),
            Err(FlowError::InvalidConfig(_))
        ));

        let fs = FakeFileSystem::with_file("/flow.json", "{\"settings\": {}}");
        assert!(load_flow_config(&cfg, &fs).expect("load").is_some());
        cfg.flow.config_path = None;
        assert!(load_flow_config(&cfg, &fs).expect("none").is_none());
    }
}
