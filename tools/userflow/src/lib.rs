pub mod artifacts;
pub mod audit;
pub mod config;
pub mod errors;
pub mod flow;
pub mod flow_artifacts;
pub mod logging;
pub mod naming;
pub mod options;
pub mod reconcile;
pub mod report;
pub mod resolver;
pub mod runtime;
pub mod types;

use audit::ManifestAuditEngine;
use clap::{error::ErrorKind, CommandFactory, Parser, ValueEnum};
use config::{load_config, load_flow_config, CliOverrides};
use errors::FlowError;
use flow_artifacts::FlowArtifacts;
use logging::{append_run_log, clear_run_logger, init_run_logger, JsonlLogger};
use reconcile::Reconciler;
use report::{write_flow_report, ReportFormat};
use resolver::DefaultConfigResolver;
use runtime::ProductionRuntime;
use serde_json::json;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Parser)]
#[command(name = "userflow")]
#[command(about = "Audit a saved multi-step user flow and write a combined report")]
pub struct Cli {
    /// Saved flow artifacts (JSON).
    #[arg(long)]
    pub artifacts: PathBuf,
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Flow-level config document the flow was recorded with (JSON).
    #[arg(long)]
    pub flow_config: Option<PathBuf>,
    #[arg(long)]
    pub name: Option<String>,
    #[arg(long)]
    pub output: Option<PathBuf>,
    #[arg(long, value_enum)]
    pub format: Option<CliFormat>,
    #[arg(long)]
    pub parallelism: Option<u32>,
    #[arg(long, default_value_t = false)]
    pub no_log: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum CliFormat {
    Markdown,
    Json,
}

impl From<CliFormat> for ReportFormat {
    fn from(value: CliFormat) -> Self {
        match value {
            CliFormat::Markdown => ReportFormat::Markdown,
            CliFormat::Json => ReportFormat::Json,
        }
    }
}

pub fn render_help() -> String {
    Cli::command().render_help().to_string()
}

pub fn run() -> Result<i32, FlowError> {
    let args = std::env::args_os().collect::<Vec<_>>();
    let cwd = std::env::current_dir().map_err(|e| FlowError::Io(e.to_string()))?;
    let runtime = ProductionRuntime::new();
    run_with_runtime(&args, &cwd, &runtime)
}

pub fn run_with_runtime(
    args: &[std::ffi::OsString],
    cwd: &Path,
    runtime: &ProductionRuntime,
) -> Result<i32, FlowError> {
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) => match error.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                print!("{error}");
                return Ok(0);
            }
            _ => return Err(FlowError::Cli(error.to_string())),
        },
    };

    let overrides = CliOverrides {
        config_path: cli.config.clone(),
        flow_config_path: cli.flow_config.clone(),
        name: cli.name.clone(),
        output_path: cli.output.clone(),
        format: cli.format.map(Into::into),
        parallelism: cli.parallelism,
        no_log: cli.no_log,
    };
    let cfg = load_config(&overrides, cwd, runtime.file_system.as_ref())?;

    if cfg.logging.enabled {
        let mut logger = JsonlLogger::new(&cfg.logging.path);
        logger.max_payload_bytes = cfg.logging.max_payload_bytes;
        logger.budget_bytes = cfg.logging.budget_bytes;
        init_run_logger(logger);
    }
    let outcome = audit_saved_flow(&cli, &cfg, cwd, runtime);
    if let Err(error) = &outcome {
        append_run_log(
            "error",
            "run.failed",
            json!({ "kind": error.kind(), "message": error.to_string() }),
        );
    }
    if cfg.logging.enabled {
        clear_run_logger();
    }
    outcome
}

fn audit_saved_flow(
    cli: &Cli,
    cfg: &config::AppConfig,
    cwd: &Path,
    runtime: &ProductionRuntime,
) -> Result<i32, FlowError> {
    let fs = runtime.file_system.as_ref();
    let artifacts_path = if cli.artifacts.is_absolute() {
        cli.artifacts.clone()
    } else {
        cwd.join(&cli.artifacts)
    };
    let flow_config = load_flow_config(cfg, fs)?;
    let saved = FlowArtifacts::load(fs, &artifacts_path)?;
    let name = cfg.flow.name.as_deref().or(saved.name.as_deref());

    let engine = ManifestAuditEngine;
    let resolver = DefaultConfigResolver;
    let reconciler =
        Reconciler::new(&engine, &resolver).with_parallelism(cfg.audit.parallelism as usize);
    let result = reconciler.audit_steps(&saved.steps(), name, flow_config.as_ref())?;

    write_flow_report(fs, &cfg.report.output_path, &result, cfg.report.format)?;
    runtime.terminal.write_line(&format!(
        "flow report written: {} steps={}",
        cfg.report.output_path.display(),
        result.steps.len()
    ))?;
    Ok(0)
}
