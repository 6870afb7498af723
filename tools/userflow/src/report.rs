use crate::errors::FlowError;
use crate::logging::append_run_log;
use crate::reconcile::FlowResult;
use crate::runtime::FileSystem;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    Markdown,
    Json,
}

impl ReportFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Markdown => "markdown",
            Self::Json => "json",
        }
    }
}

pub fn render_flow_report(result: &FlowResult, format: ReportFormat) -> Result<String, FlowError> {
    match format {
        ReportFormat::Markdown => Ok(render_markdown(result)),
        ReportFormat::Json => serde_json::to_string_pretty(result)
            .map_err(|e| FlowError::Serialization(e.to_string())),
    }
}

pub fn write_flow_report(
    fs: &dyn FileSystem,
    path: &Path,
    result: &FlowResult,
    format: ReportFormat,
) -> Result<String, FlowError> {
    let rendered = render_flow_report(result, format)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs.create_dir_all(parent)?;
    }
    fs.write_string(path, &rendered)?;
    append_run_log(
        "info",
        "report.written",
        json!({
            "path": path.display().to_string(),
            "format": format.as_str(),
            "step_count": result.steps.len(),
        }),
    );
    Ok(rendered)
}

pub fn render_markdown(result: &FlowResult) -> String {
    let mut out = String::new();
    out.push_str(&format!("# {}\n\n", sanitize_heading(&result.name)));
    out.push_str("| # | Step | Mode | Final URL | Audits |\n");
    out.push_str("| --- | --- | --- | --- | --- |\n");
    for (idx, step) in result.steps.iter().enumerate() {
        out.push_str(&format!(
            "| {} | {} | {} | {} | {}/{} |\n",
            idx + 1,
            sanitize_cell(&step.name),
            step.report.gather_mode.as_str(),
            sanitize_cell(&step.report.final_url),
            step.report.collected_count(),
            step.report.audits.len()
        ));
    }

    for (idx, step) in result.steps.iter().enumerate() {
        let fingerprint = step
            .report
            .config_fingerprint
            .get(..12)
            .unwrap_or(&step.report.config_fingerprint);
        out.push_str(&format!(
            "\n## {}. {}\n\nconfig `{}`\n\n",
            idx + 1,
            sanitize_heading(&step.name),
            fingerprint
        ));
        out.push_str("| Audit | Status |\n| --- | --- |\n");
        for audit in &step.report.audits {
            out.push_str(&format!(
                "| {} | {} |\n",
                sanitize_cell(&audit.id),
                audit.status.as_str()
            ));
        }
    }
    out
}

fn sanitize_cell(value: &str) -> String {
    value.replace('|', "\\|").replace('\n', " ")
}

fn sanitize_heading(value: &str) -> String {
    value.replace('\n', " ")
}
