use crate::artifacts::Artifacts;
use crate::errors::FlowError;
use url::Url;

fn parse(long_url: &str) -> Result<Url, FlowError> {
    Url::parse(long_url).map_err(|e| FlowError::InvalidUrl(format!("{long_url}: {e}")))
}

/// Host plus path, with scheme, port, query and fragment dropped.
pub fn shorten_url(long_url: &str) -> Result<String, FlowError> {
    let url = parse(long_url)?;
    Ok(format!("{}{}", url.host_str().unwrap_or_default(), url.path()))
}

pub fn url_hostname(long_url: &str) -> Result<String, FlowError> {
    let url = parse(long_url)?;
    Ok(url.host_str().unwrap_or_default().to_string())
}

pub fn default_step_name(artifacts: &Artifacts) -> Result<String, FlowError> {
    let short_url = shorten_url(artifacts.final_url())?;
    Ok(format!(
        "{} ({short_url})",
        artifacts.gather_mode().report_label()
    ))
}

/// An empty provided name counts as absent.
pub fn resolve_step_name(provided: Option<&str>, artifacts: &Artifacts) -> Result<String, FlowError> {
    match provided.filter(|name| !name.is_empty()) {
        Some(name) => Ok(name.to_string()),
        None => default_step_name(artifacts),
    }
}

pub fn default_flow_name(first_final_url: &str) -> Result<String, FlowError> {
    Ok(format!("User flow ({})", url_hostname(first_final_url)?))
}
