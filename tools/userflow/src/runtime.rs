use crate::artifacts::{Artifacts, GatherResult, RunnerOptions};
use crate::audit::{ManifestAuditEngine, Report};
use crate::errors::FlowError;
use crate::options::{ConfigContext, GatherOptions};
use crate::resolver::{DefaultConfigResolver, ResolvedConfig};
use crate::types::GatherMode;
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

/// How a navigation step is triggered: by loading a URL, or by a caller
/// action such as clicking a link.
#[derive(Clone)]
pub enum NavigationRequestor {
    Url(String),
    Action(Arc<dyn Fn() -> Result<(), FlowError> + Send + Sync>),
}

impl NavigationRequestor {
    pub fn url(url: impl Into<String>) -> Self {
        Self::Url(url.into())
    }

    pub fn action<F>(action: F) -> Self
    where
        F: Fn() -> Result<(), FlowError> + Send + Sync + 'static,
    {
        Self::Action(Arc::new(action))
    }
}

impl fmt::Debug for NavigationRequestor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Url(url) => f.debug_tuple("Url").field(url).finish(),
            Self::Action(_) => f.write_str("Action(..)"),
        }
    }
}

pub trait GatherBackend: Send + Sync {
    fn navigate(
        &self,
        requestor: &NavigationRequestor,
        options: &GatherOptions,
    ) -> Result<GatherResult, FlowError>;
    fn start_timespan(&self, options: &GatherOptions) -> Result<Box<dyn TimespanHandle>, FlowError>;
    fn snapshot(&self, options: &GatherOptions) -> Result<GatherResult, FlowError>;
}

/// An open timespan. A failed `end` leaves the handle usable.
pub trait TimespanHandle: Send {
    fn end(&mut self) -> Result<GatherResult, FlowError>;
}

pub trait AuditEngine: Send + Sync {
    /// `Ok(None)` means the engine could not produce a report for these artifacts.
    fn audit(
        &self,
        artifacts: &Artifacts,
        options: &RunnerOptions,
    ) -> Result<Option<Report>, FlowError>;
}

pub trait ConfigResolver: Send + Sync {
    fn resolve(
        &self,
        config: Option<&Value>,
        context: &ConfigContext,
    ) -> Result<ResolvedConfig, FlowError>;
}

pub trait FileSystem: Send + Sync {
    fn read_to_string(&self, path: &Path) -> Result<String, FlowError>;
    fn write_string(&self, path: &Path, contents: &str) -> Result<(), FlowError>;
    fn create_dir_all(&self, path: &Path) -> Result<(), FlowError>;
    fn exists(&self, path: &Path) -> bool;
}

pub trait Terminal: Send + Sync {
    fn write_line(&self, line: &str) -> Result<(), FlowError>;
}

pub struct ProductionFileSystem;

impl FileSystem for ProductionFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String, FlowError> {
        std::fs::read_to_string(path)
            .map_err(|e| FlowError::Io(format!("{}: {e}", path.display())))
    }

    fn write_string(&self, path: &Path, contents: &str) -> Result<(), FlowError> {
        std::fs::write(path, contents)
            .map_err(|e| FlowError::Io(format!("{}: {e}", path.display())))
    }

    fn create_dir_all(&self, path: &Path) -> Result<(), FlowError> {
        std::fs::create_dir_all(path).map_err(|e| FlowError::Io(e.to_string()))
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

pub struct ProductionTerminal;

impl Terminal for ProductionTerminal {
    fn write_line(&self, line: &str) -> Result<(), FlowError> {
        use std::io::Write;
        let mut out = std::io::stdout();
        writeln!(out, "{line}").map_err(|e| FlowError::Io(e.to_string()))
    }
}

pub struct ProductionRuntime {
    pub file_system: Arc<dyn FileSystem>,
    pub terminal: Arc<dyn Terminal>,
}

impl ProductionRuntime {
    pub fn new() -> Self {
        Self {
            file_system: Arc::new(ProductionFileSystem),
            terminal: Arc::new(ProductionTerminal),
        }
    }
}

impl Default for ProductionRuntime {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, PartialEq)]
pub struct GatherCall {
    pub mode: GatherMode,
    pub options: GatherOptions,
}

/// Scripted stand-in for a browser driver. Tracks a current page URL and
/// resolves runner options through a real `ConfigResolver`, the same one the
/// reconciler uses for reconstructed steps.
#[derive(Clone)]
pub struct FakeGatherBackend {
    resolver: Arc<dyn ConfigResolver>,
    current_url: Arc<Mutex<String>>,
    fail_next: Arc<Mutex<Option<FlowError>>>,
    fail_next_end: Arc<Mutex<Option<FlowError>>>,
    calls: Arc<Mutex<Vec<GatherCall>>>,
}

impl FakeGatherBackend {
    pub fn new(start_url: impl Into<String>) -> Self {
        Self::with_resolver(start_url, Arc::new(DefaultConfigResolver))
    }

    pub fn with_resolver(start_url: impl Into<String>, resolver: Arc<dyn ConfigResolver>) -> Self {
        Self {
            resolver,
            current_url: Arc::new(Mutex::new(start_url.into())),
            fail_next: Arc::new(Mutex::new(None)),
            fail_next_end: Arc::new(Mutex::new(None)),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Simulates in-page navigation (for example a click) without a gather call.
    pub fn set_url(&self, url: impl Into<String>) {
        *lock(&self.current_url) = url.into();
    }

    pub fn current_url(&self) -> String {
        lock(&self.current_url).clone()
    }

    pub fn set_fail_next(&self, error: FlowError) {
        *lock(&self.fail_next) = Some(error);
    }

    pub fn set_fail_next_timespan_end(&self, error: FlowError) {
        *lock(&self.fail_next_end) = Some(error);
    }

    pub fn calls(&self) -> Vec<GatherCall> {
        lock(&self.calls).clone()
    }

    fn maybe_fail(slot: &Mutex<Option<FlowError>>) -> Result<(), FlowError> {
        if let Some(err) = lock(slot).take() {
            return Err(err);
        }
        Ok(())
    }

    fn collect(
        &self,
        mode: GatherMode,
        requested_url: Option<String>,
        options: &GatherOptions,
    ) -> Result<GatherResult, FlowError> {
        let final_url = self.current_url();
        let mut artifacts = Artifacts::new(mode, final_url.clone());
        if let Some(requested) = requested_url {
            artifacts = artifacts.with_requested_url(requested);
        }
        for name in artifact_names_for(mode) {
            artifacts = artifacts.with_artifact(*name, json!({"url": final_url}));
        }

        let context = options
            .config_context
            .clone()
            .unwrap_or_default()
            .with_gather_mode(mode);
        let config = self.resolver.resolve(options.config.as_ref(), &context)?;
        lock(&self.calls).push(GatherCall {
            mode,
            options: options.clone(),
        });
        Ok(GatherResult {
            artifacts,
            runner_options: RunnerOptions::new(config),
        })
    }
}

fn artifact_names_for(mode: GatherMode) -> &'static [&'static str] {
    match mode {
        GatherMode::Navigation => &["Accessibility", "DevtoolsLog", "DocumentTitle", "Trace"],
        GatherMode::Timespan => &["DevtoolsLog", "Trace"],
        GatherMode::Snapshot => &["Accessibility", "DocumentTitle"],
    }
}

impl GatherBackend for FakeGatherBackend {
    fn navigate(
        &self,
        requestor: &NavigationRequestor,
        options: &GatherOptions,
    ) -> Result<GatherResult, FlowError> {
        Self::maybe_fail(&self.fail_next)?;
        let requested = match requestor {
            NavigationRequestor::Url(url) => {
                self.set_url(url.clone());
                Some(url.clone())
            }
            NavigationRequestor::Action(action) => {
                action()?;
                None
            }
        };
        self.collect(GatherMode::Navigation, requested, options)
    }

    fn start_timespan(&self, options: &GatherOptions) -> Result<Box<dyn TimespanHandle>, FlowError> {
        Self::maybe_fail(&self.fail_next)?;
        Ok(Box::new(FakeTimespanHandle {
            backend: self.clone(),
            options: options.clone(),
        }))
    }

    fn snapshot(&self, options: &GatherOptions) -> Result<GatherResult, FlowError> {
        Self::maybe_fail(&self.fail_next)?;
        self.collect(GatherMode::Snapshot, None, options)
    }
}

pub struct FakeTimespanHandle {
    backend: FakeGatherBackend,
    options: GatherOptions,
}

impl TimespanHandle for FakeTimespanHandle {
    fn end(&mut self) -> Result<GatherResult, FlowError> {
        FakeGatherBackend::maybe_fail(&self.backend.fail_next_end)?;
        self.backend
            .collect(GatherMode::Timespan, None, &self.options)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuditCall {
    pub final_url: String,
    pub gather_mode: GatherMode,
    pub config_fingerprint: String,
}

/// Wraps `ManifestAuditEngine`, records every invocation, and can be told to
/// return no report for chosen URLs.
#[derive(Default, Clone)]
pub struct FakeAuditEngine {
    rejected_urls: Arc<Mutex<BTreeSet<String>>>,
    calls: Arc<Mutex<Vec<AuditCall>>>,
    caches_seen: Arc<Mutex<Vec<crate::artifacts::ComputedCache>>>,
}

impl FakeAuditEngine {
    pub fn reject_final_url(&self, url: impl Into<String>) {
        lock(&self.rejected_urls).insert(url.into());
    }

    pub fn calls(&self) -> Vec<AuditCall> {
        lock(&self.calls).clone()
    }

    pub fn caches_seen(&self) -> Vec<crate::artifacts::ComputedCache> {
        lock(&self.caches_seen).clone()
    }
}

impl AuditEngine for FakeAuditEngine {
    fn audit(
        &self,
        artifacts: &Artifacts,
        options: &RunnerOptions,
    ) -> Result<Option<Report>, FlowError> {
        lock(&self.calls).push(AuditCall {
            final_url: artifacts.final_url().to_string(),
            gather_mode: artifacts.gather_mode(),
            config_fingerprint: options.config.fingerprint(),
        });
        lock(&self.caches_seen).push(options.computed_cache.clone());
        if lock(&self.rejected_urls).contains(artifacts.final_url()) {
            return Ok(None);
        }
        ManifestAuditEngine.audit(artifacts, options)
    }
}

#[derive(Default, Clone)]
pub struct FakeFileSystem {
    files: Arc<Mutex<HashMap<PathBuf, String>>>,
    dirs: Arc<Mutex<Vec<PathBuf>>>,
    fail_next: Arc<Mutex<Option<FlowError>>>,
}

impl FakeFileSystem {
    pub fn with_file(path: impl Into<PathBuf>, contents: impl Into<String>) -> Self {
        let fs = Self::default();
        lock(&fs.files).insert(path.into(), contents.into());
        fs
    }

    pub fn set_fail_next(&self, error: FlowError) {
        *lock(&self.fail_next) = Some(error);
    }

    pub fn file(&self, path: &Path) -> Option<String> {
        lock(&self.files).get(path).cloned()
    }

    fn maybe_fail(&self) -> Result<(), FlowError> {
        if let Some(err) = lock(&self.fail_next).take() {
            return Err(err);
        }
        Ok(())
    }
}

impl FileSystem for FakeFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String, FlowError> {
        self.maybe_fail()?;
        lock(&self.files)
            .get(path)
            .cloned()
            .ok_or_else(|| FlowError::Io(format!("missing file {}", path.display())))
    }

    fn write_string(&self, path: &Path, contents: &str) -> Result<(), FlowError> {
        self.maybe_fail()?;
        lock(&self.files).insert(path.to_path_buf(), contents.to_string());
        Ok(())
    }

    fn create_dir_all(&self, path: &Path) -> Result<(), FlowError> {
        self.maybe_fail()?;
        lock(&self.dirs).push(path.to_path_buf());
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        lock(&self.files).contains_key(path)
    }
}

#[derive(Default, Clone)]
pub struct FakeTerminal {
    writes: Arc<Mutex<Vec<String>>>,
}

impl FakeTerminal {
    pub fn written_lines(&self) -> Vec<String> {
        lock(&self.writes).clone()
    }
}

impl Terminal for FakeTerminal {
    fn write_line(&self, line: &str) -> Result<(), FlowError> {
        lock(&self.writes).push(line.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_backend_navigation_tracks_url_and_resolves_config() {
        let backend = FakeGatherBackend::new("about:blank");
        let result = backend
            .navigate(
                &NavigationRequestor::url("https://shop.example/"),
                &GatherOptions::default(),
            )
            .expect("navigate");
        assert_eq!(result.artifacts.final_url(), "https://shop.example/");
        assert_eq!(
            result.artifacts.url.requested_url.as_deref(),
            Some("https://shop.example/")
        );
        assert_eq!(result.runner_options.config.gather_mode, GatherMode::Navigation);
        assert_eq!(backend.calls().len(), 1);
    }

    #[test]
    fn action_requestor_runs_caller_navigation() {
        let backend = FakeGatherBackend::new("https://shop.example/");
        let page = backend.clone();
        let requestor = NavigationRequestor::action(move || {
            page.set_url("https://shop.example/cart");
            Ok(())
        });
        let result = backend
            .navigate(&requestor, &GatherOptions::default())
            .expect("navigate");
        assert_eq!(result.artifacts.final_url(), "https://shop.example/cart");
        assert_eq!(result.artifacts.url.requested_url, None);
    }

    #[test]
    fn failed_timespan_end_keeps_handle_usable() {
        let backend = FakeGatherBackend::new("https://shop.example/");
        let mut handle = backend
            .start_timespan(&GatherOptions::default())
            .expect("start");
        backend.set_fail_next_timespan_end(FlowError::Backend("trace lost".to_string()));
        assert!(handle.end().is_err());
        let result = handle.end().expect("retry");
        assert_eq!(result.artifacts.gather_mode(), GatherMode::Timespan);
    }

    #[test]
    fn fake_file_system_round_trips_and_fails_on_demand() {
        let fs = FakeFileSystem::default();
        let path = Path::new("/flow.json");
        fs.write_string(path, "{}").expect("write");
        assert_eq!(fs.read_to_string(path).expect("read"), "{}");
        fs.set_fail_next(FlowError::Io("disk full".to_string()));
        assert!(fs.read_to_string(path).is_err());
        assert!(fs.exists(path));
    }
}
