//! Flow recorder.
//!
//! A `UserFlow` records an ordered sequence of gather steps against a live
//! page. It is either `Idle` or holds exactly one open timespan; navigations
//! and snapshots are only accepted while idle. Every recording call either
//! appends exactly one step (or opens/closes the timespan slot) or leaves the
//! flow untouched and returns the error.

use crate::artifacts::{Artifacts, GatherResult};
use crate::errors::FlowError;
use crate::flow_artifacts::{FlowArtifacts, GatherStep};
use crate::logging::append_run_log;
use crate::naming::resolve_step_name;
use crate::options::{
    merge_step_options, ConfigContext, FlowOptions, GatherOptions, StepDefaults, StepOptions,
};
use crate::reconcile::{FlowResult, Reconciler};
use crate::report::{render_flow_report, ReportFormat};
use crate::runtime::{GatherBackend, NavigationRequestor, TimespanHandle};
use crate::types::{GatherMode, RecorderState};
use serde_json::{json, Value};
use std::sync::Arc;

/// A step gathered in this process; carries the exact runner options used.
#[derive(Debug, Clone)]
pub struct LiveStep {
    pub name: String,
    pub result: GatherResult,
    pub config: Option<Value>,
    pub config_context: Option<ConfigContext>,
}

#[derive(Debug, Clone)]
pub enum FlowStep {
    Live(LiveStep),
    Persisted(GatherStep),
}

impl FlowStep {
    pub fn name(&self) -> &str {
        match self {
            Self::Live(step) => &step.name,
            Self::Persisted(step) => &step.name,
        }
    }

    pub fn artifacts(&self) -> &Artifacts {
        match self {
            Self::Live(step) => &step.result.artifacts,
            Self::Persisted(step) => &step.artifacts,
        }
    }

    pub fn config(&self) -> Option<&Value> {
        match self {
            Self::Live(step) => step.config.as_ref(),
            Self::Persisted(step) => step.config.as_ref(),
        }
    }

    pub fn config_context(&self) -> Option<&ConfigContext> {
        match self {
            Self::Live(step) => step.config_context.as_ref(),
            Self::Persisted(step) => step.config_context.as_ref(),
        }
    }

    pub fn gather_mode(&self) -> GatherMode {
        self.artifacts().gather_mode()
    }

    pub fn gather_result(&self) -> Option<&GatherResult> {
        match self {
            Self::Live(step) => Some(&step.result),
            Self::Persisted(_) => None,
        }
    }

    /// Serializable form; the live handle is dropped.
    pub fn to_gather_step(&self) -> GatherStep {
        GatherStep {
            name: self.name().to_string(),
            artifacts: self.artifacts().clone(),
            config: self.config().cloned(),
            config_context: self.config_context().cloned(),
        }
    }
}

struct ActiveTimespan {
    handle: Box<dyn TimespanHandle>,
    options: GatherOptions,
}

pub struct UserFlow {
    backend: Arc<dyn GatherBackend>,
    options: FlowOptions,
    steps: Vec<FlowStep>,
    current_timespan: Option<ActiveTimespan>,
}

impl UserFlow {
    pub fn new(backend: Arc<dyn GatherBackend>, options: FlowOptions) -> Self {
        Self {
            backend,
            options,
            steps: Vec::new(),
            current_timespan: None,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.options.name.as_deref()
    }

    pub fn options(&self) -> &FlowOptions {
        &self.options
    }

    pub fn steps(&self) -> &[FlowStep] {
        &self.steps
    }

    pub fn state(&self) -> RecorderState {
        if self.current_timespan.is_some() {
            RecorderState::TimespanActive
        } else {
            RecorderState::Idle
        }
    }

    fn ensure_idle(&self, operation: &str) -> Result<(), FlowError> {
        if self.current_timespan.is_none() {
            return Ok(());
        }
        append_run_log(
            "warn",
            "flow.step.rejected",
            json!({
                "operation": operation,
                "state": self.state().as_str(),
                "step_count": self.steps.len(),
            }),
        );
        Err(FlowError::ConflictingOperation(format!(
            "cannot {operation}: timespan already in progress"
        )))
    }

    /// Effective options for the next navigation, without gathering.
    pub fn next_navigation_options(&self, step_options: Option<&StepOptions>) -> GatherOptions {
        let repeat_navigation = self
            .steps
            .iter()
            .any(|step| step.gather_mode() == GatherMode::Navigation);
        merge_step_options(
            &self.options,
            step_options,
            StepDefaults::Navigation { repeat_navigation },
        )
    }

    pub fn navigate(
        &mut self,
        requestor: &NavigationRequestor,
        step_options: Option<&StepOptions>,
    ) -> Result<&GatherResult, FlowError> {
        self.ensure_idle("navigate")?;
        let options = self.next_navigation_options(step_options);
        append_run_log(
            "info",
            "flow.navigate.started",
            json!({
                "requestor": format!("{requestor:?}"),
                "step_index": self.steps.len(),
            }),
        );
        let result = self.backend.navigate(requestor, &options)?;
        self.append_step(result, options, "flow.navigate.completed")
    }

    pub fn start_timespan(&mut self, step_options: Option<&StepOptions>) -> Result<(), FlowError> {
        self.ensure_idle("start timespan")?;
        let options = merge_step_options(&self.options, step_options, StepDefaults::None);
        let handle = self.backend.start_timespan(&options)?;
        self.current_timespan = Some(ActiveTimespan { handle, options });
        append_run_log(
            "info",
            "flow.timespan.started",
            json!({ "step_index": self.steps.len() }),
        );
        Ok(())
    }

    /// A failed end keeps the timespan open so the caller can retry or abandon it.
    pub fn end_timespan(&mut self) -> Result<&GatherResult, FlowError> {
        let Some(active) = self.current_timespan.as_mut() else {
            return Err(FlowError::NoActiveOperation);
        };
        let result = active.handle.end()?;
        // The handle is spent once end succeeds, whether or not the step is appended.
        let Some(ActiveTimespan { options, .. }) = self.current_timespan.take() else {
            return Err(FlowError::NoActiveOperation);
        };
        self.append_step(result, options, "flow.timespan.completed")
    }

    /// Discards the open timespan without recording a step.
    pub fn abandon_timespan(&mut self) -> Result<(), FlowError> {
        if self.current_timespan.take().is_none() {
            return Err(FlowError::NoActiveOperation);
        }
        append_run_log(
            "warn",
            "flow.timespan.abandoned",
            json!({ "step_count": self.steps.len() }),
        );
        Ok(())
    }

    pub fn snapshot(&mut self, step_options: Option<&StepOptions>) -> Result<&GatherResult, FlowError> {
        self.ensure_idle("snapshot")?;
        let options = merge_step_options(&self.options, step_options, StepDefaults::None);
        let result = self.backend.snapshot(&options)?;
        self.append_step(result, options, "flow.snapshot.completed")
    }

    fn append_step(
        &mut self,
        result: GatherResult,
        options: GatherOptions,
        event_type: &str,
    ) -> Result<&GatherResult, FlowError> {
        let name = resolve_step_name(options.step_name.as_deref(), &result.artifacts)?;
        append_run_log(
            "info",
            event_type,
            json!({
                "step_index": self.steps.len(),
                "step_name": name,
                "gather_mode": result.artifacts.gather_mode().as_str(),
                "final_url": result.artifacts.final_url(),
                "config_fingerprint": result.runner_options.config.fingerprint(),
            }),
        );
        self.steps.push(FlowStep::Live(LiveStep {
            name,
            result,
            config: options.config,
            config_context: options.config_context,
        }));
        self.steps
            .last()
            .and_then(FlowStep::gather_result)
            .ok_or_else(|| FlowError::Backend("appended step has no gather result".to_string()))
    }

    /// Audits every recorded step. Rejected while a timespan is open.
    pub fn create_flow_result(&self, reconciler: &Reconciler<'_>) -> Result<FlowResult, FlowError> {
        self.ensure_idle("create a flow result")?;
        reconciler.audit_steps(&self.steps, self.name(), self.options.config.as_ref())
    }

    pub fn generate_report(
        &self,
        reconciler: &Reconciler<'_>,
        format: ReportFormat,
    ) -> Result<String, FlowError> {
        let result = self.create_flow_result(reconciler)?;
        render_flow_report(&result, format)
    }

    pub fn create_artifacts_json(&self) -> FlowArtifacts {
        FlowArtifacts {
            gather_steps: self.steps.iter().map(FlowStep::to_gather_step).collect(),
            name: self.options.name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::FakeGatherBackend;

    fn flow(backend: &FakeGatherBackend) -> UserFlow {
        UserFlow::new(Arc::new(backend.clone()), FlowOptions::default())
    }

    #[test]
    fn navigation_appends_named_live_step() {
        let backend = FakeGatherBackend::new("about:blank");
        let mut flow = flow(&backend);
        let result = flow
            .navigate(&NavigationRequestor::url("https://example.com/page?x=1#frag"), None)
            .expect("navigate");
        assert_eq!(result.artifacts.gather_mode(), GatherMode::Navigation);
        assert_eq!(flow.steps().len(), 1);
        assert_eq!(flow.steps()[0].name(), "Navigation report (example.com/page)");
        assert!(flow.steps()[0].gather_result().is_some());
    }

    #[test]
    fn second_navigation_defaults_to_no_storage_reset() {
        let backend = FakeGatherBackend::new("about:blank");
        let mut flow = flow(&backend);
        flow.navigate(&NavigationRequestor::url("https://shop.example/"), None)
            .expect("first");
        flow.navigate(&NavigationRequestor::url("https://shop.example/cart"), None)
            .expect("second");

        let calls = backend.calls();
        let reset_flag = |idx: usize| {
            calls[idx]
                .options
                .config_context
                .as_ref()
                .and_then(|c| c.settings_overrides.as_ref())
                .and_then(|o| o.disable_storage_reset)
        };
        assert_eq!(reset_flag(0), None);
        assert_eq!(reset_flag(1), Some(true));

        let second = flow.steps()[1].gather_result().expect("live");
        assert_eq!(
            second.runner_options.config.setting_bool("disableStorageReset"),
            Some(true)
        );
    }

    #[test]
    fn snapshot_between_navigations_still_counts_prior_navigation() {
        let backend = FakeGatherBackend::new("https://shop.example/");
        let mut flow = flow(&backend);
        flow.snapshot(None).expect("snapshot");
        let before = flow.next_navigation_options(None);
        assert_eq!(
            before
                .config_context
                .and_then(|c| c.settings_overrides)
                .and_then(|o| o.disable_storage_reset),
            None
        );
        flow.navigate(&NavigationRequestor::url("https://shop.example/"), None)
            .expect("nav");
        let after = flow.next_navigation_options(None);
        assert_eq!(
            after
                .config_context
                .and_then(|c| c.settings_overrides)
                .and_then(|o| o.disable_storage_reset),
            Some(true)
        );
    }

    #[test]
    fn timespan_step_uses_options_captured_at_start() {
        let backend = FakeGatherBackend::new("https://shop.example/");
        let mut flow = flow(&backend);
        flow.start_timespan(Some(&StepOptions::named("Add to cart")))
            .expect("start");
        assert_eq!(flow.state(), RecorderState::TimespanActive);
        assert!(flow.steps().is_empty());
        backend.set_url("https://shop.example/cart");
        flow.end_timespan().expect("end");
        assert_eq!(flow.state(), RecorderState::Idle);
        assert_eq!(flow.steps()[0].name(), "Add to cart");
        assert_eq!(flow.steps()[0].artifacts().final_url(), "https://shop.example/cart");
    }

    #[test]
    fn backend_failure_leaves_flow_untouched() {
        let backend = FakeGatherBackend::new("about:blank");
        let mut flow = flow(&backend);
        backend.set_fail_next(FlowError::Backend("page crashed".to_string()));
        let err = flow
            .navigate(&NavigationRequestor::url("https://shop.example/"), None)
            .expect_err("must fail");
        assert_eq!(err, FlowError::Backend("page crashed".to_string()));
        assert!(flow.steps().is_empty());

        backend.set_fail_next(FlowError::Backend("no target".to_string()));
        assert!(flow.start_timespan(None).is_err());
        assert_eq!(flow.state(), RecorderState::Idle);
    }

    #[test]
    fn failed_end_keeps_timespan_open_until_abandoned() {
        let backend = FakeGatherBackend::new("https://shop.example/");
        let mut flow = flow(&backend);
        flow.start_timespan(None).expect("start");
        backend.set_fail_next_timespan_end(FlowError::Backend("trace lost".to_string()));
        assert!(flow.end_timespan().is_err());
        assert_eq!(flow.state(), RecorderState::TimespanActive);
        assert!(flow.steps().is_empty());

        flow.abandon_timespan().expect("abandon");
        assert_eq!(flow.state(), RecorderState::Idle);
        assert_eq!(flow.abandon_timespan(), Err(FlowError::NoActiveOperation));
    }

    #[test]
    fn invalid_final_url_is_not_appended() {
        let backend = FakeGatherBackend::new("not a url");
        let mut flow = flow(&backend);
        let err = flow.snapshot(None).expect_err("bad url");
        assert!(matches!(err, FlowError::InvalidUrl(_)));
        assert!(flow.steps().is_empty());

        let named = flow
            .snapshot(Some(&StepOptions::named("Named anyway")))
            .map(|r| r.artifacts.final_url().to_string())
            .expect("explicit name skips url parsing");
        assert_eq!(named, "not a url");
    }

    #[test]
    fn artifacts_json_keeps_names_and_contexts() {
        let backend = FakeGatherBackend::new("about:blank");
        let mut flow = UserFlow::new(
            Arc::new(backend.clone()),
            FlowOptions {
                name: Some("Checkout".to_string()),
                ..FlowOptions::default()
            },
        );
        flow.navigate(&NavigationRequestor::url("https://shop.example/"), None)
            .expect("nav");
        let exported = flow.create_artifacts_json();
        assert_eq!(exported.name.as_deref(), Some("Checkout"));
        assert_eq!(exported.gather_steps.len(), 1);
        let context = exported.gather_steps[0]
            .config_context
            .as_ref()
            .expect("navigation context");
        assert_eq!(context.skip_about_blank, Some(true));
    }
}
