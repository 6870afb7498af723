//! Flow finalization: audits each step with the configuration it was gathered
//! under and assembles the combined result in recording order.

use crate::artifacts::RunnerOptions;
use crate::audit::Report;
use crate::errors::FlowError;
use crate::flow::FlowStep;
use crate::logging::append_run_log;
use crate::naming::default_flow_name;
use crate::runtime::{AuditEngine, ConfigResolver};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowStepResult {
    pub name: String,
    pub report: Report,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowResult {
    pub name: String,
    pub steps: Vec<FlowStepResult>,
}

pub struct Reconciler<'a> {
    engine: &'a dyn AuditEngine,
    resolver: &'a dyn ConfigResolver,
    parallelism: usize,
}

impl<'a> Reconciler<'a> {
    pub fn new(engine: &'a dyn AuditEngine, resolver: &'a dyn ConfigResolver) -> Self {
        Self {
            engine,
            resolver,
            parallelism: 1,
        }
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    /// Runner options for one step.
    ///
    /// Live steps reuse the config and cache from gathering as-is. Persisted
    /// steps re-resolve the step config (falling back to `flow_config`) with
    /// the step's context and recorded gather mode, and get a fresh cache.
    pub fn runner_options_for(
        &self,
        step: &FlowStep,
        flow_config: Option<&Value>,
    ) -> Result<RunnerOptions, FlowError> {
        match step {
            FlowStep::Live(live) => Ok(live.result.runner_options.clone()),
            FlowStep::Persisted(persisted) => {
                let config_json = persisted.config.as_ref().or(flow_config);
                let context = persisted
                    .config_context
                    .clone()
                    .unwrap_or_default()
                    .with_gather_mode(persisted.artifacts.gather_mode());
                let config = self.resolver.resolve(config_json, &context)?;
                Ok(RunnerOptions::new(config))
            }
        }
    }

    fn audit_step(
        &self,
        index: usize,
        step: &FlowStep,
        flow_config: Option<&Value>,
    ) -> Result<FlowStepResult, FlowError> {
        let options = self.runner_options_for(step, flow_config)?;
        let event_type = match step {
            FlowStep::Live(_) => "flow.reconcile.step.live",
            FlowStep::Persisted(_) => "flow.reconcile.step.reconstructed",
        };
        append_run_log(
            "debug",
            event_type,
            json!({
                "step_index": index,
                "step_name": step.name(),
                "gather_mode": step.gather_mode().as_str(),
                "config_fingerprint": options.config.fingerprint(),
            }),
        );

        match self.engine.audit(step.artifacts(), &options)? {
            Some(report) => Ok(FlowStepResult {
                name: step.name().to_string(),
                report,
            }),
            None => {
                append_run_log(
                    "error",
                    "flow.reconcile.failed",
                    json!({ "step_index": index, "step_name": step.name() }),
                );
                Err(FlowError::StepAuditFailed {
                    step: step.name().to_string(),
                })
            }
        }
    }

    pub fn audit_steps(
        &self,
        steps: &[FlowStep],
        name: Option<&str>,
        flow_config: Option<&Value>,
    ) -> Result<FlowResult, FlowError> {
        let Some(first) = steps.first() else {
            return Err(FlowError::EmptyFlow);
        };

        let results = if self.parallelism > 1 && steps.len() > 1 {
            self.audit_concurrently(steps, flow_config)?
        } else {
            steps
                .iter()
                .enumerate()
                .map(|(index, step)| self.audit_step(index, step, flow_config))
                .collect::<Result<Vec<_>, _>>()?
        };

        let flow_name = match name.filter(|n| !n.is_empty()) {
            Some(name) => name.to_string(),
            None => default_flow_name(first.artifacts().final_url())?,
        };
        append_run_log(
            "info",
            "flow.reconcile.completed",
            json!({
                "flow_name": flow_name,
                "step_count": results.len(),
                "parallelism": self.parallelism,
            }),
        );
        Ok(FlowResult {
            name: flow_name,
            steps: results,
        })
    }

    /// Workers claim indices in increasing order and stop claiming after the
    /// first failure, so every step before a failing one has been audited and
    /// the lowest-index failure is the one reported.
    fn audit_concurrently(
        &self,
        steps: &[FlowStep],
        flow_config: Option<&Value>,
    ) -> Result<Vec<FlowStepResult>, FlowError> {
        let workers = self.parallelism.min(steps.len());
        let next_index = AtomicUsize::new(0);
        let halted = AtomicBool::new(false);
        let (outcome_tx, mut outcome_rx) = mpsc::channel(steps.len());

        thread::scope(|scope| {
            for _ in 0..workers {
                let outcome_tx = outcome_tx.clone();
                let next_index = &next_index;
                let halted = &halted;
                scope.spawn(move || loop {
                    if halted.load(Ordering::SeqCst) {
                        break;
                    }
                    let index = next_index.fetch_add(1, Ordering::SeqCst);
                    let Some(step) = steps.get(index) else {
                        break;
                    };
                    let outcome = self.audit_step(index, step, flow_config);
                    if outcome.is_err() {
                        halted.store(true, Ordering::SeqCst);
                    }
                    if outcome_tx.blocking_send((index, outcome)).is_err() {
                        break;
                    }
                });
            }
        });
        drop(outcome_tx);

        let mut slots: Vec<Option<Result<FlowStepResult, FlowError>>> =
            (0..steps.len()).map(|_| None).collect();
        while let Some((index, outcome)) = outcome_rx.blocking_recv() {
            slots[index] = Some(outcome);
        }

        let mut results = Vec::with_capacity(steps.len());
        for (index, slot) in slots.into_iter().enumerate() {
            match slot {
                Some(outcome) => results.push(outcome?),
                None => {
                    return Err(FlowError::Audit(format!("step {index} was never audited")));
                }
            }
        }
        Ok(results)
    }
}

/// Finalizes any step sequence, live or reloaded, one step at a time.
pub fn audit_gather_steps(
    steps: &[FlowStep],
    name: Option<&str>,
    flow_config: Option<&Value>,
    engine: &dyn AuditEngine,
    resolver: &dyn ConfigResolver,
) -> Result<FlowResult, FlowError> {
    Reconciler::new(engine, resolver).audit_steps(steps, name, flow_config)
}
