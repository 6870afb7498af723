use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use userflow::errors::FlowError;
use userflow::flow::{FlowStep, UserFlow};
use userflow::flow_artifacts::FlowArtifacts;
use userflow::options::{FlowOptions, StepOptions};
use userflow::reconcile::{audit_gather_steps, Reconciler};
use userflow::report::ReportFormat;
use userflow::resolver::DefaultConfigResolver;
use userflow::runtime::{FakeAuditEngine, FakeFileSystem, FakeGatherBackend, NavigationRequestor};

fn flow_config() -> serde_json::Value {
    json!({"extends": "lighthouse:default", "settings": {"formFactor": "desktop"}})
}

fn record_three_steps(name: Option<&str>) -> (FakeGatherBackend, UserFlow) {
    let backend = FakeGatherBackend::new("about:blank");
    let mut flow = UserFlow::new(
        Arc::new(backend.clone()),
        FlowOptions {
            name: name.map(str::to_string),
            config: Some(flow_config()),
            config_context: None,
        },
    );
    flow.navigate(&NavigationRequestor::url("https://shop.example/"), None)
        .expect("navigate");
    flow.start_timespan(Some(&StepOptions::named("Search for shoes")))
        .expect("start");
    backend.set_url("https://shop.example/search?q=shoes");
    flow.end_timespan().expect("end");
    flow.snapshot(Some(&StepOptions {
        config: Some(json!({"settings": {"formFactor": "mobile"}})),
        ..StepOptions::default()
    }))
    .expect("snapshot");
    (backend, flow)
}

#[test]
fn reloaded_flow_matches_live_flow() {
    let (_backend, flow) = record_three_steps(None);
    let resolver = DefaultConfigResolver;
    let engine = FakeAuditEngine::default();
    let reconciler = Reconciler::new(&engine, &resolver);

    let live = flow.create_flow_result(&reconciler).expect("live");

    let fs = FakeFileSystem::default();
    let path = Path::new("/flows/shop.json");
    flow.create_artifacts_json().save(&fs, path).expect("save");
    let reloaded = FlowArtifacts::load(&fs, path).expect("load");
    assert!(reloaded
        .steps()
        .iter()
        .all(|step| matches!(step, FlowStep::Persisted(_))));
    let from_disk = reloaded
        .audit(&reconciler, Some(&flow_config()))
        .expect("reloaded");

    assert_eq!(from_disk.name, "User flow (shop.example)");
    assert_eq!(live, from_disk);

    let calls = engine.calls();
    assert_eq!(calls.len(), 6);
    for (live_call, disk_call) in calls[..3].iter().zip(&calls[3..]) {
        assert_eq!(live_call.config_fingerprint, disk_call.config_fingerprint);
    }
}

#[test]
fn live_steps_reuse_gather_config_and_cache() {
    let (_backend, flow) = record_three_steps(Some("Checkout"));
    let resolver = DefaultConfigResolver;
    let engine = FakeAuditEngine::default();
    let reconciler = Reconciler::new(&engine, &resolver);

    let first = flow.create_flow_result(&reconciler).expect("first");
    let second = flow.create_flow_result(&reconciler).expect("second");
    assert_eq!(first.name, "Checkout");
    assert_eq!(first, second);

    let caches = engine.caches_seen();
    for (idx, step) in flow.steps().iter().enumerate() {
        let live = step.gather_result().expect("live step");
        assert!(caches[idx].shares_storage_with(&live.runner_options.computed_cache));
        assert!(caches[idx + 3].shares_storage_with(&live.runner_options.computed_cache));
        assert!(!live.runner_options.computed_cache.is_empty());
    }
}

#[test]
fn step_config_survives_round_trip_and_flow_config_is_fallback() {
    let (_backend, flow) = record_three_steps(None);
    let exported = flow.create_artifacts_json();
    let reloaded = FlowArtifacts::from_json(&exported.to_json_pretty().expect("json"))
        .expect("parse");
    let resolver = DefaultConfigResolver;
    let engine = FakeAuditEngine::default();
    let result = reloaded
        .audit(&Reconciler::new(&engine, &resolver), Some(&flow_config()))
        .expect("audit");
    let form_factors = result
        .steps
        .iter()
        .map(|s| s.report.settings.get("formFactor").cloned())
        .collect::<Vec<_>>();
    assert_eq!(
        form_factors,
        vec![Some(json!("desktop")), Some(json!("desktop")), Some(json!("mobile"))]
    );
}

#[test]
fn explicit_flow_name_wins_over_urls() {
    let (_backend, flow) = record_three_steps(Some("Checkout"));
    let exported = flow.create_artifacts_json();
    let resolver = DefaultConfigResolver;
    let engine = FakeAuditEngine::default();
    let result = audit_gather_steps(
        &exported.steps(),
        exported.name.as_deref(),
        Some(&flow_config()),
        &engine,
        &resolver,
    )
    .expect("audit");
    assert_eq!(result.name, "Checkout");
    let names = result.steps.iter().map(|s| s.name.as_str()).collect::<Vec<_>>();
    assert_eq!(
        names,
        vec![
            "Navigation report (shop.example/)",
            "Search for shoes",
            "Snapshot report (shop.example/search)",
        ]
    );
}

#[test]
fn finalization_is_rejected_mid_timespan_and_for_empty_flows() {
    let backend = FakeGatherBackend::new("https://shop.example/");
    let mut flow = UserFlow::new(Arc::new(backend), FlowOptions::default());
    let resolver = DefaultConfigResolver;
    let engine = FakeAuditEngine::default();
    let reconciler = Reconciler::new(&engine, &resolver);

    assert_eq!(
        flow.create_flow_result(&reconciler).expect_err("empty"),
        FlowError::EmptyFlow
    );
    flow.start_timespan(None).expect("start");
    assert!(matches!(
        flow.create_flow_result(&reconciler),
        Err(FlowError::ConflictingOperation(_))
    ));
    flow.end_timespan().expect("end");
    assert_eq!(flow.create_flow_result(&reconciler).expect("ok").steps.len(), 1);
}

#[test]
fn audit_failure_names_the_step() {
    let (_backend, flow) = record_three_steps(None);
    let resolver = DefaultConfigResolver;
    let engine = FakeAuditEngine::default();
    engine.reject_final_url("https://shop.example/search?q=shoes");
    let err = flow
        .generate_report(&Reconciler::new(&engine, &resolver), ReportFormat::Markdown)
        .expect_err("must fail");
    assert_eq!(
        err,
        FlowError::StepAuditFailed {
            step: "Search for shoes".to_string()
        }
    );
}

#[test]
fn concurrent_finalization_matches_sequential() {
    let (_backend, flow) = record_three_steps(None);
    let exported = flow.create_artifacts_json();
    let resolver = DefaultConfigResolver;
    let engine = FakeAuditEngine::default();
    let sequential = exported
        .audit(&Reconciler::new(&engine, &resolver), Some(&flow_config()))
        .expect("sequential");
    let concurrent = exported
        .audit(
            &Reconciler::new(&engine, &resolver).with_parallelism(3),
            Some(&flow_config()),
        )
        .expect("concurrent");
    assert_eq!(sequential, concurrent);
}
