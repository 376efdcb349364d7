use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use vigil_alerts::RecordingDispatcher;
use vigil_core::errors::DispatchError;
use vigil_core::events::PipelineEvent;
use vigil_core::pipeline::{PipelineState, Stage};
use vigil_core::request::AssessmentRequest;
use vigil_core::risk::{RiskCategory, RiskLevel, RiskMatrixEntry};
use vigil_core::role::{Capability, RegionCode};
use vigil_engine::{
    AlertDecisionPolicy, AlertOutcome, CoordinatorConfig, EngineError, PipelineCoordinator, RiskMatrix,
    RoleRegistry,
};
use vigil_llm::mock::{MockReply, ScriptedReasoner};
use vigil_settings::PolicySettings;
use vigil_telemetry::MetricsRecorder;

const RISK_PROMPT: &str = "Evaluate health risks";
const ALERT_PROMPT: &str = "Generate a health alert";

/// Reasoner whose risk stage reports `severity` for infectious disease.
fn stub(severity: f64) -> ScriptedReasoner {
    ScriptedReasoner::from_fn(move |role, prompt, _| {
        if prompt.starts_with(RISK_PROMPT) {
            MockReply::last(&format!(
                "Overall threat assessed.\n```json\n{{\"INFECTIOUS_DISEASE\": {{\"base_risk\": {severity}, \"severity_score\": {severity}}}}}\n```"
            ))
        } else if prompt.starts_with(ALERT_PROMPT) {
            MockReply::last("Cholera outbreak warning.\n- Activate surveillance\n- Deploy rapid response teams")
        } else {
            MockReply::last(&format!("{} analysis", role.name()))
        }
    })
}

struct Harness {
    coordinator: Arc<PipelineCoordinator>,
    reasoner: Arc<ScriptedReasoner>,
    dispatcher: Arc<RecordingDispatcher>,
}

fn harness_with(reasoner: ScriptedReasoner, dispatcher: RecordingDispatcher, config: CoordinatorConfig) -> Harness {
    let reasoner = Arc::new(reasoner);
    let dispatcher = Arc::new(dispatcher);
    let coordinator = PipelineCoordinator::new(
        Arc::new(RoleRegistry::initialize(&RegionCode::ALL).unwrap()),
        reasoner.clone(),
        dispatcher.clone(),
        AlertDecisionPolicy::from_settings(&PolicySettings::default()).unwrap(),
        config,
    )
    .unwrap();
    Harness {
        coordinator: Arc::new(coordinator),
        reasoner,
        dispatcher,
    }
}

fn harness(reasoner: ScriptedReasoner) -> Harness {
    harness_with(reasoner, RecordingDispatcher::new(), CoordinatorConfig::default())
}

fn afro_request() -> AssessmentRequest {
    AssessmentRequest::new(
        json!({
            "health_metrics": {"case_numbers": "increasing", "spread_rate": "accelerating"},
            "regional_data": {"healthcare_capacity": "strained"}
        }),
        "AFRO",
        "2024-Q1",
    )
}

fn drain(rx: &mut tokio::sync::broadcast::Receiver<PipelineEvent>) -> Vec<PipelineEvent> {
    std::iter::from_fn(|| rx.try_recv().ok()).collect()
}

#[tokio::test]
async fn escalating_severity_alerts_once() {
    let h = harness(stub(0.85));
    let outcome = h.coordinator.assess(afro_request()).await.unwrap();

    assert!(outcome.level >= RiskLevel::High);
    assert_eq!(outcome.level, RiskLevel::Critical);
    assert_eq!(outcome.path.last(), Some(&PipelineState::Complete));
    assert!(outcome.path.contains(&PipelineState::Alerted));
    assert!(!outcome.path.contains(&PipelineState::Skipped));
    assert!(matches!(outcome.alert, AlertOutcome::Dispatched { .. }));

    assert_eq!(h.dispatcher.attempts(), 1);
    let delivered = h.dispatcher.delivered();
    assert_eq!(delivered[0].region, RegionCode::Afro);
    assert_eq!(delivered[0].timeframe, "2024-Q1");
    assert_eq!(delivered[0].level, RiskLevel::Critical);
    assert_eq!(
        delivered[0].recommended_actions,
        vec!["Activate surveillance", "Deploy rapid response teams"]
    );
    assert!(delivered[0].risk_summary.contains("INFECTIOUS_DISEASE"));

    let entry = outcome.snapshot[&RiskCategory::InfectiousDisease];
    assert_eq!(entry.severity_score, 0.85);
    assert_eq!(outcome.scores[&RiskCategory::InfectiousDisease], 0.85);
}

#[tokio::test]
async fn negligible_severity_skips_alert() {
    let h = harness(stub(0.05));
    let outcome = h.coordinator.assess(afro_request()).await.unwrap();

    assert!(outcome.level <= RiskLevel::Moderate);
    assert!(outcome.path.contains(&PipelineState::Skipped));
    assert!(!outcome.path.contains(&PipelineState::Alerted));
    assert!(matches!(outcome.alert, AlertOutcome::Skipped));
    assert_eq!(h.dispatcher.attempts(), 0);
    assert!(h.reasoner.calls().iter().all(|c| !c.prompt.starts_with(ALERT_PROMPT)));
}

#[tokio::test]
async fn unregistered_region_fails_before_any_dialogue() {
    let h = harness(stub(0.9));
    let request = AssessmentRequest::new(json!({}), "XXXX", "2024-Q1");
    let err = h.coordinator.assess(request).await.unwrap_err();

    assert!(matches!(err, EngineError::UnknownRegion(ref r) if r == "XXXX"));
    assert_eq!(h.reasoner.call_count(), 0);
    assert_eq!(h.dispatcher.attempts(), 0);
}

#[tokio::test]
async fn region_known_but_not_enabled_is_unknown() {
    let reasoner = Arc::new(stub(0.9));
    let coordinator = PipelineCoordinator::new(
        Arc::new(RoleRegistry::initialize(&[RegionCode::Euro]).unwrap()),
        reasoner.clone(),
        Arc::new(RecordingDispatcher::new()),
        AlertDecisionPolicy::from_settings(&PolicySettings::default()).unwrap(),
        CoordinatorConfig::default(),
    )
    .unwrap();

    let err = coordinator.assess(afro_request()).await.unwrap_err();
    assert_eq!(err.error_kind(), "unknown_region");
    assert_eq!(reasoner.call_count(), 0);
}

#[tokio::test]
async fn stages_run_in_order_and_feed_each_other() {
    let h = harness(stub(0.85));
    h.coordinator.assess(afro_request()).await.unwrap();

    let calls = h.reasoner.calls();
    let capabilities: Vec<_> = calls.iter().map(|c| c.role.as_str()).collect();
    // Each reply is final, so every stage is a single recipient turn.
    assert_eq!(capabilities, vec!["orchestrator", "afro_expert", "orchestrator", "orchestrator"]);

    assert!(calls[0].prompt.contains("Region: AFRO"));
    assert!(calls[1].prompt.contains("orchestrator analysis"));
    assert!(calls[2].prompt.contains("afro_expert analysis"));
    assert!(calls[3].prompt.starts_with(ALERT_PROMPT));
    assert!(calls[3].prompt.contains("Risk level: CRITICAL"));
}

#[tokio::test]
async fn multi_round_dialogue_respects_turn_bound() {
    let reasoner = ScriptedReasoner::from_fn(|role, prompt, convo| {
        if prompt.starts_with(RISK_PROMPT) && role.capability() == Capability::Orchestrator {
            MockReply::reply(r#"{"MENTAL_HEALTH": 0.1}"#)
        } else {
            MockReply::reply(&format!("{} turn {}", role.name(), convo.len()))
        }
    });
    let h = harness_with(
        reasoner,
        RecordingDispatcher::new(),
        CoordinatorConfig { max_turns: 3, ..Default::default() },
    );
    let mut rx = h.coordinator.subscribe();
    let outcome = h.coordinator.assess(afro_request()).await.unwrap();
    assert_eq!(outcome.level, RiskLevel::Low);

    let turns: Vec<_> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            PipelineEvent::StageCompleted { turns, .. } => Some(turns),
            _ => None,
        })
        .collect();
    assert_eq!(turns, vec![5, 5, 5]);
    // 3 stages, 5 generated turns each.
    assert_eq!(h.reasoner.call_count(), 15);
}

#[tokio::test]
async fn dispatch_failure_keeps_the_level() {
    let h = harness_with(
        stub(0.7),
        RecordingDispatcher::failing(DispatchError::Rejected {
            status: 502,
            body: "bad gateway".into(),
        }),
        CoordinatorConfig::default(),
    );
    let mut rx = h.coordinator.subscribe();
    let outcome = h.coordinator.assess(afro_request()).await.unwrap();

    assert_eq!(outcome.level, RiskLevel::Severe);
    assert_eq!(outcome.path.last(), Some(&PipelineState::Complete));
    assert!(matches!(outcome.alert, AlertOutcome::DispatchFailed { ref kind, .. } if kind == "rejected"));
    assert_eq!(h.dispatcher.attempts(), 1);

    let events = drain(&mut rx);
    assert!(events.iter().any(|e| matches!(e, PipelineEvent::AlertDispatchFailed { .. })));
    assert!(matches!(events.last(), Some(PipelineEvent::RequestCompleted { level: RiskLevel::Severe, .. })));
}

#[tokio::test]
async fn empty_cultural_stage_fails_without_matrix_update() {
    let reasoner = ScriptedReasoner::from_fn(|role, prompt, _| {
        if role.capability() == Capability::RegionalExpert {
            MockReply::reply("")
        } else if prompt.starts_with(RISK_PROMPT) {
            MockReply::last(r#"{"INFECTIOUS_DISEASE": 0.9}"#)
        } else {
            MockReply::last("analysis")
        }
    });
    let h = harness(reasoner);
    let mut rx = h.coordinator.subscribe();
    let before = h.coordinator.matrix().snapshot();

    let err = h.coordinator.assess(afro_request()).await.unwrap_err();
    assert!(matches!(err, EngineError::EmptyTranscript { ref recipient, .. } if recipient == "afro_expert"));
    assert_eq!(h.coordinator.matrix().snapshot(), before);
    assert_eq!(h.dispatcher.attempts(), 0);

    let events = drain(&mut rx);
    assert!(matches!(
        events.last(),
        Some(PipelineEvent::RequestFailed { state: PipelineState::PatternAnalyzed, kind, .. })
            if kind == "empty_transcript"
    ));
}

#[tokio::test(start_paused = true)]
async fn slow_stage_times_out() {
    let reasoner = ScriptedReasoner::new().on(
        Capability::Orchestrator,
        vec![MockReply::delayed(Duration::from_secs(30), MockReply::last("late"))],
    );
    let h = harness_with(
        reasoner,
        RecordingDispatcher::new(),
        CoordinatorConfig {
            session_timeout: Some(Duration::from_secs(5)),
            ..Default::default()
        },
    );
    let before = h.coordinator.matrix().snapshot();

    let err = h.coordinator.assess(afro_request()).await.unwrap_err();
    assert!(matches!(err, EngineError::SessionTimeout(d) if d == Duration::from_secs(5)));
    assert_eq!(h.coordinator.matrix().snapshot(), before);
    assert_eq!(h.coordinator.active_count(), 0);
}

#[tokio::test]
async fn overflowing_severity_is_rejected_not_downgraded() {
    let reasoner = ScriptedReasoner::from_fn(|role, prompt, _| {
        if prompt.starts_with(RISK_PROMPT) {
            MockReply::last(r#"{"INFECTIOUS_DISEASE": {"severity_score": 1e200, "cultural_factor": 1e200}}"#)
        } else {
            MockReply::last(&format!("{} analysis", role.name()))
        }
    });
    let h = harness(reasoner);
    let err = h.coordinator.assess(afro_request()).await.unwrap_err();

    assert!(matches!(
        err,
        EngineError::Validation { category: RiskCategory::InfectiousDisease, ref violation }
            if violation.field == "weighted_severity"
    ));
    assert_eq!(h.coordinator.matrix().snapshot(), RiskMatrix::new().snapshot());
    assert_eq!(h.dispatcher.attempts(), 0);
}

#[tokio::test(start_paused = true)]
async fn alert_stage_timeout_leaves_matrix_untouched() {
    let reasoner = ScriptedReasoner::from_fn(|role, prompt, _| {
        if prompt.starts_with(RISK_PROMPT) {
            MockReply::last(r#"{"INFECTIOUS_DISEASE": 0.9}"#)
        } else if prompt.starts_with(ALERT_PROMPT) {
            MockReply::delayed(Duration::from_secs(60), MockReply::last("too late"))
        } else {
            MockReply::last(&format!("{} analysis", role.name()))
        }
    });
    let h = harness_with(
        reasoner,
        RecordingDispatcher::new(),
        CoordinatorConfig {
            session_timeout: Some(Duration::from_secs(5)),
            ..Default::default()
        },
    );
    let mut rx = h.coordinator.subscribe();

    let err = h.coordinator.assess(afro_request()).await.unwrap_err();
    assert_eq!(err.error_kind(), "session_timeout");
    assert_eq!(h.coordinator.matrix().snapshot(), RiskMatrix::new().snapshot());
    assert_eq!(h.dispatcher.attempts(), 0);

    let events = drain(&mut rx);
    assert!(!events.iter().any(|e| matches!(e, PipelineEvent::MatrixUpdated { .. })));
    assert!(matches!(
        events.last(),
        Some(PipelineEvent::RequestFailed { state: PipelineState::RiskAssessed, .. })
    ));
}

#[tokio::test]
async fn matrix_commits_after_the_alert_stage() {
    let h = harness(stub(0.85));
    let mut rx = h.coordinator.subscribe();
    h.coordinator.assess(afro_request()).await.unwrap();

    let kinds: Vec<_> = drain(&mut rx)
        .into_iter()
        .filter(|e| matches!(e, PipelineEvent::MatrixUpdated { .. } | PipelineEvent::AlertDispatched { .. }))
        .map(|e| matches!(e, PipelineEvent::MatrixUpdated { .. }))
        .collect();
    assert_eq!(kinds, vec![false, true]);
    assert_eq!(
        h.coordinator.matrix().entry(RiskCategory::InfectiousDisease).severity_score,
        0.85
    );
}

#[tokio::test(start_paused = true)]
async fn same_request_cannot_run_twice_at_once() {
    let reasoner = ScriptedReasoner::from_fn(|role, _, _| {
        MockReply::delayed(Duration::from_secs(1), MockReply::last(&format!("{} analysis", role.name())))
    });
    let h = harness(reasoner);
    let request = afro_request();

    let (first, second) = tokio::join!(
        h.coordinator.assess(request.clone()),
        h.coordinator.assess(request.clone()),
    );
    let rejected = [&first, &second]
        .iter()
        .filter(|r| matches!(r, Err(EngineError::InvalidArgument(_))))
        .count();
    assert_eq!(rejected, 1);
    assert_eq!(h.coordinator.active_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn abort_discards_in_flight_stage() {
    let reasoner = ScriptedReasoner::from_fn(|role, _, _| {
        MockReply::delayed(Duration::from_secs(10), MockReply::last(&format!("{} analysis", role.name())))
    });
    let h = harness(reasoner);
    let mut rx = h.coordinator.subscribe();

    let request = afro_request();
    let request_id = request.id().clone();
    let coordinator = Arc::clone(&h.coordinator);
    let task = tokio::spawn(async move { coordinator.assess(request).await });

    // Wait until the pattern dialogue is under way.
    loop {
        match rx.recv().await.unwrap() {
            PipelineEvent::StageStarted { stage: Stage::Pattern, .. } => break,
            _ => continue,
        }
    }
    assert_eq!(h.coordinator.active_count(), 1);
    assert!(h.coordinator.abort(&request_id));

    let err = task.await.unwrap().unwrap_err();
    assert!(matches!(err, EngineError::Cancelled));
    // The in-flight dialogue finished; nothing after it ran.
    assert_eq!(h.reasoner.call_count(), 1);
    assert_eq!(h.coordinator.active_count(), 0);
    assert_eq!(h.coordinator.matrix().snapshot(), RiskMatrix::new().snapshot());
}

#[tokio::test]
async fn pre_cancelled_request_runs_nothing() {
    let h = harness(stub(0.9));
    let cancel = tokio_util::sync::CancellationToken::new();
    cancel.cancel();
    let err = h.coordinator.assess_with_cancel(afro_request(), cancel).await.unwrap_err();
    assert!(matches!(err, EngineError::Cancelled));
    assert_eq!(h.reasoner.call_count(), 0);
}

#[tokio::test]
async fn metrics_recorded_per_outcome() {
    let reasoner = Arc::new(stub(0.85));
    let metrics = Arc::new(MetricsRecorder::new());
    let coordinator = PipelineCoordinator::new(
        Arc::new(RoleRegistry::initialize(&RegionCode::ALL).unwrap()),
        reasoner,
        Arc::new(RecordingDispatcher::new()),
        AlertDecisionPolicy::from_settings(&PolicySettings::default()).unwrap(),
        CoordinatorConfig::default(),
    )
    .unwrap()
    .with_metrics(Arc::clone(&metrics));

    coordinator.assess(afro_request()).await.unwrap();
    let _ = coordinator
        .assess(AssessmentRequest::new(json!({}), "XXXX", "2024-Q1"))
        .await;

    assert_eq!(metrics.counter_get("pipeline.requests.total", &[]), 2);
    assert_eq!(metrics.counter_get("pipeline.level.total", &[("level", "CRITICAL")]), 1);
    assert_eq!(metrics.counter_get("pipeline.alerts.total", &[("outcome", "dispatched")]), 1);
    assert_eq!(
        metrics.counter_get(
            "pipeline.failures.total",
            &[("stage", "received"), ("kind", "unknown_region")]
        ),
        1
    );
    assert_eq!(metrics.gauge_get("pipeline.active", &[]), 0.0);
    assert_eq!(
        metrics
            .histogram_summary("dialogue.duration_ms", &[("stage", "risk")])
            .count,
        1
    );
}

fn regional_delta(index: usize) -> RiskMatrixEntry {
    let v = (index + 1) as f64;
    RiskMatrixEntry {
        base_risk: v,
        cultural_factor: v,
        regional_factor: v + 0.5,
        temporal_factor: v + 0.25,
        severity_score: v / 10.0,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_never_tear_matrix_entries() {
    let reasoner = ScriptedReasoner::from_fn(|role, prompt, _| {
        if !prompt.starts_with(RISK_PROMPT) {
            let reply = MockReply::last(&format!("{} analysis", role.name()));
            return MockReply::delayed(Duration::from_millis(1), reply);
        }
        let index = RegionCode::ALL
            .iter()
            .position(|r| prompt.contains(&format!("{}_expert", r.as_str().to_lowercase())))
            .unwrap_or(0);
        let d = regional_delta(index);
        MockReply::last(&format!(
            r#"{{"EMERGENCY_RESPONSE": {{"base_risk": {}, "cultural_factor": {}, "regional_factor": {}, "temporal_factor": {}, "severity_score": {}}}}}"#,
            d.base_risk, d.cultural_factor, d.regional_factor, d.temporal_factor, d.severity_score
        ))
    });
    let h = harness(reasoner);
    let allowed: Vec<_> = (0..RegionCode::ALL.len()).map(regional_delta).collect();

    let matrix = Arc::clone(h.coordinator.matrix());
    let observed = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let stop = tokio_util::sync::CancellationToken::new();
    let reader = {
        let observed = Arc::clone(&observed);
        let stop = stop.clone();
        tokio::spawn(async move {
            while !stop.is_cancelled() {
                observed.lock().push(matrix.entry(RiskCategory::EmergencyResponse));
                tokio::task::yield_now().await;
            }
        })
    };

    let tasks = (0..3).flat_map(|_| RegionCode::ALL).map(|region| {
        let coordinator = Arc::clone(&h.coordinator);
        tokio::spawn(async move {
            coordinator
                .assess(AssessmentRequest::new(json!({"round": "concurrent"}), region.as_str(), "2024-Q3"))
                .await
        })
    });
    for joined in futures::future::join_all(tasks).await {
        let outcome = joined.unwrap().unwrap();
        let entry = outcome.snapshot[&RiskCategory::EmergencyResponse];
        assert!(allowed.contains(&entry), "torn entry in outcome: {entry:?}");
    }
    stop.cancel();
    reader.await.unwrap();

    for entry in observed.lock().iter() {
        assert!(
            *entry == RiskMatrixEntry::default() || allowed.contains(entry),
            "torn entry observed: {entry:?}"
        );
    }
    let final_entry = h.coordinator.matrix().entry(RiskCategory::EmergencyResponse);
    assert!(allowed.contains(&final_entry));
}
