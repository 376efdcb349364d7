//! The four-stage assessment pipeline.
//!
//! `PipelineCoordinator::assess` drives one request through
//! pattern → cultural → risk → (alert | skip), strictly in order. Each
//! stage is a bounded dialogue; its last turn seeds the next stage's prompt.
//! The risk stage's score block is classified by the [`AlertDecisionPolicy`]
//! against a preview of the shared [`RiskMatrix`], and the level gates the
//! alert stage. The update is committed in one atomic batch only once the run
//! has nothing left that can fail, so a failed or cancelled request leaves
//! the matrix untouched.

use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use vigil_core::alert::{self, AlertDispatcher, AlertPayload, DispatchAck};
use vigil_core::dialogue::DialogueTranscript;
use vigil_core::events::PipelineEvent;
use vigil_core::ids::{AlertId, RequestId};
use vigil_core::pipeline::{PipelineState, Stage};
use vigil_core::reasoner::Reasoner;
use vigil_core::request::AssessmentRequest;
use vigil_core::risk::{CategoryScores, MatrixSnapshot, RiskLevel};
use vigil_core::role::{RegionCode, Role};
use vigil_settings::PipelineSettings;
use vigil_telemetry::MetricsRecorder;

use crate::dialogue::DialogueSession;
use crate::error::EngineError;
use crate::extract::{AssessmentDeltas, AssessmentExtractor, JsonBlockExtractor};
use crate::matrix::RiskMatrix;
use crate::policy::AlertDecisionPolicy;
use crate::prompts;
use crate::registry::RoleRegistry;
use crate::state::RunTracker;

#[derive(Clone, Debug)]
pub struct CoordinatorConfig {
    /// Round-trips per dialogue session.
    pub max_turns: u32,
    /// Wall-clock limit per dialogue session.
    pub session_timeout: Option<Duration>,
    pub event_buffer: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_turns: 2,
            session_timeout: Some(Duration::from_secs(120)),
            event_buffer: 256,
        }
    }
}

impl From<&PipelineSettings> for CoordinatorConfig {
    fn from(settings: &PipelineSettings) -> Self {
        Self {
            max_turns: settings.max_turns,
            session_timeout: Some(settings.session_timeout()),
            event_buffer: settings.event_buffer,
        }
    }
}

/// What happened at the alert gate.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AlertOutcome {
    /// The level was below the alert gate.
    Skipped,
    Dispatched { ack: DispatchAck },
    /// The alert was generated but not delivered. The level still stands.
    DispatchFailed {
        alert_id: AlertId,
        kind: String,
        error: String,
    },
}

impl AlertOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Skipped => "skipped",
            Self::Dispatched { .. } => "dispatched",
            Self::DispatchFailed { .. } => "dispatch_failed",
        }
    }
}

/// Result of a completed request.
#[derive(Clone, Debug, Serialize)]
pub struct AssessmentOutcome {
    pub request_id: RequestId,
    pub region: RegionCode,
    pub timeframe: String,
    pub level: RiskLevel,
    /// Weighted severity of each category this request assessed.
    pub scores: CategoryScores,
    /// The whole matrix right after this request's update was committed.
    pub snapshot: MatrixSnapshot,
    pub alert: AlertOutcome,
    /// States visited, `Received` through `Complete`.
    pub path: Vec<PipelineState>,
}

/// Removes a request from the active set when its run ends, however it ends.
struct ActiveGuard<'a> {
    active: &'a DashMap<RequestId, CancellationToken>,
    request_id: RequestId,
    metrics: Option<&'a MetricsRecorder>,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.active.remove(&self.request_id);
        if let Some(m) = self.metrics {
            m.gauge_inc("pipeline.active", &[], -1.0);
        }
    }
}

/// Stage outputs handed down the pipeline.
struct RiskResult {
    transcript: DialogueTranscript,
    level: RiskLevel,
    scores: CategoryScores,
    /// Pending matrix update, committed when the run completes.
    deltas: AssessmentDeltas,
}

pub struct PipelineCoordinator {
    registry: Arc<RoleRegistry>,
    sessions: DialogueSession,
    matrix: Arc<RiskMatrix>,
    policy: AlertDecisionPolicy,
    extractor: Arc<dyn AssessmentExtractor>,
    dispatcher: Arc<dyn AlertDispatcher>,
    config: CoordinatorConfig,
    event_tx: broadcast::Sender<PipelineEvent>,
    metrics: Option<Arc<MetricsRecorder>>,
    active: DashMap<RequestId, CancellationToken>,
}

impl PipelineCoordinator {
    pub fn new(
        registry: Arc<RoleRegistry>,
        reasoner: Arc<dyn Reasoner>,
        dispatcher: Arc<dyn AlertDispatcher>,
        policy: AlertDecisionPolicy,
        config: CoordinatorConfig,
    ) -> Result<Self, EngineError> {
        if config.max_turns == 0 {
            return Err(EngineError::Configuration(
                "max_turns must be at least 1".into(),
            ));
        }
        if config.session_timeout.is_some_and(|t| t.is_zero()) {
            return Err(EngineError::Configuration(
                "session timeout must be positive".into(),
            ));
        }
        let (event_tx, _) = broadcast::channel(config.event_buffer.max(1));

        Ok(Self {
            registry,
            sessions: DialogueSession::new(reasoner),
            matrix: Arc::new(RiskMatrix::new()),
            policy,
            extractor: Arc::new(JsonBlockExtractor),
            dispatcher,
            config,
            event_tx,
            metrics: None,
            active: DashMap::new(),
        })
    }

    /// Share a matrix with other coordinators.
    pub fn with_matrix(mut self, matrix: Arc<RiskMatrix>) -> Self {
        self.matrix = matrix;
        self
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn AssessmentExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRecorder>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.event_tx.subscribe()
    }

    pub fn matrix(&self) -> &Arc<RiskMatrix> {
        &self.matrix
    }

    pub fn registry(&self) -> &Arc<RoleRegistry> {
        &self.registry
    }

    pub fn policy(&self) -> &AlertDecisionPolicy {
        &self.policy
    }

    /// Requests currently in flight.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Cancel one in-flight request. It stops at the next stage boundary.
    pub fn abort(&self, request_id: &RequestId) -> bool {
        match self.active.get(request_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every in-flight request. Returns how many were signalled.
    pub fn abort_all(&self) -> usize {
        let mut count = 0;
        for entry in self.active.iter() {
            entry.value().cancel();
            count += 1;
        }
        count
    }

    pub async fn assess(&self, request: AssessmentRequest) -> Result<AssessmentOutcome, EngineError> {
        self.assess_with_cancel(request, CancellationToken::new()).await
    }

    /// Run one request to completion, failure or cancellation.
    ///
    /// Cancelling `cancel` (or calling [`abort`](Self::abort)) stops the run at
    /// the next stage boundary. A dialogue already in progress finishes but
    /// its result is discarded.
    #[instrument(skip_all, fields(request_id = %request.id(), region = %request.region(), timeframe = %request.timeframe()))]
    pub async fn assess_with_cancel(
        &self,
        request: AssessmentRequest,
        cancel: CancellationToken,
    ) -> Result<AssessmentOutcome, EngineError> {
        let request_id = request.id().clone();
        match self.active.entry(request_id.clone()) {
            Entry::Occupied(_) => {
                return Err(EngineError::InvalidArgument(format!(
                    "request {request_id} is already running"
                )));
            }
            Entry::Vacant(slot) => {
                slot.insert(cancel.clone());
            }
        }
        let metrics = self.metrics.as_deref();
        if let Some(m) = metrics {
            m.counter_inc("pipeline.requests.total", &[], 1);
            m.gauge_inc("pipeline.active", &[], 1.0);
        }
        let _guard = ActiveGuard {
            active: &self.active,
            request_id: request_id.clone(),
            metrics,
        };

        let mut run = RunTracker::new(request_id, self.event_tx.clone());
        match self.drive(&request, &mut run, &cancel).await {
            Ok(outcome) => {
                info!(level = outcome.level.as_str(), alert = outcome.alert.label(), "assessment complete");
                if let Some(m) = metrics {
                    m.counter_inc("pipeline.level.total", &[("level", outcome.level.as_str())], 1);
                    m.counter_inc("pipeline.alerts.total", &[("outcome", outcome.alert.label())], 1);
                }
                run.send_event(PipelineEvent::RequestCompleted {
                    request_id: outcome.request_id.clone(),
                    level: outcome.level,
                });
                Ok(outcome)
            }
            Err(e) => {
                let at = run.fail(e.error_kind());
                warn!(state = %at, kind = e.error_kind(), error = %e, "assessment failed");
                if let Some(m) = metrics {
                    m.counter_inc(
                        "pipeline.failures.total",
                        &[("stage", at.as_str()), ("kind", e.error_kind())],
                        1,
                    );
                }
                Err(e)
            }
        }
    }

    async fn drive(
        &self,
        request: &AssessmentRequest,
        run: &mut RunTracker,
        cancel: &CancellationToken,
    ) -> Result<AssessmentOutcome, EngineError> {
        let region = RegionCode::from_str(request.region())
            .map_err(|_| EngineError::UnknownRegion(request.region().to_string()))?;
        let expert = self.registry.get_expert(region)?;

        let pattern = self
            .run_stage(
                Stage::Pattern,
                run,
                cancel,
                self.registry.pattern_detector(),
                self.registry.orchestrator(),
                prompts::pattern_prompt(request, region),
            )
            .await?;
        run.advance(Stage::Pattern.completes_into());

        let cultural = self
            .run_stage(
                Stage::Cultural,
                run,
                cancel,
                self.registry.cultural_analyst(),
                &expert,
                prompts::cultural_prompt(region, stage_output(&pattern)?),
            )
            .await?;
        run.advance(Stage::Cultural.completes_into());

        let risk = self.assess_risk(run, cancel, &pattern, &cultural).await?;
        run.advance(Stage::Risk.completes_into());

        let alert = if self.policy.should_alert(risk.level) {
            self.raise_alert(request, region, &risk, run, cancel).await?
        } else {
            info!(level = risk.level.as_str(), "below alert gate, skipping alert");
            run.advance(PipelineState::Skipped);
            AlertOutcome::Skipped
        };

        let categories = self.matrix.apply_batch(&risk.deltas)?;
        run.send_event(PipelineEvent::MatrixUpdated {
            request_id: run.request_id().clone(),
            categories,
        });
        let snapshot = self.matrix.snapshot();
        run.advance(PipelineState::Complete);

        Ok(AssessmentOutcome {
            request_id: request.id().clone(),
            region,
            timeframe: request.timeframe().to_string(),
            level: risk.level,
            scores: risk.scores,
            snapshot,
            alert,
            path: run.history().to_vec(),
        })
    }

    /// Risk dialogue, then classification against the matrix as it would
    /// read with this request's scores applied. Nothing is written here.
    async fn assess_risk(
        &self,
        run: &RunTracker,
        cancel: &CancellationToken,
        pattern: &DialogueTranscript,
        cultural: &DialogueTranscript,
    ) -> Result<RiskResult, EngineError> {
        let transcript = self
            .run_stage(
                Stage::Risk,
                run,
                cancel,
                self.registry.risk_assessor(),
                self.registry.orchestrator(),
                prompts::risk_prompt(stage_output(pattern)?, stage_output(cultural)?),
            )
            .await?;

        let deltas = self.extractor.extract(&transcript)?;
        if deltas.is_empty() {
            return Err(EngineError::UnparseableAssessment(
                "assessment named no risk categories".into(),
            ));
        }
        let prospective = self.matrix.preview(&deltas)?;
        let scores: CategoryScores = deltas
            .iter()
            .map(|(category, entry)| (*category, entry.weighted_severity()))
            .collect();
        let level = self.policy.classify(&prospective, &scores);
        info!(level = level.as_str(), categories = scores.len(), "risk classified");

        Ok(RiskResult {
            transcript,
            level,
            scores,
            deltas,
        })
    }

    /// Alert dialogue and dispatch. Dispatch failure is reported in the
    /// outcome, not as an error.
    async fn raise_alert(
        &self,
        request: &AssessmentRequest,
        region: RegionCode,
        risk: &RiskResult,
        run: &mut RunTracker,
        cancel: &CancellationToken,
    ) -> Result<AlertOutcome, EngineError> {
        let risk_summary = stage_output(&risk.transcript)?.to_string();
        let transcript = self
            .run_stage(
                Stage::Alert,
                run,
                cancel,
                self.registry.alert_generator(),
                self.registry.orchestrator(),
                prompts::alert_prompt(region, risk.level, &risk_summary),
            )
            .await?;
        run.advance(Stage::Alert.completes_into());

        let message = stage_output(&transcript)?.to_string();
        let payload = AlertPayload {
            id: AlertId::new(),
            request_id: request.id().clone(),
            region,
            timeframe: request.timeframe().to_string(),
            level: risk.level,
            recommended_actions: alert::recommended_actions(&message),
            risk_summary,
            message,
            generated_at: Utc::now(),
        };
        let alert_id = payload.id.clone();

        match self.dispatcher.dispatch(payload).await {
            Ok(ack) => {
                info!(alert_id = %alert_id, channel = %ack.channel, "alert dispatched");
                run.send_event(PipelineEvent::AlertDispatched {
                    request_id: run.request_id().clone(),
                    alert_id,
                    channel: ack.channel.clone(),
                });
                Ok(AlertOutcome::Dispatched { ack })
            }
            Err(e) => {
                warn!(alert_id = %alert_id, kind = e.error_kind(), error = %e, "alert dispatch failed");
                run.send_event(PipelineEvent::AlertDispatchFailed {
                    request_id: run.request_id().clone(),
                    alert_id: alert_id.clone(),
                    error: e.to_string(),
                });
                Ok(AlertOutcome::DispatchFailed {
                    alert_id,
                    kind: e.error_kind().to_string(),
                    error: e.to_string(),
                })
            }
        }
    }

    #[instrument(skip_all, fields(stage = %stage))]
    async fn run_stage(
        &self,
        stage: Stage,
        run: &RunTracker,
        cancel: &CancellationToken,
        initiator: &Role,
        recipient: &Role,
        prompt: String,
    ) -> Result<DialogueTranscript, EngineError> {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        run.send_event(PipelineEvent::StageStarted {
            request_id: run.request_id().clone(),
            stage,
        });

        let started = Instant::now();
        let result = self
            .sessions
            .run(
                initiator,
                recipient,
                &prompt,
                self.config.max_turns,
                self.config.session_timeout,
            )
            .await;
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        if let Some(m) = &self.metrics {
            m.histogram_observe("dialogue.duration_ms", &[("stage", stage.as_str())], elapsed_ms as f64);
        }
        let transcript = result?;

        if cancel.is_cancelled() {
            info!(turns = transcript.len(), "request cancelled, discarding stage output");
            return Err(EngineError::Cancelled);
        }
        run.send_event(PipelineEvent::StageCompleted {
            request_id: run.request_id().clone(),
            stage,
            turns: transcript.len(),
            duration_ms: elapsed_ms,
        });
        Ok(transcript)
    }
}

/// A finished stage's effective output: its last turn.
fn stage_output(transcript: &DialogueTranscript) -> Result<&str, EngineError> {
    transcript
        .last_turn()
        .map(|turn| turn.content.as_str())
        .ok_or_else(|| EngineError::EmptyTranscript {
            initiator: transcript.initiator.clone(),
            recipient: transcript.recipient.clone(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use vigil_alerts::RecordingDispatcher;
    use vigil_core::role::Capability;
    use vigil_llm::mock::{MockReply, ScriptedReasoner};
    use vigil_settings::PolicySettings;

    fn coordinator(reasoner: ScriptedReasoner) -> PipelineCoordinator {
        PipelineCoordinator::new(
            Arc::new(RoleRegistry::initialize(&RegionCode::ALL).unwrap()),
            Arc::new(reasoner),
            Arc::new(RecordingDispatcher::new()),
            AlertDecisionPolicy::from_settings(&PolicySettings::default()).unwrap(),
            CoordinatorConfig::default(),
        )
        .unwrap()
    }

    fn request(region: &str) -> AssessmentRequest {
        AssessmentRequest::new(json!({"case_numbers": "stable"}), region, "2024-Q2")
    }

    #[test]
    fn zero_max_turns_rejected_at_construction() {
        let result = PipelineCoordinator::new(
            Arc::new(RoleRegistry::initialize(&[RegionCode::Afro]).unwrap()),
            Arc::new(ScriptedReasoner::new()),
            Arc::new(RecordingDispatcher::new()),
            AlertDecisionPolicy::from_settings(&PolicySettings::default()).unwrap(),
            CoordinatorConfig { max_turns: 0, ..Default::default() },
        );
        assert!(matches!(result, Err(EngineError::Configuration(_))));
    }

    #[tokio::test]
    async fn malformed_region_is_unknown() {
        let reasoner = ScriptedReasoner::new();
        let c = coordinator(reasoner);
        let err = c.assess(request("mars")).await.unwrap_err();
        assert!(matches!(err, EngineError::UnknownRegion(ref r) if r == "mars"));
        assert_eq!(c.active_count(), 0);
    }

    #[tokio::test]
    async fn prose_risk_assessment_fails_without_touching_matrix() {
        let reasoner = ScriptedReasoner::from_fn(|_, _, _| MockReply::last("Things look fine."));
        let c = coordinator(reasoner);
        let before = c.matrix().snapshot();
        let err = c.assess(request("EURO")).await.unwrap_err();
        assert_eq!(err.error_kind(), "unparseable_assessment");
        assert_eq!(c.matrix().snapshot(), before);
    }

    #[tokio::test]
    async fn invalid_score_block_is_validation_error() {
        let reasoner = ScriptedReasoner::from_fn(|role, _, _| match role.capability() {
            Capability::Orchestrator => MockReply::last(r#"{"MENTAL_HEALTH": {"severity_score": 0.5, "temporal_factor": -1}}"#),
            _ => MockReply::last("noted"),
        });
        let c = coordinator(reasoner);
        let before = c.matrix().snapshot();
        let err = c.assess(request("EURO")).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation { .. }));
        assert_eq!(c.matrix().snapshot(), before);
    }

    #[tokio::test]
    async fn abort_unknown_request_is_false() {
        let c = coordinator(ScriptedReasoner::new());
        assert!(!c.abort(&RequestId::new()));
        assert_eq!(c.abort_all(), 0);
    }

    #[test]
    fn config_from_settings() {
        let settings = PipelineSettings::default();
        let config = CoordinatorConfig::from(&settings);
        assert_eq!(config.max_turns, settings.max_turns);
        assert_eq!(config.session_timeout, Some(settings.session_timeout()));
    }
}
