use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

use vigil_core::dialogue::DialogueTranscript;
use vigil_core::risk::{RiskCategory, RiskMatrixEntry};

use crate::error::EngineError;

/// Category-level matrix deltas derived from one assessment.
pub type AssessmentDeltas = BTreeMap<RiskCategory, RiskMatrixEntry>;

/// Derives matrix deltas from a risk-stage transcript.
///
/// Implementations must fail rather than return an empty map.
pub trait AssessmentExtractor: Send + Sync {
    fn extract(&self, transcript: &DialogueTranscript) -> Result<AssessmentDeltas, EngineError>;
}

static FENCED_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").unwrap());

/// Reads a JSON score block keyed by category name.
///
/// Turns are searched newest first; within a turn, fenced blocks win over
/// bare objects and the last candidate wins. A category maps either to an
/// object with [`RiskMatrixEntry`] fields or to a bare number, which is taken
/// as its severity score. Missing factors default to 1.0, missing scores to
/// 0.0. Keys that are not categories are ignored.
///
/// ```text
/// {"INFECTIOUS_DISEASE": {"base_risk": 0.6, "severity_score": 0.8, "temporal_factor": 1.2},
///  "MENTAL_HEALTH": 0.1}
/// ```
#[derive(Clone, Debug, Default)]
pub struct JsonBlockExtractor;

impl AssessmentExtractor for JsonBlockExtractor {
    fn extract(&self, transcript: &DialogueTranscript) -> Result<AssessmentDeltas, EngineError> {
        for turn in transcript.turns().iter().rev() {
            if let Some(block) = find_score_block(&turn.content) {
                debug!(speaker = %turn.speaker, index = turn.index, "score block found");
                return parse_block(&block);
            }
        }
        Err(EngineError::UnparseableAssessment(
            "no JSON score block in the risk assessment".into(),
        ))
    }
}

/// Last JSON object in `text` with at least one category key.
fn find_score_block(text: &str) -> Option<Map<String, Value>> {
    let fenced = FENCED_BLOCK
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .filter_map(|m| serde_json::from_str::<Value>(m.as_str()).ok())
        .filter_map(into_score_object)
        .last();
    if fenced.is_some() {
        return fenced;
    }

    // Bare objects: try each `{` from the end. Nested objects carry no
    // category keys, so the enclosing block is the first accepted.
    text.match_indices('{').rev().find_map(|(start, _)| {
        let mut stream = serde_json::Deserializer::from_str(&text[start..]).into_iter::<Value>();
        stream.next()?.ok().and_then(into_score_object)
    })
}

fn into_score_object(value: Value) -> Option<Map<String, Value>> {
    match value {
        Value::Object(map) if map.keys().any(|k| RiskCategory::from_str(k).is_ok()) => Some(map),
        _ => None,
    }
}

fn parse_block(block: &Map<String, Value>) -> Result<AssessmentDeltas, EngineError> {
    let mut deltas = AssessmentDeltas::new();
    for (key, value) in block {
        let Ok(category) = RiskCategory::from_str(key) else {
            debug!(key = %key, "ignoring non-category key");
            continue;
        };
        deltas.insert(category, parse_entry(category, value)?);
    }
    Ok(deltas)
}

fn parse_entry(category: RiskCategory, value: &Value) -> Result<RiskMatrixEntry, EngineError> {
    let invalid = |what: String| EngineError::UnparseableAssessment(format!("{category}: {what}"));

    let fields = match value {
        Value::Number(n) => {
            let severity = n.as_f64().ok_or_else(|| invalid(format!("{n} is not a float")))?;
            return Ok(RiskMatrixEntry {
                severity_score: severity,
                ..Default::default()
            });
        }
        Value::Object(fields) => fields,
        other => return Err(invalid(format!("expected number or object, got {other}"))),
    };

    let field = |name: &str, default: f64| -> Result<f64, EngineError> {
        match fields.get(name) {
            None | Some(Value::Null) => Ok(default),
            Some(v) => v
                .as_f64()
                .ok_or_else(|| invalid(format!("{name} must be a number, got {v}"))),
        }
    };

    let defaults = RiskMatrixEntry::default();
    Ok(RiskMatrixEntry {
        base_risk: field("base_risk", defaults.base_risk)?,
        cultural_factor: field("cultural_factor", defaults.cultural_factor)?,
        regional_factor: field("regional_factor", defaults.regional_factor)?,
        temporal_factor: field("temporal_factor", defaults.temporal_factor)?,
        severity_score: field("severity_score", defaults.severity_score)?,
    })
}
