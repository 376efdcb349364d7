use std::collections::BTreeMap;

use vigil_core::risk::{CategoryScores, MatrixSnapshot, RiskCategory, RiskLevel};
use vigil_settings::{PolicySettings, Thresholds};

use crate::error::EngineError;

/// Turns category scores into a [`RiskLevel`] and decides whether that level
/// warrants an alert.
///
/// The aggregate is the highest weighted score. Levels are assigned by
/// comparing it against the thresholds from the top down; anything below the
/// `moderate` threshold is [`RiskLevel::Low`].
#[derive(Clone, Debug)]
pub struct AlertDecisionPolicy {
    thresholds: Thresholds,
    alert_min_level: RiskLevel,
    weights: BTreeMap<RiskCategory, f64>,
    include_standing_risk: bool,
}

impl AlertDecisionPolicy {
    pub fn new(
        thresholds: Thresholds,
        alert_min_level: RiskLevel,
        weights: BTreeMap<RiskCategory, f64>,
        include_standing_risk: bool,
    ) -> Result<Self, EngineError> {
        let t = thresholds.as_array();
        if t.iter().any(|v| !v.is_finite() || *v <= 0.0) {
            return Err(EngineError::Configuration(
                "policy thresholds must be finite and positive".into(),
            ));
        }
        if t.windows(2).any(|w| w[0] >= w[1]) {
            return Err(EngineError::Configuration(
                "policy thresholds must be strictly increasing".into(),
            ));
        }
        if let Some((category, weight)) = weights.iter().find(|(_, w)| !w.is_finite() || **w <= 0.0) {
            return Err(EngineError::Configuration(format!(
                "weight {weight} for {category} must be positive"
            )));
        }

        Ok(Self {
            thresholds,
            alert_min_level,
            weights,
            include_standing_risk,
        })
    }

    pub fn from_settings(settings: &PolicySettings) -> Result<Self, EngineError> {
        Self::new(
            settings.thresholds,
            settings.alert_min_level,
            settings.weights.clone(),
            settings.include_standing_risk,
        )
    }

    pub fn weight(&self, category: RiskCategory) -> f64 {
        self.weights.get(&category).copied().unwrap_or(1.0)
    }

    /// Highest weighted score across this request's categories, and across
    /// the whole matrix when standing risk is included.
    pub fn aggregate(&self, snapshot: &MatrixSnapshot, scores: &CategoryScores) -> f64 {
        let request = scores.iter().map(|(c, s)| self.weight(*c) * s);
        let standing = snapshot
            .iter()
            .filter(|_| self.include_standing_risk)
            .map(|(c, e)| self.weight(*c) * e.weighted_severity());

        request.chain(standing).fold(0.0, f64::max)
    }

    pub fn level_for(&self, aggregate: f64) -> RiskLevel {
        let t = &self.thresholds;
        if aggregate >= t.critical {
            RiskLevel::Critical
        } else if aggregate >= t.severe {
            RiskLevel::Severe
        } else if aggregate >= t.high {
            RiskLevel::High
        } else if aggregate >= t.moderate {
            RiskLevel::Moderate
        } else {
            RiskLevel::Low
        }
    }

    pub fn classify(&self, snapshot: &MatrixSnapshot, scores: &CategoryScores) -> RiskLevel {
        self.level_for(self.aggregate(snapshot, scores))
    }

    pub fn should_alert(&self, level: RiskLevel) -> bool {
        level >= self.alert_min_level
    }

    pub fn alert_min_level(&self) -> RiskLevel {
        self.alert_min_level
    }
}
