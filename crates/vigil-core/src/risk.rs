use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// WHO risk categories tracked by the matrix.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskCategory {
    InfectiousDisease,
    EnvironmentalHealth,
    MentalHealth,
    NonCommunicable,
    EmergencyResponse,
}

impl RiskCategory {
    pub const ALL: [RiskCategory; 5] = [
        Self::InfectiousDisease,
        Self::EnvironmentalHealth,
        Self::MentalHealth,
        Self::NonCommunicable,
        Self::EmergencyResponse,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InfectiousDisease => "infectious_disease",
            Self::EnvironmentalHealth => "environmental_health",
            Self::MentalHealth => "mental_health",
            Self::NonCommunicable => "non_communicable",
            Self::EmergencyResponse => "emergency_response",
        }
    }
}

impl fmt::Display for RiskCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unrecognised risk category: {0:?}")]
pub struct UnrecognisedCategory(pub String);

impl FromStr for RiskCategory {
    type Err = UnrecognisedCategory;

    /// Accepts `infectious_disease`, `INFECTIOUS_DISEASE`, `infectious-disease`
    /// and `Infectious Disease`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalised: String = s
            .trim()
            .chars()
            .map(|c| if c == '-' || c == ' ' { '_' } else { c.to_ascii_lowercase() })
            .collect();
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == normalised)
            .ok_or_else(|| UnrecognisedCategory(s.to_string()))
    }
}

/// Ordered classification of overall threat severity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Moderate,
    High,
    Severe,
    Critical,
}

impl RiskLevel {
    /// Every level, lowest first.
    pub const ALL: [RiskLevel; 5] = [
        Self::Low,
        Self::Moderate,
        Self::High,
        Self::Severe,
        Self::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Moderate => "MODERATE",
            Self::High => "HIGH",
            Self::Severe => "SEVERE",
            Self::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unrecognised risk level: {0:?}")]
pub struct UnrecognisedLevel(pub String);

impl FromStr for RiskLevel {
    type Err = UnrecognisedLevel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|l| l.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| UnrecognisedLevel(s.to_string()))
    }
}

/// Per-category risk state. Factors are multipliers and must stay strictly
/// positive; scores must be non-negative. Non-finite values are never valid.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RiskMatrixEntry {
    pub base_risk: f64,
    pub cultural_factor: f64,
    pub regional_factor: f64,
    pub temporal_factor: f64,
    pub severity_score: f64,
}

impl Default for RiskMatrixEntry {
    fn default() -> Self {
        Self {
            base_risk: 0.0,
            cultural_factor: 1.0,
            regional_factor: 1.0,
            temporal_factor: 1.0,
            severity_score: 0.0,
        }
    }
}

/// A field of [`RiskMatrixEntry`] that broke its invariant.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
#[error("{field} = {value} violates {rule}")]
pub struct EntryViolation {
    pub field: &'static str,
    pub value: f64,
    pub rule: &'static str,
}

impl RiskMatrixEntry {
    /// Check every field; reports the first violation in declaration order.
    pub fn validate(&self) -> Result<(), EntryViolation> {
        let scores = [("base_risk", self.base_risk), ("severity_score", self.severity_score)];
        let factors = [
            ("cultural_factor", self.cultural_factor),
            ("regional_factor", self.regional_factor),
            ("temporal_factor", self.temporal_factor),
        ];

        for (field, value) in scores {
            if !value.is_finite() || value < 0.0 {
                return Err(EntryViolation { field, value, rule: "score >= 0" });
            }
        }
        for (field, value) in factors {
            if !value.is_finite() || value <= 0.0 {
                return Err(EntryViolation { field, value, rule: "factor > 0" });
            }
        }
        let weighted = self.weighted_severity();
        if !weighted.is_finite() {
            return Err(EntryViolation {
                field: "weighted_severity",
                value: weighted,
                rule: "finite product",
            });
        }
        Ok(())
    }

    /// Severity scaled by all three context factors.
    pub fn weighted_severity(&self) -> f64 {
        self.severity_score * self.cultural_factor * self.regional_factor * self.temporal_factor
    }
}

/// Immutable copy of the whole matrix.
pub type MatrixSnapshot = BTreeMap<RiskCategory, RiskMatrixEntry>;

/// Weighted severity per category.
pub type CategoryScores = BTreeMap<RiskCategory, f64>;
