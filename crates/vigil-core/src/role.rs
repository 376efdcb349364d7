use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// WHO region codes a regional expert can be specialised to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RegionCode {
    Afro,
    Amro,
    Emro,
    Euro,
    Searo,
    Wpro,
}

impl RegionCode {
    pub const ALL: [RegionCode; 6] = [
        Self::Afro,
        Self::Amro,
        Self::Emro,
        Self::Euro,
        Self::Searo,
        Self::Wpro,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Afro => "AFRO",
            Self::Amro => "AMRO",
            Self::Emro => "EMRO",
            Self::Euro => "EURO",
            Self::Searo => "SEARO",
            Self::Wpro => "WPRO",
        }
    }
}

impl fmt::Display for RegionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unrecognised region code: {0:?}")]
pub struct UnrecognisedRegion(pub String);

impl FromStr for RegionCode {
    type Err = UnrecognisedRegion;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|r| r.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| UnrecognisedRegion(s.to_string()))
    }
}

/// What a role contributes to a dialogue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Orchestrator,
    PatternDetector,
    CulturalAnalyst,
    RiskAssessor,
    AlertGenerator,
    RegionalExpert,
}

impl Capability {
    /// The five roles every registry carries regardless of region set.
    pub const FIXED: [Capability; 5] = [
        Self::Orchestrator,
        Self::PatternDetector,
        Self::CulturalAnalyst,
        Self::RiskAssessor,
        Self::AlertGenerator,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Orchestrator => "orchestrator",
            Self::PatternDetector => "pattern_detector",
            Self::CulturalAnalyst => "cultural_analyst",
            Self::RiskAssessor => "risk_assessor",
            Self::AlertGenerator => "alert_generator",
            Self::RegionalExpert => "regional_expert",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named analytical participant in dialogues.
///
/// Immutable once built. A role carries a region exactly when its capability
/// is [`Capability::RegionalExpert`]; the constructors are the only way to
/// make one, so that pairing always holds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Role {
    name: String,
    capability: Capability,
    region: Option<RegionCode>,
    instructions: String,
}

impl Role {
    /// One of the fixed, region-independent roles. Named after its capability.
    /// Experts go through [`Role::regional_expert`].
    pub fn fixed(capability: Capability, instructions: impl Into<String>) -> Self {
        debug_assert!(capability != Capability::RegionalExpert);
        Self {
            name: capability.as_str().to_string(),
            capability,
            region: None,
            instructions: instructions.into(),
        }
    }

    pub fn regional_expert(region: RegionCode, instructions: impl Into<String>) -> Self {
        Self {
            name: format!("{}_expert", region.as_str().to_ascii_lowercase()),
            capability: Capability::RegionalExpert,
            region: Some(region),
            instructions: instructions.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capability(&self) -> Capability {
        self.capability
    }

    pub fn region(&self) -> Option<RegionCode> {
        self.region
    }

    /// Free-text behaviour descriptor handed to the reasoning service.
    pub fn instructions(&self) -> &str {
        &self.instructions
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
