use std::collections::BTreeMap;
use std::sync::Arc;

use vigil_core::role::{Capability, RegionCode, Role};

use crate::error::EngineError;

const ORCHESTRATOR: &str = "You are the Global Health Warning System orchestrator. You:
- coordinate every analysis and response activity
- manage the communication flow between the specialist roles
- keep all conclusions compliant with WHO guidelines
- hold the global view of the current risk assessment
- trigger the appropriate response chain";

const PATTERN_DETECTOR: &str = "You are the pattern detection expert. You:
- identify early warning signs
- analyze trends in health data
- detect anomalous patterns
- map how disease is spreading
- track how effective interventions have been";

const CULTURAL_ANALYST: &str = "You are the cultural analysis expert. You:
- analyze regional health behaviors
- identify cultural barriers to health measures
- suggest culturally appropriate interventions
- map community health practices
- keep every response culturally sensitive";

const RISK_ASSESSOR: &str = "You are the risk assessment expert. You:
- evaluate health threats against WHO criteria
- estimate risk probabilities across regions
- produce detailed per-category risk scores
- track how threats evolve over time
- provide early warning indicators";

const ALERT_GENERATOR: &str = "You are the alert generation expert. You:
- write clear health alerts, in several languages when needed
- tailor messages to the affected region
- manage alert priorities
- coordinate response protocols";

/// Behavior descriptor for one of the fixed roles.
pub fn fixed_instructions(capability: Capability) -> &'static str {
    match capability {
        Capability::Orchestrator => ORCHESTRATOR,
        Capability::PatternDetector => PATTERN_DETECTOR,
        Capability::CulturalAnalyst => CULTURAL_ANALYST,
        Capability::RiskAssessor => RISK_ASSESSOR,
        Capability::AlertGenerator => ALERT_GENERATOR,
        Capability::RegionalExpert => "",
    }
}

/// Behavior descriptor for a region's expert.
pub fn expert_instructions(region: RegionCode) -> String {
    format!(
        "You are the WHO {region} regional expert. You:
- specialize in the health systems of {region}
- understand the region's challenges and capabilities
- monitor local conditions
- provide regional context to every analysis",
        region = region.as_str()
    )
}

/// The fixed analytical roles plus one expert per configured region.
///
/// Immutable after [`initialize`](Self::initialize); roles are handed out as
/// `Arc`s so every lookup returns the same instance.
#[derive(Debug)]
pub struct RoleRegistry {
    orchestrator: Arc<Role>,
    pattern_detector: Arc<Role>,
    cultural_analyst: Arc<Role>,
    risk_assessor: Arc<Role>,
    alert_generator: Arc<Role>,
    experts: BTreeMap<RegionCode, Arc<Role>>,
}

impl RoleRegistry {
    /// Build the registry. Fails on an empty or duplicated region list.
    pub fn initialize(regions: &[RegionCode]) -> Result<Self, EngineError> {
        if regions.is_empty() {
            return Err(EngineError::Configuration(
                "at least one region is required".into(),
            ));
        }

        let mut experts = BTreeMap::new();
        for &region in regions {
            let expert = Arc::new(Role::regional_expert(region, expert_instructions(region)));
            if experts.insert(region, expert).is_some() {
                return Err(EngineError::Configuration(format!(
                    "region {region} listed more than once"
                )));
            }
        }

        let fixed = |capability| Arc::new(Role::fixed(capability, fixed_instructions(capability)));
        Ok(Self {
            orchestrator: fixed(Capability::Orchestrator),
            pattern_detector: fixed(Capability::PatternDetector),
            cultural_analyst: fixed(Capability::CulturalAnalyst),
            risk_assessor: fixed(Capability::RiskAssessor),
            alert_generator: fixed(Capability::AlertGenerator),
            experts,
        })
    }

    pub fn get_expert(&self, region: RegionCode) -> Result<Arc<Role>, EngineError> {
        self.experts
            .get(&region)
            .map(Arc::clone)
            .ok_or_else(|| EngineError::UnknownRegion(region.as_str().to_string()))
    }

    /// Look up one of the fixed roles.
    pub fn role(&self, capability: Capability) -> Option<Arc<Role>> {
        let role = match capability {
            Capability::Orchestrator => &self.orchestrator,
            Capability::PatternDetector => &self.pattern_detector,
            Capability::CulturalAnalyst => &self.cultural_analyst,
            Capability::RiskAssessor => &self.risk_assessor,
            Capability::AlertGenerator => &self.alert_generator,
            Capability::RegionalExpert => return None,
        };
        Some(Arc::clone(role))
    }

    pub fn orchestrator(&self) -> &Arc<Role> {
        &self.orchestrator
    }

    pub fn pattern_detector(&self) -> &Arc<Role> {
        &self.pattern_detector
    }

    pub fn cultural_analyst(&self) -> &Arc<Role> {
        &self.cultural_analyst
    }

    pub fn risk_assessor(&self) -> &Arc<Role> {
        &self.risk_assessor
    }

    pub fn alert_generator(&self) -> &Arc<Role> {
        &self.alert_generator
    }

    /// Registered regions in code order.
    pub fn regions(&self) -> impl Iterator<Item = RegionCode> + '_ {
        self.experts.keys().copied()
    }

    pub fn experts(&self) -> impl Iterator<Item = &Arc<Role>> {
        self.experts.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_fixed_roles_and_experts() {
        let registry = RoleRegistry::initialize(&RegionCode::ALL).unwrap();
        assert_eq!(registry.regions().count(), 6);
        for capability in Capability::FIXED {
            let role = registry.role(capability).unwrap();
            assert_eq!(role.capability(), capability);
            assert_eq!(role.name(), capability.as_str());
            assert!(!role.instructions().is_empty());
        }
        assert!(registry.role(Capability::RegionalExpert).is_none());
    }

    #[test]
    fn expert_named_after_region() {
        let registry = RoleRegistry::initialize(&[RegionCode::Searo]).unwrap();
        let expert = registry.get_expert(RegionCode::Searo).unwrap();
        assert_eq!(expert.name(), "searo_expert");
        assert_eq!(expert.region(), Some(RegionCode::Searo));
        assert!(expert.instructions().contains("SEARO"));
    }

    #[test]
    fn empty_regions_rejected() {
        let err = RoleRegistry::initialize(&[]).unwrap_err();
        assert_eq!(err.error_kind(), "configuration");
    }

    #[test]
    fn duplicate_regions_rejected() {
        let err = RoleRegistry::initialize(&[RegionCode::Afro, RegionCode::Euro, RegionCode::Afro]).unwrap_err();
        assert!(matches!(err, EngineError::Configuration(ref msg) if msg.contains("AFRO")));
    }

    #[test]
    fn unregistered_region_is_an_error() {
        let registry = RoleRegistry::initialize(&[RegionCode::Afro]).unwrap();
        let err = registry.get_expert(RegionCode::Wpro).unwrap_err();
        assert!(matches!(err, EngineError::UnknownRegion(ref r) if r == "WPRO"));
    }

    #[test]
    fn expert_identity_is_stable() {
        let registry = RoleRegistry::initialize(&RegionCode::ALL).unwrap();
        for region in RegionCode::ALL {
            let a = registry.get_expert(region).unwrap();
            let b = registry.get_expert(region).unwrap();
            assert!(Arc::ptr_eq(&a, &b));
        }
    }
}
