use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::Level;
use vigil_core::risk::{RiskCategory, RiskLevel};
use vigil_core::role::RegionCode;

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct VigilSettings {
    /// Regions that get a regional expert.
    pub regions: Vec<RegionCode>,
    pub pipeline: PipelineSettings,
    pub policy: PolicySettings,
    pub reasoner: ReasonerSettings,
    pub dispatch: DispatchSettings,
    pub telemetry: TelemetrySettings,
}

impl Default for VigilSettings {
    fn default() -> Self {
        Self {
            regions: RegionCode::ALL.to_vec(),
            pipeline: PipelineSettings::default(),
            policy: PolicySettings::default(),
            reasoner: ReasonerSettings::default(),
            dispatch: DispatchSettings::default(),
            telemetry: TelemetrySettings::default(),
        }
    }
}

impl VigilSettings {
    /// Reject settings the pipeline cannot be built from.
    pub fn validate(&self) -> Result<()> {
        if self.regions.is_empty() {
            return Err(SettingsError::invalid("regions", "at least one region is required"));
        }
        let mut seen = HashSet::new();
        for region in &self.regions {
            if !seen.insert(region) {
                return Err(SettingsError::invalid("regions", format!("{region} listed twice")));
            }
        }

        self.pipeline.validate()?;
        self.policy.validate()?;
        self.dispatch.validate()?;
        self.telemetry.level()?;
        for (module, level) in &self.telemetry.module_levels {
            parse_level("telemetry.module_levels", level)
                .map_err(|_| SettingsError::invalid("telemetry.module_levels", format!("{module}: unknown level {level:?}")))?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Round-trips per dialogue session.
    pub max_turns: u32,
    /// Upper bound on one dialogue session, in seconds.
    pub session_timeout_secs: u64,
    /// Capacity of the pipeline event channel.
    pub event_buffer: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_turns: 2,
            session_timeout_secs: 120,
            event_buffer: 256,
        }
    }
}

impl PipelineSettings {
    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    fn validate(&self) -> Result<()> {
        if self.max_turns < 1 {
            return Err(SettingsError::invalid("pipeline.max_turns", "must be at least 1"));
        }
        if self.session_timeout_secs == 0 {
            return Err(SettingsError::invalid("pipeline.session_timeout_secs", "must be positive"));
        }
        if self.event_buffer == 0 {
            return Err(SettingsError::invalid("pipeline.event_buffer", "must be positive"));
        }
        Ok(())
    }
}

/// Lower bounds of each level above LOW, on the weighted-severity scale.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub moderate: f64,
    pub high: f64,
    pub severe: f64,
    pub critical: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            moderate: 0.2,
            high: 0.4,
            severe: 0.6,
            critical: 0.8,
        }
    }
}

impl Thresholds {
    pub fn as_array(&self) -> [f64; 4] {
        [self.moderate, self.high, self.severe, self.critical]
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicySettings {
    pub thresholds: Thresholds,
    /// Lowest level that triggers an alert.
    pub alert_min_level: RiskLevel,
    /// Per-category multipliers applied before thresholding. Missing = 1.0.
    pub weights: BTreeMap<RiskCategory, f64>,
    /// Classify against the whole standing matrix, not only this request's categories.
    pub include_standing_risk: bool,
}

impl Default for PolicySettings {
    fn default() -> Self {
        Self {
            thresholds: Thresholds::default(),
            alert_min_level: RiskLevel::High,
            weights: BTreeMap::new(),
            include_standing_risk: false,
        }
    }
}

impl PolicySettings {
    fn validate(&self) -> Result<()> {
        let t = self.thresholds.as_array();
        if t.iter().any(|v| !v.is_finite() || *v <= 0.0) {
            return Err(SettingsError::invalid("policy.thresholds", "must be finite and positive"));
        }
        if t.windows(2).any(|w| w[0] >= w[1]) {
            return Err(SettingsError::invalid(
                "policy.thresholds",
                "must be strictly increasing: moderate < high < severe < critical",
            ));
        }
        for (category, weight) in &self.weights {
            if !weight.is_finite() || *weight <= 0.0 {
                return Err(SettingsError::invalid(
                    "policy.weights",
                    format!("{category} weight {weight} must be positive"),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonerBackend {
    /// Any OpenAI-compatible chat-completions endpoint.
    Openai,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ReasonerSettings {
    pub backend: ReasonerBackend,
    pub base_url: String,
    pub model: String,
    pub api_key: Option<ApiKey>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    pub request_timeout_secs: u64,
    pub retry: RetrySettings,
}

impl Default for ReasonerSettings {
    fn default() -> Self {
        Self {
            backend: ReasonerBackend::Openai,
            base_url: "https://api.openai.com/v1".into(),
            model: "gpt-3.5-turbo".into(),
            api_key: None,
            temperature: None,
            max_tokens: None,
            request_timeout_secs: 60,
            retry: RetrySettings::default(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_factor: f64,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_cooldown_secs: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            jitter_factor: 0.2,
            circuit_breaker_threshold: 3,
            circuit_breaker_cooldown_secs: 60,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchKind {
    /// Emit alerts as structured log events.
    Log,
    /// POST alerts as JSON to `webhook_url`.
    Webhook,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchSettings {
    pub kind: DispatchKind,
    pub webhook_url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            kind: DispatchKind::Log,
            webhook_url: None,
            timeout_secs: 10,
        }
    }
}

impl DispatchSettings {
    fn validate(&self) -> Result<()> {
        if self.kind == DispatchKind::Webhook
            && self.webhook_url.as_deref().map_or(true, |u| u.trim().is_empty())
        {
            return Err(SettingsError::invalid("dispatch.webhook_url", "required when kind = \"webhook\""));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySettings {
    pub log_level: String,
    pub json: bool,
    pub module_levels: BTreeMap<String, String>,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            json: false,
            module_levels: BTreeMap::new(),
        }
    }
}

impl TelemetrySettings {
    pub fn level(&self) -> Result<Level> {
        parse_level("telemetry.log_level", &self.log_level)
    }

    /// Module overrides with parsed levels; unknown levels are skipped.
    pub fn parsed_module_levels(&self) -> Vec<(String, Level)> {
        self.module_levels
            .iter()
            .filter_map(|(m, l)| Level::from_str(l).ok().map(|l| (m.clone(), l)))
            .collect()
    }
}

fn parse_level(key: &'static str, raw: &str) -> Result<Level> {
    Level::from_str(raw.trim()).map_err(|_| SettingsError::invalid(key, format!("unknown level {raw:?}")))
}

/// Reasoner credential. Never printed or serialized in clear.
#[derive(Clone)]
pub struct ApiKey(SecretString);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(SecretString::from(key.into()))
    }

    pub fn secret(&self) -> &SecretString {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.expose_secret().trim().is_empty()
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey([redacted])")
    }
}

impl Serialize for ApiKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str("[redacted]")
    }
}

impl<'de> Deserialize<'de> for ApiKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        String::deserialize(deserializer).map(ApiKey::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        VigilSettings::default().validate().unwrap();
    }

    #[test]
    fn default_regions_cover_who() {
        assert_eq!(VigilSettings::default().regions.len(), 6);
    }

    #[test]
    fn empty_regions_rejected() {
        let settings = VigilSettings {
            regions: vec![],
            ..Default::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(SettingsError::Invalid { key: "regions", .. })
        ));
    }

    #[test]
    fn duplicate_regions_rejected() {
        let settings = VigilSettings {
            regions: vec![RegionCode::Afro, RegionCode::Euro, RegionCode::Afro],
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn non_increasing_thresholds_rejected() {
        let mut settings = VigilSettings::default();
        settings.policy.thresholds.severe = settings.policy.thresholds.high;
        assert!(matches!(
            settings.validate(),
            Err(SettingsError::Invalid { key: "policy.thresholds", .. })
        ));
    }

    #[test]
    fn zero_weight_rejected() {
        let mut settings = VigilSettings::default();
        settings.policy.weights.insert(RiskCategory::MentalHealth, 0.0);
        assert!(settings.validate().is_err());
    }

    #[test]
    fn zero_max_turns_rejected() {
        let mut settings = VigilSettings::default();
        settings.pipeline.max_turns = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn webhook_without_url_rejected() {
        let mut settings = VigilSettings::default();
        settings.dispatch.kind = DispatchKind::Webhook;
        assert!(settings.validate().is_err());
        settings.dispatch.webhook_url = Some("https://alerts.example.org/hook".into());
        settings.validate().unwrap();
    }

    #[test]
    fn bad_log_level_rejected() {
        let mut settings = VigilSettings::default();
        settings.telemetry.log_level = "chatty".into();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn api_key_redacted_everywhere() {
        let key = ApiKey::new("sk-live-123");
        assert_eq!(format!("{key:?}"), "ApiKey([redacted])");
        assert_eq!(serde_json::to_string(&key).unwrap(), "\"[redacted]\"");
        assert_eq!(key.secret().expose_secret(), "sk-live-123");
    }
}
