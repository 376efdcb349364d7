//! Opening prompts for the four pipeline stages.
//!
//! Each prompt after the first is built from the previous stage's output;
//! that text is the only information carried between stages.

use vigil_core::request::AssessmentRequest;
use vigil_core::risk::{RiskCategory, RiskLevel};
use vigil_core::role::RegionCode;

pub fn pattern_prompt(request: &AssessmentRequest, region: RegionCode) -> String {
    let data = serde_json::to_string_pretty(request.observation())
        .unwrap_or_else(|_| request.observation().to_string());
    format!(
        "Analyze health patterns for:
Data: {data}
Region: {region}
Timeframe: {timeframe}

Identify:
1. Warning indicators
2. Health trajectories
3. Risk patterns
4. Critical thresholds",
        timeframe = request.timeframe(),
    )
}

pub fn cultural_prompt(region: RegionCode, pattern_analysis: &str) -> String {
    format!(
        "Analyze the cultural context of:
Pattern analysis: {pattern_analysis}
Region: {region}

Provide:
1. Cultural interpretation
2. Regional significance
3. Local implications
4. Response considerations"
    )
}

pub fn risk_prompt(pattern_analysis: &str, cultural_context: &str) -> String {
    let categories = RiskCategory::ALL
        .iter()
        .map(|c| serde_json::to_string(c).unwrap_or_default())
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "Evaluate health risks based on:
Patterns: {pattern_analysis}
Cultural context: {cultural_context}

Generate:
1. Risk scores by WHO category
2. Overall threat level
3. Confidence metrics
4. Priority areas

Finish with a fenced ```json block mapping each affected category ({categories}) to an
object with base_risk and severity_score (0.0 to 1.0) and the multipliers cultural_factor,
regional_factor and temporal_factor (greater than 0, 1.0 when neutral)."
    )
}

pub fn alert_prompt(region: RegionCode, level: RiskLevel, risk_assessment: &str) -> String {
    format!(
        "Generate a health alert for:
Risk assessment: {risk_assessment}
Risk level: {level}
Region: {region}

Include:
1. Threat description
2. Risk level
3. Recommended actions, one per line as a bulleted list
4. Contact information",
        level = level.as_str(),
    )
}
