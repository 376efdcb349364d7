use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::DispatchError;
use crate::ids::{AlertId, RequestId};
use crate::risk::RiskLevel;
use crate::role::RegionCode;

/// A finalized alert, created only when the alert gate fires.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AlertPayload {
    pub id: AlertId,
    pub request_id: RequestId,
    pub region: RegionCode,
    pub timeframe: String,
    pub level: RiskLevel,
    /// Final turn of the risk assessment dialogue.
    pub risk_summary: String,
    /// Final turn of the alert generation dialogue.
    pub message: String,
    pub recommended_actions: Vec<String>,
    pub generated_at: DateTime<Utc>,
}

/// Receipt for a delivered alert.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DispatchAck {
    pub alert_id: AlertId,
    pub channel: String,
    pub reference: Option<String>,
    pub delivered_at: DateTime<Utc>,
}

/// Distributes alerts. Takes ownership of the payload.
#[async_trait]
pub trait AlertDispatcher: Send + Sync {
    fn name(&self) -> &str;

    async fn dispatch(&self, payload: AlertPayload) -> Result<DispatchAck, DispatchError>;
}

/// Pull list items out of an alert message.
///
/// Lines starting with `-`, `*`, `•` or an `N.` / `N)` marker are treated as
/// actions. When the message has none, the whole trimmed message is the
/// single action.
pub fn recommended_actions(message: &str) -> Vec<String> {
    let actions: Vec<String> = message
        .lines()
        .filter_map(|line| strip_list_marker(line.trim()))
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect();

    if actions.is_empty() && !message.trim().is_empty() {
        vec![message.trim().to_string()]
    } else {
        actions
    }
}

fn strip_list_marker(line: &str) -> Option<&str> {
    for bullet in ["- ", "* ", "• "] {
        if let Some(rest) = line.strip_prefix(bullet) {
            return Some(rest.trim());
        }
    }
    let digits = line.chars().take_while(char::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }
    let rest = &line[digits..];
    rest.strip_prefix(". ")
        .or_else(|| rest.strip_prefix(") "))
        .map(str::trim)
}
