use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use tracing::{debug, instrument};

use vigil_core::alert::{AlertDispatcher, AlertPayload, DispatchAck};
use vigil_core::errors::DispatchError;

/// POSTs the alert payload as JSON to a fixed URL.
///
/// Any 2xx is an acknowledgement; the response body, when non-empty, becomes
/// the ack reference.
pub struct WebhookDispatcher {
    client: Client,
    url: String,
}

impl WebhookDispatcher {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, DispatchError> {
        let url = url.into();
        if url.trim().is_empty() {
            return Err(DispatchError::Unavailable("webhook URL is empty".into()));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DispatchError::Unavailable(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, url })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl AlertDispatcher for WebhookDispatcher {
    fn name(&self) -> &str {
        "webhook"
    }

    #[instrument(skip_all, fields(alert_id = %payload.id, url = %self.url))]
    async fn dispatch(&self, payload: AlertPayload) -> Result<DispatchAck, DispatchError> {
        let resp = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| DispatchError::Transport(e.to_string()))?;

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(DispatchError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        debug!(status = status.as_u16(), "webhook accepted alert");
        let reference = Some(body.trim().to_string()).filter(|b| !b.is_empty());
        Ok(DispatchAck {
            alert_id: payload.id,
            channel: self.name().to_string(),
            reference,
            delivered_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::tests::sample_payload;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn empty_url_rejected() {
        assert!(matches!(
            WebhookDispatcher::new("  ", Duration::from_secs(1)),
            Err(DispatchError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn posts_payload_as_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/alerts"))
            .and(body_partial_json(serde_json::json!({ "region": "AFRO", "level": "SEVERE" })))
            .respond_with(ResponseTemplate::new(202).set_body_string("ticket-42"))
            .expect(1)
            .mount(&server)
            .await;

        let dispatcher =
            WebhookDispatcher::new(format!("{}/alerts", server.uri()), Duration::from_secs(5)).unwrap();
        let ack = dispatcher.dispatch(sample_payload()).await.unwrap();
        assert_eq!(ack.channel, "webhook");
        assert_eq!(ack.reference.as_deref(), Some("ticket-42"));
    }

    #[tokio::test]
    async fn non_success_status_is_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let dispatcher = WebhookDispatcher::new(server.uri(), Duration::from_secs(5)).unwrap();
        let err = dispatcher.dispatch(sample_payload()).await.unwrap_err();
        assert!(matches!(err, DispatchError::Rejected { status: 503, ref body } if body == "maintenance"));
    }

    #[tokio::test]
    async fn unreachable_host_is_transport_error() {
        let dispatcher =
            WebhookDispatcher::new("http://127.0.0.1:9/alerts", Duration::from_millis(500)).unwrap();
        let err = dispatcher.dispatch(sample_payload()).await.unwrap_err();
        assert_eq!(err.error_kind(), "transport");
    }
}
