//! Carrier call-control client (spec §4.6 transfer_call)
//!
//! Issues the carrier's "bridge this call to a destination" call-control
//! instruction. Grounded on the same `reqwest` + bounded-retry shape as
//! the STT/TTS/brain clients (`crate::retry::with_one_retry`): a transfer
//! is mandatory spec behavior, not a best-effort report, so it gets the
//! same single-retry treatment as the speech services rather than the
//! control-plane's fire-and-forget loop.

use std::time::{Duration, Instant};

use reqwest::Client;

use voice_agent_core::error::Result as CoreResult;

use crate::retry::with_one_retry;
use crate::ClientError;

const SERVICE: &str = "carrier";

#[derive(Debug, Clone)]
pub struct CarrierClientConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl Default for CarrierClientConfig {
    fn default() -> Self {
        Self { base_url: "https://api.telnyx.com/v2".to_string(), api_key: None, timeout: Duration::from_secs(10) }
    }
}

pub struct CarrierCallControlClient {
    http: Client,
    config: CarrierClientConfig,
}

impl CarrierCallControlClient {
    pub fn new(config: CarrierClientConfig) -> Self {
        Self { http: Client::new(), config }
    }

    async fn bridge_once(&self, call_control_id: &str, to: &str) -> Result<(), ClientError> {
        #[derive(serde::Serialize)]
        struct BridgeRequest<'a> {
            to: &'a str,
        }

        let url = format!("{}/calls/{call_control_id}/actions/transfer", self.config.base_url);
        let mut request = self.http.post(&url).timeout(self.config.timeout).json(&BridgeRequest { to });
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(classify_transport_error)?;
        let status = response.status();
        if status.is_server_error() {
            return Err(ClientError::Transient { service: SERVICE, message: status.to_string() });
        }
        if !status.is_success() {
            return Err(ClientError::BadResponse { service: SERVICE, message: format!("status {status}") });
        }

        Ok(())
    }

    /// Bridge `call_control_id` to `to`. Best-effort from the caller's
    /// perspective only in the sense that the spec has no retry-failure
    /// branch for a transfer beyond falling through to the existing
    /// teardown path; the request itself is retried once like the other
    /// carrier-facing clients.
    pub async fn bridge(&self, call_control_id: &str, to: &str) -> CoreResult<()> {
        let deadline = Instant::now() + self.config.timeout;
        with_one_retry(deadline, || self.bridge_once(call_control_id, to))
            .await
            .map_err(|e| voice_agent_core::error::Error::Validation(e.to_string()))
    }
}

fn classify_transport_error(err: reqwest::Error) -> ClientError {
    if err.is_timeout() {
        ClientError::Timeout { service: SERVICE, elapsed: Duration::from_secs(0) }
    } else if err.is_connect() || err.is_request() {
        ClientError::Transient { service: SERVICE, message: err.to_string() }
    } else {
        ClientError::BadResponse { service: SERVICE, message: err.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn bridge_posts_transfer_action() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/calls/abc123/actions/transfer"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": {}})))
            .expect(1)
            .mount(&server)
            .await;

        let client = CarrierCallControlClient::new(CarrierClientConfig {
            base_url: server.uri(),
            api_key: Some("test-key".to_string()),
            timeout: Duration::from_secs(5),
        });

        client.bridge("abc123", "+15551234567").await.unwrap();
        server.verify().await;
    }

    #[tokio::test]
    async fn bridge_surfaces_error_on_client_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST")).respond_with(ResponseTemplate::new(422)).mount(&server).await;

        let client = CarrierCallControlClient::new(CarrierClientConfig {
            base_url: server.uri(),
            api_key: None,
            timeout: Duration::from_secs(5),
        });

        assert!(client.bridge("abc123", "+15551234567").await.is_err());
    }
}
