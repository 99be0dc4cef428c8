//! STT microservice client (spec §4.4, §6)
//!
//! `POST {audio bytes}` with language hint and decoding prompt as query
//! parameters. Timeout defaults to 20s; a 5xx, connection reset, or
//! timeout gets one retry with `250ms * 2^attempt` backoff before
//! surfacing. An empty transcript is a valid, non-error outcome.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, StatusCode};

use voice_agent_core::error::Result as CoreResult;
use voice_agent_core::traits::SpeechToText;
use voice_agent_core::transcript::TranscriptResult;

use crate::retry::with_one_retry;
use crate::ClientError;

const SERVICE: &str = "stt";

#[derive(Debug, Clone)]
pub struct SttClientConfig {
    pub endpoint_url: String,
    pub timeout: Duration,
}

impl Default for SttClientConfig {
    fn default() -> Self {
        Self { endpoint_url: "http://localhost:9000".to_string(), timeout: Duration::from_secs(20) }
    }
}

pub struct HttpSttClient {
    http: Client,
    config: SttClientConfig,
}

impl HttpSttClient {
    pub fn new(config: SttClientConfig) -> Self {
        Self { http: Client::new(), config }
    }

    async fn post_once(&self, pcm16: &[u8], language_hint: Option<&str>, decoding_prompt: Option<&str>) -> Result<TranscriptResult, ClientError> {
        let mut request = self.http.post(&self.config.endpoint_url).timeout(self.config.timeout).body(pcm16.to_vec());
        let mut query: Vec<(&str, &str)> = Vec::new();
        if let Some(lang) = language_hint {
            query.push(("language", lang));
        }
        if let Some(prompt) = decoding_prompt {
            query.push(("prompt", prompt));
        }
        if !query.is_empty() {
            request = request.query(&query);
        }

        let response = request.send().await.map_err(|e| classify_transport_error(e))?;
        let status = response.status();
        if status.is_server_error() {
            return Err(ClientError::Transient { service: SERVICE, message: status.to_string() });
        }
        if !status.is_success() {
            return Err(ClientError::BadResponse { service: SERVICE, message: format!("status {status}") });
        }

        #[derive(serde::Deserialize)]
        struct SttResponse {
            text: String,
            #[serde(default)]
            confidence: Option<f32>,
        }

        let body: SttResponse = response
            .json()
            .await
            .map_err(|e| ClientError::BadResponse { service: SERVICE, message: e.to_string() })?;

        Ok(TranscriptResult { text: body.text, confidence: body.confidence.unwrap_or(0.0), is_final: true, words: vec![] })
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

#[async_trait]
impl SpeechToText for HttpSttClient {
    async fn transcribe(&self, pcm16: &[u8], language_hint: Option<&str>, decoding_prompt: Option<&str>) -> CoreResult<TranscriptResult> {
        let deadline = Instant::now() + self.config.timeout;
        with_one_retry(deadline, || self.post_once(pcm16, language_hint, decoding_prompt))
            .await
            .map_err(|e| voice_agent_core::error::Error::Validation(e.to_string()))
    }

    fn name(&self) -> &str {
        "http-stt"
    }
}

/// `true` for the status codes spec §7 calls transient for STT/TTS/brain.
pub fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_are_transient() {
        assert!(is_transient_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!is_transient_status(StatusCode::BAD_REQUEST));
    }

    #[test]
    fn config_defaults_to_twenty_second_timeout() {
        assert_eq!(SttClientConfig::default().timeout, Duration::from_secs(20));
    }

    /// Spec §8 scenario 5: STT returns 503 once, then 200 with text
    /// "hello" — expect a single retry and one final transcript, no
    /// duplicate call.
    #[tokio::test]
    async fn retries_once_on_503_then_succeeds() {
        use std::sync::atomic::{AtomicU32, Ordering};
        use wiremock::matchers::method;
        use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

        struct FailOnceThenSucceed {
            calls: AtomicU32,
        }

        impl Respond for FailOnceThenSucceed {
            fn respond(&self, _request: &Request) -> ResponseTemplate {
                if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    ResponseTemplate::new(503)
                } else {
                    ResponseTemplate::new(200).set_body_json(serde_json::json!({"text": "hello"}))
                }
            }
        }

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(FailOnceThenSucceed { calls: AtomicU32::new(0) })
            .expect(2)
            .mount(&server)
            .await;

        let client = HttpSttClient::new(SttClientConfig { endpoint_url: server.uri(), timeout: Duration::from_secs(5) });
        let result = client.transcribe(&[0u8; 4], None, None).await.unwrap();

        assert_eq!(result.text, "hello");
        server.verify().await;
    }
}
