//! Control-plane reporting client (spec §4.4, §6)
//!
//! Reports `call_started`, `caller_message`, and `call_ended` to the
//! control plane. Every call here is best-effort: retries are bounded
//! and a failure never blocks call progress or teardown (spec §4.6
//! teardown step 4, §7 recovery rule).

use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use tracing::warn;

use voice_agent_core::transcript::TranscriptArtifact;

const SERVICE: &str = "control-plane";
const MAX_ATTEMPTS: u32 = 2;

#[derive(Debug, Clone)]
pub struct ControlPlaneConfig {
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self { base_url: "http://localhost:7000".to_string(), timeout: Duration::from_secs(5) }
    }
}

pub struct ControlPlaneClient {
    http: Client,
    config: ControlPlaneConfig,
}

#[derive(Serialize)]
struct CallStarted<'a> {
    tenant_id: &'a str,
    call_id: &'a str,
    caller_id: &'a str,
}

#[derive(Serialize)]
struct CallerMessage<'a> {
    tenant_id: &'a str,
    call_id: &'a str,
    text: &'a str,
}

impl ControlPlaneClient {
    pub fn new(config: ControlPlaneConfig) -> Self {
        Self { http: Client::new(), config }
    }

    pub async fn report_call_started(&self, tenant_id: &str, call_id: &str, caller_id: &str) {
        self.post_best_effort("call_started", &CallStarted { tenant_id, call_id, caller_id }).await;
    }

    /// Only final transcripts are reported here (§9 open question,
    /// resolved: finals only, never partials — see DESIGN.md).
    pub async fn report_caller_message(&self, tenant_id: &str, call_id: &str, text: &str) {
        if text.is_empty() {
            return;
        }
        self.post_best_effort("caller_message", &CallerMessage { tenant_id, call_id, text }).await;
    }

    pub async fn report_call_ended(&self, artifact: &TranscriptArtifact) {
        self.post_best_effort("call_ended", artifact).await;
    }

    async fn post_best_effort<T: Serialize + ?Sized>(&self, event: &str, body: &T) {
        let url = format!("{}/events/{event}", self.config.base_url);
        for attempt in 0..MAX_ATTEMPTS {
            match self.http.post(&url).timeout(self.config.timeout).json(body).send().await {
                Ok(response) if response.status().is_success() => return,
                Ok(response) => {
                    warn!(event, status = %response.status(), attempt, "{SERVICE} rejected report");
                }
                Err(e) => {
                    warn!(event, error = %e, attempt, "{SERVICE} report failed");
                }
            }
            if attempt + 1 < MAX_ATTEMPTS {
                tokio::time::sleep(Duration::from_millis(250 * 2u64.pow(attempt))).await;
            }
        }
        warn!(event, "{SERVICE} report exhausted retries, dropping (best-effort)");
    }
}
