//! Brain (conversational LLM) microservice client (spec §4.4, §6)
//!
//! Non-streaming mode is a plain `POST /reply`. Streaming mode opens
//! `POST /reply/stream`, an SSE response of `event: token` frames
//! (incremental text, optionally fragmented `tool_calls` chunks indexed
//! by tool-call index) terminated by `event: done` carrying the resolved
//! `{text, transfer?, hangup?}`. If the stream never opens, or opens
//! with a non-SSE content type, this client falls back to the
//! non-streaming call transparently — callers only ever see
//! [`LanguageModel::generate_stream`].

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use tokio::sync::mpsc;
use tracing::warn;

use voice_agent_core::error::Result as CoreResult;
use voice_agent_core::llm_types::{BrainReply, BrainRequest, BrainStreamEvent, EndCallRequest, TransferRequest};
use voice_agent_core::traits::LanguageModel;

use crate::retry::with_one_retry;
use crate::ClientError;

const SERVICE: &str = "brain";

#[derive(Debug, Clone)]
pub struct BrainClientConfig {
    pub base_url: String,
    pub non_streaming_timeout: Duration,
    pub streaming_first_audio_timeout: Duration,
    pub streaming_ping_timeout: Duration,
}

impl Default for BrainClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            non_streaming_timeout: Duration::from_secs(8),
            streaming_first_audio_timeout: Duration::from_secs(2),
            streaming_ping_timeout: Duration::from_secs(15),
        }
    }
}

pub struct HttpBrainClient {
    http: Client,
    config: BrainClientConfig,
}

impl HttpBrainClient {
    pub fn new(config: BrainClientConfig) -> Self {
        Self { http: Client::new(), config }
    }

    async fn post_reply_once(&self, request: &BrainRequest) -> Result<BrainReply, ClientError> {
        let response = self
            .http
            .post(format!("{}/reply", self.config.base_url))
            .timeout(self.config.non_streaming_timeout)
            .json(request)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if status.is_server_error() {
            return Err(ClientError::Transient { service: SERVICE, message: status.to_string() });
        }
        if !status.is_success() {
            return Err(ClientError::BadResponse { service: SERVICE, message: format!("status {status}") });
        }

        response.json::<BrainReply>().await.map_err(|e| ClientError::BadResponse { service: SERVICE, message: e.to_string() })
    }

    async fn open_stream(&self, request: &BrainRequest) -> Result<reqwest::Response, ClientError> {
        let response = self
            .http
            .post(format!("{}/reply/stream", self.config.base_url))
            .timeout(self.config.streaming_ping_timeout)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(request)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::BadResponse { service: SERVICE, message: format!("status {status}") });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        if !content_type.starts_with("text/event-stream") {
            return Err(ClientError::BadResponse { service: SERVICE, message: format!("non-SSE content-type {content_type}") });
        }

        Ok(response)
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
impl LanguageModel for HttpBrainClient {
    async fn generate(&self, request: BrainRequest) -> CoreResult<BrainReply> {
        let deadline = Instant::now() + self.config.non_streaming_timeout;
        with_one_retry(deadline, || self.post_reply_once(&request))
            .await
            .map_err(|e| voice_agent_core::error::Error::Validation(e.to_string()))
    }

    /// Falls back to [`Self::generate`] whenever the SSE endpoint cannot
    /// be opened at all, so callers never have to special-case the
    /// fallback themselves (spec §4.4, §7 `stream_fallback`).
    async fn generate_stream(&self, request: BrainRequest, tx: mpsc::Sender<BrainStreamEvent>) -> CoreResult<BrainReply> {
        let response = match self.open_stream(&request).await {
            Ok(response) => response,
            Err(err) => {
                warn!(error = %err, "brain SSE stream unavailable, falling back to non-streaming reply");
                let reply = self.generate(request).await?;
                let _ = tx.send(BrainStreamEvent::Token(reply.text.clone())).await;
                let _ = tx.send(BrainStreamEvent::Done(reply.clone())).await;
                return Ok(reply);
            }
        };

        match consume_sse(response, &tx).await {
            Ok(reply) => Ok(reply),
            Err(err) => {
                warn!(error = %err, "brain SSE stream broke mid-flight, falling back to non-streaming reply");
                let reply = self.generate(request).await?;
                let _ = tx.send(BrainStreamEvent::Token(reply.text.clone())).await;
                let _ = tx.send(BrainStreamEvent::Done(reply.clone())).await;
                Ok(reply)
            }
        }
    }

    fn name(&self) -> &str {
        "http-brain"
    }
}

#[derive(Default)]
struct ToolCallAccumulator {
    /// index -> (tool name, concatenated argument JSON fragments)
    calls: HashMap<usize, (Option<String>, String)>,
}

impl ToolCallAccumulator {
    fn accumulate(&mut self, chunk: ToolCallChunk) {
        let entry = self.calls.entry(chunk.index).or_insert((None, String::new()));
        if let Some(name) = chunk.name {
            entry.0 = Some(name);
        }
        if let Some(fragment) = chunk.arguments_fragment {
            entry.1.push_str(&fragment);
        }
    }

    /// Resolve into a transfer/hangup outcome if a complete, parseable
    /// `transfer_call` or `end_call` tool call was accumulated. Parsing
    /// happens here, once, at stream end — never per-chunk.
    fn resolve(&self) -> (Option<TransferRequest>, bool) {
        let mut transfer = None;
        let mut hangup = false;
        for (name, args) in self.calls.values() {
            match name.as_deref() {
                Some("transfer_call") => {
                    if let Ok(parsed) = serde_json::from_str::<TransferRequest>(args) {
                        transfer = Some(parsed);
                    }
                }
                Some("end_call") => {
                    if serde_json::from_str::<EndCallRequest>(args).is_ok() {
                        hangup = true;
                    }
                }
                _ => {}
            }
        }
        (transfer, hangup)
    }
}

#[derive(serde::Deserialize)]
struct ToolCallChunk {
    index: usize,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments_fragment: Option<String>,
}

#[derive(serde::Deserialize, Default)]
struct TokenEventPayload {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolCallChunk>,
}

/// Minimal SSE frame: one `event:` line, one or more `data:` lines, frame
/// terminated by a blank line. Good enough for the two event types this
/// service emits; not a general SSE parser.
async fn consume_sse(response: reqwest::Response, tx: &mpsc::Sender<BrainStreamEvent>) -> Result<BrainReply, ClientError> {
    let mut byte_stream = response.bytes_stream();
    let mut buffer = String::new();
    let mut accumulator = ToolCallAccumulator::default();

    loop {
        let chunk = match byte_stream.next().await {
            Some(Ok(bytes)) => bytes,
            Some(Err(e)) => return Err(ClientError::Transient { service: SERVICE, message: e.to_string() }),
            None => return Err(ClientError::BadResponse { service: SERVICE, message: "stream ended without event: done".into() }),
        };
        buffer.push_str(&String::from_utf8_lossy(&chunk));

        while let Some(frame_end) = buffer.find("\n\n") {
            let frame = buffer[..frame_end].to_string();
            buffer.drain(..frame_end + 2);

            let mut event_name = String::new();
            let mut data_lines = Vec::new();
            for line in frame.lines() {
                if let Some(rest) = line.strip_prefix("event:") {
                    event_name = rest.trim().to_string();
                } else if let Some(rest) = line.strip_prefix("data:") {
                    data_lines.push(rest.trim_start());
                }
            }
            let data = data_lines.join("\n");

            match event_name.as_str() {
                "token" => {
                    if let Ok(payload) = serde_json::from_str::<TokenEventPayload>(&data) {
                        if let Some(text) = payload.text {
                            if !text.is_empty() {
                                let _ = tx.send(BrainStreamEvent::Token(text)).await;
                            }
                        }
                        for tool_call in payload.tool_calls {
                            accumulator.accumulate(tool_call);
                        }
                    }
                }
                "done" => {
                    let mut reply: BrainReply = serde_json::from_str(&data)
                        .map_err(|e| ClientError::BadResponse { service: SERVICE, message: e.to_string() })?;
                    let (accumulated_transfer, accumulated_hangup) = accumulator.resolve();
                    if reply.transfer.is_none() {
                        reply.transfer = accumulated_transfer;
                    }
                    reply.hangup = reply.hangup || accumulated_hangup;
                    let _ = tx.send(BrainStreamEvent::Done(reply.clone())).await;
                    return Ok(reply);
                }
                _ => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_call_arguments_accumulate_across_fragments_by_index() {
        let mut acc = ToolCallAccumulator::default();
        acc.accumulate(ToolCallChunk { index: 0, name: Some("transfer_call".into()), arguments_fragment: Some(r#"{"to":"#.into()) });
        acc.accumulate(ToolCallChunk { index: 0, name: None, arguments_fragment: Some(r#""+15550001111","message_to_caller":"One moment, transferring you."}"#.into()) });

        let (transfer, hangup) = acc.resolve();
        let transfer = transfer.expect("transfer call should resolve");
        assert_eq!(transfer.to, "+15550001111");
        assert!(!hangup);
    }

    #[test]
    fn interleaved_indices_do_not_cross_contaminate() {
        let mut acc = ToolCallAccumulator::default();
        acc.accumulate(ToolCallChunk { index: 0, name: Some("end_call".into()), arguments_fragment: Some(r#"{"goodbye_mess"#.into()) });
        acc.accumulate(ToolCallChunk { index: 1, name: Some("transfer_call".into()), arguments_fragment: Some(r#"{"to":"+1555","#.into()) });
        acc.accumulate(ToolCallChunk { index: 0, name: None, arguments_fragment: Some(r#"age":"Goodbye!"}"#.into()) });
        acc.accumulate(ToolCallChunk { index: 1, name: None, arguments_fragment: Some(r#""message_to_caller":"bye"}"#.into()) });

        let (transfer, hangup) = acc.resolve();
        assert!(hangup);
        assert_eq!(transfer.unwrap().to, "+1555");
    }

    #[test]
    fn incomplete_tool_call_json_does_not_resolve() {
        let mut acc = ToolCallAccumulator::default();
        acc.accumulate(ToolCallChunk { index: 0, name: Some("end_call".into()), arguments_fragment: Some(r#"{"goodbye_message": "#.into()) });
        let (transfer, hangup) = acc.resolve();
        assert!(transfer.is_none());
        assert!(!hangup);
    }
}
