//! Webhook ingest and media-stream WebSocket upgrade (spec §4.7, §6)
//!
//! Two entry points drive a call's [`crate::session::CallCoordinator`]:
//! the carrier webhook (call lifecycle events) and the media-stream
//! WebSocket (the audio itself). Both only ever resolve a session and
//! hand it an event; neither touches session state directly.

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use tokio::sync::mpsc;
use tower_http::compression::CompressionLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use voice_agent_clients::CarrierCallControlClient;
use voice_agent_pipeline::codec::NegotiatedCodec;

use crate::session::{CallCoordinator, CallSetup, OutboundFrame, SessionEvent, WebhookEvent};
use crate::state::AppState;
use crate::{auth, ServerError};

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_handler))
        .route("/webhooks/telephony", post(webhook_handler))
        .route("/media-stream/:call_control_id", get(media_stream_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics_handle.render()
}

/// The fields this runtime needs out of a carrier webhook event. Other
/// payload fields are accepted and ignored; the event types we don't act
/// on (`call.initiated`, carrier-specific diagnostics) still need to
/// parse so they get acked instead of rejected.
#[derive(Debug, Deserialize)]
struct WebhookPayload {
    event_type: String,
    call_control_id: String,
    #[serde(default)]
    from: String,
    #[serde(default)]
    to: String,
    #[serde(default)]
    message: Option<String>,
}

async fn webhook_handler(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Result<StatusCode, StatusCode> {
    let payload: WebhookPayload = serde_json::from_slice(&body).map_err(|_| StatusCode::UNPROCESSABLE_ENTITY)?;

    let tenant = state
        .tenant_resolver
        .resolve(&payload.to)
        .await
        .map_err(|_| StatusCode::from(ServerError::NotConfigured))?;

    let timestamp = headers.get("x-webhook-timestamp").and_then(|v| v.to_str().ok());
    let signature = headers.get("x-webhook-signature").and_then(|v| v.to_str().ok());
    let now = chrono::Utc::now().timestamp();

    auth::verify_webhook_signature(&tenant.webhook_secret, timestamp, signature, &body, state.settings.telnyx.signature_skew_seconds, now)
        .map_err(|e| StatusCode::from(ServerError::WebhookAuth(e)))?;

    match payload.event_type.as_str() {
        "call.answered" => {
            let capacity = state.admission.reserve(&payload.call_control_id, &tenant).await;
            if capacity.is_err() {
                info!(call_control_id = %payload.call_control_id, tenant = %tenant.tenant_id, "call admission denied");
            }

            let preferred_codec = NegotiatedCodec::from_name(&state.settings.telnyx.preferred_codec).unwrap_or(NegotiatedCodec::PcmuNarrowband);
            let setup = CallSetup {
                call_control_id: payload.call_control_id.clone(),
                caller_id: payload.from.clone(),
                tenant,
                capacity,
                preferred_codec,
            };

            CallCoordinator::spawn(
                setup,
                state.settings.clone(),
                state.admission.clone(),
                state.brain.clone(),
                state.control_plane.clone(),
                state.sessions.clone(),
            );
        }
        "call.initiated" => {
            // Nothing to do until the carrier answers the call; acked below.
        }
        other => {
            if let Some(sender) = state.sessions.sender(&payload.call_control_id) {
                let event = webhook_event_for(other, payload.message);
                let _ = sender.send(SessionEvent::Webhook(event));
            } else {
                warn!(call_control_id = %payload.call_control_id, event_type = %other, "webhook event for unknown call");
            }
        }
    }

    Ok(StatusCode::NO_CONTENT)
}

fn webhook_event_for(event_type: &str, message: Option<String>) -> WebhookEvent {
    match event_type {
        "call.hangup" => WebhookEvent::Hangup,
        "playback.ended" => WebhookEvent::PlaybackEnded,
        "streaming.failed" => WebhookEvent::StreamingFailed { message: message.unwrap_or_default() },
        other => WebhookEvent::Other { event_type: other.to_string() },
    }
}

#[derive(Debug, Deserialize)]
struct MediaStreamQuery {
    token: Option<String>,
}

async fn media_stream_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(call_control_id): Path<String>,
    Query(query): Query<MediaStreamQuery>,
) -> Response {
    if !auth::verify_media_token(&state.settings.server.media_stream_token, query.token.as_deref()) {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let Some(session_tx) = state.sessions.sender(&call_control_id) else {
        return StatusCode::UNPROCESSABLE_ENTITY.into_response();
    };

    let carrier = state.carrier.clone();
    ws.on_upgrade(move |socket| handle_media_socket(socket, session_tx, carrier, call_control_id))
}

/// Wire messages exchanged on the media-stream WebSocket. Audio payloads
/// are base64-encoded bytes in the call's negotiated codec, matching the
/// shape of the carrier frames the codec decoder already expects.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum IncomingMediaMessage {
    Start,
    Media { payload: String },
    Stop,
}

#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum OutgoingMediaMessage {
    Media { payload: String },
    Stop,
}

async fn handle_media_socket(
    socket: WebSocket,
    session_tx: mpsc::UnboundedSender<SessionEvent>,
    carrier: Arc<CarrierCallControlClient>,
    call_control_id: String,
) {
    let (mut sink, mut stream) = socket.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<OutboundFrame>();

    if session_tx.send(SessionEvent::MediaAttached(out_tx)).is_err() {
        let _ = sink.close().await;
        return;
    }

    let writer = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            let is_stop = matches!(frame, OutboundFrame::Hangup);
            let outgoing = match frame {
                OutboundFrame::Audio(bytes) => Some(OutgoingMediaMessage::Media { payload: BASE64.encode(bytes) }),
                OutboundFrame::Bridge { to } => {
                    if let Err(e) = carrier.bridge(&call_control_id, &to).await {
                        warn!(call_control_id = %call_control_id, destination = %to, error = %e, "carrier bridge request failed");
                    }
                    None
                }
                OutboundFrame::Hangup => Some(OutgoingMediaMessage::Stop),
            };
            let Some(outgoing) = outgoing else { continue };
            let Ok(text) = serde_json::to_string(&outgoing) else { continue };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
            if is_stop {
                let _ = sink.close().await;
                break;
            }
        }
    });

    while let Some(Ok(message)) = stream.next().await {
        match message {
            Message::Text(text) => match serde_json::from_str::<IncomingMediaMessage>(&text) {
                Ok(IncomingMediaMessage::Media { payload }) => match BASE64.decode(payload) {
                    Ok(bytes) => {
                        if session_tx.send(SessionEvent::MediaFrame(bytes)).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "media frame payload was not valid base64"),
                },
                Ok(IncomingMediaMessage::Start) => {}
                Ok(IncomingMediaMessage::Stop) => break,
                Err(e) => warn!(error = %e, "unrecognized media-stream message"),
            },
            Message::Binary(bytes) => {
                if session_tx.send(SessionEvent::MediaFrame(bytes)).is_err() {
                    break;
                }
            }
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    let _ = session_tx.send(SessionEvent::MediaClosed);
    writer.abort();
}
