//! Call session coordinator (spec §4.6)
//!
//! One [`CallCoordinator`] task owns a call's state exclusively from the
//! `call.answered` webhook through teardown. All session-mutating work
//! happens on that task; the webhook and media-stream handlers in
//! [`crate::http`] never touch session state directly, they only hand
//! events to it through a single ordered queue per call (spec §5), so
//! webhook events, media frames, STT completions, brain-stream chunks and
//! playback callbacks are always processed in arrival order.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use voice_agent_capacity::{AdmissionController, CallHandle};
use voice_agent_clients::{ControlPlaneClient, HttpBrainClient, HttpSttClient, HttpTtsClient};
use voice_agent_config::Settings;
use voice_agent_core::llm_types::{BrainReply, BrainRequest, BrainStreamEvent};
use voice_agent_core::tenant::{TenantConfig, TtsBackendKind};
use voice_agent_core::traits::{ControlFrame, Frame, LanguageModel, ProcessorContext, TextToSpeech, TtsRequest};
use voice_agent_core::transcript::{TranscriptArtifact, Turn, TurnRole};
use voice_agent_core::{AudioFrame, Channels, DenialReason, SampleRate};
use voice_agent_pipeline::codec::{FrameDecoder, NegotiatedCodec};
use voice_agent_pipeline::{
    shape_for_profile, Endpointer, EndpointerEvent, FillerCache, InterruptHandler, InterruptHandlerConfig,
    PlaybackProfile, ProcessorChain, SentenceDetector, SentenceDetectorConfig,
};

const FILLER_PHRASE: &str = "One moment.";
const DEFAULT_GREETING: &str = "Thanks for calling. How can I help you today?";
const PSTN_SAMPLE_RATE_HZ: u32 = 8_000;

/// Registers a call's event sender under its carrier `call_control_id` so
/// the webhook and media-stream handlers can route to the right
/// coordinator task. Backed by a plain lock rather than a concurrent map:
/// the workspace carries no `dashmap` dependency, and contention here is
/// bounded by webhook/media-attach traffic, not the hot audio path.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, mpsc::UnboundedSender<SessionEvent>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, call_control_id: String, sender: mpsc::UnboundedSender<SessionEvent>) {
        self.sessions.write().insert(call_control_id, sender);
    }

    pub fn sender(&self, call_control_id: &str) -> Option<mpsc::UnboundedSender<SessionEvent>> {
        self.sessions.read().get(call_control_id).cloned()
    }

    pub fn remove(&self, call_control_id: &str) {
        self.sessions.write().remove(call_control_id);
    }
}

/// A carrier webhook event, already parsed down to the fields the
/// coordinator cares about (spec §6).
#[derive(Debug, Clone)]
pub enum WebhookEvent {
    CallAnswered,
    Hangup,
    PlaybackEnded,
    StreamingFailed { message: String },
    Other { event_type: String },
}

/// Events delivered to a call's coordinator task, always in arrival
/// order (spec §5). Brain-stream progress arrives as `BrainToken`/
/// `BrainDone` through this same queue rather than being awaited inline,
/// so a turn in flight never blocks delivery of a barge-in or hangup.
pub enum SessionEvent {
    Webhook(WebhookEvent),
    /// The media-stream WebSocket attached; outbound frames are written
    /// to the given sender.
    MediaAttached(mpsc::UnboundedSender<OutboundFrame>),
    /// One inbound media frame's raw bytes in the negotiated codec.
    MediaFrame(Vec<u8>),
    MediaClosed,
    /// One streamed token from the brain reply.
    BrainToken(String),
    /// The brain stream finished; carries the full structured reply.
    BrainDone(BrainReply),
}

/// What the coordinator hands back to the media-stream write task.
pub enum OutboundFrame {
    Audio(Vec<u8>),
    /// Instruct the carrier to bridge this call to `to` (spec §4.6
    /// transfer_call).
    Bridge { to: String },
    Hangup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CoordinatorState {
    Greeting,
    Listening,
    Thinking,
    Speaking,
    Transferring,
    HangingUp,
    Failed,
    Terminated,
}

/// Everything a freshly webhook-answered call needs before its
/// coordinator task can run: tenant config, the capacity reservation
/// already made for it (or the denial reason if admission was refused),
/// and the carrier/caller identity.
pub struct CallSetup {
    pub call_control_id: String,
    pub caller_id: String,
    pub tenant: TenantConfig,
    pub capacity: Result<CallHandle, DenialReason>,
    pub preferred_codec: NegotiatedCodec,
}

/// One call's full state machine (spec §4.6). Constructed per call and
/// driven to completion by [`CallCoordinator::run`] on its own task;
/// nothing outside that task ever mutates these fields.
pub struct CallCoordinator {
    call_control_id: String,
    call_id: String,
    caller_id: String,
    tenant: TenantConfig,
    capacity_handle: Option<CallHandle>,
    state: CoordinatorState,

    settings: Arc<Settings>,
    admission: Arc<AdmissionController>,
    brain: Arc<HttpBrainClient>,
    control_plane: Arc<ControlPlaneClient>,

    tts: Arc<HttpTtsClient>,
    endpointer: Endpointer,
    /// Ordered sentence-segmentation + interrupt-gating pipeline: every
    /// `LLMChunk`/`Sentence`/`AudioOutput`/`BargeIn` frame flows through
    /// both processors in sequence via a single [`ProcessorChain`] call.
    chain: ProcessorChain,
    filler: FillerCache,
    decoder: FrameDecoder,
    ctx: ProcessorContext,

    playback_profile: PlaybackProfile,

    self_tx: mpsc::UnboundedSender<SessionEvent>,
    media_tx: Option<mpsc::UnboundedSender<OutboundFrame>>,
    history: Vec<Turn>,
    pending_capacity_message: Option<&'static str>,
    in_flight_playback_segments: u32,
    brain_stream_done: bool,
    brain_task: Option<tokio::task::JoinHandle<()>>,
    /// Accumulated text of the in-flight brain reply; reset at the start
    /// of each turn and consumed when the turn ends (done or barge-in).
    brain_reply_text: String,
    /// Whether the current turn has already transitioned into SPEAKING.
    brain_entered_speaking: bool,
    media_timestamp_ms: u64,
    started_at: Instant,

    /// Elapsed time (ms) since the current LISTENING stretch began,
    /// advanced by the coordinator's tick interval; `None` outside
    /// LISTENING. Drives the dead-air reprompt timer (spec §4.6).
    dead_air_elapsed_ms: Option<u64>,
    reprompt_count: u32,
}

impl CallCoordinator {
    /// Spawns the coordinator task and registers it in `registry` under
    /// `call_control_id` before returning.
    pub fn spawn(
        setup: CallSetup,
        settings: Arc<Settings>,
        admission: Arc<AdmissionController>,
        brain: Arc<HttpBrainClient>,
        control_plane: Arc<ControlPlaneClient>,
        registry: Arc<SessionRegistry>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        registry.insert(setup.call_control_id.clone(), tx.clone());

        let stt = Arc::new(HttpSttClient::new(voice_agent_clients::stt::SttClientConfig {
            endpoint_url: setup.tenant.stt.endpoint_url.clone(),
            timeout: Duration::from_millis(settings.stt.timeout_ms),
        }));
        let tts = Arc::new(HttpTtsClient::new(voice_agent_clients::tts::TtsClientConfig {
            endpoint_url: setup.tenant.tts.endpoint_url.clone(),
            timeout: Duration::from_millis(settings.tts.timeout_ms),
        }));

        let playback_profile = match setup.tenant.tts.backend {
            TtsBackendKind::NarrowbandHttp => PlaybackProfile::Narrowband,
            TtsBackendKind::HdHttp => PlaybackProfile::Hd,
        };

        let endpointer = Endpointer::new(
            settings.endpointer.clone(),
            stt.clone(),
            settings.audio.target_sample_rate_hz,
            setup.tenant.stt.language_hint.clone(),
            setup.tenant.stt.decoding_prompt.clone(),
        );

        let filler = FillerCache::new(tts.clone(), setup.tenant.tts.voice_id.clone(), setup.tenant.tts.sample_rate_hz);

        let call_id = Uuid::new_v4().to_string();
        let ctx = ProcessorContext::new(call_id.clone());

        let capacity_handle = setup.capacity.as_ref().ok().cloned();
        let pending_capacity_message = setup.capacity.as_ref().err().map(|reason| reason.canned_message());
        let state = if setup.capacity.is_err() { CoordinatorState::Failed } else { CoordinatorState::Greeting };

        let decoder = FrameDecoder::new(setup.preferred_codec, settings.endpointer.stream_restart_max);

        let coordinator = Self {
            call_control_id: setup.call_control_id,
            call_id,
            caller_id: setup.caller_id,
            tenant: setup.tenant,
            capacity_handle,
            state,
            settings,
            admission,
            brain,
            control_plane,
            tts,
            endpointer,
            chain: ProcessorChain::builder("call_pipeline")
                .processor(SentenceDetector::new(SentenceDetectorConfig::default()))
                .processor(InterruptHandler::new(InterruptHandlerConfig::default()))
                .build(),
            filler,
            decoder,
            ctx,
            playback_profile,
            self_tx: tx,
            media_tx: None,
            history: Vec::new(),
            pending_capacity_message,
            in_flight_playback_segments: 0,
            brain_stream_done: true,
            brain_task: None,
            brain_reply_text: String::new(),
            brain_entered_speaking: false,
            media_timestamp_ms: 0,
            started_at: Instant::now(),
            dead_air_elapsed_ms: None,
            reprompt_count: 0,
        };

        tokio::spawn(async move {
            coordinator.run(rx, registry).await;
        });
    }

    async fn run(mut self, mut events: mpsc::UnboundedReceiver<SessionEvent>, registry: Arc<SessionRegistry>) {
        info!(call_id = %self.call_id, call_control_id = %self.call_control_id, tenant = %self.tenant.tenant_id, "call coordinator started");

        if self.capacity_handle.is_some() {
            self.filler.warm(&[FILLER_PHRASE]).await;
            self.control_plane.report_call_started(&self.tenant.tenant_id, &self.call_id, &self.caller_id).await;
        }

        const TICK_MS: u64 = 100;
        let mut ticker = tokio::time::interval(Duration::from_millis(TICK_MS));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                event = events.recv() => {
                    match event {
                        Some(SessionEvent::MediaAttached(tx)) => self.on_media_attached(tx).await,
                        Some(SessionEvent::MediaFrame(bytes)) => self.on_media_frame(bytes).await,
                        Some(SessionEvent::Webhook(webhook)) => self.on_webhook(webhook).await,
                        Some(SessionEvent::BrainToken(chunk)) => self.on_brain_token(chunk).await,
                        Some(SessionEvent::BrainDone(reply)) => self.on_brain_done(reply).await,
                        Some(SessionEvent::MediaClosed) => self.teardown("media_stream_closed").await,
                        None => break,
                    }
                }

                _ = ticker.tick() => {
                    self.on_tick(TICK_MS).await;
                }
            }

            if self.state == CoordinatorState::Terminated {
                break;
            }
        }

        registry.remove(&self.call_control_id);
    }

    /// Periodic tick (spec §4.2 no-frame finalize, §4.6 dead-air): drives
    /// timers that no inbound event would otherwise advance.
    async fn on_tick(&mut self, elapsed_ms: u64) {
        let event = self.endpointer.tick_no_frames(elapsed_ms).await;
        self.handle_endpointer_event(event).await;

        if self.state == CoordinatorState::Listening {
            let elapsed = self.dead_air_elapsed_ms.get_or_insert(0);
            *elapsed += elapsed_ms;
            if *elapsed >= self.settings.endpointer.dead_air_ms {
                self.dead_air_elapsed_ms = Some(0);
                self.on_dead_air().await;
            }
        } else {
            self.dead_air_elapsed_ms = None;
        }
    }

    /// No final transcript within `DEAD_AIR_MS` of entering LISTENING:
    /// reprompt, or hang up after `max_reprompts` (spec §4.6).
    async fn on_dead_air(&mut self) {
        self.reprompt_count += 1;
        if self.reprompt_count > self.settings.endpointer.max_reprompts {
            info!(call_id = %self.call_id, reprompts = self.reprompt_count, "dead air reprompts exhausted, hanging up");
            self.state = CoordinatorState::HangingUp;
            self.speak_canned("I haven't heard from you, so I'll go ahead and end this call. Goodbye.").await;
            return;
        }

        info!(call_id = %self.call_id, reprompt = self.reprompt_count, "dead air, issuing reprompt");
        self.state = CoordinatorState::Speaking;
        self.speak_canned("Are you still there? How can I help you?").await;
    }

    // -- Media stream lifecycle ----------------------------------------

    async fn on_media_attached(&mut self, tx: mpsc::UnboundedSender<OutboundFrame>) {
        self.media_tx = Some(tx);

        if let Some(message) = self.pending_capacity_message.take() {
            self.speak_canned(message).await;
            self.state = CoordinatorState::HangingUp;
            return;
        }

        if self.state == CoordinatorState::Greeting {
            let greeting = self.greeting_text();
            self.speak_canned(&greeting).await;
        }
    }

    async fn on_media_frame(&mut self, bytes: Vec<u8>) {
        if !matches!(self.state, CoordinatorState::Greeting | CoordinatorState::Listening | CoordinatorState::Thinking | CoordinatorState::Speaking) {
            return;
        }

        self.media_timestamp_ms += 20;
        let decoded = match self.decoder.decode(&bytes, self.media_timestamp_ms) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(call_id = %self.call_id, error = %e, "media frame decode failed");
                if self.decoder.should_restart(self.settings.endpointer.stream_restart_max.max(1)) {
                    if self.decoder.restarts_exhausted() {
                        error!(call_id = %self.call_id, "codec restart budget exhausted, ending call");
                        self.teardown("decode_failure").await;
                    } else {
                        self.decoder.restart_with_fallback();
                    }
                }
                return;
            }
        };

        let event = self.endpointer.push_frame(decoded.frame).await;
        self.handle_endpointer_event(event).await;
    }

    async fn handle_endpointer_event(&mut self, event: EndpointerEvent) {
        match event {
            EndpointerEvent::None => {}
            EndpointerEvent::VoiceStart => {
                if matches!(self.state, CoordinatorState::Speaking | CoordinatorState::Thinking) {
                    self.handle_barge_in().await;
                }
            }
            EndpointerEvent::Partial { .. } => {}
            EndpointerEvent::Final { text, error } => {
                if let Some(err) = error {
                    warn!(call_id = %self.call_id, error = %err, "stt finalize failed");
                }
                if text.trim().is_empty() {
                    // Boundary behavior (spec §8): an empty final stays in
                    // LISTENING, no turn added.
                    return;
                }
                self.on_final_transcript(text).await;
            }
        }
    }

    async fn handle_barge_in(&mut self) {
        let frame = Frame::BargeIn { audio_position_ms: self.media_timestamp_ms, transcript: None };
        match self.chain.process_one(frame, &mut self.ctx).await {
            Ok(frames) if frames.is_empty() => return,
            Ok(_) => {}
            Err(e) => {
                warn!(call_id = %self.call_id, error = %e, "interrupt handler error during barge-in");
                return;
            }
        }

        info!(call_id = %self.call_id, "barge-in accepted, cancelling playback and brain stream");
        if let Some(handle) = self.brain_task.take() {
            handle.abort();
        }
        self.in_flight_playback_segments = 0;
        self.brain_reply_text.clear();
        self.brain_entered_speaking = false;
        self.history.push(Turn::new(TurnRole::System, "[barge-in]"));
        self.state = CoordinatorState::Listening;
        let _ = self.chain.process_one(Frame::Control(ControlFrame::Reset), &mut self.ctx).await;
    }

    // -- Webhook events --------------------------------------------------

    async fn on_webhook(&mut self, webhook: WebhookEvent) {
        match webhook {
            WebhookEvent::CallAnswered => {
                // Greeting already entered at construction time once
                // capacity was confirmed; nothing further to do until
                // media attaches.
            }
            WebhookEvent::PlaybackEnded => {
                self.in_flight_playback_segments = self.in_flight_playback_segments.saturating_sub(1);
                if self.in_flight_playback_segments == 0 {
                    match self.state {
                        CoordinatorState::Greeting => {
                            self.endpointer.arm_post_playback_grace(self.settings.endpointer.post_playback_grace_max_ms);
                            self.state = CoordinatorState::Listening;
                        }
                        CoordinatorState::Speaking if self.brain_stream_done => {
                            self.endpointer.arm_post_playback_grace(self.settings.endpointer.post_playback_grace_min_ms);
                            self.state = CoordinatorState::Listening;
                        }
                        CoordinatorState::Transferring | CoordinatorState::HangingUp | CoordinatorState::Failed => {
                            self.teardown("playback_complete").await;
                        }
                        _ => {}
                    }
                }
            }
            WebhookEvent::Hangup => self.teardown("carrier_hangup").await,
            WebhookEvent::StreamingFailed { message } => {
                warn!(call_id = %self.call_id, %message, "carrier reported streaming failure");
                self.teardown("streaming_failed").await;
            }
            WebhookEvent::Other { event_type } => {
                debug!(call_id = %self.call_id, %event_type, "unhandled webhook event type");
            }
        }
    }

    // -- Conversation turn ------------------------------------------------

    fn greeting_text(&self) -> String {
        self.tenant
            .assistant_context
            .iter()
            .find(|section| section.name.eq_ignore_ascii_case("greeting"))
            .map(|section| section.text.clone())
            .unwrap_or_else(|| DEFAULT_GREETING.to_string())
    }

    async fn on_final_transcript(&mut self, text: String) {
        self.reprompt_count = 0;
        self.history.push(Turn::new(TurnRole::User, text.clone()));
        self.control_plane.report_caller_message(&self.tenant.tenant_id, &self.call_id, &text).await;
        self.state = CoordinatorState::Thinking;

        // Clear any leftover segmentation buffer before the new brain
        // stream starts; the prior turn's `Done` flush should already
        // have emptied it, this is defensive. Run before the filler
        // plays so the reset doesn't clobber the `Speaking` state that
        // playback is about to set on the interrupt handler.
        let _ = self.chain.process_one(Frame::Control(ControlFrame::Reset), &mut self.ctx).await;

        if let Some(audio) = self.filler.get(FILLER_PHRASE).await {
            self.send_playback(audio.bytes, self.tenant.tts.sample_rate_hz).await;
        }

        let request = BrainRequest {
            tenant_id: self.tenant.tenant_id.clone(),
            call_id: self.call_id.clone(),
            transcript: text,
            history: self.history.clone(),
            transfer_profiles: self.tenant.transfer_profiles.clone(),
            assistant_context: self.tenant.assistant_context.iter().map(|s| (s.name.clone(), s.text.clone())).collect(),
        };

        self.brain_stream_done = false;
        self.brain_reply_text.clear();
        self.brain_entered_speaking = false;
        self.spawn_brain_turn(request);
    }

    /// Starts the brain-stream round trip off the coordinator's own task
    /// so the outer `run` select loop keeps draining `SessionEvent`s (and
    /// ticking) while a turn is in flight: a spawned task consumes the
    /// brain's SSE stream and re-enqueues each event as a `SessionEvent`
    /// on this coordinator's own queue, preserving the single ordered
    /// arrival-order stream the module promises. `self.brain_task` holds
    /// the handle to the task actually driving the HTTP call, so
    /// `handle_barge_in`/`teardown` can cancel it; aborting it drops the
    /// channel sender and lets the forwarder below drain to completion on
    /// its own.
    fn spawn_brain_turn(&mut self, request: BrainRequest) {
        let (tx, mut rx) = mpsc::channel::<BrainStreamEvent>(16);
        let brain = self.brain.clone();
        let stream_task = tokio::spawn(async move {
            let _ = brain.generate_stream(request, tx).await;
        });
        self.brain_task = Some(stream_task);

        let self_tx = self.self_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let forwarded = match event {
                    BrainStreamEvent::Token(chunk) => SessionEvent::BrainToken(chunk),
                    BrainStreamEvent::Done(reply) => SessionEvent::BrainDone(reply),
                };
                if self_tx.send(forwarded).is_err() {
                    break;
                }
            }
        });
    }

    async fn on_brain_token(&mut self, chunk: String) {
        self.brain_reply_text.push_str(&chunk);
        self.brain_entered_speaking = self.emit_sentences(chunk, false, self.brain_entered_speaking).await;
    }

    async fn on_brain_done(&mut self, reply: BrainReply) {
        self.brain_entered_speaking = self.emit_sentences(String::new(), true, self.brain_entered_speaking).await;
        self.brain_stream_done = true;
        self.brain_task = None;

        let closing_question_asked = self
            .history
            .iter()
            .rev()
            .find(|t| t.role == TurnRole::Assistant)
            .is_some_and(|t| is_closing_question(&t.content));
        let heuristic_hangup =
            reply.transfer.is_none() && !reply.hangup && closing_question_asked && is_farewell(&self.brain_reply_text);
        if heuristic_hangup {
            debug!(call_id = %self.call_id, "promoting farewell reply to hangup via closing-question heuristic");
        }

        if let Some(transfer) = reply.transfer {
            // Explicit tool calls take precedence over the farewell
            // heuristic when both would fire on the same turn (spec §9
            // open question).
            self.state = CoordinatorState::Transferring;
            self.speak_canned(&transfer.message_to_caller).await;
            info!(call_id = %self.call_id, destination = %transfer.to, "transferring call");
            if let Some(tx) = self.media_tx.clone() {
                let _ = tx.send(OutboundFrame::Bridge { to: transfer.to });
            }
        } else if reply.hangup || heuristic_hangup {
            self.state = CoordinatorState::HangingUp;
        } else if !self.brain_entered_speaking {
            // Brain produced no segments at all (empty reply); fall back
            // to LISTENING directly.
            self.endpointer.arm_post_playback_grace(self.settings.endpointer.post_playback_grace_min_ms);
            self.state = CoordinatorState::Listening;
        }

        self.history.push(Turn::new(TurnRole::Assistant, std::mem::take(&mut self.brain_reply_text)));
    }

    /// Runs one `LLMChunk` frame through the chain: sentence detection
    /// first, then interrupt gating on every `Sentence` it produces, in
    /// one ordered pass.
    async fn emit_sentences(&mut self, chunk: String, is_final: bool, already_speaking: bool) -> bool {
        let frame = Frame::LLMChunk { text: chunk, is_final };
        let mut entered_speaking = already_speaking;
        if let Ok(frames) = self.chain.process_one(frame, &mut self.ctx).await {
            for f in frames {
                if let Frame::Sentence { text, index } = f {
                    if !entered_speaking {
                        self.state = CoordinatorState::Speaking;
                        entered_speaking = true;
                    }
                    self.speak_segment(text, index).await;
                }
            }
        }
        entered_speaking
    }

    /// Synthesizes and plays a segment already cleared by the interrupt
    /// stage of the chain in [`Self::emit_sentences`].
    async fn speak_segment(&mut self, text: String, index: usize) {
        let request = TtsRequest {
            text,
            voice_id: self.tenant.tts.voice_id.clone(),
            rate: self.tenant.tts.tuning.speed,
            language: None,
            sample_rate_hz: self.tenant.tts.sample_rate_hz,
        };

        match self.tts.synthesize(&request).await {
            Ok(audio) => self.send_playback(audio.bytes, self.tenant.tts.sample_rate_hz).await,
            Err(e) => warn!(call_id = %self.call_id, error = %e, index, "tts synthesis failed for segment"),
        }
    }

    async fn speak_canned(&mut self, text: &str) {
        let request = TtsRequest {
            text: text.to_string(),
            voice_id: self.tenant.tts.voice_id.clone(),
            rate: None,
            language: None,
            sample_rate_hz: self.tenant.tts.sample_rate_hz,
        };
        match self.tts.synthesize(&request).await {
            Ok(audio) => self.send_playback(audio.bytes, self.tenant.tts.sample_rate_hz).await,
            Err(e) => warn!(call_id = %self.call_id, error = %e, "tts synthesis failed for canned message"),
        }
    }

    async fn send_playback(&mut self, pcm16: Vec<u8>, source_sample_rate_hz: u32) {
        let Some(tx) = self.media_tx.clone() else {
            return;
        };

        let source_rate = SampleRate::from_hz(source_sample_rate_hz).unwrap_or(SampleRate::Hz24000);
        let frame = AudioFrame::from_pcm16_bytes(&pcm16, source_rate, Channels::Mono, self.media_timestamp_ms);

        match self.chain.process_one(Frame::AudioOutput(frame.clone()), &mut self.ctx).await {
            Ok(passed) if passed.is_empty() => return,
            Ok(_) => {}
            Err(e) => {
                warn!(call_id = %self.call_id, error = %e, "interrupt handler error on playback frame");
                return;
            }
        }

        let shaped = shape_for_profile(&frame, self.playback_profile, PSTN_SAMPLE_RATE_HZ);
        self.endpointer.arm_post_playback_grace(shaped.duration_ms());

        let ingest_rate = self.settings.audio.target_sample_rate_hz;
        let reference = voice_agent_pipeline::resample_to_rate(&frame, ingest_rate);
        self.endpointer.push_playback_reference(&reference.samples);

        self.in_flight_playback_segments += 1;
        let _ = tx.send(OutboundFrame::Audio(shaped.bytes));
    }

    /// Teardown, run exactly once per call (spec §4.6): cancel in-flight
    /// work, release capacity, emit the structured transcript, report
    /// `call_ended` best-effort, then free session state.
    async fn teardown(&mut self, reason: &str) {
        if self.state == CoordinatorState::Terminated {
            return;
        }

        if let Some(handle) = self.brain_task.take() {
            handle.abort();
        }

        if let Some(handle) = self.capacity_handle.take() {
            if let Err(e) = self.admission.release(&handle).await {
                warn!(call_id = %self.call_id, error = %e, "capacity release failed during teardown");
            }
        }

        let artifact = TranscriptArtifact {
            tenant_id: self.tenant.tenant_id.clone(),
            call_id: self.call_id.clone(),
            caller_id: self.caller_id.clone(),
            duration_ms: self.started_at.elapsed().as_millis() as u64,
            turns: self.history.clone(),
        };
        info!(call_id = %self.call_id, %reason, turns = artifact.turns.len(), "call ended");

        self.control_plane.report_call_ended(&artifact).await;

        if let Some(tx) = self.media_tx.take() {
            let _ = tx.send(OutboundFrame::Hangup);
        }

        self.state = CoordinatorState::Terminated;
    }
}

/// Heuristic "anything else" detector for the prior assistant turn (spec
/// §4.4). Deliberately narrow: a handful of closing phrasings rather than
/// a general intent classifier.
fn is_closing_question(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    lower.contains("anything else") || lower.contains("something else") || lower.contains("help you with today")
}

/// Heuristic farewell detector for the brain's final reply text (spec
/// §4.4). Used only to *promote* a reply to hangup when the prior turn
/// asked a closing question; an explicit `end_call`/`transfer_call` tool
/// call always takes precedence (spec §9 open question).
fn is_farewell(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    ["goodbye", "good bye", "have a great day", "have a good day", "take care", "bye now"]
        .iter()
        .any(|phrase| lower.contains(phrase))
}

#[cfg(test)]
mod farewell_heuristic_tests {
    use super::*;

    #[test]
    fn detects_closing_question_variants() {
        assert!(is_closing_question("Anything else I can help with?"));
        assert!(is_closing_question("Is there something else you need?"));
        assert!(!is_closing_question("We close at 5 PM."));
    }

    #[test]
    fn detects_farewell_variants() {
        assert!(is_farewell("Have a great day! Goodbye."));
        assert!(is_farewell("Take care now."));
        assert!(!is_farewell("We close at 5 PM. Anything else?"));
    }
}
