//! Realtime transport session over WebRTC.
//!
//! This module provides the client that owns one peer connection, one data
//! channel and the local/remote audio attachment for a session attempt, and
//! implements the `VoiceClient` contract on top of them.
//!
//! # Connection Flow
//!
//! 1. Acquire the microphone
//! 2. Create the peer connection and attach the local track
//! 3. Create the `oai-events` data channel
//! 4. Create the offer, set it locally, exchange it via signaling
//! 5. Set the remote answer; the session is connected once the channel opens
//!
//! # Example
//!
//! ```rust,ignore
//! use waav_voice_client::core::webrtc::RealtimeWebRtcClient;
//!
//! let client = RealtimeWebRtcClient::builder(engine, media, signaling)
//!     .tools(registry)
//!     .build();
//!
//! let callbacks = SessionCallbacks::new().on_connect(|| async { println!("connected") });
//! if client.start(callbacks, SessionOptions::default()).await {
//!     client.send_text("Hello!").await?;
//! }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use super::media::{
    AudioConstraints, LocalMediaStream, RemoteAudioCallback, RemoteAudioSink, SharedMediaDevices,
};
use super::messages::{
    ApiError, ClientEvent, ConversationItem, OutboundEvent, ResponseConfig, ServerEvent,
    SessionPatch, TranscriptionSettings, event_type,
};
use super::native::NativeRtcEngine;
use super::peer::{ChannelEvent, RtcDataChannel, RtcPeer, SharedRtcEngine};
use super::signaling::{HttpSignaling, SharedSignaling};
use crate::config::ClientConfig;
use crate::core::session::{
    ContextSlot, ConversationMessage, ProviderKind, SessionCallbacks, SessionContext, SessionError,
    SessionOptions, SessionResult, SessionStatus, StatusCell, VoiceClient,
};
use crate::core::tools::{ToolCallRequest, ToolDispatcher, ToolOutputSink, ToolRegistry};

/// Data channel label expected by realtime agents.
pub const DEFAULT_DATA_CHANNEL_LABEL: &str = "oai-events";

// =============================================================================
// Transport Handles
// =============================================================================

/// Resources of one live attempt. Installed and released as a unit.
struct TransportHandles {
    generation: u64,
    peer: Arc<dyn RtcPeer>,
    channel: Arc<dyn RtcDataChannel>,
    stream: LocalMediaStream,
    remote_audio: Arc<RemoteAudioSink>,
}

impl TransportHandles {
    async fn release(self) {
        debug!(generation = self.generation, "Releasing transport handles");
        release_parts(
            Some(self.channel),
            Some(self.stream),
            Some(self.peer),
            Some(self.remote_audio),
        )
        .await;
    }
}

/// Resources acquired so far by an attempt that has not installed them yet.
#[derive(Default)]
struct Staging {
    stream: Option<LocalMediaStream>,
    peer: Option<Arc<dyn RtcPeer>>,
    channel: Option<Arc<dyn RtcDataChannel>>,
    remote_audio: Option<Arc<RemoteAudioSink>>,
}

impl Staging {
    fn complete(&mut self, generation: u64) -> Option<TransportHandles> {
        match (
            self.stream.take(),
            self.peer.take(),
            self.channel.take(),
            self.remote_audio.take(),
        ) {
            (Some(stream), Some(peer), Some(channel), Some(remote_audio)) => {
                Some(TransportHandles {
                    generation,
                    peer,
                    channel,
                    stream,
                    remote_audio,
                })
            }
            (stream, peer, channel, remote_audio) => {
                *self = Staging {
                    stream,
                    peer,
                    channel,
                    remote_audio,
                };
                None
            }
        }
    }

    async fn release(&mut self) {
        release_parts(
            self.channel.take(),
            self.stream.take(),
            self.peer.take(),
            self.remote_audio.take(),
        )
        .await;
    }
}

async fn release_parts(
    channel: Option<Arc<dyn RtcDataChannel>>,
    stream: Option<LocalMediaStream>,
    peer: Option<Arc<dyn RtcPeer>>,
    remote_audio: Option<Arc<RemoteAudioSink>>,
) {
    if let Some(sink) = &remote_audio {
        sink.clear();
    }
    // Listeners go first so a close event cannot re-enter teardown
    if let Some(channel) = channel {
        channel.detach();
        if let Err(e) = channel.close().await {
            warn!("Failed to close data channel: {}", e);
        }
    }
    if let Some(peer) = &peer {
        for track in peer.sender_tracks() {
            track.stop();
        }
    }
    if let Some(stream) = stream {
        stream.stop();
    }
    if let Some(peer) = peer {
        if let Err(e) = peer.close().await {
            warn!("Failed to close peer connection: {}", e);
        }
    }
}

// =============================================================================
// Client
// =============================================================================

struct ClientInner {
    engine: SharedRtcEngine,
    media: SharedMediaDevices,
    signaling: SharedSignaling,
    dispatcher: ToolDispatcher,
    data_channel_label: String,
    audio_constraints: AudioConstraints,
    remote_audio: Option<RemoteAudioCallback>,
    status: StatusCell,
    muted: AtomicBool,
    contexts: ContextSlot,
    handles: Mutex<Option<TransportHandles>>,
}

/// WebRTC realtime client.
///
/// One instance serves any number of sequential sessions. Each `start`
/// captures a fresh [`SessionContext`]; handles from an earlier attempt are
/// always released before a new attempt acquires anything.
pub struct RealtimeWebRtcClient {
    inner: Arc<ClientInner>,
}

pub struct RealtimeWebRtcClientBuilder {
    engine: SharedRtcEngine,
    media: SharedMediaDevices,
    signaling: SharedSignaling,
    tools: ToolRegistry,
    data_channel_label: String,
    audio_constraints: AudioConstraints,
    remote_audio: Option<RemoteAudioCallback>,
}

impl RealtimeWebRtcClientBuilder {
    pub fn tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn data_channel_label(mut self, label: impl Into<String>) -> Self {
        self.data_channel_label = label.into();
        self
    }

    pub fn audio_constraints(mut self, constraints: AudioConstraints) -> Self {
        self.audio_constraints = constraints;
        self
    }

    /// Receive the agent's audio as raw RTP payloads.
    pub fn remote_audio(mut self, callback: RemoteAudioCallback) -> Self {
        self.remote_audio = Some(callback);
        self
    }

    pub fn build(self) -> RealtimeWebRtcClient {
        RealtimeWebRtcClient {
            inner: Arc::new(ClientInner {
                engine: self.engine,
                media: self.media,
                signaling: self.signaling,
                dispatcher: ToolDispatcher::new(self.tools),
                data_channel_label: self.data_channel_label,
                audio_constraints: self.audio_constraints,
                remote_audio: self.remote_audio,
                status: StatusCell::new(),
                muted: AtomicBool::new(false),
                contexts: ContextSlot::new(),
                handles: Mutex::new(None),
            }),
        }
    }
}

impl RealtimeWebRtcClient {
    pub fn builder(
        engine: SharedRtcEngine,
        media: SharedMediaDevices,
        signaling: SharedSignaling,
    ) -> RealtimeWebRtcClientBuilder {
        RealtimeWebRtcClientBuilder {
            engine,
            media,
            signaling,
            tools: ToolRegistry::new(),
            data_channel_label: DEFAULT_DATA_CHANNEL_LABEL.to_string(),
            audio_constraints: AudioConstraints::default(),
            remote_audio: None,
        }
    }

    /// Native webrtc-rs engine plus HTTP signaling, as configured.
    pub fn builder_from_config(
        config: &ClientConfig,
        media: SharedMediaDevices,
    ) -> SessionResult<RealtimeWebRtcClientBuilder> {
        let engine = NativeRtcEngine::new(config.ice_servers.clone())?;
        let mut signaling = HttpSignaling::new(config.signaling_endpoint())?;
        if let Some(token) = &config.signaling_token {
            signaling = signaling.with_token(token.clone());
        }

        Ok(Self::builder(Arc::new(engine), media, Arc::new(signaling))
            .data_channel_label(config.data_channel_label.clone())
            .audio_constraints(config.audio))
    }

    /// Whether transport handles are currently held.
    pub fn has_transport(&self) -> bool {
        self.inner.handles.lock().is_some()
    }
}

impl ClientInner {
    async fn transition(&self, ctx: &SessionContext, status: SessionStatus) {
        if self.status.set(status) {
            ctx.callbacks().emit_status(status).await;
        }
    }

    fn ensure_current(&self, generation: u64) -> SessionResult<()> {
        if self.contexts.is_current(generation) {
            Ok(())
        } else {
            Err(SessionError::Superseded)
        }
    }

    /// Install handles unless the attempt was superseded meanwhile.
    fn install(&self, handles: TransportHandles) -> Result<(), TransportHandles> {
        let mut slot = self.handles.lock();
        if !self.contexts.is_current(handles.generation) {
            return Err(handles);
        }
        *slot = Some(handles);
        Ok(())
    }

    /// Release every held handle. Idempotent.
    async fn teardown(&self) {
        let handles = self.handles.lock().take();
        self.muted.store(false, Ordering::SeqCst);
        if let Some(handles) = handles {
            handles.release().await;
        }
    }

    async fn fail(&self, ctx: &SessionContext, error: SessionError) {
        let Some(ctx) = self.contexts.end_if_current(ctx.generation()) else {
            debug!("Ignoring error from ended session: {}", error);
            return;
        };
        error!("Realtime session error: {}", error);
        self.transition(&ctx, SessionStatus::Error).await;
        ctx.notify_error(error).await;
        self.teardown().await;
        self.transition(&ctx, SessionStatus::Idle).await;
    }

    async fn connect(self: &Arc<Self>, ctx: &SessionContext) -> SessionResult<()> {
        let generation = ctx.generation();

        let mut staging = Staging::default();
        if let Err(e) = self.build_transport(generation, &mut staging).await {
            staging.release().await;
            return Err(e);
        }
        let Some(handles) = staging.complete(generation) else {
            staging.release().await;
            return Err(SessionError::PeerConnection(
                "Transport setup incomplete".to_string(),
            ));
        };
        let peer = handles.peer.clone();
        if let Err(handles) = self.install(handles) {
            handles.release().await;
            return Err(SessionError::Superseded);
        }

        let offer = peer.create_offer().await?;
        self.ensure_current(generation)?;

        let answer = self.signaling.exchange(&offer).await?;
        if !self.contexts.is_current(generation) {
            info!("Discarding SDP answer for superseded attempt");
            return Err(SessionError::Superseded);
        }

        peer.set_remote_answer(&answer).await?;
        info!("Remote description set, waiting for data channel");
        Ok(())
    }

    async fn build_transport(
        self: &Arc<Self>,
        generation: u64,
        staging: &mut Staging,
    ) -> SessionResult<()> {
        let stream = self.media.get_user_media(&self.audio_constraints).await?;
        staging.stream = Some(stream.clone());
        self.ensure_current(generation)?;

        let peer = self.engine.create_peer().await?;
        staging.peer = Some(peer.clone());
        self.ensure_current(generation)?;

        let sink = Arc::new(RemoteAudioSink::new(self.remote_audio.clone()));
        peer.on_remote_track(sink.clone());
        staging.remote_audio = Some(sink);

        for track in stream.audio_tracks() {
            peer.add_track(track.clone()).await?;
        }

        let channel = peer.create_data_channel(&self.data_channel_label).await?;
        staging.channel = Some(channel.clone());

        let (tx, rx) = mpsc::unbounded_channel();
        channel.attach(tx);
        tokio::spawn(pump_events(Arc::downgrade(self), generation, rx));

        self.ensure_current(generation)
    }

    async fn send_event(&self, event: ClientEvent) -> SessionResult<()> {
        let channel = self.handles.lock().as_ref().map(|h| h.channel.clone());
        let Some(channel) = channel.filter(|c| c.is_open()) else {
            warn!("Cannot send event - data channel not open");
            return Ok(());
        };

        let mut outbound = OutboundEvent::new(event);
        let payload = outbound
            .to_json()
            .map_err(|e| SessionError::Serialization(e.to_string()))?;
        debug!(event_id = ?outbound.event_id, "Sending data channel event");

        if let Err(e) = channel.send_text(payload).await {
            warn!("Failed to send data channel event: {}", e);
        }
        Ok(())
    }

    async fn on_channel_open(&self, ctx: &SessionContext) {
        info!("Data channel open, session connected");
        self.transition(ctx, SessionStatus::Connected).await;
        ctx.notify_connect().await;
        self.apply_session_options(ctx.options()).await;
    }

    async fn apply_session_options(&self, options: &SessionOptions) {
        if options.prompt.is_some() || options.language.is_some() {
            let update = ClientEvent::SessionUpdate {
                session: SessionPatch {
                    instructions: options.prompt.clone(),
                    input_audio_transcription: options.language.clone().map(|language| {
                        TranscriptionSettings {
                            language: Some(language),
                        }
                    }),
                },
            };
            if let Err(e) = self.send_event(update).await {
                warn!("Failed to apply session options: {}", e);
            }
        }

        if let Some(first_message) = &options.first_message {
            let opener = ClientEvent::ResponseCreate {
                response: Some(ResponseConfig {
                    instructions: Some(format!(
                        "Start the conversation by saying: \"{first_message}\""
                    )),
                    ..Default::default()
                }),
            };
            if let Err(e) = self.send_event(opener).await {
                warn!("Failed to request first message: {}", e);
            }
        }
    }

    async fn on_channel_message(self: &Arc<Self>, ctx: &SessionContext, text: String) {
        if self.status.get() == SessionStatus::Idle {
            return;
        }

        let raw: Value = match serde_json::from_str(&text) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Failed to parse data channel message: {}", e);
                return;
            }
        };

        // Routed on the raw type so off-shape fields cannot demote a tool
        // call or a fatal error to an unknown event
        match event_type(&raw) {
            Some(ServerEvent::FUNCTION_CALL_ARGUMENTS_DONE) => {
                if let Some(request) = ToolCallRequest::from_raw(&raw) {
                    self.spawn_tool_call(ctx, request);
                }
            }
            Some(ServerEvent::ERROR) => {
                let error = ApiError::from_value(raw.get("error"));
                self.fail(ctx, SessionError::Provider(error.describe())).await;
            }
            _ => {
                let event = ServerEvent::from_value(&raw);
                ctx.callbacks()
                    .emit_message(ConversationMessage::Realtime { event, raw })
                    .await;
            }
        }
    }

    fn spawn_tool_call(self: &Arc<Self>, ctx: &SessionContext, request: ToolCallRequest) {
        let dispatcher = self.dispatcher.clone();
        let callbacks = ctx.callbacks().clone();
        let sink = WireToolSink {
            inner: Arc::downgrade(self),
            generation: ctx.generation(),
        };
        tokio::spawn(async move {
            dispatcher.handle(request, &callbacks, &sink).await;
        });
    }

    async fn on_channel_close(&self, ctx: &SessionContext) {
        if self.status.get() == SessionStatus::Idle {
            return;
        }
        let Some(ctx) = self.contexts.end_if_current(ctx.generation()) else {
            return;
        };
        info!("Data channel closed by remote");
        self.teardown().await;
        self.transition(&ctx, SessionStatus::Idle).await;
        ctx.notify_disconnect().await;
    }
}

/// Sequential consumer of one attempt's data channel events.
async fn pump_events(
    inner: Weak<ClientInner>,
    generation: u64,
    mut events: mpsc::UnboundedReceiver<ChannelEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        let Some(ctx) = inner.contexts.current_for(generation) else {
            debug!(generation, "Dropping data channel event for ended session");
            break;
        };

        match event {
            ChannelEvent::Open => inner.on_channel_open(&ctx).await,
            ChannelEvent::Message(text) => inner.on_channel_message(&ctx, text).await,
            ChannelEvent::Close => inner.on_channel_close(&ctx).await,
            ChannelEvent::Error(message) => {
                inner.fail(&ctx, SessionError::DataChannel(message)).await
            }
        }
    }
    debug!(generation, "Data channel event pump finished");
}

/// Sends tool results back over the attempt's data channel.
struct WireToolSink {
    inner: Weak<ClientInner>,
    generation: u64,
}

#[async_trait]
impl ToolOutputSink for WireToolSink {
    async fn send_tool_output(&self, call_id: &str, output: String) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        if !inner.contexts.is_current(self.generation) {
            warn!(call_id, "Dropping tool output for ended session");
            return;
        }
        let event = ClientEvent::item_create(ConversationItem::function_call_output(call_id, output));
        if let Err(e) = inner.send_event(event).await {
            error!(call_id, "Failed to send tool output: {}", e);
        }
    }
}

#[async_trait]
impl VoiceClient for RealtimeWebRtcClient {
    fn provider(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    async fn start(&self, callbacks: SessionCallbacks, options: SessionOptions) -> bool {
        let inner = &self.inner;

        if inner.contexts.end().is_some() {
            info!("Tearing down previous attempt before starting");
        }
        inner.teardown().await;

        let ctx = inner.contexts.begin(callbacks, options);
        info!(generation = ctx.generation(), "Starting realtime session");
        inner.transition(&ctx, SessionStatus::Connecting).await;

        match inner.connect(&ctx).await {
            Ok(()) => true,
            Err(SessionError::Superseded) => {
                info!(generation = ctx.generation(), "Session attempt superseded");
                false
            }
            Err(e) => {
                inner.fail(&ctx, e).await;
                false
            }
        }
    }

    async fn stop(&self) {
        let inner = &self.inner;
        let ctx = inner.contexts.end();
        inner.teardown().await;

        match ctx {
            Some(ctx) => {
                info!(generation = ctx.generation(), "Realtime session stopped");
                ctx.notify_disconnect().await;
                inner.transition(&ctx, SessionStatus::Idle).await;
            }
            None => {
                inner.status.set(SessionStatus::Idle);
            }
        }
    }

    fn status(&self) -> SessionStatus {
        self.inner.status.get()
    }

    fn subscribe_status(&self) -> watch::Receiver<SessionStatus> {
        self.inner.status.subscribe()
    }

    async fn set_muted(&self, muted: bool) -> SessionResult<()> {
        let applied = {
            let handles = self.inner.handles.lock();
            match handles.as_ref() {
                Some(h) => {
                    h.stream.set_enabled(!muted);
                    for track in h.peer.sender_tracks() {
                        track.set_enabled(!muted);
                    }
                    true
                }
                None => false,
            }
        };

        self.inner.muted.store(muted, Ordering::SeqCst);
        if applied {
            info!(muted, "Microphone mute updated");
        } else {
            debug!(muted, "Mute flag stored without a local media stream");
        }
        Ok(())
    }

    fn is_muted(&self) -> bool {
        self.inner.muted.load(Ordering::SeqCst)
    }

    async fn send_text(&self, text: &str) -> SessionResult<()> {
        if text.trim().is_empty() {
            warn!("Cannot send empty message");
            return Ok(());
        }
        self.inner
            .send_event(ClientEvent::item_create(ConversationItem::user_text(text)))
            .await?;
        self.inner.send_event(ClientEvent::response_create()).await
    }

    async fn create_user_message(&self, text: &str) -> SessionResult<()> {
        if text.trim().is_empty() {
            warn!("Cannot create empty message");
            return Ok(());
        }
        self.inner
            .send_event(ClientEvent::item_create(ConversationItem::user_text(text)))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staging_incomplete_keeps_parts() {
        let mut staging = Staging {
            stream: Some(LocalMediaStream::default()),
            ..Default::default()
        };
        assert!(staging.complete(1).is_none());
        assert!(staging.stream.is_some());
    }

    #[tokio::test]
    async fn test_release_stops_stream_tracks() {
        use crate::core::webrtc::media::LocalAudioTrack;

        let track = LocalAudioTrack::new("mic");
        let mut staging = Staging {
            stream: Some(LocalMediaStream::new(vec![track.clone()])),
            ..Default::default()
        };
        staging.release().await;
        assert!(track.is_stopped());
        assert!(staging.stream.is_none());
    }
}
