//! Host-facing session object.
//!
//! `VoiceSession` owns one client per provider for its whole lifetime and
//! only repeats `start`/`stop` against them. It keeps its own authoritative
//! status cell for the re-entrancy guard and feeds every inbound message into
//! the transcript before handing it to the host.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

use super::base::{
    ConversationMessage, ProviderKind, SessionCallbacks, SessionError, SessionOptions,
    SessionResult, SessionStatus, SharedVoiceClient, SimpleMessage,
};
use super::status::StatusCell;
use crate::config::ClientConfig;
use crate::core::tools::ToolRegistry;
use crate::core::transcript::{TranscriptAssembler, TranscriptMessage};
use crate::core::webrtc::RealtimeWebRtcClient;
use crate::core::webrtc::media::{RemoteAudioCallback, SharedMediaDevices};

struct TranscriptState {
    assembler: Mutex<TranscriptAssembler>,
    notify: watch::Sender<Vec<TranscriptMessage>>,
}

impl TranscriptState {
    fn new() -> Self {
        let (notify, _) = watch::channel(Vec::new());
        Self {
            assembler: Mutex::new(TranscriptAssembler::new()),
            notify,
        }
    }

    fn apply(&self, message: &ConversationMessage) {
        let mut assembler = self.assembler.lock();
        if assembler.apply(message) {
            self.notify.send_replace(assembler.snapshot());
        }
    }

    fn clear(&self) {
        let mut assembler = self.assembler.lock();
        assembler.clear();
        self.notify.send_replace(Vec::new());
    }

    fn snapshot(&self) -> Vec<TranscriptMessage> {
        self.assembler.lock().snapshot()
    }
}

/// The single object a host drives a conversation through.
pub struct VoiceSession {
    clients: HashMap<ProviderKind, SharedVoiceClient>,
    default_provider: ProviderKind,
    defaults: SessionOptions,
    status: Arc<StatusCell>,
    transcript: Arc<TranscriptState>,
    active: Mutex<Option<SharedVoiceClient>>,
}

impl std::fmt::Debug for VoiceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut providers: Vec<String> = self.clients.keys().map(|p| p.to_string()).collect();
        providers.sort();
        f.debug_struct("VoiceSession")
            .field("providers", &providers)
            .field("default_provider", &self.default_provider)
            .field("status", &self.status.get())
            .finish()
    }
}

#[derive(Default)]
pub struct VoiceSessionBuilder {
    clients: HashMap<ProviderKind, SharedVoiceClient>,
    default_provider: Option<ProviderKind>,
    defaults: SessionOptions,
}

impl VoiceSessionBuilder {
    /// Realtime WebRTC client built from `config`, with the configured
    /// provider and session defaults.
    pub fn from_config(
        config: &ClientConfig,
        tools: ToolRegistry,
        media: SharedMediaDevices,
        remote_audio: Option<RemoteAudioCallback>,
    ) -> SessionResult<Self> {
        let mut realtime = RealtimeWebRtcClient::builder_from_config(config, media)?.tools(tools);
        if let Some(callback) = remote_audio {
            realtime = realtime.remote_audio(callback);
        }

        Ok(Self::default()
            .client(Arc::new(realtime.build()))
            .default_provider(config.provider)
            .defaults(config.defaults.clone()))
    }

    /// Register a client under its own provider kind.
    pub fn client(mut self, client: SharedVoiceClient) -> Self {
        self.clients.insert(client.provider(), client);
        self
    }

    pub fn default_provider(mut self, provider: ProviderKind) -> Self {
        self.default_provider = Some(provider);
        self
    }

    /// Agent-level option defaults; per-start options override them.
    pub fn defaults(mut self, defaults: SessionOptions) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn build(self) -> SessionResult<VoiceSession> {
        let default_provider = match self.default_provider {
            Some(provider) => provider,
            None if self.clients.contains_key(&ProviderKind::OpenAi) => ProviderKind::OpenAi,
            None => self.clients.keys().next().copied().ok_or_else(|| {
                SessionError::InvalidConfiguration("no voice client registered".to_string())
            })?,
        };
        if self.clients.is_empty() {
            return Err(SessionError::InvalidConfiguration(
                "no voice client registered".to_string(),
            ));
        }

        Ok(VoiceSession {
            clients: self.clients,
            default_provider,
            defaults: self.defaults,
            status: Arc::new(StatusCell::new()),
            transcript: Arc::new(TranscriptState::new()),
            active: Mutex::new(None),
        })
    }
}

impl VoiceSession {
    pub fn builder() -> VoiceSessionBuilder {
        VoiceSessionBuilder::default()
    }

    /// Start a conversation. Refused without side effects while one is
    /// connecting or connected.
    pub async fn start_conversation(
        &self,
        callbacks: SessionCallbacks,
        options: SessionOptions,
    ) -> bool {
        if !self.status.try_begin_connecting() {
            warn!(status = %self.status.get(), "Conversation already in progress");
            return false;
        }

        let merged = options.merged_over(&self.defaults);
        let provider = merged.provider.unwrap_or(self.default_provider);
        let Some(client) = self.clients.get(&provider).cloned() else {
            error!(%provider, "No voice client for provider");
            self.status.set(SessionStatus::Idle);
            callbacks
                .emit_error(SessionError::InvalidConfiguration(format!(
                    "no voice client for provider {provider}"
                )))
                .await;
            return false;
        };

        info!(%provider, "Starting conversation");
        self.transcript.clear();
        *self.active.lock() = Some(client.clone());

        let started = client.start(self.wrap_callbacks(callbacks), merged).await;
        if !started {
            // Mirror whatever the client settled on
            self.status.set(client.status());
        }
        started
    }

    /// End the conversation. Safe to call in any state.
    pub async fn stop_conversation(&self) {
        let client = self.active.lock().clone();
        if let Some(client) = client {
            client.stop().await;
        }
        self.status.set(SessionStatus::Idle);
    }

    fn wrap_callbacks(&self, host: SessionCallbacks) -> SessionCallbacks {
        let status = self.status.clone();
        let transcript = self.transcript.clone();
        let host_status = host.on_status_change.clone();
        let host_message = host.on_message.clone();

        SessionCallbacks {
            on_status_change: Some(Arc::new(move |next| {
                status.set(next);
                let host_status = host_status.clone();
                Box::pin(async move {
                    if let Some(cb) = host_status {
                        cb(next).await;
                    }
                })
            })),
            on_message: Some(Arc::new(move |message| {
                transcript.apply(&message);
                let host_message = host_message.clone();
                Box::pin(async move {
                    if let Some(cb) = host_message {
                        cb(message).await;
                    }
                })
            })),
            ..host
        }
    }

    fn active_client(&self) -> Option<SharedVoiceClient> {
        self.active.lock().clone()
    }

    /// No-op when no conversation has been started yet.
    pub async fn set_muted(&self, muted: bool) -> SessionResult<()> {
        match self.active_client() {
            Some(client) => client.set_muted(muted).await,
            None => Ok(()),
        }
    }

    pub async fn toggle_mute(&self) -> SessionResult<bool> {
        match self.active_client() {
            Some(client) => client.toggle_mute().await,
            None => Ok(false),
        }
    }

    pub fn is_muted(&self) -> bool {
        self.active_client().is_some_and(|c| c.is_muted())
    }

    /// Send typed user text and echo it into the transcript.
    pub async fn send_text(&self, text: &str) -> SessionResult<()> {
        if text.trim().is_empty() {
            warn!("Cannot send empty message");
            return Ok(());
        }
        let client = self
            .active_client()
            .filter(|_| self.status.get() == SessionStatus::Connected)
            .ok_or(SessionError::NotConnected)?;

        client.send_text(text).await?;
        self.transcript
            .apply(&ConversationMessage::Simple(SimpleMessage::user(text)));
        Ok(())
    }

    /// Add user context without asking for a response.
    pub async fn create_user_message(&self, text: &str) -> SessionResult<()> {
        let client = self
            .active_client()
            .filter(|_| self.status.get() == SessionStatus::Connected)
            .ok_or(SessionError::NotConnected)?;
        client.create_user_message(text).await
    }

    pub fn status(&self) -> SessionStatus {
        self.status.get()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    pub fn transcript(&self) -> Vec<TranscriptMessage> {
        self.transcript.snapshot()
    }

    pub fn subscribe_transcript(&self) -> watch::Receiver<Vec<TranscriptMessage>> {
        self.transcript.notify.subscribe()
    }

    /// Provider of the most recently started conversation.
    pub fn active_provider(&self) -> Option<ProviderKind> {
        self.active_client().map(|c| c.provider())
    }

    pub fn client(&self, provider: ProviderKind) -> Option<SharedVoiceClient> {
        self.clients.get(&provider).cloned()
    }
}
