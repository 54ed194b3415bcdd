//! Base traits and types for voice session transports.
//!
//! This module defines the provider-agnostic contract a host uses to drive a
//! voice conversation with a remote agent: lifecycle (`start`/`stop`), mute,
//! typed text input and the normalized callback surface.
//!
//! # Supported Providers
//!
//! - OpenAI-compatible realtime agents reached over WebRTC
//! - ElevenLabs conversational agents, consumed as an opaque capability

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::debug;

use crate::core::webrtc::messages::ServerEvent;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during a voice session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Microphone could not be acquired
    #[error("Media access failed: {0}")]
    MediaAccess(String),

    /// Peer connection construction or negotiation failed
    #[error("Peer connection failed: {0}")]
    PeerConnection(String),

    /// SDP exchange with the signaling backend failed
    #[error("Signaling failed: {0}")]
    Signaling(String),

    /// Data channel reported an error
    #[error("Data channel error: {0}")]
    DataChannel(String),

    /// Remote agent reported an error event
    #[error("Provider error: {0}")]
    Provider(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Not connected
    #[error("Not connected")]
    NotConnected,

    /// Operation not offered by this provider
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A newer start or an explicit stop replaced this attempt
    #[error("Session attempt superseded")]
    Superseded,
}

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

// =============================================================================
// Status
// =============================================================================

/// Connection status of a voice session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// No session, or the last one has been torn down
    #[default]
    Idle,
    /// Setup in progress
    Connecting,
    /// Data path open
    Connected,
    /// Failure observed, teardown pending
    Error,
}

impl SessionStatus {
    /// Whether a new start must be refused in this state.
    pub fn is_active(&self) -> bool {
        matches!(self, SessionStatus::Connecting | SessionStatus::Connected)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Idle => write!(f, "idle"),
            SessionStatus::Connecting => write!(f, "connecting"),
            SessionStatus::Connected => write!(f, "connected"),
            SessionStatus::Error => write!(f, "error"),
        }
    }
}

// =============================================================================
// Provider Selection
// =============================================================================

/// Which transport implementation owns a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Realtime agent over WebRTC + data channel
    OpenAi,
    /// ElevenLabs conversational agent
    ElevenLabs,
}

impl ProviderKind {
    /// Parse provider from string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "openai" | "open_ai" | "openai-realtime" | "realtime" => Some(ProviderKind::OpenAi),
            "elevenlabs" | "eleven_labs" | "eleven-labs" | "11labs" => {
                Some(ProviderKind::ElevenLabs)
            }
            _ => None,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::OpenAi => write!(f, "openai"),
            ProviderKind::ElevenLabs => write!(f, "elevenlabs"),
        }
    }
}

// =============================================================================
// Session Options
// =============================================================================

/// Per-start overrides. Absent fields fall back to the agent defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionOptions {
    /// Conversation language (e.g. "en", "es")
    #[serde(default)]
    pub language: Option<String>,

    /// System prompt override
    #[serde(default)]
    pub prompt: Option<String>,

    /// Opening line the agent should speak first
    #[serde(default)]
    pub first_message: Option<String>,

    /// Provider override
    #[serde(default)]
    pub provider: Option<ProviderKind>,
}

impl SessionOptions {
    /// Overlay these options on `defaults`; fields set here win.
    pub fn merged_over(&self, defaults: &SessionOptions) -> SessionOptions {
        SessionOptions {
            language: self.language.clone().or_else(|| defaults.language.clone()),
            prompt: self.prompt.clone().or_else(|| defaults.prompt.clone()),
            first_message: self
                .first_message
                .clone()
                .or_else(|| defaults.first_message.clone()),
            provider: self.provider.or(defaults.provider),
        }
    }
}

// =============================================================================
// Callback Payloads
// =============================================================================

/// Simple `{source, message}` event emitted by replay-prone providers and by
/// local echo of typed text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimpleMessage {
    /// "ai" for the agent, anything else for the user
    pub source: String,
    /// Message text
    pub message: String,
}

impl SimpleMessage {
    pub fn user(message: impl Into<String>) -> Self {
        Self {
            source: "user".to_string(),
            message: message.into(),
        }
    }

    pub fn ai(message: impl Into<String>) -> Self {
        Self {
            source: "ai".to_string(),
            message: message.into(),
        }
    }
}

/// Normalized inbound event handed to the host and the transcript.
#[derive(Debug, Clone)]
pub enum ConversationMessage {
    /// Data-channel wire event; `raw` is forwarded verbatim
    Realtime { event: ServerEvent, raw: Value },
    /// Untyped `{source, message}` event
    Simple(SimpleMessage),
}

impl ConversationMessage {
    /// Build from a decoded data-channel payload.
    pub fn from_wire(raw: Value) -> Self {
        let event = ServerEvent::from_value(&raw);
        ConversationMessage::Realtime { event, raw }
    }

    /// Build from an arbitrary JSON value: objects without a `type`
    /// discriminant but with `source`/`message` become simple messages.
    pub fn from_value(raw: Value) -> Self {
        if raw.get("type").is_none() {
            if let Ok(simple) = serde_json::from_value::<SimpleMessage>(raw.clone()) {
                return ConversationMessage::Simple(simple);
            }
        }
        Self::from_wire(raw)
    }

    /// Wire `type` of a realtime event, `None` for simple messages.
    pub fn event_type(&self) -> Option<&str> {
        match self {
            ConversationMessage::Realtime { raw, .. } => raw.get("type").and_then(Value::as_str),
            ConversationMessage::Simple(_) => None,
        }
    }
}

/// Tool invocation observed on the wire, reported to the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallNotice {
    /// Tool name
    pub name: String,
    /// Parsed arguments
    pub arguments: Value,
    /// Tool result, when the provider reports one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

// =============================================================================
// Callback Types
// =============================================================================

/// Callback type for connect events.
pub type ConnectCallback = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Callback type for disconnect events.
pub type DisconnectCallback =
    Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Callback type for session errors.
pub type SessionErrorCallback =
    Arc<dyn Fn(SessionError) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Callback type for status transitions.
pub type StatusChangeCallback =
    Arc<dyn Fn(SessionStatus) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Callback type for observed tool calls.
pub type ToolCallCallback =
    Arc<dyn Fn(ToolCallNotice) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Callback type for inbound conversation events.
pub type MessageCallback =
    Arc<dyn Fn(ConversationMessage) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Host handlers captured at `start` and held for that attempt only.
///
/// Every handler is optional.
#[derive(Clone, Default)]
pub struct SessionCallbacks {
    pub on_connect: Option<ConnectCallback>,
    pub on_disconnect: Option<DisconnectCallback>,
    pub on_error: Option<SessionErrorCallback>,
    pub on_status_change: Option<StatusChangeCallback>,
    pub on_tool_call: Option<ToolCallCallback>,
    pub on_message: Option<MessageCallback>,
}

impl fmt::Debug for SessionCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCallbacks")
            .field("on_connect", &self.on_connect.is_some())
            .field("on_disconnect", &self.on_disconnect.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_status_change", &self.on_status_change.is_some())
            .field("on_tool_call", &self.on_tool_call.is_some())
            .field("on_message", &self.on_message.is_some())
            .finish()
    }
}

impl SessionCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_connect<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_connect = Some(Arc::new(move || Box::pin(f())));
        self
    }

    pub fn on_disconnect<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_disconnect = Some(Arc::new(move || Box::pin(f())));
        self
    }

    pub fn on_error<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(SessionError) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_error = Some(Arc::new(move |e| Box::pin(f(e))));
        self
    }

    pub fn on_status_change<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(SessionStatus) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_status_change = Some(Arc::new(move |s| Box::pin(f(s))));
        self
    }

    pub fn on_tool_call<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(ToolCallNotice) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_tool_call = Some(Arc::new(move |n| Box::pin(f(n))));
        self
    }

    pub fn on_message<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(ConversationMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.on_message = Some(Arc::new(move |m| Box::pin(f(m))));
        self
    }

    pub(crate) async fn emit_connect(&self) {
        if let Some(cb) = &self.on_connect {
            cb().await;
        }
    }

    pub(crate) async fn emit_disconnect(&self) {
        if let Some(cb) = &self.on_disconnect {
            cb().await;
        }
    }

    pub(crate) async fn emit_error(&self, error: SessionError) {
        if let Some(cb) = &self.on_error {
            cb(error).await;
        }
    }

    pub(crate) async fn emit_status(&self, status: SessionStatus) {
        if let Some(cb) = &self.on_status_change {
            cb(status).await;
        }
    }

    pub(crate) async fn emit_message(&self, message: ConversationMessage) {
        if let Some(cb) = &self.on_message {
            cb(message).await;
        }
    }

    /// Tool observation is fire-and-forget.
    pub(crate) fn emit_tool_call(&self, notice: ToolCallNotice) {
        if let Some(cb) = self.on_tool_call.clone() {
            debug!(tool = %notice.name, "Notifying host of tool call");
            tokio::spawn(async move { cb(notice).await });
        }
    }
}

// =============================================================================
// Base Trait
// =============================================================================

/// Uniform session contract implemented by every provider transport.
///
/// # Example
///
/// ```rust,ignore
/// use waav_voice_client::core::session::{SessionCallbacks, SessionOptions, VoiceClient};
///
/// let callbacks = SessionCallbacks::new()
///     .on_connect(|| async { println!("connected") })
///     .on_message(|m| async move { println!("{:?}", m.event_type()) });
///
/// if client.start(callbacks, SessionOptions::default()).await {
///     client.send_text("Hello!").await?;
/// }
/// client.stop().await;
/// ```
#[async_trait]
pub trait VoiceClient: Send + Sync {
    /// Which provider this client talks to.
    fn provider(&self) -> ProviderKind;

    /// Begin a session attempt. Returns `false` on failure; the failure has
    /// already been reported through `on_error` by then.
    async fn start(&self, callbacks: SessionCallbacks, options: SessionOptions) -> bool;

    /// End the current session. Safe to call in any state.
    async fn stop(&self);

    /// Authoritative status, read synchronously.
    fn status(&self) -> SessionStatus;

    /// Status notifications for observers.
    fn subscribe_status(&self) -> watch::Receiver<SessionStatus>;

    /// Enable or disable outbound audio without touching connection state.
    async fn set_muted(&self, _muted: bool) -> SessionResult<()> {
        Err(SessionError::Unsupported(format!(
            "mute is not available for {}",
            self.provider()
        )))
    }

    /// Current mute flag.
    fn is_muted(&self) -> bool {
        false
    }

    /// Flip the mute flag and return the new value.
    async fn toggle_mute(&self) -> SessionResult<bool> {
        let next = !self.is_muted();
        self.set_muted(next).await?;
        Ok(next)
    }

    /// Send user text and ask the agent to respond.
    async fn send_text(&self, _text: &str) -> SessionResult<()> {
        Err(SessionError::Unsupported(format!(
            "text input is not available for {}",
            self.provider()
        )))
    }

    /// Inject user text as context without requesting a response.
    async fn create_user_message(&self, _text: &str) -> SessionResult<()> {
        Err(SessionError::Unsupported(format!(
            "context messages are not available for {}",
            self.provider()
        )))
    }
}

/// Shared trait object for voice clients.
pub type SharedVoiceClient = Arc<dyn VoiceClient>;
