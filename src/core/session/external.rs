//! Adapter for providers whose transport is owned by a third-party SDK.
//!
//! The provider is only driven through `start_session`/`end_session` and
//! reports back through [`ExternalEvents`]. The adapter maps those reports
//! onto the same status machine and callback surface the WebRTC client uses.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::base::{
    ConversationMessage, ProviderKind, SessionCallbacks, SessionError, SessionOptions,
    SessionResult, SessionStatus, SimpleMessage, VoiceClient,
};
use super::context::{ContextSlot, SessionContext};
use super::status::StatusCell;
use crate::core::tools::{ToolCallRequest, ToolDispatcher, ToolOutputSink, ToolRegistry};

/// Everything an external provider needs to open a conversation.
#[derive(Debug, Clone)]
pub struct ExternalSessionRequest {
    pub agent_id: String,
    /// Merged options, passed through verbatim
    pub options: SessionOptions,
    /// Names of the host tools reachable via [`ExternalEvents::call_tool`]
    pub tools: Vec<String>,
}

/// Opaque conversation capability.
#[async_trait]
pub trait ConversationProvider: Send + Sync {
    async fn start_session(
        &self,
        request: ExternalSessionRequest,
        events: ExternalEvents,
    ) -> SessionResult<()>;

    async fn end_session(&self) -> SessionResult<()>;

    /// Provider-reported status.
    fn status(&self) -> SessionStatus;

    async fn set_muted(&self, _muted: bool) -> SessionResult<()> {
        Err(SessionError::Unsupported(
            "provider does not support mute".to_string(),
        ))
    }

    async fn send_text(&self, _text: &str) -> SessionResult<()> {
        Err(SessionError::Unsupported(
            "provider does not support text input".to_string(),
        ))
    }
}

struct ExternalInner {
    provider: Arc<dyn ConversationProvider>,
    agent_id: String,
    dispatcher: ToolDispatcher,
    status: StatusCell,
    muted: AtomicBool,
    contexts: ContextSlot,
}

impl ExternalInner {
    async fn transition(&self, ctx: &SessionContext, status: SessionStatus) {
        if self.status.set(status) {
            ctx.callbacks().emit_status(status).await;
        }
    }

    async fn end_provider_session(&self) {
        self.muted.store(false, Ordering::SeqCst);
        if let Err(e) = self.provider.end_session().await {
            warn!("Failed to end provider session: {}", e);
        }
    }

    async fn fail(&self, generation: u64, error: SessionError) {
        let Some(ctx) = self.contexts.end_if_current(generation) else {
            debug!("Ignoring provider error from ended session: {}", error);
            return;
        };
        error!("Provider session error: {}", error);
        self.transition(&ctx, SessionStatus::Error).await;
        ctx.notify_error(error).await;
        self.end_provider_session().await;
        self.transition(&ctx, SessionStatus::Idle).await;
    }
}

/// Event handle given to the provider for one attempt. Reports from an
/// attempt that has since been stopped or replaced are ignored.
#[derive(Clone)]
pub struct ExternalEvents {
    inner: Weak<ExternalInner>,
    generation: u64,
}

impl std::fmt::Debug for ExternalEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalEvents")
            .field("generation", &self.generation)
            .finish()
    }
}

impl ExternalEvents {
    fn live(&self) -> Option<(Arc<ExternalInner>, Arc<SessionContext>)> {
        let inner = self.inner.upgrade()?;
        let ctx = inner.contexts.current_for(self.generation)?;
        Some((inner, ctx))
    }

    /// Whether this attempt is still the live one.
    pub fn is_active(&self) -> bool {
        self.live().is_some()
    }

    pub async fn connected(&self) {
        let Some((inner, ctx)) = self.live() else {
            return;
        };
        info!("Provider session connected");
        inner.transition(&ctx, SessionStatus::Connected).await;
        ctx.notify_connect().await;
    }

    pub async fn disconnected(&self) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let Some(ctx) = inner.contexts.end_if_current(self.generation) else {
            return;
        };
        info!("Provider session disconnected");
        inner.muted.store(false, Ordering::SeqCst);
        ctx.notify_disconnect().await;
        inner.transition(&ctx, SessionStatus::Idle).await;
    }

    pub async fn error(&self, message: impl Into<String>) {
        if let Some(inner) = self.inner.upgrade() {
            inner
                .fail(self.generation, SessionError::Provider(message.into()))
                .await;
        }
    }

    pub async fn message(&self, message: SimpleMessage) {
        self.forward(ConversationMessage::Simple(message)).await;
    }

    /// Forward an arbitrary provider payload.
    pub async fn raw_message(&self, raw: Value) {
        self.forward(ConversationMessage::from_value(raw)).await;
    }

    async fn forward(&self, message: ConversationMessage) {
        let Some((inner, ctx)) = self.live() else {
            debug!("Dropping provider message for ended session");
            return;
        };
        if inner.status.get() == SessionStatus::Idle {
            return;
        }
        ctx.callbacks().emit_message(message).await;
    }

    /// Run a host tool with the same error semantics as wire tool calls.
    /// Returns the tool's result or a `{success:false, error}` payload.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Value {
        let Some((inner, ctx)) = self.live() else {
            return json!({ "success": false, "error": "Session ended" });
        };

        let call_id = format!("ext_{}", uuid::Uuid::new_v4());
        let request = ToolCallRequest {
            call_id: Some(call_id),
            name: Some(name.to_string()),
            arguments: Some(arguments.to_string()),
        };
        let capture = CapturedOutput::default();
        inner
            .dispatcher
            .handle(request, ctx.callbacks(), &capture)
            .await;

        let output = capture.output.lock().take();
        output
            .and_then(|text| serde_json::from_str(&text).ok())
            .unwrap_or_else(|| json!({ "success": false, "error": format!("Tool {name} returned no result") }))
    }
}

#[derive(Default)]
struct CapturedOutput {
    output: Mutex<Option<String>>,
}

#[async_trait]
impl ToolOutputSink for CapturedOutput {
    async fn send_tool_output(&self, _call_id: &str, output: String) {
        *self.output.lock() = Some(output);
    }
}

/// [`VoiceClient`] over a [`ConversationProvider`].
pub struct ExternalVoiceClient {
    inner: Arc<ExternalInner>,
}

impl ExternalVoiceClient {
    pub fn new(
        provider: Arc<dyn ConversationProvider>,
        agent_id: impl Into<String>,
        tools: ToolRegistry,
    ) -> Self {
        Self {
            inner: Arc::new(ExternalInner {
                provider,
                agent_id: agent_id.into(),
                dispatcher: ToolDispatcher::new(tools),
                status: StatusCell::new(),
                muted: AtomicBool::new(false),
                contexts: ContextSlot::new(),
            }),
        }
    }

    /// Status as reported by the provider itself.
    pub fn provider_status(&self) -> SessionStatus {
        self.inner.provider.status()
    }
}

#[async_trait]
impl VoiceClient for ExternalVoiceClient {
    fn provider(&self) -> ProviderKind {
        ProviderKind::ElevenLabs
    }

    async fn start(&self, callbacks: SessionCallbacks, options: SessionOptions) -> bool {
        let inner = &self.inner;
        if inner.contexts.end().is_some() {
            info!("Ending previous provider session before starting");
            inner.end_provider_session().await;
        }

        let ctx = inner.contexts.begin(callbacks, options);
        let generation = ctx.generation();
        info!(generation, agent_id = %inner.agent_id, "Starting provider session");
        inner.transition(&ctx, SessionStatus::Connecting).await;

        let request = ExternalSessionRequest {
            agent_id: inner.agent_id.clone(),
            options: ctx.options().clone(),
            tools: inner.dispatcher.registry().names(),
        };
        let events = ExternalEvents {
            inner: Arc::downgrade(inner),
            generation,
        };

        match inner.provider.start_session(request, events).await {
            Ok(()) => inner.contexts.is_current(generation),
            Err(e) => {
                inner.fail(generation, e).await;
                false
            }
        }
    }

    async fn stop(&self) {
        let inner = &self.inner;
        let ctx = inner.contexts.end();
        inner.end_provider_session().await;

        match ctx {
            Some(ctx) => {
                info!("Provider session stopped");
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
        self.inner.provider.set_muted(muted).await?;
        self.inner.muted.store(muted, Ordering::SeqCst);
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
        if !self.inner.status.get().is_active() {
            return Err(SessionError::NotConnected);
        }
        self.inner.provider.send_text(text).await
    }
}
