//! SDK-owned provider sessions driven through ExternalVoiceClient.

mod mock_rtc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use mock_rtc::{Recorder, wait_until};
use waav_voice_client::core::session::{
    ConversationProvider, ExternalEvents, ExternalSessionRequest, ExternalVoiceClient,
    ProviderKind, SessionError, SessionOptions, SessionResult, SessionStatus, SimpleMessage,
    VoiceClient, VoiceSession,
};
use waav_voice_client::core::tools::ToolRegistry;
use waav_voice_client::core::transcript::{TranscriptMessage, TranscriptRole};

#[derive(Default)]
struct ScriptedProvider {
    requests: Mutex<Vec<ExternalSessionRequest>>,
    events: Mutex<Option<ExternalEvents>>,
    start_failure: Mutex<Option<String>>,
    connect_on_start: AtomicBool,
    ended: AtomicUsize,
    texts: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    fn connecting() -> Self {
        let provider = Self::default();
        provider.connect_on_start.store(true, Ordering::SeqCst);
        provider
    }

    fn events(&self) -> ExternalEvents {
        self.events.lock().clone().unwrap()
    }

    fn ended(&self) -> usize {
        self.ended.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConversationProvider for ScriptedProvider {
    async fn start_session(
        &self,
        request: ExternalSessionRequest,
        events: ExternalEvents,
    ) -> SessionResult<()> {
        self.requests.lock().push(request);
        *self.events.lock() = Some(events.clone());
        if let Some(message) = self.start_failure.lock().clone() {
            return Err(SessionError::Provider(message));
        }
        if self.connect_on_start.load(Ordering::SeqCst) {
            events.connected().await;
        }
        Ok(())
    }

    async fn end_session(&self) -> SessionResult<()> {
        self.ended.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn status(&self) -> SessionStatus {
        match self.events.lock().as_ref() {
            Some(events) if events.is_active() => SessionStatus::Connected,
            _ => SessionStatus::Idle,
        }
    }

    async fn send_text(&self, text: &str) -> SessionResult<()> {
        self.texts.lock().push(text.to_string());
        Ok(())
    }
}

fn tools() -> ToolRegistry {
    ToolRegistry::new().with_tool("lookup_order", |args| async move {
        let id = args["order_id"].as_str().unwrap_or_default().to_string();
        Ok::<_, anyhow::Error>(json!({ "success": true, "order_id": id, "state": "shipped" }))
    })
}

fn client(provider: &Arc<ScriptedProvider>) -> ExternalVoiceClient {
    ExternalVoiceClient::new(provider.clone(), "agent-7", tools())
}

#[tokio::test]
async fn test_connect_message_disconnect() {
    let provider = Arc::new(ScriptedProvider::default());
    let client = client(&provider);
    let recorder = Recorder::default();
    let options = SessionOptions {
        language: Some("es".to_string()),
        ..Default::default()
    };

    assert!(client.start(recorder.callbacks(), options).await);
    assert_eq!(client.status(), SessionStatus::Connecting);
    assert_eq!(client.provider(), ProviderKind::ElevenLabs);

    let request = provider.requests.lock()[0].clone();
    assert_eq!(request.agent_id, "agent-7");
    assert_eq!(request.options.language.as_deref(), Some("es"));
    assert_eq!(request.tools, vec!["lookup_order"]);

    let events = provider.events();
    events.connected().await;
    assert_eq!(client.status(), SessionStatus::Connected);
    assert_eq!(client.provider_status(), SessionStatus::Connected);

    events.message(SimpleMessage::ai("Hola")).await;
    events.raw_message(json!({"type": "agent_response", "text": "Hola"})).await;
    assert_eq!(recorder.message_types(), vec!["simple", "agent_response"]);

    events.disconnected().await;
    assert_eq!(client.status(), SessionStatus::Idle);
    assert_eq!(
        recorder.events(),
        vec![
            "status:connecting",
            "status:connected",
            "connect",
            "disconnect",
            "status:idle"
        ]
    );

    // Already ended; reports are ignored
    events.disconnected().await;
    assert_eq!(recorder.count("disconnect"), 1);
}

#[tokio::test]
async fn test_start_failure_reports_and_cleans_up() {
    let provider = Arc::new(ScriptedProvider::default());
    *provider.start_failure.lock() = Some("quota exceeded".to_string());
    let client = client(&provider);
    let recorder = Recorder::default();

    assert!(!client.start(recorder.callbacks(), SessionOptions::default()).await);
    assert_eq!(client.status(), SessionStatus::Idle);
    assert_eq!(
        recorder.events(),
        vec!["status:connecting", "status:error", "error", "status:idle"]
    );
    assert_eq!(
        recorder.errors(),
        vec![SessionError::Provider("quota exceeded".to_string())]
    );
    assert_eq!(provider.ended(), 1);
}

#[tokio::test]
async fn test_provider_error_event_ends_session() {
    let provider = Arc::new(ScriptedProvider::connecting());
    let client = client(&provider);
    let recorder = Recorder::default();

    assert!(client.start(recorder.callbacks(), SessionOptions::default()).await);
    assert_eq!(client.status(), SessionStatus::Connected);

    provider.events().error("socket dropped").await;
    assert_eq!(client.status(), SessionStatus::Idle);
    assert_eq!(recorder.count("error"), 1);
    assert_eq!(provider.ended(), 1);
    assert!(!provider.events().is_active());
}

#[tokio::test]
async fn test_call_tool_uses_host_registry() {
    let provider = Arc::new(ScriptedProvider::connecting());
    let client = client(&provider);
    let recorder = Recorder::default();
    assert!(client.start(recorder.callbacks(), SessionOptions::default()).await);

    let events = provider.events();
    let result = events
        .call_tool("lookup_order", json!({"order_id": "A-17"}))
        .await;
    assert_eq!(
        result,
        json!({"success": true, "order_id": "A-17", "state": "shipped"})
    );

    let missing = events.call_tool("cancel_order", json!({})).await;
    assert_eq!(
        missing,
        json!({"success": false, "error": "Tool cancel_order not found"})
    );

    assert!(wait_until(|| recorder.tool_calls() == 2).await);
}

#[tokio::test]
async fn test_reports_after_stop_are_ignored() {
    let provider = Arc::new(ScriptedProvider::connecting());
    let client = client(&provider);
    let recorder = Recorder::default();
    assert!(client.start(recorder.callbacks(), SessionOptions::default()).await);
    let stale = provider.events();

    client.stop().await;
    assert_eq!(client.status(), SessionStatus::Idle);
    assert_eq!(provider.ended(), 1);
    let before = recorder.events();

    stale.connected().await;
    stale.message(SimpleMessage::ai("late")).await;
    stale.error("late failure").await;
    assert_eq!(client.status(), SessionStatus::Idle);
    assert_eq!(recorder.events(), before);
    assert!(recorder.messages().is_empty());

    let result = stale.call_tool("lookup_order", json!({"order_id": "x"})).await;
    assert_eq!(result["success"], false);
}

#[tokio::test]
async fn test_restart_supersedes_previous_attempt() {
    let provider = Arc::new(ScriptedProvider::default());
    let client = client(&provider);
    let first = Recorder::default();
    let second = Recorder::default();

    assert!(client.start(first.callbacks(), SessionOptions::default()).await);
    let old = provider.events();
    assert!(client.start(second.callbacks(), SessionOptions::default()).await);
    assert_eq!(provider.ended(), 1);

    old.connected().await;
    assert_eq!(client.status(), SessionStatus::Connecting);
    assert_eq!(first.count("connect"), 0);

    provider.events().connected().await;
    assert_eq!(client.status(), SessionStatus::Connected);
    assert_eq!(second.count("connect"), 1);
}

#[tokio::test]
async fn test_mute_and_text_defaults() {
    let provider = Arc::new(ScriptedProvider::connecting());
    let client = client(&provider);

    // Provider without mute support
    let err = client.set_muted(true).await.unwrap_err();
    assert!(matches!(err, SessionError::Unsupported(_)));
    assert!(!client.is_muted());

    assert_eq!(
        client.send_text("hi").await.unwrap_err(),
        SessionError::NotConnected
    );
    assert!(client.start(Recorder::default().callbacks(), SessionOptions::default()).await);
    client.send_text("hi").await.unwrap();
    assert_eq!(*provider.texts.lock(), vec!["hi"]);
}

#[tokio::test]
async fn test_facade_transcript_from_simple_messages() {
    let provider = Arc::new(ScriptedProvider::connecting());
    let session = VoiceSession::builder()
        .client(Arc::new(client(&provider)))
        .build()
        .unwrap();
    let recorder = Recorder::default();

    assert!(session
        .start_conversation(recorder.callbacks(), SessionOptions::default())
        .await);
    assert_eq!(session.status(), SessionStatus::Connected);
    assert_eq!(session.active_provider(), Some(ProviderKind::ElevenLabs));

    let events = provider.events();
    events.message(SimpleMessage::ai("How can I help?")).await;
    session.send_text("Where is my order?").await.unwrap();
    // Provider echoes the typed text back
    events.message(SimpleMessage::user("Where is my order?")).await;
    events.message(SimpleMessage::ai("It shipped today.")).await;

    assert_eq!(
        session.transcript(),
        vec![
            TranscriptMessage::sealed(TranscriptRole::Assistant, "How can I help?"),
            TranscriptMessage::sealed(TranscriptRole::User, "Where is my order?"),
            TranscriptMessage::sealed(TranscriptRole::Assistant, "It shipped today."),
        ]
    );

    session.stop_conversation().await;
    assert_eq!(session.status(), SessionStatus::Idle);
    assert_eq!(recorder.count("disconnect"), 1);
}
