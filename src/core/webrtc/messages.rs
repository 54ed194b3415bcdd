//! Data-channel wire events for realtime agents.
//!
//! Every payload is a JSON object discriminated by `type`. Outbound events
//! are wrapped in an [`OutboundEvent`] envelope that carries the `event_id`.
//!
//! # Protocol Overview
//!
//! Client events (sent over the data channel):
//! - session.update - Apply prompt / language overrides
//! - conversation.item.create - Add a user message or a tool result
//! - response.create - Ask the agent to respond
//!
//! Server events (received over the data channel):
//! - error - Fatal for the session
//! - conversation.item.added / conversation.item.created
//! - conversation.item.input_audio_transcription.completed
//! - response.output_audio_transcript.delta / .done
//! - response.output_text.delta / .done
//! - response.function_call_arguments.done
//! - response.done
//!
//! Unrecognized types decode to [`ServerEvent::Unknown`] and are still
//! forwarded to the host.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

// =============================================================================
// Conversation Items
// =============================================================================

/// Conversation item, used both for outbound creates and inbound echoes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationItem {
    /// Item ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Item type (message, function_call, function_call_output)
    #[serde(rename = "type", default)]
    pub item_type: String,
    /// Item status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Role (user, assistant, system)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Content parts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Vec<ContentPart>>,
    /// Function call ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    /// Function name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Function arguments (JSON string)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
    /// Function output (JSON string)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl ConversationItem {
    /// User message with a single `input_text` part.
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            item_type: "message".to_string(),
            role: Some("user".to_string()),
            content: Some(vec![ContentPart {
                content_type: "input_text".to_string(),
                text: Some(text.into()),
                ..Default::default()
            }]),
            ..Default::default()
        }
    }

    /// Tool result correlated by `call_id`.
    pub fn function_call_output(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            item_type: "function_call_output".to_string(),
            call_id: Some(call_id.into()),
            output: Some(output.into()),
            ..Default::default()
        }
    }

    pub fn is_message_from(&self, role: &str) -> bool {
        self.item_type == "message" && self.role.as_deref() == Some(role)
    }

    /// First non-empty transcript or text among the content parts.
    pub fn primary_text(&self) -> Option<&str> {
        self.content
            .as_deref()?
            .iter()
            .find_map(ContentPart::text_or_transcript)
    }
}

/// Content part within a conversation item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentPart {
    /// Content type (input_text, input_audio, text, audio, output_text, output_audio)
    #[serde(rename = "type", default)]
    pub content_type: String,
    /// Text content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Audio content (base64 encoded)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<String>,
    /// Transcript of audio content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
}

impl ContentPart {
    fn text_or_transcript(&self) -> Option<&str> {
        self.transcript
            .as_deref()
            .filter(|t| !t.is_empty())
            .or_else(|| self.text.as_deref().filter(|t| !t.is_empty()))
    }
}

// =============================================================================
// Session / Response Configuration
// =============================================================================

/// Partial session configuration sent with `session.update`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionPatch {
    /// System instructions for the agent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    /// Input audio transcription settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<TranscriptionSettings>,
}

/// Input audio transcription settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionSettings {
    /// ISO-639-1 language hint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

/// Response configuration for `response.create`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseConfig {
    /// Per-response instructions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    /// Response modalities
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modalities: Option<Vec<String>>,
}

// =============================================================================
// Client Events (sent to the agent)
// =============================================================================

/// Client events sent over the data channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Update session configuration
    #[serde(rename = "session.update")]
    SessionUpdate {
        /// Session configuration
        session: SessionPatch,
    },

    /// Create a conversation item
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate {
        /// Item to create
        item: ConversationItem,
        /// Previous item ID to insert after
        #[serde(skip_serializing_if = "Option::is_none")]
        previous_item_id: Option<String>,
    },

    /// Create a response
    #[serde(rename = "response.create")]
    ResponseCreate {
        /// Response configuration
        #[serde(skip_serializing_if = "Option::is_none")]
        response: Option<ResponseConfig>,
    },
}

impl ClientEvent {
    pub fn item_create(item: ConversationItem) -> Self {
        ClientEvent::ConversationItemCreate {
            item,
            previous_item_id: None,
        }
    }

    /// `response.create` with no body.
    pub fn response_create() -> Self {
        ClientEvent::ResponseCreate { response: None }
    }
}

/// Envelope `{type, event_id, ...payload}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(flatten)]
    pub event: ClientEvent,
}

impl OutboundEvent {
    pub fn new(event: ClientEvent) -> Self {
        Self {
            event_id: None,
            event,
        }
    }

    pub fn with_event_id(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = Some(event_id.into());
        self
    }

    /// Assign a random `event_id` if the caller did not supply one.
    pub fn ensure_event_id(&mut self) -> &str {
        self.event_id
            .get_or_insert_with(|| Uuid::new_v4().to_string())
            .as_str()
    }

    /// Serialize, assigning an `event_id` first if needed.
    pub fn to_json(&mut self) -> serde_json::Result<String> {
        self.ensure_event_id();
        serde_json::to_string(self)
    }
}

impl From<ClientEvent> for OutboundEvent {
    fn from(event: ClientEvent) -> Self {
        OutboundEvent::new(event)
    }
}

// =============================================================================
// Server Events (received from the agent)
// =============================================================================

/// API error details.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ApiError {
    /// Error type
    #[serde(rename = "type", default)]
    pub error_type: Option<String>,
    /// Error code
    #[serde(default)]
    pub code: Option<String>,
    /// Error message
    #[serde(default)]
    pub message: Option<String>,
    /// Parameter that caused the error
    #[serde(default)]
    pub param: Option<String>,
}

/// String form of a scalar JSON field; `None` for null, absent or empty.
pub(crate) fn scalar_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

impl ApiError {
    /// Lenient decode of an `error` object: non-string scalars are
    /// stringified, anything missing stays `None`.
    pub fn from_value(raw: Option<&Value>) -> Self {
        let Some(raw) = raw else {
            return Self::default();
        };
        Self {
            error_type: scalar_text(raw.get("type")),
            code: scalar_text(raw.get("code")),
            message: scalar_text(raw.get("message")),
            param: scalar_text(raw.get("param")),
        }
    }

    pub fn describe(&self) -> String {
        match (&self.message, &self.code) {
            (Some(message), _) if !message.is_empty() => message.clone(),
            (_, Some(code)) => code.clone(),
            _ => "Unknown error".to_string(),
        }
    }
}

/// Completed response carried by `response.done`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ResponseSummary {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub output: Vec<ConversationItem>,
}

/// Server events received over the data channel.
///
/// Fields are lenient: a known `type` with missing fields still decodes.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Error occurred
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        error: ApiError,
    },

    /// Session created
    #[serde(rename = "session.created")]
    SessionCreated {
        #[serde(default)]
        session: Value,
    },

    /// Session updated
    #[serde(rename = "session.updated")]
    SessionUpdated {
        #[serde(default)]
        session: Value,
    },

    /// Item appended to the conversation
    #[serde(rename = "conversation.item.added")]
    ConversationItemAdded {
        #[serde(default)]
        item: ConversationItem,
    },

    /// Item created in the conversation
    #[serde(rename = "conversation.item.created")]
    ConversationItemCreated {
        #[serde(default)]
        item: ConversationItem,
    },

    /// User speech transcription completed
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    InputTranscriptionCompleted {
        #[serde(default)]
        item_id: Option<String>,
        #[serde(default)]
        transcript: String,
    },

    /// Assistant audio transcript chunk
    #[serde(
        rename = "response.output_audio_transcript.delta",
        alias = "response.audio_transcript.delta"
    )]
    AudioTranscriptDelta {
        #[serde(default)]
        item_id: Option<String>,
        #[serde(default)]
        delta: String,
    },

    /// Assistant audio transcript complete
    #[serde(
        rename = "response.output_audio_transcript.done",
        alias = "response.audio_transcript.done"
    )]
    AudioTranscriptDone {
        #[serde(default)]
        item_id: Option<String>,
        #[serde(default)]
        transcript: Option<String>,
    },

    /// Assistant text chunk
    #[serde(rename = "response.output_text.delta", alias = "response.text.delta")]
    TextDelta {
        #[serde(default)]
        item_id: Option<String>,
        #[serde(default)]
        delta: String,
    },

    /// Assistant text complete
    #[serde(rename = "response.output_text.done", alias = "response.text.done")]
    TextDone {
        #[serde(default)]
        item_id: Option<String>,
        #[serde(default)]
        text: Option<String>,
    },

    /// Function call arguments complete
    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallArgumentsDone {
        #[serde(default)]
        call_id: Option<String>,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        arguments: Option<String>,
        #[serde(default)]
        item_id: Option<String>,
    },

    /// Response complete
    #[serde(rename = "response.done")]
    ResponseDone {
        #[serde(default)]
        response: ResponseSummary,
    },

    /// Speech started (VAD detected speech)
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted {
        #[serde(default)]
        item_id: Option<String>,
    },

    /// Speech stopped (VAD detected silence)
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped {
        #[serde(default)]
        item_id: Option<String>,
    },

    /// Any other event type
    #[serde(other)]
    Unknown,
}

/// Wire `type` discriminant of an inbound payload.
pub fn event_type(raw: &Value) -> Option<&str> {
    raw.get("type").and_then(serde_json::Value::as_str)
}

impl ServerEvent {
    pub const ERROR: &'static str = "error";
    pub const FUNCTION_CALL_ARGUMENTS_DONE: &'static str = "response.function_call_arguments.done";

    /// Decode a JSON value. Values that do not decode become `Unknown`.
    pub fn from_value(raw: &Value) -> Self {
        match ServerEvent::deserialize(raw) {
            Ok(event) => event,
            Err(e) => {
                debug!(
                    event_type = event_type(raw).unwrap_or("<none>"),
                    "Treating undecodable server event as unknown: {e}"
                );
                ServerEvent::Unknown
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_user_text_item_create_shape() {
        let mut event = OutboundEvent::new(ClientEvent::item_create(ConversationItem::user_text(
            "Hello",
        )))
        .with_event_id("evt_1");
        let value: Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();

        assert_eq!(
            value,
            json!({
                "type": "conversation.item.create",
                "event_id": "evt_1",
                "item": {
                    "type": "message",
                    "role": "user",
                    "content": [{"type": "input_text", "text": "Hello"}]
                }
            })
        );
    }

    #[test]
    fn test_response_create_has_no_body() {
        let mut event = OutboundEvent::new(ClientEvent::response_create());
        let value: Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "response.create");
        assert!(value.get("response").is_none());
    }

    #[test]
    fn test_event_id_is_generated_when_absent() {
        let mut event = OutboundEvent::new(ClientEvent::response_create());
        let id = event.ensure_event_id().to_string();
        assert!(Uuid::parse_str(&id).is_ok());
        // Stable once assigned
        assert_eq!(event.ensure_event_id(), id);
    }

    #[test]
    fn test_function_call_output_shape() {
        let mut event = OutboundEvent::new(ClientEvent::item_create(
            ConversationItem::function_call_output("call_9", r#"{"ok":true}"#),
        ));
        let value: Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(value["item"]["type"], "function_call_output");
        assert_eq!(value["item"]["call_id"], "call_9");
        assert_eq!(value["item"]["output"], r#"{"ok":true}"#);
    }

    #[test]
    fn test_deserialize_error_event() {
        let event = ServerEvent::from_value(&json!({
            "type": "error",
            "error": {"type": "invalid_request_error", "message": "Test error"}
        }));
        match event {
            ServerEvent::Error { error } => assert_eq!(error.describe(), "Test error"),
            other => panic!("Wrong event type: {other:?}"),
        }
    }

    #[test]
    fn test_legacy_transcript_delta_alias() {
        let current = ServerEvent::from_value(&json!({
            "type": "response.output_audio_transcript.delta", "delta": "Hi"
        }));
        let legacy = ServerEvent::from_value(&json!({
            "type": "response.audio_transcript.delta", "delta": "Hi"
        }));
        assert_eq!(current, legacy);
    }

    #[test]
    fn test_function_call_missing_fields_still_decodes() {
        let event = ServerEvent::from_value(&json!({
            "type": "response.function_call_arguments.done",
            "call_id": "call_1"
        }));
        match event {
            ServerEvent::FunctionCallArgumentsDone {
                call_id,
                name,
                arguments,
                ..
            } => {
                assert_eq!(call_id.as_deref(), Some("call_1"));
                assert!(name.is_none());
                assert!(arguments.is_none());
            }
            other => panic!("Wrong event type: {other:?}"),
        }
    }

    #[test]
    fn test_api_error_from_loose_value() {
        let error = ApiError::from_value(Some(&json!({"code": 500, "message": ""})));
        assert_eq!(error.code.as_deref(), Some("500"));
        assert!(error.message.is_none());
        assert_eq!(error.describe(), "500");

        assert_eq!(ApiError::from_value(None).describe(), "Unknown error");
        assert_eq!(
            ApiError::from_value(Some(&json!({"message": "Rate limited", "param": null})))
                .describe(),
            "Rate limited"
        );
        assert_eq!(event_type(&json!({"type": "error"})), Some(ServerEvent::ERROR));
        assert_eq!(event_type(&json!({"type": 3})), None);
    }

    #[test]
    fn test_unknown_event_type() {
        let event = ServerEvent::from_value(&json!({"type": "rate_limits.updated"}));
        assert_eq!(event, ServerEvent::Unknown);
        let event = ServerEvent::from_value(&json!({"no_type": true}));
        assert_eq!(event, ServerEvent::Unknown);
    }

    #[test]
    fn test_primary_text_prefers_transcript() {
        let item: ConversationItem = serde_json::from_value(json!({
            "type": "message",
            "role": "user",
            "content": [
                {"type": "input_audio", "transcript": ""},
                {"type": "input_audio", "transcript": "spoken words"}
            ]
        }))
        .unwrap();
        assert!(item.is_message_from("user"));
        assert_eq!(item.primary_text(), Some("spoken words"));
    }

    #[test]
    fn test_response_done_outputs() {
        let event = ServerEvent::from_value(&json!({
            "type": "response.done",
            "response": {
                "id": "resp_1",
                "status": "completed",
                "output": [{
                    "type": "message",
                    "role": "assistant",
                    "content": [{"type": "output_audio", "transcript": "Hi there"}]
                }]
            }
        }));
        match event {
            ServerEvent::ResponseDone { response } => {
                assert_eq!(response.output.len(), 1);
                assert_eq!(response.output[0].primary_text(), Some("Hi there"));
            }
            other => panic!("Wrong event type: {other:?}"),
        }
    }
}
