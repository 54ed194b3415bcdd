//! Transcript assembly from heterogeneous provider events.
//!
//! Events are applied strictly in arrival order. The list is append-only
//! except for the trailing message, which accumulates deltas while
//! `streaming` is set and is sealed by a completion event. At most one
//! message is streaming, and it is always the last one.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::trace;

use crate::core::session::{ConversationMessage, SimpleMessage};
use crate::core::webrtc::messages::{ConversationItem, ServerEvent};

/// Speaker of a transcript message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptRole {
    User,
    Assistant,
}

impl TranscriptRole {
    /// Simple-event sources: "ai" is the agent, everything else is the user.
    pub fn from_source(source: &str) -> Self {
        if source == "ai" {
            TranscriptRole::Assistant
        } else {
            TranscriptRole::User
        }
    }
}

impl fmt::Display for TranscriptRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranscriptRole::User => write!(f, "user"),
            TranscriptRole::Assistant => write!(f, "assistant"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptMessage {
    pub role: TranscriptRole,
    pub content: String,
    pub streaming: bool,
}

impl TranscriptMessage {
    pub fn sealed(role: TranscriptRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            streaming: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TranscriptAssembler {
    messages: Vec<TranscriptMessage>,
}

impl TranscriptAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[TranscriptMessage] {
        &self.messages
    }

    pub fn snapshot(&self) -> Vec<TranscriptMessage> {
        self.messages.clone()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// Apply one event. Returns `true` if the transcript changed.
    pub fn apply(&mut self, message: &ConversationMessage) -> bool {
        match message {
            ConversationMessage::Simple(simple) => self.apply_simple(simple),
            ConversationMessage::Realtime { event, .. } => self.apply_event(event),
        }
    }

    pub fn apply_simple(&mut self, simple: &SimpleMessage) -> bool {
        let role = TranscriptRole::from_source(&simple.source);
        self.append_unique(role, &simple.message)
    }

    pub fn apply_event(&mut self, event: &ServerEvent) -> bool {
        match event {
            ServerEvent::InputTranscriptionCompleted { transcript, .. } => {
                if transcript.trim().is_empty() {
                    return false;
                }
                self.append_sealed(TranscriptRole::User, transcript);
                true
            }
            ServerEvent::ConversationItemAdded { item } if item.is_message_from("user") => {
                match item.primary_text() {
                    Some(text) => self.append_unique(TranscriptRole::User, text),
                    None => false,
                }
            }
            ServerEvent::AudioTranscriptDelta { delta, .. } | ServerEvent::TextDelta { delta, .. } => {
                self.push_delta(delta)
            }
            ServerEvent::AudioTranscriptDone { .. } | ServerEvent::TextDone { .. } => {
                self.seal_trailing()
            }
            ServerEvent::ResponseDone { response } => self.reconcile(&response.output),
            _ => false,
        }
    }

    /// Append a sealed message unless one with the same role and content
    /// already exists anywhere in the list.
    fn append_unique(&mut self, role: TranscriptRole, content: &str) -> bool {
        if content.is_empty() {
            return false;
        }
        if self
            .messages
            .iter()
            .any(|m| m.role == role && m.content == content)
        {
            trace!(%role, "Suppressing duplicate transcript message");
            return false;
        }
        self.append_sealed(role, content);
        true
    }

    /// Appending seals whatever was streaming before it.
    fn append_sealed(&mut self, role: TranscriptRole, content: &str) {
        self.seal_trailing();
        self.messages.push(TranscriptMessage::sealed(role, content));
    }

    fn push_delta(&mut self, delta: &str) -> bool {
        if delta.is_empty() {
            return false;
        }
        match self.messages.last_mut() {
            Some(last) if last.role == TranscriptRole::Assistant && last.streaming => {
                last.content.push_str(delta);
            }
            _ => {
                self.seal_trailing();
                self.messages.push(TranscriptMessage {
                    role: TranscriptRole::Assistant,
                    content: delta.to_string(),
                    streaming: true,
                });
            }
        }
        true
    }

    fn seal_trailing(&mut self) -> bool {
        match self.messages.last_mut() {
            Some(last) if last.streaming => {
                last.streaming = false;
                true
            }
            _ => false,
        }
    }

    /// Authoritative pass over a completed response. Each assistant output
    /// is compared against the current last message, in output order.
    fn reconcile(&mut self, output: &[ConversationItem]) -> bool {
        let mut changed = false;
        for item in output.iter().filter(|i| i.is_message_from("assistant")) {
            let Some(text) = item.primary_text() else {
                continue;
            };
            match self.messages.last_mut() {
                Some(last) if last.role == TranscriptRole::Assistant && last.content == text => {
                    if last.streaming {
                        last.streaming = false;
                        changed = true;
                    }
                }
                Some(last) if last.streaming => {
                    trace!("Replacing stale streaming message with final response");
                    self.messages.pop();
                    self.messages
                        .push(TranscriptMessage::sealed(TranscriptRole::Assistant, text));
                    changed = true;
                }
                _ => {
                    self.messages
                        .push(TranscriptMessage::sealed(TranscriptRole::Assistant, text));
                    changed = true;
                }
            }
        }
        changed
    }
}
