//! Session contract, per-attempt context, status cell and the host façade.

pub mod base;
pub mod context;
pub mod external;
pub mod facade;
pub mod status;

pub use base::{
    ConnectCallback, ConversationMessage, DisconnectCallback, MessageCallback, ProviderKind,
    SessionCallbacks, SessionError, SessionErrorCallback, SessionOptions, SessionResult,
    SessionStatus, SharedVoiceClient, SimpleMessage, StatusChangeCallback, ToolCallCallback,
    ToolCallNotice, VoiceClient,
};
pub use context::{ContextSlot, SessionContext};
pub use external::{ConversationProvider, ExternalEvents, ExternalSessionRequest, ExternalVoiceClient};
pub use facade::{VoiceSession, VoiceSessionBuilder};
pub use status::StatusCell;
