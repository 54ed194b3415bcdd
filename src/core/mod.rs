pub mod session;
pub mod tools;
pub mod transcript;
pub mod webrtc;

// Re-export commonly used types for convenience
pub use session::{
    ConversationMessage, ConversationProvider, ExternalEvents, ExternalSessionRequest,
    ExternalVoiceClient, ProviderKind, SessionCallbacks, SessionError, SessionOptions,
    SessionResult, SessionStatus, SharedVoiceClient, SimpleMessage, ToolCallNotice, VoiceClient,
    VoiceSession, VoiceSessionBuilder,
};

pub use tools::{ToolDispatcher, ToolFn, ToolRegistry};

pub use transcript::{TranscriptAssembler, TranscriptMessage, TranscriptRole};

pub use webrtc::{
    AudioConstraints, HttpSignaling, NativeRtcEngine, OpusTrackDevices, RealtimeWebRtcClient,
    SignalingTransport,
};
