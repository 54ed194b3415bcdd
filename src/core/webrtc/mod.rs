//! Realtime transport over WebRTC: signaling, media, the peer/data-channel
//! seam, its webrtc-rs binding, the data-channel wire protocol and the
//! client state machine that ties them together.

pub mod client;
pub mod media;
pub mod messages;
pub mod native;
pub mod peer;
pub mod signaling;

pub use client::{DEFAULT_DATA_CHANNEL_LABEL, RealtimeWebRtcClient, RealtimeWebRtcClientBuilder};
pub use media::{
    AudioConstraints, LocalAudioTrack, LocalMediaStream, MediaDevices, OpusTrackDevices,
    RemoteAudioCallback, RemoteAudioFrame, RemoteAudioSink, SharedMediaDevices,
};
pub use messages::{ClientEvent, ConversationItem, OutboundEvent, ServerEvent};
pub use native::{DEFAULT_ICE_SERVER, NativeRtcEngine};
pub use peer::{ChannelEvent, ChannelEventSender, RtcDataChannel, RtcEngine, RtcPeer, SharedRtcEngine};
pub use signaling::{HttpSignaling, SharedSignaling, SignalingTransport, signaling_endpoint};
