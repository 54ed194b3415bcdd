//! Peer connection and data channel seams.
//!
//! The realtime client drives these traits only; [`super::native`] binds
//! them to webrtc-rs. Data channel callbacks are funnelled into a single
//! [`ChannelEvent`] sender so the client can process them in order and
//! detach them all at once.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::media::{LocalAudioTrack, RemoteAudioSink};
use crate::core::session::SessionResult;

/// Data channel lifecycle and payload events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Open,
    Message(String),
    Close,
    Error(String),
}

pub type ChannelEventSender = mpsc::UnboundedSender<ChannelEvent>;

/// Factory for peer connections.
#[async_trait]
pub trait RtcEngine: Send + Sync {
    async fn create_peer(&self) -> SessionResult<Arc<dyn RtcPeer>>;
}

/// One peer connection.
#[async_trait]
pub trait RtcPeer: Send + Sync {
    /// Route inbound audio tracks into `sink`.
    fn on_remote_track(&self, sink: Arc<RemoteAudioSink>);

    /// Attach a local audio track as an outbound sender.
    async fn add_track(&self, track: LocalAudioTrack) -> SessionResult<()>;

    async fn create_data_channel(&self, label: &str) -> SessionResult<Arc<dyn RtcDataChannel>>;

    /// Create an offer, set it as the local description and return its SDP.
    async fn create_offer(&self) -> SessionResult<String>;

    async fn set_remote_answer(&self, sdp: &str) -> SessionResult<()>;

    /// Tracks currently attached to outbound senders.
    fn sender_tracks(&self) -> Vec<LocalAudioTrack>;

    async fn close(&self) -> SessionResult<()>;
}

/// One data channel.
#[async_trait]
pub trait RtcDataChannel: Send + Sync {
    fn label(&self) -> &str;

    fn is_open(&self) -> bool;

    async fn send_text(&self, text: String) -> SessionResult<()>;

    /// Start forwarding channel events to `events`.
    fn attach(&self, events: ChannelEventSender);

    /// Stop forwarding; later events are dropped.
    fn detach(&self);

    async fn close(&self) -> SessionResult<()>;
}

pub type SharedRtcEngine = Arc<dyn RtcEngine>;
