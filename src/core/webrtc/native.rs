//! webrtc-rs binding for the peer/data-channel seams.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{API, APIBuilder};
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use super::media::{LocalAudioTrack, RemoteAudioFrame, RemoteAudioSink};
use super::peer::{ChannelEvent, ChannelEventSender, RtcDataChannel, RtcEngine, RtcPeer};
use crate::core::session::{SessionError, SessionResult};

/// Default public STUN server.
pub const DEFAULT_ICE_SERVER: &str = "stun:stun.l.google.com:19302";

/// Peer connection factory backed by a shared webrtc-rs API instance.
pub struct NativeRtcEngine {
    api: API,
    ice_servers: Vec<String>,
}

impl NativeRtcEngine {
    pub fn new(ice_servers: Vec<String>) -> SessionResult<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs().map_err(|e| {
            SessionError::PeerConnection(format!("Failed to register codecs: {e}"))
        })?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine).map_err(|e| {
            SessionError::PeerConnection(format!("Failed to register interceptors: {e}"))
        })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        Ok(Self { api, ice_servers })
    }

    fn rtc_configuration(&self) -> RTCConfiguration {
        let ice_servers = if self.ice_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }]
        };
        RTCConfiguration {
            ice_servers,
            ..Default::default()
        }
    }
}

#[async_trait]
impl RtcEngine for NativeRtcEngine {
    async fn create_peer(&self) -> SessionResult<Arc<dyn RtcPeer>> {
        let pc = self
            .api
            .new_peer_connection(self.rtc_configuration())
            .await
            .map_err(|e| {
                SessionError::PeerConnection(format!("Failed to create peer connection: {e}"))
            })?;
        debug!("Peer connection created");
        Ok(Arc::new(NativePeer {
            pc: Arc::new(pc),
            senders: Mutex::new(Vec::new()),
        }))
    }
}

pub struct NativePeer {
    pc: Arc<RTCPeerConnection>,
    senders: Mutex<Vec<LocalAudioTrack>>,
}

/// Spawn a reader that forwards the track's RTP payloads into `sink`.
fn attach_remote_audio(sink: &Arc<RemoteAudioSink>, track: Arc<TrackRemote>) {
    info!(track_id = %track.id(), "Remote audio track attached");

    let reader_sink = sink.clone();
    let reader = tokio::spawn(async move {
        let track_id = track.id();
        loop {
            match track.read_rtp().await {
                Ok((packet, _)) => {
                    if packet.payload.is_empty() {
                        continue;
                    }
                    reader_sink
                        .deliver(RemoteAudioFrame {
                            track_id: track_id.clone(),
                            payload: packet.payload.clone(),
                            timestamp: packet.header.timestamp,
                            sequence_number: packet.header.sequence_number,
                        })
                        .await;
                }
                Err(e) => {
                    debug!(track_id = %track_id, "Remote track read ended: {e}");
                    break;
                }
            }
        }
    });
    sink.attach_reader(reader);
}

#[async_trait]
impl RtcPeer for NativePeer {
    fn on_remote_track(&self, sink: Arc<RemoteAudioSink>) {
        self.pc.on_track(Box::new(move |track: Arc<TrackRemote>, _, _| {
            if track.kind() == RTPCodecType::Audio {
                attach_remote_audio(&sink, track);
            }
            Box::pin(async {})
        }));
    }

    async fn add_track(&self, track: LocalAudioTrack) -> SessionResult<()> {
        let sample_track = track.sample_track().ok_or_else(|| {
            SessionError::MediaAccess(format!("Track {} has no RTP binding", track.id()))
        })?;

        let rtp_sender = self
            .pc
            .add_track(sample_track as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| SessionError::PeerConnection(format!("Failed to add audio track: {e}")))?;

        // RTCP must be drained for interceptors to work
        tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while rtp_sender.read(&mut rtcp_buf).await.is_ok() {}
        });

        self.senders.lock().push(track);
        Ok(())
    }

    async fn create_data_channel(&self, label: &str) -> SessionResult<Arc<dyn RtcDataChannel>> {
        let dc = self
            .pc
            .create_data_channel(label, None)
            .await
            .map_err(|e| SessionError::DataChannel(format!("Failed to create data channel: {e}")))?;
        Ok(Arc::new(NativeDataChannel::new(label, dc)))
    }

    async fn create_offer(&self) -> SessionResult<String> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| SessionError::PeerConnection(format!("Failed to create offer: {e}")))?;

        let mut gather_complete = self.pc.gathering_complete_promise().await;
        self.pc.set_local_description(offer).await.map_err(|e| {
            SessionError::PeerConnection(format!("Failed to set local description: {e}"))
        })?;
        let _ = gather_complete.recv().await;

        let local = self.pc.local_description().await.ok_or_else(|| {
            SessionError::PeerConnection("Missing local description".to_string())
        })?;
        Ok(local.sdp)
    }

    async fn set_remote_answer(&self, sdp: &str) -> SessionResult<()> {
        let answer = RTCSessionDescription::answer(sdp.to_string())
            .map_err(|e| SessionError::PeerConnection(format!("Invalid answer SDP: {e}")))?;
        self.pc.set_remote_description(answer).await.map_err(|e| {
            SessionError::PeerConnection(format!("Failed to set remote description: {e}"))
        })
    }

    fn sender_tracks(&self) -> Vec<LocalAudioTrack> {
        self.senders.lock().clone()
    }

    async fn close(&self) -> SessionResult<()> {
        self.pc
            .close()
            .await
            .map_err(|e| SessionError::PeerConnection(format!("Failed to close peer: {e}")))
    }
}

type EventSlot = Arc<Mutex<Option<ChannelEventSender>>>;

fn forward(slot: &EventSlot, event: ChannelEvent) {
    if let Some(tx) = slot.lock().as_ref() {
        let _ = tx.send(event);
    }
}

pub struct NativeDataChannel {
    label: String,
    dc: Arc<RTCDataChannel>,
    events: EventSlot,
}

impl NativeDataChannel {
    fn new(label: &str, dc: Arc<RTCDataChannel>) -> Self {
        let events: EventSlot = Arc::new(Mutex::new(None));

        let slot = events.clone();
        dc.on_open(Box::new(move || {
            forward(&slot, ChannelEvent::Open);
            Box::pin(async {})
        }));

        let slot = events.clone();
        dc.on_message(Box::new(move |msg: DataChannelMessage| {
            match String::from_utf8(msg.data.to_vec()) {
                Ok(text) => forward(&slot, ChannelEvent::Message(text)),
                Err(_) => warn!("Ignoring non-UTF-8 data channel message"),
            }
            Box::pin(async {})
        }));

        let slot = events.clone();
        dc.on_close(Box::new(move || {
            forward(&slot, ChannelEvent::Close);
            Box::pin(async {})
        }));

        let slot = events.clone();
        dc.on_error(Box::new(move |err: webrtc::Error| {
            forward(&slot, ChannelEvent::Error(err.to_string()));
            Box::pin(async {})
        }));

        Self {
            label: label.to_string(),
            dc,
            events,
        }
    }
}

#[async_trait]
impl RtcDataChannel for NativeDataChannel {
    fn label(&self) -> &str {
        &self.label
    }

    fn is_open(&self) -> bool {
        self.dc.ready_state() == RTCDataChannelState::Open
    }

    async fn send_text(&self, text: String) -> SessionResult<()> {
        self.dc
            .send_text(text)
            .await
            .map(|_| ())
            .map_err(|e| SessionError::DataChannel(format!("Failed to send: {e}")))
    }

    fn attach(&self, events: ChannelEventSender) {
        *self.events.lock() = Some(events);
    }

    fn detach(&self) {
        self.events.lock().take();
    }

    async fn close(&self) -> SessionResult<()> {
        self.dc
            .close()
            .await
            .map_err(|e| SessionError::DataChannel(format!("Failed to close: {e}")))
    }
}
