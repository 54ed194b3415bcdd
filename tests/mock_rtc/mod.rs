//! In-memory peer connection, data channel, microphone and signaling used
//! by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

use waav_voice_client::core::session::{
    ConversationMessage, SessionCallbacks, SessionError, SessionResult, SessionStatus,
};
use waav_voice_client::core::webrtc::{
    AudioConstraints, ChannelEvent, ChannelEventSender, LocalAudioTrack, LocalMediaStream,
    MediaDevices, RemoteAudioSink, RtcDataChannel, RtcEngine, RtcPeer, SignalingTransport,
};

// =============================================================================
// Data channel
// =============================================================================

pub struct MockChannel {
    label: String,
    open: AtomicBool,
    closed: AtomicBool,
    events: Mutex<Option<ChannelEventSender>>,
    sent: Mutex<Vec<Value>>,
}

impl MockChannel {
    fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            open: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            events: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
        }
    }

    fn emit(&self, event: ChannelEvent) {
        if let Some(tx) = self.events.lock().as_ref() {
            let _ = tx.send(event);
        }
    }

    /// Remote side accepted the channel.
    pub fn open(&self) {
        self.open.store(true, Ordering::SeqCst);
        self.emit(ChannelEvent::Open);
    }

    /// Inbound wire event.
    pub fn deliver(&self, event: Value) {
        self.emit(ChannelEvent::Message(event.to_string()));
    }

    pub fn deliver_text(&self, text: &str) {
        self.emit(ChannelEvent::Message(text.to_string()));
    }

    /// Remote side closed the channel.
    pub fn remote_close(&self) {
        self.open.store(false, Ordering::SeqCst);
        self.emit(ChannelEvent::Close);
    }

    pub fn fail(&self, message: &str) {
        self.emit(ChannelEvent::Error(message.to_string()));
    }

    pub fn is_attached(&self) -> bool {
        self.events.lock().is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<Value> {
        self.sent.lock().clone()
    }

    pub fn sent_of_type(&self, event_type: &str) -> Vec<Value> {
        self.sent()
            .into_iter()
            .filter(|e| e["type"] == event_type)
            .collect()
    }

    /// `function_call_output` items sent back for tool calls.
    pub fn tool_outputs(&self) -> Vec<(String, Value)> {
        self.sent_of_type("conversation.item.create")
            .into_iter()
            .filter(|e| e["item"]["type"] == "function_call_output")
            .map(|e| {
                let call_id = e["item"]["call_id"].as_str().unwrap_or_default().to_string();
                let output = e["item"]["output"].as_str().unwrap_or("null");
                (call_id, serde_json::from_str(output).unwrap_or(Value::Null))
            })
            .collect()
    }
}

#[async_trait]
impl RtcDataChannel for MockChannel {
    fn label(&self) -> &str {
        &self.label
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !self.is_closed()
    }

    async fn send_text(&self, text: String) -> SessionResult<()> {
        if !self.is_open() {
            return Err(SessionError::DataChannel("channel not open".to_string()));
        }
        let value: Value = serde_json::from_str(&text)
            .map_err(|e| SessionError::Serialization(e.to_string()))?;
        self.sent.lock().push(value);
        Ok(())
    }

    fn attach(&self, events: ChannelEventSender) {
        *self.events.lock() = Some(events);
    }

    fn detach(&self) {
        self.events.lock().take();
    }

    async fn close(&self) -> SessionResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }
}

// =============================================================================
// Peer
// =============================================================================

pub struct MockPeer {
    pub index: usize,
    tracks: Mutex<Vec<LocalAudioTrack>>,
    channels: Mutex<Vec<Arc<MockChannel>>>,
    sink: Mutex<Option<Arc<RemoteAudioSink>>>,
    remote_answer: Mutex<Option<String>>,
    closed: AtomicBool,
}

impl MockPeer {
    pub fn channel(&self) -> Arc<MockChannel> {
        self.channels.lock()[0].clone()
    }

    pub fn tracks(&self) -> Vec<LocalAudioTrack> {
        self.tracks.lock().clone()
    }

    pub fn remote_answer(&self) -> Option<String> {
        self.remote_answer.lock().clone()
    }

    pub fn remote_sink(&self) -> Option<Arc<RemoteAudioSink>> {
        self.sink.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RtcPeer for MockPeer {
    fn on_remote_track(&self, sink: Arc<RemoteAudioSink>) {
        *self.sink.lock() = Some(sink);
    }

    async fn add_track(&self, track: LocalAudioTrack) -> SessionResult<()> {
        self.tracks.lock().push(track);
        Ok(())
    }

    async fn create_data_channel(&self, label: &str) -> SessionResult<Arc<dyn RtcDataChannel>> {
        let channel = Arc::new(MockChannel::new(label));
        self.channels.lock().push(channel.clone());
        Ok(channel)
    }

    async fn create_offer(&self) -> SessionResult<String> {
        Ok(format!("mock-offer-{}", self.index))
    }

    async fn set_remote_answer(&self, sdp: &str) -> SessionResult<()> {
        *self.remote_answer.lock() = Some(sdp.to_string());
        Ok(())
    }

    fn sender_tracks(&self) -> Vec<LocalAudioTrack> {
        self.tracks()
    }

    async fn close(&self) -> SessionResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct MockEngine {
    peers: Mutex<Vec<Arc<MockPeer>>>,
}

impl MockEngine {
    pub fn peers(&self) -> Vec<Arc<MockPeer>> {
        self.peers.lock().clone()
    }

    pub fn peer(&self, index: usize) -> Arc<MockPeer> {
        self.peers.lock()[index].clone()
    }

    pub fn last_peer(&self) -> Arc<MockPeer> {
        let peers = self.peers.lock();
        peers[peers.len() - 1].clone()
    }
}

#[async_trait]
impl RtcEngine for MockEngine {
    async fn create_peer(&self) -> SessionResult<Arc<dyn RtcPeer>> {
        let mut peers = self.peers.lock();
        let peer = Arc::new(MockPeer {
            index: peers.len(),
            tracks: Mutex::new(Vec::new()),
            channels: Mutex::new(Vec::new()),
            sink: Mutex::new(None),
            remote_answer: Mutex::new(None),
            closed: AtomicBool::new(false),
        });
        peers.push(peer.clone());
        Ok(peer)
    }
}

// =============================================================================
// Microphone
// =============================================================================

#[derive(Default)]
pub struct MockMedia {
    deny: AtomicBool,
    streams: Mutex<Vec<LocalMediaStream>>,
}

impl MockMedia {
    pub fn deny_permission(&self) {
        self.deny.store(true, Ordering::SeqCst);
    }

    pub fn streams(&self) -> Vec<LocalMediaStream> {
        self.streams.lock().clone()
    }
}

#[async_trait]
impl MediaDevices for MockMedia {
    async fn get_user_media(&self, _constraints: &AudioConstraints) -> SessionResult<LocalMediaStream> {
        if self.deny.load(Ordering::SeqCst) {
            return Err(SessionError::MediaAccess("Permission denied".to_string()));
        }
        let mut streams = self.streams.lock();
        let stream = LocalMediaStream::new(vec![LocalAudioTrack::new(format!(
            "mic-{}",
            streams.len()
        ))]);
        streams.push(stream.clone());
        Ok(stream)
    }
}

// =============================================================================
// Signaling
// =============================================================================

#[derive(Default)]
pub struct MockSignaling {
    offers: Mutex<Vec<String>>,
    failure: Mutex<Option<String>>,
    hold_next: AtomicBool,
    release: Notify,
}

impl MockSignaling {
    pub fn fail_with(&self, message: &str) {
        *self.failure.lock() = Some(message.to_string());
    }

    pub fn clear_failure(&self) {
        *self.failure.lock() = None;
    }

    /// Park the next exchange until [`release`](Self::release) is called.
    pub fn hold_next(&self) {
        self.hold_next.store(true, Ordering::SeqCst);
    }

    pub fn release(&self) {
        self.release.notify_one();
    }

    pub fn offers(&self) -> Vec<String> {
        self.offers.lock().clone()
    }
}

#[async_trait]
impl SignalingTransport for MockSignaling {
    async fn exchange(&self, offer_sdp: &str) -> SessionResult<String> {
        self.offers.lock().push(offer_sdp.to_string());
        if self.hold_next.swap(false, Ordering::SeqCst) {
            self.release.notified().await;
        }
        if let Some(message) = self.failure.lock().clone() {
            return Err(SessionError::Signaling(message));
        }
        Ok(format!("answer-for-{offer_sdp}"))
    }
}

// =============================================================================
// Callback recorder
// =============================================================================

/// Records every callback as a short string, in order.
#[derive(Clone, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<String>>>,
    errors: Arc<Mutex<Vec<SessionError>>>,
    messages: Arc<Mutex<Vec<ConversationMessage>>>,
    tool_calls: Arc<AtomicUsize>,
}

impl Recorder {
    pub fn callbacks(&self) -> SessionCallbacks {
        let on_connect = self.events.clone();
        let on_disconnect = self.events.clone();
        let on_error = self.clone();
        let on_status = self.events.clone();
        let on_tool = self.clone();
        let on_message = self.clone();

        SessionCallbacks::new()
            .on_connect(move || {
                let events = on_connect.clone();
                async move { events.lock().push("connect".to_string()) }
            })
            .on_disconnect(move || {
                let events = on_disconnect.clone();
                async move { events.lock().push("disconnect".to_string()) }
            })
            .on_error(move |e| {
                let recorder = on_error.clone();
                async move {
                    recorder.events.lock().push("error".to_string());
                    recorder.errors.lock().push(e);
                }
            })
            .on_status_change(move |status| {
                let events = on_status.clone();
                async move { events.lock().push(format!("status:{status}")) }
            })
            .on_tool_call(move |notice| {
                let recorder = on_tool.clone();
                async move {
                    recorder.tool_calls.fetch_add(1, Ordering::SeqCst);
                    recorder.events.lock().push(format!("tool:{}", notice.name));
                }
            })
            .on_message(move |message| {
                let recorder = on_message.clone();
                async move {
                    recorder.messages.lock().push(message);
                }
            })
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub fn count(&self, event: &str) -> usize {
        self.events.lock().iter().filter(|e| *e == event).count()
    }

    pub fn errors(&self) -> Vec<SessionError> {
        self.errors.lock().clone()
    }

    pub fn messages(&self) -> Vec<ConversationMessage> {
        self.messages.lock().clone()
    }

    pub fn message_types(&self) -> Vec<String> {
        self.messages()
            .iter()
            .map(|m| m.event_type().unwrap_or("simple").to_string())
            .collect()
    }

    pub fn tool_calls(&self) -> usize {
        self.tool_calls.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Poll `condition` until it holds or two seconds pass.
pub async fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..400 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

/// Wait for a status value on a client or session.
pub async fn wait_for_status<F: Fn() -> SessionStatus>(status: F, expected: SessionStatus) -> bool {
    wait_until(|| status() == expected).await
}

/// Let spawned tasks run for a moment.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(30)).await;
}

/// Run `fut` with a timeout, panicking if it does not finish.
pub async fn within<T>(fut: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(2), fut)
        .await
        .expect("operation timed out")
}
