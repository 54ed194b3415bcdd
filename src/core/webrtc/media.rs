//! Local microphone tracks and remote audio delivery.
//!
//! Codec work stays with the host's capture stack: the local track accepts
//! already-encoded Opus frames, and remote RTP payloads are handed to the
//! host untouched. The only behaviour here is mute propagation and making
//! sure nothing keeps flowing once a track or sink has been released.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};
use webrtc::api::media_engine::MIME_TYPE_OPUS;
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use crate::core::session::{SessionError, SessionResult};

/// Opus RTP clock rate.
pub const OPUS_CLOCK_RATE: u32 = 48_000;

/// Capture processing requested from the microphone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConstraints {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

impl Default for AudioConstraints {
    fn default() -> Self {
        Self {
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
        }
    }
}

// =============================================================================
// Local Tracks
// =============================================================================

struct TrackState {
    id: String,
    enabled: AtomicBool,
    stopped: AtomicBool,
    sample_track: Option<Arc<TrackLocalStaticSample>>,
}

/// Handle to one local audio track. Clones share state.
#[derive(Clone)]
pub struct LocalAudioTrack {
    state: Arc<TrackState>,
}

impl std::fmt::Debug for LocalAudioTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalAudioTrack")
            .field("id", &self.state.id)
            .field("enabled", &self.is_enabled())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

impl LocalAudioTrack {
    /// Track without an RTP binding.
    pub fn new(id: impl Into<String>) -> Self {
        Self::build(id.into(), None)
    }

    /// Track backed by a webrtc sample track.
    pub fn with_sample_track(track: Arc<TrackLocalStaticSample>) -> Self {
        let id = track.id().to_string();
        Self::build(id, Some(track))
    }

    fn build(id: String, sample_track: Option<Arc<TrackLocalStaticSample>>) -> Self {
        Self {
            state: Arc::new(TrackState {
                id,
                enabled: AtomicBool::new(true),
                stopped: AtomicBool::new(false),
                sample_track,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.state.id
    }

    pub fn is_enabled(&self) -> bool {
        self.state.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.state.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.state.stopped.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        if !self.state.stopped.swap(true, Ordering::SeqCst) {
            debug!(track_id = %self.state.id, "Local audio track stopped");
        }
    }

    pub fn sample_track(&self) -> Option<Arc<TrackLocalStaticSample>> {
        self.state.sample_track.clone()
    }

    /// Both handles refer to the same underlying track.
    pub fn same_track(&self, other: &LocalAudioTrack) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }

    /// Write one encoded Opus frame. Returns `false` when the frame was
    /// dropped because the track is muted, stopped or not bound to RTP.
    pub async fn write_sample(&self, data: Bytes, duration: Duration) -> SessionResult<bool> {
        if self.is_stopped() || !self.is_enabled() {
            trace!(track_id = %self.state.id, "Dropping frame on muted or stopped track");
            return Ok(false);
        }
        let Some(track) = &self.state.sample_track else {
            return Ok(false);
        };
        track
            .write_sample(&Sample {
                data,
                duration,
                ..Default::default()
            })
            .await
            .map_err(|e| SessionError::MediaAccess(format!("Failed to write sample: {e}")))?;
        Ok(true)
    }
}

/// Local capture stream.
#[derive(Debug, Clone, Default)]
pub struct LocalMediaStream {
    tracks: Vec<LocalAudioTrack>,
}

impl LocalMediaStream {
    pub fn new(tracks: Vec<LocalAudioTrack>) -> Self {
        Self { tracks }
    }

    pub fn audio_tracks(&self) -> &[LocalAudioTrack] {
        &self.tracks
    }

    pub fn set_enabled(&self, enabled: bool) {
        for track in &self.tracks {
            track.set_enabled(enabled);
        }
    }

    pub fn stop(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

/// Microphone acquisition seam.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn get_user_media(&self, constraints: &AudioConstraints) -> SessionResult<LocalMediaStream>;
}

pub type SharedMediaDevices = Arc<dyn MediaDevices>;

/// Devices that hand out a fresh Opus sample track per session. The host
/// feeds encoded microphone frames into [`current_track`](Self::current_track).
#[derive(Default)]
pub struct OpusTrackDevices {
    stream_id: String,
    current: Mutex<Option<LocalAudioTrack>>,
}

impl OpusTrackDevices {
    pub fn new(stream_id: impl Into<String>) -> Self {
        Self {
            stream_id: stream_id.into(),
            current: Mutex::new(None),
        }
    }

    /// Track of the most recent session, if it is still live.
    pub fn current_track(&self) -> Option<LocalAudioTrack> {
        self.current
            .lock()
            .as_ref()
            .filter(|t| !t.is_stopped())
            .cloned()
    }
}

#[async_trait]
impl MediaDevices for OpusTrackDevices {
    async fn get_user_media(&self, constraints: &AudioConstraints) -> SessionResult<LocalMediaStream> {
        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_string(),
                clock_rate: OPUS_CLOCK_RATE,
                channels: 2,
                ..Default::default()
            },
            "audio".to_string(),
            self.stream_id.clone(),
        ));
        let local = LocalAudioTrack::with_sample_track(track);

        info!(
            echo_cancellation = constraints.echo_cancellation,
            noise_suppression = constraints.noise_suppression,
            auto_gain_control = constraints.auto_gain_control,
            "Microphone track created"
        );

        *self.current.lock() = Some(local.clone());
        Ok(LocalMediaStream::new(vec![local]))
    }
}

// =============================================================================
// Remote Audio
// =============================================================================

/// One RTP payload from the agent's audio track.
#[derive(Debug, Clone)]
pub struct RemoteAudioFrame {
    pub track_id: String,
    pub payload: Bytes,
    pub timestamp: u32,
    pub sequence_number: u16,
}

/// Callback type for remote audio frames.
pub type RemoteAudioCallback =
    Arc<dyn Fn(RemoteAudioFrame) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Destination for the inbound audio track of one session.
pub struct RemoteAudioSink {
    callback: Option<RemoteAudioCallback>,
    readers: Mutex<Vec<JoinHandle<()>>>,
    cleared: AtomicBool,
}

impl RemoteAudioSink {
    pub fn new(callback: Option<RemoteAudioCallback>) -> Self {
        Self {
            callback,
            readers: Mutex::new(Vec::new()),
            cleared: AtomicBool::new(false),
        }
    }

    pub fn is_cleared(&self) -> bool {
        self.cleared.load(Ordering::SeqCst)
    }

    /// Register the task reading a remote track.
    pub fn attach_reader(&self, reader: JoinHandle<()>) {
        let mut readers = self.readers.lock();
        if self.is_cleared() {
            reader.abort();
            return;
        }
        readers.push(reader);
    }

    pub async fn deliver(&self, frame: RemoteAudioFrame) {
        if self.is_cleared() {
            return;
        }
        if let Some(cb) = &self.callback {
            cb(frame).await;
        }
    }

    /// Stop rendering: abort readers and drop later frames.
    pub fn clear(&self) {
        let mut readers = self.readers.lock();
        self.cleared.store(true, Ordering::SeqCst);
        for reader in readers.drain(..) {
            reader.abort();
        }
    }
}
