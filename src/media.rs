//! Local and remote media as seen by a room.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    pub fn from_codec_type(kind: RTPCodecType) -> Option<Self> {
        match kind {
            RTPCodecType::Audio => Some(MediaKind::Audio),
            RTPCodecType::Video => Some(MediaKind::Video),
            _ => None,
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Audio => write!(f, "audio"),
            MediaKind::Video => write!(f, "video"),
        }
    }
}

/// Advisory hint for what a track carries.
///
/// The room marks published video and screenshare tracks as `Detail`. The
/// webrtc-rs sender takes encoded samples and does not read the hint; it is
/// there for whatever captures and encodes into [`LocalMediaTrack::write_sample`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContentHint {
    #[default]
    None,
    Detail,
}

impl ContentHint {
    fn to_u8(self) -> u8 {
        match self {
            ContentHint::None => 0,
            ContentHint::Detail => 1,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => ContentHint::Detail,
            _ => ContentHint::None,
        }
    }
}

/// A locally captured track that can be attached to a peer connection.
///
/// Samples written while the track is disabled or stopped are dropped, which
/// is what muting and hiding rely on.
pub struct LocalMediaTrack {
    id: String,
    kind: MediaKind,
    rtc: Arc<TrackLocalStaticSample>,
    enabled: AtomicBool,
    stopped: AtomicBool,
    content_hint: AtomicU8,
}

impl LocalMediaTrack {
    pub fn new(kind: MediaKind, id: impl Into<String>, stream_id: impl Into<String>) -> Self {
        let id = id.into();
        let mime_type = match kind {
            MediaKind::Audio => MIME_TYPE_OPUS,
            MediaKind::Video => MIME_TYPE_VP8,
        };
        let rtc = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: mime_type.to_owned(),
                ..Default::default()
            },
            id.clone(),
            stream_id.into(),
        ));

        Self {
            id,
            kind,
            rtc,
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
            content_hint: AtomicU8::new(ContentHint::None.to_u8()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Permanently stops the track. Stopped tracks never carry media again.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn content_hint(&self) -> ContentHint {
        ContentHint::from_u8(self.content_hint.load(Ordering::SeqCst))
    }

    pub fn set_content_hint(&self, hint: ContentHint) {
        self.content_hint.store(hint.to_u8(), Ordering::SeqCst);
    }

    pub fn rtc_track(&self) -> Arc<dyn TrackLocal + Send + Sync> {
        Arc::clone(&self.rtc) as Arc<dyn TrackLocal + Send + Sync>
    }

    /// Feeds one encoded sample to every connection this track is attached to.
    pub async fn write_sample(&self, sample: &Sample) -> Result<()> {
        if !self.enabled() || self.is_stopped() {
            return Ok(());
        }
        self.rtc.write_sample(sample).await?;
        Ok(())
    }
}

impl fmt::Debug for LocalMediaTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalMediaTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("enabled", &self.enabled())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// A group of local tracks obtained together.
#[derive(Debug, Clone)]
pub struct MediaStream {
    pub id: String,
    pub tracks: Vec<Arc<LocalMediaTrack>>,
}

impl MediaStream {
    pub fn new(id: impl Into<String>, tracks: Vec<Arc<LocalMediaTrack>>) -> Self {
        Self {
            id: id.into(),
            tracks,
        }
    }

    pub fn tracks_of(&self, kind: MediaKind) -> impl Iterator<Item = &Arc<LocalMediaTrack>> {
        self.tracks.iter().filter(move |t| t.kind() == kind)
    }

    pub fn first_track(&self, kind: MediaKind) -> Option<Arc<LocalMediaTrack>> {
        self.tracks_of(kind).next().cloned()
    }
}

/// Media received from a remote peer.
#[derive(Clone)]
pub struct RemoteMedia {
    pub kind: MediaKind,
    /// The underlying RTP track; `None` for backends that don't expose one.
    pub track: Option<Arc<TrackRemote>>,
}

impl fmt::Debug for RemoteMedia {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteMedia")
            .field("kind", &self.kind)
            .field("has_track", &self.track.is_some())
            .finish()
    }
}

/// What `on_peer_media` reports.
#[derive(Debug, Clone)]
pub enum PeerMedia {
    Remote(RemoteMedia),
    /// A new local stream, reported for the self peer after a camera switch.
    Local(MediaStream),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackConstraints {
    /// Exact device to capture from.
    pub device_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: Option<TrackConstraints>,
    pub video: Option<TrackConstraints>,
}

impl MediaConstraints {
    pub fn audio_device(device_id: impl Into<String>) -> Self {
        Self {
            audio: Some(TrackConstraints {
                device_id: Some(device_id.into()),
            }),
            video: None,
        }
    }

    pub fn video_device(device_id: impl Into<String>) -> Self {
        Self {
            audio: None,
            video: Some(TrackConstraints {
                device_id: Some(device_id.into()),
            }),
        }
    }
}

/// What to ask the display capture for. Screenshare never captures audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayConstraints {
    pub audio: bool,
    pub frame_rate: u32,
}

impl Default for DisplayConstraints {
    fn default() -> Self {
        Self {
            audio: false,
            frame_rate: 15,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    AudioInput,
    VideoInput,
    AudioOutput,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub device_id: String,
    pub kind: DeviceKind,
    pub label: String,
}

/// Devices grouped by kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Devices {
    pub audio_inputs: Vec<DeviceInfo>,
    pub video_inputs: Vec<DeviceInfo>,
    pub audio_outputs: Vec<DeviceInfo>,
}

impl FromIterator<DeviceInfo> for Devices {
    fn from_iter<I: IntoIterator<Item = DeviceInfo>>(iter: I) -> Self {
        let mut devices = Devices::default();
        for device in iter {
            match device.kind {
                DeviceKind::AudioInput => devices.audio_inputs.push(device),
                DeviceKind::VideoInput => devices.video_inputs.push(device),
                DeviceKind::AudioOutput => devices.audio_outputs.push(device),
            }
        }
        devices
    }
}

/// Capture and routing of local devices.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn user_media(&self, constraints: MediaConstraints) -> Result<MediaStream>;

    async fn display_media(&self, constraints: DisplayConstraints) -> Result<MediaStream>;

    async fn enumerate_devices(&self) -> Result<Vec<DeviceInfo>>;

    /// Routes remote audio playback to the given output device.
    async fn set_audio_output(&self, device_id: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabling_and_stopping_tracks() {
        let track = LocalMediaTrack::new(MediaKind::Audio, "mic", "stream");
        assert!(track.enabled());
        track.set_enabled(false);
        assert!(!track.enabled());
        assert!(!track.is_stopped());
        track.stop();
        assert!(track.is_stopped());
    }

    #[test]
    fn content_hint_round_trips_through_the_atomic() {
        let track = LocalMediaTrack::new(MediaKind::Video, "cam", "stream");
        assert_eq!(track.content_hint(), ContentHint::None);
        track.set_content_hint(ContentHint::Detail);
        assert_eq!(track.content_hint(), ContentHint::Detail);
    }

    #[test]
    fn devices_are_grouped_by_kind() {
        let device = |id: &str, kind| DeviceInfo {
            device_id: id.into(),
            kind,
            label: id.into(),
        };
        let devices: Devices = vec![
            device("mic", DeviceKind::AudioInput),
            device("cam", DeviceKind::VideoInput),
            device("speaker", DeviceKind::AudioOutput),
            device("headset", DeviceKind::AudioInput),
        ]
        .into_iter()
        .collect();

        assert_eq!(devices.audio_inputs.len(), 2);
        assert_eq!(devices.video_inputs[0].device_id, "cam");
        assert_eq!(devices.audio_outputs[0].device_id, "speaker");
    }

    #[test]
    fn first_track_picks_by_kind() {
        let stream = MediaStream::new(
            "s",
            vec![
                Arc::new(LocalMediaTrack::new(MediaKind::Video, "cam", "s")),
                Arc::new(LocalMediaTrack::new(MediaKind::Audio, "mic", "s")),
            ],
        );
        assert_eq!(stream.first_track(MediaKind::Audio).map(|t| t.id().to_owned()), Some("mic".into()));
        assert_eq!(stream.tracks_of(MediaKind::Video).count(), 1);
    }
}
