//! Inbound audio level taken from the RFC 6464 `ssrc-audio-level` RTP
//! header extension.
//!
//! The interceptor only observes packets as the remote track is read, so a
//! level is reported once something consumes the track (playback, recording).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use webrtc::interceptor::stream_info::StreamInfo;
use webrtc::interceptor::{
    Attributes, Error as InterceptorError, Interceptor, InterceptorBuilder, RTCPReader, RTCPWriter,
    RTPReader, RTPWriter,
};
use webrtc::rtp::extension::audio_level_extension::AudioLevelExtension;
use webrtc::rtp::packet::Packet;
use webrtc::util::Unmarshal;

pub(crate) const AUDIO_LEVEL_URI: &str = webrtc::sdp::extmap::AUDIO_LEVEL_URI;

const SILENCE_DBOV: u8 = 127;
const NO_LEVEL: u64 = u64::MAX;

/// Converts `-dBov` (0 loudest, 127 silence) to a linear level in `0.0..=1.0`.
pub(crate) fn linear_level(dbov: u8) -> f64 {
    if dbov >= SILENCE_DBOV {
        return 0.0;
    }
    10f64.powf(-f64::from(dbov) / 20.0)
}

pub(crate) fn packet_level(packet: &Packet, extension_id: u8) -> Option<f64> {
    let mut payload = packet.header.get_extension(extension_id)?;
    AudioLevelExtension::unmarshal(&mut payload)
        .ok()
        .map(|extension| linear_level(extension.level))
}

/// Latest level seen on a connection's inbound audio.
pub(crate) struct AudioLevelMeter {
    bits: AtomicU64,
}

impl Default for AudioLevelMeter {
    fn default() -> Self {
        Self {
            bits: AtomicU64::new(NO_LEVEL),
        }
    }
}

impl AudioLevelMeter {
    pub(crate) fn record(&self, level: f64) {
        self.bits.store(level.to_bits(), Ordering::Relaxed);
    }

    pub(crate) fn clear(&self) {
        self.bits.store(NO_LEVEL, Ordering::Relaxed);
    }

    pub(crate) fn level(&self) -> Option<f64> {
        match self.bits.load(Ordering::Relaxed) {
            NO_LEVEL => None,
            bits => Some(f64::from_bits(bits)),
        }
    }
}

pub(crate) struct AudioLevelInterceptorBuilder {
    meter: Arc<AudioLevelMeter>,
}

impl AudioLevelInterceptorBuilder {
    pub(crate) fn new(meter: Arc<AudioLevelMeter>) -> Self {
        Self { meter }
    }
}

impl InterceptorBuilder for AudioLevelInterceptorBuilder {
    fn build(&self, _id: &str) -> Result<Arc<dyn Interceptor + Send + Sync>, InterceptorError> {
        Ok(Arc::new(AudioLevelInterceptor {
            meter: Arc::clone(&self.meter),
        }))
    }
}

struct AudioLevelInterceptor {
    meter: Arc<AudioLevelMeter>,
}

/// Negotiated id of the audio-level extension on an inbound audio stream.
fn extension_id(info: &StreamInfo) -> Option<u8> {
    if !info.mime_type.to_ascii_lowercase().starts_with("audio/") {
        return None;
    }
    info.rtp_header_extensions
        .iter()
        .find(|extension| extension.uri == AUDIO_LEVEL_URI)
        .and_then(|extension| u8::try_from(extension.id).ok())
}

#[async_trait]
impl Interceptor for AudioLevelInterceptor {
    async fn bind_rtcp_reader(
        &self,
        reader: Arc<dyn RTCPReader + Send + Sync>,
    ) -> Arc<dyn RTCPReader + Send + Sync> {
        reader
    }

    async fn bind_rtcp_writer(
        &self,
        writer: Arc<dyn RTCPWriter + Send + Sync>,
    ) -> Arc<dyn RTCPWriter + Send + Sync> {
        writer
    }

    async fn bind_local_stream(
        &self,
        _info: &StreamInfo,
        writer: Arc<dyn RTPWriter + Send + Sync>,
    ) -> Arc<dyn RTPWriter + Send + Sync> {
        writer
    }

    async fn unbind_local_stream(&self, _info: &StreamInfo) {}

    async fn bind_remote_stream(
        &self,
        info: &StreamInfo,
        reader: Arc<dyn RTPReader + Send + Sync>,
    ) -> Arc<dyn RTPReader + Send + Sync> {
        match extension_id(info) {
            Some(extension_id) => Arc::new(LevelReader {
                inner: reader,
                extension_id,
                meter: Arc::clone(&self.meter),
            }),
            None => reader,
        }
    }

    async fn unbind_remote_stream(&self, info: &StreamInfo) {
        if extension_id(info).is_some() {
            self.meter.clear();
        }
    }

    async fn close(&self) -> Result<(), InterceptorError> {
        Ok(())
    }
}

struct LevelReader {
    inner: Arc<dyn RTPReader + Send + Sync>,
    extension_id: u8,
    meter: Arc<AudioLevelMeter>,
}

#[async_trait]
impl RTPReader for LevelReader {
    async fn read(
        &self,
        buf: &mut [u8],
        attributes: &Attributes,
    ) -> Result<(Packet, Attributes), InterceptorError> {
        let (packet, attributes) = self.inner.read(buf, attributes).await?;
        if let Some(level) = packet_level(&packet, self.extension_id) {
            self.meter.record(level);
        }
        Ok((packet, attributes))
    }
}
