use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpHeaderExtensionCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::stats::StatsReportType;
use webrtc::track::track_remote::TrackRemote;

use super::audio_level::{AudioLevelInterceptorBuilder, AudioLevelMeter, AUDIO_LEVEL_URI};
use super::{
    ConnectionSettings, DataChannel, PeerConnection, PeerConnectionEvent, PeerConnectionFactory,
    PeerEventSink,
};
use crate::error::{Error, Result};
use crate::media::{LocalMediaTrack, MediaKind, RemoteMedia};
use crate::metrics::{StatsEntry, StatsSnapshot};

/// Creates webrtc-rs peer connections with the default codecs and interceptors.
///
/// Each connection gets its own [`API`] so its audio-level interceptor
/// reports into that connection's meter.
#[derive(Debug, Default)]
pub struct WebRtcFactory;

impl WebRtcFactory {
    pub fn new() -> Self {
        Self
    }

    fn api(&self, meter: Arc<AudioLevelMeter>) -> Result<API> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;
        media_engine.register_header_extension(
            RTCRtpHeaderExtensionCapability {
                uri: AUDIO_LEVEL_URI.to_owned(),
            },
            RTPCodecType::Audio,
            None,
        )?;

        let mut registry = register_default_interceptors(Registry::new(), &mut media_engine)?;
        registry.add(Box::new(AudioLevelInterceptorBuilder::new(meter)));

        Ok(APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build())
    }
}

#[async_trait]
impl PeerConnectionFactory for WebRtcFactory {
    async fn create(
        &self,
        settings: &ConnectionSettings,
        events: PeerEventSink,
    ) -> Result<Arc<dyn PeerConnection>> {
        let config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: settings.ice_servers.clone(),
                ..Default::default()
            }],
            ..Default::default()
        };

        let meter = Arc::new(AudioLevelMeter::default());
        let api = self.api(Arc::clone(&meter))?;
        let peer_connection = Arc::new(api.new_peer_connection(config).await?);
        let connection = WebRtcPeerConnection {
            peer_connection,
            events,
            senders: Mutex::new(Vec::new()),
            inbound_audio: Arc::new(AtomicBool::new(false)),
            audio_level: meter,
        };
        connection.register_handlers();

        Ok(Arc::new(connection))
    }
}

pub struct WebRtcPeerConnection {
    peer_connection: Arc<RTCPeerConnection>,
    events: PeerEventSink,
    senders: Mutex<Vec<(Arc<RTCRtpSender>, Arc<LocalMediaTrack>)>>,
    inbound_audio: Arc<AtomicBool>,
    audio_level: Arc<AudioLevelMeter>,
}

impl WebRtcPeerConnection {
    fn register_handlers(&self) {
        let events = self.events.clone();
        self.peer_connection
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                match candidate {
                    Some(candidate) => match candidate.to_json() {
                        Ok(init) => events.emit(PeerConnectionEvent::IceCandidate(Some(init))),
                        Err(e) => warn!(key = %events.key(), "Failed to serialize ICE candidate: {e}"),
                    },
                    None => events.emit(PeerConnectionEvent::IceCandidate(None)),
                }
                Box::pin(async {})
            }));

        let events = self.events.clone();
        let inbound_audio = Arc::clone(&self.inbound_audio);
        self.peer_connection.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                if let Some(kind) = MediaKind::from_codec_type(track.kind()) {
                    if kind == MediaKind::Audio {
                        inbound_audio.store(true, Ordering::SeqCst);
                    }
                    events.emit(PeerConnectionEvent::Track(RemoteMedia {
                        kind,
                        track: Some(track),
                    }));
                }
                Box::pin(async {})
            },
        ));

        let events = self.events.clone();
        self.peer_connection
            .on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
                events.emit(PeerConnectionEvent::ConnectionState(s));
                Box::pin(async {})
            }));

        let events = self.events.clone();
        self.peer_connection
            .on_ice_connection_state_change(Box::new(move |s: RTCIceConnectionState| {
                events.emit(PeerConnectionEvent::IceConnectionState(s));
                Box::pin(async {})
            }));

        let events = self.events.clone();
        self.peer_connection.on_negotiation_needed(Box::new(move || {
            events.emit(PeerConnectionEvent::NegotiationNeeded);
            Box::pin(async {})
        }));
    }
}

#[async_trait]
impl PeerConnection for WebRtcPeerConnection {
    async fn create_offer(&self) -> Result<RTCSessionDescription> {
        Ok(self.peer_connection.create_offer(None).await?)
    }

    async fn create_answer(&self) -> Result<RTCSessionDescription> {
        Ok(self.peer_connection.create_answer(None).await?)
    }

    async fn set_local_description(&self, description: RTCSessionDescription) -> Result<()> {
        self.peer_connection.set_local_description(description).await?;
        Ok(())
    }

    async fn set_remote_description(&self, description: RTCSessionDescription) -> Result<()> {
        self.peer_connection.set_remote_description(description).await?;
        Ok(())
    }

    async fn local_description(&self) -> Option<RTCSessionDescription> {
        self.peer_connection.local_description().await
    }

    async fn add_ice_candidate(&self, candidate: RTCIceCandidateInit) -> Result<()> {
        self.peer_connection.add_ice_candidate(candidate).await?;
        Ok(())
    }

    async fn add_track(&self, track: Arc<LocalMediaTrack>) -> Result<()> {
        let sender = self.peer_connection.add_track(track.rtc_track()).await?;
        self.senders.lock().await.push((sender, track));
        Ok(())
    }

    async fn sender_tracks(&self) -> Vec<Arc<LocalMediaTrack>> {
        self.senders
            .lock()
            .await
            .iter()
            .map(|(_, track)| Arc::clone(track))
            .collect()
    }

    async fn replace_sender_track(
        &self,
        current: &Arc<LocalMediaTrack>,
        replacement: Arc<LocalMediaTrack>,
    ) -> Result<()> {
        let mut senders = self.senders.lock().await;
        let slot = senders
            .iter_mut()
            .find(|(_, track)| Arc::ptr_eq(track, current))
            .ok_or_else(|| anyhow::anyhow!("track {} is not attached to a sender", current.id()))?;

        slot.0.replace_track(Some(replacement.rtc_track())).await?;
        slot.1 = replacement;
        Ok(())
    }

    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannel>> {
        let channel = self.peer_connection.create_data_channel(label, None).await?;

        let events = self.events.clone();
        channel.on_message(Box::new(move |msg: DataChannelMessage| {
            events.emit(PeerConnectionEvent::DataMessage(msg.data));
            Box::pin(async {})
        }));

        let events = self.events.clone();
        channel.on_close(Box::new(move || {
            events.emit(PeerConnectionEvent::DataChannelClosed);
            Box::pin(async {})
        }));

        Ok(Arc::new(WebRtcDataChannel { channel }))
    }

    async fn has_inbound_audio(&self) -> bool {
        self.inbound_audio.load(Ordering::SeqCst)
    }

    async fn stats(&self) -> Result<StatsSnapshot> {
        let report = self.peer_connection.get_stats().await;
        let entries = report
            .reports
            .values()
            .filter_map(|stats| match stats {
                StatsReportType::InboundRTP(inbound) => {
                    let kind = match &*inbound.kind {
                        "audio" => Some(MediaKind::Audio),
                        "video" => Some(MediaKind::Video),
                        _ => None,
                    };
                    Some(StatsEntry {
                        kind,
                        inbound: true,
                        audio_level: match kind {
                            Some(MediaKind::Audio) => self.audio_level.level(),
                            _ => None,
                        },
                    })
                }
                _ => None,
            })
            .collect();

        Ok(StatsSnapshot { entries })
    }

    async fn close(&self) -> Result<()> {
        debug!(key = %self.events.key(), "closing peer connection");
        self.peer_connection.close().await.map_err(Error::from)
    }
}

pub struct WebRtcDataChannel {
    channel: Arc<RTCDataChannel>,
}

#[async_trait]
impl DataChannel for WebRtcDataChannel {
    fn label(&self) -> String {
        self.channel.label().to_owned()
    }

    async fn send(&self, data: Bytes) -> Result<()> {
        self.channel.send(&data).await?;
        Ok(())
    }
}
