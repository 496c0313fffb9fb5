//! The peer-connection capability a room negotiates over.
//!
//! [`webrtc_rs`] provides the webrtc-rs backed implementation; anything else
//! implementing [`PeerConnectionFactory`] can be plugged into a room.

mod audio_level;
pub mod webrtc_rs;

use std::sync::Arc;

use ::webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use ::webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use ::webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use ::webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::trace;

use crate::connection::ConnectionKey;
use crate::error::Result;
use crate::media::{LocalMediaTrack, RemoteMedia};
use crate::metrics::StatsSnapshot;

/// Notifications a peer connection raises on its own.
#[derive(Debug, Clone)]
pub enum PeerConnectionEvent {
    /// A local candidate was gathered; `None` once gathering completes.
    IceCandidate(Option<RTCIceCandidateInit>),
    Track(RemoteMedia),
    ConnectionState(RTCPeerConnectionState),
    IceConnectionState(RTCIceConnectionState),
    DataMessage(Bytes),
    DataChannelClosed,
    NegotiationNeeded,
}

#[derive(Debug)]
pub(crate) struct TaggedPeerEvent {
    pub(crate) key: ConnectionKey,
    pub(crate) generation: u64,
    pub(crate) event: PeerConnectionEvent,
}

/// Where a connection reports its [`PeerConnectionEvent`]s.
///
/// Every sink is bound to the connection table entry it was created for, so
/// events emitted after that entry is gone are discarded by the room.
#[derive(Debug, Clone)]
pub struct PeerEventSink {
    key: ConnectionKey,
    generation: u64,
    tx: mpsc::UnboundedSender<TaggedPeerEvent>,
}

impl PeerEventSink {
    pub(crate) fn new(
        key: ConnectionKey,
        generation: u64,
        tx: mpsc::UnboundedSender<TaggedPeerEvent>,
    ) -> Self {
        Self {
            key,
            generation,
            tx,
        }
    }

    pub fn key(&self) -> &ConnectionKey {
        &self.key
    }

    pub fn emit(&self, event: PeerConnectionEvent) {
        let tagged = TaggedPeerEvent {
            key: self.key.clone(),
            generation: self.generation,
            event,
        };
        if self.tx.send(tagged).is_err() {
            trace!(key = %self.key, "room is gone, dropping peer connection event");
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub ice_servers: Vec<String>,
}

#[async_trait]
pub trait PeerConnectionFactory: Send + Sync {
    async fn create(
        &self,
        settings: &ConnectionSettings,
        events: PeerEventSink,
    ) -> Result<Arc<dyn PeerConnection>>;
}

#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn create_offer(&self) -> Result<RTCSessionDescription>;

    async fn create_answer(&self) -> Result<RTCSessionDescription>;

    async fn set_local_description(&self, description: RTCSessionDescription) -> Result<()>;

    async fn set_remote_description(&self, description: RTCSessionDescription) -> Result<()>;

    async fn local_description(&self) -> Option<RTCSessionDescription>;

    async fn add_ice_candidate(&self, candidate: RTCIceCandidateInit) -> Result<()>;

    async fn add_track(&self, track: Arc<LocalMediaTrack>) -> Result<()>;

    /// Tracks currently attached to this connection's senders.
    async fn sender_tracks(&self) -> Vec<Arc<LocalMediaTrack>>;

    async fn replace_sender_track(
        &self,
        current: &Arc<LocalMediaTrack>,
        replacement: Arc<LocalMediaTrack>,
    ) -> Result<()>;

    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannel>>;

    async fn has_inbound_audio(&self) -> bool;

    async fn stats(&self) -> Result<StatsSnapshot>;

    async fn close(&self) -> Result<()>;
}

/// A reliable, ordered in-band channel.
#[async_trait]
pub trait DataChannel: Send + Sync {
    fn label(&self) -> String;

    async fn send(&self, data: Bytes) -> Result<()>;
}
