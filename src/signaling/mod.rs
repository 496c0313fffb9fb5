//! Signaling events exchanged with the room server.
//!
//! Inbound traffic arrives as [`RawEvent`]s and is parsed into the closed
//! [`InboundEvent`] set; anything else is rejected with
//! [`Error::UnknownEvent`] so the room can log it instead of silently
//! dropping it.

pub mod ws;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use crate::error::{Error, Result};
use crate::peer::{Peer, PeerId};

/// A named event with an untyped payload, as carried by the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    pub event: String,
    #[serde(default)]
    pub payload: Value,
}

impl RawEvent {
    pub fn new(event: impl Into<String>, payload: Value) -> Self {
        Self {
            event: event.into(),
            payload,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountPayload {
    pub count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastPayload {
    pub peer: Peer,
    pub message: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferPayload {
    pub publisher_peer_id: PeerId,
    pub server_ref: String,
    pub offer: RTCSessionDescription,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerPayload {
    pub answer: RTCSessionDescription,
    pub publisher_peer_id: PeerId,
    pub server_ref: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerRefPayload {
    pub id: PeerId,
}

/// The parts of an ICE candidate that go on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SanitizedCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid")]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_m_line_index: Option<u16>,
}

impl From<RTCIceCandidateInit> for SanitizedCandidate {
    fn from(init: RTCIceCandidateInit) -> Self {
        Self {
            candidate: init.candidate,
            sdp_mid: init.sdp_mid,
            sdp_m_line_index: init.sdp_mline_index,
        }
    }
}

impl From<SanitizedCandidate> for RTCIceCandidateInit {
    fn from(candidate: SanitizedCandidate) -> Self {
        RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_m_line_index,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TricklePayload {
    pub candidate: SanitizedCandidate,
    /// Wire form of the owning connection key.
    pub peer_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_ref: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnabledPayload {
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagePayload {
    pub message: Value,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "payload")]
pub enum InboundEvent {
    #[serde(rename = "onPeerJoined")]
    PeerJoined(Peer),
    #[serde(rename = "onPeerLeft")]
    PeerLeft(Peer),
    #[serde(rename = "onPeerUpdated")]
    PeerUpdated(Peer),
    #[serde(rename = "onPeerCountUpdated")]
    CountUpdated(CountPayload),
    #[serde(rename = "onBroadcast")]
    Broadcast(BroadcastPayload),
    #[serde(rename = "offer")]
    Offer(OfferPayload),
    /// Answer to the self (camera) offer.
    #[serde(rename = "answer")]
    Answer(RTCSessionDescription),
    #[serde(rename = "answer-screenshare")]
    AnswerScreenshare(RTCSessionDescription),
    #[serde(rename = "retryOnPeerJoined")]
    RetryJoin(PeerRefPayload),
    /// A remote ICE candidate for one of our connections.
    #[serde(rename = "trickle")]
    Trickle(TricklePayload),
}

impl InboundEvent {
    pub const NAMES: &'static [&'static str] = &[
        "onPeerJoined",
        "onPeerLeft",
        "onPeerUpdated",
        "onPeerCountUpdated",
        "onBroadcast",
        "offer",
        "answer",
        "answer-screenshare",
        "retryOnPeerJoined",
        "trickle",
    ];

    pub fn name(&self) -> &'static str {
        match self {
            InboundEvent::PeerJoined(_) => "onPeerJoined",
            InboundEvent::PeerLeft(_) => "onPeerLeft",
            InboundEvent::PeerUpdated(_) => "onPeerUpdated",
            InboundEvent::CountUpdated(_) => "onPeerCountUpdated",
            InboundEvent::Broadcast(_) => "onBroadcast",
            InboundEvent::Offer(_) => "offer",
            InboundEvent::Answer(_) => "answer",
            InboundEvent::AnswerScreenshare(_) => "answer-screenshare",
            InboundEvent::RetryJoin(_) => "retryOnPeerJoined",
            InboundEvent::Trickle(_) => "trickle",
        }
    }
}

impl TryFrom<RawEvent> for InboundEvent {
    type Error = Error;

    fn try_from(raw: RawEvent) -> Result<Self> {
        if !Self::NAMES.contains(&raw.event.as_str()) {
            return Err(Error::UnknownEvent(raw.event));
        }
        let event = raw.event.clone();
        let tagged = serde_json::json!({ "event": raw.event, "payload": raw.payload });
        serde_json::from_value(tagged).map_err(|source| Error::MalformedEvent { event, source })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "payload")]
pub enum OutboundEvent {
    #[serde(rename = "offer")]
    Offer(RTCSessionDescription),
    #[serde(rename = "offer-screenshare")]
    OfferScreenshare(RTCSessionDescription),
    #[serde(rename = "answer")]
    Answer(AnswerPayload),
    #[serde(rename = "trickle")]
    Trickle(TricklePayload),
    #[serde(rename = "subscribe_to")]
    SubscribeTo(PeerRefPayload),
    #[serde(rename = "update_audio")]
    UpdateAudio(EnabledPayload),
    #[serde(rename = "update_video")]
    UpdateVideo(EnabledPayload),
    #[serde(rename = "broadcast")]
    Broadcast(MessagePayload),
}

impl OutboundEvent {
    pub fn name(&self) -> &'static str {
        match self {
            OutboundEvent::Offer(_) => "offer",
            OutboundEvent::OfferScreenshare(_) => "offer-screenshare",
            OutboundEvent::Answer(_) => "answer",
            OutboundEvent::Trickle(_) => "trickle",
            OutboundEvent::SubscribeTo(_) => "subscribe_to",
            OutboundEvent::UpdateAudio(_) => "update_audio",
            OutboundEvent::UpdateVideo(_) => "update_video",
            OutboundEvent::Broadcast(_) => "broadcast",
        }
    }

    pub fn into_raw(self) -> Result<RawEvent> {
        Ok(serde_json::from_value(serde_json::to_value(self)?)?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    pub display_name: String,
    pub jwt: String,
}

/// What the server hands back when a join succeeds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinResponse {
    pub peer: Peer,
    #[serde(default)]
    pub peers_in_room: Vec<Peer>,
    #[serde(default)]
    pub participant_count: u64,
    #[serde(default)]
    pub data_channels_enabled: bool,
}

/// Fire-and-forget outbound half of a joined channel.
pub trait SignalingSink: Send + Sync {
    fn push(&self, event: OutboundEvent) -> Result<()>;
}

/// A channel after a successful join handshake.
pub struct JoinedChannel {
    pub sink: Arc<dyn SignalingSink>,
    pub events: mpsc::UnboundedReceiver<RawEvent>,
    pub response: JoinResponse,
}

#[async_trait]
pub trait Signaling: Send + Sync {
    /// Joins `topic`, resolving once the server accepted or refused.
    async fn join(&self, topic: &str, request: JoinRequest) -> Result<JoinedChannel>;
}
