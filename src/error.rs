use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;
use webrtc::Error as WebRTCError;

use crate::media::MediaKind;

#[derive(Debug, Error)]
pub enum Error {
    #[error("WebRTC error: {0}")]
    WebRTC(#[from] WebRTCError),

    #[error("WebSocket error: {0}")]
    Ws(#[from] WsError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The room refused the join request.
    #[error("Unable to join room {room}: {reason}")]
    Join { room: String, reason: String },

    #[error("Signaling channel closed")]
    SignalingClosed,

    #[error("Unknown signaling event `{0}`")]
    UnknownEvent(String),

    #[error("Malformed `{event}` payload: {source}")]
    MalformedEvent {
        event: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Could not send message, no data channel available")]
    NoDataChannel,

    #[error("Could not send message, auxiliary channel is not connected")]
    NoAuxiliaryChannel,

    #[error("Peer connection has no local description")]
    NoLocalDescription,

    #[error("Obtained stream has no {0} track")]
    NoTrack(MediaKind),

    #[error("Media error: {0}")]
    Media(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// The room actor is gone; the handle outlived it.
    #[error("Room is closed")]
    RoomClosed,

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
