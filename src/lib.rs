//! Client-side session layer for multi-party WebRTC rooms.
//!
//! A [`Client`] opens a signaling connection, [`Connection::join_room`] joins
//! a room and returns a [`RoomHandle`] for publishing media, subscribing to
//! peers and exchanging data. Room activity is reported through the
//! [`RoomCallbacks`] given at join time.

pub mod callbacks;
pub mod client;
pub mod config;
pub mod connection;
pub mod data;
pub mod error;
pub mod media;
pub mod metrics;
pub mod peer;
pub mod room;
pub mod rtc;
pub mod signaling;

pub use callbacks::RoomCallbacks;
pub use client::{Client, Collaborators, Connection};
pub use config::{ClientConfig, RoomConfig};
pub use connection::{ConnectionKey, ConnectionStatus, SCREENSHARE_WIRE_ID};
pub use error::{Error, Result};
pub use media::{LocalMediaTrack, MediaDevices, MediaKind, MediaStream, PeerMedia};
pub use peer::{Peer, PeerId};
pub use room::RoomHandle;
