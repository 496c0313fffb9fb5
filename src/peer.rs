//! Room participants and the roster that tracks them.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of a peer, stable for the lifetime of a room session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for PeerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl Borrow<str> for PeerId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// A participant as announced by the room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Peer {
    pub id: PeerId,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub active: bool,
    /// Identity of the peer whose screen this peer is currently sharing.
    #[serde(default)]
    pub screenshare_owner_peer_id: Option<PeerId>,
    #[serde(default)]
    pub audio: bool,
    #[serde(default)]
    pub video: bool,
}

impl Peer {
    pub fn new(id: impl Into<PeerId>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            active: true,
            screenshare_owner_peer_id: None,
            audio: true,
            video: true,
        }
    }

    /// Stand-in for an identity the roster no longer (or never) knew about.
    pub fn placeholder(id: impl Into<PeerId>) -> Self {
        let id = id.into();
        Self {
            display_name: id.to_string(),
            active: false,
            ..Self::new(id, String::new())
        }
    }
}

/// Peers currently known to be in the room.
///
/// Only the room actor mutates the roster; everything else sees snapshots.
#[derive(Debug, Default, Clone)]
pub struct Roster {
    peers: HashMap<PeerId, Peer>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `peer`, overwriting a previous record with the same identity.
    pub(crate) fn insert(&mut self, peer: Peer) -> Option<Peer> {
        self.peers.insert(peer.id.clone(), peer)
    }

    pub(crate) fn remove(&mut self, id: &PeerId) -> Option<Peer> {
        self.peers.remove(id)
    }

    /// Replaces the record of an already known peer.
    ///
    /// Returns `false` (and leaves the roster untouched) for unknown peers.
    pub(crate) fn replace(&mut self, peer: Peer) -> bool {
        match self.peers.get_mut(&peer.id) {
            Some(slot) => {
                *slot = peer;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: &PeerId) -> Option<&Peer> {
        self.peers.get(id)
    }

    pub fn contains(&self, id: &PeerId) -> bool {
        self.peers.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Peer> {
        self.peers.values()
    }
}
