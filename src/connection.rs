//! The Connection Table: one negotiation session per key.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;

use crate::peer::PeerId;
use crate::rtc::PeerConnection;

/// Wire identity of the local screenshare connection.
pub const SCREENSHARE_WIRE_ID: &str = "725aacbb-cdca-4386-9de5-1cbb7d5964b5";

/// Addresses an entry of the [`ConnectionTable`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConnectionKey {
    Peer(PeerId),
    /// The local screenshare, never a real peer.
    Screenshare,
}

impl ConnectionKey {
    pub fn from_wire(id: &str) -> Self {
        if id == SCREENSHARE_WIRE_ID {
            ConnectionKey::Screenshare
        } else {
            ConnectionKey::Peer(PeerId::from(id))
        }
    }

    pub fn wire_id(&self) -> &str {
        match self {
            ConnectionKey::Peer(id) => id.as_str(),
            ConnectionKey::Screenshare => SCREENSHARE_WIRE_ID,
        }
    }

    pub fn peer_id(&self) -> Option<&PeerId> {
        match self {
            ConnectionKey::Peer(id) => Some(id),
            ConnectionKey::Screenshare => None,
        }
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionKey::Peer(id) => write!(f, "{id}"),
            ConnectionKey::Screenshare => write!(f, "screenshare"),
        }
    }
}

impl From<PeerId> for ConnectionKey {
    fn from(id: PeerId) -> Self {
        ConnectionKey::Peer(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectionState {
    /// Disconnected, failed and closed connections don't come back on their own.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ConnectionState::Disconnected | ConnectionState::Failed | ConnectionState::Closed
        )
    }
}

impl From<RTCPeerConnectionState> for ConnectionState {
    fn from(state: RTCPeerConnectionState) -> Self {
        match state {
            RTCPeerConnectionState::Connecting => ConnectionState::Connecting,
            RTCPeerConnectionState::Connected => ConnectionState::Connected,
            RTCPeerConnectionState::Disconnected => ConnectionState::Disconnected,
            RTCPeerConnectionState::Failed => ConnectionState::Failed,
            RTCPeerConnectionState::Closed => ConnectionState::Closed,
            _ => ConnectionState::New,
        }
    }
}

impl From<RTCIceConnectionState> for ConnectionState {
    fn from(state: RTCIceConnectionState) -> Self {
        match state {
            RTCIceConnectionState::Checking => ConnectionState::Connecting,
            RTCIceConnectionState::Connected | RTCIceConnectionState::Completed => {
                ConnectionState::Connected
            }
            RTCIceConnectionState::Disconnected => ConnectionState::Disconnected,
            RTCIceConnectionState::Failed => ConnectionState::Failed,
            RTCIceConnectionState::Closed => ConnectionState::Closed,
            _ => ConnectionState::New,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::New => write!(f, "New"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Failed => write!(f, "Failed"),
            ConnectionState::Closed => write!(f, "Closed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishKind {
    Camera,
    Screenshare,
}

/// Which side of the offer/answer exchange this client plays for an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NegotiationRole {
    /// Offer-first, sending local media.
    Publisher(PublishKind),
    /// Answer-first, receiving a remote publisher's media.
    Subscriber { server_ref: String },
}

impl NegotiationRole {
    pub fn server_ref(&self) -> Option<&str> {
        match self {
            NegotiationRole::Subscriber { server_ref } => Some(server_ref),
            NegotiationRole::Publisher(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NegotiationPhase {
    Created,
    LocalDescriptionSet,
    RemoteDescriptionSet,
    Established,
}

impl NegotiationPhase {
    pub fn has_remote_description(self) -> bool {
        matches!(
            self,
            NegotiationPhase::RemoteDescriptionSet | NegotiationPhase::Established
        )
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionStatus {
    pub phase: NegotiationPhase,
    pub state: ConnectionState,
    pub ice_state: RTCIceConnectionState,
    pub peer_state: RTCPeerConnectionState,
    pub last_error: Option<String>,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self {
            phase: NegotiationPhase::Created,
            state: ConnectionState::New,
            ice_state: RTCIceConnectionState::New,
            peer_state: RTCPeerConnectionState::New,
            last_error: None,
        }
    }
}

/// Publishes the [`ConnectionStatus`] of one entry to any number of watchers.
#[derive(Clone)]
pub struct ConnectionMonitor {
    status: Arc<watch::Sender<ConnectionStatus>>,
}

impl ConnectionMonitor {
    pub fn new() -> Self {
        let (status, _) = watch::channel(ConnectionStatus::default());
        Self {
            status: Arc::new(status),
        }
    }

    pub fn update_phase(&self, phase: NegotiationPhase) {
        self.status.send_modify(|status| status.phase = phase);
    }

    pub fn update_peer_state(&self, state: RTCPeerConnectionState) {
        self.status.send_modify(|status| {
            status.peer_state = state;
            status.state = state.into();
        });
    }

    pub fn update_ice_state(&self, state: RTCIceConnectionState) {
        self.status.send_modify(|status| {
            status.ice_state = state;
            // Peer connection state is authoritative once it has moved.
            if status.peer_state == RTCPeerConnectionState::New {
                status.state = state.into();
            }
        });
    }

    pub fn set_error(&self, error: String) {
        self.status.send_modify(|status| status.last_error = Some(error));
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }
}

impl Default for ConnectionMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ConnectionMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ConnectionMonitor")
            .field(&*self.status.borrow())
            .finish()
    }
}

pub struct ConnectionEntry {
    pub generation: u64,
    pub role: NegotiationRole,
    pub phase: NegotiationPhase,
    pub pc: Arc<dyn PeerConnection>,
    /// Remote candidates that arrived before a remote description.
    pub pending_candidates: Vec<RTCIceCandidateInit>,
    /// Local candidates gathered before our description went out.
    pub local_candidates: Vec<RTCIceCandidateInit>,
    pub description_sent: bool,
    pub monitor: ConnectionMonitor,
}

impl ConnectionEntry {
    pub fn new(generation: u64, role: NegotiationRole, pc: Arc<dyn PeerConnection>) -> Self {
        Self {
            generation,
            role,
            phase: NegotiationPhase::Created,
            pc,
            pending_candidates: Vec::new(),
            local_candidates: Vec::new(),
            description_sent: false,
            monitor: ConnectionMonitor::new(),
        }
    }

    pub fn set_phase(&mut self, phase: NegotiationPhase) {
        self.phase = phase;
        self.monitor.update_phase(phase);
    }
}

impl fmt::Debug for ConnectionEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionEntry")
            .field("generation", &self.generation)
            .field("role", &self.role)
            .field("phase", &self.phase)
            .field("pending_candidates", &self.pending_candidates.len())
            .field("description_sent", &self.description_sent)
            .finish()
    }
}

/// At most one entry per [`ConnectionKey`].
///
/// Generations are never reused, so a `(key, generation)` pair names exactly
/// one entry for the lifetime of the table.
#[derive(Debug, Default)]
pub struct ConnectionTable {
    entries: HashMap<ConnectionKey, ConnectionEntry>,
    next_generation: u64,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    /// Inserts `entry`, handing back whatever it displaced.
    pub fn insert(&mut self, key: ConnectionKey, entry: ConnectionEntry) -> Option<ConnectionEntry> {
        self.entries.insert(key, entry)
    }

    pub fn remove(&mut self, key: &ConnectionKey) -> Option<ConnectionEntry> {
        self.entries.remove(key)
    }

    pub fn get(&self, key: &ConnectionKey) -> Option<&ConnectionEntry> {
        self.entries.get(key)
    }

    pub fn get_mut(&mut self, key: &ConnectionKey) -> Option<&mut ConnectionEntry> {
        self.entries.get_mut(key)
    }

    /// The entry for `key`, only if it is still the one created as `generation`.
    pub fn current(&self, key: &ConnectionKey, generation: u64) -> Option<&ConnectionEntry> {
        self.entries
            .get(key)
            .filter(|entry| entry.generation == generation)
    }

    pub fn current_mut(
        &mut self,
        key: &ConnectionKey,
        generation: u64,
    ) -> Option<&mut ConnectionEntry> {
        self.entries
            .get_mut(key)
            .filter(|entry| entry.generation == generation)
    }

    pub fn contains(&self, key: &ConnectionKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &ConnectionKey> {
        self.entries.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ConnectionKey, &ConnectionEntry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn drain(&mut self) -> impl Iterator<Item = (ConnectionKey, ConnectionEntry)> + '_ {
        self.entries.drain()
    }
}
