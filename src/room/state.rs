use std::sync::Arc;

use crate::connection::{ConnectionKey, ConnectionTable};
use crate::peer::{Peer, Roster};
use crate::rtc::DataChannel;

/// The self entry's in-band channel, tied to the entry that created it.
pub(crate) struct NativeChannel {
    pub(crate) generation: u64,
    pub(crate) channel: Arc<dyn DataChannel>,
}

/// Everything a room owns. Only the room task touches it.
pub(crate) struct RoomState {
    pub(crate) room_id: String,
    pub(crate) self_peer: Peer,
    pub(crate) roster: Roster,
    pub(crate) connections: ConnectionTable,
    pub(crate) data_channels_enabled: bool,
    pub(crate) native_channel: Option<NativeChannel>,
}

impl RoomState {
    pub(crate) fn new(room_id: String, self_peer: Peer, data_channels_enabled: bool) -> Self {
        Self {
            room_id,
            self_peer,
            roster: Roster::new(),
            connections: ConnectionTable::new(),
            data_channels_enabled,
            native_channel: None,
        }
    }

    pub(crate) fn self_key(&self) -> ConnectionKey {
        ConnectionKey::Peer(self.self_peer.id.clone())
    }

    /// The peer a connection's traffic is attributed to.
    ///
    /// The screenshare belongs to the self peer. Peers that already left are
    /// reported as a placeholder carrying only the identity.
    pub(crate) fn peer_for(&self, key: &ConnectionKey) -> Peer {
        let id = key.peer_id().unwrap_or(&self.self_peer.id);
        match self.roster.get(id) {
            Some(peer) => peer.clone(),
            None if *id == self.self_peer.id => self.self_peer.clone(),
            None => Peer::placeholder(id.clone()),
        }
    }

    /// Drops the native channel if it was created by `generation` of the self entry.
    pub(crate) fn release_native_channel(&mut self, key: &ConnectionKey, generation: u64) -> bool {
        let owned = *key == self.self_key()
            && self
                .native_channel
                .as_ref()
                .map_or(false, |native| native.generation == generation);
        if owned {
            self.native_channel = None;
        }
        owned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::PeerId;

    fn state() -> RoomState {
        let mut state = RoomState::new("lobby".into(), Peer::new("me", "Me"), true);
        state.roster.insert(Peer::new("A", "Ann"));
        state
    }

    #[test]
    fn screenshare_is_attributed_to_self() {
        let state = state();
        assert_eq!(state.peer_for(&ConnectionKey::Screenshare).id, PeerId::from("me"));
    }

    #[test]
    fn unknown_peers_get_a_placeholder() {
        let state = state();
        assert_eq!(state.peer_for(&ConnectionKey::Peer("A".into())).display_name, "Ann");

        let ghost = state.peer_for(&ConnectionKey::Peer("ghost".into()));
        assert_eq!(ghost.id, PeerId::from("ghost"));
        assert!(!ghost.active);
    }
}
