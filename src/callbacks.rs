//! Application callbacks a room reports through.
//!
//! Every slot is optional and an empty slot behaves like a no-op handler.
//! Callbacks run on the room task, one at a time and in event order, so they
//! should return quickly and hand heavy work off elsewhere.

use std::fmt;

use bytes::Bytes;
use serde_json::Value;

use crate::media::PeerMedia;
use crate::peer::{Peer, PeerId};

macro_rules! room_callbacks {
    ($(
        $(#[$doc:meta])*
        $slot:ident => $setter:ident($($arg:ident: $ty:ty),*);
    )*) => {
        #[derive(Default)]
        pub struct RoomCallbacks {
            $($slot: Option<Box<dyn FnMut($($ty),*) + Send>>,)*
        }

        impl RoomCallbacks {
            pub fn new() -> Self {
                Self::default()
            }

            $(
                $(#[$doc])*
                pub fn $setter<F>(mut self, f: F) -> Self
                where
                    F: FnMut($($ty),*) + Send + 'static,
                {
                    self.$slot = Some(Box::new(f));
                    self
                }

                pub(crate) fn $slot(&mut self, $($arg: $ty),*) {
                    if let Some(f) = self.$slot.as_mut() {
                        f($($arg),*);
                    }
                }
            )*
        }

        impl fmt::Debug for RoomCallbacks {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct("RoomCallbacks")
                    $(.field(stringify!($slot), &self.$slot.is_some()))*
                    .finish()
            }
        }
    };
}

room_callbacks! {
    /// A peer entered the room, including everyone present at join time.
    peer_joined => on_peer_joined(peer: &Peer);
    /// Media for a peer: remote tracks as they arrive, or a new local stream
    /// for the self peer after a camera switch.
    peer_media => on_peer_media(peer: &Peer, media: PeerMedia);
    /// An inbound offer was accepted; carries the server reference echoed back
    /// in the answer.
    peer_server_ref => on_peer_server_ref(peer_id: &PeerId, server_ref: &str);
    peer_left => on_peer_left(peer: &Peer);
    peer_updated => on_peer_updated(peer: &Peer);
    peer_count_updated => on_peer_count_updated(count: u64);
    /// Linear audio level of a peer's inbound audio, sampled periodically.
    peer_audio_level_changed => on_peer_audio_level_changed(peer: &Peer, level: f64);
    peer_native_message => on_peer_native_message(peer: &Peer, message: Bytes);
    peer_json_message => on_peer_json_message(peer: &Peer, message: Value);
    /// Message from the auxiliary duplex. The duplex is per self peer, so
    /// there is no sender attribution.
    peer_ws_message => on_peer_ws_message(message: Bytes);
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[test]
    fn empty_slots_are_no_ops() {
        let mut callbacks = RoomCallbacks::new();
        callbacks.peer_joined(&Peer::new("A", "Ann"));
        callbacks.peer_count_updated(3);
        callbacks.peer_ws_message(Bytes::from_static(b"x"));
    }

    #[test]
    fn set_slots_receive_their_arguments() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let joined = Arc::clone(&seen);
        let counted = Arc::clone(&seen);
        let mut callbacks = RoomCallbacks::new()
            .on_peer_joined(move |peer| joined.lock().unwrap().push(format!("joined {}", peer.id)))
            .on_peer_count_updated(move |count| counted.lock().unwrap().push(format!("count {count}")));

        callbacks.peer_joined(&Peer::new("A", "Ann"));
        callbacks.peer_count_updated(1);

        assert_eq!(*seen.lock().unwrap(), vec!["joined A", "count 1"]);
    }

    #[test]
    fn debug_lists_which_slots_are_set() {
        let callbacks = RoomCallbacks::new().on_peer_left(|_| {});
        let debug = format!("{callbacks:?}");
        assert!(debug.contains("peer_left: true"));
        assert!(debug.contains("peer_joined: false"));
    }
}
