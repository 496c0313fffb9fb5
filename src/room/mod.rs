//! A joined room.
//!
//! [`spawn`] starts the room task, which exclusively owns the roster,
//! the Connection Table, the native data channel and the application
//! callbacks. Signaling events, peer connection notifications, negotiation
//! step results, timer ticks and [`RoomHandle`] requests all arrive as
//! messages and are handled one at a time, in arrival order per source.

mod negotiation;
mod state;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::future::join_all;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

use self::negotiation::{Negotiator, StepResult};
use self::state::{NativeChannel, RoomState};
use crate::callbacks::RoomCallbacks;
use crate::config::ClientConfig;
use crate::connection::{
    ConnectionEntry, ConnectionKey, ConnectionState, ConnectionStatus, NegotiationRole,
    PublishKind,
};
use crate::data::{AuxiliaryChannel, AuxiliarySink};
use crate::error::{Error, Result};
use crate::media::{
    ContentHint, DisplayConstraints, LocalMediaTrack, MediaConstraints, MediaDevices, MediaKind,
    MediaStream, PeerMedia,
};
use crate::metrics::{sample_targets, AudioLevelMonitor, AudioSample};
use crate::peer::{Peer, PeerId};
use crate::rtc::{
    ConnectionSettings, DataChannel, PeerConnection, PeerConnectionEvent, PeerConnectionFactory,
    PeerEventSink, TaggedPeerEvent,
};
use crate::signaling::{
    EnabledPayload, InboundEvent, JoinedChannel, MessagePayload, OfferPayload, OutboundEvent,
    PeerRefPayload, RawEvent, SignalingSink,
};

/// Everything a room is started from.
pub(crate) struct RoomInit {
    pub(crate) room_id: String,
    pub(crate) channel: JoinedChannel,
    pub(crate) config: ClientConfig,
    pub(crate) callbacks: RoomCallbacks,
    pub(crate) factory: Arc<dyn PeerConnectionFactory>,
    pub(crate) devices: Arc<dyn MediaDevices>,
    pub(crate) auxiliary: Option<AuxiliaryChannel>,
}

pub(crate) enum RoomCommand {
    PublishMedia {
        stream: MediaStream,
        respond_to: oneshot::Sender<Result<()>>,
    },
    SubscribeTo {
        peer_id: PeerId,
        respond_to: oneshot::Sender<Result<()>>,
    },
    StopPublishing {
        respond_to: oneshot::Sender<Result<()>>,
    },
    PublishScreenshare {
        stream: MediaStream,
        respond_to: oneshot::Sender<Result<()>>,
    },
    StopScreenshare {
        respond_to: oneshot::Sender<Result<()>>,
    },
    SetAudioEnabled {
        enabled: bool,
        respond_to: oneshot::Sender<Result<()>>,
    },
    SetVideoEnabled {
        enabled: bool,
        respond_to: oneshot::Sender<Result<()>>,
    },
    ReplaceTrack {
        track: Arc<LocalMediaTrack>,
        /// Reported to the application as the new self media once swapped in.
        local_stream: Option<MediaStream>,
        respond_to: oneshot::Sender<Result<()>>,
    },
    NativeChannel {
        respond_to: oneshot::Sender<Option<Arc<dyn DataChannel>>>,
    },
    SendJson {
        message: Value,
        respond_to: oneshot::Sender<Result<()>>,
    },
    Peers {
        respond_to: oneshot::Sender<Vec<Peer>>,
    },
    Peer {
        peer_id: PeerId,
        respond_to: oneshot::Sender<Option<Peer>>,
    },
    ConnectionKeys {
        respond_to: oneshot::Sender<Vec<ConnectionKey>>,
    },
    ConnectionStatus {
        key: ConnectionKey,
        respond_to: oneshot::Sender<Option<watch::Receiver<ConnectionStatus>>>,
    },
    Leave {
        respond_to: oneshot::Sender<()>,
    },
}

/// Applies the join snapshot and starts the room task.
///
/// `on_peer_joined` fires for every peer in the initial roster, then
/// `on_peer_count_updated` once, before this returns.
pub(crate) fn spawn(init: RoomInit) -> RoomHandle {
    let RoomInit {
        room_id,
        channel,
        config,
        mut callbacks,
        factory,
        devices,
        auxiliary,
    } = init;
    let JoinedChannel {
        sink,
        events,
        response,
    } = channel;

    let mut state = RoomState::new(
        room_id.clone(),
        response.peer.clone(),
        response.data_channels_enabled,
    );
    for peer in response.peers_in_room {
        state.roster.insert(peer.clone());
        callbacks.peer_joined(&peer);
    }
    callbacks.peer_count_updated(response.participant_count);
    if !state.roster.contains(&response.peer.id) {
        state.roster.insert(response.peer.clone());
    }

    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let (peer_events_tx, peer_events_rx) = mpsc::unbounded_channel();
    let (steps_tx, steps_rx) = mpsc::unbounded_channel();
    let (audio_tx, audio_rx) = mpsc::unbounded_channel();
    let (retry_tx, retry_rx) = mpsc::unbounded_channel();

    let (aux_sink, aux_messages) = match auxiliary {
        Some(AuxiliaryChannel { sink, messages }) => (Some(sink), Some(messages)),
        None => (None, None),
    };

    let actor = RoomActor {
        state,
        callbacks,
        sink,
        factory,
        settings: ConnectionSettings {
            ice_servers: config.ice_servers.clone(),
        },
        data_channel_label: config.data_channel_label.clone(),
        retry_join_delay: config.retry_join_delay,
        negotiator: Negotiator::new(steps_tx),
        peer_events_tx,
        audio_tx,
        retry_tx,
        audio_monitor: AudioLevelMonitor::new(config.audio_level_interval),
    };
    let inputs = RoomInputs {
        signaling: events,
        peer_events: peer_events_rx,
        steps: steps_rx,
        audio: audio_rx,
        retries: retry_rx,
        auxiliary: aux_messages,
        commands: commands_rx,
    };

    info!(room = %room_id, peer = %response.peer.id, "joined room");
    tokio::spawn(actor.run(inputs));

    RoomHandle {
        commands: commands_tx,
        devices,
        auxiliary: aux_sink,
        room_id: Arc::from(room_id),
        self_peer: response.peer,
    }
}

struct RoomInputs {
    signaling: mpsc::UnboundedReceiver<RawEvent>,
    peer_events: mpsc::UnboundedReceiver<TaggedPeerEvent>,
    steps: mpsc::UnboundedReceiver<StepResult>,
    audio: mpsc::UnboundedReceiver<AudioSample>,
    retries: mpsc::UnboundedReceiver<PeerId>,
    auxiliary: Option<mpsc::UnboundedReceiver<Bytes>>,
    commands: mpsc::UnboundedReceiver<RoomCommand>,
}

pub(crate) struct RoomActor {
    state: RoomState,
    callbacks: RoomCallbacks,
    sink: Arc<dyn SignalingSink>,
    factory: Arc<dyn PeerConnectionFactory>,
    settings: ConnectionSettings,
    data_channel_label: String,
    retry_join_delay: Duration,
    negotiator: Negotiator,
    peer_events_tx: mpsc::UnboundedSender<TaggedPeerEvent>,
    audio_tx: mpsc::UnboundedSender<AudioSample>,
    retry_tx: mpsc::UnboundedSender<PeerId>,
    audio_monitor: AudioLevelMonitor,
}

impl RoomActor {
    async fn run(mut self, mut inputs: RoomInputs) {
        let mut ticker = self.audio_monitor.ticker();
        let mut signaling_open = true;
        let mut auxiliary_open = inputs.auxiliary.is_some();

        loop {
            tokio::select! {
                event = inputs.signaling.recv(), if signaling_open => match event {
                    Some(raw) => self.handle_raw_event(raw).await,
                    None => {
                        warn!(room = %self.state.room_id, "signaling channel closed");
                        signaling_open = false;
                    }
                },
                Some(tagged) = inputs.peer_events.recv() => self.handle_peer_event(tagged),
                Some(result) = inputs.steps.recv() => self.handle_step(result),
                Some(sample) = inputs.audio.recv() => self.handle_audio_sample(sample),
                Some(peer_id) = inputs.retries.recv() => {
                    debug!(peer = %peer_id, "retrying subscription");
                    self.push(OutboundEvent::SubscribeTo(PeerRefPayload { id: peer_id }));
                }
                message = recv_auxiliary(&mut inputs.auxiliary), if auxiliary_open => match message {
                    Some(message) => self.callbacks.peer_ws_message(message),
                    None => {
                        info!(room = %self.state.room_id, "auxiliary channel closed");
                        auxiliary_open = false;
                    }
                },
                _ = ticker.tick() => {
                    let targets = sample_targets(&self.state.connections);
                    self.audio_monitor.sample(targets, &self.audio_tx);
                }
                command = inputs.commands.recv() => match command {
                    Some(RoomCommand::Leave { respond_to }) => {
                        self.shutdown().await;
                        let _ = respond_to.send(());
                        return;
                    }
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
            }
        }

        self.shutdown().await;
    }

    async fn shutdown(&mut self) {
        info!(
            room = %self.state.room_id,
            connections = self.state.connections.len(),
            "leaving room"
        );
        self.state.native_channel = None;
        let closing = self
            .state
            .connections
            .drain()
            .map(|(key, entry)| async move {
                stop_sender_tracks(&entry).await;
                if let Err(e) = entry.pc.close().await {
                    debug!(%key, "error closing connection: {e}");
                }
            })
            .collect::<Vec<_>>();
        join_all(closing).await;
    }

    fn push(&self, event: OutboundEvent) {
        let name = event.name();
        debug!(event = name, "sending");
        if let Err(e) = self.sink.push(event) {
            warn!(event = name, "failed to push signaling event: {e}");
        }
    }

    fn try_push(&self, event: OutboundEvent) -> Result<()> {
        debug!(event = event.name(), "sending");
        self.sink.push(event)
    }

    async fn handle_raw_event(&mut self, raw: RawEvent) {
        let event = match InboundEvent::try_from(raw) {
            Ok(event) => event,
            Err(e) => {
                warn!(room = %self.state.room_id, "ignoring signaling event: {e}");
                return;
            }
        };
        debug!(event = event.name(), "received");

        match event {
            InboundEvent::PeerJoined(peer) => {
                self.state.roster.insert(peer.clone());
                self.callbacks.peer_joined(&peer);
            }
            InboundEvent::PeerLeft(peer) => self.on_peer_left(peer),
            InboundEvent::PeerUpdated(peer) => {
                if !self.state.roster.replace(peer.clone()) {
                    warn!(peer = %peer.id, "update for a peer not in the roster");
                }
                self.callbacks.peer_updated(&peer);
            }
            InboundEvent::CountUpdated(payload) => {
                self.callbacks.peer_count_updated(payload.count);
            }
            InboundEvent::Broadcast(payload) => {
                self.callbacks.peer_json_message(&payload.peer, payload.message);
            }
            InboundEvent::Offer(offer) => self.on_offer(offer).await,
            InboundEvent::Answer(answer) => {
                let key = self.state.self_key();
                self.on_answer(key, answer);
            }
            InboundEvent::AnswerScreenshare(answer) => {
                self.on_answer(ConnectionKey::Screenshare, answer);
            }
            InboundEvent::RetryJoin(PeerRefPayload { id }) => {
                let delay = self.retry_join_delay;
                let retry_tx = self.retry_tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = retry_tx.send(id);
                });
            }
            InboundEvent::Trickle(trickle) => self.on_remote_candidate(trickle),
        }
    }

    fn on_peer_left(&mut self, peer: Peer) {
        self.state.roster.remove(&peer.id);

        let key = ConnectionKey::Peer(peer.id.clone());
        if let Some(entry) = self.state.connections.remove(&key) {
            debug!(%key, "tearing down connection of departed peer");
            self.state.release_native_channel(&key, entry.generation);
            tokio::spawn(async move {
                if let Err(e) = entry.pc.close().await {
                    debug!(%key, "error closing connection: {e}");
                }
            });
        }

        self.callbacks.peer_left(&peer);
    }

    async fn on_offer(&mut self, offer: OfferPayload) {
        let OfferPayload {
            publisher_peer_id,
            server_ref,
            offer,
        } = offer;
        let key = ConnectionKey::Peer(publisher_peer_id.clone());

        if self.state.connections.contains(&key) {
            warn!(%key, server_ref, "ignoring duplicate offer");
            return;
        }

        let role = NegotiationRole::Subscriber {
            server_ref: server_ref.clone(),
        };
        let (generation, pc) = match self.create_connection(key.clone(), role).await {
            Ok(created) => created,
            Err(e) => {
                error!(%key, "failed to create connection for offer: {e}");
                return;
            }
        };

        self.negotiator
            .apply_remote_offer(key, generation, pc, offer);
        self.callbacks
            .peer_server_ref(&publisher_peer_id, &server_ref);
    }

    /// Creates a connection and its table entry, replacing any entry at `key`.
    async fn create_connection(
        &mut self,
        key: ConnectionKey,
        role: NegotiationRole,
    ) -> Result<(u64, Arc<dyn PeerConnection>)> {
        let generation = self.state.connections.next_generation();
        let events = PeerEventSink::new(key.clone(), generation, self.peer_events_tx.clone());
        let pc = self.factory.create(&self.settings, events).await?;

        if self.state.data_channels_enabled {
            match pc.create_data_channel(&self.data_channel_label).await {
                Ok(channel) if key == self.state.self_key() => {
                    debug!(%key, label = %channel.label(), "native data channel created");
                    self.state.native_channel = Some(NativeChannel {
                        generation,
                        channel,
                    });
                }
                Ok(_) => {}
                Err(e) => warn!(%key, "failed to create data channel: {e}"),
            }
        }

        let entry = ConnectionEntry::new(generation, role, Arc::clone(&pc));
        if let Some(displaced) = self.state.connections.insert(key.clone(), entry) {
            warn!(%key, "replacing an existing connection");
            if self
                .state
                .native_channel
                .as_ref()
                .map_or(false, |native| native.generation == displaced.generation)
            {
                self.state.native_channel = None;
            }
            tokio::spawn(async move {
                stop_sender_tracks(&displaced).await;
                let _ = displaced.pc.close().await;
            });
        }

        info!(%key, generation, "connection created");
        Ok((generation, pc))
    }

    fn handle_peer_event(&mut self, tagged: TaggedPeerEvent) {
        let TaggedPeerEvent {
            key,
            generation,
            event,
        } = tagged;

        let Some(entry) = self.state.connections.current(&key, generation) else {
            debug!(%key, generation, "dropping event for a removed connection");
            return;
        };

        match event {
            PeerConnectionEvent::IceCandidate(Some(candidate)) => {
                self.on_local_candidate(key, generation, candidate);
            }
            PeerConnectionEvent::IceCandidate(None) => {
                debug!(%key, "ICE gathering complete");
            }
            PeerConnectionEvent::Track(media) => {
                debug!(%key, kind = %media.kind, "remote track");
                let peer = self.state.peer_for(&key);
                self.callbacks.peer_media(&peer, PeerMedia::Remote(media));
            }
            PeerConnectionEvent::ConnectionState(s) => {
                entry.monitor.update_peer_state(s);
                let state = ConnectionState::from(s);
                if state.is_terminal() {
                    warn!(%key, %state, "peer connection is down");
                } else {
                    info!(%key, %state, "peer connection state changed");
                }
            }
            PeerConnectionEvent::IceConnectionState(s) => {
                entry.monitor.update_ice_state(s);
                let state = ConnectionState::from(s);
                if state.is_terminal() {
                    warn!(%key, %state, "ICE connection is down");
                } else {
                    debug!(%key, %state, "ICE connection state changed");
                }
            }
            PeerConnectionEvent::DataMessage(data) => {
                let peer = self.state.peer_for(&key);
                self.callbacks.peer_native_message(&peer, data);
            }
            PeerConnectionEvent::DataChannelClosed => {
                if self.state.release_native_channel(&key, generation) {
                    info!(%key, "native data channel closed");
                }
            }
            PeerConnectionEvent::NegotiationNeeded => {
                debug!(%key, "negotiation needed");
            }
        }
    }

    fn handle_audio_sample(&mut self, sample: AudioSample) {
        if self
            .state
            .connections
            .current(&sample.key, sample.generation)
            .is_none()
        {
            return;
        }
        let peer = self.state.peer_for(&sample.key);
        self.callbacks
            .peer_audio_level_changed(&peer, sample.level);
    }

    async fn handle_command(&mut self, command: RoomCommand) {
        match command {
            RoomCommand::PublishMedia { stream, respond_to } => {
                let key = self.state.self_key();
                let result = self.publish(key, PublishKind::Camera, stream).await;
                let _ = respond_to.send(result);
            }
            RoomCommand::PublishScreenshare { stream, respond_to } => {
                let result = self
                    .publish(ConnectionKey::Screenshare, PublishKind::Screenshare, stream)
                    .await;
                let _ = respond_to.send(result);
            }
            RoomCommand::SubscribeTo {
                peer_id,
                respond_to,
            } => {
                let result = self.try_push(OutboundEvent::SubscribeTo(PeerRefPayload { id: peer_id }));
                let _ = respond_to.send(result);
            }
            RoomCommand::StopPublishing { respond_to } => {
                let key = self.state.self_key();
                self.stop(key, respond_to);
            }
            RoomCommand::StopScreenshare { respond_to } => {
                self.stop(ConnectionKey::Screenshare, respond_to);
            }
            RoomCommand::SetAudioEnabled {
                enabled,
                respond_to,
            } => {
                self.set_tracks_enabled(MediaKind::Audio, enabled).await;
                let result = self.try_push(OutboundEvent::UpdateAudio(EnabledPayload { enabled }));
                let _ = respond_to.send(result);
            }
            RoomCommand::SetVideoEnabled {
                enabled,
                respond_to,
            } => {
                self.set_tracks_enabled(MediaKind::Video, enabled).await;
                let result = self.try_push(OutboundEvent::UpdateVideo(EnabledPayload { enabled }));
                let _ = respond_to.send(result);
            }
            RoomCommand::ReplaceTrack {
                track,
                local_stream,
                respond_to,
            } => {
                let result = self.replace_track(track).await;
                if result.is_ok() {
                    if let Some(stream) = local_stream {
                        let peer = self.state.peer_for(&self.state.self_key());
                        self.callbacks.peer_media(&peer, PeerMedia::Local(stream));
                    }
                }
                let _ = respond_to.send(result);
            }
            RoomCommand::NativeChannel { respond_to } => {
                let channel = self
                    .state
                    .native_channel
                    .as_ref()
                    .map(|native| Arc::clone(&native.channel));
                let _ = respond_to.send(channel);
            }
            RoomCommand::SendJson {
                message,
                respond_to,
            } => {
                let result = self.try_push(OutboundEvent::Broadcast(MessagePayload { message }));
                let _ = respond_to.send(result);
            }
            RoomCommand::Peers { respond_to } => {
                let _ = respond_to.send(self.state.roster.iter().cloned().collect());
            }
            RoomCommand::Peer {
                peer_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.state.roster.get(&peer_id).cloned());
            }
            RoomCommand::ConnectionKeys { respond_to } => {
                let _ = respond_to.send(self.state.connections.keys().cloned().collect());
            }
            RoomCommand::ConnectionStatus { key, respond_to } => {
                let status = self
                    .state
                    .connections
                    .get(&key)
                    .map(|entry| entry.monitor.subscribe());
                let _ = respond_to.send(status);
            }
            RoomCommand::Leave { respond_to } => {
                // Handled by the run loop.
                let _ = respond_to.send(());
            }
        }
    }

    async fn publish(
        &mut self,
        key: ConnectionKey,
        kind: PublishKind,
        stream: MediaStream,
    ) -> Result<()> {
        let (generation, pc) = self
            .create_connection(key.clone(), NegotiationRole::Publisher(kind))
            .await?;

        for track in &stream.tracks {
            if kind == PublishKind::Screenshare || track.kind() == MediaKind::Video {
                track.set_content_hint(ContentHint::Detail);
            }
            if let Err(e) = pc.add_track(Arc::clone(track)).await {
                error!(%key, track = track.id(), "failed to add track: {e}");
                self.abandon(&key, generation, e.to_string());
                return Err(e);
            }
        }

        info!(%key, tracks = stream.tracks.len(), "publishing");
        self.negotiator.create_offer(key, generation, pc);
        Ok(())
    }

    /// Drops a publisher entry that never got as far as offering.
    ///
    /// The caller keeps ownership of the stream, so its tracks are left running.
    fn abandon(&mut self, key: &ConnectionKey, generation: u64, reason: String) {
        if self.state.connections.current(key, generation).is_none() {
            return;
        }
        let Some(entry) = self.state.connections.remove(key) else {
            return;
        };
        entry.monitor.set_error(reason);
        self.state.release_native_channel(key, generation);

        let key = key.clone();
        tokio::spawn(async move {
            if let Err(e) = entry.pc.close().await {
                warn!(%key, "error closing abandoned connection: {e}");
            }
        });
    }

    /// Removes the entry at `key` and responds once its connection is closed.
    fn stop(&mut self, key: ConnectionKey, respond_to: oneshot::Sender<Result<()>>) {
        let Some(entry) = self.state.connections.remove(&key) else {
            debug!(%key, "nothing to stop");
            let _ = respond_to.send(Ok(()));
            return;
        };
        self.state.release_native_channel(&key, entry.generation);
        info!(%key, "stopping");

        tokio::spawn(async move {
            stop_sender_tracks(&entry).await;
            let result = entry.pc.close().await;
            if let Err(e) = &result {
                warn!(%key, "error closing connection: {e}");
            }
            let _ = respond_to.send(result);
        });
    }

    async fn set_tracks_enabled(&mut self, kind: MediaKind, enabled: bool) {
        let Some(entry) = self.state.connections.get(&self.state.self_key()) else {
            debug!(%kind, enabled, "not publishing, only signaling the change");
            return;
        };
        for track in entry.pc.sender_tracks().await {
            if track.kind() == kind {
                track.set_enabled(enabled);
            }
        }
    }

    /// Swaps every self sender track of the replacement's kind.
    async fn replace_track(&mut self, replacement: Arc<LocalMediaTrack>) -> Result<()> {
        let key = self.state.self_key();
        let Some(entry) = self.state.connections.get(&key) else {
            debug!(kind = %replacement.kind(), "not publishing, nothing to switch");
            return Ok(());
        };
        let pc = Arc::clone(&entry.pc);

        for current in pc.sender_tracks().await {
            if current.kind() != replacement.kind() {
                continue;
            }
            replacement.set_enabled(current.enabled());
            if replacement.kind() == MediaKind::Video {
                replacement.set_content_hint(ContentHint::Detail);
            }
            pc.replace_sender_track(&current, Arc::clone(&replacement))
                .await?;
            current.stop();
            info!(%key, from = current.id(), to = replacement.id(), "switched track");
        }
        Ok(())
    }
}

async fn stop_sender_tracks(entry: &ConnectionEntry) {
    for track in entry.pc.sender_tracks().await {
        track.stop();
    }
}

async fn recv_auxiliary(messages: &mut Option<mpsc::UnboundedReceiver<Bytes>>) -> Option<Bytes> {
    match messages {
        Some(messages) => messages.recv().await,
        None => None,
    }
}

/// Cloneable handle to a running room.
///
/// Every method is a request to the room task. Once the room has left, they
/// fail with [`Error::RoomClosed`].
#[derive(Clone)]
pub struct RoomHandle {
    commands: mpsc::UnboundedSender<RoomCommand>,
    devices: Arc<dyn MediaDevices>,
    auxiliary: Option<Arc<dyn AuxiliarySink>>,
    room_id: Arc<str>,
    self_peer: Peer,
}

impl RoomHandle {
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// The local peer as announced in the join response.
    pub fn self_peer(&self) -> &Peer {
        &self.self_peer
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> RoomCommand,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .map_err(|_| Error::RoomClosed)?;
        rx.await.map_err(|_| Error::RoomClosed)
    }

    /// Publishes `stream` as the self peer's camera/microphone media.
    pub async fn publish_media(&self, stream: MediaStream) -> Result<()> {
        self.request(|respond_to| RoomCommand::PublishMedia { stream, respond_to })
            .await?
    }

    /// Asks the server to send us an offer for `peer_id`'s media.
    pub async fn subscribe_to_peer(&self, peer_id: impl Into<PeerId>) -> Result<()> {
        let peer_id = peer_id.into();
        self.request(|respond_to| RoomCommand::SubscribeTo {
            peer_id,
            respond_to,
        })
        .await?
    }

    pub async fn stop_publishing(&self) -> Result<()> {
        self.request(|respond_to| RoomCommand::StopPublishing { respond_to })
            .await?
    }

    /// Captures the screen and publishes it, returning the captured stream.
    pub async fn start_screenshare(&self) -> Result<MediaStream> {
        let stream = self
            .devices
            .display_media(DisplayConstraints::default())
            .await?;
        let published = stream.clone();
        self.request(|respond_to| RoomCommand::PublishScreenshare {
            stream: published,
            respond_to,
        })
        .await??;
        Ok(stream)
    }

    pub async fn stop_screenshare(&self) -> Result<()> {
        self.request(|respond_to| RoomCommand::StopScreenshare { respond_to })
            .await?
    }

    pub async fn mute(&self) -> Result<()> {
        self.set_audio_enabled(false).await
    }

    pub async fn unmute(&self) -> Result<()> {
        self.set_audio_enabled(true).await
    }

    pub async fn hide_video(&self) -> Result<()> {
        self.set_video_enabled(false).await
    }

    pub async fn show_video(&self) -> Result<()> {
        self.set_video_enabled(true).await
    }

    async fn set_audio_enabled(&self, enabled: bool) -> Result<()> {
        self.request(|respond_to| RoomCommand::SetAudioEnabled {
            enabled,
            respond_to,
        })
        .await?
    }

    async fn set_video_enabled(&self, enabled: bool) -> Result<()> {
        self.request(|respond_to| RoomCommand::SetVideoEnabled {
            enabled,
            respond_to,
        })
        .await?
    }

    pub async fn switch_microphone(&self, device_id: &str) -> Result<()> {
        let stream = self
            .devices
            .user_media(MediaConstraints::audio_device(device_id))
            .await?;
        let track = stream
            .first_track(MediaKind::Audio)
            .ok_or(Error::NoTrack(MediaKind::Audio))?;
        self.request(|respond_to| RoomCommand::ReplaceTrack {
            track,
            local_stream: None,
            respond_to,
        })
        .await?
    }

    /// Switches the published camera; the new stream is also reported through
    /// `on_peer_media` for the self peer.
    pub async fn switch_camera(&self, device_id: &str) -> Result<()> {
        let stream = self
            .devices
            .user_media(MediaConstraints::video_device(device_id))
            .await?;
        let track = stream
            .first_track(MediaKind::Video)
            .ok_or(Error::NoTrack(MediaKind::Video))?;
        self.request(|respond_to| RoomCommand::ReplaceTrack {
            track,
            local_stream: Some(stream),
            respond_to,
        })
        .await?
    }

    pub async fn switch_audio_output(&self, device_id: &str) -> Result<()> {
        self.devices.set_audio_output(device_id).await
    }

    /// Sends over the native data channel of the self connection.
    pub async fn send_native_message(&self, message: impl Into<Bytes>) -> Result<()> {
        let channel = self
            .request(|respond_to| RoomCommand::NativeChannel { respond_to })
            .await?;
        match channel {
            Some(channel) => channel.send(message.into()).await,
            None => {
                error!(room = %self.room_id, "could not send message, no data channel available");
                Err(Error::NoDataChannel)
            }
        }
    }

    /// Broadcasts `message` to the room over signaling.
    pub async fn send_json_message(&self, message: Value) -> Result<()> {
        self.request(|respond_to| RoomCommand::SendJson {
            message,
            respond_to,
        })
        .await?
    }

    pub fn send_auxiliary_message(&self, message: impl Into<Bytes>) -> Result<()> {
        match &self.auxiliary {
            Some(sink) => sink.send(message.into()),
            None => Err(Error::NoAuxiliaryChannel),
        }
    }

    pub async fn peers(&self) -> Result<Vec<Peer>> {
        self.request(|respond_to| RoomCommand::Peers { respond_to })
            .await
    }

    pub async fn peer(&self, peer_id: impl Into<PeerId>) -> Result<Option<Peer>> {
        let peer_id = peer_id.into();
        self.request(|respond_to| RoomCommand::Peer {
            peer_id,
            respond_to,
        })
        .await
    }

    pub async fn connection_keys(&self) -> Result<Vec<ConnectionKey>> {
        self.request(|respond_to| RoomCommand::ConnectionKeys { respond_to })
            .await
    }

    /// Watches the negotiation and transport state of the entry at `key`.
    pub async fn connection_status(
        &self,
        key: ConnectionKey,
    ) -> Result<Option<watch::Receiver<ConnectionStatus>>> {
        self.request(|respond_to| RoomCommand::ConnectionStatus { key, respond_to })
            .await
    }

    /// Closes every connection and stops the room task.
    pub async fn leave(&self) -> Result<()> {
        self.request(|respond_to| RoomCommand::Leave { respond_to })
            .await
    }
}
