//! In-memory stand-ins for the transports and devices a room talks to.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use webrtc_room_client::connection::ConnectionKey;
use webrtc_room_client::data::{AuxiliaryChannel, AuxiliaryConnector, AuxiliarySink};
use webrtc_room_client::media::{
    DeviceInfo, DeviceKind, DisplayConstraints, LocalMediaTrack, MediaConstraints, MediaDevices,
    MediaKind, MediaStream, PeerMedia,
};
use webrtc_room_client::metrics::{StatsEntry, StatsSnapshot};
use webrtc_room_client::rtc::{
    ConnectionSettings, DataChannel, PeerConnection, PeerConnectionEvent, PeerConnectionFactory,
    PeerEventSink,
};
use webrtc_room_client::signaling::{
    JoinRequest, JoinResponse, JoinedChannel, OutboundEvent, RawEvent, Signaling, SignalingSink,
};
use webrtc_room_client::{
    ClientConfig, Collaborators, Connection, Error, Peer, PeerId, Result, RoomCallbacks,
    RoomConfig, RoomHandle,
};

pub const SELF_ID: &str = "me";

pub fn description(kind: &str, sdp: &str) -> RTCSessionDescription {
    serde_json::from_value(json!({ "type": kind, "sdp": sdp })).unwrap()
}

/// Routes room logs to the test output, filtered by `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Polls `check` until it holds, advancing (paused) time between attempts.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..100 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition was never reached");
}

/// Lets the room and every task it spawned run until they are idle.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

#[derive(Default)]
pub struct RecordingSink {
    pushed: Mutex<Vec<RawEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<RawEvent> {
        self.pushed.lock().unwrap().clone()
    }

    pub fn named(&self, name: &str) -> Vec<Value> {
        self.events()
            .into_iter()
            .filter(|e| e.event == name)
            .map(|e| e.payload)
            .collect()
    }
}

impl SignalingSink for RecordingSink {
    fn push(&self, event: OutboundEvent) -> Result<()> {
        self.pushed.lock().unwrap().push(event.into_raw()?);
        Ok(())
    }
}

pub struct FakeSignaling {
    sink: Arc<RecordingSink>,
    response: JoinResponse,
    events: Mutex<Option<mpsc::UnboundedReceiver<RawEvent>>>,
    refuse: bool,
    pub joins: Mutex<Vec<(String, JoinRequest)>>,
}

#[async_trait]
impl Signaling for FakeSignaling {
    async fn join(&self, topic: &str, request: JoinRequest) -> Result<JoinedChannel> {
        self.joins
            .lock()
            .unwrap()
            .push((topic.to_owned(), request));
        if self.refuse {
            return Err(Error::Join {
                room: topic.to_owned(),
                reason: "unauthorized".into(),
            });
        }
        let events = self
            .events
            .lock()
            .unwrap()
            .take()
            .ok_or(Error::SignalingClosed)?;
        let sink: Arc<dyn SignalingSink> = self.sink.clone();
        Ok(JoinedChannel {
            sink,
            events,
            response: self.response.clone(),
        })
    }
}

#[derive(Default)]
pub struct FakeDataChannel {
    pub sent: Mutex<Vec<Bytes>>,
}

#[async_trait]
impl DataChannel for FakeDataChannel {
    fn label(&self) -> String {
        "room-data".into()
    }

    async fn send(&self, data: Bytes) -> Result<()> {
        self.sent.lock().unwrap().push(data);
        Ok(())
    }
}

pub struct FakePeerConnection {
    pub events: PeerEventSink,
    local: Mutex<Option<RTCSessionDescription>>,
    pub remote: Mutex<Option<RTCSessionDescription>>,
    tracks: Mutex<Vec<Arc<LocalMediaTrack>>>,
    pub candidates: Mutex<Vec<RTCIceCandidateInit>>,
    pub data_channel: Mutex<Option<Arc<FakeDataChannel>>>,
    pub close_calls: AtomicUsize,
    pub stats_reads: AtomicUsize,
    close_fails: bool,
    add_track_fails: bool,
    remote_description_fails: bool,
    answer_delay: Option<Duration>,
    audio_level: Option<f64>,
}

impl FakePeerConnection {
    pub fn key(&self) -> ConnectionKey {
        self.events.key().clone()
    }

    pub fn tracks(&self) -> Vec<Arc<LocalMediaTrack>> {
        self.tracks.lock().unwrap().clone()
    }

    pub fn emit(&self, event: PeerConnectionEvent) {
        self.events.emit(event);
    }
}

#[async_trait]
impl PeerConnection for FakePeerConnection {
    async fn create_offer(&self) -> Result<RTCSessionDescription> {
        Ok(description("offer", "fake-offer"))
    }

    async fn create_answer(&self) -> Result<RTCSessionDescription> {
        if let Some(delay) = self.answer_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(description("answer", "fake-answer"))
    }

    async fn set_local_description(&self, description: RTCSessionDescription) -> Result<()> {
        *self.local.lock().unwrap() = Some(description);
        Ok(())
    }

    async fn set_remote_description(&self, description: RTCSessionDescription) -> Result<()> {
        if self.remote_description_fails {
            return Err(Error::Media("remote description rejected".into()));
        }
        *self.remote.lock().unwrap() = Some(description);
        Ok(())
    }

    async fn local_description(&self) -> Option<RTCSessionDescription> {
        self.local.lock().unwrap().clone()
    }

    async fn add_ice_candidate(&self, candidate: RTCIceCandidateInit) -> Result<()> {
        self.candidates.lock().unwrap().push(candidate);
        Ok(())
    }

    async fn add_track(&self, track: Arc<LocalMediaTrack>) -> Result<()> {
        if self.add_track_fails {
            return Err(Error::Media("no sender for track".into()));
        }
        self.tracks.lock().unwrap().push(track);
        Ok(())
    }

    async fn sender_tracks(&self) -> Vec<Arc<LocalMediaTrack>> {
        self.tracks()
    }

    async fn replace_sender_track(
        &self,
        current: &Arc<LocalMediaTrack>,
        replacement: Arc<LocalMediaTrack>,
    ) -> Result<()> {
        let mut tracks = self.tracks.lock().unwrap();
        match tracks.iter_mut().find(|t| Arc::ptr_eq(t, current)) {
            Some(slot) => {
                *slot = replacement;
                Ok(())
            }
            None => Err(Error::Media("unknown sender".into())),
        }
    }

    async fn create_data_channel(&self, _label: &str) -> Result<Arc<dyn DataChannel>> {
        let channel = Arc::new(FakeDataChannel::default());
        *self.data_channel.lock().unwrap() = Some(Arc::clone(&channel));
        Ok(channel)
    }

    async fn has_inbound_audio(&self) -> bool {
        self.audio_level.is_some()
    }

    async fn stats(&self) -> Result<StatsSnapshot> {
        self.stats_reads.fetch_add(1, Ordering::SeqCst);
        Ok(StatsSnapshot {
            entries: vec![StatsEntry {
                kind: Some(MediaKind::Audio),
                inbound: true,
                audio_level: self.audio_level,
            }],
        })
    }

    async fn close(&self) -> Result<()> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        if self.close_fails {
            Err(Error::Media("close failed".into()))
        } else {
            Ok(())
        }
    }
}

#[derive(Default)]
pub struct FakeFactory {
    created: Mutex<Vec<Arc<FakePeerConnection>>>,
    pub close_fails: AtomicBool,
    pub add_track_fails: AtomicBool,
    pub remote_description_fails: AtomicBool,
    pub answer_delay: Mutex<Option<Duration>>,
    pub audio_level: Mutex<Option<f64>>,
}

impl FakeFactory {
    pub fn created(&self) -> Vec<Arc<FakePeerConnection>> {
        self.created.lock().unwrap().clone()
    }

    /// The most recent connection created for `key`.
    pub fn connection(&self, key: &ConnectionKey) -> Option<Arc<FakePeerConnection>> {
        self.created()
            .into_iter()
            .rev()
            .find(|pc| pc.key() == *key)
    }
}

#[async_trait]
impl PeerConnectionFactory for FakeFactory {
    async fn create(
        &self,
        _settings: &ConnectionSettings,
        events: PeerEventSink,
    ) -> Result<Arc<dyn PeerConnection>> {
        let pc = Arc::new(FakePeerConnection {
            events,
            local: Mutex::new(None),
            remote: Mutex::new(None),
            tracks: Mutex::new(Vec::new()),
            candidates: Mutex::new(Vec::new()),
            data_channel: Mutex::new(None),
            close_calls: AtomicUsize::new(0),
            stats_reads: AtomicUsize::new(0),
            close_fails: self.close_fails.load(Ordering::SeqCst),
            add_track_fails: self.add_track_fails.load(Ordering::SeqCst),
            remote_description_fails: self.remote_description_fails.load(Ordering::SeqCst),
            answer_delay: *self.answer_delay.lock().unwrap(),
            audio_level: *self.audio_level.lock().unwrap(),
        });
        self.created.lock().unwrap().push(Arc::clone(&pc));
        Ok(pc)
    }
}

#[derive(Default)]
pub struct FakeDevices {
    pub audio_output: Mutex<Option<String>>,
    pub display_requests: Mutex<Vec<DisplayConstraints>>,
}

impl FakeDevices {
    pub fn stream(id: &str, kinds: &[(MediaKind, &str)]) -> MediaStream {
        MediaStream::new(
            id,
            kinds
                .iter()
                .map(|(kind, track_id)| Arc::new(LocalMediaTrack::new(*kind, *track_id, id)))
                .collect(),
        )
    }
}

#[async_trait]
impl MediaDevices for FakeDevices {
    async fn user_media(&self, constraints: MediaConstraints) -> Result<MediaStream> {
        let mut tracks = Vec::new();
        if let Some(audio) = constraints.audio {
            let id = format!("mic-{}", audio.device_id.unwrap_or_default());
            tracks.push(Arc::new(LocalMediaTrack::new(MediaKind::Audio, id, "user")));
        }
        if let Some(video) = constraints.video {
            let id = format!("cam-{}", video.device_id.unwrap_or_default());
            tracks.push(Arc::new(LocalMediaTrack::new(MediaKind::Video, id, "user")));
        }
        Ok(MediaStream::new("user", tracks))
    }

    async fn display_media(&self, constraints: DisplayConstraints) -> Result<MediaStream> {
        self.display_requests.lock().unwrap().push(constraints);
        Ok(Self::stream("display", &[(MediaKind::Video, "screen")]))
    }

    async fn enumerate_devices(&self) -> Result<Vec<DeviceInfo>> {
        let device = |id: &str, kind| DeviceInfo {
            device_id: id.into(),
            kind,
            label: id.into(),
        };
        Ok(vec![
            device("mic-1", DeviceKind::AudioInput),
            device("cam-1", DeviceKind::VideoInput),
            device("speakers", DeviceKind::AudioOutput),
            device("mic-2", DeviceKind::AudioInput),
        ])
    }

    async fn set_audio_output(&self, device_id: &str) -> Result<()> {
        *self.audio_output.lock().unwrap() = Some(device_id.to_owned());
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeAuxiliary {
    pub sent: Arc<Mutex<Vec<Bytes>>>,
    inbound: Mutex<Option<mpsc::UnboundedReceiver<Bytes>>>,
}

struct RecordingAuxSink(Arc<Mutex<Vec<Bytes>>>);

impl AuxiliarySink for RecordingAuxSink {
    fn send(&self, message: Bytes) -> Result<()> {
        self.0.lock().unwrap().push(message);
        Ok(())
    }
}

#[async_trait]
impl AuxiliaryConnector for FakeAuxiliary {
    async fn connect(&self, _room_id: &str, _peer_id: &PeerId) -> Result<AuxiliaryChannel> {
        let messages = self
            .inbound
            .lock()
            .unwrap()
            .take()
            .ok_or(Error::NoAuxiliaryChannel)?;
        Ok(AuxiliaryChannel {
            sink: Arc::new(RecordingAuxSink(Arc::clone(&self.sent))),
            messages,
        })
    }
}

/// What the application saw, in callback order.
#[derive(Debug, Clone, PartialEq)]
pub enum Seen {
    Joined(String),
    Left(String),
    Updated(String),
    Count(u64),
    ServerRef(String, String),
    RemoteMedia(String, MediaKind),
    LocalMedia(String, String),
    AudioLevel(String, f64),
    Native(String, Bytes),
    Json(String, Value),
    Ws(Bytes),
}

#[derive(Clone, Default)]
pub struct Recorder(Arc<Mutex<Vec<Seen>>>);

impl Recorder {
    pub fn seen(&self) -> Vec<Seen> {
        self.0.lock().unwrap().clone()
    }

    pub fn contains(&self, seen: &Seen) -> bool {
        self.0.lock().unwrap().contains(seen)
    }

    pub fn callbacks(&self) -> RoomCallbacks {
        let log = |r: &Recorder| Arc::clone(&r.0);
        let (a, b, c, d, e, f, g, h, i, j) = (
            log(self),
            log(self),
            log(self),
            log(self),
            log(self),
            log(self),
            log(self),
            log(self),
            log(self),
            log(self),
        );
        RoomCallbacks::new()
            .on_peer_joined(move |p| a.lock().unwrap().push(Seen::Joined(p.id.to_string())))
            .on_peer_left(move |p| b.lock().unwrap().push(Seen::Left(p.id.to_string())))
            .on_peer_updated(move |p| c.lock().unwrap().push(Seen::Updated(p.id.to_string())))
            .on_peer_count_updated(move |n| d.lock().unwrap().push(Seen::Count(n)))
            .on_peer_server_ref(move |id, server_ref| {
                e.lock()
                    .unwrap()
                    .push(Seen::ServerRef(id.to_string(), server_ref.to_owned()))
            })
            .on_peer_media(move |p, media| {
                let seen = match media {
                    PeerMedia::Remote(remote) => Seen::RemoteMedia(p.id.to_string(), remote.kind),
                    PeerMedia::Local(stream) => Seen::LocalMedia(p.id.to_string(), stream.id),
                };
                f.lock().unwrap().push(seen);
            })
            .on_peer_audio_level_changed(move |p, level| {
                g.lock()
                    .unwrap()
                    .push(Seen::AudioLevel(p.id.to_string(), level))
            })
            .on_peer_native_message(move |p, data| {
                h.lock().unwrap().push(Seen::Native(p.id.to_string(), data))
            })
            .on_peer_json_message(move |p, message| {
                i.lock().unwrap().push(Seen::Json(p.id.to_string(), message))
            })
            .on_peer_ws_message(move |data| j.lock().unwrap().push(Seen::Ws(data)))
    }
}

pub struct JoinOptions {
    pub peers_in_room: Vec<Peer>,
    pub participant_count: u64,
    pub data_channels_enabled: bool,
    pub refuse: bool,
    pub config: ClientConfig,
}

impl Default for JoinOptions {
    fn default() -> Self {
        Self {
            peers_in_room: Vec::new(),
            participant_count: 1,
            data_channels_enabled: false,
            refuse: false,
            config: ClientConfig::new("ws://rooms.test"),
        }
    }
}

pub struct Harness {
    pub room: RoomHandle,
    pub events: mpsc::UnboundedSender<RawEvent>,
    pub aux_inbound: mpsc::UnboundedSender<Bytes>,
    pub sink: Arc<RecordingSink>,
    pub signaling: Arc<FakeSignaling>,
    pub factory: Arc<FakeFactory>,
    pub devices: Arc<FakeDevices>,
    pub auxiliary: Arc<FakeAuxiliary>,
    pub recorder: Recorder,
}

impl Harness {
    pub async fn join(options: JoinOptions) -> Harness {
        Self::try_join(options).await.unwrap()
    }

    pub async fn try_join(options: JoinOptions) -> Result<Harness> {
        init_tracing();
        let (events, events_rx) = mpsc::unbounded_channel();
        let (aux_inbound, aux_rx) = mpsc::unbounded_channel();
        let sink = Arc::new(RecordingSink::default());
        let signaling = Arc::new(FakeSignaling {
            sink: Arc::clone(&sink),
            response: JoinResponse {
                peer: Peer::new(SELF_ID, "Me"),
                peers_in_room: options.peers_in_room,
                participant_count: options.participant_count,
                data_channels_enabled: options.data_channels_enabled,
            },
            events: Mutex::new(Some(events_rx)),
            refuse: options.refuse,
            joins: Mutex::new(Vec::new()),
        });
        let factory = Arc::new(FakeFactory::default());
        let devices = Arc::new(FakeDevices::default());
        let auxiliary = Arc::new(FakeAuxiliary {
            sent: Arc::default(),
            inbound: Mutex::new(Some(aux_rx)),
        });
        let recorder = Recorder::default();

        let connection = Connection::new(
            signaling.clone(),
            options.config,
            Collaborators {
                factory: factory.clone(),
                devices: devices.clone(),
                auxiliary: Some(auxiliary.clone()),
            },
        );
        let room = connection
            .join_room(
                "lobby",
                "token",
                RoomConfig::new("Me").callbacks(recorder.callbacks()),
            )
            .await?;

        Ok(Harness {
            room,
            events,
            aux_inbound,
            sink,
            signaling,
            factory,
            devices,
            auxiliary,
            recorder,
        })
    }

    pub fn send(&self, event: &str, payload: Value) {
        self.events.send(RawEvent::new(event, payload)).unwrap();
    }

    pub fn self_key(&self) -> ConnectionKey {
        ConnectionKey::Peer(PeerId::from(SELF_ID))
    }

    pub async fn connection_keys(&self) -> Vec<ConnectionKey> {
        let mut keys = self.room.connection_keys().await.unwrap();
        keys.sort();
        keys
    }

    pub fn offer(&self, publisher: &str, server_ref: &str) {
        self.send(
            "offer",
            json!({
                "publisherPeerId": publisher,
                "serverRef": server_ref,
                "offer": { "type": "offer", "sdp": format!("offer-from-{publisher}") }
            }),
        );
    }
}
