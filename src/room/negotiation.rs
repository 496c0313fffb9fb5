//! Offer/answer/trickle-ICE steps.
//!
//! Each step runs as its own task and reports a [`StepResult`] back to the
//! room, which re-checks that the entry it targets is still current before
//! advancing it. A publisher goes
//! `Created -> LocalDescriptionSet -> Established`; a subscriber goes
//! `Created -> RemoteDescriptionSet -> Established`.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, warn};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use super::RoomActor;
use crate::connection::{ConnectionKey, NegotiationPhase, NegotiationRole, PublishKind};
use crate::error::{Error, Result};
use crate::rtc::PeerConnection;
use crate::signaling::{AnswerPayload, OutboundEvent, SanitizedCandidate, TricklePayload};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Stage {
    CreateOffer,
    ApplyRemoteOffer,
    CreateAnswer,
    ApplyLocalDescription,
    ApplyRemoteAnswer,
    AddCandidate,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self {
            Stage::CreateOffer => "create offer",
            Stage::ApplyRemoteOffer => "apply remote offer",
            Stage::CreateAnswer => "create answer",
            Stage::ApplyLocalDescription => "apply local description",
            Stage::ApplyRemoteAnswer => "apply remote answer",
            Stage::AddCandidate => "add ICE candidate",
        };
        f.write_str(stage)
    }
}

#[derive(Debug)]
pub(crate) enum Step {
    OfferCreated(RTCSessionDescription),
    RemoteOfferApplied,
    AnswerCreated(RTCSessionDescription),
    /// Carries the description the connection settled on.
    LocalDescriptionApplied(RTCSessionDescription),
    RemoteAnswerApplied,
    CandidateApplied,
    Failed { stage: Stage, error: Error },
}

#[derive(Debug)]
pub(crate) struct StepResult {
    pub(crate) key: ConnectionKey,
    pub(crate) generation: u64,
    pub(crate) step: Step,
}

/// Spawns negotiation steps, reporting each outcome on one channel.
#[derive(Clone)]
pub(crate) struct Negotiator {
    tx: mpsc::UnboundedSender<StepResult>,
}

impl Negotiator {
    pub(crate) fn new(tx: mpsc::UnboundedSender<StepResult>) -> Self {
        Self { tx }
    }

    fn spawn<F>(&self, key: ConnectionKey, generation: u64, stage: Stage, step: F)
    where
        F: Future<Output = Result<Step>> + Send + 'static,
    {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let step = step
                .await
                .unwrap_or_else(|error| Step::Failed { stage, error });
            let _ = tx.send(StepResult {
                key,
                generation,
                step,
            });
        });
    }

    pub(crate) fn create_offer(
        &self,
        key: ConnectionKey,
        generation: u64,
        pc: Arc<dyn PeerConnection>,
    ) {
        self.spawn(key, generation, Stage::CreateOffer, async move {
            Ok(Step::OfferCreated(pc.create_offer().await?))
        });
    }

    pub(crate) fn apply_remote_offer(
        &self,
        key: ConnectionKey,
        generation: u64,
        pc: Arc<dyn PeerConnection>,
        offer: RTCSessionDescription,
    ) {
        self.spawn(key, generation, Stage::ApplyRemoteOffer, async move {
            pc.set_remote_description(offer).await?;
            Ok(Step::RemoteOfferApplied)
        });
    }

    pub(crate) fn create_answer(
        &self,
        key: ConnectionKey,
        generation: u64,
        pc: Arc<dyn PeerConnection>,
    ) {
        self.spawn(key, generation, Stage::CreateAnswer, async move {
            Ok(Step::AnswerCreated(pc.create_answer().await?))
        });
    }

    pub(crate) fn apply_local(
        &self,
        key: ConnectionKey,
        generation: u64,
        pc: Arc<dyn PeerConnection>,
        description: RTCSessionDescription,
    ) {
        self.spawn(key, generation, Stage::ApplyLocalDescription, async move {
            pc.set_local_description(description).await?;
            let local = pc
                .local_description()
                .await
                .ok_or(Error::NoLocalDescription)?;
            Ok(Step::LocalDescriptionApplied(local))
        });
    }

    pub(crate) fn apply_remote_answer(
        &self,
        key: ConnectionKey,
        generation: u64,
        pc: Arc<dyn PeerConnection>,
        answer: RTCSessionDescription,
    ) {
        self.spawn(key, generation, Stage::ApplyRemoteAnswer, async move {
            pc.set_remote_description(answer).await?;
            Ok(Step::RemoteAnswerApplied)
        });
    }

    pub(crate) fn add_candidate(
        &self,
        key: ConnectionKey,
        generation: u64,
        pc: Arc<dyn PeerConnection>,
        candidate: RTCIceCandidateInit,
    ) {
        self.spawn(key, generation, Stage::AddCandidate, async move {
            pc.add_ice_candidate(candidate).await?;
            Ok(Step::CandidateApplied)
        });
    }
}

impl RoomActor {
    pub(super) fn handle_step(&mut self, result: StepResult) {
        let StepResult {
            key,
            generation,
            step,
        } = result;

        let Some(entry) = self.state.connections.current_mut(&key, generation) else {
            debug!(%key, generation, "dropping negotiation step for a removed connection");
            return;
        };
        let pc = Arc::clone(&entry.pc);

        match step {
            Step::OfferCreated(offer) => {
                self.negotiator.apply_local(key, generation, pc, offer);
            }
            Step::RemoteOfferApplied => {
                entry.set_phase(NegotiationPhase::RemoteDescriptionSet);
                let pending = std::mem::take(&mut entry.pending_candidates);
                for candidate in pending {
                    self.negotiator
                        .add_candidate(key.clone(), generation, Arc::clone(&pc), candidate);
                }
                self.negotiator.create_answer(key, generation, pc);
            }
            Step::AnswerCreated(answer) => {
                self.negotiator.apply_local(key, generation, pc, answer);
            }
            Step::LocalDescriptionApplied(local) => {
                let event = match entry.role.clone() {
                    NegotiationRole::Publisher(kind) => {
                        entry.set_phase(NegotiationPhase::LocalDescriptionSet);
                        match kind {
                            PublishKind::Camera => OutboundEvent::Offer(local),
                            PublishKind::Screenshare => OutboundEvent::OfferScreenshare(local),
                        }
                    }
                    NegotiationRole::Subscriber { server_ref } => {
                        let event = OutboundEvent::Answer(AnswerPayload {
                            answer: local,
                            publisher_peer_id: key
                                .peer_id()
                                .cloned()
                                .unwrap_or_else(|| self.state.self_peer.id.clone()),
                            server_ref,
                        });
                        entry.set_phase(NegotiationPhase::Established);
                        event
                    }
                };
                debug!(%key, event = event.name(), "sending local description");
                self.push(event);
                self.flush_local_candidates(&key, generation);
            }
            Step::RemoteAnswerApplied => {
                entry.set_phase(NegotiationPhase::Established);
                let pending = std::mem::take(&mut entry.pending_candidates);
                for candidate in pending {
                    self.negotiator
                        .add_candidate(key.clone(), generation, Arc::clone(&pc), candidate);
                }
                debug!(%key, "negotiation established");
            }
            Step::CandidateApplied => {}
            Step::Failed { stage, error } => {
                error!(%key, %stage, "negotiation failed: {error}");
                entry.monitor.set_error(format!("{stage}: {error}"));
            }
        }
    }

    /// Applies an inbound answer to the publisher entry at `key`.
    pub(super) fn on_answer(&mut self, key: ConnectionKey, answer: RTCSessionDescription) {
        let Some(entry) = self.state.connections.get(&key) else {
            warn!(%key, "answer for a connection we don't have");
            return;
        };
        if !matches!(entry.role, NegotiationRole::Publisher(_))
            || entry.phase != NegotiationPhase::LocalDescriptionSet
        {
            warn!(%key, phase = ?entry.phase, "unexpected answer");
            return;
        }
        self.negotiator
            .apply_remote_answer(key, entry.generation, Arc::clone(&entry.pc), answer);
    }

    /// Applies a remote candidate now, or holds it until a remote description exists.
    pub(super) fn on_remote_candidate(&mut self, trickle: TricklePayload) {
        let key = ConnectionKey::from_wire(&trickle.peer_id);
        let Some(entry) = self.state.connections.get_mut(&key) else {
            debug!(%key, "candidate for a connection we don't have");
            return;
        };
        let candidate = RTCIceCandidateInit::from(trickle.candidate);
        if entry.phase.has_remote_description() {
            self.negotiator.add_candidate(
                key,
                entry.generation,
                Arc::clone(&entry.pc),
                candidate,
            );
        } else {
            entry.pending_candidates.push(candidate);
        }
    }

    /// Trickles a local candidate, or holds it until our description went out.
    pub(super) fn on_local_candidate(
        &mut self,
        key: ConnectionKey,
        generation: u64,
        candidate: RTCIceCandidateInit,
    ) {
        let Some(entry) = self.state.connections.current_mut(&key, generation) else {
            return;
        };
        if !entry.description_sent {
            entry.local_candidates.push(candidate);
            return;
        }
        let server_ref = entry.role.server_ref().map(str::to_owned);
        self.push(trickle(&key, candidate, server_ref));
    }

    fn flush_local_candidates(&mut self, key: &ConnectionKey, generation: u64) {
        let Some(entry) = self.state.connections.current_mut(key, generation) else {
            return;
        };
        entry.description_sent = true;
        let server_ref = entry.role.server_ref().map(str::to_owned);
        let candidates = std::mem::take(&mut entry.local_candidates);
        for candidate in candidates {
            self.push(trickle(key, candidate, server_ref.clone()));
        }
    }
}

fn trickle(
    key: &ConnectionKey,
    candidate: RTCIceCandidateInit,
    server_ref: Option<String>,
) -> OutboundEvent {
    OutboundEvent::Trickle(TricklePayload {
        candidate: SanitizedCandidate::from(candidate),
        peer_id: key.wire_id().to_owned(),
        server_ref,
    })
}
