//! Periodic audio-level sampling over the Connection Table.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::debug;

use crate::connection::{ConnectionKey, ConnectionTable};
use crate::media::MediaKind;
use crate::rtc::PeerConnection;

#[derive(Debug, Clone, PartialEq)]
pub struct StatsEntry {
    pub kind: Option<MediaKind>,
    pub inbound: bool,
    /// Linear audio level in `0.0..=1.0`, when the backend measures one.
    pub audio_level: Option<f64>,
}

/// The subset of a connection's statistics the room cares about.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatsSnapshot {
    pub entries: Vec<StatsEntry>,
}

impl StatsSnapshot {
    /// Level of the first inbound audio stream that reports one.
    pub fn audio_level(&self) -> Option<f64> {
        self.entries
            .iter()
            .filter(|e| e.inbound && e.kind == Some(MediaKind::Audio))
            .find_map(|e| e.audio_level)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct AudioSample {
    pub(crate) key: ConnectionKey,
    pub(crate) generation: u64,
    pub(crate) level: f64,
}

pub(crate) struct SampleTarget {
    pub(crate) key: ConnectionKey,
    pub(crate) generation: u64,
    pub(crate) pc: Arc<dyn PeerConnection>,
}

/// Every entry worth sampling; the screenshare never carries inbound audio.
pub(crate) fn sample_targets(table: &ConnectionTable) -> Vec<SampleTarget> {
    table
        .iter()
        .filter(|(key, _)| **key != ConnectionKey::Screenshare)
        .map(|(key, entry)| SampleTarget {
            key: key.clone(),
            generation: entry.generation,
            pc: Arc::clone(&entry.pc),
        })
        .collect()
}

pub(crate) struct AudioLevelMonitor {
    period: Duration,
}

impl AudioLevelMonitor {
    pub(crate) fn new(period: Duration) -> Self {
        Self { period }
    }

    pub(crate) fn ticker(&self) -> Interval {
        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker
    }

    /// Reads stats for every target concurrently, reporting levels on `tx`.
    ///
    /// Reads are never awaited here, so one slow connection can't hold up the
    /// next tick or any other target.
    pub(crate) fn sample(&self, targets: Vec<SampleTarget>, tx: &mpsc::UnboundedSender<AudioSample>) {
        for target in targets {
            let tx = tx.clone();
            tokio::spawn(async move {
                if !target.pc.has_inbound_audio().await {
                    return;
                }
                match target.pc.stats().await {
                    Ok(snapshot) => {
                        if let Some(level) = snapshot.audio_level() {
                            let _ = tx.send(AudioSample {
                                key: target.key,
                                generation: target.generation,
                                level,
                            });
                        }
                    }
                    Err(e) => debug!(key = %target.key, "stats read failed: {e}"),
                }
            });
        }
    }
}
