//! Heartbeat failure detector.
//!
//! Every interval each node publishes a full liveness snapshot to every
//! peer over the self-stabilizing channel. Receipt refreshes the sender's
//! arrival time and replaces its snapshot unless the stored one carries a
//! higher beat, so duplicates and reordering never roll the view back. A
//! peer silent for longer than the timeout is suspected.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use dsb_transport::{ChannelKind, Envelope, NodeId};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::message::MessageKind;
use crate::module::Module;
use crate::Resolver;

/// Payload of a heartbeat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Beat {
    /// Sender's beat counter.
    pub beat: u64,
    /// Peers the sender currently suspects.
    #[serde(default)]
    pub suspected: Vec<NodeId>,
}

#[derive(Debug, Clone)]
struct PeerView {
    last: Beat,
    seen_at: Instant,
}

pub struct HeartbeatModule {
    id: NodeId,
    peers: Vec<NodeId>,
    interval: Duration,
    timeout: Duration,
    started: Instant,
    beat: AtomicU64,
    views: Mutex<BTreeMap<NodeId, PeerView>>,
}

impl HeartbeatModule {
    pub const NAME: &'static str = "HEARTBEAT_MODULE";

    /// Detector for node `id` watching `peers` (self is ignored).
    pub fn new(
        id: NodeId,
        peers: impl IntoIterator<Item = NodeId>,
        interval: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            id,
            peers: peers.into_iter().filter(|p| *p != id).collect(),
            interval,
            timeout,
            started: Instant::now(),
            beat: AtomicU64::new(0),
            views: Mutex::new(BTreeMap::new()),
        }
    }

    fn views(&self) -> std::sync::MutexGuard<'_, BTreeMap<NodeId, PeerView>> {
        self.views.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record `beat` from `sender` as seen at `now`.
    ///
    /// Any beat proves the peer alive; the stored snapshot only moves to a
    /// beat counter at least as high as the one it holds.
    pub fn record_at(&self, sender: NodeId, beat: Beat, now: Instant) {
        let mut views = self.views();
        match views.get_mut(&sender) {
            Some(view) => {
                view.seen_at = view.seen_at.max(now);
                if beat.beat >= view.last.beat {
                    view.last = beat;
                }
            }
            None => {
                views.insert(
                    sender,
                    PeerView {
                        last: beat,
                        seen_at: now,
                    },
                );
            }
        }
    }

    /// Latest snapshot received from `peer`.
    pub fn last_beat(&self, peer: NodeId) -> Option<Beat> {
        self.views().get(&peer).map(|v| v.last.clone())
    }

    pub fn suspected(&self) -> Vec<NodeId> {
        self.suspected_at(Instant::now())
    }

    /// Peers silent for longer than the timeout at `now`. A peer never
    /// heard from counts as silent since the detector started.
    pub fn suspected_at(&self, now: Instant) -> Vec<NodeId> {
        let views = self.views();
        self.peers
            .iter()
            .copied()
            .filter(|peer| {
                let since = views.get(peer).map_or(self.started, |v| v.seen_at);
                now.saturating_duration_since(since) > self.timeout
            })
            .collect()
    }

    pub fn trusted_at(&self, now: Instant) -> Vec<NodeId> {
        let suspected = self.suspected_at(now);
        self.peers
            .iter()
            .copied()
            .filter(|p| !suspected.contains(p))
            .collect()
    }

    /// Next outgoing snapshot.
    fn next_beat(&self) -> Envelope {
        let beat = Beat {
            beat: self.beat.fetch_add(1, Ordering::Relaxed) + 1,
            suspected: self.suspected(),
        };
        MessageKind::Heartbeat.envelope(
            self.id,
            serde_json::to_value(&beat).unwrap_or_default(),
        )
    }
}

#[async_trait::async_trait]
impl Module for HeartbeatModule {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn receive(&self, envelope: &Envelope) {
        match serde_json::from_value::<Beat>(envelope.data.clone()) {
            Ok(beat) => self.record_at(envelope.sender, beat, Instant::now()),
            Err(e) => tracing::warn!(from = %envelope.sender, "malformed heartbeat: {e}"),
        }
    }

    fn snapshot(&self) -> serde_json::Value {
        let now = Instant::now();
        let last_beats: BTreeMap<String, u64> = self
            .views()
            .iter()
            .map(|(id, v)| (id.to_string(), v.last.beat))
            .collect();
        serde_json::json!({
            "beat": self.beat.load(Ordering::Relaxed),
            "trusted": self.trusted_at(now),
            "suspected": self.suspected_at(now),
            "last_beats": last_beats,
        })
    }

    async fn run(&self, resolver: Resolver) {
        resolver.wait_until_running().await;

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut reported: Vec<NodeId> = Vec::new();
        loop {
            ticker.tick().await;
            resolver.broadcast_on(self.next_beat(), ChannelKind::Stabilizing);

            let suspected = self.suspected();
            if suspected != reported {
                tracing::info!(?suspected, "suspected peers changed");
                reported = suspected;
            }
        }
    }
}
