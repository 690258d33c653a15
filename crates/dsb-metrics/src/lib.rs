//! Minimal metrics primitives for the dsb node substrate.
//!
//! Provides [`Counter`] and [`Gauge`], atomic cells that serialize with
//! serde, plus [`Family`], a label-keyed collection of either,
//! and [`NodeMetrics`], the set of hooks the resolver and its channels feed.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::ser::SerializeSeq;
use serde::{Deserialize, Serialize};

/// Event count that only goes up. Reads and writes are `Relaxed`:
/// values feed snapshots, not synchronization.
#[derive(Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.inc_by(1);
    }

    pub fn inc_by(&self, delta: u64) {
        self.0.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Counter({})", self.get())
    }
}

impl Serialize for Counter {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        s.serialize_u64(self.get())
    }
}

impl<'de> Deserialize<'de> for Counter {
    fn deserialize<D>(d: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        u64::deserialize(d).map(|v| Self(AtomicU64::new(v)))
    }
}

/// A point-in-time value that can move both ways (queue depth, backlog).
#[derive(Default)]
pub struct Gauge(AtomicU64);

impl Gauge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the current value.
    pub fn set(&self, value: u64) {
        self.0.store(value, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for Gauge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Gauge({})", self.get())
    }
}

impl Serialize for Gauge {
    fn serialize<S>(&self, s: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        s.serialize_u64(self.get())
    }
}

/// A set of metrics of the same kind, one per distinct label value.
///
/// Metrics are created lazily on first access and never removed.
pub struct Family<L, M> {
    metrics: Mutex<BTreeMap<L, Arc<M>>>,
}

impl<L: Ord + Clone, M: Default> Family<L, M> {
    pub fn new() -> Self {
        Self {
            metrics: Mutex::new(BTreeMap::new()),
        }
    }

    /// Get the metric for `labels`, creating it if this is the first use.
    pub fn get_or_create(&self, labels: &L) -> Arc<M> {
        let mut metrics = self.metrics.lock().unwrap_or_else(|e| e.into_inner());
        metrics
            .entry(labels.clone())
            .or_insert_with(|| Arc::new(M::default()))
            .clone()
    }

    /// Get the metric for `labels` without creating it.
    pub fn get(&self, labels: &L) -> Option<Arc<M>> {
        let metrics = self.metrics.lock().unwrap_or_else(|e| e.into_inner());
        metrics.get(labels).cloned()
    }

    /// Number of distinct label sets seen so far.
    pub fn len(&self) -> usize {
        self.metrics.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<L: Ord + Clone, M: Default> Default for Family<L, M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: fmt::Debug, M: fmt::Debug> fmt::Debug for Family<L, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let metrics = self.metrics.lock().unwrap_or_else(|e| e.into_inner());
        f.debug_map().entries(metrics.iter()).finish()
    }
}

/// Serialized as a list of `{"labels": .., "value": ..}` samples, since
/// label structs cannot be JSON object keys.
impl<L: Serialize, M: Serialize> Serialize for Family<L, M> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Sample<'a, L, M> {
            labels: &'a L,
            value: &'a M,
        }

        let metrics = self.metrics.lock().unwrap_or_else(|e| e.into_inner());
        let mut seq = serializer.serialize_seq(Some(metrics.len()))?;
        for (labels, value) in metrics.iter() {
            seq.serialize_element(&Sample {
                labels,
                value: value.as_ref(),
            })?;
        }
        seq.end()
    }
}

/// Label set for per-node message counters.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeLabel {
    pub node_id: u32,
}

/// Label set for the outbound queue depth gauge.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct QueueLabels {
    pub sender: u32,
    pub receiver: u32,
    pub hostname: String,
}

/// The metric hooks called by the node substrate.
///
/// The substrate only records; exposition (Prometheus, dashboards) is the
/// job of whoever reads these values.
#[derive(Debug, Default, Serialize)]
pub struct NodeMetrics {
    /// Messages handed to the network, keyed by sending node.
    pub msgs_sent: Family<NodeLabel, Counter>,
    /// Messages dispatched to a module, keyed by receiving node.
    pub msgs_received: Family<NodeLabel, Counter>,
    /// Reliable-channel queue depth per (sender, receiver, receiver host).
    pub queue_depth: Family<QueueLabels, Gauge>,
}

impl NodeMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one message sent by `node_id`.
    pub fn message_sent(&self, node_id: u32) {
        self.msgs_sent.get_or_create(&NodeLabel { node_id }).inc();
    }

    /// Record one message dispatched on `node_id`.
    pub fn message_received(&self, node_id: u32) {
        self.msgs_received.get_or_create(&NodeLabel { node_id }).inc();
    }

    /// Publish the current depth of the queue `sender` → `receiver`.
    pub fn set_queue_depth(&self, sender: u32, receiver: u32, hostname: &str, depth: usize) {
        self.queue_depth
            .get_or_create(&QueueLabels {
                sender,
                receiver,
                hostname: hostname.to_string(),
            })
            .set(depth as u64);
    }

    /// Total messages sent by `node_id` so far.
    pub fn sent_by(&self, node_id: u32) -> u64 {
        self.msgs_sent
            .get(&NodeLabel { node_id })
            .map(|c| c.get())
            .unwrap_or(0)
    }

    /// Total messages dispatched on `node_id` so far.
    pub fn received_by(&self, node_id: u32) -> u64 {
        self.msgs_received
            .get(&NodeLabel { node_id })
            .map(|c| c.get())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_basic_operations() {
        let c = Counter::new();
        assert_eq!(c.get(), 0);
        c.inc();
        assert_eq!(c.get(), 1);
        c.inc_by(10);
        assert_eq!(c.get(), 11);
    }

    #[test]
    fn counter_serde() {
        let c = Counter::new();
        c.inc_by(99);
        let json = serde_json::to_string(&c).unwrap();
        assert_eq!(json, "99");
        let c2: Counter = serde_json::from_str(&json).unwrap();
        assert_eq!(c2.get(), 99);
    }

    #[test]
    fn gauge_moves_both_ways() {
        let g = Gauge::new();
        g.set(7);
        assert_eq!(g.get(), 7);
        g.set(2);
        assert_eq!(g.get(), 2);
    }

    #[test]
    fn family_reuses_metric_per_label() {
        let family: Family<NodeLabel, Counter> = Family::new();
        family.get_or_create(&NodeLabel { node_id: 1 }).inc();
        family.get_or_create(&NodeLabel { node_id: 1 }).inc();
        family.get_or_create(&NodeLabel { node_id: 2 }).inc();

        assert_eq!(family.len(), 2);
        assert_eq!(family.get(&NodeLabel { node_id: 1 }).unwrap().get(), 2);
        assert!(family.get(&NodeLabel { node_id: 3 }).is_none());
    }

    #[test]
    fn node_metrics_hooks() {
        let metrics = NodeMetrics::new();
        metrics.message_sent(0);
        metrics.message_sent(0);
        metrics.message_received(0);
        metrics.set_queue_depth(0, 1, "node1", 4);
        metrics.set_queue_depth(0, 1, "node1", 3);

        assert_eq!(metrics.sent_by(0), 2);
        assert_eq!(metrics.received_by(0), 1);
        assert_eq!(metrics.sent_by(5), 0);

        let depth = metrics
            .queue_depth
            .get(&QueueLabels {
                sender: 0,
                receiver: 1,
                hostname: "node1".into(),
            })
            .unwrap();
        assert_eq!(depth.get(), 3);
    }

    #[test]
    fn node_metrics_serialize_as_samples() {
        let metrics = NodeMetrics::new();
        metrics.message_sent(2);
        let json = serde_json::to_value(&metrics).unwrap();
        assert_eq!(json["msgs_sent"][0]["labels"]["node_id"], 2);
        assert_eq!(json["msgs_sent"][0]["value"], 1);
        assert_eq!(json["queue_depth"].as_array().unwrap().len(), 0);
    }
}
