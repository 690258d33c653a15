//! Shared fixtures for transport integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dsb_transport::{ChannelKind, Envelope, LinkContext, NodeDescriptor, NodeId};
use tokio::sync::mpsc;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_env_filter("warn").try_init();
}

/// Link context that records everything the links report.
pub struct RecordingContext {
    pub id: NodeId,
    pub running: AtomicBool,
    pub unresponsive: AtomicBool,
    pub sent: AtomicUsize,
    pub depths: Mutex<Vec<usize>>,
    inbound_tx: mpsc::UnboundedSender<(Envelope, ChannelKind)>,
}

impl RecordingContext {
    pub fn new(id: u32) -> (Arc<Self>, mpsc::UnboundedReceiver<(Envelope, ChannelKind)>) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let ctx = Arc::new(Self {
            id: NodeId::new(id),
            running: AtomicBool::new(true),
            unresponsive: AtomicBool::new(false),
            sent: AtomicUsize::new(0),
            depths: Mutex::new(Vec::new()),
            inbound_tx,
        });
        (ctx, inbound_rx)
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    pub fn set_unresponsive(&self, unresponsive: bool) {
        self.unresponsive.store(unresponsive, Ordering::SeqCst);
    }

    pub fn sent(&self) -> usize {
        self.sent.load(Ordering::SeqCst)
    }
}

impl LinkContext for RecordingContext {
    fn local_id(&self) -> NodeId {
        self.id
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn is_unresponsive(&self) -> bool {
        self.unresponsive.load(Ordering::SeqCst)
    }

    fn on_message_sent(&self, _to: &NodeDescriptor, _channel: ChannelKind) {
        self.sent.fetch_add(1, Ordering::SeqCst);
    }

    fn on_queue_depth(&self, _to: &NodeDescriptor, depth: usize) {
        self.depths.lock().unwrap().push(depth);
    }

    fn on_message_received(&self, envelope: Envelope, channel: ChannelKind) {
        let _ = self.inbound_tx.send((envelope, channel));
    }
}

/// Envelope of type 1 carrying `{"seq": seq}`.
pub fn numbered(sender: u32, seq: u64) -> Envelope {
    Envelope::new(1, NodeId::new(sender), serde_json::json!({ "seq": seq }))
}

pub fn seq_of(envelope: &Envelope) -> u64 {
    envelope.data["seq"].as_u64().expect("seq field")
}

/// A localhost port nothing listens on (bound then released).
pub fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

pub async fn recv_within(
    rx: &mut mpsc::UnboundedReceiver<(Envelope, ChannelKind)>,
    within: Duration,
) -> Option<(Envelope, ChannelKind)> {
    tokio::time::timeout(within, rx.recv()).await.ok().flatten()
}
