use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dsb_transport::{Envelope, NodeId};

use crate::message::MessageKind;
use crate::module::Module;
use crate::Resolver;

/// Sample module: once the cluster runs, greets every other node each
/// run interval over the reliable channel.
pub struct HelloWorldModule {
    id: NodeId,
    interval: Duration,
    msgs_sent: AtomicU64,
    msgs_received: AtomicU64,
}

impl HelloWorldModule {
    pub const NAME: &'static str = "HELLO_WORLD_MODULE";

    pub fn new(id: NodeId, interval: Duration) -> Self {
        Self {
            id,
            interval,
            msgs_sent: AtomicU64::new(0),
            msgs_received: AtomicU64::new(0),
        }
    }

    pub fn greeting(&self) -> Envelope {
        MessageKind::HelloWorld.envelope(self.id, serde_json::json!({ "message": "hello world" }))
    }

    pub fn msgs_sent(&self) -> u64 {
        self.msgs_sent.load(Ordering::Relaxed)
    }

    pub fn msgs_received(&self) -> u64 {
        self.msgs_received.load(Ordering::Relaxed)
    }

    /// Greet every other node once. Every attempt counts as sent, whether
    /// or not the resolver accepted it; returns the accepted count.
    pub fn greet_all(&self, resolver: &Resolver) -> usize {
        let attempts = resolver.cluster().peers_of(self.id).count();
        let accepted = resolver.broadcast(self.greeting());
        self.msgs_sent.fetch_add(attempts as u64, Ordering::Relaxed);
        accepted
    }
}

#[async_trait::async_trait]
impl Module for HelloWorldModule {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn receive(&self, envelope: &Envelope) {
        self.msgs_received.fetch_add(1, Ordering::Relaxed);
        match envelope.data.get("message").and_then(|m| m.as_str()) {
            Some(message) => tracing::info!(from = %envelope.sender, "got msg {message:?}"),
            None => tracing::warn!(from = %envelope.sender, "greeting without a message"),
        }
    }

    fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({ "msgs_sent": self.msgs_sent() })
    }

    async fn run(&self, resolver: Resolver) {
        resolver.wait_until_running().await;

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let accepted = self.greet_all(&resolver);
            tracing::trace!(accepted, "greeted peers");
        }
    }
}
