use dsb_transport::Envelope;

use crate::Resolver;

/// An algorithm module plugged into the node.
///
/// The resolver routes inbound messages to [`receive`](Module::receive)
/// and drives [`run`](Module::run) on its own task. Modules never hold the
/// resolver themselves; `run` gets a handle for as long as it runs.
#[async_trait::async_trait]
pub trait Module: Send + Sync + 'static {
    /// Stable name, used as the key of the module's data in `/data`.
    fn name(&self) -> &'static str;

    /// Handle one inbound message. Called from link tasks; must not block.
    fn receive(&self, envelope: &Envelope);

    /// JSON view of the module's current state.
    fn snapshot(&self) -> serde_json::Value;

    /// Main loop. Usually waits for the cluster to run, then works forever.
    async fn run(&self, resolver: Resolver);
}
