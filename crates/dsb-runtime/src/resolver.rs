//! The resolver: the one component modules talk to.
//!
//! Owns the links to every peer, the readiness state machine, the fault
//! switch, the metrics and the dispatch table. Links call back into it
//! through [`LinkContext`]; modules get a cloned [`Resolver`] handle.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use dsb_metrics::NodeMetrics;
use dsb_transport::{
    ChannelKind, ClusterDirectory, DatagramTransport, Envelope, LinkContext, NodeDescriptor,
    NodeId, ReliableReceiver, ReliableSender, StabilizingReceiver, StabilizingSender,
    TransportError,
};
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::RuntimeConfig;
use crate::dispatch::Dispatcher;
use crate::fault::FaultInjector;
use crate::readiness::{poll_until_running, StatusProbe};
use crate::status::{StatusCell, SystemStatus};
use crate::RuntimeError;

// ── Shared state (seen by links) ─────────────────────────────────────

struct Shared {
    local: NodeDescriptor,
    cluster: ClusterDirectory,
    config: RuntimeConfig,
    status: StatusCell,
    fault: FaultInjector,
    metrics: Arc<NodeMetrics>,
    dispatcher: Dispatcher,
}

impl Shared {
    fn dispatch(&self, envelope: &Envelope) {
        match self.dispatcher.dispatch(envelope) {
            Ok(module) => {
                self.metrics.message_received(self.local.id.get());
                tracing::trace!(from = %envelope.sender, module, "dispatched");
            }
            Err(e) => {
                tracing::warn!(from = %envelope.sender, "dropping message: {e}");
            }
        }
    }
}

impl LinkContext for Shared {
    fn local_id(&self) -> NodeId {
        self.local.id
    }

    fn is_running(&self) -> bool {
        self.status.get() == SystemStatus::Running
    }

    fn is_unresponsive(&self) -> bool {
        self.fault.is_unresponsive()
    }

    fn on_message_sent(&self, _to: &NodeDescriptor, _channel: ChannelKind) {
        self.metrics.message_sent(self.local.id.get());
    }

    fn on_queue_depth(&self, to: &NodeDescriptor, depth: usize) {
        self.metrics
            .set_queue_depth(self.local.id.get(), to.id.get(), &to.hostname, depth);
    }

    fn on_message_received(&self, envelope: Envelope, _channel: ChannelKind) {
        self.dispatch(&envelope);
    }
}

// ── Resolver ─────────────────────────────────────────────────────────

struct PeerLinks {
    reliable: ReliableSender,
    stabilizing: StabilizingSender,
}

struct Receivers {
    _reliable: ReliableReceiver,
    _stabilizing: StabilizingReceiver,
}

struct Inner {
    shared: Arc<Shared>,
    links: RwLock<HashMap<NodeId, PeerLinks>>,
    receivers: Mutex<Option<Receivers>>,
    readiness: Mutex<Option<JoinHandle<usize>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let readiness = self
            .readiness
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(task) = readiness.take() {
            task.abort();
        }
    }
}

/// Handle on a node's runtime. Cheap to clone; clones share everything.
#[derive(Clone)]
pub struct Resolver {
    inner: Arc<Inner>,
}

impl Resolver {
    /// Create the resolver for node `local` of `cluster`.
    ///
    /// Status starts at `BOOTING`. Nothing is bound and no task runs until
    /// [`start`](Self::start) and
    /// [`start_communication`](Self::start_communication).
    pub fn new(
        local: NodeId,
        cluster: ClusterDirectory,
        dispatcher: Dispatcher,
        config: RuntimeConfig,
    ) -> Result<Self, RuntimeError> {
        let local = cluster
            .get(local)
            .cloned()
            .ok_or(RuntimeError::UnknownPeer(local))?;

        for warning in config.warnings() {
            tracing::warn!("{warning}");
        }

        let shared = Arc::new(Shared {
            local,
            cluster,
            status: StatusCell::new(),
            fault: FaultInjector::new(config.fault_profile),
            metrics: Arc::new(NodeMetrics::new()),
            dispatcher,
            config,
        });

        Ok(Self {
            inner: Arc::new(Inner {
                shared,
                links: RwLock::new(HashMap::new()),
                receivers: Mutex::new(None),
                readiness: Mutex::new(None),
            }),
        })
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Start the readiness protocol.
    ///
    /// A single-node cluster goes to `RUNNING` at once without probing.
    /// Otherwise a poller asks every peer through `probe` until all have
    /// left `BOOTING`; it stops once `RUNNING` is reached.
    pub fn start(&self, probe: Arc<dyn StatusProbe>) {
        let shared = &self.inner.shared;

        if shared.cluster.len() <= 1 {
            shared.status.advance(SystemStatus::Running);
            tracing::info!(node = %shared.local.id, "single-node cluster, system running");
            return;
        }

        let peers: Vec<NodeDescriptor> = shared.cluster.peers_of(shared.local.id).cloned().collect();
        let task = tokio::spawn(poll_until_running(
            peers,
            shared.status.clone(),
            probe,
            shared.config.readiness_backoff,
        ));

        let mut readiness = self
            .inner
            .readiness
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = readiness.replace(task) {
            previous.abort();
        }
    }

    /// Bind the node's reliable and stabilizing ports from the cluster
    /// directory and bring up the links. See
    /// [`start_communication_with`](Self::start_communication_with).
    pub async fn start_communication(&self) -> Result<(), RuntimeError> {
        let shared = &self.inner.shared;
        let transport = &shared.config.transport;

        let reliable_addr = transport.bind_addr(shared.local.reliable_port);
        let listener = TcpListener::bind(&reliable_addr)
            .await
            .map_err(|source| TransportError::Bind {
                addr: reliable_addr,
                source,
            })?;

        let stabilizing_addr = transport.bind_addr(shared.local.stabilizing_port);
        let socket = UdpSocket::bind(&stabilizing_addr)
            .await
            .map_err(|source| TransportError::Bind {
                addr: stabilizing_addr,
                source,
            })?;

        self.start_communication_with(listener, socket).await
    }

    /// Bring up the links on already bound endpoints.
    ///
    /// Starts both receivers, one reliable and one stabilizing sender per
    /// peer, then moves the node to `READY`.
    pub async fn start_communication_with(
        &self,
        listener: TcpListener,
        socket: UdpSocket,
    ) -> Result<(), RuntimeError> {
        let shared = self.inner.shared.clone();
        let transport = &shared.config.transport;

        let outbound_addr = transport.bind_addr(0);
        let outbound = UdpSocket::bind(&outbound_addr)
            .await
            .map_err(|source| TransportError::Bind {
                addr: outbound_addr,
                source,
            })?;
        let datagrams: Arc<dyn DatagramTransport> = Arc::new(outbound);
        let ctx: Arc<dyn LinkContext> = shared.clone();

        {
            let mut receivers = self
                .inner
                .receivers
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if receivers.is_some() {
                return Err(RuntimeError::AlreadyStarted);
            }
            *receivers = Some(Receivers {
                _reliable: ReliableReceiver::spawn(listener, transport, ctx.clone())?,
                _stabilizing: StabilizingReceiver::spawn(socket, transport, ctx.clone())?,
            });
        }

        let mut links = self
            .inner
            .links
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        for peer in shared.cluster.peers_of(shared.local.id) {
            links.insert(
                peer.id,
                PeerLinks {
                    reliable: ReliableSender::spawn(peer.clone(), transport, ctx.clone()),
                    stabilizing: StabilizingSender::spawn(
                        peer.clone(),
                        transport,
                        datagrams.clone(),
                        ctx.clone(),
                    ),
                },
            );
        }
        drop(links);

        shared.status.advance(SystemStatus::Ready);
        tracing::info!(node = %shared.local.id, peers = shared.cluster.len() - 1, "communication layer ready");
        Ok(())
    }

    /// Spawn every module's `run` loop on its own task.
    pub fn spawn_modules(&self) -> Vec<JoinHandle<()>> {
        self.inner
            .shared
            .dispatcher
            .modules()
            .iter()
            .map(|module| {
                let module = module.clone();
                let resolver = self.clone();
                tokio::spawn(async move {
                    tracing::debug!(module = module.name(), "module started");
                    module.run(resolver).await;
                })
            })
            .collect()
    }

    // ── Sending ──────────────────────────────────────────────────────

    /// Send `envelope` to `node_id` over `channel`.
    ///
    /// Reliable: queued behind earlier messages for that peer. Stabilizing:
    /// replaces the snapshot resent to that peer. While the node is
    /// `UNRESPONSIVE` this is a silent no-op. Errors are logged here and
    /// returned; the message is dropped.
    pub fn send_to_node(
        &self,
        node_id: NodeId,
        envelope: Envelope,
        channel: ChannelKind,
    ) -> Result<(), RuntimeError> {
        self.send_shared(node_id, Arc::new(envelope), channel)
    }

    /// Reliable send to every peer except this node. No atomicity: a
    /// failure for one peer does not stop the others.
    ///
    /// Returns how many peers accepted the message.
    pub fn broadcast(&self, envelope: Envelope) -> usize {
        self.broadcast_on(envelope, ChannelKind::Reliable)
    }

    /// [`broadcast`](Self::broadcast) over a chosen channel.
    pub fn broadcast_on(&self, envelope: Envelope, channel: ChannelKind) -> usize {
        let envelope = Arc::new(envelope);
        let shared = &self.inner.shared;
        shared
            .cluster
            .peers_of(shared.local.id)
            .filter(|peer| {
                self.send_shared(peer.id, envelope.clone(), channel)
                    .is_ok()
            })
            .count()
    }

    fn send_shared(
        &self,
        node_id: NodeId,
        envelope: Arc<Envelope>,
        channel: ChannelKind,
    ) -> Result<(), RuntimeError> {
        let links = self
            .inner
            .links
            .read()
            .unwrap_or_else(PoisonError::into_inner);

        let Some(link) = links.get(&node_id) else {
            let e = RuntimeError::UnknownPeer(node_id);
            tracing::error!(%channel, "cannot send: {e}");
            return Err(e);
        };

        if self.inner.shared.fault.is_unresponsive() {
            tracing::trace!(to = %node_id, "unresponsive: not sending");
            return Ok(());
        }

        match channel {
            ChannelKind::Reliable => {
                if let Err(e) = link.reliable.enqueue(envelope) {
                    tracing::warn!("dropping message: {e}");
                    return Err(e.into());
                }
            }
            ChannelKind::Stabilizing => link.stabilizing.publish(envelope),
        }
        Ok(())
    }

    // ── Inbound ──────────────────────────────────────────────────────

    /// Route a received message to its module. Unknown or unregistered
    /// kinds are logged and dropped.
    pub fn dispatch(&self, envelope: &Envelope) {
        self.inner.shared.dispatch(envelope);
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn is_running(&self) -> bool {
        self.status() == SystemStatus::Running
    }

    pub fn status(&self) -> SystemStatus {
        self.inner.shared.status.get()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SystemStatus> {
        self.inner.shared.status.subscribe()
    }

    /// Wait until the cluster is running.
    pub async fn wait_until_running(&self) {
        self.inner.shared.status.wait_for(SystemStatus::Running).await;
    }

    pub fn id(&self) -> NodeId {
        self.inner.shared.local.id
    }

    pub fn local(&self) -> &NodeDescriptor {
        &self.inner.shared.local
    }

    pub fn cluster(&self) -> &ClusterDirectory {
        &self.inner.shared.cluster
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.shared.config
    }

    pub fn fault(&self) -> &FaultInjector {
        &self.inner.shared.fault
    }

    pub fn metrics(&self) -> &Arc<NodeMetrics> {
        &self.inner.shared.metrics
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.shared.dispatcher
    }

    /// Messages waiting in the reliable queue to `node_id`.
    pub fn queue_depth(&self, node_id: NodeId) -> Option<usize> {
        let links = self
            .inner
            .links
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        links.get(&node_id).map(|l| l.reliable.depth())
    }

    /// Everything `/data` reports: each module's snapshot under its name,
    /// plus node identity, fault profile, status and counters.
    pub fn module_data(&self) -> serde_json::Value {
        let shared = &self.inner.shared;
        let mut data = shared.dispatcher.snapshots();
        data.insert("node_id".into(), shared.local.id.get().into());
        data.insert("status".into(), shared.status.get().as_str().into());
        data.insert("byzantine".into(), shared.fault.is_byzantine().into());
        data.insert(
            "byzantine_behavior".into(),
            shared.fault.profile().as_str().into(),
        );
        data.insert(
            "metrics".into(),
            serde_json::to_value(shared.metrics.as_ref()).unwrap_or_default(),
        );
        serde_json::Value::Object(data)
    }
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("id", &self.id())
            .field("status", &self.status())
            .field("fault", &self.fault().profile())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::FaultProfile;
    use crate::message::MessageKind;
    use crate::module::Module;

    #[derive(Default)]
    struct Sink {
        seen: Mutex<Vec<Envelope>>,
    }

    #[async_trait::async_trait]
    impl Module for Sink {
        fn name(&self) -> &'static str {
            "SINK"
        }

        fn receive(&self, envelope: &Envelope) {
            self.seen.lock().unwrap().push(envelope.clone());
        }

        fn snapshot(&self) -> serde_json::Value {
            serde_json::json!({ "seen": self.seen.lock().unwrap().len() })
        }

        async fn run(&self, _resolver: Resolver) {}
    }

    fn resolver(n: u32, sink: Arc<Sink>) -> Resolver {
        let dispatcher = Dispatcher::builder()
            .register(MessageKind::HelloWorld, sink)
            .build();
        Resolver::new(
            NodeId::new(0),
            ClusterDirectory::localhost(n),
            dispatcher,
            RuntimeConfig::new().cluster_size(n as usize, 0, 0),
        )
        .unwrap()
    }

    #[test]
    fn local_node_must_be_in_cluster() {
        let err = Resolver::new(
            NodeId::new(5),
            ClusterDirectory::localhost(2),
            Dispatcher::builder().build(),
            RuntimeConfig::new(),
        )
        .unwrap_err();
        assert!(matches!(err, RuntimeError::UnknownPeer(id) if id == NodeId::new(5)));
    }

    #[tokio::test]
    async fn starts_booting() {
        let r = resolver(3, Arc::new(Sink::default()));
        assert_eq!(r.status(), SystemStatus::Booting);
        assert!(!r.is_running());
    }

    #[tokio::test]
    async fn send_without_link_is_an_error_not_a_panic() {
        let r = resolver(3, Arc::new(Sink::default()));
        let env = MessageKind::HelloWorld.envelope(r.id(), serde_json::json!({}));

        let err = r
            .send_to_node(NodeId::new(1), env.clone(), ChannelKind::Reliable)
            .unwrap_err();
        assert!(matches!(err, RuntimeError::UnknownPeer(id) if id == NodeId::new(1)));

        let err = r
            .send_to_node(NodeId::new(42), env.clone(), ChannelKind::Stabilizing)
            .unwrap_err();
        assert!(matches!(err, RuntimeError::UnknownPeer(_)));

        assert_eq!(r.broadcast(env), 0);
    }

    #[tokio::test]
    async fn dispatch_counts_and_routes() {
        let sink = Arc::new(Sink::default());
        let r = resolver(1, sink.clone());

        r.dispatch(&MessageKind::HelloWorld.envelope(NodeId::new(3), serde_json::json!({})));
        r.dispatch(&MessageKind::Heartbeat.envelope(NodeId::new(3), serde_json::json!({})));
        r.dispatch(&Envelope::new(77, NodeId::new(3), serde_json::Value::Null));

        assert_eq!(sink.seen.lock().unwrap().len(), 1);
        assert_eq!(r.metrics().received_by(0), 1);
        assert_eq!(
            r.dispatcher().registered_kinds(),
            vec![MessageKind::HelloWorld]
        );
    }

    #[tokio::test]
    async fn module_data_reports_identity_and_fault() {
        let r = resolver(1, Arc::new(Sink::default()));
        r.fault().set_profile(FaultProfile::Unresponsive);

        let data = r.module_data();
        assert_eq!(data["node_id"], 0);
        assert_eq!(data["byzantine"], true);
        assert_eq!(data["byzantine_behavior"], "UNRESPONSIVE");
        assert_eq!(data["status"], "BOOTING");
        assert_eq!(data["SINK"]["seen"], 0);
        assert!(data["metrics"]["msgs_sent"].is_array());
    }

    #[tokio::test]
    async fn initial_fault_profile_comes_from_config() {
        let r = Resolver::new(
            NodeId::new(0),
            ClusterDirectory::localhost(1),
            Dispatcher::builder().build(),
            RuntimeConfig::new().fault_profile(FaultProfile::Unresponsive),
        )
        .unwrap();
        assert!(r.fault().is_unresponsive());
    }
}
