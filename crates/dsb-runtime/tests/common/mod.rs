//! Shared fixtures for runtime integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dsb_runtime::{Dispatcher, MessageKind, Module, Resolver, RuntimeConfig, RuntimeError, StatusProbe, SystemStatus};
use dsb_transport::{ClusterDirectory, Envelope, NodeDescriptor, NodeId, TransportConfig};
use tokio::net::{TcpListener, UdpSocket};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_env_filter("warn").try_init();
}

/// Module that keeps every message it receives.
#[derive(Default)]
pub struct Recorder {
    seen: Mutex<Vec<Envelope>>,
}

impl Recorder {
    pub fn seen(&self) -> Vec<Envelope> {
        self.seen.lock().unwrap().clone()
    }

    pub fn from_sender(&self, sender: u32) -> Vec<Envelope> {
        self.seen()
            .into_iter()
            .filter(|e| e.sender == NodeId::new(sender))
            .collect()
    }
}

#[async_trait::async_trait]
impl Module for Recorder {
    fn name(&self) -> &'static str {
        "RECORDER"
    }

    fn receive(&self, envelope: &Envelope) {
        self.seen.lock().unwrap().push(envelope.clone());
    }

    fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({ "seen": self.seen.lock().unwrap().len() })
    }

    async fn run(&self, _resolver: Resolver) {}
}

/// Counts probes; every peer looks running.
#[derive(Default)]
pub struct CountingProbe {
    pub calls: AtomicUsize,
}

#[async_trait::async_trait]
impl StatusProbe for CountingProbe {
    async fn probe(&self, _node: &NodeDescriptor) -> Result<SystemStatus, RuntimeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(SystemStatus::Running)
    }
}

/// Answers with the live status of in-process resolvers, standing in for
/// their monitoring API.
#[derive(Default)]
pub struct ResolverProbe {
    nodes: Mutex<HashMap<NodeId, Resolver>>,
}

impl ResolverProbe {
    pub fn add(&self, resolver: &Resolver) {
        self.nodes.lock().unwrap().insert(resolver.id(), resolver.clone());
    }
}

#[async_trait::async_trait]
impl StatusProbe for ResolverProbe {
    async fn probe(&self, node: &NodeDescriptor) -> Result<SystemStatus, RuntimeError> {
        let status = self.nodes.lock().unwrap().get(&node.id).map(|r| r.status());
        status.ok_or(RuntimeError::Probe {
            node_id: node.id,
            reason: "not reachable".into(),
        })
    }
}

/// Endpoints bound on 127.0.0.1 before the cluster directory exists.
pub struct Bound {
    pub listener: TcpListener,
    pub socket: UdpSocket,
}

/// Bind `n` node endpoint pairs on ephemeral ports and describe them.
pub async fn bind_cluster(n: u32) -> (ClusterDirectory, Vec<Bound>) {
    let mut bound = Vec::new();
    let mut nodes = Vec::new();
    for i in 0..n {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        nodes.push(NodeDescriptor::new(
            NodeId::new(i),
            "127.0.0.1",
            listener.local_addr().unwrap().port(),
            socket.local_addr().unwrap().port(),
        ));
        bound.push(Bound { listener, socket });
    }
    (ClusterDirectory::new(nodes).unwrap(), bound)
}

pub fn fast_config(n: usize) -> RuntimeConfig {
    RuntimeConfig::new()
        .transport(
            TransportConfig::new()
                .bind_host("127.0.0.1")
                .reconnect_backoff(Duration::from_millis(20))
                .stabilizing_interval(Duration::from_millis(20)),
        )
        .readiness_backoff(Duration::from_millis(20))
        .cluster_size(n, 0, 0)
}

/// A node whose only module is a [`Recorder`] for hello-world messages.
pub struct TestNode {
    pub resolver: Resolver,
    pub recorder: Arc<Recorder>,
}

/// Build recorder nodes for every member of `cluster`.
pub fn recorder_nodes(cluster: &ClusterDirectory, config: &RuntimeConfig) -> Vec<TestNode> {
    cluster
        .iter()
        .map(|node| {
            let recorder = Arc::new(Recorder::default());
            let dispatcher = Dispatcher::builder()
                .register(MessageKind::HelloWorld, recorder.clone())
                .build();
            let resolver =
                Resolver::new(node.id, cluster.clone(), dispatcher, config.clone()).unwrap();
            TestNode { resolver, recorder }
        })
        .collect()
}

/// Start readiness and communication on every node and wait for RUNNING.
pub async fn start_all(nodes: &[TestNode], bound: Vec<Bound>) {
    let probe = Arc::new(ResolverProbe::default());
    for node in nodes {
        probe.add(&node.resolver);
    }
    for (node, Bound { listener, socket }) in nodes.iter().zip(bound) {
        node.resolver.start(probe.clone());
        node.resolver
            .start_communication_with(listener, socket)
            .await
            .unwrap();
    }
    for node in nodes {
        tokio::time::timeout(Duration::from_secs(10), node.resolver.wait_until_running())
            .await
            .expect("cluster never reached RUNNING");
    }
}

pub fn hello(sender: u32, seq: u64) -> Envelope {
    MessageKind::HelloWorld.envelope(NodeId::new(sender), serde_json::json!({ "seq": seq }))
}

pub fn seq_of(envelope: &Envelope) -> u64 {
    envelope.data["seq"].as_u64().expect("seq field")
}

/// Poll `condition` every 10 ms until it holds or `within` elapses.
pub async fn eventually(within: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
