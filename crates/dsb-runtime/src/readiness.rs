//! Readiness protocol: wait until every peer has left `BOOTING`.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use dsb_transport::{NodeDescriptor, NodeId};
use serde::Deserialize;

use crate::status::{StatusCell, SystemStatus};
use crate::RuntimeError;

/// Asks a peer for its current [`SystemStatus`].
#[async_trait::async_trait]
pub trait StatusProbe: Send + Sync + 'static {
    async fn probe(&self, node: &NodeDescriptor) -> Result<SystemStatus, RuntimeError>;
}

/// Probes `GET http://{hostname}:{monitoring_base + id}/`.
pub struct HttpProbe {
    client: reqwest::Client,
    monitoring_base_port: u16,
}

#[derive(Deserialize)]
struct StatusReply {
    status: SystemStatus,
}

impl HttpProbe {
    pub fn new(timeout: Duration, monitoring_base_port: u16) -> Result<Self, RuntimeError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            monitoring_base_port,
        })
    }

    fn url(&self, node: &NodeDescriptor) -> String {
        format!(
            "http://{}:{}/",
            node.hostname,
            node.monitoring_port(self.monitoring_base_port)
        )
    }
}

#[async_trait::async_trait]
impl StatusProbe for HttpProbe {
    async fn probe(&self, node: &NodeDescriptor) -> Result<SystemStatus, RuntimeError> {
        let failed = |e: reqwest::Error| RuntimeError::Probe {
            node_id: node.id,
            reason: e.to_string(),
        };

        let reply: StatusReply = self
            .client
            .get(self.url(node))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(failed)?
            .json()
            .await
            .map_err(failed)?;
        Ok(reply.status)
    }
}

/// Poll `peers` until all of them report a status past `BOOTING` and the
/// local node has reached `READY`, then advance `status` to `RUNNING`.
///
/// A peer that answered once is not asked again: statuses never regress.
/// Probe errors count as "not ready". Returns the number of rounds.
pub async fn poll_until_running(
    peers: Vec<NodeDescriptor>,
    status: StatusCell,
    probe: Arc<dyn StatusProbe>,
    backoff: Duration,
) -> usize {
    let mut ready: BTreeSet<NodeId> = BTreeSet::new();
    let mut rounds = 0;

    loop {
        rounds += 1;

        let pending: Vec<&NodeDescriptor> =
            peers.iter().filter(|p| !ready.contains(&p.id)).collect();
        for peer in pending {
            match probe.probe(peer).await {
                Ok(SystemStatus::Booting) => {
                    tracing::trace!(peer = %peer.id, "peer still booting");
                }
                Ok(peer_status) => {
                    tracing::debug!(peer = %peer.id, status = %peer_status, "peer ready");
                    ready.insert(peer.id);
                }
                Err(e) => tracing::trace!("{e}"),
            }
        }

        if ready.len() == peers.len() && status.get() >= SystemStatus::Ready {
            status.advance(SystemStatus::Running);
            tracing::info!(rounds, "all nodes ready, system running");
            return rounds;
        }

        if rounds % 50 == 0 {
            tracing::info!(
                ready = ready.len(),
                expected = peers.len(),
                local = %status.get(),
                "still waiting for nodes"
            );
        }
        tokio::time::sleep(backoff).await;
    }
}
