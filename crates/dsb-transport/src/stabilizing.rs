//! Self-stabilizing link: periodic full-state datagrams, no acks, no backlog.
//!
//! The sender keeps only the latest snapshot for its peer and resends it
//! every period. A lost datagram is repaired by the next period; a
//! duplicate or reordered one carries a complete state, so the receiver
//! converges to the sender's current state once datagrams get through.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::TransportConfig;
use crate::link::{ChannelKind, LinkContext};
use crate::{Envelope, NodeDescriptor, TransportError};

/// Unreliable datagram transport used by [`StabilizingSender`].
///
/// In production this is a [`UdpSocket`]; tests plug in lossy or
/// recording fakes.
#[async_trait::async_trait]
pub trait DatagramTransport: Send + Sync + 'static {
    /// Send one datagram to `target`. No retry, no acknowledgement.
    async fn send_datagram(&self, data: &[u8], target: SocketAddr) -> io::Result<()>;
}

#[async_trait::async_trait]
impl DatagramTransport for UdpSocket {
    async fn send_datagram(&self, data: &[u8], target: SocketAddr) -> io::Result<()> {
        self.send_to(data, target).await.map(|_| ())
    }
}

/// Sending half of a self-stabilizing link to one peer.
pub struct StabilizingSender {
    peer: NodeDescriptor,
    snapshot: watch::Sender<Option<Arc<Envelope>>>,
    task: JoinHandle<()>,
}

impl StabilizingSender {
    /// Spawn the periodic send loop towards `peer`'s stabilizing port.
    ///
    /// Nothing is sent until a snapshot is [`publish`](Self::publish)ed,
    /// and only while the context reports the cluster running and the
    /// node responsive.
    pub fn spawn(
        peer: NodeDescriptor,
        config: &TransportConfig,
        transport: Arc<dyn DatagramTransport>,
        ctx: Arc<dyn LinkContext>,
    ) -> Self {
        let (snapshot, snapshot_rx) = watch::channel(None);
        let task = tokio::spawn(send_loop(
            peer.clone(),
            config.clone(),
            snapshot_rx,
            transport,
            ctx,
        ));

        Self {
            peer,
            snapshot,
            task,
        }
    }

    /// Replace the snapshot resent to the peer from the next period on.
    pub fn publish(&self, envelope: Arc<Envelope>) {
        self.snapshot.send_replace(Some(envelope));
    }

    /// The snapshot currently being resent.
    pub fn current(&self) -> Option<Arc<Envelope>> {
        self.snapshot.borrow().clone()
    }

    pub fn peer(&self) -> &NodeDescriptor {
        &self.peer
    }
}

impl Drop for StabilizingSender {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn send_loop(
    peer: NodeDescriptor,
    config: TransportConfig,
    snapshot: watch::Receiver<Option<Arc<Envelope>>>,
    transport: Arc<dyn DatagramTransport>,
    ctx: Arc<dyn LinkContext>,
) {
    let mut ticker = tokio::time::interval(config.stabilizing_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut target: Option<SocketAddr> = None;

    loop {
        ticker.tick().await;

        if !ctx.is_running() || ctx.is_unresponsive() {
            continue;
        }

        let current = snapshot.borrow().clone();
        let Some(envelope) = current else {
            continue;
        };

        // Resolve lazily: the peer's hostname may not exist yet when the
        // cluster is still coming up.
        let addr = match target {
            Some(addr) => addr,
            None => match resolve(&peer).await {
                Ok(addr) => *target.insert(addr),
                Err(e) => {
                    tracing::debug!(peer = %peer.id, "cannot resolve stabilizing address: {e}");
                    continue;
                }
            },
        };

        let bytes = match envelope.to_bytes() {
            Ok(bytes) if bytes.len() <= config.datagram_buffer => bytes,
            Ok(bytes) => {
                tracing::error!(
                    peer = %peer.id,
                    size = bytes.len(),
                    max = config.datagram_buffer,
                    "snapshot does not fit in a datagram"
                );
                continue;
            }
            Err(e) => {
                tracing::error!(peer = %peer.id, "cannot serialize snapshot: {e}");
                continue;
            }
        };

        match transport.send_datagram(&bytes, addr).await {
            Ok(()) => ctx.on_message_sent(&peer, ChannelKind::Stabilizing),
            Err(e) => tracing::debug!(peer = %peer.id, "snapshot datagram not sent: {e}"),
        }
    }
}

async fn resolve(peer: &NodeDescriptor) -> io::Result<SocketAddr> {
    tokio::net::lookup_host((peer.hostname.as_str(), peer.stabilizing_port))
        .await?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no address for host"))
}

/// Receiving half of the self-stabilizing links: one socket for all peers.
pub struct StabilizingReceiver {
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

impl StabilizingReceiver {
    /// Bind a UDP socket on `addr` and start receiving.
    pub async fn bind(
        addr: &str,
        config: &TransportConfig,
        ctx: Arc<dyn LinkContext>,
    ) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| TransportError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        Self::spawn(socket, config, ctx)
    }

    /// Start receiving on an already bound socket.
    pub fn spawn(
        socket: UdpSocket,
        config: &TransportConfig,
        ctx: Arc<dyn LinkContext>,
    ) -> Result<Self, TransportError> {
        let local_addr = socket.local_addr().map_err(TransportError::Receive)?;
        tracing::info!(node = %ctx.local_id(), %local_addr, "stabilizing receiver listening");

        let buffer_size = config.datagram_buffer;
        let task = tokio::spawn(async move {
            let mut buf = vec![0u8; buffer_size];
            loop {
                match socket.recv_from(&mut buf).await {
                    Ok((len, remote)) => match Envelope::from_bytes(&buf[..len]) {
                        Ok(envelope) => ctx.on_message_received(envelope, ChannelKind::Stabilizing),
                        Err(e) => tracing::warn!(%remote, "dropping malformed datagram: {e}"),
                    },
                    Err(e) => {
                        // ICMP port-unreachable from an earlier send shows up
                        // here on some platforms; it is not fatal.
                        tracing::debug!("stabilizing receive error: {e}");
                    }
                }
            }
        });

        Ok(Self { local_addr, task })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Drop for StabilizingReceiver {
    fn drop(&mut self) {
        self.task.abort();
    }
}
