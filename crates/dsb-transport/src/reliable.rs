//! Reliable link: bounded queue → send loop → TCP → accept loop → dispatch.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use crate::config::TransportConfig;
use crate::frame::{read_frame, write_frame};
use crate::link::{ChannelKind, LinkContext};
use crate::queue::{BoundedQueue, OutboundEntry};
use crate::{Envelope, NodeDescriptor, TransportError};

/// Sending half of a reliable link to one peer.
///
/// Owns the peer's bounded queue and the task that drains it. Messages
/// reach the peer in enqueue order; a message stays queued (and counts
/// against the capacity) until it has been written to the socket.
pub struct ReliableSender {
    peer: NodeDescriptor,
    queue: Arc<BoundedQueue<OutboundEntry>>,
    ctx: Arc<dyn LinkContext>,
    task: JoinHandle<()>,
}

impl ReliableSender {
    /// Create the queue for `peer` and spawn its send loop.
    pub fn spawn(peer: NodeDescriptor, config: &TransportConfig, ctx: Arc<dyn LinkContext>) -> Self {
        let queue = Arc::new(BoundedQueue::new(config.queue_capacity));
        let task = tokio::spawn(send_loop(
            peer.clone(),
            queue.clone(),
            config.clone(),
            ctx.clone(),
        ));

        Self {
            peer,
            queue,
            ctx,
            task,
        }
    }

    /// Queue `envelope` for the peer.
    ///
    /// Returns the queue depth after the push, or `QueueFull` when the
    /// peer already has `capacity` undelivered messages. Rejected messages
    /// are dropped; nothing already queued is evicted.
    pub fn enqueue(&self, envelope: Arc<Envelope>) -> Result<usize, TransportError> {
        match self.queue.try_push(OutboundEntry::new(envelope)) {
            Ok(depth) => {
                self.ctx.on_queue_depth(&self.peer, depth);
                Ok(depth)
            }
            Err(_) => Err(TransportError::QueueFull {
                node_id: self.peer.id,
                capacity: self.queue.capacity(),
            }),
        }
    }

    /// Messages queued and not yet written.
    pub fn depth(&self) -> usize {
        self.queue.len()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    pub fn peer(&self) -> &NodeDescriptor {
        &self.peer
    }
}

impl Drop for ReliableSender {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Drain `queue` towards `peer` forever.
///
/// Connection failures and write errors are logged and retried after a
/// back-off with the same head entry; they never touch other peers' loops.
async fn send_loop(
    peer: NodeDescriptor,
    queue: Arc<BoundedQueue<OutboundEntry>>,
    config: TransportConfig,
    ctx: Arc<dyn LinkContext>,
) {
    let mut stream: Option<TcpStream> = None;
    let mut failures: u32 = 0;

    loop {
        let entry = queue.peek().await;

        if ctx.is_unresponsive() {
            let dropped = queue.drain().len();
            ctx.on_queue_depth(&peer, 0);
            tracing::debug!(peer = %peer.id, dropped, "unresponsive: dropping queued messages");
            continue;
        }

        let bytes = match entry.envelope.to_bytes() {
            Ok(bytes) if bytes.len() <= config.max_message_size => bytes,
            Ok(bytes) => {
                tracing::error!(
                    peer = %peer.id,
                    size = bytes.len(),
                    max = config.max_message_size,
                    "dropping oversized message"
                );
                queue.pop();
                ctx.on_queue_depth(&peer, queue.len());
                continue;
            }
            Err(e) => {
                tracing::error!(peer = %peer.id, "dropping unserializable message: {e}");
                queue.pop();
                ctx.on_queue_depth(&peer, queue.len());
                continue;
            }
        };

        if stream.is_none() {
            match connect(&peer, &config).await {
                Ok(conn) => {
                    if failures > 0 {
                        tracing::info!(peer = %peer.id, attempts = failures, "reliable link reconnected");
                    }
                    failures = 0;
                    stream = Some(conn);
                }
                Err(e) => {
                    failures += 1;
                    if failures == 1 {
                        tracing::warn!("{e}; retrying");
                    } else {
                        tracing::debug!(attempt = failures, "{e}");
                    }
                    tokio::time::sleep(config.jittered_backoff()).await;
                    continue;
                }
            }
        }
        let Some(conn) = stream.as_mut() else {
            continue;
        };

        match write_frame(conn, &bytes).await {
            Ok(()) => {
                queue.pop();
                ctx.on_message_sent(&peer, ChannelKind::Reliable);
                ctx.on_queue_depth(&peer, queue.len());
                tracing::trace!(
                    peer = %peer.id,
                    queued_for = ?entry.enqueued_at.elapsed(),
                    "message sent"
                );
            }
            Err(source) => {
                let e = TransportError::Send {
                    node_id: peer.id,
                    source,
                };
                tracing::warn!("{e}; reconnecting");
                stream = None;
                tokio::time::sleep(config.jittered_backoff()).await;
            }
        }
    }
}

async fn connect(peer: &NodeDescriptor, config: &TransportConfig) -> Result<TcpStream, TransportError> {
    let target = (peer.hostname.as_str(), peer.reliable_port);
    let attempt = tokio::time::timeout(config.connect_timeout, TcpStream::connect(target));

    let stream = match attempt.await {
        Ok(Ok(stream)) => stream,
        Ok(Err(source)) => {
            return Err(TransportError::Connect {
                node_id: peer.id,
                source,
            })
        }
        Err(_) => {
            return Err(TransportError::Connect {
                node_id: peer.id,
                source: std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"),
            })
        }
    };

    // Small frames; don't let Nagle hold them back.
    let _ = stream.set_nodelay(true);
    Ok(stream)
}

/// Receiving half of the reliable links: one listener for all peers.
pub struct ReliableReceiver {
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

impl ReliableReceiver {
    /// Bind `addr` and start accepting connections.
    pub async fn bind(
        addr: &str,
        config: &TransportConfig,
        ctx: Arc<dyn LinkContext>,
    ) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TransportError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        Self::spawn(listener, config, ctx)
    }

    /// Start accepting on an already bound listener.
    pub fn spawn(
        listener: TcpListener,
        config: &TransportConfig,
        ctx: Arc<dyn LinkContext>,
    ) -> Result<Self, TransportError> {
        let local_addr = listener.local_addr().map_err(TransportError::Receive)?;
        tracing::info!(node = %ctx.local_id(), %local_addr, "reliable receiver listening");

        let max_message_size = config.max_message_size;
        let task = tokio::spawn(async move {
            let mut errors: u32 = 0;
            loop {
                match listener.accept().await {
                    Ok((stream, remote)) => {
                        errors = 0;
                        tracing::debug!(%remote, "accepted reliable connection");
                        tokio::spawn(handle_connection(stream, remote, max_message_size, ctx.clone()));
                    }
                    Err(e) => {
                        errors = errors.saturating_add(1);
                        let pause = accept_backoff(errors);
                        if errors == 1 {
                            tracing::error!("accept error: {e}");
                        } else {
                            tracing::debug!(errors, ?pause, "accept error: {e}");
                        }
                        tokio::time::sleep(pause).await;
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

impl Drop for ReliableReceiver {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Pause after the `errors`-th consecutive accept failure: 10 ms, doubling,
/// capped at one second. EMFILE and friends persist until a descriptor frees.
fn accept_backoff(errors: u32) -> Duration {
    const BASE_MS: u64 = 10;
    const MAX_MS: u64 = 1000;
    let shift = errors.saturating_sub(1).min(10);
    Duration::from_millis((BASE_MS << shift).min(MAX_MS))
}

/// Read frames from one connection until EOF or a framing error.
///
/// A frame that does not decode is skipped; the stream stays usable
/// because framing is independent of the payload. An oversized length
/// prefix means the stream can no longer be trusted and it is closed.
async fn handle_connection(
    mut stream: TcpStream,
    remote: SocketAddr,
    max_message_size: usize,
    ctx: Arc<dyn LinkContext>,
) {
    loop {
        match read_frame(&mut stream, max_message_size).await {
            Ok(Some(data)) => match Envelope::from_bytes(&data) {
                Ok(envelope) => ctx.on_message_received(envelope, ChannelKind::Reliable),
                Err(e) => tracing::warn!(%remote, "dropping malformed frame: {e}"),
            },
            Ok(None) => {
                tracing::debug!(%remote, "reliable connection closed");
                break;
            }
            Err(e) => {
                tracing::warn!(%remote, "closing reliable connection: {e}");
                break;
            }
        }
    }
}
