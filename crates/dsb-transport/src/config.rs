use std::time::Duration;

/// Default outbound queue capacity per peer.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10;

/// Default self-stabilizing resend period.
pub const DEFAULT_STABILIZING_INTERVAL: Duration = Duration::from_millis(250);

/// Configuration for the reliable and self-stabilizing links.
///
/// All fields have sensible defaults. Use the builder pattern:
///
/// ```rust
/// use std::time::Duration;
/// use dsb_transport::TransportConfig;
///
/// let config = TransportConfig::new()
///     .queue_capacity(32)
///     .stabilizing_interval(Duration::from_millis(100));
/// ```
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Maximum messages waiting in one peer's reliable queue.
    pub(crate) queue_capacity: usize,
    /// Maximum frame / datagram payload size in bytes.
    pub(crate) max_message_size: usize,
    /// Period of the self-stabilizing resend loop.
    pub(crate) stabilizing_interval: Duration,
    /// Pause before reconnecting after a failed connect or write.
    ///
    /// A random jitter of up to half this value is added so that peers
    /// restarting together do not reconnect in lockstep.
    pub(crate) reconnect_backoff: Duration,
    /// Upper bound on a single TCP connect attempt.
    pub(crate) connect_timeout: Duration,
    /// Host the listeners bind to.
    pub(crate) bind_host: String,
    /// Receive buffer for a single UDP datagram.
    pub(crate) datagram_buffer: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportConfig {
    /// Create a new config with defaults.
    ///
    /// If the `MAX_QUEUE_SIZE` environment variable holds a positive
    /// integer it overrides the queue capacity. This can be overridden
    /// with [`.queue_capacity()`](Self::queue_capacity).
    pub fn new() -> Self {
        let queue_capacity = std::env::var("MAX_QUEUE_SIZE")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .filter(|&n| n > 0)
            .unwrap_or(DEFAULT_QUEUE_CAPACITY);

        Self {
            queue_capacity,
            max_message_size: 1024 * 1024, // 1 MB
            stabilizing_interval: DEFAULT_STABILIZING_INTERVAL,
            reconnect_backoff: Duration::from_millis(500),
            connect_timeout: Duration::from_secs(2),
            bind_host: "0.0.0.0".to_string(),
            datagram_buffer: 64 * 1024,
        }
    }

    /// Set the per-peer reliable queue capacity (default: 10, minimum 1).
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Set maximum message size (default: 1 MB).
    pub fn max_message_size(mut self, bytes: usize) -> Self {
        self.max_message_size = bytes;
        self
    }

    /// Set the self-stabilizing resend period (default: 250 ms).
    pub fn stabilizing_interval(mut self, interval: Duration) -> Self {
        self.stabilizing_interval = interval;
        self
    }

    /// Set the reconnect back-off of the reliable send loop (default: 500 ms).
    pub fn reconnect_backoff(mut self, backoff: Duration) -> Self {
        self.reconnect_backoff = backoff;
        self
    }

    /// Set the TCP connect timeout (default: 2 s).
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the host listeners bind to (default: `0.0.0.0`).
    pub fn bind_host(mut self, host: impl Into<String>) -> Self {
        self.bind_host = host.into();
        self
    }

    /// Set the UDP receive buffer size (default: 64 KB).
    pub fn datagram_buffer(mut self, bytes: usize) -> Self {
        self.datagram_buffer = bytes;
        self
    }

    pub fn get_queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    pub fn get_stabilizing_interval(&self) -> Duration {
        self.stabilizing_interval
    }

    /// `host:port` listeners should bind to for `port`.
    pub fn bind_addr(&self, port: u16) -> String {
        format!("{}:{}", self.bind_host, port)
    }

    /// Back-off with jitter for the next reconnect attempt.
    pub(crate) fn jittered_backoff(&self) -> Duration {
        use rand::Rng;

        let base = self.reconnect_backoff;
        let max_jitter = (base.as_millis() as u64) / 2;
        if max_jitter == 0 {
            return base;
        }
        base + Duration::from_millis(rand::rng().random_range(0..=max_jitter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_defaults() {
        let config = TransportConfig::new()
            .queue_capacity(3)
            .stabilizing_interval(Duration::from_millis(10))
            .bind_host("127.0.0.1");

        assert_eq!(config.get_queue_capacity(), 3);
        assert_eq!(config.get_stabilizing_interval(), Duration::from_millis(10));
        assert_eq!(config.bind_addr(5001), "127.0.0.1:5001");
    }

    #[test]
    fn queue_capacity_has_floor_of_one() {
        let config = TransportConfig::new().queue_capacity(0);
        assert_eq!(config.get_queue_capacity(), 1);
    }

    #[test]
    fn jitter_stays_within_half_the_backoff() {
        let config = TransportConfig::new().reconnect_backoff(Duration::from_millis(100));
        for _ in 0..50 {
            let b = config.jittered_backoff();
            assert!(b >= Duration::from_millis(100));
            assert!(b <= Duration::from_millis(150));
        }
    }
}
