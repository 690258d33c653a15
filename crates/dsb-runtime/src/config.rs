use std::time::Duration;

use dsb_transport::{TransportConfig, DEFAULT_MONITORING_BASE_PORT};

use crate::fault::FaultProfile;

/// Pause between readiness polling rounds.
pub const READINESS_BACKOFF: Duration = Duration::from_millis(100);

/// Module loop period.
pub const RUN_INTERVAL: Duration = Duration::from_secs(1);

/// Module loop period under integration tests.
pub const INTEGRATION_RUN_INTERVAL: Duration = Duration::from_millis(50);

/// Failure detector beat period.
pub const FD_INTERVAL: Duration = Duration::from_millis(250);

/// Silence after which the failure detector suspects a peer.
pub const FD_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for a node runtime.
///
/// Use the builder pattern:
///
/// ```rust
/// use std::time::Duration;
/// use dsb_runtime::RuntimeConfig;
///
/// let config = RuntimeConfig::new()
///     .cluster_size(4, 1, 1)
///     .readiness_backoff(Duration::from_millis(50));
/// ```
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub(crate) transport: TransportConfig,
    pub(crate) readiness_backoff: Duration,
    /// Upper bound on one readiness probe request.
    pub(crate) probe_timeout: Duration,
    /// Node `i` serves its monitoring API on `monitoring_base_port + i`.
    pub(crate) monitoring_base_port: u16,
    pub(crate) run_interval: Duration,
    pub(crate) fd_interval: Duration,
    pub(crate) fd_timeout: Duration,
    /// Initial fault profile.
    pub(crate) fault_profile: FaultProfile,
    /// n: number of nodes the algorithms assume.
    pub(crate) number_of_nodes: usize,
    /// f: number of faulty nodes tolerated.
    pub(crate) number_of_byzantine: usize,
    /// k: number of clients.
    pub(crate) number_of_clients: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeConfig {
    pub fn new() -> Self {
        Self {
            transport: TransportConfig::new(),
            readiness_backoff: READINESS_BACKOFF,
            probe_timeout: Duration::from_secs(1),
            monitoring_base_port: DEFAULT_MONITORING_BASE_PORT,
            run_interval: RUN_INTERVAL,
            fd_interval: FD_INTERVAL,
            fd_timeout: FD_TIMEOUT,
            fault_profile: FaultProfile::None,
            number_of_nodes: 0,
            number_of_byzantine: 0,
            number_of_clients: 0,
        }
    }

    pub fn transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }

    pub fn readiness_backoff(mut self, backoff: Duration) -> Self {
        self.readiness_backoff = backoff;
        self
    }

    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn monitoring_base_port(mut self, port: u16) -> Self {
        self.monitoring_base_port = port;
        self
    }

    pub fn run_interval(mut self, interval: Duration) -> Self {
        self.run_interval = interval;
        self
    }

    /// Shorten the module loop period for integration test runs.
    pub fn integration_test(mut self, enabled: bool) -> Self {
        self.run_interval = if enabled {
            INTEGRATION_RUN_INTERVAL
        } else {
            RUN_INTERVAL
        };
        self
    }

    pub fn failure_detector(mut self, interval: Duration, timeout: Duration) -> Self {
        self.fd_interval = interval;
        self.fd_timeout = timeout;
        self
    }

    pub fn fault_profile(mut self, profile: FaultProfile) -> Self {
        self.fault_profile = profile;
        self
    }

    /// Set n, f and k.
    pub fn cluster_size(mut self, nodes: usize, byzantine: usize, clients: usize) -> Self {
        self.number_of_nodes = nodes;
        self.number_of_byzantine = byzantine;
        self.number_of_clients = clients;
        self
    }

    pub fn get_transport(&self) -> &TransportConfig {
        &self.transport
    }

    pub fn get_run_interval(&self) -> Duration {
        self.run_interval
    }

    pub fn get_fd_interval(&self) -> Duration {
        self.fd_interval
    }

    pub fn get_fd_timeout(&self) -> Duration {
        self.fd_timeout
    }

    pub fn get_monitoring_base_port(&self) -> u16 {
        self.monitoring_base_port
    }

    pub fn get_probe_timeout(&self) -> Duration {
        self.probe_timeout
    }

    /// (n, f, k).
    pub fn get_cluster_size(&self) -> (usize, usize, usize) {
        (
            self.number_of_nodes,
            self.number_of_byzantine,
            self.number_of_clients,
        )
    }

    /// Settings that look like a misconfiguration. Never fatal.
    pub fn warnings(&self) -> Vec<&'static str> {
        let mut warnings = Vec::new();
        if self.number_of_nodes == 0 {
            warnings.push("NUMBER_OF_NODES not set or set to 0");
        }
        if self.number_of_byzantine == 0 {
            warnings.push("NUMBER_OF_BYZANTINE not set or set to 0");
        }
        if self.number_of_clients == 0 {
            warnings.push("NUMBER_OF_CLIENTS not set or set to 0");
        }
        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = RuntimeConfig::new();
        assert_eq!(config.readiness_backoff, Duration::from_millis(100));
        assert_eq!(config.get_monitoring_base_port(), 4000);
        assert_eq!(config.get_run_interval(), Duration::from_secs(1));
        assert_eq!(config.get_fd_interval(), Duration::from_millis(250));
        assert_eq!(config.get_fd_timeout(), Duration::from_secs(5));
        assert_eq!(config.fault_profile, FaultProfile::None);
    }

    #[test]
    fn integration_mode_shortens_run_interval() {
        let config = RuntimeConfig::new().integration_test(true);
        assert_eq!(config.get_run_interval(), Duration::from_millis(50));
    }

    #[test]
    fn zero_counts_are_warnings() {
        assert_eq!(RuntimeConfig::new().warnings().len(), 3);

        let config = RuntimeConfig::new().cluster_size(4, 0, 1);
        assert_eq!(config.warnings(), vec!["NUMBER_OF_BYZANTINE not set or set to 0"]);
        assert_eq!(config.get_cluster_size(), (4, 0, 1));
    }
}
