//! System status and the advance-only cell that holds it.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Readiness of a node, totally ordered.
///
/// `BOOTING → READY` once the local communication layer is up,
/// `READY → RUNNING` once every peer has left `BOOTING`. A single-node
/// cluster goes straight to `RUNNING`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum SystemStatus {
    Booting = 1,
    Ready = 2,
    Running = 3,
}

impl SystemStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SystemStatus::Booting => "BOOTING",
            SystemStatus::Ready => "READY",
            SystemStatus::Running => "RUNNING",
        }
    }
}

impl fmt::Display for SystemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SystemStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BOOTING" => Ok(SystemStatus::Booting),
            "READY" => Ok(SystemStatus::Ready),
            "RUNNING" => Ok(SystemStatus::Running),
            other => Err(format!("unknown system status {other:?}")),
        }
    }
}

/// Shared status cell. Clones observe the same value.
///
/// The value only moves forward: [`advance`](Self::advance) to an earlier
/// or equal status is ignored.
#[derive(Debug, Clone)]
pub struct StatusCell {
    tx: Arc<watch::Sender<SystemStatus>>,
}

impl Default for StatusCell {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusCell {
    /// A cell starting at `BOOTING`.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(SystemStatus::Booting);
        Self { tx: Arc::new(tx) }
    }

    pub fn get(&self) -> SystemStatus {
        *self.tx.borrow()
    }

    /// Move to `to` if it is later than the current status.
    ///
    /// Returns whether the status changed.
    pub fn advance(&self, to: SystemStatus) -> bool {
        self.tx.send_if_modified(|current| {
            if to > *current {
                *current = to;
                true
            } else {
                false
            }
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<SystemStatus> {
        self.tx.subscribe()
    }

    /// Wait until the status is at least `at_least`.
    pub async fn wait_for(&self, at_least: SystemStatus) {
        let mut rx = self.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|status| *status >= at_least).await.map(|_| ());
    }
}
