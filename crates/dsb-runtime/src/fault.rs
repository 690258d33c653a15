//! Process-wide fault injection switch.
//!
//! A node can be told to misbehave at startup (`BYZANTINE_BEHAVIOR`) or at
//! runtime through the monitoring API. Links consult the switch on their
//! send path only; receiving and dispatch are never affected.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::RuntimeError;

/// Misbehaviour profile of a node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FaultProfile {
    /// Correct behaviour.
    #[default]
    None,
    /// Sends nothing on either link. Still receives.
    Unresponsive,
}

impl FaultProfile {
    /// Profiles that make a node faulty. `None` is valid but not listed.
    pub const MISBEHAVIOURS: &'static [FaultProfile] = &[FaultProfile::Unresponsive];

    pub fn as_str(self) -> &'static str {
        match self {
            FaultProfile::None => "NONE",
            FaultProfile::Unresponsive => "UNRESPONSIVE",
        }
    }

    pub fn is_byzantine(self) -> bool {
        self != FaultProfile::None
    }

    fn to_u8(self) -> u8 {
        match self {
            FaultProfile::None => 0,
            FaultProfile::Unresponsive => 1,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => FaultProfile::Unresponsive,
            _ => FaultProfile::None,
        }
    }
}

impl fmt::Display for FaultProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FaultProfile {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "NONE" => Ok(FaultProfile::None),
            "UNRESPONSIVE" => Ok(FaultProfile::Unresponsive),
            other => Err(RuntimeError::InvalidFaultProfile(other.to_string())),
        }
    }
}

/// Shared handle on the current [`FaultProfile`]. Clones share the value.
///
/// Reads and writes are single atomic operations, so a reader sees either
/// the old or the new profile, never a mix.
#[derive(Debug, Clone, Default)]
pub struct FaultInjector {
    profile: Arc<AtomicU8>,
}

impl FaultInjector {
    pub fn new(profile: FaultProfile) -> Self {
        Self {
            profile: Arc::new(AtomicU8::new(profile.to_u8())),
        }
    }

    pub fn profile(&self) -> FaultProfile {
        FaultProfile::from_u8(self.profile.load(Ordering::Acquire))
    }

    pub fn set_profile(&self, profile: FaultProfile) {
        let previous = FaultProfile::from_u8(self.profile.swap(profile.to_u8(), Ordering::AcqRel));
        if previous != profile {
            tracing::info!(from = %previous, to = %profile, "fault profile changed");
        }
    }

    /// Parse and apply a profile name. Unknown names are rejected and the
    /// current profile is left untouched.
    pub fn set_by_name(&self, name: &str) -> Result<FaultProfile, RuntimeError> {
        let profile: FaultProfile = name.parse()?;
        self.set_profile(profile);
        Ok(profile)
    }

    pub fn is_unresponsive(&self) -> bool {
        self.profile() == FaultProfile::Unresponsive
    }

    pub fn is_byzantine(&self) -> bool {
        self.profile().is_byzantine()
    }
}
