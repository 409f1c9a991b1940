//! Coordinator Lifecycle
//!
//! `Created -> Starting -> Active <-> Reconnecting -> Stopped`, with
//! `Stopped -> Starting` for restarts and `Starting -> Created | Stopped`
//! when a start fails.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Lifecycle {
    /// Constructed, never started
    Created,
    /// Start in progress
    Starting,
    /// Registered and watching
    Active,
    /// Registered, but the last refresh failed or the session is being recovered
    Reconnecting,
    /// Deregistered
    Stopped,
}

impl Lifecycle {
    /// Whether moving from `self` to `next` is allowed
    pub fn can_transition_to(self, next: Lifecycle) -> bool {
        use Lifecycle::*;
        matches!(
            (self, next),
            (Created, Starting)
                | (Starting, Active)
                | (Starting, Created)
                | (Starting, Stopped)
                | (Active, Reconnecting)
                | (Reconnecting, Active)
                | (Active, Stopped)
                | (Reconnecting, Stopped)
                | (Stopped, Starting)
        )
    }

    /// Whether a watch task runs in this state
    pub fn is_running(self) -> bool {
        matches!(self, Lifecycle::Active | Lifecycle::Reconnecting)
    }
}

impl std::fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Lifecycle::Created => write!(f, "CREATED"),
            Lifecycle::Starting => write!(f, "STARTING"),
            Lifecycle::Active => write!(f, "ACTIVE"),
            Lifecycle::Reconnecting => write!(f, "RECONNECTING"),
            Lifecycle::Stopped => write!(f, "STOPPED"),
        }
    }
}
