//! Session state types

use crate::backend::{Package, SessionGrant};
use crate::transcript::Transcript;
use serde::{Deserialize, Serialize};

/// Where the two-phase start protocol currently is
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartPhase {
    /// Waiting for the host's microphone prompt
    AwaitingPermission,
    /// Token broker request in flight
    AwaitingToken,
    /// Token in hand, charge request in flight
    AwaitingCharge { grant: SessionGrant },
}

/// Why an active session is being torn down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    TimeUp,
    UserEnded,
    TransportDisconnected,
    Unmounted,
}

/// Session state
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Nothing selected, no credentials, timer stopped
    #[default]
    Idle,

    /// A package the user can afford is tentatively chosen
    Selecting { package: Package },

    /// Start protocol running
    Starting { package: Package, phase: StartPhase },

    /// Paid session in progress
    Active {
        package: Package,
        grant: SessionGrant,
        /// Always > 0 while active
        remaining_seconds: u32,
        transcript: Transcript,
    },

    /// Cleanup in progress; always returns to `Idle`
    Ending { reason: EndReason },
}

/// Coarse state name for observers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Idle,
    Selecting,
    Starting,
    Active,
    Ending,
}

/// Read-only view of the session handed to the UI layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub phase: SessionPhase,
    pub selected_package: Option<Package>,
    pub has_token: bool,
    pub routing_address: Option<String>,
    pub remaining_seconds: u32,
    pub active: bool,
    pub transcript_len: usize,
}

impl SessionState {
    pub fn phase(&self) -> SessionPhase {
        match self {
            SessionState::Idle => SessionPhase::Idle,
            SessionState::Selecting { .. } => SessionPhase::Selecting,
            SessionState::Starting { .. } => SessionPhase::Starting,
            SessionState::Active { .. } => SessionPhase::Active,
            SessionState::Ending { .. } => SessionPhase::Ending,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Active { .. })
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, SessionState::Idle)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let mut snapshot = SessionSnapshot {
            phase: self.phase(),
            selected_package: None,
            has_token: false,
            routing_address: None,
            remaining_seconds: 0,
            active: false,
            transcript_len: 0,
        };

        match self {
            SessionState::Idle | SessionState::Ending { .. } => {}
            SessionState::Selecting { package } => {
                snapshot.selected_package = Some(package.clone());
            }
            SessionState::Starting { package, phase } => {
                snapshot.selected_package = Some(package.clone());
                if let StartPhase::AwaitingCharge { grant } = phase {
                    snapshot.has_token = true;
                    snapshot.routing_address = Some(grant.routing_address.clone());
                }
            }
            SessionState::Active {
                package,
                grant,
                remaining_seconds,
                transcript,
            } => {
                snapshot.selected_package = Some(package.clone());
                snapshot.has_token = !grant.token.is_empty();
                snapshot.routing_address = Some(grant.routing_address.clone());
                snapshot.remaining_seconds = *remaining_seconds;
                snapshot.active = true;
                snapshot.transcript_len = transcript.len();
            }
        }

        snapshot
    }
}

/// Per-controller configuration (immutable)
#[derive(Debug, Clone)]
pub struct SessionContext {
    /// Name presented to the token broker
    pub display_name: String,
}

impl SessionContext {
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
        }
    }
}
