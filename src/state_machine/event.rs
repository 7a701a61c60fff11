//! Events that can occur during a session

use crate::backend::{Package, SessionGrant};
use crate::error::SessionError;
use crate::transcript::TranscriptEntry;

/// Events that trigger state transitions
#[derive(Debug, Clone)]
pub enum Event {
    // User events
    /// Package chosen; `balance` is the ledger snapshot at selection time
    PackageSelected { package: Package, balance: u64 },
    SelectionCleared,
    StartRequested,
    EndRequested,
    /// Host screen going away
    Unmounted,

    // Start protocol
    PermissionResolved { granted: bool },
    TokenAcquired { grant: SessionGrant },
    TokenFailed { error: SessionError },
    ChargeSucceeded,
    ChargeFailed { error: SessionError },

    // Active session
    Tick,
    Utterance { entry: TranscriptEntry },
    TransportDisconnected,

    // Teardown
    TeardownFinished { outcome: TeardownOutcome },
}

/// Result of the transcript hand-off during teardown
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TeardownOutcome {
    Persisted,
    NothingToPersist,
    PersistFailed { error: SessionError },
}
