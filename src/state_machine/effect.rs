//! Effects produced by state transitions

use crate::backend::{PackageId, SessionGrant};
use crate::error::{ErrorKind, SessionError};
use crate::transcript::TranscriptEntry;
use serde::Serialize;

/// Effects to be executed after state transition
#[derive(Debug, Clone)]
pub enum Effect {
    /// Ask the host for microphone access
    RequestPermission,

    /// Ask the token broker for transport credentials
    AcquireToken { display_name: String },

    /// Debit the ledger for the package
    ChargeForPackage { package_id: PackageId },

    /// Abandon whatever start-protocol request is in flight
    CancelPendingStart,

    /// Join the transport and forward its utterance streams
    OpenTransport { grant: SessionGrant },

    CloseTransport,

    StartCountdown,

    StopCountdown,

    /// Refresh the balance view, optionally assuming a debit until it lands
    RefreshLedger { assumed_debit: Option<u64> },

    /// Write the transcript hand-off
    PersistTranscript { entries: Vec<TranscriptEntry> },

    /// Teardown with nothing to persist
    FinishTeardown,

    /// Notify connected observers
    Notify { notice: SessionNotice },

    /// Tell the host to show the feedback view
    NavigateToFeedback,

    /// A new entry made it into the transcript
    TranscriptAppended { entry: TranscriptEntry },

    /// Publish the current snapshot
    PublishState,
}

/// User-facing terminal or error notice
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionNotice {
    /// An attempt failed; the session is back in `Idle`
    Failed { kind: ErrorKind, message: String },
    /// Session ended with nothing to review
    ConversationEnded,
    /// Session ended but the hand-off could not be written
    TeardownFailed,
}

impl Effect {
    pub fn notify_failure(error: &SessionError) -> Self {
        Effect::Notify {
            notice: SessionNotice::Failed {
                kind: error.kind,
                message: error.user_notice(),
            },
        }
    }

    pub fn notify(notice: SessionNotice) -> Self {
        Effect::Notify { notice }
    }
}
