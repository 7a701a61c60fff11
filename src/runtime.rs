//! Runtime for executing a tutoring session
//!
//! One runtime task owns the session state. The host talks to it through a
//! [`SessionHandle`]; every state change is published to subscribers as a
//! [`SessionUpdate`].

mod countdown;
mod executor;
pub mod traits;

#[cfg(test)]
pub mod testing;

pub use executor::SessionRuntime;
pub use traits::*;

use crate::backend::PackageId;
use crate::error::SessionError;
use crate::state_machine::{Event, SessionContext, SessionNotice, SessionSnapshot, SessionState};
use crate::transcript::TranscriptEntry;
use crate::transport::MediaCapability;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

const COMMAND_CAPACITY: usize = 32;
const EVENT_CAPACITY: usize = 64;
const UPDATE_CAPACITY: usize = 128;

/// External collaborators the runtime drives
#[derive(Clone)]
pub struct SessionServices {
    pub permissions: Arc<dyn PermissionProvider>,
    pub tokens: Arc<dyn TokenBroker>,
    pub billing: Arc<dyn BillingGate>,
    pub ledger: Arc<dyn Ledger>,
    pub catalog: Arc<dyn PackageCatalog>,
    pub transcripts: Arc<dyn TranscriptStore>,
    pub media: MediaCapability,
}

#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    /// Countdown granularity; one tick removes one second of session time
    pub tick_period: Duration,
    /// Upper bound on waiting for the transport to close during teardown
    pub close_timeout: Duration,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            tick_period: Duration::from_secs(1),
            close_timeout: Duration::from_secs(5),
        }
    }
}

/// Updates pushed to observers
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionUpdate {
    StateChanged { snapshot: SessionSnapshot },
    Notice { notice: SessionNotice },
    TranscriptAppended { entry: TranscriptEntry },
    NavigateToFeedback,
}

/// Commands accepted from the host
#[derive(Debug, Clone)]
pub enum SessionCommand {
    Select { package_id: PackageId },
    ClearSelection,
    Start,
    End,
    Unmount,
}

pub(crate) struct CommandEnvelope {
    pub command: SessionCommand,
    pub reply: oneshot::Sender<Result<(), SessionError>>,
}

/// Event produced by a background task, stamped with the scope it belongs to
#[derive(Debug)]
pub(crate) struct ScopedEvent {
    pub epoch: u64,
    pub event: Event,
}

/// Host-side handle to a running session
#[derive(Clone)]
pub struct SessionHandle {
    command_tx: mpsc::Sender<CommandEnvelope>,
    update_tx: broadcast::Sender<SessionUpdate>,
    snapshot_rx: watch::Receiver<SessionSnapshot>,
}

impl SessionHandle {
    pub async fn select(&self, package_id: impl Into<PackageId>) -> Result<(), SessionError> {
        self.send(SessionCommand::Select {
            package_id: package_id.into(),
        })
        .await
    }

    pub async fn clear_selection(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::ClearSelection).await
    }

    pub async fn start(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::Start).await
    }

    pub async fn end(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::End).await
    }

    /// Tear everything down. The runtime task exits once the session is idle.
    pub async fn unmount(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::Unmount).await
    }

    pub async fn send(&self, command: SessionCommand) -> Result<(), SessionError> {
        let (reply, response) = oneshot::channel();
        self.command_tx
            .send(CommandEnvelope { command, reply })
            .await
            .map_err(|_| SessionError::invalid_request("session runtime has stopped"))?;
        response
            .await
            .map_err(|_| SessionError::invalid_request("session runtime has stopped"))?
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionUpdate> {
        self.update_tx.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot_rx.borrow().clone()
    }
}

/// Spawn a session runtime in `Idle` and return its handle
pub fn spawn_session(
    context: SessionContext,
    services: SessionServices,
    options: RuntimeOptions,
) -> (SessionHandle, JoinHandle<()>) {
    let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);
    let (event_tx, event_rx) = mpsc::channel(EVENT_CAPACITY);
    let (update_tx, _) = broadcast::channel(UPDATE_CAPACITY);
    let state = SessionState::Idle;
    let (snapshot_tx, snapshot_rx) = watch::channel(state.snapshot());

    let runtime = SessionRuntime::new(
        context,
        state,
        services,
        options,
        command_rx,
        event_tx,
        event_rx,
        update_tx.clone(),
        snapshot_tx,
    );
    let task = tokio::spawn(runtime.run());

    let handle = SessionHandle {
        command_tx,
        update_tx,
        snapshot_rx,
    };
    (handle, task)
}
