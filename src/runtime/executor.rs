//! Session runtime executor

use super::countdown::Countdown;
use super::{
    CommandEnvelope, PermissionStatus, RuntimeOptions, ScopedEvent, SessionCommand,
    SessionServices, SessionUpdate,
};
use crate::backend::{Package, PackageId, SessionGrant};
use crate::error::SessionError;
use crate::state_machine::{
    transition, Effect, Event, SessionContext, SessionNotice, SessionPhase, SessionSnapshot,
    SessionState, TeardownOutcome, TransitionError,
};
use crate::transcript::{Speaker, TranscriptEntry};
use crate::transport::{MediaCapability, TransportConnection};
use chrono::Utc;
use futures::StreamExt;
use std::future::Future;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

type Reply = oneshot::Sender<Result<(), SessionError>>;

/// Catalog and balance lookup for a selection, resolved off the event loop
struct SelectionLookup {
    result: Result<(Package, u64), SessionError>,
    reply: Reply,
}

/// Drives one session: applies `transition`, executes effects, feeds results back
pub struct SessionRuntime {
    context: SessionContext,
    state: SessionState,
    services: SessionServices,
    options: RuntimeOptions,
    command_rx: mpsc::Receiver<CommandEnvelope>,
    event_tx: mpsc::Sender<ScopedEvent>,
    event_rx: mpsc::Receiver<ScopedEvent>,
    selection_tx: mpsc::Sender<SelectionLookup>,
    selection_rx: mpsc::Receiver<SelectionLookup>,
    /// Cancels outstanding selection lookups on shutdown
    lookup_cancel: CancellationToken,
    update_tx: broadcast::Sender<SessionUpdate>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    /// Bumped whenever a start attempt or active session is left; older results are dropped
    epoch: u64,
    /// Cancels permission, token and charge requests of the current start attempt
    start_cancel: Option<CancellationToken>,
    countdown: Option<Countdown>,
    transport_cancel: Option<CancellationToken>,
    transport_task: Option<JoinHandle<()>>,
    unmounting: bool,
}

impl SessionRuntime {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        context: SessionContext,
        state: SessionState,
        services: SessionServices,
        options: RuntimeOptions,
        command_rx: mpsc::Receiver<CommandEnvelope>,
        event_tx: mpsc::Sender<ScopedEvent>,
        event_rx: mpsc::Receiver<ScopedEvent>,
        update_tx: broadcast::Sender<SessionUpdate>,
        snapshot_tx: watch::Sender<SessionSnapshot>,
    ) -> Self {
        let (selection_tx, selection_rx) = mpsc::channel(8);
        Self {
            context,
            state,
            services,
            options,
            command_rx,
            event_tx,
            event_rx,
            selection_tx,
            selection_rx,
            lookup_cancel: CancellationToken::new(),
            update_tx,
            snapshot_tx,
            epoch: 0,
            start_cancel: None,
            countdown: None,
            transport_cancel: None,
            transport_task: None,
            unmounting: false,
        }
    }

    pub async fn run(mut self) {
        tracing::info!(display_name = %self.context.display_name, "Starting session runtime");

        loop {
            if self.unmounting && self.state.is_idle() {
                break;
            }

            tokio::select! {
                command = self.command_rx.recv(), if !self.unmounting => {
                    match command {
                        Some(CommandEnvelope { command, reply }) => {
                            self.handle_command(command, reply).await;
                        }
                        None => {
                            tracing::info!("All session handles dropped, unmounting");
                            self.unmounting = true;
                            if let Err(e) = self.process_event(Event::Unmounted).await {
                                tracing::warn!(error = %e, "Unmount after handle drop failed");
                            }
                        }
                    }
                }
                Some(lookup) = self.selection_rx.recv() => {
                    self.finish_selection(lookup).await;
                }
                Some(scoped) = self.event_rx.recv() => {
                    if scoped.epoch != self.epoch {
                        tracing::debug!(
                            epoch = scoped.epoch,
                            current = self.epoch,
                            "Dropping result from an abandoned scope"
                        );
                        continue;
                    }
                    if let Err(e) = self.process_event(scoped.event).await {
                        tracing::error!(error = %e, "Error handling event");
                    }
                }
            }
        }

        self.release_all();
        tracing::info!("Session runtime stopped");
    }

    async fn handle_command(&mut self, command: SessionCommand, reply: Reply) {
        tracing::debug!(?command, phase = ?self.state.phase(), "Handling command");
        let result = match command {
            SessionCommand::Select { package_id } => match self.ensure_selectable() {
                Ok(()) => {
                    self.spawn_selection_lookup(package_id, reply);
                    return;
                }
                Err(e) => Err(e),
            },
            SessionCommand::ClearSelection => self.process_event(Event::SelectionCleared).await,
            SessionCommand::Start => self.process_event(Event::StartRequested).await,
            SessionCommand::End => self.process_event(Event::EndRequested).await,
            SessionCommand::Unmount => {
                self.unmounting = true;
                self.process_event(Event::Unmounted).await
            }
        };
        self.reply(reply, result);
    }

    /// Selection only applies before a start; refuse early so no I/O is spent on it
    fn ensure_selectable(&self) -> Result<(), SessionError> {
        match self.state.phase() {
            SessionPhase::Idle | SessionPhase::Selecting => Ok(()),
            SessionPhase::Starting => Err(TransitionError::StartInProgress.into()),
            SessionPhase::Active | SessionPhase::Ending => {
                Err(TransitionError::SessionActive.into())
            }
        }
    }

    fn spawn_selection_lookup(&self, package_id: PackageId, reply: Reply) {
        let catalog = self.services.catalog.clone();
        let ledger = self.services.ledger.clone();
        let selection_tx = self.selection_tx.clone();
        let cancel = self.lookup_cancel.clone();

        tokio::spawn(async move {
            let lookup = async {
                let package = catalog.find(&package_id).await?.ok_or_else(|| {
                    SessionError::invalid_request(format!("Unknown package {package_id}"))
                })?;
                let balance = ledger.balance().await?;
                Ok::<_, SessionError>((package, balance))
            };

            tokio::select! {
                () = cancel.cancelled() => {}
                result = lookup => {
                    let _ = selection_tx.send(SelectionLookup { result, reply }).await;
                }
            }
        });
    }

    /// The state may have moved on while the lookup ran; `transition` decides
    async fn finish_selection(&mut self, lookup: SelectionLookup) {
        let SelectionLookup { result, reply } = lookup;
        let result = match result {
            Ok((package, balance)) => {
                self.process_event(Event::PackageSelected { package, balance })
                    .await
            }
            Err(e) => Err(e),
        };
        self.reply(reply, result);
    }

    fn reply(&self, reply: Reply, result: Result<(), SessionError>) {
        if let Err(e) = &result {
            if e.kind.is_recoverable() {
                tracing::info!(error = %e, "Command rejected");
            } else {
                tracing::error!(error = %e, "Command failed");
            }
            let _ = self.update_tx.send(SessionUpdate::Notice {
                notice: SessionNotice::Failed {
                    kind: e.kind,
                    message: e.user_notice(),
                },
            });
        }
        let _ = reply.send(result);
    }

    async fn process_event(&mut self, event: Event) -> Result<(), SessionError> {
        let mut events_to_process = vec![event];

        while let Some(current_event) = events_to_process.pop() {
            let result = match transition(&self.state, &self.context, current_event) {
                Ok(r) => r,
                Err(e) if e.is_stale() => {
                    tracing::debug!(reason = %e, "Ignoring stale event");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let old_phase = self.state.phase();
            self.state = result.new_state;
            let new_phase = self.state.phase();
            if old_phase != new_phase {
                tracing::info!(from = ?old_phase, to = ?new_phase, "Session phase changed");
            }

            for effect in result.effects {
                if let Some(generated_event) = self.execute_effect(effect).await {
                    events_to_process.push(generated_event);
                }
            }

            if old_phase != new_phase {
                self.leave_scope(old_phase, new_phase);
            }
        }

        Ok(())
    }

    /// Invalidate background work that belonged to the phase just left.
    /// Starting hands its epoch over to Active; every other exit retires it.
    fn leave_scope(&mut self, from: SessionPhase, to: SessionPhase) {
        if from == SessionPhase::Starting {
            if let Some(token) = self.start_cancel.take() {
                token.cancel();
            }
        }
        let left_start = from == SessionPhase::Starting && to != SessionPhase::Active;
        if left_start || from == SessionPhase::Active {
            self.epoch += 1;
        }
    }

    async fn execute_effect(&mut self, effect: Effect) -> Option<Event> {
        match effect {
            Effect::RequestPermission => {
                let permissions = self.services.permissions.clone();
                self.spawn_start_task(async move {
                    let status = permissions.request_microphone().await;
                    Event::PermissionResolved {
                        granted: status == PermissionStatus::Granted,
                    }
                });
                None
            }

            Effect::AcquireToken { display_name } => {
                let tokens = self.services.tokens.clone();
                self.spawn_start_task(async move {
                    match tokens.acquire_token(&display_name).await {
                        Ok(grant) => Event::TokenAcquired { grant },
                        Err(error) => Event::TokenFailed { error },
                    }
                });
                None
            }

            Effect::ChargeForPackage { package_id } => {
                let billing = self.services.billing.clone();
                self.spawn_start_task(async move {
                    match billing.charge_for_package(&package_id).await {
                        Ok(()) => Event::ChargeSucceeded,
                        Err(error) => Event::ChargeFailed { error },
                    }
                });
                None
            }

            Effect::CancelPendingStart => {
                if let Some(token) = self.start_cancel.take() {
                    tracing::info!("Cancelling pending start request");
                    token.cancel();
                }
                None
            }

            Effect::OpenTransport { grant } => {
                let cancel = CancellationToken::new();
                self.transport_cancel = Some(cancel.clone());
                self.transport_task = Some(tokio::spawn(forward_transport(
                    self.services.media.clone(),
                    grant,
                    cancel,
                    self.event_tx.clone(),
                    self.epoch,
                )));
                None
            }

            Effect::CloseTransport => {
                self.close_transport().await;
                None
            }

            Effect::StartCountdown => {
                self.countdown = Some(Countdown::start(
                    self.options.tick_period,
                    self.epoch,
                    self.event_tx.clone(),
                ));
                None
            }

            Effect::StopCountdown => {
                if let Some(countdown) = self.countdown.take() {
                    countdown.stop();
                }
                None
            }

            Effect::RefreshLedger { assumed_debit } => {
                let ledger = self.services.ledger.clone();
                if let Some(amount) = assumed_debit {
                    ledger.assume_debit(amount);
                }
                tokio::spawn(async move {
                    match ledger.refresh().await {
                        Ok(balance) => tracing::debug!(balance, "Ledger refreshed"),
                        Err(e) => tracing::warn!(error = %e, "Ledger refresh failed"),
                    }
                });
                None
            }

            Effect::PersistTranscript { entries } => {
                let outcome = match self.services.transcripts.save(&entries).await {
                    Ok(()) => {
                        tracing::info!(entries = entries.len(), "Transcript handed off");
                        TeardownOutcome::Persisted
                    }
                    Err(error) => {
                        tracing::error!(error = %error, "Failed to persist transcript");
                        TeardownOutcome::PersistFailed { error }
                    }
                };
                Some(Event::TeardownFinished { outcome })
            }

            Effect::FinishTeardown => Some(Event::TeardownFinished {
                outcome: TeardownOutcome::NothingToPersist,
            }),

            Effect::Notify { notice } => {
                let _ = self.update_tx.send(SessionUpdate::Notice { notice });
                None
            }

            Effect::NavigateToFeedback => {
                let _ = self.update_tx.send(SessionUpdate::NavigateToFeedback);
                None
            }

            Effect::TranscriptAppended { entry } => {
                let _ = self
                    .update_tx
                    .send(SessionUpdate::TranscriptAppended { entry });
                None
            }

            Effect::PublishState => {
                let snapshot = self.state.snapshot();
                self.snapshot_tx.send_replace(snapshot.clone());
                let _ = self.update_tx.send(SessionUpdate::StateChanged { snapshot });
                None
            }
        }
    }

    /// Run one start-protocol request; its result is dropped if the attempt is abandoned
    fn spawn_start_task<F>(&mut self, task: F)
    where
        F: Future<Output = Event> + Send + 'static,
    {
        let cancel = self
            .start_cancel
            .get_or_insert_with(CancellationToken::new)
            .clone();
        let event_tx = self.event_tx.clone();
        let epoch = self.epoch;

        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::debug!(epoch, "Start request cancelled");
                }
                event = task => {
                    let _ = event_tx.send(ScopedEvent { epoch, event }).await;
                }
            }
        });
    }

    async fn close_transport(&mut self) {
        if let Some(cancel) = self.transport_cancel.take() {
            cancel.cancel();
        }
        if let Some(task) = self.transport_task.take() {
            if tokio::time::timeout(self.options.close_timeout, task)
                .await
                .is_err()
            {
                tracing::warn!("Transport did not close in time");
            }
        }
    }

    fn release_all(&mut self) {
        self.lookup_cancel.cancel();
        if let Some(token) = self.start_cancel.take() {
            token.cancel();
        }
        if let Some(countdown) = self.countdown.take() {
            countdown.stop();
        }
        if let Some(cancel) = self.transport_cancel.take() {
            cancel.cancel();
        }
    }
}

/// Connect, then forward utterances and the disconnect signal until cancelled
async fn forward_transport(
    media: MediaCapability,
    grant: SessionGrant,
    cancel: CancellationToken,
    event_tx: mpsc::Sender<ScopedEvent>,
    epoch: u64,
) {
    let connected = tokio::select! {
        () = cancel.cancelled() => return,
        result = media.connect(&grant) => result,
    };

    let TransportConnection {
        assistant_utterances,
        user_utterances,
        mut disconnected,
        mut link,
    } = match connected {
        Ok(connection) => connection,
        Err(e) => {
            tracing::error!(error = %e, "Transport connect failed");
            deliver(&event_tx, &cancel, epoch, Event::TransportDisconnected).await;
            return;
        }
    };
    tracing::info!(routing_address = %grant.routing_address, "Transport connected");
    let mut assistant_utterances = assistant_utterances.fuse();
    let mut user_utterances = user_utterances.fuse();

    loop {
        let (speaker, text) = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            Some(text) = assistant_utterances.next() => (Speaker::Assistant, text),
            Some(text) = user_utterances.next() => (Speaker::User, text),
            () = &mut disconnected => {
                tracing::warn!("Transport disconnected");
                deliver(&event_tx, &cancel, epoch, Event::TransportDisconnected).await;
                break;
            }
        };

        let id = Uuid::new_v4().to_string();
        if let Some(entry) = TranscriptEntry::new(id, speaker, text, Utc::now()) {
            deliver(&event_tx, &cancel, epoch, Event::Utterance { entry }).await;
        }
    }

    link.close().await;
    tracing::debug!("Transport closed");
}

/// Send unless the scope is cancelled first; the runtime may be waiting on us to exit
async fn deliver(
    event_tx: &mpsc::Sender<ScopedEvent>,
    cancel: &CancellationToken,
    epoch: u64,
    event: Event,
) {
    tokio::select! {
        () = cancel.cancelled() => {}
        _ = event_tx.send(ScopedEvent { epoch, event }) => {}
    }
}
