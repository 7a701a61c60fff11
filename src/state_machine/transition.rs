//! Pure state transition function
//!
//! Given the same state, context and event this always produces the same
//! result; all I/O is described by the returned effects.

use super::{
    Effect, EndReason, Event, SessionContext, SessionNotice, SessionState, StartPhase,
    TeardownOutcome,
};
use crate::backend::{Package, SessionGrant};
use crate::error::SessionError;
use crate::transcript::Transcript;
use thiserror::Error;

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_state: SessionState,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(state: SessionState) -> Self {
        Self {
            new_state: state,
            effects: vec![],
        }
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn with_effects(mut self, effects: impl IntoIterator<Item = Effect>) -> Self {
        self.effects.extend(effects);
        self
    }
}

/// Errors that can occur during transition
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Balance {balance} is below the package cost of {cost}")]
    InsufficientFunds { cost: u64, balance: u64 },
    #[error("Package {0} has no conversation time")]
    EmptyPackage(String),
    #[error("Select a package before starting")]
    NothingSelected,
    #[error("A session is already starting")]
    StartInProgress,
    #[error("A conversation is in progress")]
    SessionActive,
    /// Event no longer relevant to the current state (late tick, abandoned start, ...)
    #[error("Ignored stale event: {0}")]
    Stale(String),
}

impl TransitionError {
    /// Stale events are dropped quietly rather than surfaced
    pub fn is_stale(&self) -> bool {
        matches!(self, TransitionError::Stale(_))
    }
}

impl From<TransitionError> for SessionError {
    fn from(err: TransitionError) -> Self {
        match err {
            TransitionError::InsufficientFunds { .. } => {
                SessionError::insufficient_funds(err.to_string())
            }
            other => SessionError::invalid_request(other.to_string()),
        }
    }
}

/// Pure transition function
#[allow(clippy::too_many_lines)]
pub fn transition(
    state: &SessionState,
    context: &SessionContext,
    event: Event,
) -> Result<TransitionResult, TransitionError> {
    match (state, event) {
        // ============================================================
        // Package selection
        // ============================================================
        (
            SessionState::Idle | SessionState::Selecting { .. },
            Event::PackageSelected { package, balance },
        ) => {
            if package.allowed_minutes == 0 {
                return Err(TransitionError::EmptyPackage(package.id.to_string()));
            }
            if balance < package.credit_cost {
                return Err(TransitionError::InsufficientFunds {
                    cost: package.credit_cost,
                    balance,
                });
            }
            Ok(TransitionResult::new(SessionState::Selecting { package })
                .with_effect(Effect::PublishState))
        }

        (SessionState::Selecting { .. }, Event::SelectionCleared) => {
            Ok(TransitionResult::new(SessionState::Idle).with_effect(Effect::PublishState))
        }

        // ============================================================
        // Start protocol: permission -> token -> charge -> active
        // ============================================================
        (SessionState::Idle, Event::StartRequested) => Err(TransitionError::NothingSelected),

        (SessionState::Selecting { package }, Event::StartRequested) => {
            Ok(TransitionResult::new(SessionState::Starting {
                package: package.clone(),
                phase: StartPhase::AwaitingPermission,
            })
            .with_effect(Effect::PublishState)
            .with_effect(Effect::RequestPermission))
        }

        (
            SessionState::Starting {
                package,
                phase: StartPhase::AwaitingPermission,
            },
            Event::PermissionResolved { granted },
        ) => {
            if granted {
                Ok(TransitionResult::new(SessionState::Starting {
                    package: package.clone(),
                    phase: StartPhase::AwaitingToken,
                })
                .with_effect(Effect::AcquireToken {
                    display_name: context.display_name.clone(),
                }))
            } else {
                Ok(abort_start(&SessionError::permission_denied(
                    "microphone permission refused",
                )))
            }
        }

        (
            SessionState::Starting {
                package,
                phase: StartPhase::AwaitingToken,
            },
            Event::TokenAcquired { grant },
        ) => {
            if !grant.is_usable() {
                return Ok(abort_start(&SessionError::protocol(
                    "token broker returned empty credentials",
                )));
            }
            Ok(TransitionResult::new(SessionState::Starting {
                package: package.clone(),
                phase: StartPhase::AwaitingCharge { grant },
            })
            .with_effect(Effect::ChargeForPackage {
                package_id: package.id.clone(),
            }))
        }

        (
            SessionState::Starting {
                phase: StartPhase::AwaitingToken,
                ..
            },
            Event::TokenFailed { error },
        ) => Ok(abort_start(&error)),

        (
            SessionState::Starting {
                package,
                phase: StartPhase::AwaitingCharge { grant },
            },
            Event::ChargeSucceeded,
        ) => Ok(activate(package, grant)),

        // Token is dropped with the state; it never reaches the transport
        (
            SessionState::Starting {
                phase: StartPhase::AwaitingCharge { .. },
                ..
            },
            Event::ChargeFailed { error },
        ) => Ok(abort_start(&error)),

        (SessionState::Starting { .. }, Event::StartRequested | Event::PackageSelected { .. }) => {
            Err(TransitionError::StartInProgress)
        }

        (SessionState::Starting { .. }, Event::SelectionCleared) => {
            Err(TransitionError::StartInProgress)
        }

        // Leaving mid-start counts as a failed start
        (SessionState::Starting { .. }, Event::Unmounted | Event::EndRequested) => {
            Ok(TransitionResult::new(SessionState::Idle)
                .with_effect(Effect::CancelPendingStart)
                .with_effect(Effect::PublishState))
        }

        // ============================================================
        // Active session
        // ============================================================
        (
            SessionState::Active {
                package,
                grant,
                remaining_seconds,
                transcript,
            },
            Event::Tick,
        ) => {
            // The tick that would reach zero tears down instead
            if *remaining_seconds <= 1 {
                return Ok(begin_teardown(EndReason::TimeUp, transcript));
            }
            Ok(TransitionResult::new(SessionState::Active {
                package: package.clone(),
                grant: grant.clone(),
                remaining_seconds: remaining_seconds - 1,
                transcript: transcript.clone(),
            })
            .with_effect(Effect::PublishState))
        }

        (
            SessionState::Active {
                package,
                grant,
                remaining_seconds,
                transcript,
            },
            Event::Utterance { entry },
        ) => {
            let mut transcript = transcript.clone();
            let stored = transcript.push(entry.clone());
            let result = TransitionResult::new(SessionState::Active {
                package: package.clone(),
                grant: grant.clone(),
                remaining_seconds: *remaining_seconds,
                transcript,
            });
            Ok(if stored {
                result.with_effect(Effect::TranscriptAppended { entry })
            } else {
                result
            })
        }

        (SessionState::Active { transcript, .. }, Event::EndRequested) => {
            Ok(begin_teardown(EndReason::UserEnded, transcript))
        }

        (SessionState::Active { transcript, .. }, Event::TransportDisconnected) => {
            Ok(begin_teardown(EndReason::TransportDisconnected, transcript))
        }

        (SessionState::Active { transcript, .. }, Event::Unmounted) => {
            Ok(begin_teardown(EndReason::Unmounted, transcript))
        }

        (
            SessionState::Active { .. } | SessionState::Ending { .. },
            Event::StartRequested | Event::PackageSelected { .. } | Event::SelectionCleared,
        ) => Err(TransitionError::SessionActive),

        // ============================================================
        // Teardown
        // ============================================================
        (SessionState::Ending { .. }, Event::TeardownFinished { outcome }) => {
            let follow_up = match outcome {
                TeardownOutcome::Persisted => Effect::NavigateToFeedback,
                TeardownOutcome::NothingToPersist => {
                    Effect::notify(SessionNotice::ConversationEnded)
                }
                TeardownOutcome::PersistFailed { .. } => {
                    Effect::notify(SessionNotice::TeardownFailed)
                }
            };
            Ok(TransitionResult::new(SessionState::Idle)
                .with_effect(Effect::PublishState)
                .with_effect(follow_up))
        }

        (SessionState::Selecting { .. }, Event::Unmounted) => {
            Ok(TransitionResult::new(SessionState::Idle).with_effect(Effect::PublishState))
        }

        // ============================================================
        // Everything else is a late or duplicate delivery
        // ============================================================
        (state, event) => Err(TransitionError::Stale(format!(
            "{} in {:?}",
            event_name(&event),
            state.phase()
        ))),
    }
}

/// Abort the start protocol back to `Idle` and surface the error
fn abort_start(error: &SessionError) -> TransitionResult {
    TransitionResult::new(SessionState::Idle)
        .with_effect(Effect::PublishState)
        .with_effect(Effect::notify_failure(error))
}

fn activate(package: &Package, grant: &SessionGrant) -> TransitionResult {
    TransitionResult::new(SessionState::Active {
        package: package.clone(),
        grant: grant.clone(),
        remaining_seconds: package.allowed_seconds(),
        transcript: Transcript::new(),
    })
    .with_effect(Effect::PublishState)
    .with_effect(Effect::OpenTransport {
        grant: grant.clone(),
    })
    .with_effect(Effect::StartCountdown)
    .with_effect(Effect::RefreshLedger {
        assumed_debit: Some(package.credit_cost),
    })
}

/// Enter `Ending`: stop the clock, drop the transport and credentials, hand off
fn begin_teardown(reason: EndReason, transcript: &Transcript) -> TransitionResult {
    let hand_off = if transcript.is_empty() {
        Effect::FinishTeardown
    } else {
        Effect::PersistTranscript {
            entries: transcript.entries().to_vec(),
        }
    };

    TransitionResult::new(SessionState::Ending { reason }).with_effects([
        Effect::StopCountdown,
        Effect::CloseTransport,
        Effect::PublishState,
        Effect::RefreshLedger {
            assumed_debit: None,
        },
        hand_off,
    ])
}

fn event_name(event: &Event) -> &'static str {
    match event {
        Event::PackageSelected { .. } => "PackageSelected",
        Event::SelectionCleared => "SelectionCleared",
        Event::StartRequested => "StartRequested",
        Event::EndRequested => "EndRequested",
        Event::Unmounted => "Unmounted",
        Event::PermissionResolved { .. } => "PermissionResolved",
        Event::TokenAcquired { .. } => "TokenAcquired",
        Event::TokenFailed { .. } => "TokenFailed",
        Event::ChargeSucceeded => "ChargeSucceeded",
        Event::ChargeFailed { .. } => "ChargeFailed",
        Event::Tick => "Tick",
        Event::Utterance { .. } => "Utterance",
        Event::TransportDisconnected => "TransportDisconnected",
        Event::TeardownFinished { .. } => "TeardownFinished",
    }
}
