//! Once-per-period tick source bound to an active session

use super::ScopedEvent;
use crate::state_machine::Event;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Repeating tick task. Stops when stopped, dropped, or the receiver is gone.
pub(super) struct Countdown {
    cancel: CancellationToken,
}

impl Countdown {
    pub(super) fn start(period: Duration, epoch: u64, event_tx: mpsc::Sender<ScopedEvent>) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        tokio::spawn(async move {
            // First tick one period after activation, not immediately.
            // Late ticks catch up so the session never outlasts its allowance.
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Burst);

            loop {
                tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    _ = interval.tick() => {
                        let tick = ScopedEvent { epoch, event: Event::Tick };
                        if event_tx.send(tick).await.is_err() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!(epoch, "Countdown stopped");
        });

        Self { cancel }
    }

    pub(super) fn stop(self) {
        self.cancel.cancel();
    }
}

impl Drop for Countdown {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
