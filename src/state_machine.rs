//! Core session state machine
//!
//! Implements the Elm Architecture pattern with pure state transitions:
//! `transition` decides, the runtime executes the returned effects.

mod effect;
pub mod event;
pub mod state;
pub(crate) mod transition;


pub use effect::{Effect, SessionNotice};
pub use event::{Event, TeardownOutcome};
pub use state::{EndReason, SessionContext, SessionPhase, SessionSnapshot, SessionState, StartPhase};
pub use transition::{transition, TransitionError, TransitionResult};
