//! Timed, coin-metered tutoring session lifecycle
//!
//! A pure state machine decides; the runtime executes its effects against the
//! backend, the token broker, the real-time transport and the hand-off store.

pub mod backend;
pub mod config;
pub mod error;
pub mod runtime;
pub mod state_machine;
pub mod store;
pub mod transcript;
pub mod transport;

pub use error::{ErrorKind, SessionError};
pub use runtime::{spawn_session, RuntimeOptions, SessionHandle, SessionServices, SessionUpdate};
pub use state_machine::{SessionContext, SessionPhase, SessionSnapshot};
