//! Real-time media transport seam
//!
//! The transport itself (audio, transcription, signalling) is provided by the
//! host. The runtime only needs to connect with a grant, read two utterance
//! streams, notice an unexpected disconnect, and close.

use crate::backend::SessionGrant;
use crate::error::SessionError;
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use std::sync::Arc;

/// An open transport session
pub struct TransportConnection {
    /// Transcribed assistant speech
    pub assistant_utterances: BoxStream<'static, String>,
    /// Transcribed user speech
    pub user_utterances: BoxStream<'static, String>,
    /// Resolves when the transport drops without being asked to
    pub disconnected: BoxFuture<'static, ()>,
    pub link: Box<dyn TransportLink>,
}

/// Handle used to shut an open connection down
#[async_trait]
pub trait TransportLink: Send {
    async fn close(&mut self);
}

/// Host-provided real-time transport
#[async_trait]
pub trait RealtimeTransport: Send + Sync {
    /// One-time library setup (audio session, codecs, ...)
    fn initialize(&self) -> Result<(), SessionError>;

    /// Join the session described by `grant`
    async fn connect(&self, grant: &SessionGrant) -> Result<TransportConnection, SessionError>;
}

/// Proof that the transport library was initialized. Required to build a runtime.
#[derive(Clone)]
pub struct MediaCapability {
    transport: Arc<dyn RealtimeTransport>,
}

impl MediaCapability {
    pub fn initialize(transport: Arc<dyn RealtimeTransport>) -> Result<Self, SessionError> {
        transport.initialize()?;
        tracing::debug!("Media transport initialized");
        Ok(Self { transport })
    }

    pub async fn connect(&self, grant: &SessionGrant) -> Result<TransportConnection, SessionError> {
        if !grant.is_usable() {
            return Err(SessionError::protocol("grant is missing token or routing address"));
        }
        self.transport.connect(grant).await
    }
}

impl std::fmt::Debug for MediaCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaCapability").finish_non_exhaustive()
    }
}
