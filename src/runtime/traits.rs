//! Trait abstractions for runtime I/O
//!
//! These traits enable testing the executor with mock implementations.

use crate::backend::{Package, PackageId, SessionGrant};
use crate::error::SessionError;
use crate::transcript::TranscriptEntry;
use async_trait::async_trait;

/// Outcome of the host's microphone prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStatus {
    Granted,
    Denied,
}

/// Host platform permission prompt
#[async_trait]
pub trait PermissionProvider: Send + Sync {
    async fn request_microphone(&self) -> PermissionStatus;
}

/// Exchanges a display name for transport credentials
#[async_trait]
pub trait TokenBroker: Send + Sync {
    async fn acquire_token(&self, display_name: &str) -> Result<SessionGrant, SessionError>;
}

/// Debits the ledger for a package
#[async_trait]
pub trait BillingGate: Send + Sync {
    async fn charge_for_package(&self, package_id: &PackageId) -> Result<(), SessionError>;
}

/// Read-only view of the externally owned balance
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Last known balance, fetched if none is known yet
    async fn balance(&self) -> Result<u64, SessionError>;

    /// Refetch from the source of truth
    async fn refresh(&self) -> Result<u64, SessionError>;

    /// Lower the local snapshot until the next refresh lands
    fn assume_debit(&self, amount: u64);
}

/// Purchasable session tiers
#[async_trait]
pub trait PackageCatalog: Send + Sync {
    async fn fetch_packages(&self) -> Result<Vec<Package>, SessionError>;

    async fn find(&self, id: &PackageId) -> Result<Option<Package>, SessionError> {
        Ok(self
            .fetch_packages()
            .await?
            .into_iter()
            .find(|p| &p.id == id))
    }
}

/// Durable transcript hand-off read by the feedback view
#[async_trait]
pub trait TranscriptStore: Send + Sync {
    /// Replace the stored hand-off with `entries`
    async fn save(&self, entries: &[TranscriptEntry]) -> Result<(), SessionError>;

    /// Read the hand-off, if one was ever written
    async fn load(&self) -> Result<Option<Vec<TranscriptEntry>>, SessionError>;
}
