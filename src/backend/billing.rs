//! Coin charge for a package

use super::{BackendClient, ChargeRequest, PackageId};
use crate::error::SessionError;
use crate::runtime::BillingGate;
use async_trait::async_trait;

/// `POST ai-tutor/charge`
pub struct HttpBillingGate {
    client: BackendClient,
}

impl HttpBillingGate {
    pub fn new(client: BackendClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BillingGate for HttpBillingGate {
    async fn charge_for_package(&self, package_id: &PackageId) -> Result<(), SessionError> {
        let envelope = self
            .client
            .post::<_, serde_json::Value>("ai-tutor/charge", &ChargeRequest { package_id })
            .await?;

        match envelope.into_ack() {
            Ok(()) => {
                tracing::info!(package_id = %package_id, "Charged for package");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(package_id = %package_id, kind = ?e.kind, error = %e, "Charge rejected");
                Err(e)
            }
        }
    }
}
