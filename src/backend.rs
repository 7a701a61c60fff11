//! Thin REST wrappers around the tutor backend
//!
//! Every backend route answers with an [`ApiEnvelope`]; the token broker is a
//! separate service with a bare JSON body.

mod billing;
mod catalog;
mod ledger;
mod token;
pub mod types;

pub use billing::HttpBillingGate;
pub use catalog::{CachedCatalog, HttpPackageCatalog};
pub use ledger::HttpLedger;
pub use token::HttpTokenBroker;
pub use types::*;

use crate::config::SessionConfig;
use crate::error::SessionError;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Shared HTTP client for the envelope-style backend
#[derive(Debug, Clone)]
pub struct BackendClient {
    http: Client,
    base_url: String,
    api_token: Option<String>,
}

impl BackendClient {
    pub fn new(
        base_url: impl Into<String>,
        api_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, SessionError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SessionError::configuration(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_token,
        })
    }

    pub fn from_config(config: &SessionConfig) -> Result<Self, SessionError> {
        Self::new(
            config.api_base_url.clone(),
            config.api_token.clone(),
            config.http_timeout,
        )
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    pub(crate) async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<ApiEnvelope<T>, SessionError> {
        let request = self.authorize(self.http.get(self.url(path)));
        Self::send(request).await
    }

    pub(crate) async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<ApiEnvelope<T>, SessionError> {
        let request = self.authorize(self.http.post(self.url(path)).json(body));
        Self::send(request).await
    }

    async fn send<T: DeserializeOwned>(
        request: RequestBuilder,
    ) -> Result<ApiEnvelope<T>, SessionError> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if status == StatusCode::PAYMENT_REQUIRED {
            return Err(SessionError::insufficient_funds(non_empty_or(
                &body,
                "payment required",
            )));
        }

        // Failure envelopes often come with 4xx/5xx; prefer their message
        match serde_json::from_str::<ApiEnvelope<T>>(&body) {
            Ok(envelope) => Ok(envelope),
            Err(e) if status.is_success() => Err(SessionError::server(format!(
                "Malformed response envelope: {e}"
            ))),
            Err(_) => Err(SessionError::server(format!(
                "HTTP {}: {}",
                status.as_u16(),
                non_empty_or(&body, "no body")
            ))),
        }
    }

    /// Legacy single-call start: the server charges and issues credentials.
    pub async fn start_session(&self, package_id: &PackageId) -> Result<LegacyGrant, SessionError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct StartResult {
            token: AccessToken,
            routing_address: String,
            room_name: String,
            participant_name: String,
        }

        tracing::info!(package_id = %package_id, "Starting session via legacy endpoint");
        let result: StartResult = self
            .post("ai-tutor/sessions", &ChargeRequest { package_id })
            .await?
            .into_result()?;

        let grant = SessionGrant::new(result.token, result.routing_address);
        if !grant.is_usable() {
            return Err(SessionError::protocol(
                "start response is missing token or routing address",
            ));
        }
        Ok(LegacyGrant {
            grant,
            room_name: result.room_name,
            participant_name: result.participant_name,
        })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ChargeRequest<'a> {
    pub package_id: &'a PackageId,
}

fn non_empty_or(body: &str, fallback: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        fallback.to_string()
    } else {
        trimmed.chars().take(200).collect()
    }
}
