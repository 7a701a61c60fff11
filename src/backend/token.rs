//! Token broker: display name -> transport credentials

use super::{AccessToken, SessionGrant};
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::runtime::TokenBroker;
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenResponse {
    #[serde(default)]
    token: Option<AccessToken>,
    #[serde(default, alias = "url", alias = "serverUrl")]
    routing_address: Option<String>,
}

/// `GET {endpoint}?name=...`. Each call yields a fresh token; no retries.
pub struct HttpTokenBroker {
    http: Client,
    endpoint: Option<String>,
    routing_fallback: Option<String>,
}

impl HttpTokenBroker {
    pub fn new(
        endpoint: Option<String>,
        routing_fallback: Option<String>,
        timeout: Duration,
    ) -> Result<Self, SessionError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SessionError::configuration(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            http,
            endpoint,
            routing_fallback,
        })
    }

    pub fn from_config(config: &SessionConfig) -> Result<Self, SessionError> {
        Self::new(
            config.token_endpoint.clone(),
            config.routing_fallback.clone(),
            config.http_timeout,
        )
    }
}

/// `application/json` or a `+json` suffix type, ignoring case and parameters
fn is_json_content_type(value: &str) -> bool {
    let essence = value.split(';').next().unwrap_or_default().trim();
    let essence = essence.to_ascii_lowercase();
    essence == "application/json"
        || essence
            .strip_prefix("application/")
            .is_some_and(|subtype| subtype.ends_with("+json"))
}

#[async_trait]
impl TokenBroker for HttpTokenBroker {
    async fn acquire_token(&self, display_name: &str) -> Result<SessionGrant, SessionError> {
        let endpoint = self
            .endpoint
            .as_deref()
            .ok_or_else(|| SessionError::configuration("token endpoint is not configured"))?;

        if display_name.trim().is_empty() {
            return Err(SessionError::invalid_request("display name must not be empty"));
        }

        let response = self
            .http
            .get(endpoint)
            .query(&[("name", display_name)])
            .send()
            .await?;

        let status = response.status();
        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(is_json_content_type);

        if !status.is_success() {
            return Err(if status.is_server_error() {
                SessionError::network(format!("token endpoint returned HTTP {}", status.as_u16()))
            } else {
                SessionError::protocol(format!("token endpoint returned HTTP {}", status.as_u16()))
            });
        }
        if !is_json {
            return Err(SessionError::protocol(
                "token endpoint did not return a JSON response",
            ));
        }

        let body: TokenResponse = response.json().await?;
        let token = body
            .token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| SessionError::protocol("token response has no token"))?;
        let routing_address = body
            .routing_address
            .filter(|a| !a.is_empty())
            .or_else(|| self.routing_fallback.clone())
            .ok_or_else(|| SessionError::protocol("token response has no routing address"))?;

        tracing::info!(routing_address = %routing_address, "Acquired session token");
        Ok(SessionGrant::new(token, routing_address))
    }
}
