//! Wire and domain types shared by the REST wrappers

use crate::error::SessionError;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Package identifier, normalised to a string (the backend sends numbers)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct PackageId(String);

impl PackageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PackageId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for PackageId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl<'de> Deserialize<'de> for PackageId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u64),
            Text(String),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Self(n.to_string()),
            Raw::Text(s) => Self(s),
        })
    }
}

/// A purchasable conversation tier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Package {
    pub id: PackageId,
    pub credit_cost: u64,
    pub allowed_minutes: u32,
}

impl Package {
    pub fn new(id: impl Into<String>, credit_cost: u64, allowed_minutes: u32) -> Self {
        Self {
            id: PackageId::new(id),
            credit_cost,
            allowed_minutes,
        }
    }

    /// Session length in seconds
    pub fn allowed_seconds(&self) -> u32 {
        self.allowed_minutes.saturating_mul(60)
    }
}

/// Short-lived credential for the real-time transport. Never printed.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(<redacted>)")
    }
}

/// Transport credentials issued for one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionGrant {
    pub token: AccessToken,
    pub routing_address: String,
}

impl SessionGrant {
    pub fn new(token: AccessToken, routing_address: impl Into<String>) -> Self {
        Self {
            token,
            routing_address: routing_address.into(),
        }
    }

    pub fn is_usable(&self) -> bool {
        !self.token.is_empty() && !self.routing_address.is_empty()
    }
}

/// Response of the single-call legacy start endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyGrant {
    pub grant: SessionGrant,
    pub room_name: String,
    pub participant_name: String,
}

/// Standard backend response envelope
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiEnvelope<T> {
    pub is_success: bool,
    #[serde(default)]
    pub business_code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default = "Option::default")]
    pub result: Option<T>,
}

/// Business codes the backend uses for "not enough coins"
pub const INSUFFICIENT_FUNDS_CODES: &[&str] = &["COIN4001", "INSUFFICIENT_COIN"];

impl<T> ApiEnvelope<T> {
    fn failure_message(&self) -> String {
        let message = self.message.as_deref().unwrap_or("request failed");
        match &self.business_code {
            Some(code) => format!("{message} ({code})"),
            None => message.to_string(),
        }
    }

    pub fn is_insufficient_funds(&self) -> bool {
        self.business_code
            .as_deref()
            .is_some_and(|code| INSUFFICIENT_FUNDS_CODES.contains(&code))
    }

    /// Check the success flag without requiring a result body
    pub fn into_ack(self) -> Result<(), SessionError> {
        if self.is_success {
            Ok(())
        } else if self.is_insufficient_funds() {
            Err(SessionError::insufficient_funds(self.failure_message()))
        } else {
            Err(SessionError::server(self.failure_message()))
        }
    }

    /// Unwrap the result body, treating a missing body as malformed
    pub fn into_result(self) -> Result<T, SessionError> {
        if !self.is_success {
            let message = self.failure_message();
            return Err(if self.is_insufficient_funds() {
                SessionError::insufficient_funds(message)
            } else {
                SessionError::server(message)
            });
        }
        self.result
            .ok_or_else(|| SessionError::server("response envelope has no result"))
    }
}
