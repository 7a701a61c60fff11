//! Package catalog over HTTP, with a short-lived cache

use super::{BackendClient, Package};
use crate::error::SessionError;
use crate::runtime::PackageCatalog;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// `GET ai-tutor/packages`
pub struct HttpPackageCatalog {
    client: BackendClient,
}

impl HttpPackageCatalog {
    pub fn new(client: BackendClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PackageCatalog for HttpPackageCatalog {
    async fn fetch_packages(&self) -> Result<Vec<Package>, SessionError> {
        let packages: Vec<Package> = self.client.get("ai-tutor/packages").await?.into_result()?;

        if let Some(bad) = packages.iter().find(|p| p.allowed_minutes == 0) {
            return Err(SessionError::server(format!(
                "package {} has no allowed minutes",
                bad.id
            )));
        }

        tracing::debug!(count = packages.len(), "Fetched package catalog");
        Ok(packages)
    }
}

struct CacheEntry {
    packages: Vec<Package>,
    fetched_at: Instant,
}

/// Caches another catalog for a staleness window
pub struct CachedCatalog {
    inner: Arc<dyn PackageCatalog>,
    ttl: Duration,
    // Held across the fetch so concurrent callers share one request
    cache: Mutex<Option<CacheEntry>>,
}

impl CachedCatalog {
    pub fn new(inner: Arc<dyn PackageCatalog>, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            cache: Mutex::new(None),
        }
    }

    /// Drop the cached list so the next call refetches
    pub async fn invalidate(&self) {
        *self.cache.lock().await = None;
    }
}

#[async_trait]
impl PackageCatalog for CachedCatalog {
    async fn fetch_packages(&self) -> Result<Vec<Package>, SessionError> {
        let mut cache = self.cache.lock().await;
        if let Some(entry) = cache.as_ref() {
            if entry.fetched_at.elapsed() < self.ttl {
                return Ok(entry.packages.clone());
            }
        }

        let packages = self.inner.fetch_packages().await?;
        *cache = Some(CacheEntry {
            packages: packages.clone(),
            fetched_at: Instant::now(),
        });
        Ok(packages)
    }
}
