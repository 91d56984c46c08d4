// tierrestore/src/credentials/mod.rs
pub(crate) mod sts;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::errors::CredentialError;

/// Short-lived cloud credentials obtained through role assumption.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialMaterial {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for CredentialMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialMaterial")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Produces fresh credentials for a role.
#[async_trait]
pub trait CredentialSource: Send + Sync + 'static {
    async fn assume_role(
        &self,
        role_arn: &str,
        region: &str,
    ) -> Result<CredentialMaterial, CredentialError>;
}

/// Holds the current credentials for every concurrent restorer.
///
/// Readers clone the material out of a read guard and never hold the lock across
/// an await point, so a refresh is visible to the very next call.
#[derive(Debug)]
pub struct CredentialCache {
    current: RwLock<CredentialMaterial>,
}

impl CredentialCache {
    pub fn new(initial: CredentialMaterial) -> Self {
        CredentialCache {
            current: RwLock::new(initial),
        }
    }

    /// Assumes the role once and wraps the result. Failure here is fatal for the caller.
    pub async fn initialize(
        source: &dyn CredentialSource,
        role_arn: &str,
        region: &str,
    ) -> Result<Self, CredentialError> {
        let material = source.assume_role(role_arn, region).await?;
        tracing::info!(role_arn, expires_at = ?material.expires_at, "Obtained initial credentials");
        Ok(CredentialCache::new(material))
    }

    pub fn retrieve(&self) -> CredentialMaterial {
        // A poisoned lock still holds a complete value; writers only ever swap it whole.
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn update(&self, material: CredentialMaterial) {
        match self.current.write() {
            Ok(mut guard) => *guard = material,
            Err(poisoned) => *poisoned.into_inner() = material,
        }
    }
}

/// Settings for the background credential refresh task.
#[derive(Debug, Clone)]
pub struct RefreshSchedule {
    pub role_arn: String,
    pub region: String,
    pub interval: Duration,
}

/// Spawns the periodic refresh task.
///
/// Every `interval` the role is assumed again and the cache updated. A failed refresh is
/// logged and the previous material kept. The task exits when `shutdown` is cancelled;
/// the caller joins the returned handle.
pub fn spawn_refresh(
    cache: Arc<CredentialCache>,
    source: Arc<dyn CredentialSource>,
    schedule: RefreshSchedule,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(schedule.interval);
        // The first tick completes immediately; initial credentials are already in place.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Credential refresh shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    match source.assume_role(&schedule.role_arn, &schedule.region).await {
                        Ok(material) => {
                            tracing::info!(
                                role_arn = %schedule.role_arn,
                                expires_at = ?material.expires_at,
                                "Refreshed credentials"
                            );
                            cache.update(material);
                        }
                        Err(e) => {
                            tracing::warn!(
                                role_arn = %schedule.role_arn,
                                error = %e,
                                "Credential refresh failed, keeping previous credentials"
                            );
                        }
                    }
                }
            }
        }
    })
}
