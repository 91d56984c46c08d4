// tierrestore/src/restore/path_restorer.rs
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::verification::verify_restored_tier;
use super::{RestoreSettings, bounded};
use crate::errors::{ObjectFailure, PathError};
use crate::ledger::Ledger;
use crate::storage::{BucketPath, DEPRECATED_TIER, ObjectStore, TARGET_TIER};

/// What happened to the objects under one path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathReport {
    pub pages: usize,
    pub restored: usize,
    pub failed_objects: usize,
    pub skipped: usize,
}

/// Restores every deprecated-tier object under a single bucket path.
pub struct PathRestorer {
    store: Arc<dyn ObjectStore>,
    ledger: Arc<Ledger>,
    throttle: Duration,
    call_timeout: Duration,
}

impl PathRestorer {
    pub fn new(store: Arc<dyn ObjectStore>, ledger: Arc<Ledger>, settings: &RestoreSettings) -> Self {
        PathRestorer {
            store,
            ledger,
            throttle: settings.throttle,
            call_timeout: settings.call_timeout,
        }
    }

    /// Pages through `path`, restoring objects in listing order, then records the path as
    /// processed in the ledger.
    ///
    /// Object failures are logged and counted. Listing failures, malformed paths and
    /// ledger failures fail the whole path, which then stays pending.
    pub async fn restore_path(
        &self,
        path: &str,
        region: &str,
        request_id: &str,
        cancel: &CancellationToken,
    ) -> Result<PathReport, PathError> {
        let Some(BucketPath { bucket, prefix }) = BucketPath::parse(path) else {
            tracing::warn!(request_id, path, "Invalid bucket path");
            return Err(PathError::InvalidPath(path.to_string()));
        };
        tracing::info!(request_id, path, region, "Restoring objects under path");

        let mut report = PathReport::default();
        let mut continuation = None;
        loop {
            let page = bounded(
                "list_page",
                self.call_timeout,
                cancel,
                self.store.list_page(&bucket, &prefix, continuation.take()),
            )
            .await
            .map_err(|e| {
                if e.is_cancelled() {
                    PathError::Cancelled
                } else {
                    PathError::Listing(e)
                }
            })?;
            report.pages += 1;

            for object in page.objects {
                if object.storage_tier != DEPRECATED_TIER {
                    report.skipped += 1;
                    continue;
                }

                match self.restore_object(&bucket, &object.key, cancel).await {
                    Ok(()) => {
                        report.restored += 1;
                        tracing::info!(request_id, %bucket, key = %object.key, "Object restored to {}", TARGET_TIER);
                        self.pause(cancel).await?;
                    }
                    Err(failure) if failure.is_cancelled() => return Err(PathError::Cancelled),
                    Err(failure) => {
                        report.failed_objects += 1;
                        tracing::warn!(request_id, %bucket, key = %object.key, error = %failure, "Failed to restore object");
                    }
                }
            }

            match page.next_token {
                Some(token) => continuation = Some(token),
                None => break,
            }
        }

        self.ledger
            .mark_processed(request_id, path)
            .await
            .map_err(PathError::Ledger)?;

        tracing::info!(
            request_id,
            path,
            restored = report.restored,
            failed = report.failed_objects,
            skipped = report.skipped,
            "Path processed"
        );
        Ok(report)
    }

    async fn restore_object(
        &self,
        bucket: &str,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<(), ObjectFailure> {
        bounded(
            "change_tier",
            self.call_timeout,
            cancel,
            self.store.change_tier(bucket, key, TARGET_TIER),
        )
        .await
        .map_err(ObjectFailure::ChangeTier)?;

        verify_restored_tier(
            self.store.as_ref(),
            bucket,
            key,
            TARGET_TIER,
            self.call_timeout,
            cancel,
        )
        .await
    }

    /// Inter-object throttle so the store's mutation rate stays bounded.
    async fn pause(&self, cancel: &CancellationToken) -> Result<(), PathError> {
        if self.throttle.is_zero() {
            return Ok(());
        }
        tokio::select! {
            _ = cancel.cancelled() => Err(PathError::Cancelled),
            _ = tokio::time::sleep(self.throttle) => Ok(()),
        }
    }
}
