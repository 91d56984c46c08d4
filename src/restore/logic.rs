// tierrestore/src/restore/logic.rs
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::path_restorer::PathRestorer;
use super::RestoreSettings;
use crate::errors::{LedgerError, PathError};
use crate::ledger::{Ledger, generate_request_id};
use crate::notify::{StatusEvent, StatusReporter};
use crate::storage::ObjectStore;

/// Result of one restore request. Paths in `failed_paths` remain pending in the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestOutcome {
    pub request_id: String,
    pub failed_paths: Vec<String>,
}

/// Fans restore work out over a bounded pool of path restorers.
pub struct RestoreCoordinator {
    restorer: Arc<PathRestorer>,
    ledger: Arc<Ledger>,
    reporter: Arc<StatusReporter>,
    concurrency: usize,
}

impl RestoreCoordinator {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        ledger: Arc<Ledger>,
        reporter: Arc<StatusReporter>,
        settings: &RestoreSettings,
    ) -> Self {
        RestoreCoordinator {
            restorer: Arc::new(PathRestorer::new(store, ledger.clone(), settings)),
            ledger,
            reporter,
            concurrency: settings.concurrency.max(1),
        }
    }

    /// Creates a ledger row for `paths` and restores them.
    ///
    /// Only ledger creation can fail; path failures are reported in the outcome.
    pub async fn run(
        &self,
        paths: &[String],
        region: &str,
        ttl_days: i64,
        cancel: &CancellationToken,
    ) -> Result<RequestOutcome, LedgerError> {
        let request_id = generate_request_id();
        self.ledger.create(&request_id, paths, ttl_days).await?;
        Ok(self
            .execute(request_id, paths.to_vec(), region, cancel)
            .await)
    }

    /// Restores the still-pending paths of an existing request.
    pub async fn resume(
        &self,
        request_id: &str,
        region: &str,
        cancel: &CancellationToken,
    ) -> Result<RequestOutcome, LedgerError> {
        let request = self
            .ledger
            .fetch(request_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(request_id.to_string()))?;
        tracing::info!(
            request_id,
            pending = request.pending_paths.len(),
            processed = request.processed_paths.len(),
            "Resuming restore request"
        );
        Ok(self
            .execute(request.request_id, request.pending_paths, region, cancel)
            .await)
    }

    async fn execute(
        &self,
        request_id: String,
        paths: Vec<String>,
        region: &str,
        cancel: &CancellationToken,
    ) -> RequestOutcome {
        let gate = Arc::new(Semaphore::new(self.concurrency));
        // Dropping the set aborts every task, so no restorer outlives this call.
        let mut tasks = JoinSet::new();

        for (index, path) in paths.iter().enumerate() {
            let gate = gate.clone();
            let restorer = self.restorer.clone();
            let request_id = request_id.clone();
            let region = region.to_string();
            let cancel = cancel.clone();
            let path = path.clone();

            tasks.spawn(async move {
                let result = async {
                    // Held until the task finishes, whichever way it exits.
                    let _permit = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(PathError::Cancelled),
                        permit = gate.acquire_owned() => {
                            permit.map_err(|e| PathError::Aborted(e.to_string()))?
                        }
                    };
                    restorer
                        .restore_path(&path, &region, &request_id, &cancel)
                        .await
                }
                .await;
                (index, result)
            });
        }

        let mut finished = HashSet::new();
        let mut failed = HashSet::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, Ok(report))) => {
                    finished.insert(index);
                    tracing::debug!(%request_id, path = %paths[index], ?report, "Path restorer finished");
                }
                Ok((index, Err(e))) => {
                    finished.insert(index);
                    failed.insert(index);
                    tracing::warn!(%request_id, path = %paths[index], error = %e, "Path failed");
                }
                Err(e) => {
                    tracing::error!(%request_id, error = %e, "Path restorer aborted");
                }
            }
        }

        // A restorer that panicked never reported its index.
        let failed_paths: Vec<String> = paths
            .iter()
            .enumerate()
            .filter(|(index, _)| failed.contains(index) || !finished.contains(index))
            .map(|(_, path)| path.clone())
            .collect();

        if !failed_paths.is_empty() {
            self.reporter.publish(StatusEvent::RequestFailedPaths {
                request_id: request_id.clone(),
                failed_paths: failed_paths.clone(),
            });
        }
        self.reporter.publish(StatusEvent::RequestCompleted {
            request_id: request_id.clone(),
        });

        RequestOutcome {
            request_id,
            failed_paths,
        }
    }
}
