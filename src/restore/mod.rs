pub(crate) mod logic;
pub(crate) mod path_restorer;
pub(crate) mod verification;

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::storage::StoreResult;
use crate::errors::StoreError;

pub use logic::{RequestOutcome, RestoreCoordinator};
pub use path_restorer::{PathReport, PathRestorer};

pub const DEFAULT_CONCURRENCY: usize = 5;
pub const DEFAULT_THROTTLE: Duration = Duration::from_secs(2);
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(300);

/// Tunables for a restore run.
#[derive(Debug, Clone)]
pub struct RestoreSettings {
    /// Number of paths restored at once.
    pub concurrency: usize,
    /// Pause after each restored object.
    pub throttle: Duration,
    /// Upper bound on a single object-store call.
    pub call_timeout: Duration,
}

impl Default for RestoreSettings {
    fn default() -> Self {
        RestoreSettings {
            concurrency: DEFAULT_CONCURRENCY,
            throttle: DEFAULT_THROTTLE,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

/// Runs one object-store call under the per-call timeout, giving up early on cancellation.
pub(crate) async fn bounded<T, F>(
    operation: &'static str,
    call_timeout: Duration,
    cancel: &CancellationToken,
    call: F,
) -> StoreResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(StoreError::Cancelled(operation)),
        result = tokio::time::timeout(call_timeout, call) => match result {
            Ok(outcome) => outcome,
            Err(_) => Err(StoreError::Timeout {
                operation,
                secs: call_timeout.as_secs(),
            }),
        },
    }
}
