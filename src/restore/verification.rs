// tierrestore/src/restore/verification.rs
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::bounded;
use crate::errors::ObjectFailure;
use crate::storage::ObjectStore;

/// Re-fetches an object's tier after the copy and checks it now reads `expected_tier`.
///
/// A stale read (the store still reporting the old tier) counts as a failed restoration.
pub async fn verify_restored_tier(
    store: &dyn ObjectStore,
    bucket: &str,
    key: &str,
    expected_tier: &str,
    call_timeout: Duration,
    cancel: &CancellationToken,
) -> Result<(), ObjectFailure> {
    let actual = bounded("get_tier", call_timeout, cancel, store.get_tier(bucket, key))
        .await
        .map_err(ObjectFailure::Verify)?;

    if actual != expected_tier {
        return Err(ObjectFailure::TierMismatch {
            expected: expected_tier.to_string(),
            actual,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{DEPRECATED_TIER, TARGET_TIER};
    use crate::test_support::MockObjectStore;

    #[tokio::test]
    async fn test_matching_tier_passes() {
        let store = MockObjectStore::new().with_object("a", "x/1", TARGET_TIER);
        let cancel = CancellationToken::new();
        let result =
            verify_restored_tier(&store, "a", "x/1", TARGET_TIER, Duration::from_secs(1), &cancel).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_stale_tier_is_a_mismatch() {
        let store = MockObjectStore::new().with_object("a", "x/1", DEPRECATED_TIER);
        let cancel = CancellationToken::new();
        let result =
            verify_restored_tier(&store, "a", "x/1", TARGET_TIER, Duration::from_secs(1), &cancel).await;
        match result {
            Err(ObjectFailure::TierMismatch { expected, actual }) => {
                assert_eq!(expected, TARGET_TIER);
                assert_eq!(actual, DEPRECATED_TIER);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_object_fails_verification() {
        let store = MockObjectStore::new();
        let cancel = CancellationToken::new();
        let result =
            verify_restored_tier(&store, "a", "x/1", TARGET_TIER, Duration::from_secs(1), &cancel).await;
        assert!(matches!(result, Err(ObjectFailure::Verify(_))));
    }
}
