// tierrestore/src/storage/mod.rs
pub(crate) mod s3;

use async_trait::async_trait;

use crate::errors::StoreError;

/// Storage tier being migrated away from. Matched exactly, case-sensitive.
pub const DEPRECATED_TIER: &str = "REDUCED_REDUNDANCY";

/// Storage tier objects are restored into.
pub const TARGET_TIER: &str = "STANDARD";

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// One object reported by a listing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedObject {
    pub key: String,
    pub storage_tier: String,
}

/// A single page of listing results. `next_token` is `None` on the last page.
#[derive(Debug, Clone, Default)]
pub struct ObjectPage {
    pub objects: Vec<ListedObject>,
    pub next_token: Option<String>,
}

/// Object-store capability the restore engine is written against.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Lists one page of objects under `prefix`, resuming from `continuation` when given.
    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation: Option<String>,
    ) -> StoreResult<ObjectPage>;

    /// Rewrites an object in place into `target_tier`.
    async fn change_tier(&self, bucket: &str, key: &str, target_tier: &str) -> StoreResult<()>;

    /// Fetches the storage tier currently reported for an object.
    async fn get_tier(&self, bucket: &str, key: &str) -> StoreResult<String>;
}

/// A `<bucket>/<prefix>` restore scope, split at the first separator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketPath {
    pub bucket: String,
    pub prefix: String,
}

impl BucketPath {
    /// Returns `None` when the path has no `/` separator.
    pub fn parse(path: &str) -> Option<Self> {
        let (bucket, prefix) = path.split_once('/')?;
        Some(BucketPath {
            bucket: bucket.to_string(),
            prefix: prefix.to_string(),
        })
    }
}
