// tierrestore/src/storage/s3.rs
use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_credential_types::provider::{ProvideCredentials, future};
use aws_sdk_s3 as s3;
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use s3::config::{BehaviorVersion, IdentityCache, Region};
use s3::types::StorageClass;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::instrument;

use super::{ListedObject, ObjectPage, ObjectStore, StoreResult, TARGET_TIER};
use crate::credentials::CredentialCache;
use crate::errors::StoreError;

fn map_s3_error<E>(err: E) -> StoreError
where
    E: std::error::Error + Send + Sync + 'static,
{
    StoreError::S3(Box::new(err))
}

/// Hands the SDK whatever the credential cache holds at signing time.
#[derive(Debug)]
struct CacheCredentialsProvider {
    cache: Arc<CredentialCache>,
}

impl ProvideCredentials for CacheCredentialsProvider {
    fn provide_credentials<'a>(&'a self) -> future::ProvideCredentials<'a>
    where
        Self: 'a,
    {
        let material = self.cache.retrieve();
        let expiry = material
            .expires_at
            .map(|at| SystemTime::UNIX_EPOCH + Duration::from_secs(at.timestamp().max(0) as u64));
        future::ProvideCredentials::ready(Ok(Credentials::new(
            material.access_key_id,
            material.secret_access_key,
            Some(material.session_token),
            expiry,
            "CredentialCache",
        )))
    }
}

/// Connection settings for the S3 backend.
#[derive(Debug, Clone, Default)]
pub struct S3Settings {
    pub region: String,
    pub endpoint_url: Option<String>,
    pub force_path_style: bool,
}

/// `ObjectStore` over S3 (or an S3-compatible endpoint).
///
/// Identity caching is disabled so every signed request re-reads the credential cache.
pub struct S3ObjectStore {
    client: s3::Client,
}

impl S3ObjectStore {
    pub fn new(settings: &S3Settings, cache: Arc<CredentialCache>) -> Self {
        let mut builder = s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(settings.region.clone()))
            .credentials_provider(CacheCredentialsProvider { cache })
            .identity_cache(IdentityCache::no_cache())
            .force_path_style(settings.force_path_style);
        if let Some(endpoint) = &settings.endpoint_url {
            builder = builder.endpoint_url(endpoint);
        }

        S3ObjectStore {
            client: s3::Client::from_conf(builder.build()),
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    #[instrument(skip(self, continuation))]
    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation: Option<String>,
    ) -> StoreResult<ObjectPage> {
        let output = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .set_continuation_token(continuation)
            .send()
            .await
            .map_err(map_s3_error)?;

        let objects = output
            .contents()
            .iter()
            .filter_map(|obj| {
                let key = obj.key()?;
                let storage_tier = obj
                    .storage_class()
                    .map(|class| class.as_str())
                    .unwrap_or(TARGET_TIER);
                Some(ListedObject {
                    key: key.to_string(),
                    storage_tier: storage_tier.to_string(),
                })
            })
            .collect();

        let next_token = if output.is_truncated() == Some(true) {
            output.next_continuation_token().map(|s| s.to_string())
        } else {
            None
        };

        Ok(ObjectPage { objects, next_token })
    }

    #[instrument(skip(self))]
    async fn change_tier(&self, bucket: &str, key: &str, target_tier: &str) -> StoreResult<()> {
        // CopySource is bucket/key with the key percent-encoded.
        let copy_source = format!("{}/{}", bucket, utf8_percent_encode(key, NON_ALPHANUMERIC));

        self.client
            .copy_object()
            .bucket(bucket)
            .key(key)
            .copy_source(copy_source)
            .storage_class(StorageClass::from(target_tier))
            .send()
            .await
            .map_err(map_s3_error)?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_tier(&self, bucket: &str, key: &str) -> StoreResult<String> {
        let output = self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(map_s3_error)?;

        // HEAD omits the storage class for STANDARD objects.
        Ok(output
            .storage_class()
            .map(|class| class.as_str())
            .unwrap_or(TARGET_TIER)
            .to_string())
    }
}
