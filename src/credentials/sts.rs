// tierrestore/src/credentials/sts.rs
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_sts as sts;
use chrono::{DateTime, Utc};
use sts::config::Region;

use super::{CredentialMaterial, CredentialSource};
use crate::errors::CredentialError;

const SESSION_DURATION_SECS: i32 = 3600;

/// Assumes an IAM role through STS using the ambient AWS credential chain.
#[derive(Debug, Default)]
pub struct StsCredentialSource;

#[async_trait]
impl CredentialSource for StsCredentialSource {
    async fn assume_role(
        &self,
        role_arn: &str,
        region: &str,
    ) -> Result<CredentialMaterial, CredentialError> {
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .load()
            .await;
        let client = sts::Client::new(&sdk_config);

        let session_name = format!("tierrestore-{}", Utc::now().timestamp());
        let output = client
            .assume_role()
            .role_arn(role_arn)
            .role_session_name(session_name)
            .duration_seconds(SESSION_DURATION_SECS)
            .send()
            .await
            .map_err(|e| CredentialError::AssumeRole {
                role_arn: role_arn.to_string(),
                message: sts::error::DisplayErrorContext(&e).to_string(),
            })?;

        let credentials = output
            .credentials()
            .ok_or_else(|| CredentialError::MissingCredentials(role_arn.to_string()))?;

        Ok(CredentialMaterial {
            access_key_id: credentials.access_key_id().to_string(),
            secret_access_key: credentials.secret_access_key().to_string(),
            session_token: credentials.session_token().to_string(),
            expires_at: DateTime::<Utc>::from_timestamp(credentials.expiration().secs(), 0),
        })
    }
}
