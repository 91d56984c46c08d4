// tierrestore/src/config/mod.rs
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::notify::slack::DEFAULT_SLACK_API_BASE;
use crate::restore::{DEFAULT_CALL_TIMEOUT, DEFAULT_CONCURRENCY, DEFAULT_THROTTLE, RestoreSettings};
use crate::storage::s3::S3Settings;

const DEFAULT_LEDGER_PATH: &str = "./s3_restore_requests.db";
const DEFAULT_CREDENTIAL_REFRESH: Duration = Duration::from_secs(30 * 60);

// Structs for deserializing config.json
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonS3Config {
    pub endpoint_url: Option<String>,
    pub force_path_style: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonSlackConfig {
    pub channel_id: Option<String>,
    pub api_base_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawJsonConfig {
    pub ledger_path: Option<PathBuf>,
    pub concurrency: Option<usize>,
    pub restore_throttle_ms: Option<u64>,
    pub call_timeout_secs: Option<u64>,
    pub credential_refresh_secs: Option<u64>,
    pub role_profiles: Option<HashMap<String, String>>,
    pub default_profile: Option<String>,
    pub s3: Option<JsonS3Config>,
    pub slack: Option<JsonSlackConfig>,
}

/// Notification sink settings. Absent token means notifications are unavailable.
#[derive(Debug, Clone)]
pub struct SlackConfig {
    pub api_base_url: Url,
    pub channel_id: Option<String>,
    pub token: Option<String>,
}

// Application's internal configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub ledger_path: PathBuf,
    pub restore: RestoreSettings,
    pub credential_refresh: Duration,
    pub role_profiles: HashMap<String, String>,
    pub default_profile: Option<String>,
    pub s3_endpoint_url: Option<String>,
    pub s3_force_path_style: bool,
    pub slack: SlackConfig,
}

impl AppConfig {
    /// Loads `config.json`; a missing file yields the defaults.
    pub fn load_from_json(config_path: &Path) -> Result<Self> {
        let raw_json_config = if config_path.exists() {
            let config_content = fs::read_to_string(config_path)
                .with_context(|| format!("Failed to read config file at {}", config_path.display()))?;
            serde_json::from_str(&config_content).with_context(|| {
                format!(
                    "Failed to parse JSON from config file at {}",
                    config_path.display()
                )
            })?
        } else {
            tracing::info!(path = %config_path.display(), "No config file found, using defaults");
            RawJsonConfig::default()
        };

        Self::from_raw(raw_json_config, env::var("SLACK_API_TOKEN").ok(), env::var("SLACK_CHANNEL_ID").ok())
    }

    /// Applies defaults and environment overrides to the parsed JSON.
    pub fn from_raw(
        raw: RawJsonConfig,
        slack_token: Option<String>,
        slack_channel_override: Option<String>,
    ) -> Result<Self> {
        let concurrency = raw.concurrency.unwrap_or(DEFAULT_CONCURRENCY);
        if concurrency == 0 {
            return Err(anyhow::anyhow!("concurrency must be at least 1 in config.json."));
        }

        if raw.credential_refresh_secs == Some(0) {
            return Err(anyhow::anyhow!("credential_refresh_secs must be at least 1 in config.json."));
        }

        let slack_raw = raw.slack.unwrap_or_default();
        let api_base_url = Url::parse(
            slack_raw
                .api_base_url
                .as_deref()
                .unwrap_or(DEFAULT_SLACK_API_BASE),
        )
        .context("slack.api_base_url in config.json is not a valid URL")?;

        let s3_raw = raw.s3.unwrap_or_default();

        Ok(AppConfig {
            ledger_path: raw
                .ledger_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LEDGER_PATH)),
            restore: RestoreSettings {
                concurrency,
                throttle: raw
                    .restore_throttle_ms
                    .map(Duration::from_millis)
                    .unwrap_or(DEFAULT_THROTTLE),
                call_timeout: raw
                    .call_timeout_secs
                    .map(Duration::from_secs)
                    .unwrap_or(DEFAULT_CALL_TIMEOUT),
            },
            credential_refresh: raw
                .credential_refresh_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_CREDENTIAL_REFRESH),
            role_profiles: raw.role_profiles.unwrap_or_default(),
            default_profile: raw.default_profile.filter(|s| !s.is_empty()),
            s3_endpoint_url: s3_raw.endpoint_url.filter(|s| !s.is_empty()),
            s3_force_path_style: s3_raw.force_path_style.unwrap_or(false),
            slack: SlackConfig {
                api_base_url,
                channel_id: slack_channel_override
                    .or(slack_raw.channel_id)
                    .filter(|s| !s.is_empty()),
                token: slack_token.filter(|s| !s.is_empty()),
            },
        })
    }

    /// Looks up the role to assume for `profile`, falling back to `default_profile`.
    pub fn resolve_role(&self, profile: Option<&str>) -> Result<String> {
        let profile = profile
            .or(self.default_profile.as_deref())
            .context("No identity profile given and no default_profile set in config.json")?;
        self.role_profiles
            .get(profile)
            .cloned()
            .with_context(|| format!("Identity profile '{}' has no role in role_profiles", profile))
    }

    pub fn s3_settings(&self, region: &str) -> S3Settings {
        S3Settings {
            region: region.to_string(),
            endpoint_url: self.s3_endpoint_url.clone(),
            force_path_style: self.s3_force_path_style,
        }
    }
}

/// Splits the comma-separated bucket path argument. Entries are trimmed but otherwise
/// kept as given; malformed ones fail later at path level. An argument with no
/// non-blank entry is an error.
pub fn parse_bucket_paths(raw: &str) -> Result<Vec<String>> {
    let paths: Vec<String> = raw.split(',').map(|s| s.trim().to_string()).collect();
    if paths.iter().all(|p| p.is_empty()) {
        anyhow::bail!("Please provide bucket paths (comma-separated bucket/prefix list).");
    }
    Ok(paths)
}

/// Trims the region argument, rejecting a blank one.
pub fn require_region(raw: &str) -> Result<String> {
    let region = raw.trim();
    if region.is_empty() {
        anyhow::bail!("Please provide an AWS region.");
    }
    Ok(region.to_string())
}
