//! S3 storage-tier restore tool
//!
//! Moves objects still stored as REDUCED_REDUNDANCY back to STANDARD, tracking each
//! request in a local ledger so interrupted runs can be resumed.

// tierrestore/src/main.rs
mod config;
mod credentials;
mod errors;
mod ledger;
mod notify;
mod restore;
mod storage;
#[cfg(test)]
mod test_support;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use config::{AppConfig, parse_bucket_paths, require_region};
use credentials::sts::StsCredentialSource;
use credentials::{CredentialCache, CredentialSource, RefreshSchedule, spawn_refresh};
use ledger::Ledger;
use notify::StatusReporter;
use notify::slack::SlackNotifier;
use restore::{RequestOutcome, RestoreCoordinator};
use storage::s3::S3ObjectStore;

const NOTIFY_FLUSH_GRACE: std::time::Duration = std::time::Duration::from_secs(15);

#[derive(Parser, Debug)]
#[command(name = "tierrestore", about = "Restore REDUCED_REDUNDANCY objects to STANDARD", version)]
struct Cli {
    /// Path to config.json
    #[arg(long, default_value = "config.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start a new restore request
    Restore {
        /// Comma-separated list of bucket/prefix paths
        #[arg(long)]
        bucket_paths: String,
        #[arg(long)]
        region: String,
        /// Retention in days recorded with the request
        #[arg(long, default_value_t = 30)]
        ttl: i64,
        /// Identity profile naming the role to assume
        #[arg(long)]
        profile: Option<String>,
    },
    /// Continue the pending paths of an existing request
    Resume {
        #[arg(long)]
        request_id: String,
        #[arg(long)]
        region: String,
        #[arg(long)]
        profile: Option<String>,
    },
    /// List requests that still have pending paths
    Pending,
}

/// Main entry point for the restore tool
#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match run_app(cli).await {
        Ok(_) => {
            println!("✅ Operation completed successfully.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("❌ Error: {:?}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_app(cli: Cli) -> Result<()> {
    let app_config = AppConfig::load_from_json(&cli.config).context(format!(
        "Failed to load application configuration from {}",
        cli.config.display()
    ))?;

    let reporter = Arc::new(build_reporter(&app_config)?);
    let ledger = Arc::new(
        Ledger::open(&app_config.ledger_path, reporter.clone())
            .await
            .with_context(|| format!("Failed to open ledger at {}", app_config.ledger_path.display()))?,
    );

    match cli.command {
        Command::Restore {
            bucket_paths,
            region,
            ttl,
            profile,
        } => {
            let paths = parse_bucket_paths(&bucket_paths)?;
            let region = require_region(&region)?;
            println!("🔄 Starting restore of {} path(s) in {}...", paths.len(), region);
            let outcome = with_coordinator(&app_config, ledger, reporter, &region, profile.as_deref(), |coordinator, cancel| {
                let region = region.clone();
                async move { coordinator.run(&paths, &region, ttl, &cancel).await }
            })
            .await?;
            print_outcome(&outcome);
        }
        Command::Resume {
            request_id,
            region,
            profile,
        } => {
            let region = require_region(&region)?;
            println!("🔄 Resuming restore request {}...", request_id);
            let outcome = with_coordinator(&app_config, ledger, reporter, &region, profile.as_deref(), |coordinator, cancel| {
                let region = region.clone();
                async move { coordinator.resume(&request_id, &region, &cancel).await }
            })
            .await?;
            print_outcome(&outcome);
        }
        Command::Pending => {
            let open = ledger.list_open().await.context("Failed to list open requests")?;
            if open.is_empty() {
                println!("No open restore requests.");
            }
            for request in open {
                println!(
                    "{}  created {}  updated {}  ttl {}d  pending {:?}  processed {}",
                    request.request_id,
                    request.created_at,
                    request.updated_at,
                    request.ttl_days,
                    request.pending_paths,
                    request.processed_paths.len()
                );
            }
        }
    }
    Ok(())
}

fn build_reporter(app_config: &AppConfig) -> Result<StatusReporter> {
    match (&app_config.slack.token, &app_config.slack.channel_id) {
        (Some(token), Some(channel)) => {
            let notifier = SlackNotifier::new(&app_config.slack.api_base_url, token.clone())
                .context("Failed to build Slack client")?;
            Ok(StatusReporter::new(Arc::new(notifier), channel.clone()))
        }
        _ => {
            tracing::warn!("SLACK_API_TOKEN or Slack channel not configured, notifications disabled");
            Ok(StatusReporter::disabled())
        }
    }
}

/// Sets up credentials, the object store and the coordinator, runs `work`, then shuts the
/// credential refresh down. Ctrl-C cancels the run; in-flight paths stay pending.
async fn with_coordinator<F, Fut>(
    app_config: &AppConfig,
    ledger: Arc<Ledger>,
    reporter: Arc<StatusReporter>,
    region: &str,
    profile: Option<&str>,
    work: F,
) -> Result<RequestOutcome>
where
    F: FnOnce(Arc<RestoreCoordinator>, CancellationToken) -> Fut,
    Fut: std::future::Future<Output = Result<RequestOutcome, errors::LedgerError>>,
{
    let role_arn = app_config.resolve_role(profile)?;

    let source: Arc<dyn CredentialSource> = Arc::new(StsCredentialSource);
    let cache = Arc::new(
        CredentialCache::initialize(source.as_ref(), &role_arn, region)
            .await
            .context("Failed to obtain initial credentials")?,
    );

    let shutdown = CancellationToken::new();
    let refresh = spawn_refresh(
        cache.clone(),
        source,
        RefreshSchedule {
            role_arn,
            region: region.to_string(),
            interval: app_config.credential_refresh,
        },
        shutdown.clone(),
    );

    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupt received, cancelling restore");
                cancel.cancel();
            }
        })
    };

    let store = Arc::new(S3ObjectStore::new(&app_config.s3_settings(region), cache));
    let coordinator = Arc::new(RestoreCoordinator::new(
        store,
        ledger,
        reporter.clone(),
        &app_config.restore,
    ));

    let outcome = work(coordinator, cancel.clone()).await;

    if tokio::time::timeout(NOTIFY_FLUSH_GRACE, reporter.flush()).await.is_err() {
        tracing::warn!("Gave up waiting for queued status notifications");
    }

    interrupt.abort();
    shutdown.cancel();
    if let Err(e) = refresh.await {
        tracing::warn!(error = %e, "Credential refresh task ended abnormally");
    }

    if cancel.is_cancelled() {
        println!("⚠️ Restore interrupted; unfinished paths remain pending.");
    }
    outcome.context("Restore request failed")
}

fn print_outcome(outcome: &RequestOutcome) {
    if !outcome.failed_paths.is_empty() {
        println!(
            "❌ {} path(s) failed and remain pending: {:?}",
            outcome.failed_paths.len(),
            outcome.failed_paths
        );
    }
    println!(
        "Restore process completed for Request ID: {}",
        outcome.request_id
    );
}
