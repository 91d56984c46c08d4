//! In-memory fakes shared by the unit tests.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use crate::credentials::{CredentialCache, CredentialMaterial, CredentialSource};
use crate::errors::{CredentialError, NotifyError, StoreError};
use crate::ledger::Ledger;
use crate::notify::{MessageRef, Notifier, StatusReporter};
use crate::storage::{ListedObject, ObjectPage, ObjectStore, StoreResult};

pub fn paths(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

pub fn material(access_key_id: &str) -> CredentialMaterial {
    CredentialMaterial {
        access_key_id: access_key_id.to_string(),
        secret_access_key: format!("secret-{access_key_id}"),
        session_token: format!("token-{access_key_id}"),
        expires_at: None,
    }
}

/// Ledger in a fresh temp directory, reporting into a recording notifier.
pub async fn open_ledger() -> anyhow::Result<(TempDir, Ledger, Arc<RecordingNotifier>)> {
    let (dir, ledger, notifier, _) = open_ledger_with_reporter().await?;
    Ok((dir, ledger, notifier))
}

/// Like [`open_ledger`], also handing back the reporter so other components can share it.
pub async fn open_ledger_with_reporter()
-> anyhow::Result<(TempDir, Ledger, Arc<RecordingNotifier>, Arc<StatusReporter>)> {
    let notifier = Arc::new(RecordingNotifier::default());
    let reporter = Arc::new(StatusReporter::new(notifier.clone(), "C-TEST"));
    let (dir, ledger) = open_ledger_for(reporter.clone()).await?;
    Ok((dir, ledger, notifier, reporter))
}

/// Ledger in a fresh temp directory reporting through `reporter`.
pub async fn open_ledger_for(reporter: Arc<StatusReporter>) -> anyhow::Result<(TempDir, Ledger)> {
    let dir = tempfile::tempdir()?;
    let ledger = Ledger::open(&dir.path().join("restore_requests.db"), reporter).await?;
    Ok((dir, ledger))
}

/// Returns scripted results in order, repeating the last one once exhausted.
/// `None` entries fail the role assumption.
pub struct ScriptedCredentialSource {
    script: Vec<Option<CredentialMaterial>>,
    calls: AtomicUsize,
}

impl ScriptedCredentialSource {
    pub fn new(script: Vec<Option<CredentialMaterial>>) -> Self {
        ScriptedCredentialSource {
            script,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialSource for ScriptedCredentialSource {
    async fn assume_role(
        &self,
        role_arn: &str,
        _region: &str,
    ) -> Result<CredentialMaterial, CredentialError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self.script.get(call).or(self.script.last()).cloned().flatten();
        step.ok_or_else(|| CredentialError::AssumeRole {
            role_arn: role_arn.to_string(),
            message: "scripted failure".to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Post {
    pub channel: String,
    pub thread: Option<MessageRef>,
    pub content: String,
}

/// Records successful posts; the first `fail_first` attempts are rejected.
#[derive(Default)]
pub struct RecordingNotifier {
    posts: Mutex<Vec<Post>>,
    attempts: AtomicUsize,
    fail_first: usize,
}

impl RecordingNotifier {
    pub fn failing_first(count: usize) -> Self {
        RecordingNotifier {
            fail_first: count,
            ..Default::default()
        }
    }

    pub fn posts(&self) -> Vec<Post> {
        self.posts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn post(
        &self,
        channel: &str,
        thread: Option<&MessageRef>,
        content: &str,
    ) -> Result<MessageRef, NotifyError> {
        if self.attempts.fetch_add(1, Ordering::SeqCst) < self.fail_first {
            return Err(NotifyError::Rejected("scripted failure".to_string()));
        }
        let mut posts = self.posts.lock().unwrap();
        let reference = MessageRef(format!("msg-{}", posts.len()));
        posts.push(Post {
            channel: channel.to_string(),
            thread: thread.cloned(),
            content: content.to_string(),
        });
        Ok(reference)
    }
}

/// Accepts every post and never answers.
pub struct HangingNotifier;

#[async_trait]
impl Notifier for HangingNotifier {
    async fn post(
        &self,
        _channel: &str,
        _thread: Option<&MessageRef>,
        _content: &str,
    ) -> Result<MessageRef, NotifyError> {
        std::future::pending().await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    List { bucket: String, prefix: String, token: Option<String> },
    ChangeTier { bucket: String, key: String },
    GetTier { bucket: String, key: String },
}

#[derive(Default)]
struct MockState {
    // (bucket, key) -> tier, iterated in key order like an S3 listing.
    objects: BTreeMap<(String, String), String>,
    calls: Vec<StoreCall>,
    seen_access_keys: Vec<String>,
}

/// In-memory object store with injectable failures and a concurrency gauge.
pub struct MockObjectStore {
    state: Mutex<MockState>,
    page_size: usize,
    failing_listings: HashSet<String>,
    failing_copies: HashSet<String>,
    sticky_keys: HashSet<String>,
    list_delay: Duration,
    credentials: Option<Arc<CredentialCache>>,
    hold_first_copy: bool,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockObjectStore {
    pub fn new() -> Self {
        MockObjectStore {
            state: Mutex::new(MockState::default()),
            page_size: 1000,
            failing_listings: HashSet::new(),
            failing_copies: HashSet::new(),
            sticky_keys: HashSet::new(),
            list_delay: Duration::ZERO,
            credentials: None,
            hold_first_copy: false,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_object(mut self, bucket: &str, key: &str, tier: &str) -> Self {
        self.state
            .get_mut()
            .unwrap()
            .objects
            .insert((bucket.to_string(), key.to_string()), tier.to_string());
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Every listing of `bucket` fails.
    pub fn with_failing_listing(mut self, bucket: &str) -> Self {
        self.failing_listings.insert(bucket.to_string());
        self
    }

    /// Copies of `key` fail.
    pub fn with_failing_copy(mut self, key: &str) -> Self {
        self.failing_copies.insert(key.to_string());
        self
    }

    /// Copies of `key` succeed but its tier never changes.
    pub fn with_sticky_key(mut self, key: &str) -> Self {
        self.sticky_keys.insert(key.to_string());
        self
    }

    pub fn with_list_delay(mut self, delay: Duration) -> Self {
        self.list_delay = delay;
        self
    }

    /// Reads the cache on every mutating or metadata call, recording the access key.
    pub fn with_credentials(mut self, cache: Arc<CredentialCache>) -> Self {
        self.credentials = Some(cache);
        self
    }

    /// The first copy waits until the credential cache holds different material.
    pub fn hold_first_copy_until_refresh(mut self) -> Self {
        self.hold_first_copy = true;
        self
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn changed_keys(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                StoreCall::ChangeTier { key, .. } => Some(key),
                _ => None,
            })
            .collect()
    }

    pub fn tier_of(&self, bucket: &str, key: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    pub fn seen_access_keys(&self) -> Vec<String> {
        self.state.lock().unwrap().seen_access_keys.clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn record(&self, call: StoreCall) -> Option<String> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        let key = self.credentials.as_ref().map(|c| c.retrieve().access_key_id);
        if let Some(key) = &key {
            state.seen_access_keys.push(key.clone());
        }
        key
    }

    async fn wait_for_refresh(&self, seen: Option<String>) {
        let (Some(cache), Some(seen)) = (&self.credentials, seen) else {
            return;
        };
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while cache.retrieve().access_key_id == seen && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl ObjectStore for MockObjectStore {
    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation: Option<String>,
    ) -> StoreResult<ObjectPage> {
        self.state.lock().unwrap().calls.push(StoreCall::List {
            bucket: bucket.to_string(),
            prefix: prefix.to_string(),
            token: continuation.clone(),
        });

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        if !self.list_delay.is_zero() {
            tokio::time::sleep(self.list_delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing_listings.contains(bucket) {
            return Err(StoreError::S3(format!("access denied listing {bucket}").into()));
        }

        let start: usize = continuation
            .map(|token| token.parse().unwrap())
            .unwrap_or(0);
        let state = self.state.lock().unwrap();
        let matching: Vec<ListedObject> = state
            .objects
            .iter()
            .filter(|((b, k), _)| b == bucket && k.starts_with(prefix))
            .map(|((_, k), tier)| ListedObject {
                key: k.clone(),
                storage_tier: tier.clone(),
            })
            .collect();

        let end = (start + self.page_size).min(matching.len());
        let next_token = (end < matching.len()).then(|| end.to_string());
        Ok(ObjectPage {
            objects: matching[start..end].to_vec(),
            next_token,
        })
    }

    async fn change_tier(&self, bucket: &str, key: &str, target_tier: &str) -> StoreResult<()> {
        let first = !self
            .calls()
            .iter()
            .any(|call| matches!(call, StoreCall::ChangeTier { .. }));
        let seen = self.record(StoreCall::ChangeTier {
            bucket: bucket.to_string(),
            key: key.to_string(),
        });
        if first && self.hold_first_copy {
            self.wait_for_refresh(seen).await;
        }

        if self.failing_copies.contains(key) {
            return Err(StoreError::S3(format!("copy of {key} rejected").into()));
        }
        if self.sticky_keys.contains(key) {
            return Ok(());
        }
        let mut state = self.state.lock().unwrap();
        match state.objects.get_mut(&(bucket.to_string(), key.to_string())) {
            Some(tier) => {
                *tier = target_tier.to_string();
                Ok(())
            }
            None => Err(StoreError::S3(format!("no such key {key}").into())),
        }
    }

    async fn get_tier(&self, bucket: &str, key: &str) -> StoreResult<String> {
        self.record(StoreCall::GetTier {
            bucket: bucket.to_string(),
            key: key.to_string(),
        });
        self.tier_of(bucket, key)
            .ok_or_else(|| StoreError::S3(format!("no such key {key}").into()))
    }
}
