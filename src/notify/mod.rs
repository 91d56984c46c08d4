// tierrestore/src/notify/mod.rs
pub(crate) mod slack;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, oneshot};

use crate::errors::NotifyError;

/// Reference to a posted message; later messages can be threaded under it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRef(pub String);

/// External channel for human-readable status updates.
#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    async fn post(
        &self,
        channel: &str,
        thread: Option<&MessageRef>,
        content: &str,
    ) -> Result<MessageRef, NotifyError>;
}

/// Status events emitted by the ledger and the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    RequestCreated {
        request_id: String,
        paths: Vec<String>,
        ttl_days: i64,
        created_at: String,
    },
    /// `pending` empty means every path is processed and the ledger row is gone.
    PathsUpdated {
        request_id: String,
        path: String,
        pending: Vec<String>,
        processed: Vec<String>,
    },
    RequestFailedPaths {
        request_id: String,
        failed_paths: Vec<String>,
    },
    RequestCompleted {
        request_id: String,
    },
}

impl StatusEvent {
    pub fn request_id(&self) -> &str {
        match self {
            StatusEvent::RequestCreated { request_id, .. }
            | StatusEvent::PathsUpdated { request_id, .. }
            | StatusEvent::RequestFailedPaths { request_id, .. }
            | StatusEvent::RequestCompleted { request_id } => request_id,
        }
    }

    pub fn render(&self) -> String {
        match self {
            StatusEvent::RequestCreated {
                request_id,
                paths,
                ttl_days,
                created_at,
            } => format!(
                "Created restore request {request_id}\nBucket Paths: {}\nTTL: {ttl_days} days\nCreated At: {created_at}",
                json_list(paths)
            ),
            StatusEvent::PathsUpdated {
                request_id,
                path,
                pending,
                processed,
            } => {
                let mut message = format!(
                    "Processed {path} for restore request {request_id}\nRemaining Bucket Paths: {}\nProcessed Paths: {}",
                    json_list(pending),
                    json_list(processed)
                );
                if pending.is_empty() {
                    message.push_str(&format!(
                        "\nAll paths processed for restore request {request_id}. Record deleted."
                    ));
                }
                message
            }
            StatusEvent::RequestFailedPaths {
                request_id,
                failed_paths,
            } => format!(
                "Restore request {request_id} finished with {} failed path(s): {}",
                failed_paths.len(),
                json_list(failed_paths)
            ),
            StatusEvent::RequestCompleted { request_id } => {
                format!("Restore process completed for restore request {request_id}")
            }
        }
    }
}

fn json_list(items: &[String]) -> String {
    serde_json::to_string(items).unwrap_or_else(|_| format!("{:?}", items))
}

/// Upper bound on a single notifier post.
pub const NOTIFY_POST_TIMEOUT: Duration = Duration::from_secs(10);

struct Sink {
    notifier: Arc<dyn Notifier>,
    channel: String,
    post_timeout: Duration,
    threads: Mutex<HashMap<String, MessageRef>>,
}

impl Sink {
    async fn emit(&self, event: &StatusEvent) -> Result<(), NotifyError> {
        let content = event.render();
        let request_id = event.request_id();
        let mut threads = self.threads.lock().await;
        let thread = threads.get(request_id).cloned();
        let posted = tokio::time::timeout(
            self.post_timeout,
            self.notifier.post(&self.channel, thread.as_ref(), &content),
        )
        .await;

        // Nothing is posted for a request after its completion message.
        let completed = matches!(event, StatusEvent::RequestCompleted { .. });
        if completed {
            threads.remove(request_id);
        }
        let posted = posted.map_err(|_| NotifyError::Timeout(self.post_timeout))??;
        if thread.is_none() && !completed {
            threads.insert(request_id.to_string(), posted);
        }
        Ok(())
    }
}

enum Queued {
    Event(StatusEvent),
    Flush(oneshot::Sender<()>),
}

/// Delivers queued events one at a time, in the order they were published.
async fn deliver(sink: Arc<Sink>, mut queue: mpsc::UnboundedReceiver<Queued>) {
    while let Some(item) = queue.recv().await {
        match item {
            Queued::Event(event) => {
                if let Err(e) = sink.emit(&event).await {
                    tracing::warn!(request_id = event.request_id(), error = %e, "Failed to send status notification");
                }
            }
            Queued::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}

/// Translates status events into notifier posts.
///
/// Messages for one request are threaded under the first message posted for it.
/// [`publish`](Self::publish) only enqueues; a background task posts, so a slow or
/// unreachable notifier never holds up the caller. A reporter built without a sink
/// rejects every event as unavailable.
pub struct StatusReporter {
    sink: Option<(Arc<Sink>, mpsc::UnboundedSender<Queued>)>,
}

impl StatusReporter {
    /// Must be called inside a tokio runtime; spawns the delivery task.
    pub fn new(notifier: Arc<dyn Notifier>, channel: impl Into<String>) -> Self {
        Self::with_post_timeout(notifier, channel, NOTIFY_POST_TIMEOUT)
    }

    pub fn with_post_timeout(
        notifier: Arc<dyn Notifier>,
        channel: impl Into<String>,
        post_timeout: Duration,
    ) -> Self {
        let sink = Arc::new(Sink {
            notifier,
            channel: channel.into(),
            post_timeout,
            threads: Mutex::new(HashMap::new()),
        });
        let (queue, pending) = mpsc::unbounded_channel();
        tokio::spawn(deliver(sink.clone(), pending));
        StatusReporter {
            sink: Some((sink, queue)),
        }
    }

    pub fn disabled() -> Self {
        StatusReporter { sink: None }
    }

    /// Posts the event right away, bypassing the queue.
    pub async fn emit(&self, event: &StatusEvent) -> Result<(), NotifyError> {
        let Some((sink, _)) = &self.sink else {
            return Err(NotifyError::Unavailable(
                "no notification token or channel configured".to_string(),
            ));
        };
        sink.emit(event).await
    }

    /// Logs the event and queues it for delivery. Never blocks and never fails.
    pub fn publish(&self, event: StatusEvent) {
        tracing::info!(request_id = event.request_id(), "{}", event.render());
        let request_id = event.request_id().to_string();
        let queued = match &self.sink {
            Some((_, queue)) => queue.send(Queued::Event(event)).is_ok(),
            None => false,
        };
        if !queued {
            tracing::warn!(%request_id, "Status notification unavailable, not sent");
        }
    }

    /// Waits until every event published so far has been delivered or given up on.
    pub async fn flush(&self) {
        let Some((_, queue)) = &self.sink else {
            return;
        };
        let (done, delivered) = oneshot::channel();
        if queue.send(Queued::Flush(done)).is_ok() {
            let _ = delivered.await;
        }
    }

    #[cfg(test)]
    pub(crate) async fn open_threads(&self) -> usize {
        match &self.sink {
            Some((sink, _)) => sink.threads.lock().await.len(),
            None => 0,
        }
    }
}
