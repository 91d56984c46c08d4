// tierrestore/src/notify/slack.rs
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use super::{MessageRef, Notifier};
use crate::errors::NotifyError;

pub const DEFAULT_SLACK_API_BASE: &str = "https://slack.com/api/";
const SLACK_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Serialize)]
struct PostMessageRequest<'a> {
    channel: &'a str,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    thread_ts: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct PostMessageResponse {
    ok: bool,
    ts: Option<String>,
    error: Option<String>,
}

/// Posts status messages through Slack's `chat.postMessage`.
#[derive(Clone)]
pub struct SlackNotifier {
    http: reqwest::Client,
    endpoint: Url,
    token: String,
}

impl SlackNotifier {
    pub fn new(api_base: &Url, token: impl Into<String>) -> Result<Self, NotifyError> {
        Self::with_timeout(api_base, token, SLACK_REQUEST_TIMEOUT)
    }

    /// Like [`new`](Self::new), with `timeout` bounding each request including connect.
    pub fn with_timeout(
        api_base: &Url,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, NotifyError> {
        let endpoint = api_base
            .join("chat.postMessage")
            .map_err(|e| NotifyError::Unavailable(format!("invalid Slack API URL: {e}")))?;
        let http = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()?;
        Ok(SlackNotifier {
            http,
            endpoint,
            token: token.into(),
        })
    }
}

fn into_message_ref(response: PostMessageResponse) -> Result<MessageRef, NotifyError> {
    if !response.ok {
        return Err(NotifyError::Rejected(
            response.error.unwrap_or_else(|| "unknown_error".to_string()),
        ));
    }
    response
        .ts
        .map(MessageRef)
        .ok_or_else(|| NotifyError::Rejected("response carried no message timestamp".to_string()))
}

#[async_trait]
impl Notifier for SlackNotifier {
    async fn post(
        &self,
        channel: &str,
        thread: Option<&MessageRef>,
        content: &str,
    ) -> Result<MessageRef, NotifyError> {
        let request = PostMessageRequest {
            channel,
            text: content,
            thread_ts: thread.map(|t| t.0.as_str()),
        };
        let response: PostMessageResponse = self
            .http
            .post(self.endpoint.clone())
            .bearer_auth(&self.token)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        into_message_ref(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_joins_api_base() -> anyhow::Result<()> {
        let base = Url::parse(DEFAULT_SLACK_API_BASE)?;
        let notifier = SlackNotifier::new(&base, "xoxb-test")?;
        assert_eq!(notifier.endpoint.as_str(), "https://slack.com/api/chat.postMessage");
        Ok(())
    }

    #[test]
    fn test_request_omits_thread_when_absent() -> anyhow::Result<()> {
        let body = serde_json::to_value(PostMessageRequest {
            channel: "C1",
            text: "hello",
            thread_ts: None,
        })?;
        assert_eq!(body, serde_json::json!({"channel": "C1", "text": "hello"}));
        Ok(())
    }

    #[test]
    fn test_response_mapping() -> anyhow::Result<()> {
        let ok: PostMessageResponse = serde_json::from_str(r#"{"ok":true,"ts":"1700.01"}"#)?;
        assert_eq!(into_message_ref(ok)?, MessageRef("1700.01".to_string()));

        let rejected: PostMessageResponse =
            serde_json::from_str(r#"{"ok":false,"error":"channel_not_found"}"#)?;
        match into_message_ref(rejected) {
            Err(NotifyError::Rejected(reason)) => assert_eq!(reason, "channel_not_found"),
            other => panic!("unexpected result: {other:?}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_silent_endpoint_times_out() -> anyhow::Result<()> {
        // Accepts connections and never writes a response.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let base = Url::parse(&format!("http://{}/api/", listener.local_addr()?))?;
        let server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let notifier = SlackNotifier::with_timeout(&base, "xoxb-test", Duration::from_millis(200))?;
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            notifier.post("C1", None, "hello"),
        )
        .await?;

        match result {
            Err(NotifyError::Reqwest(e)) => assert!(e.is_timeout()),
            other => panic!("unexpected result: {other:?}"),
        }
        server.abort();
        Ok(())
    }
}
