pub mod sse;

use std::collections::HashMap;
use std::pin::Pin;
use std::time::Duration;
use futures::stream::Stream;
use reqwest::{header, Client, Response};
use serde::Deserialize;
use shared::protocol::{COMMAND_PREFIX, EVENTS_PATH, EVENTS_TOKEN_PARAM, SUMMARY_PATH};
use shared::types::{HealthState, ProbeOutcome, ServiceAction};
use crate::error::{ClientError, ClientResult};
use self::sse::SseMessage;

/// Open push channel. Always terminates with an error item.
pub type EventStream = Pin<Box<dyn Stream<Item = ClientResult<SseMessage>> + Send>>;

/// Body the gateway attaches to command responses
#[derive(Debug, Default, Deserialize)]
struct MessageBody {
    #[serde(default)]
    message: Option<String>,
}

/// Outcome of a lifecycle command the gateway accepted.
///
/// Acceptance says nothing about the container's new state: that arrives
/// later as a lifecycle event on the push channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accepted {
    pub message: Option<String>,
}

/// HTTP client for the EventFlow gateway's docker endpoints.
#[derive(Clone, Debug)]
pub struct BackendClient {
    http: Client,
    base_url: String,
}

impl BackendClient {
    pub fn new(base_url: impl Into<String>) -> ClientResult<Self> {
        // no client-wide timeout: the event stream is long-lived
        let http = Client::builder().build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Point-in-time health of every service the gateway knows about.
    /// An unknown state string fails the whole fetch.
    pub async fn fetch_summary(&self, token: &str) -> ClientResult<HashMap<String, HealthState>> {
        let res = self
            .http
            .get(self.url(SUMMARY_PATH))
            .bearer_auth(token)
            .send()
            .await?;
        let res = check_status(res).await?;
        let body = res.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Open the lifecycle event stream. The gateway reads the token from the
    /// query string on this endpoint, not from the Authorization header.
    pub async fn open_events(&self, token: &str) -> ClientResult<EventStream> {
        let res = self
            .http
            .get(self.url(EVENTS_PATH))
            .query(&[(EVENTS_TOKEN_PARAM, token)])
            .header(header::ACCEPT, "text/event-stream")
            .send()
            .await?;
        let res = check_status(res).await?;
        Ok(Box::pin(sse::decode(Box::pin(res.bytes_stream()))))
    }

    /// Ask the gateway to start/stop/restart a service container
    pub async fn dispatch(
        &self,
        token: &str,
        action: ServiceAction,
        service_id: &str,
    ) -> ClientResult<Accepted> {
        let path = format!("{}/{}/{}", COMMAND_PREFIX, action.as_str(), service_id);
        let res = self
            .http
            .post(self.url(&path))
            .bearer_auth(token)
            .send()
            .await?;
        let res = check_status(res).await?;
        let body = res.bytes().await.unwrap_or_default();
        let message = serde_json::from_slice::<MessageBody>(&body)
            .unwrap_or_default()
            .message;
        Ok(Accepted { message })
    }

    /// Direct health probe against a gateway-relative path
    pub async fn probe(&self, token: Option<&str>, path: &str, timeout: Duration) -> ProbeOutcome {
        let mut req = self.http.get(self.url(path)).timeout(timeout);
        if let Some(token) = token {
            req = req.bearer_auth(token);
        }
        match req.send().await {
            Ok(res) if res.status().is_success() => ProbeOutcome::Online,
            Ok(res) => {
                tracing::debug!("Probe {} answered {}", path, res.status());
                ProbeOutcome::Error
            }
            Err(e) => {
                tracing::debug!("Probe {} unreachable: {}", path, e);
                ProbeOutcome::Offline
            }
        }
    }
}

/// Turn a non-2xx response into `ClientError::Status`, keeping the server's
/// `message` field when the body has one.
async fn check_status(res: Response) -> ClientResult<Response> {
    let status = res.status();
    if status.is_success() {
        return Ok(res);
    }
    let body = res.bytes().await.unwrap_or_default();
    let message = serde_json::from_slice::<MessageBody>(&body)
        .ok()
        .and_then(|b| b.message);
    Err(ClientError::Status { status, message })
}
