//! In-process stand-in for the EventFlow gateway, used by the unit tests.

use std::collections::HashMap;
use std::convert::Infallible;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::sse::{Event, Sse},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc;

#[derive(Default)]
struct MockState {
    summary: Mutex<Value>,
    summary_fails: Mutex<bool>,
    summary_hits: AtomicUsize,
    summary_delay: Mutex<Option<Duration>>,
    events_rejected: Mutex<bool>,
    events_delay: Mutex<Option<Duration>>,
    event_attempts: AtomicUsize,
    event_connections: AtomicUsize,
    streams: Mutex<Vec<mpsc::UnboundedSender<Event>>>,
    command_failure: Mutex<Option<(u16, String)>>,
    commands: Mutex<Vec<(String, String)>>,
    last_bearer: Mutex<Option<String>>,
    last_query_token: Mutex<Option<String>>,
}

pub struct MockBackend {
    addr: std::net::SocketAddr,
    state: Arc<MockState>,
    server: tokio::task::JoinHandle<()>,
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.server.abort();
    }
}

impl MockBackend {
    pub async fn start() -> Self {
        let state = Arc::new(MockState {
            summary: Mutex::new(json!({})),
            ..MockState::default()
        });

        let app = Router::new()
            .route("/auth/docker/summary", get(summary))
            .route("/auth/docker/events", get(events))
            .route("/auth/docker/:action/:service", post(command))
            .route("/actuator/health", get(health_ok))
            .route("/health/:service", get(health))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self { addr, state, server }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn set_summary(&self, summary: Value) {
        *self.state.summary.lock() = summary;
    }

    pub fn fail_summary(&self, fail: bool) {
        *self.state.summary_fails.lock() = fail;
    }

    pub fn summary_hits(&self) -> usize {
        self.state.summary_hits.load(Ordering::SeqCst)
    }

    /// Hold every summary response for `delay` before answering
    pub fn delay_summary(&self, delay: Option<Duration>) {
        *self.state.summary_delay.lock() = delay;
    }

    /// Hold every event-stream request for `delay` before answering
    pub fn delay_events(&self, delay: Option<Duration>) {
        *self.state.events_delay.lock() = delay;
    }

    /// Requests that reached the event endpoint, answered or not
    pub fn event_attempts(&self) -> usize {
        self.state.event_attempts.load(Ordering::SeqCst)
    }

    /// Answer the event endpoint with 503 instead of a stream
    pub fn reject_events(&self, reject: bool) {
        *self.state.events_rejected.lock() = reject;
    }

    /// Stream connections accepted so far
    pub fn event_connections(&self) -> usize {
        self.state.event_connections.load(Ordering::SeqCst)
    }

    pub async fn wait_for_subscribers(&self, count: usize) {
        let state = self.state.clone();
        wait_until(move || state.event_connections.load(Ordering::SeqCst) >= count).await;
    }

    pub fn push_event(&self, name: &str, status: &str) {
        let data = json!({ "name": name, "status": status }).to_string();
        self.push_raw("docker-event", &data);
    }

    pub fn push_raw(&self, event: &str, data: &str) {
        let mut streams = self.state.streams.lock();
        streams.retain(|tx| tx.send(Event::default().event(event).data(data)).is_ok());
    }

    /// End every open stream, as a gateway restart would
    pub fn drop_streams(&self) {
        self.state.streams.lock().clear();
    }

    pub fn fail_commands_with(&self, status: u16, message: &str) {
        *self.state.command_failure.lock() = Some((status, message.to_string()));
    }

    pub fn commands(&self) -> Vec<(String, String)> {
        self.state.commands.lock().clone()
    }

    pub fn last_bearer(&self) -> Option<String> {
        self.state.last_bearer.lock().clone()
    }

    pub fn last_query_token(&self) -> Option<String> {
        self.state.last_query_token.lock().clone()
    }
}

/// Poll `cond` every 10ms, panicking after 5s
pub async fn wait_until<F>(mut cond: F)
where
    F: FnMut() -> bool,
{
    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "condition not reached within 5s");
}

/// Run `fut` with a 5s deadline
pub async fn within<F: Future>(fut: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(5), fut)
        .await
        .expect("future did not complete within 5s")
}

fn record_bearer(state: &MockState, headers: &HeaderMap) {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string);
    *state.last_bearer.lock() = bearer;
}

async fn summary(State(state): State<Arc<MockState>>, headers: HeaderMap) -> Response {
    state.summary_hits.fetch_add(1, Ordering::SeqCst);
    record_bearer(&state, &headers);
    let delay = *state.summary_delay.lock();
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
    if *state.summary_fails.lock() {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    let body = state.summary.lock().clone();
    Json(body).into_response()
}

async fn events(
    State(state): State<Arc<MockState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    *state.last_query_token.lock() = params.get("token").cloned();
    state.event_attempts.fetch_add(1, Ordering::SeqCst);
    let delay = *state.events_delay.lock();
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
    if *state.events_rejected.lock() {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    let (tx, rx) = mpsc::unbounded_channel();
    state.streams.lock().push(tx);
    state.event_connections.fetch_add(1, Ordering::SeqCst);

    let stream = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|event| (Ok::<_, Infallible>(event), rx))
    });
    Sse::new(stream).into_response()
}

async fn command(
    State(state): State<Arc<MockState>>,
    Path((action, service)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    record_bearer(&state, &headers);
    state.commands.lock().push((action.clone(), service.clone()));

    let failure = state.command_failure.lock().clone();
    match failure {
        Some((status, message)) => {
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (status, Json(json!({ "message": message }))).into_response()
        }
        None => Json(json!({ "message": format!("{} {} accepted", action, service) })).into_response(),
    }
}

async fn health_ok() -> StatusCode {
    StatusCode::OK
}

async fn health(Path(service): Path<String>) -> StatusCode {
    match service.as_str() {
        "broken" => StatusCode::SERVICE_UNAVAILABLE,
        "slow" => {
            tokio::time::sleep(Duration::from_secs(3)).await;
            StatusCode::OK
        }
        _ => StatusCode::OK,
    }
}
