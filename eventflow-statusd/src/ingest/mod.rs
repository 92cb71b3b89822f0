pub mod fallback;
pub mod reconcile;

use std::collections::HashMap;
use std::future;
use std::time::Duration;
use anyhow::Result;
use futures::future::BoxFuture;
use futures::StreamExt;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use shared::protocol::LIFECYCLE_EVENT_NAME;
use shared::types::{HealthState, IngestionMode, LifecycleEvent};
use crate::backend::sse::SseMessage;
use crate::backend::{BackendClient, EventStream};
use crate::config::IngestionConfig;
use crate::error::{ClientError, ClientResult};
use crate::store::StatusWriter;
use self::fallback::{PollFallback, ReconnectTimer};
use self::reconcile::Reconciler;

/// Commands sent to the ingestion supervisor
pub enum IngestCommand {
    /// Fetch a snapshot now; replies whether it was applied
    Refresh(oneshot::Sender<bool>),
}

/// Handle to interact with the ingestion supervisor
#[derive(Clone)]
pub struct IngestHandle {
    tx: mpsc::Sender<IngestCommand>,
    mode_rx: watch::Receiver<IngestionMode>,
}

impl IngestHandle {
    /// Manual refresh. Resolves once the snapshot was merged (true) or
    /// abandoned (false).
    pub async fn refresh(&self) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(IngestCommand::Refresh(reply)).await?;
        Ok(rx.await?)
    }

    pub fn mode(&self) -> IngestionMode {
        *self.mode_rx.borrow()
    }
}

/// Why a snapshot fetch was started. Poll-originated fetches are abandoned
/// as soon as the push channel delivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchOrigin {
    Session,
    Manual,
    Poll,
}

type SummaryFuture = BoxFuture<'static, ClientResult<HashMap<String, HealthState>>>;
type ConnectFuture = BoxFuture<'static, ClientResult<EventStream>>;

struct InFlightFetch {
    origin: FetchOrigin,
    replies: Vec<oneshot::Sender<bool>>,
}

/// Owns the store writer and every ingestion resource: the push stream, a
/// pending connect attempt, the poll timer, the reconnect timer and the
/// in-flight snapshot fetch. All of them are driven from one task, so the
/// store needs no lock and teardown is a matter of dropping fields.
pub struct Supervisor {
    client: BackendClient,
    reconciler: Reconciler,
    writer: StatusWriter,
    mode_tx: watch::Sender<IngestionMode>,
    token: Option<String>,
    stream: Option<EventStream>,
    connecting: Option<ConnectFuture>,
    fetch: Option<SummaryFuture>,
    fetch_state: Option<InFlightFetch>,
    poll: PollFallback,
    reconnect: ReconnectTimer,
}

/// Poll cadence and reconnect backoff
#[derive(Debug, Clone, Copy)]
pub struct Timing {
    pub poll_interval: Duration,
    pub reconnect_delay: Duration,
}

impl From<&IngestionConfig> for Timing {
    fn from(config: &IngestionConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            reconnect_delay: config.reconnect_delay(),
        }
    }
}

/// Spawn the supervisor task
pub fn spawn(
    client: BackendClient,
    catalog: Vec<String>,
    writer: StatusWriter,
    credential: watch::Receiver<Option<String>>,
    timing: Timing,
    cancel: CancellationToken,
) -> (IngestHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(32);
    let (mode_tx, mode_rx) = watch::channel(IngestionMode::Idle);

    let supervisor = Supervisor {
        client,
        reconciler: Reconciler::new(catalog),
        writer,
        mode_tx,
        token: None,
        stream: None,
        connecting: None,
        fetch: None,
        fetch_state: None,
        poll: PollFallback::new(timing.poll_interval),
        reconnect: ReconnectTimer::new(timing.reconnect_delay),
    };

    let handle = tokio::spawn(async move {
        if let Err(e) = supervisor.run(rx, credential, cancel).await {
            tracing::error!("Ingestion supervisor error: {}", e);
        }
    });

    (IngestHandle { tx, mode_rx }, handle)
}

async fn next_message(stream: &mut Option<EventStream>) -> Option<ClientResult<SseMessage>> {
    match stream.as_mut() {
        Some(stream) => stream.next().await,
        None => future::pending().await,
    }
}

async fn resolve<T>(fut: &mut Option<BoxFuture<'static, T>>) -> T {
    match fut.as_mut() {
        Some(fut) => fut.await,
        None => future::pending().await,
    }
}

impl Supervisor {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<IngestCommand>,
        mut credential: watch::Receiver<Option<String>>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let initial = credential.borrow_and_update().clone();
        self.begin_session(initial);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Ingestion supervisor shutting down");
                    break;
                }
                changed = credential.changed() => {
                    if changed.is_err() {
                        tracing::info!("Credential source closed");
                        break;
                    }
                    let token = credential.borrow_and_update().clone();
                    self.begin_session(token);
                }
                Some(cmd) = commands.recv() => {
                    match cmd {
                        IngestCommand::Refresh(reply) => {
                            self.start_fetch(FetchOrigin::Manual, Some(reply));
                        }
                    }
                }
                item = next_message(&mut self.stream) => {
                    self.on_stream_item(item);
                }
                result = resolve(&mut self.connecting) => {
                    self.connecting = None;
                    self.on_connect_result(result);
                }
                result = resolve(&mut self.fetch) => {
                    self.fetch = None;
                    self.on_fetch_result(result);
                }
                _ = self.poll.tick() => {
                    self.start_fetch(FetchOrigin::Poll, None);
                }
                _ = self.reconnect.fired() => {
                    self.on_reconnect_due();
                }
            }
        }

        self.end_session();
        Ok(())
    }

    fn set_mode(&self, mode: IngestionMode) {
        self.mode_tx.send_if_modified(|current| {
            if *current == mode {
                return false;
            }
            tracing::debug!("Ingestion mode {:?} -> {:?}", current, mode);
            *current = mode;
            true
        });
    }

    /// Drop the stream, timers and in-flight work, and empty the store
    fn end_session(&mut self) {
        self.stream = None;
        self.connecting = None;
        self.abandon_fetch();
        self.poll.stop();
        self.reconnect.cancel();
        self.writer.clear();
        self.token = None;
        self.set_mode(IngestionMode::Idle);
    }

    fn begin_session(&mut self, token: Option<String>) {
        self.end_session();
        match token {
            Some(token) => {
                tracing::info!("Credential available, starting status session");
                self.token = Some(token);
                self.start_fetch(FetchOrigin::Session, None);
                self.start_connect();
            }
            None => tracing::info!("No credential, status session idle"),
        }
    }

    fn start_connect(&mut self) {
        let Some(token) = self.token.clone() else {
            return;
        };
        let client = self.client.clone();
        self.connecting = Some(Box::pin(async move { client.open_events(&token).await }));
        if !self.poll.is_active() {
            self.set_mode(IngestionMode::Reconnecting);
        }
    }

    fn on_connect_result(&mut self, result: ClientResult<EventStream>) {
        match result {
            Ok(stream) => {
                tracing::info!("Event stream connected");
                self.stream = Some(stream);
                self.stop_polling();
                self.set_mode(IngestionMode::Connected);
            }
            Err(e) => self.on_channel_error(e),
        }
    }

    fn on_channel_error(&mut self, error: ClientError) {
        tracing::warn!("Event stream lost ({}), switching to polling", error);
        self.stream = None;
        if self.poll.start() {
            tracing::info!("Starting fallback polling");
        }
        self.reconnect.schedule();
        self.set_mode(IngestionMode::Polling);
    }

    fn on_reconnect_due(&mut self) {
        if self.token.is_none() || self.stream.is_some() || self.connecting.is_some() {
            return;
        }
        tracing::info!("Attempting event stream reconnect");
        self.start_connect();
    }

    /// Push mode wins: stop the timer and forget any poll fetch in flight
    fn stop_polling(&mut self) {
        if self.poll.stop() {
            tracing::info!("Push channel active, fallback polling stopped");
        }
        let poll_in_flight = self
            .fetch_state
            .as_ref()
            .map_or(false, |f| f.origin == FetchOrigin::Poll);
        if poll_in_flight {
            self.abandon_fetch();
        }
    }

    fn on_stream_item(&mut self, item: Option<ClientResult<SseMessage>>) {
        let message = match item {
            Some(Ok(message)) => message,
            Some(Err(e)) => return self.on_channel_error(e),
            None => return self.on_channel_error(ClientError::StreamClosed),
        };

        if message.event != LIFECYCLE_EVENT_NAME {
            tracing::debug!("Ignoring SSE event {}", message.event);
            return;
        }
        self.stop_polling();

        let event: LifecycleEvent = match serde_json::from_str(&message.data) {
            Ok(event) => event,
            Err(e) => {
                tracing::error!("Failed to parse lifecycle event {:?}: {}", message.data, e);
                return;
            }
        };
        tracing::debug!("Lifecycle event: {} {}", event.name, event.status);

        if let Some((service, state)) = self.reconciler.reconcile(&event) {
            tracing::info!("{} -> {}", service, state);
            self.writer.set(service, state);
        }
    }

    fn start_fetch(&mut self, origin: FetchOrigin, reply: Option<oneshot::Sender<bool>>) {
        let Some(token) = self.token.clone() else {
            if let Some(reply) = reply {
                let _ = reply.send(false);
            }
            return;
        };

        if let Some(state) = self.fetch_state.as_mut() {
            // one fetch at a time; a stronger origin keeps it alive past push events
            if origin != FetchOrigin::Poll {
                state.origin = origin;
            }
            state.replies.extend(reply);
            return;
        }

        let client = self.client.clone();
        self.fetch = Some(Box::pin(async move { client.fetch_summary(&token).await }));
        self.fetch_state = Some(InFlightFetch {
            origin,
            replies: reply.into_iter().collect(),
        });
    }

    fn abandon_fetch(&mut self) {
        self.fetch = None;
        if let Some(state) = self.fetch_state.take() {
            for reply in state.replies {
                let _ = reply.send(false);
            }
        }
    }

    fn on_fetch_result(&mut self, result: ClientResult<HashMap<String, HealthState>>) {
        let Some(state) = self.fetch_state.take() else {
            return;
        };

        let applied = match result {
            Ok(summary) => {
                let written = self.writer.set_many(summary);
                tracing::debug!("Snapshot ({:?}) merged {} services", state.origin, written);
                true
            }
            Err(e) => {
                tracing::warn!("Snapshot fetch ({:?}) failed: {}", state.origin, e);
                false
            }
        };

        for reply in state.replies {
            let _ = reply.send(applied);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use crate::session::Session;
    use crate::store::{status_store, StatusReader};
    use crate::config::Config;
    use crate::testing::{wait_until, within, MockBackend};

    struct Harness {
        backend: MockBackend,
        reader: StatusReader,
        session: Session,
        handle: IngestHandle,
        cancel: CancellationToken,
        task: JoinHandle<()>,
    }

    async fn harness(poll_ms: u64, reconnect_ms: u64) -> Harness {
        let backend = MockBackend::start().await;
        let client = BackendClient::new(backend.base_url()).unwrap();
        let (writer, reader) = status_store();
        let session = Session::new(None);
        let cancel = CancellationToken::new();
        let timing = Timing {
            poll_interval: Duration::from_millis(poll_ms),
            reconnect_delay: Duration::from_millis(reconnect_ms),
        };

        let (handle, task) = spawn(
            client,
            Config::default().service_ids(),
            writer,
            session.subscribe(),
            timing,
            cancel.clone(),
        );

        Harness { backend, reader, session, handle, cancel, task }
    }

    async fn wait_mode(handle: &IngestHandle, mode: IngestionMode) {
        let handle = handle.clone();
        wait_until(move || handle.mode() == mode).await;
    }

    async fn wait_state(reader: &StatusReader, id: &str, state: HealthState) {
        let reader = reader.clone();
        let id = id.to_string();
        wait_until(move || reader.get(&id) == state).await;
    }

    #[tokio::test]
    async fn test_snapshot_then_events() {
        let h = harness(10_000, 10_000).await;
        h.backend.set_summary(json!({
            "order-service": "ONLINE",
            "payment-service": "OFFLINE",
        }));

        h.session.login("secret");
        wait_state(&h.reader, "order-service", HealthState::Online).await;
        assert_eq!(h.reader.get("payment-service"), HealthState::Offline);
        assert_eq!(h.reader.get("auth-service"), HealthState::Degraded);

        wait_mode(&h.handle, IngestionMode::Connected).await;
        assert_eq!(h.backend.last_query_token().as_deref(), Some("secret"));

        h.backend.push_event("eventflow-order-service-1", "die");
        wait_state(&h.reader, "order-service", HealthState::Offline).await;

        h.backend.push_event("eventflow-order-service-1", "start");
        wait_state(&h.reader, "order-service", HealthState::Online).await;
    }

    #[tokio::test]
    async fn test_ignored_events_leave_store_untouched() {
        let h = harness(10_000, 10_000).await;
        h.backend.set_summary(json!({ "payment-service": "OFFLINE" }));

        h.session.login("secret");
        wait_mode(&h.handle, IngestionMode::Connected).await;
        wait_state(&h.reader, "payment-service", HealthState::Offline).await;
        let before = h.reader.snapshot();

        h.backend.push_event("eventflow-payment-service-1", "pause");
        h.backend.push_event("eventflow-redis-1", "die");
        h.backend.push_raw("docker-event", "not json");
        h.backend.push_raw("heartbeat", "{}");
        // events are handled in order, so once the sentinel lands the
        // earlier ones have been processed
        h.backend.push_event("eventflow-api-gateway-1", "start");
        wait_state(&h.reader, "api-gateway", HealthState::Online).await;

        let after = h.reader.snapshot();
        assert_eq!(after.get("payment-service"), before.get("payment-service"));
        assert_eq!(after.len(), before.len() + 1);
        assert_eq!(h.handle.mode(), IngestionMode::Connected);
        assert_eq!(h.backend.event_connections(), 1, "malformed payload must not drop the channel");
    }

    #[tokio::test]
    async fn test_channel_error_polls_until_reconnected() {
        let h = harness(50, 400).await;
        h.backend.set_summary(json!({ "order-service": "ONLINE" }));

        h.session.login("secret");
        wait_mode(&h.handle, IngestionMode::Connected).await;
        wait_state(&h.reader, "order-service", HealthState::Online).await;
        let hits_connected = h.backend.summary_hits();

        h.backend.drop_streams();
        wait_mode(&h.handle, IngestionMode::Polling).await;

        // polling repopulates the store from the snapshot
        h.backend.set_summary(json!({ "order-service": "OFFLINE" }));
        wait_state(&h.reader, "order-service", HealthState::Offline).await;
        assert!(h.backend.summary_hits() > hits_connected);

        // the single scheduled reconnect restores push-only mode
        let backend = &h.backend;
        wait_until(|| backend.event_connections() == 2).await;
        wait_mode(&h.handle, IngestionMode::Connected).await;

        tokio::time::sleep(Duration::from_millis(100)).await;
        let hits_after_reconnect = h.backend.summary_hits();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(h.backend.summary_hits(), hits_after_reconnect, "no polls while connected");

        h.backend.push_event("eventflow-order-service-1", "restart");
        wait_state(&h.reader, "order-service", HealthState::Online).await;
    }

    #[tokio::test]
    async fn test_failed_reconnect_keeps_polling() {
        let h = harness(50, 100).await;
        h.backend.reject_events(true);
        h.backend.set_summary(json!({ "auth-service": "ONLINE" }));

        h.session.login("secret");
        wait_mode(&h.handle, IngestionMode::Polling).await;

        let backend = &h.backend;
        wait_until(|| backend.summary_hits() >= 4).await;
        assert_eq!(h.backend.event_connections(), 0);
        assert_ne!(h.handle.mode(), IngestionMode::Connected);

        h.backend.reject_events(false);
        wait_mode(&h.handle, IngestionMode::Connected).await;
        assert_eq!(h.backend.event_connections(), 1);
    }

    #[tokio::test]
    async fn test_late_poll_response_discarded_after_reconnect() {
        let h = harness(50, 300).await;
        h.backend.set_summary(json!({ "order-service": "ONLINE" }));

        h.session.login("secret");
        wait_mode(&h.handle, IngestionMode::Connected).await;
        wait_state(&h.reader, "order-service", HealthState::Online).await;
        let hits_connected = h.backend.summary_hits();

        // the poll answer says OFFLINE but only lands well after the reconnect
        h.backend.set_summary(json!({ "order-service": "OFFLINE" }));
        h.backend.delay_summary(Some(Duration::from_millis(800)));
        h.backend.drop_streams();
        wait_mode(&h.handle, IngestionMode::Polling).await;

        let backend = &h.backend;
        wait_until(|| backend.summary_hits() > hits_connected).await;
        wait_until(|| backend.event_connections() == 2).await;
        wait_mode(&h.handle, IngestionMode::Connected).await;

        tokio::time::sleep(Duration::from_millis(1_000)).await;
        assert_eq!(h.reader.get("order-service"), HealthState::Online);
        assert_eq!(h.handle.mode(), IngestionMode::Connected);
    }

    #[tokio::test]
    async fn test_mode_while_connect_in_flight() {
        let h = harness(50, 100).await;
        h.backend.set_summary(json!({ "order-service": "ONLINE" }));

        // first connect of a session: nothing polls yet
        h.backend.delay_events(Some(Duration::from_millis(300)));
        h.session.login("secret");
        let backend = &h.backend;
        wait_until(|| backend.event_attempts() == 1).await;
        assert_eq!(h.handle.mode(), IngestionMode::Reconnecting);
        wait_mode(&h.handle, IngestionMode::Connected).await;

        // reconnect after a drop: polling keeps running and is reported
        h.backend.delay_events(Some(Duration::from_millis(500)));
        h.backend.drop_streams();
        wait_mode(&h.handle, IngestionMode::Polling).await;
        wait_until(|| backend.event_attempts() == 2).await;
        assert_eq!(h.handle.mode(), IngestionMode::Polling);

        let hits = h.backend.summary_hits();
        wait_until(|| backend.summary_hits() > hits).await;
        assert_eq!(h.handle.mode(), IngestionMode::Polling);

        wait_mode(&h.handle, IngestionMode::Connected).await;
    }

    #[tokio::test]
    async fn test_snapshot_failure_changes_nothing() {
        let h = harness(50, 10_000).await;
        h.backend.reject_events(true);
        h.backend.set_summary(json!({ "order-service": "ONLINE" }));

        h.session.login("secret");
        wait_state(&h.reader, "order-service", HealthState::Online).await;

        h.backend.fail_summary(true);
        let hits = h.backend.summary_hits();
        let backend = &h.backend;
        wait_until(|| backend.summary_hits() >= hits + 3).await;

        assert_eq!(h.reader.get("order-service"), HealthState::Online);
        assert_eq!(h.reader.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn test_logout_clears_and_idles() {
        let h = harness(10_000, 10_000).await;
        h.backend.set_summary(json!({
            "api-gateway": "ONLINE",
            "auth-service": "ONLINE",
        }));

        h.session.login("secret");
        wait_mode(&h.handle, IngestionMode::Connected).await;
        wait_state(&h.reader, "auth-service", HealthState::Online).await;

        h.session.logout();
        let reader = h.reader.clone();
        wait_until(move || reader.is_empty()).await;
        wait_mode(&h.handle, IngestionMode::Idle).await;

        // the old stream is gone: late events are not applied
        h.backend.push_event("eventflow-order-service-1", "start");
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(h.reader.is_empty());
        assert!(!within(h.handle.refresh()).await.unwrap());
    }

    #[tokio::test]
    async fn test_new_credential_rebuilds_from_scratch() {
        let h = harness(10_000, 10_000).await;
        h.backend.set_summary(json!({ "order-service": "ONLINE" }));

        h.session.login("first");
        wait_state(&h.reader, "order-service", HealthState::Online).await;

        h.backend.set_summary(json!({ "inventory-service": "OFFLINE" }));
        h.session.login("second");
        wait_state(&h.reader, "inventory-service", HealthState::Offline).await;

        assert_eq!(h.reader.get("order-service"), HealthState::Degraded);
        assert_eq!(h.backend.last_bearer().as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn test_manual_refresh() {
        let h = harness(10_000, 10_000).await;
        assert!(!within(h.handle.refresh()).await.unwrap(), "no credential, no fetch");

        h.backend.set_summary(json!({ "order-service": "ONLINE" }));
        h.session.login("secret");
        wait_mode(&h.handle, IngestionMode::Connected).await;
        // session snapshot applied, so the next fetch is the manual one
        wait_state(&h.reader, "order-service", HealthState::Online).await;

        h.backend.set_summary(json!({ "analytics-service": "OFFLINE" }));
        assert!(within(h.handle.refresh()).await.unwrap());
        assert_eq!(h.reader.get("analytics-service"), HealthState::Offline);

        h.backend.fail_summary(true);
        assert!(!within(h.handle.refresh()).await.unwrap());
        assert_eq!(h.reader.get("analytics-service"), HealthState::Offline);
    }

    #[tokio::test]
    async fn test_cancel_tears_down() {
        let h = harness(50, 100).await;
        h.backend.set_summary(json!({ "order-service": "ONLINE" }));
        h.session.login("secret");
        wait_state(&h.reader, "order-service", HealthState::Online).await;

        h.cancel.cancel();
        within(h.task).await.unwrap();
        assert!(h.reader.is_empty());
        assert_eq!(h.handle.mode(), IngestionMode::Idle);
    }
}
