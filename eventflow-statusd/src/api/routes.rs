use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::protocol::{API_PREFIX, PRODUCT_SERVICE};
use shared::types::{HealthState, IngestionMode, ProbeOutcome, ServiceAction, ServiceDescriptor, StatusMap};
use crate::backend::BackendClient;
use crate::consumers::actions::ActionDispatcher;
use crate::consumers::views::{self, ListingGate, Overview};
use crate::error::{ActionError, ClientError};
use crate::ingest::IngestHandle;
use crate::probe;
use crate::session::Session;
use crate::store::StatusReader;

#[derive(Clone)]
pub struct AppState {
    pub status: StatusReader,
    pub ingest: IngestHandle,
    pub actions: ActionDispatcher,
    pub session: Session,
    pub client: BackendClient,
    pub catalog: Arc<Vec<ServiceDescriptor>>,
    pub probe_timeout: Duration,
}

#[derive(Serialize)]
pub struct ServiceStatusResponse {
    pub id: String,
    pub state: HealthState,
    pub observed_at: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
pub struct IndicatorResponse {
    pub healthy: bool,
}

#[derive(Serialize)]
pub struct GateResponse {
    pub id: String,
    pub gate: ListingGate,
}

#[derive(Serialize)]
pub struct ModeResponse {
    pub mode: IngestionMode,
}

#[derive(Serialize)]
pub struct RefreshResponse {
    pub refreshed: bool,
}

#[derive(Serialize)]
pub struct ActionResponse {
    pub accepted: bool,
    pub message: Option<String>,
}

#[derive(Serialize)]
pub struct PendingResponse {
    pub id: String,
    pub action: ServiceAction,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Deserialize)]
pub struct SessionRequest {
    pub token: String,
}

pub fn router(state: AppState) -> Router {
    let v1 = Router::new()
        .route("/status", get(get_status))
        .route("/status/hash", get(get_hash))
        .route("/status/:id", get(get_service_status))
        .route("/indicator", get(get_indicator))
        .route("/overview", get(get_overview))
        .route("/gate", get(get_product_gate))
        .route("/gate/:id", get(get_gate))
        .route("/mode", get(get_mode))
        .route("/refresh", post(post_refresh))
        .route("/actions/pending", get(get_pending))
        .route("/actions/:action/:id", post(post_action))
        .route("/probes", get(get_probes))
        .route("/session", axum::routing::put(put_session).delete(delete_session));

    Router::new().nest(API_PREFIX, v1).with_state(state)
}

fn error_response(status: StatusCode, error: String) -> Response {
    (status, Json(ErrorResponse { error })).into_response()
}

async fn get_status(State(state): State<AppState>) -> Json<StatusMap> {
    Json(state.status.snapshot())
}

async fn get_hash(State(state): State<AppState>) -> String {
    state.status.digest()
}

async fn get_service_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Json<ServiceStatusResponse> {
    let entry = state.status.entry(&id);
    Json(ServiceStatusResponse {
        id,
        state: entry.as_ref().map(|e| e.state).unwrap_or_default(),
        observed_at: entry.map(|e| e.observed_at),
    })
}

async fn get_indicator(State(state): State<AppState>) -> Json<IndicatorResponse> {
    Json(IndicatorResponse {
        healthy: views::system_healthy(&state.status),
    })
}

async fn get_overview(State(state): State<AppState>) -> Json<Overview> {
    Json(views::overview(&state.status, &state.catalog))
}

/// Gate of the product listing page
async fn get_product_gate(State(state): State<AppState>) -> Json<GateResponse> {
    Json(GateResponse {
        id: PRODUCT_SERVICE.to_string(),
        gate: views::listing_gate(&state.status, PRODUCT_SERVICE),
    })
}

async fn get_gate(State(state): State<AppState>, Path(id): Path<String>) -> Json<GateResponse> {
    let gate = views::listing_gate(&state.status, &id);
    Json(GateResponse { id, gate })
}

async fn get_mode(State(state): State<AppState>) -> Json<ModeResponse> {
    Json(ModeResponse {
        mode: state.ingest.mode(),
    })
}

async fn post_refresh(State(state): State<AppState>) -> Result<Json<RefreshResponse>, StatusCode> {
    state
        .ingest
        .refresh()
        .await
        .map(|refreshed| Json(RefreshResponse { refreshed }))
        .map_err(|e| {
            tracing::error!("Failed to request refresh: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })
}

async fn post_action(
    State(state): State<AppState>,
    Path((action, id)): Path<(String, String)>,
) -> Response {
    let action: ServiceAction = match action.parse() {
        Ok(action) => action,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, format!("Error: {}", e)),
    };

    match state.actions.dispatch(&id, action).await {
        Ok(accepted) => (
            StatusCode::ACCEPTED,
            Json(ActionResponse {
                accepted: true,
                message: accepted.message,
            }),
        )
            .into_response(),
        Err(e) => {
            let status = match &e {
                ActionError::UnknownService(_) => StatusCode::NOT_FOUND,
                ActionError::Client(ClientError::MissingCredential) => StatusCode::UNAUTHORIZED,
                ActionError::Client(_) => StatusCode::BAD_GATEWAY,
            };
            error_response(status, e.user_message())
        }
    }
}

async fn get_pending(State(state): State<AppState>) -> Json<Vec<PendingResponse>> {
    let pending = state
        .actions
        .pending()
        .into_iter()
        .map(|(id, action)| PendingResponse { id, action })
        .collect();
    Json(pending)
}

async fn get_probes(State(state): State<AppState>) -> Json<BTreeMap<String, ProbeOutcome>> {
    let token = state.session.token();
    let results = probe::probe_all(
        &state.client,
        token.as_deref(),
        &state.catalog,
        state.probe_timeout,
    )
    .await;
    Json(results)
}

async fn put_session(
    State(state): State<AppState>,
    Json(req): Json<SessionRequest>,
) -> StatusCode {
    if req.token.is_empty() {
        return StatusCode::BAD_REQUEST;
    }
    if state.session.login(req.token) {
        tracing::info!("Credential updated");
    }
    StatusCode::NO_CONTENT
}

async fn delete_session(State(state): State<AppState>) -> StatusCode {
    if state.session.logout() {
        tracing::info!("Credential removed");
    }
    StatusCode::NO_CONTENT
}
