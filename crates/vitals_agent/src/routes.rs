use std::sync::Arc;

use axum::debug_handler;
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tracing::info;
use vitals_client::session::{Session, StaticIdentityToken};
use vitals_client::sync::{LifecycleEvent, SchedulerState, SyncOutcome};
use vitals_client::token::AuthorizeOptions;
use vitals_client::{
    AggregatedSummary, HealthRating, TimeRange, WearableMetrics, WearableVitals, aggregate, score,
};

use crate::error::{ApiError, ApiResult};
use crate::state::AgentState;

pub fn router(state: Arc<AgentState>, max_body_size: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/lifecycle", get(lifecycle_state))
        .route("/lifecycle/{state}", post(lifecycle_event))
        .route("/session", post(sign_in).delete(sign_out))
        .route("/sync", post(sync_now))
        .route("/summary", get(summary))
        .route("/schema/summary", get(summary_schema))
        .route("/wearable", get(wearable_status).delete(disconnect_wearable))
        .route("/wearable/authorize-url", get(authorize_url))
        .route("/wearable/connect", post(connect_wearable))
        .route("/wearable/vitals", get(wearable_vitals))
        .layer(axum::extract::DefaultBodyLimit::max(max_body_size))
        .with_state(state)
}

#[debug_handler]
async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

#[debug_handler]
async fn metrics_endpoint(State(state): State<Arc<AgentState>>) -> impl IntoResponse {
    let body = state
        .metrics
        .as_ref()
        .map(|handle| handle.render())
        .unwrap_or_default();
    ([("content-type", "text/plain; version=0.0.4")], body)
}

#[derive(Serialize)]
struct LifecycleDto {
    state: SchedulerState,
}

#[debug_handler]
async fn lifecycle_state(State(state): State<Arc<AgentState>>) -> Json<LifecycleDto> {
    Json(LifecycleDto {
        state: state.scheduler.state(),
    })
}

#[debug_handler]
async fn lifecycle_event(
    State(state): State<Arc<AgentState>>,
    Path(requested): Path<String>,
) -> ApiResult<StatusCode> {
    let event = match requested.as_str() {
        "active" => LifecycleEvent::Foreground,
        "background" => LifecycleEvent::Background,
        other => {
            return Err(ApiError::Validation(format!(
                "unknown lifecycle state {other:?} (expected active or background)"
            )));
        }
    };
    state
        .lifecycle
        .send(event)
        .await
        .map_err(|_| ApiError::Unavailable("sync scheduler is not running".into()))?;
    Ok(StatusCode::ACCEPTED)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignInRequest {
    user_id: String,
    email: String,
    id_token: String,
}

#[debug_handler]
async fn sign_in(
    State(state): State<Arc<AgentState>>,
    Json(req): Json<SignInRequest>,
) -> ApiResult<StatusCode> {
    if req.id_token.trim().is_empty() {
        return Err(ApiError::Validation("idToken must not be empty".into()));
    }
    let session = Session::new(
        req.user_id,
        req.email,
        Arc::new(StaticIdentityToken::new(req.id_token)),
    )?;
    state.session.sign_in(session).await;
    Ok(StatusCode::NO_CONTENT)
}

#[debug_handler]
async fn sign_out(State(state): State<Arc<AgentState>>) -> StatusCode {
    state.session.sign_out().await;
    StatusCode::NO_CONTENT
}

#[derive(Serialize)]
struct SyncDto {
    outcome: &'static str,
}

#[debug_handler]
async fn sync_now(State(state): State<Arc<AgentState>>) -> ApiResult<Json<SyncDto>> {
    match state.scheduler.sync_now().await {
        SyncOutcome::Failed(e) => Err(e.into()),
        outcome => Ok(Json(SyncDto {
            outcome: outcome.as_str(),
        })),
    }
}

#[derive(Deserialize)]
struct SummaryQuery {
    range: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SummaryDto {
    range: TimeRange,
    summary: AggregatedSummary,
    score: u8,
    rating: &'static str,
}

#[debug_handler]
async fn summary(
    State(state): State<Arc<AgentState>>,
    Query(q): Query<SummaryQuery>,
) -> ApiResult<Json<SummaryDto>> {
    let range = match q.range.as_deref() {
        Some(raw) => raw.parse::<TimeRange>()?,
        None => TimeRange::default(),
    };
    let data = state.device.fetch(range).await?;
    let summary = aggregate(&data);
    let score = score(&summary);
    Ok(Json(SummaryDto {
        range,
        summary,
        score,
        rating: HealthRating::from_score(score).label(),
    }))
}

#[debug_handler]
async fn summary_schema() -> Json<serde_json::Value> {
    let schema = schemars::schema_for!(AggregatedSummary);
    Json(schema.to_value())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WearableStatusDto {
    connected: bool,
    scope: Option<String>,
    expires_at: Option<String>,
}

#[debug_handler]
async fn wearable_status(State(state): State<Arc<AgentState>>) -> ApiResult<Json<WearableStatusDto>> {
    let record = state.tokens.tokens().await?;
    Ok(Json(WearableStatusDto {
        connected: record.is_some(),
        scope: record.as_ref().and_then(|r| r.scope.clone()),
        expires_at: record
            .and_then(|r| r.access_token_expiration_date)
            .map(|ts| ts.to_rfc3339()),
    }))
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct AuthorizeQuery {
    #[serde(default)]
    force_login: bool,
}

#[derive(Serialize)]
struct AuthorizeUrlDto {
    url: String,
    state: String,
}

#[debug_handler]
async fn authorize_url(
    State(state): State<Arc<AgentState>>,
    Query(q): Query<AuthorizeQuery>,
) -> ApiResult<Json<AuthorizeUrlDto>> {
    let oauth = state.tokens.oauth();
    if oauth.client_id.is_empty() {
        return Err(ApiError::Validation("wearable client id is not configured".into()));
    }
    let nonce = state.grants.issue_state().await;
    let url = oauth
        .authorization_request(AuthorizeOptions {
            force_login: q.force_login,
        })
        .url(&nonce)?;
    Ok(Json(AuthorizeUrlDto {
        url: url.to_string(),
        state: nonce,
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectRequest {
    grant: String,
    /// Echo of the `state` returned by `/wearable/authorize-url`.
    state: String,
    #[serde(default)]
    force_login: bool,
}

#[debug_handler]
async fn connect_wearable(
    State(state): State<Arc<AgentState>>,
    Json(req): Json<ConnectRequest>,
) -> ApiResult<Json<WearableStatusDto>> {
    if req.grant.trim().is_empty() {
        return Err(ApiError::Validation("grant must not be empty".into()));
    }
    // the pending-grant slot is shared, so connects are serialized
    let _guard = state.connect_lock.lock().await;
    state.grants.verify_state(&req.state).await?;
    state.grants.offer(req.grant).await;
    let record = state
        .tokens
        .authorize(AuthorizeOptions {
            force_login: req.force_login,
        })
        .await?;
    info!("wearable connected via agent");
    Ok(Json(WearableStatusDto {
        connected: true,
        scope: record.scope,
        expires_at: record.access_token_expiration_date.map(|ts| ts.to_rfc3339()),
    }))
}

#[debug_handler]
async fn disconnect_wearable(State(state): State<Arc<AgentState>>) -> ApiResult<StatusCode> {
    state.tokens.disconnect().await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
struct VitalsDto {
    vitals: WearableVitals,
    metrics: WearableMetrics,
}

#[debug_handler]
async fn wearable_vitals(State(state): State<Arc<AgentState>>) -> ApiResult<Json<VitalsDto>> {
    let metrics = state.wearable.fetch_bundle().await?;
    Ok(Json(VitalsDto {
        vitals: WearableVitals::from_metrics(&metrics),
        metrics,
    }))
}
