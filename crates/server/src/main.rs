use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, put},
    Json, Router,
};
use server_api::{
    assignments_for_judge, criteria_for_event, event_progress, resolve_judge, scores_for_judge,
    teams_for_event, upsert_score, ApiContext,
};
use shared::{
    domain::{Criterion, EventId, Judge, JudgeId, Round, ScoreRecord, Team},
    error::{ApiError, ErrorCode},
    protocol::{
        AssignmentsResponse, EventProgress, ProgressQuery, ResolveJudgeQuery, UpsertScoreResponse,
    },
};
use storage::Storage;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{error, info};

mod app_state;
mod config;

use app_state::AppState;
use config::{load_settings, prepare_database_url};

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ApiError>)>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = load_settings();
    tracing_subscriber::fmt()
        .with_env_filter(settings.log_filter.as_str())
        .init();

    let database_url = prepare_database_url(&settings.database_url)?;
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        error
    })?;
    let state = AppState {
        api: ApiContext { storage },
    };
    let app = build_router(Arc::new(state), settings.max_body_bytes);

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, "scoring server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/judges/resolve", get(http_resolve_judge))
        .route("/judges/:judge_id/assignments", get(http_assignments))
        .route("/judges/:judge_id/scores", get(http_scores))
        .route("/events/:event_id/teams", get(http_teams))
        .route("/events/:event_id/criteria", get(http_criteria))
        .route("/events/:event_id/progress", get(http_progress))
        .route("/scores", put(http_upsert_score))
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .with_state(state)
}

fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::Forbidden => StatusCode::FORBIDDEN,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn reject(err: ApiError) -> (StatusCode, Json<ApiError>) {
    if matches!(err.code, ErrorCode::Internal) {
        error!(message = %err.message, "request failed");
    }
    (status_for(err.code), Json(err))
}

async fn healthz(State(state): State<Arc<AppState>>) -> Result<&'static str, StatusCode> {
    state.api.storage.health_check().await.map_err(|error| {
        error!(%error, "storage health check failed");
        StatusCode::SERVICE_UNAVAILABLE
    })?;
    Ok("ok")
}

async fn http_resolve_judge(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ResolveJudgeQuery>,
) -> ApiResult<Judge> {
    resolve_judge(&state.api, &query.token)
        .await
        .map(Json)
        .map_err(reject)
}

async fn http_assignments(
    State(state): State<Arc<AppState>>,
    Path(judge_id): Path<String>,
) -> ApiResult<AssignmentsResponse> {
    assignments_for_judge(&state.api, &JudgeId(judge_id))
        .await
        .map(Json)
        .map_err(reject)
}

async fn http_scores(
    State(state): State<Arc<AppState>>,
    Path(judge_id): Path<String>,
) -> ApiResult<Vec<ScoreRecord>> {
    scores_for_judge(&state.api, &JudgeId(judge_id))
        .await
        .map(Json)
        .map_err(reject)
}

async fn http_teams(
    State(state): State<Arc<AppState>>,
    Path(event_id): Path<String>,
) -> ApiResult<Vec<Team>> {
    teams_for_event(&state.api, &EventId(event_id))
        .await
        .map(Json)
        .map_err(reject)
}

async fn http_criteria(
    State(state): State<Arc<AppState>>,
    Path(event_id): Path<String>,
) -> ApiResult<Vec<Criterion>> {
    criteria_for_event(&state.api, &EventId(event_id))
        .await
        .map(Json)
        .map_err(reject)
}

async fn http_progress(
    State(state): State<Arc<AppState>>,
    Path(event_id): Path<String>,
    Query(query): Query<ProgressQuery>,
) -> ApiResult<EventProgress> {
    let round = query.round.map(Round).unwrap_or_default();
    event_progress(&state.api, &EventId(event_id), round)
        .await
        .map(Json)
        .map_err(reject)
}

async fn http_upsert_score(
    State(state): State<Arc<AppState>>,
    Json(record): Json<ScoreRecord>,
) -> ApiResult<UpsertScoreResponse> {
    upsert_score(&state.api, record)
        .await
        .map(Json)
        .map_err(reject)
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
