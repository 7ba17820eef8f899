use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
};
use uuid::Uuid;

use crate::engine::{
    catalog::LanguageCatalog,
    config::LimitConfig,
    error::EngineError,
    metrics::MetricsRegistry,
    models::{
        CreateSubmissionResponse, LanguageDetail, LanguageSummary, Submission, SubmissionRequest,
        SubmissionView,
    },
    queue::SubmissionQueue,
    store::SubmissionStore,
};

#[derive(Clone)]
pub struct AppState {
    catalog: Arc<LanguageCatalog>,
    store: Arc<dyn SubmissionStore>,
    queue: SubmissionQueue,
    limits: LimitConfig,
    metrics: Arc<MetricsRegistry>,
}

pub fn routes(
    catalog: Arc<LanguageCatalog>,
    store: Arc<dyn SubmissionStore>,
    queue: SubmissionQueue,
    limits: LimitConfig,
    metrics_registry: Arc<MetricsRegistry>,
) -> Router {
    let state = AppState {
        catalog,
        store,
        queue,
        limits,
        metrics: metrics_registry,
    };
    Router::new()
        .route("/healthz", get(health))
        .route("/metrics", get(metrics))
        .route("/submissions", post(create_submission))
        .route("/submissions/{id}", get(get_submission))
        .route("/languages", get(list_languages))
        .route("/languages/{id}", get(get_language))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "ok": true }))
}

async fn metrics(State(state): State<AppState>) -> (StatusCode, String) {
    (StatusCode::OK, state.metrics.render_prometheus())
}

async fn create_submission(
    State(state): State<AppState>,
    Json(request): Json<SubmissionRequest>,
) -> Result<(StatusCode, Json<CreateSubmissionResponse>), EngineError> {
    let submission = validate_request(&state, request)?;

    // Claim queue capacity before the record exists so a rejection leaves
    // nothing behind in the store.
    let slot = state.queue.reserve()?;
    let id = submission.id;
    let status = submission.status;
    let language_id = submission.language_id;
    state.store.put(submission).await?;
    slot.push(id);

    tracing::info!(submission_id = %id, language_id, "submission accepted");
    Ok((
        StatusCode::CREATED,
        Json(CreateSubmissionResponse {
            submission_id: id,
            status,
        }),
    ))
}

async fn get_submission(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SubmissionView>, EngineError> {
    let record = state.store.get(&id).await.ok_or(EngineError::NotFound)?;
    Ok(Json(record.into()))
}

async fn list_languages(State(state): State<AppState>) -> Json<Vec<LanguageSummary>> {
    Json(state.catalog.list())
}

async fn get_language(
    State(state): State<AppState>,
    Path(id): Path<u32>,
) -> Result<Json<LanguageDetail>, EngineError> {
    state
        .catalog
        .detail(id)
        .map(Json)
        .ok_or(EngineError::NotFound)
}

fn validate_request(state: &AppState, request: SubmissionRequest) -> Result<Submission, EngineError> {
    let limits = &state.limits;

    let language_id = request
        .language_id
        .ok_or_else(|| EngineError::InvalidRequest("language_id is required".to_string()))?;
    let source_code = request.source_code.unwrap_or_default();
    if source_code.trim().is_empty() {
        return Err(EngineError::InvalidRequest(
            "source_code is empty".to_string(),
        ));
    }
    if source_code.len() > limits.max_source_bytes {
        return Err(EngineError::InvalidRequest(
            "source_code too large".to_string(),
        ));
    }
    if request.stdin.len() > limits.max_stdin_bytes {
        return Err(EngineError::InvalidRequest("stdin too large".to_string()));
    }
    if request
        .expected_output
        .as_ref()
        .is_some_and(|expected| expected.len() > limits.max_stdin_bytes)
    {
        return Err(EngineError::InvalidRequest(
            "expected_output too large".to_string(),
        ));
    }

    let cpu_time_limit = request
        .cpu_time_limit
        .unwrap_or(limits.default_cpu_time_limit);
    if !cpu_time_limit.is_finite()
        || cpu_time_limit <= 0.0
        || cpu_time_limit > limits.max_cpu_time_limit
    {
        return Err(EngineError::InvalidRequest(format!(
            "cpu_time_limit must be in (0, {}]",
            limits.max_cpu_time_limit
        )));
    }
    let memory_limit = request
        .memory_limit
        .unwrap_or(limits.default_memory_limit_kb);
    if memory_limit == 0 || memory_limit > limits.max_memory_limit_kb {
        return Err(EngineError::InvalidRequest(format!(
            "memory_limit must be in (0, {}]",
            limits.max_memory_limit_kb
        )));
    }

    if state.catalog.lookup(language_id).is_none() {
        return Err(EngineError::UnsupportedLanguage(language_id));
    }

    Ok(Submission::new(
        language_id,
        source_code,
        request.stdin,
        cpu_time_limit,
        memory_limit,
    )
    .with_expected_output(request.expected_output))
}
