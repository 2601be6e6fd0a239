use axum::Json;
use axum::extract::Path;
use axum::routing::{post, put};
use axum::{Router, extract::State, http::StatusCode, routing::get};
use serde::Deserialize;

use crate::error::AppError;
use crate::models::*;
use crate::services::{ActionReport, StudentImport};
use crate::state::AppState;

#[derive(Deserialize)]
struct PrepareRequest {
    #[serde(default)]
    overwrite: bool,
}

#[derive(Deserialize)]
struct ReleaseRequest {
    permission: Permission,
}

#[derive(Deserialize)]
struct CloseRequest {
    #[serde(default)]
    compress: bool,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/course/init", post(init_course))
        .route("/assessments", put(configure_assessments))
        .route("/assessments/status", get(list_status))
        .route("/assessments/status/refresh", post(refresh_status))
        .route("/students", post(import_students))
        .route("/assessments/{name}/groups", post(import_groups))
        .route("/assessments/{name}/prepare", post(prepare))
        .route("/assessments/{name}/release", post(release))
        .route("/assessments/{name}/update", post(update))
        .route("/assessments/{name}/close", post(close))
        .route("/assessments/{name}/forfeit", post(forfeit))
        .with_state(state)
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn init_course(State(state): State<AppState>) -> Result<StatusCode, AppError> {
    let mut controller = state.controller.lock().await;
    controller.init_course().await?;
    controller.load().await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn configure_assessments(
    State(state): State<AppState>,
    Json(req): Json<Definitions>,
) -> Result<Json<StatusMap>, AppError> {
    let status = state.controller.lock().await.configure(req).await?;
    Ok(Json(status))
}

async fn list_status(State(state): State<AppState>) -> Result<Json<StatusMap>, AppError> {
    let status = state.controller.lock().await.assessments().statuses().await?;
    Ok(Json(status))
}

async fn refresh_status(State(state): State<AppState>) -> Result<Json<StatusMap>, AppError> {
    let status = state
        .controller
        .lock()
        .await
        .assessments()
        .refresh_all_status()
        .await?;
    Ok(Json(status))
}

async fn import_students(
    State(state): State<AppState>,
    body: String,
) -> Result<Json<StudentImport>, AppError> {
    let report = state.controller.lock().await.import_students(&body).await?;
    Ok(Json(report))
}

async fn import_groups(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: String,
) -> Result<Json<GroupRoster>, AppError> {
    let name = normalize_name(&name);
    let roster = state.controller.lock().await.import_groups(&name, &body).await?;
    Ok(Json(roster))
}

async fn prepare(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<PrepareRequest>,
) -> Result<Json<ActionReport>, AppError> {
    let name = normalize_name(&name);
    let report = state.controller.lock().await.prepare(&name, req.overwrite).await?;
    Ok(Json(report))
}

async fn release(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<ReleaseRequest>,
) -> Result<Json<ActionReport>, AppError> {
    let name = normalize_name(&name);
    let report = state.controller.lock().await.release(&name, req.permission).await?;
    Ok(Json(report))
}

async fn update(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ActionReport>, AppError> {
    let name = normalize_name(&name);
    let report = state.controller.lock().await.update(&name).await?;
    Ok(Json(report))
}

async fn close(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<CloseRequest>,
) -> Result<Json<ActionReport>, AppError> {
    let name = normalize_name(&name);
    let report = state.controller.lock().await.close(&name, req.compress).await?;
    Ok(Json(report))
}

async fn forfeit(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ActionReport>, AppError> {
    let name = normalize_name(&name);
    let report = state.controller.lock().await.forfeit(&name).await?;
    Ok(Json(report))
}
