use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use colored::*;
use serde::Deserialize;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::error::Error;
use crate::orchestrator::{Operation, ProposedChange, ReleaseOrchestrator, SlotReport, Target};
use crate::store::RunSummary;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<ReleaseOrchestrator>,
}

pub async fn serve(port: u16, orchestrator: Arc<ReleaseOrchestrator>) -> Result<()> {
    let state = AppState { orchestrator };

    let app = Router::new()
        .route("/", get(|| async { "Blue/Green Release Orchestrator" }))
        .route("/health", get(|| async { Json("OK") }))
        .route("/slots", get(get_slots))
        .route("/propose", post(propose))
        .route("/workflows/{workflow}/dispatch", post(dispatch_workflow))
        .route("/workflows/{workflow}/runs", get(get_runs))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr = format!("0.0.0.0:{}", port);
    println!(
        "{} Server running at {}",
        "✓".green(),
        format!("http://{}", addr).bright_blue()
    );

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

type ApiError = (StatusCode, String);

fn api_error(error: Error) -> ApiError {
    let status = match &error {
        Error::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::Conflict(_) => StatusCode::CONFLICT,
        Error::RemoteUnavailable(_) => StatusCode::BAD_GATEWAY,
        Error::Api { .. } | Error::Yaml(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, error.to_string())
}

#[derive(Deserialize)]
struct SlotsQuery {
    path: String,
    #[serde(rename = "ref")]
    base_ref: Option<String>,
}

async fn get_slots(
    State(state): State<AppState>,
    Query(query): Query<SlotsQuery>,
) -> Result<Json<SlotReport>, ApiError> {
    let report = state
        .orchestrator
        .slot_report(&query.path, query.base_ref.as_deref())
        .await
        .map_err(api_error)?;
    Ok(Json(report))
}

#[derive(Deserialize)]
struct ProposeRequest {
    #[serde(flatten)]
    operation: Operation,
    app: String,
    env: String,
    path: String,
    base_ref: Option<String>,
}

async fn propose(
    State(state): State<AppState>,
    Json(request): Json<ProposeRequest>,
) -> Result<Json<ProposedChange>, ApiError> {
    let target = Target {
        app: request.app,
        env: request.env,
        values_path: request.path,
    };
    let change = state
        .orchestrator
        .propose_change(&request.operation, &target, request.base_ref.as_deref())
        .await
        .map_err(api_error)?;
    Ok(Json(change))
}

#[derive(Deserialize)]
struct DispatchRequest {
    #[serde(rename = "ref")]
    target_ref: String,
    #[serde(default)]
    inputs: HashMap<String, String>,
}

async fn dispatch_workflow(
    State(state): State<AppState>,
    Path(workflow): Path<String>,
    Json(request): Json<DispatchRequest>,
) -> Result<StatusCode, ApiError> {
    state
        .orchestrator
        .dispatch(&workflow, &request.target_ref, &request.inputs)
        .await
        .map_err(api_error)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct RunsQuery {
    branch: Option<String>,
    per_page: Option<u32>,
}

async fn get_runs(
    State(state): State<AppState>,
    Path(workflow): Path<String>,
    Query(query): Query<RunsQuery>,
) -> Result<Json<Vec<RunSummary>>, ApiError> {
    let runs = state
        .orchestrator
        .runs(
            &workflow,
            query.branch.as_deref(),
            query.per_page.unwrap_or(10),
        )
        .await
        .map_err(api_error)?;
    Ok(Json(runs))
}
