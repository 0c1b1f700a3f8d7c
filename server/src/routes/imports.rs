//! Import endpoint routes.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    routing::{delete, get, post},
    Json, Router,
};
use importer_engine::Input;

use crate::auth::AuthUser;
use crate::error::Result;
use crate::handlers::{
    handle_input, handle_list, handle_start, DecisionBody, ImportResponse, ListResponse,
    StartQuery, StrategyBody,
};
use crate::AppState;

/// Create import routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/resources/{resource}/imports", post(start_handler))
        .route("/imports", get(list_handler))
        .route("/imports/{id}", delete(cancel_handler))
        .route("/imports/{id}/strategy", post(strategy_handler))
        .route("/imports/{id}/decision", post(decision_handler))
}

/// POST /resources/{resource}/imports - Start importing a CSV document.
async fn start_handler(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(resource): Path<String>,
    Query(query): Query<StartQuery>,
    body: Bytes,
) -> Result<Json<ImportResponse>> {
    tracing::debug!(
        resource = %resource,
        bytes = body.len(),
        anonymous = auth.is_anonymous(),
        "Starting import"
    );
    let response = handle_start(&state, resource, query, &body).await?;
    Ok(Json(response))
}

/// GET /imports - List open imports.
async fn list_handler(State(state): State<AppState>, _auth: AuthUser) -> Json<ListResponse> {
    Json(handle_list(&state.sessions).await)
}

/// POST /imports/{id}/strategy - Choose how to treat colliding rows.
async fn strategy_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(id): Path<String>,
    Json(body): Json<StrategyBody>,
) -> Result<Json<ImportResponse>> {
    let response = handle_input(&state.sessions, &id, Input::Strategy(body.strategy)).await?;
    Ok(Json(response))
}

/// POST /imports/{id}/decision - Decide on the current colliding row.
async fn decision_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(id): Path<String>,
    Json(body): Json<DecisionBody>,
) -> Result<Json<ImportResponse>> {
    let response = handle_input(&state.sessions, &id, Input::Decision(body.decision)).await?;
    Ok(Json(response))
}

/// DELETE /imports/{id} - Drop every unresolved row and finish.
async fn cancel_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(id): Path<String>,
) -> Result<Json<ImportResponse>> {
    let response = handle_input(&state.sessions, &id, Input::Cancel).await?;
    Ok(Json(response))
}
