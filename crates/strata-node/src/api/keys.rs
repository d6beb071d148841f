//! Execution key endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use strata_core::{Patch, Snapshot};
use strata_host::Job;

use super::error_response;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct KeysResponse {
    pub keys: Vec<String>,
}

/// List keys seen so far.
pub async fn list_keys(State(state): State<AppState>) -> Json<KeysResponse> {
    Json(KeysResponse {
        keys: state.host.keys(),
    })
}

/// Current head of a key.
pub async fn get_snapshot(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<Snapshot>, (StatusCode, String)> {
    let snapshot = state
        .host
        .snapshot(&key)
        .await
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("Key {} not found", key)))?;
    Ok(Json(Snapshot::clone(&snapshot)))
}

#[derive(Debug, Deserialize)]
pub struct PatchRequest {
    pub patches: Vec<Patch>,
}

#[derive(Debug, Serialize)]
pub struct PatchResponse {
    pub key: String,
    pub queued: usize,
}

/// Queue a direct patch submission.
pub async fn apply_patches(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(req): Json<PatchRequest>,
) -> Result<(StatusCode, Json<PatchResponse>), (StatusCode, String)> {
    let queued = req.patches.len();
    state
        .host
        .submit(&key, Job::apply(req.patches))
        .map_err(error_response)?;
    Ok((StatusCode::ACCEPTED, Json(PatchResponse { key, queued })))
}
