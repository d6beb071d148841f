//! Intent endpoints: dispatch and dry-run.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use strata_core::{ComputeStatus, Intent, Patch, Requirement, Snapshot, TraceGraph};
use tracing::debug;

use super::error_response;
use crate::state::AppState;

/// Request to run an action.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentRequest {
    /// Action name.
    #[serde(rename = "type")]
    pub intent_type: String,

    #[serde(default)]
    pub input: serde_json::Value,

    /// Caller-chosen id; generated when absent.
    pub intent_id: Option<String>,
}

impl IntentRequest {
    fn into_intent(self) -> Result<Intent, (StatusCode, String)> {
        let mut builder = Intent::builder().action(self.intent_type).input(self.input);
        if let Some(id) = self.intent_id {
            builder = builder.id(id);
        }
        builder.build().map_err(error_response)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct DispatchQuery {
    /// Wait for the key to go quiescent and return its head.
    #[serde(default)]
    pub wait: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchResponse {
    pub key: String,
    pub intent_id: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<Snapshot>,
}

/// Dispatch an intent on a key.
pub async fn dispatch_intent(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<DispatchQuery>,
    Json(req): Json<IntentRequest>,
) -> Result<(StatusCode, Json<DispatchResponse>), (StatusCode, String)> {
    let intent = req.into_intent()?;
    let intent_id = intent.intent_id.clone();
    state.host.dispatch(&key, intent).map_err(error_response)?;
    debug!(key = %key, intent_id = %intent_id, "intent queued");

    if !query.wait {
        return Ok((
            StatusCode::ACCEPTED,
            Json(DispatchResponse {
                key,
                intent_id,
                status: "queued".to_string(),
                snapshot: None,
            }),
        ));
    }

    state.host.drain(&key).await;
    let snapshot = state.host.snapshot(&key).await.map(|s| Snapshot::clone(&s));
    let status = snapshot
        .as_ref()
        .map(|s| format!("{:?}", s.system.status).to_lowercase())
        .unwrap_or_else(|| "unknown".to_string());
    Ok((
        StatusCode::OK,
        Json(DispatchResponse {
            key,
            intent_id,
            status,
            snapshot,
        }),
    ))
}

/// Outcome of a dry run.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewResponse {
    pub status: ComputeStatus,
    pub snapshot: Snapshot,
    pub patches: Vec<Patch>,
    pub requirements: Vec<Requirement>,
    pub trace: TraceGraph,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub halt_reason: Option<String>,
}

/// Compute an intent against a key's head without committing.
pub async fn preview_intent(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(req): Json<IntentRequest>,
) -> Result<Json<PreviewResponse>, (StatusCode, String)> {
    let intent = req.into_intent()?;
    let result = state.host.preview(&key, intent).await.map_err(error_response)?;
    Ok(Json(PreviewResponse {
        status: result.status,
        snapshot: result.snapshot,
        patches: result.patches,
        requirements: result.requirements,
        trace: result.trace,
        halt_reason: result.halt_reason,
    }))
}
