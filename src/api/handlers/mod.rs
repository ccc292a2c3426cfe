use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;

use crate::error::Error;
use crate::models::*;
use crate::persist::PersistenceError;
use crate::render::render_tree;
use crate::service::{TreeService, DEFAULT_SESSION};
use crate::store::Tree;

/// Header naming the editing session whose undo history a request uses.
pub const SESSION_HEADER: &str = "x-session-id";

// ============================================================
// Error Handling
// ============================================================

/// Map a service error to a status code and message.
///
/// Persistence failures are logged in full server-side; clients only see a
/// generic message so storage paths and I/O details do not leak.
fn api_error(e: Error) -> (StatusCode, String) {
    let status = match &e {
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::InvalidOperation(_) => StatusCode::BAD_REQUEST,
        Error::NothingToUndo | Error::NothingToRedo => StatusCode::CONFLICT,
        Error::RemoteUnavailable(_) | Error::Persistence(PersistenceError::AwaitingRestore) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        Error::Persistence(_) => {
            tracing::error!("Internal error: {}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            );
        }
    };
    tracing::warn!("Request failed: {}", e);
    (status, e.to_string())
}

fn session(headers: &HeaderMap) -> String {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_SESSION)
        .to_string()
}

// ============================================================
// Health
// ============================================================

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

// ============================================================
// Tree
// ============================================================

pub async fn get_tree(State(service): State<TreeService>) -> Result<Json<Tree>, (StatusCode, String)> {
    service.tree().map(Json).map_err(api_error)
}

/// Query parameters for rendering the tree.
#[derive(Debug, Deserialize)]
pub struct RenderQuery {
    /// Node to start from. Defaults to the root.
    pub from: Option<NodeId>,
}

pub async fn render(
    State(service): State<TreeService>,
    Query(query): Query<RenderQuery>,
) -> Result<String, (StatusCode, String)> {
    let tree = service.tree().map_err(api_error)?;
    let from = query.from.unwrap_or_else(|| tree.root_id());
    render_tree(&tree, &from).map_err(api_error)
}

// ============================================================
// Nodes
// ============================================================

pub async fn get_node(
    State(service): State<TreeService>,
    Path(id): Path<NodeId>,
) -> Result<Json<NodeView>, (StatusCode, String)> {
    service.get_node(&id).map(Json).map_err(api_error)
}

pub async fn list_children(
    State(service): State<TreeService>,
    Path(id): Path<NodeId>,
) -> Result<Json<Vec<NodeView>>, (StatusCode, String)> {
    service.list_children(&id).map(Json).map_err(api_error)
}

pub async fn create_node(
    State(service): State<TreeService>,
    headers: HeaderMap,
    Path(parent): Path<NodeId>,
    Json(input): Json<CreateNodeInput>,
) -> Result<(StatusCode, Json<NodeView>), (StatusCode, String)> {
    service
        .create_node(&session(&headers), &parent, &input.name)
        .map(|n| (StatusCode::CREATED, Json(n)))
        .map_err(api_error)
}

pub async fn rename_node(
    State(service): State<TreeService>,
    headers: HeaderMap,
    Path(id): Path<NodeId>,
    Json(input): Json<RenameNodeInput>,
) -> Result<Json<NodeView>, (StatusCode, String)> {
    service
        .rename_node(&session(&headers), &id, &input.name)
        .map(Json)
        .map_err(api_error)
}

pub async fn delete_subtree(
    State(service): State<TreeService>,
    headers: HeaderMap,
    Path(id): Path<NodeId>,
) -> Result<Json<DeletedSubtree>, (StatusCode, String)> {
    service
        .delete_subtree(&session(&headers), &id)
        .map(|removed| Json(DeletedSubtree { removed }))
        .map_err(api_error)
}

pub async fn clone_subtree(
    State(service): State<TreeService>,
    headers: HeaderMap,
    Path(source): Path<NodeId>,
    Json(input): Json<CloneSubtreeInput>,
) -> Result<(StatusCode, Json<NodeView>), (StatusCode, String)> {
    service
        .clone_subtree(&session(&headers), &source, &input.parent_id)
        .map(|n| (StatusCode::CREATED, Json(n)))
        .map_err(api_error)
}

pub async fn reorder_children(
    State(service): State<TreeService>,
    headers: HeaderMap,
    Path(parent): Path<NodeId>,
    Json(input): Json<ReorderChildrenInput>,
) -> Result<Json<Vec<NodeView>>, (StatusCode, String)> {
    service
        .reorder_children(&session(&headers), &parent, &input.children)
        .map(Json)
        .map_err(api_error)
}

// ============================================================
// Contents
// ============================================================

pub async fn set_contents(
    State(service): State<TreeService>,
    headers: HeaderMap,
    Path(id): Path<NodeId>,
    Json(input): Json<ContentsInput>,
) -> Result<Json<NodeView>, (StatusCode, String)> {
    service
        .set_contents(&session(&headers), &id, input.contents)
        .map(Json)
        .map_err(api_error)
}

pub async fn append_contents(
    State(service): State<TreeService>,
    headers: HeaderMap,
    Path(id): Path<NodeId>,
    Json(input): Json<ContentsInput>,
) -> Result<Json<NodeView>, (StatusCode, String)> {
    service
        .append_contents(&session(&headers), &id, input.contents)
        .map(Json)
        .map_err(api_error)
}

pub async fn clear_contents(
    State(service): State<TreeService>,
    headers: HeaderMap,
    Path(id): Path<NodeId>,
) -> Result<Json<NodeView>, (StatusCode, String)> {
    service
        .clear_contents(&session(&headers), &id)
        .map(Json)
        .map_err(api_error)
}

// ============================================================
// History
// ============================================================

pub async fn history_status(
    State(service): State<TreeService>,
    headers: HeaderMap,
) -> Json<HistoryStatus> {
    Json(service.history_status(&session(&headers)))
}

pub async fn undo(
    State(service): State<TreeService>,
    headers: HeaderMap,
) -> Result<Json<HistoryStep>, (StatusCode, String)> {
    service.undo(&session(&headers)).map(Json).map_err(api_error)
}

pub async fn redo(
    State(service): State<TreeService>,
    headers: HeaderMap,
) -> Result<Json<HistoryStep>, (StatusCode, String)> {
    service.redo(&session(&headers)).map(Json).map_err(api_error)
}

// ============================================================
// Backup
// ============================================================

pub async fn export_backup(
    State(service): State<TreeService>,
) -> Result<Json<BackupBundle>, (StatusCode, String)> {
    service.export_backup().map(Json).map_err(api_error)
}

/// Replace the whole tree with the posted backup (bundle or bare store).
pub async fn import_backup(
    State(service): State<TreeService>,
    body: Bytes,
) -> Result<Json<ImportSummary>, (StatusCode, String)> {
    service
        .import_backup(&body)
        .map(|tree| Json(ImportSummary { nodes: tree.len() }))
        .map_err(api_error)
}
