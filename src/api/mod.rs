mod handlers;

pub use handlers::SESSION_HEADER;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::service::TreeService;

pub fn create_router(service: TreeService) -> Router {
    let api = Router::new()
        // Tree
        .route("/tree", get(handlers::get_tree))
        .route("/tree/render", get(handlers::render))
        // Nodes
        .route(
            "/nodes/{id}",
            get(handlers::get_node)
                .put(handlers::rename_node)
                .delete(handlers::delete_subtree),
        )
        .route(
            "/nodes/{id}/children",
            get(handlers::list_children)
                .post(handlers::create_node)
                .put(handlers::reorder_children),
        )
        .route("/nodes/{id}/clone", post(handlers::clone_subtree))
        .route(
            "/nodes/{id}/contents",
            post(handlers::append_contents)
                .put(handlers::set_contents)
                .delete(handlers::clear_contents),
        )
        // History
        .route("/history", get(handlers::history_status))
        .route("/history/undo", post(handlers::undo))
        .route("/history/redo", post(handlers::redo))
        // Backup
        .route(
            "/backup",
            get(handlers::export_backup).post(handlers::import_backup),
        )
        // Health
        .route("/health", get(handlers::health));

    Router::new()
        .nest("/api/v1", api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(service)
}
