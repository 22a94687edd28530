use axum::extract::{DefaultBodyLimit, State};
use axum::{routing, Json, Router};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::error::Result;
use crate::handlers;
use crate::state::AppState;

// matches the source's ParseMultipartForm limit
const MAX_UPLOAD_BYTES: usize = 32 * 1024 * 1024;

pub fn build(state: AppState) -> Router<()> {
    let service = ServiceBuilder::new().layer(TraceLayer::new_for_http());
    Router::new()
        .route("/health", routing::get(health))
        .route(
            "/uploads",
            routing::get(handlers::records::all)
                .post(handlers::files::upload_file)
                .patch(handlers::records::update)
                .delete(handlers::files::delete_file),
        )
        .route(
            "/uploads/youtube",
            routing::post(handlers::records::create).delete(handlers::records::delete_entry),
        )
        .route("/uploads/:user_id", routing::get(handlers::records::load))
        .route(
            "/image/users/:user_id",
            routing::get(handlers::records::load_image),
        )
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(service)
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Result<Json<serde_json::Value>> {
    state.db.ping().await?;
    Ok(Json(serde_json::json!({ "status": "up" })))
}
