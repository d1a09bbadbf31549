use crate::handlers;
use crate::state::AppState;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};

pub fn router(state: AppState) -> Router {
    let upload_limit = state.settings.max_upload_bytes;

    Router::new()
        .route("/", get(handlers::index))
        .route("/upload", post(handlers::upload))
        .route("/ask", post(handlers::ask_form))
        .route("/healthz", get(handlers::health))
        .route("/api/upload", post(handlers::api_upload))
        .route("/api/dataset", get(handlers::dataset_summary))
        .route("/api/report", get(handlers::report))
        .route("/api/compare", get(handlers::compare))
        .route("/api/trends", get(handlers::trends))
        .route("/api/movers", get(handlers::movers))
        .route("/api/ask", post(handlers::ask))
        .route("/api/summary", post(handlers::summary))
        .layer(DefaultBodyLimit::max(upload_limit))
        .with_state(state)
}
