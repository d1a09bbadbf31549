pub mod ai;
pub mod app;
pub mod config;
pub mod errors;
pub mod format;
pub mod handlers;
pub mod ingest;
pub mod models;
pub mod state;
pub mod stats;
pub mod ui;

pub use app::router;
pub use config::Settings;
pub use ingest::parse_upload;
pub use state::AppState;
