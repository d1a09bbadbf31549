use crate::ai::ChatClient;
use crate::config::Settings;
use crate::errors::AppError;
use crate::models::Dataset;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Shared handle for the router. The uploaded dataset lives only in memory
/// and is replaced by the next upload.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub chat: ChatClient,
    pub dataset: Arc<RwLock<Option<Arc<Dataset>>>>,
}

impl AppState {
    pub fn new(settings: Settings) -> Result<Self, reqwest::Error> {
        let chat = ChatClient::new(&settings)?;
        Ok(Self {
            settings: Arc::new(settings),
            chat,
            dataset: Arc::new(RwLock::new(None)),
        })
    }

    pub async fn current_dataset(&self) -> Option<Arc<Dataset>> {
        self.dataset.read().await.clone()
    }

    pub async fn require_dataset(&self) -> Result<Arc<Dataset>, AppError> {
        self.current_dataset()
            .await
            .ok_or_else(|| AppError::not_found("no spreadsheet uploaded yet"))
    }

    pub async fn replace_dataset(&self, dataset: Dataset) -> Arc<Dataset> {
        let dataset = Arc::new(dataset);
        *self.dataset.write().await = Some(Arc::clone(&dataset));
        dataset
    }
}
