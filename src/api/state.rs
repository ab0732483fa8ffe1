use std::sync::Arc;

use crate::config::Config;
use crate::observability::Metrics;
use crate::storage::StorageClient;
use crate::store::FjallJobStore;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<FjallJobStore>,
    pub storage: StorageClient,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        store: Arc<FjallJobStore>,
        storage: StorageClient,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            config,
            store,
            storage,
            metrics,
        }
    }
}
