use crate::app::lifecycle::context::StartupContext;
use crate::app::lifecycle::pipeline::AsyncTask;
use crate::core::store::{FavoriteStore, FirestoreFavoriteStore, LocalFavoriteStore};
use anyhow::{Error, anyhow};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, instrument};

pub struct FavoriteStoreTask;

#[async_trait]
impl AsyncTask<StartupContext> for FavoriteStoreTask {
    #[instrument(skip_all, name = "favorite_store_task")]
    async fn run(&self, context: &StartupContext) -> Result<(), Error> {
        let config = context
            .config
            .get()
            .ok_or_else(|| anyhow!("Config not set on startup context"))?;

        let store: Arc<dyn FavoriteStore> = match &config.firestore {
            Some(fs_config) => {
                info!("Connecting to Firestore project: {}", fs_config.project_id);

                let store = FirestoreFavoriteStore::connect(fs_config, &config.favorites)
                    .await
                    .map_err(|e| anyhow!("Failed to connect to Firestore: {}", e))?;

                info!("Connected to Firestore");
                Arc::new(store)
            }
            None => {
                info!("Firestore not configured, favorites kept in memory");
                Arc::new(LocalFavoriteStore::new())
            }
        };

        context
            .store
            .set(store)
            .map_err(|_| anyhow!("Favorite store already set on startup context"))
    }
}
