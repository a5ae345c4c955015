use crate::app::lifecycle::context::StartupContext;
use crate::app::lifecycle::pipeline::AsyncTask;
use crate::core::favorites::FavoritesSync;
use anyhow::{Error, anyhow};
use async_trait::async_trait;
use tracing::{info, instrument};

/// Attaches the signed in user's favorites, skipped when anonymous
pub struct FavoritesAttachTask;

#[async_trait]
impl AsyncTask<StartupContext> for FavoritesAttachTask {
    #[instrument(skip_all, name = "favorites_attach_task")]
    async fn run(&self, context: &StartupContext) -> Result<(), Error> {
        let identity = context
            .identity
            .get()
            .ok_or_else(|| anyhow!("Identity not set on startup context"))?;

        let store = context
            .store
            .get()
            .ok_or_else(|| anyhow!("Favorite store not set on startup context"))?;

        let favorites = match identity.current_user() {
            Some(user_id) => Some(FavoritesSync::attach(store.clone(), user_id).await?),
            None => {
                info!("No signed in user, favorites not attached");
                None
            }
        };

        context
            .favorites
            .set(favorites)
            .map_err(|_| anyhow!("Favorites already set on startup context"))
    }
}
