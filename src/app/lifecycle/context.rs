use crate::app::config::ShelfConfig;
use crate::core::favorites::FavoritesSync;
use crate::core::identity::IdentityProvider;
use crate::core::search::SearchProvider;
use crate::core::store::FavoriteStore;
use std::sync::{Arc, OnceLock};

/// Everything startup assembles, handed on to the shutdown pipeline
#[derive(Default)]
pub struct StartupContext {
    pub config: OnceLock<ShelfConfig>,

    /// Who is signed in, if anyone
    pub identity: OnceLock<Arc<dyn IdentityProvider>>,

    // Shared data providers
    pub store: OnceLock<Arc<dyn FavoriteStore>>,
    pub search: OnceLock<Arc<dyn SearchProvider>>,

    /// Live favorites of the signed in user, none when anonymous
    pub favorites: OnceLock<Option<Arc<FavoritesSync>>>,
}

impl StartupContext {
    pub fn favorites(&self) -> Option<&Arc<FavoritesSync>> {
        self.favorites.get().and_then(Option::as_ref)
    }
}
