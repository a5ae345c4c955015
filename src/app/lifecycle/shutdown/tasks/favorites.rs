use crate::app::lifecycle::context::StartupContext;
use crate::app::lifecycle::pipeline::BlockingTask;
use anyhow::Error;
use tracing::{info, instrument};

pub struct FavoritesDetachTask;

impl BlockingTask<StartupContext> for FavoritesDetachTask {
    #[instrument(skip_all, name = "favorites_detach_task")]
    fn run(&self, context: &StartupContext) -> Result<(), Error> {
        if let Some(favorites) = context.favorites() {
            favorites.detach();

            let pending = favorites.coordinator().pending_count();
            if pending > 0 {
                info!("Detached favorites with {} toggles still in flight", pending);
            } else {
                info!("Detached favorites");
            }
        }

        Ok(())
    }
}
