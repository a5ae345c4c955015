use crate::app::lifecycle::context::StartupContext;
use crate::app::lifecycle::pipeline::BlockingTask;
use crate::core::search::GoogleBooksSearch;
use anyhow::{Error, anyhow};
use std::sync::Arc;
use tracing::info;

pub struct SearchTask;

impl BlockingTask<StartupContext> for SearchTask {
    fn run(&self, context: &StartupContext) -> Result<(), Error> {
        let config = context
            .config
            .get()
            .ok_or_else(|| anyhow!("Config not set on startup context"))?;

        let search = GoogleBooksSearch::new(&config.search)?;
        info!("Book search ready against {}", config.search.endpoint);

        context
            .search
            .set(Arc::new(search))
            .map_err(|_| anyhow!("Search already set on startup context"))
    }
}
