use crate::app::config::ShelfConfig;
use crate::app::lifecycle::context::StartupContext;
use crate::app::lifecycle::pipeline::BlockingTask;
use anyhow::{Context, Error, anyhow};
use std::path::PathBuf;

pub(crate) struct ConfigLoadTask {
    path: PathBuf,
}

impl ConfigLoadTask {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl BlockingTask<StartupContext> for ConfigLoadTask {
    fn run(&self, context: &StartupContext) -> Result<(), Error> {
        let config = ShelfConfig::load(&self.path)
            .with_context(|| format!("failed to load config {}", self.path.display()))?;

        config.logging.validate()?;

        // logging is not up yet
        println!("Config loaded from {}", self.path.display());

        context
            .config
            .set(config)
            .map_err(|_| anyhow!("Config already set on startup context"))
    }
}
