use crate::app::lifecycle::context::StartupContext;
use crate::app::lifecycle::pipeline::BlockingTask;
use crate::core::observability;
use anyhow::{Error, anyhow};
use tracing::info;

pub struct ConfigureObservabilityTask;

impl BlockingTask<StartupContext> for ConfigureObservabilityTask {
    fn run(&self, context: &StartupContext) -> Result<(), Error> {
        let config = context
            .config
            .get()
            .ok_or_else(|| anyhow!("Config not loaded before observability initialization"))?;

        observability::init(&config.logging)?;

        info!("Observability configured at level {}", config.logging.level);

        Ok(())
    }
}
