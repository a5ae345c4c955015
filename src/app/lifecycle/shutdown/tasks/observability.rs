use crate::app::lifecycle::context::StartupContext;
use crate::app::lifecycle::pipeline::BlockingTask;
use crate::core::observability;
use anyhow::Error;
use tracing::info;

pub struct ObservabilityShutdownTask;

impl BlockingTask<StartupContext> for ObservabilityShutdownTask {
    fn run(&self, _context: &StartupContext) -> Result<(), Error> {
        info!("Shutting down observability");
        observability::shutdown();

        Ok(())
    }
}
