use crate::app::lifecycle::context::StartupContext;
use crate::app::lifecycle::pipeline::BlockingTask;
use crate::core::identity::{IdentityProvider, StaticIdentity};
use anyhow::{Error, anyhow};
use std::sync::Arc;
use tracing::info;

pub struct IdentityTask;

impl BlockingTask<StartupContext> for IdentityTask {
    fn run(&self, context: &StartupContext) -> Result<(), Error> {
        let config = context
            .config
            .get()
            .ok_or_else(|| anyhow!("Config not set on startup context"))?;

        let identity = StaticIdentity::new(config.identity.user_id.clone());

        match identity.current_user() {
            Some(user_id) => info!("Signed in as {}", user_id),
            None => info!("No user configured, running anonymously"),
        }

        context
            .identity
            .set(Arc::new(identity))
            .map_err(|_| anyhow!("Identity already set on startup context"))
    }
}
