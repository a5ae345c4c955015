use crate::app::lifecycle::context::StartupContext;
use crate::app::lifecycle::pipeline::{Pipeline, PipelineBuilder};
use crate::app::lifecycle::startup::tasks::config_load::ConfigLoadTask;
use crate::app::lifecycle::startup::tasks::favorites::FavoritesAttachTask;
use crate::app::lifecycle::startup::tasks::identity::IdentityTask;
use crate::app::lifecycle::startup::tasks::observability::ConfigureObservabilityTask;
use crate::app::lifecycle::startup::tasks::search::SearchTask;
use crate::app::lifecycle::startup::tasks::store::FavoriteStoreTask;
use std::path::PathBuf;
use tracing::info_span;

/// Full startup: config, logging, then the data providers
pub fn build_start_pipeline(cfg_path: PathBuf) -> Option<Pipeline<StartupContext>> {
    let pipeline = with_providers(
        PipelineBuilder::new()
            .with_blocking(Box::new(ConfigLoadTask::new(cfg_path)))
            .with_blocking(Box::new(ConfigureObservabilityTask)),
    );

    pipeline
        .with_span(|| info_span!("startup_pipeline"))
        .build()
}

/// Startup without installing the global log subscriber, for
/// embedding callers which bring their own
pub fn build_core_pipeline(cfg_path: PathBuf) -> Option<Pipeline<StartupContext>> {
    with_providers(
        PipelineBuilder::new().with_blocking(Box::new(ConfigLoadTask::new(cfg_path))),
    )
    .build()
}

fn with_providers(builder: PipelineBuilder<StartupContext>) -> PipelineBuilder<StartupContext> {
    builder
        .with_blocking(Box::new(IdentityTask))
        .with_async(Box::new(FavoriteStoreTask))
        .with_blocking(Box::new(SearchTask))
        .with_async(Box::new(FavoritesAttachTask))
}
