use crate::app::lifecycle::context::StartupContext;
use crate::app::lifecycle::pipeline::{Pipeline, PipelineBuilder};
use crate::app::lifecycle::shutdown::tasks::favorites::FavoritesDetachTask;
use crate::app::lifecycle::shutdown::tasks::observability::ObservabilityShutdownTask;
use tracing::info_span;

/// Builds the shutdown pipeline, which takes the resulting `StartupContext`
/// which is responsible for attaching anything which may need shutdown
pub fn build_shutdown_pipeline() -> Option<Pipeline<StartupContext>> {
    PipelineBuilder::new()
        .with_blocking(Box::new(FavoritesDetachTask))
        .with_blocking(Box::new(ObservabilityShutdownTask))
        .with_span(|| info_span!("shutdown_pipeline"))
        .build()
}
