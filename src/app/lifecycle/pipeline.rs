use anyhow::Error;
use async_trait::async_trait;
use tracing::{Instrument, Span};

/// A synchronous lifecycle step
pub trait BlockingTask<C>: Send + Sync {
    fn run(&self, context: &C) -> Result<(), Error>;
}

/// A lifecycle step which needs to await io
#[async_trait]
pub trait AsyncTask<C>: Send + Sync {
    async fn run(&self, context: &C) -> Result<(), Error>;
}

enum Stage<C> {
    Blocking(Box<dyn BlockingTask<C>>),
    Async(Box<dyn AsyncTask<C>>),
}

/// Ordered list of tasks run against a shared context,
/// stopping at the first failure
pub struct Pipeline<C> {
    stages: Vec<Stage<C>>,
    span_provider: Option<Box<dyn Fn() -> Span + Send + Sync>>,
}

impl<C: Send + Sync> Pipeline<C> {
    pub async fn run(&self, context: &C) -> Result<(), Error> {
        let span = self
            .span_provider
            .as_ref()
            .map_or_else(Span::none, |provider| provider());

        async {
            for stage in &self.stages {
                match stage {
                    Stage::Blocking(task) => task.run(context)?,
                    Stage::Async(task) => task.run(context).await?,
                }
            }

            Ok(())
        }
        .instrument(span)
        .await
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

pub struct PipelineBuilder<C> {
    stages: Vec<Stage<C>>,
    span_provider: Option<Box<dyn Fn() -> Span + Send + Sync>>,
}

impl<C> Default for PipelineBuilder<C> {
    fn default() -> Self {
        Self {
            stages: Vec::new(),
            span_provider: None,
        }
    }
}

impl<C: Send + Sync> PipelineBuilder<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_blocking(mut self, task: Box<dyn BlockingTask<C>>) -> Self {
        self.stages.push(Stage::Blocking(task));
        self
    }

    pub fn with_async(mut self, task: Box<dyn AsyncTask<C>>) -> Self {
        self.stages.push(Stage::Async(task));
        self
    }

    /// Runs the whole pipeline under the span produced on each run
    pub fn with_span<F>(mut self, span_provider: F) -> Self
    where
        F: Fn() -> Span + Send + Sync + 'static,
    {
        self.span_provider = Some(Box::new(span_provider));
        self
    }

    /// None if no tasks were added
    pub fn build(self) -> Option<Pipeline<C>> {
        if self.stages.is_empty() {
            return None;
        }

        Some(Pipeline {
            stages: self.stages,
            span_provider: self.span_provider,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Trail {
        steps: Mutex<Vec<&'static str>>,
    }

    struct Step(&'static str);

    impl BlockingTask<Trail> for Step {
        fn run(&self, context: &Trail) -> Result<(), Error> {
            context.steps.lock().push(self.0);
            Ok(())
        }
    }

    struct AsyncStep(&'static str);

    #[async_trait]
    impl AsyncTask<Trail> for AsyncStep {
        async fn run(&self, context: &Trail) -> Result<(), Error> {
            tokio::task::yield_now().await;
            context.steps.lock().push(self.0);
            Ok(())
        }
    }

    struct Fail;

    impl BlockingTask<Trail> for Fail {
        fn run(&self, _context: &Trail) -> Result<(), Error> {
            anyhow::bail!("boom")
        }
    }

    #[test]
    fn test_empty_pipeline_not_built() {
        assert!(PipelineBuilder::<Trail>::new().build().is_none());
    }

    #[tokio::test]
    async fn test_runs_in_order() {
        let pipeline = PipelineBuilder::new()
            .with_blocking(Box::new(Step("config")))
            .with_async(Box::new(AsyncStep("store")))
            .with_blocking(Box::new(Step("search")))
            .with_span(|| tracing::info_span!("test_pipeline"))
            .build()
            .unwrap();

        let trail = Trail::default();
        pipeline.run(&trail).await.unwrap();

        assert_eq!(pipeline.len(), 3);
        assert_eq!(*trail.steps.lock(), vec!["config", "store", "search"]);
    }

    #[tokio::test]
    async fn test_stops_at_first_failure() {
        let pipeline = PipelineBuilder::new()
            .with_blocking(Box::new(Step("config")))
            .with_blocking(Box::new(Fail))
            .with_async(Box::new(AsyncStep("never")))
            .build()
            .unwrap();

        let trail = Trail::default();
        let err = pipeline.run(&trail).await.unwrap_err();

        assert_eq!(err.to_string(), "boom");
        assert_eq!(*trail.steps.lock(), vec!["config"]);
    }
}
