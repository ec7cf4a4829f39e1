use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use parley_events::TaskEnvelope;

#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error("processing failed: {0}")]
    Failed(String),

    #[error("upstream request failed: {0}")]
    Upstream(String),

    #[error("processing produced an empty reply")]
    EmptyReply,

    #[error("processing timed out after {0:?}")]
    Timeout(Duration),

    #[error("processing panicked: {0}")]
    Panicked(String),
}

impl ProcessingError {
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

/// Produces the reply text for one task.
///
/// Called again for every retried attempt of the same task, so any side
/// effects it has must tolerate repetition.
#[async_trait]
pub trait ProcessingFunction: Send + Sync {
    async fn process(&self, task: &TaskEnvelope) -> Result<String, ProcessingError>;
}

#[async_trait]
impl<P> ProcessingFunction for Arc<P>
where
    P: ProcessingFunction + ?Sized,
{
    async fn process(&self, task: &TaskEnvelope) -> Result<String, ProcessingError> {
        (**self).process(task).await
    }
}
