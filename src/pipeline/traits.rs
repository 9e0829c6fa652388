//! Pipeline Traits
//!
//! The contract every processor in the chain honours, so the runner can
//! drive stateless and resource-holding stages the same way.

use std::time::Duration;

use crate::errors::StageResult;
use crate::message::Batch;

/// A batch processor that can be chained in a pipeline
#[async_trait::async_trait]
pub trait Processor: Send + Sync {
    /// Get the unique identifier for this stage type
    fn stage_id(&self) -> &'static str;

    /// Process one batch and return exactly one batch.
    ///
    /// Per-part failures are carried inside the returned batch as flagged
    /// parts; there is no batch-level error.
    fn process_batch(&self, batch: &Batch) -> Batch;

    /// Request shutdown without blocking. Safe to call more than once.
    fn close_async(&self);

    /// Wait until shutdown completes, failing once `timeout` elapses
    async fn wait_for_close(&self, timeout: Duration) -> StageResult<()>;
}
