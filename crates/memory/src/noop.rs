//! No-op retriever: disables long-term memory entirely.

use async_trait::async_trait;
use taskforge_core::error::MemoryError;
use taskforge_core::memory::{MemoryRetriever, RetrievedContext, RunRecord};

/// Retrieves nothing and stores nothing.
pub struct NoopRetriever;

#[async_trait]
impl MemoryRetriever for NoopRetriever {
    fn name(&self) -> &str {
        "none"
    }

    async fn retrieve(&self, _task: &str, _max_results: usize) -> Result<RetrievedContext, MemoryError> {
        Ok(RetrievedContext::default())
    }

    async fn record(&self, _record: RunRecord) -> Result<String, MemoryError> {
        Ok(String::new())
    }
}
