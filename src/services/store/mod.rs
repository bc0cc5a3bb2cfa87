//! Document store abstraction — the interface the Pipeline Builder's
//! aggregation pipelines run against. One production implementation wraps
//! the official MongoDB driver; an in-memory fake stands in for tests.

pub mod memory;
pub mod mongo;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use bson::Document;

use crate::services::pipeline::PipelineError;

#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("store transport error: {0}")]
    Transport(String),
}

/// Thin contract over a MongoDB-style aggregation store. Any store
/// supporting a superset of `$match, $group, $project, $addFields, $sort,
/// $limit, $facet, $count, $dateTrunc` satisfies this.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn aggregate(
        &self,
        collection: &str,
        pipeline: Vec<Document>,
    ) -> Result<Vec<Document>, StoreError>;

    async fn count(&self, collection: &str, filter: Document) -> Result<i64, StoreError>;

    async fn find_one(
        &self,
        collection: &str,
        filter: Document,
        projection: Option<Document>,
    ) -> Result<Option<Document>, StoreError>;

    async fn update_one(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        upsert: bool,
    ) -> Result<(), StoreError>;
}

const RETRY_BACKOFFS_MS: [u64; 3] = [50, 200, 800];

/// Runs `op`, then retries up to 3 more times with exponential backoff
/// (50/200/800ms) before surfacing a fatal `StoreUnavailableError`, per the
/// Pipeline Builder's transport-retry policy.
pub async fn with_retry<T, F, Fut>(op: F) -> Result<T, PipelineError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut last_err = match op().await {
        Ok(value) => return Ok(value),
        Err(e) => e,
    };

    for backoff_ms in RETRY_BACKOFFS_MS {
        tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => last_err = e,
        }
    }

    Err(PipelineError::StoreUnavailableError(last_err.to_string()))
}
