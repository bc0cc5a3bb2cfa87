//! Scheduled task that prunes `audit_records` older than
//! `AUDIT_RETENTION_DAYS`, the same `ScheduledExecutor` framework the
//! reference service uses for its baseline refresh task.

use std::future::Future;
use std::pin::Pin;

use sqlx::SqlitePool;

use crate::db;
use crate::utils::scheduled_executor::ScheduledTask;

pub struct AuditRetentionTask {
    pool: SqlitePool,
    retention_days: i64,
}

impl AuditRetentionTask {
    pub fn new(pool: SqlitePool, retention_days: i64) -> Self {
        Self { pool, retention_days }
    }
}

impl ScheduledTask for AuditRetentionTask {
    fn run(&self) -> Pin<Box<dyn Future<Output = Result<(), anyhow::Error>> + Send + '_>> {
        Box::pin(async move {
            let deleted = db::prune_audit_records(&self.pool, self.retention_days).await?;
            if deleted > 0 {
                tracing::info!("Pruned {} audit record(s) past retention", deleted);
            }
            Ok(())
        })
    }
}
