//! Tenant file catalog — the relational half of the Tool Surface
//! (`list_user_files`/`table_loader` need `UploadedFile` metadata that
//! lives outside the document store).

use async_trait::async_trait;

use crate::models::UploadedFile;

use super::error::ToolError;

#[async_trait]
pub trait FileCatalog: Send + Sync {
    async fn list_files(&self, user_id: &str) -> Result<Vec<UploadedFile>, ToolError>;
    async fn get_file(&self, user_id: &str, file_id: &str) -> Result<Option<UploadedFile>, ToolError>;
}

/// Production `FileCatalog` over the `uploaded_files` SQLite table.
pub struct SqlFileCatalog {
    pool: sqlx::SqlitePool,
}

impl SqlFileCatalog {
    pub fn new(pool: sqlx::SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FileCatalog for SqlFileCatalog {
    async fn list_files(&self, user_id: &str) -> Result<Vec<UploadedFile>, ToolError> {
        sqlx::query_as::<_, UploadedFile>(
            "SELECT * FROM uploaded_files WHERE user_id = ? ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ToolError::Store(crate::services::store::StoreError::Transport(e.to_string())))
    }

    async fn get_file(&self, user_id: &str, file_id: &str) -> Result<Option<UploadedFile>, ToolError> {
        sqlx::query_as::<_, UploadedFile>(
            "SELECT * FROM uploaded_files WHERE user_id = ? AND file_id = ?",
        )
        .bind(user_id)
        .bind(file_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| ToolError::Store(crate::services::store::StoreError::Transport(e.to_string())))
    }
}
