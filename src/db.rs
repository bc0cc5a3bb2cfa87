//! SQLite pool creation + inline schema initialization for the relational
//! half of the data model (`UploadedFile`, `Conversation`,
//! `ConversationMessage`, `AuditRecord`); `TableRow` lives in the document
//! store instead (see `services::store`).

use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;

/// Opens the pool and ensures the schema exists. No `migrations/` directory
/// ships with this crate — the schema is small and stable enough that
/// `CREATE TABLE IF NOT EXISTS` at startup is simpler than a migration
/// runner, matching how the reference service's own test suite bootstraps
/// its SQLite tables.
pub async fn create_pool(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    create_pool_with_size(database_url, 32).await
}

pub async fn create_pool_with_size(
    database_url: &str,
    max_connections: u32,
) -> Result<SqlitePool, sqlx::Error> {
    if let Some(path) = database_url.strip_prefix("sqlite://")
        && path != ":memory:"
        && let Some(parent) = std::path::Path::new(path).parent()
    {
        let _ = std::fs::create_dir_all(parent);
    }

    let pool = SqlitePoolOptions::new().max_connections(max_connections).connect(database_url).await?;

    init_schema(&pool).await?;
    Ok(pool)
}

async fn init_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS uploaded_files (
            file_id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            original_filename TEXT NOT NULL,
            file_type TEXT NOT NULL,
            sheet_names_json TEXT NOT NULL DEFAULT '[]',
            row_count INTEGER NOT NULL DEFAULT 0,
            user_definitions_json TEXT NOT NULL DEFAULT '{}',
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_uploaded_files_user_id ON uploaded_files(user_id)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS conversations (
            conversation_id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            file_id TEXT,
            original_question TEXT NOT NULL,
            pending_date_range_json TEXT,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_conversations_user_id ON conversations(user_id)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS conversation_messages (
            conversation_id TEXT NOT NULL,
            seq INTEGER NOT NULL,
            role TEXT NOT NULL,
            content TEXT NOT NULL,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            PRIMARY KEY (conversation_id, seq)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS audit_records (
            request_id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            question TEXT NOT NULL,
            provider TEXT NOT NULL,
            model TEXT NOT NULL,
            tools_called_json TEXT NOT NULL DEFAULT '[]',
            latency_ms INTEGER NOT NULL,
            provenance_json TEXT NOT NULL DEFAULT '{}',
            answer_short TEXT NOT NULL,
            answer_detailed TEXT NOT NULL,
            chart_config_json TEXT,
            final_state TEXT NOT NULL,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_audit_records_user_id ON audit_records(user_id)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_audit_records_created_at ON audit_records(created_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Deletes audit records older than `retention_days`, called from a
/// periodic background task the way the reference service refreshes its
/// baselines.
pub async fn prune_audit_records(pool: &SqlitePool, retention_days: i64) -> Result<u64, sqlx::Error> {
    let cutoff = chrono::Utc::now() - chrono::Duration::days(retention_days);
    let result = sqlx::query("DELETE FROM audit_records WHERE created_at < ?")
        .bind(cutoff)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_pool_initializes_all_tables() {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        for table in
            ["uploaded_files", "conversations", "conversation_messages", "audit_records"]
        {
            let row: (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {table}"))
                .fetch_one(&pool)
                .await
                .unwrap_or_else(|e| panic!("table {table} missing: {e}"));
            assert_eq!(row.0, 0);
        }
    }

    #[tokio::test]
    async fn prune_audit_records_deletes_old_rows() {
        let pool = create_pool("sqlite::memory:").await.unwrap();
        sqlx::query(
            "INSERT INTO audit_records (request_id, user_id, question, provider, model, \
             latency_ms, answer_short, answer_detailed, final_state, created_at) \
             VALUES ('r1', 'u1', 'q', 'p', 'm', 10, 'a', 'a', 'completed', '2000-01-01T00:00:00Z')",
        )
        .execute(&pool)
        .await
        .unwrap();

        let deleted = prune_audit_records(&pool, 30).await.unwrap();
        assert_eq!(deleted, 1);
    }
}
