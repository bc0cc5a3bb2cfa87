//! Tool Surface (C4) — the nine deterministic tools the agent orchestrator
//! dispatches to, addressed by name with pipe-delimited arguments.

mod args;
mod catalog;
mod error;
mod handlers;
mod schema;
mod spec;

pub use catalog::{FileCatalog, SqlFileCatalog};
pub use error::ToolError;
pub use handlers::{dispatch, sample_for_resolver, ToolContext, ROWS_COLLECTION};
pub use spec::{find, ToolSpec, TOOLS};

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use crate::models::UploadedFile;
    use crate::services::store::memory::MemoryStore;

    use super::*;

    struct FakeCatalog {
        files: Vec<UploadedFile>,
    }

    #[async_trait]
    impl FileCatalog for FakeCatalog {
        async fn list_files(&self, user_id: &str) -> Result<Vec<UploadedFile>, ToolError> {
            Ok(self.files.iter().filter(|f| f.user_id == user_id).cloned().collect())
        }

        async fn get_file(
            &self,
            user_id: &str,
            file_id: &str,
        ) -> Result<Option<UploadedFile>, ToolError> {
            Ok(self
                .files
                .iter()
                .find(|f| f.user_id == user_id && f.file_id == file_id)
                .cloned())
        }
    }

    fn seeded_store() -> Arc<MemoryStore> {
        let store = MemoryStore::new();
        let rows: Vec<bson::Document> = vec![
            bson::doc! { "user_id": "u1", "file_id": "f1", "table_name": "production", "row_id": 0,
                "Product": "Widget-A", "Actual_Qty": 100, "Target_Qty": 120 },
            bson::doc! { "user_id": "u1", "file_id": "f1", "table_name": "production", "row_id": 1,
                "Product": "Widget-B", "Actual_Qty": 80, "Target_Qty": 100 },
        ];
        store.insert_many(ROWS_COLLECTION, rows);
        Arc::new(store)
    }

    fn ctx(user_id: &str) -> ToolContext {
        ToolContext {
            user_id: user_id.to_string(),
            store: seeded_store(),
            files: Arc::new(FakeCatalog { files: vec![] }),
        }
    }

    #[tokio::test]
    async fn agg_helper_sums_actual_qty_decimal_exact() {
        let ctx = ctx("u1");
        let args = r#"f1|production|{}|[{"op":"sum","field":"Actual_Qty","alias":"total"}]"#;
        let (result, pipeline) = dispatch(&ctx, "agg_helper", args).await.unwrap();
        assert_eq!(result["total"], serde_json::json!(180));
        assert!(pipeline.iter().any(|stage| stage.contains_key("$group")));
    }

    #[tokio::test]
    async fn rank_entities_rejects_non_positive_n() {
        let ctx = ctx("u1");
        let args = "f1|production|Product|Actual_Qty|sum|0|desc|{}";
        let err = dispatch(&ctx, "rank_entities", args).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidRank));
    }

    #[tokio::test]
    async fn calc_eval_returns_decimal_exact_value() {
        let ctx = ctx("u1");
        let args = r#"(100 - 80) / 100 * 100|{}"#;
        let (result, pipeline) = dispatch(&ctx, "calc_eval", args).await.unwrap();
        assert_eq!(result["value"], serde_json::json!(20));
        assert!(pipeline.is_empty());
    }

    #[tokio::test]
    async fn agg_helper_rejects_a_derived_column_that_never_matches() {
        let ctx = ctx("u1");
        let args = r#"f1|production|{}|[{"op":"sum","field":"Actual_Qty","alias":"total",
            "derived":{"derived_name":"Line","source_column":"Product","extraction_pattern":"^Line-(\\d+)$"}}]"#;
        let err = dispatch(&ctx, "agg_helper", args).await.unwrap_err();
        assert!(matches!(err, ToolError::Pipeline(crate::services::pipeline::PipelineError::DerivedColumnError { .. })));
    }

    #[tokio::test]
    async fn tenant_isolation_is_enforced_by_user_id() {
        let ctx = ctx("someone-else");
        let args = r#"f1|production|{}|[{"op":"sum","field":"Actual_Qty","alias":"total"}]"#;
        let err = dispatch(&ctx, "agg_helper", args).await.unwrap_err();
        assert!(matches!(err, ToolError::UnknownFileOrTable(_)));
    }

    #[test]
    fn tool_registry_and_dispatch_names_agree() {
        let names = ["list_user_files", "table_loader", "agg_helper", "timeseries_analyzer",
            "compare_entities", "statistical_summary", "rank_entities", "calc_eval",
            "get_date_range"];
        for name in names {
            assert!(find(name).is_some(), "tool '{name}' missing from registry");
        }
    }
}
