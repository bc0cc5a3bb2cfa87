//! The static tool registry. Both the agent's system prompt and the
//! `tools.probe` HTTP operation read this same table, so they can never
//! drift apart.

pub struct ToolSpec {
    pub name: &'static str,
    pub signature: &'static str,
    pub example: &'static str,
}

pub const TOOLS: &[ToolSpec] = &[
    ToolSpec {
        name: "list_user_files",
        signature: "(no arguments)",
        example: "list_user_files|",
    },
    ToolSpec {
        name: "table_loader",
        signature: "file_id|table|filters_json|fields_json|limit",
        example: r#"table_loader|f1|production|{}|[]|50"#,
    },
    ToolSpec {
        name: "agg_helper",
        signature: "file_id|table|filters_json|metrics_json",
        example: r#"agg_helper|f1|production|{}|[{"op":"sum","field":"Actual_Qty","alias":"total"}]"#,
    },
    ToolSpec {
        name: "timeseries_analyzer",
        signature: "file_id|table|time_col|metric_col|freq|agg|start?|end?",
        example: "timeseries_analyzer|f1|production|Date|Actual_Qty|month|sum||",
    },
    ToolSpec {
        name: "compare_entities",
        signature: "file_id|table|key_col|metric_col|entity_a|entity_b|agg|filters_json",
        example: "compare_entities|f1|production|Line|Actual_Qty|Line-1|Line-2|sum|{}",
    },
    ToolSpec {
        name: "statistical_summary",
        signature: "file_id|table|columns_json|filters_json",
        example: r#"statistical_summary|f1|production|["Actual_Qty","Target_Qty"]|{}"#,
    },
    ToolSpec {
        name: "rank_entities",
        signature: "file_id|table|key_col|metric_col|agg|n|order|filters_json",
        example: "rank_entities|f1|production|Product|Actual_Qty|sum|5|desc|{}",
    },
    ToolSpec {
        name: "calc_eval",
        signature: "expr|vars_json?",
        example: r#"calc_eval|(actual - target) / target * 100|{"actual":120,"target":100}"#,
    },
    ToolSpec {
        name: "get_date_range",
        signature: "file_id|table|time_col",
        example: "get_date_range|f1|production|Date",
    },
];

pub fn find(name: &str) -> Option<&'static ToolSpec> {
    TOOLS.iter().find(|t| t.name == name)
}
