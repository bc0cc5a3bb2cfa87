//! The nine tools themselves.

use std::sync::Arc;

use bson::{doc, Document};
use serde::Deserialize;
use serde_json::{json, Value as Json};

use crate::models::Scalar;
use crate::services::kernel;
use crate::services::pipeline::{
    DerivedColumn, Metric, PipelineBuilder, ReductionOp, SortOrder, TimeFreq,
};
use crate::services::store::{with_retry, DocumentStore};

use super::args::{optional, parse_i64_field, parse_json_field, require_nonempty, split_args};
use super::catalog::FileCatalog;
use super::error::ToolError;
use super::schema::{infer_schema, temporal_columns};

/// Every `TableRow` lives in one shared document-store collection,
/// distinguished by the `user_id`/`file_id`/`table_name` tenant prelude.
pub const ROWS_COLLECTION: &str = "table_rows";

/// Tools stop returning raw rows past this count and switch to a
/// truncated sample plus summary statistics.
const LARGE_RESULT_THRESHOLD: usize = 500;
const TRUNCATED_SAMPLE_SIZE: usize = 100;

pub struct ToolContext {
    pub user_id: String,
    pub store: Arc<dyn DocumentStore>,
    pub files: Arc<dyn FileCatalog>,
}

impl ToolContext {
    async fn sample_rows(&self, file_id: &str, table: &str) -> Result<Vec<Document>, ToolError> {
        let pipeline = vec![
            crate::services::pipeline::tenant_prelude(&self.user_id, file_id, table),
            doc! { "$limit": 50 },
        ];
        self.aggregate(pipeline).await
    }

    async fn columns(&self, file_id: &str, table: &str) -> Result<(Vec<String>, Vec<String>), ToolError> {
        let rows = self.sample_rows(file_id, table).await?;
        if rows.is_empty() {
            return Err(ToolError::UnknownFileOrTable(format!("{file_id}/{table}")));
        }
        let available = super::schema::column_names(&rows);
        let temporal = temporal_columns(&rows);
        Ok((available, temporal))
    }

    fn builder<'a>(
        &'a self,
        file_id: &'a str,
        table: &'a str,
        available_columns: &'a [String],
        temporal_columns: &'a [String],
    ) -> PipelineBuilder<'a> {
        PipelineBuilder {
            user_id: &self.user_id,
            file_id,
            table_name: table,
            available_columns,
            temporal_columns,
        }
    }

    async fn aggregate(&self, pipeline: Vec<Document>) -> Result<Vec<Document>, ToolError> {
        let store = self.store.clone();
        let pipeline_for_retry = pipeline.clone();
        with_retry(move || {
            let store = store.clone();
            let pipeline = pipeline_for_retry.clone();
            async move { store.aggregate(ROWS_COLLECTION, pipeline).await }
        })
        .await
        .map_err(ToolError::from)
    }
}

/// Exposes the columns + one sample row the Semantic Column Resolver needs,
/// without exposing `ToolContext`'s private sampling methods to callers
/// outside the Tool Surface.
pub async fn sample_for_resolver(
    ctx: &ToolContext,
    file_id: &str,
    table: &str,
) -> Result<(Vec<String>, Json), ToolError> {
    let (available, _) = ctx.columns(file_id, table).await?;
    let rows = ctx.sample_rows(file_id, table).await?;
    let sample = rows.first().map(row_to_json).unwrap_or(Json::Object(serde_json::Map::new()));
    Ok((available, sample))
}

/// Dispatches a tool call and returns its observation alongside every
/// aggregation pipeline stage the call actually executed, so the caller can
/// store them verbatim in `ToolInvocation.pipelines` for audit reproduction.
pub async fn dispatch(
    ctx: &ToolContext,
    name: &str,
    args: &str,
) -> Result<(Json, Vec<Document>), ToolError> {
    match name {
        "list_user_files" => list_user_files(ctx).await,
        "table_loader" => table_loader(ctx, args).await,
        "agg_helper" => agg_helper(ctx, args).await,
        "timeseries_analyzer" => timeseries_analyzer(ctx, args).await,
        "compare_entities" => compare_entities(ctx, args).await,
        "statistical_summary" => statistical_summary(ctx, args).await,
        "rank_entities" => rank_entities(ctx, args).await,
        "calc_eval" => calc_eval(args),
        "get_date_range" => get_date_range(ctx, args).await,
        other => Err(ToolError::UnknownTool(other.to_string())),
    }
}

// ---------------------------------------------------------------------------
// list_user_files
// ---------------------------------------------------------------------------

async fn list_user_files(ctx: &ToolContext) -> Result<(Json, Vec<Document>), ToolError> {
    let files = ctx.files.list_files(&ctx.user_id).await?;
    let out: Vec<Json> = files
        .into_iter()
        .map(|f| {
            json!({
                "file_id": f.file_id,
                "filename": f.original_filename,
                "table_names": f.sheet_names(),
                "row_count": f.row_count,
            })
        })
        .collect();
    Ok((Json::Array(out), Vec::new()))
}

// ---------------------------------------------------------------------------
// table_loader
// ---------------------------------------------------------------------------

async fn table_loader(ctx: &ToolContext, args: &str) -> Result<(Json, Vec<Document>), ToolError> {
    let parts = split_args("table_loader", args, 5)?;
    let file_id = require_nonempty("table_loader", "file_id", &parts[0])?;
    let table = require_nonempty("table_loader", "table", &parts[1])?;
    let filters: Json = parse_json_field("table_loader", "filters_json", &parts[2])?;
    let fields: Vec<String> = parse_json_field("table_loader", "fields_json", &parts[3])?;
    let requested_limit = parse_i64_field("table_loader", "limit", &parts[4], 100)?;

    let (available, temporal) = ctx.columns(&file_id, &table).await?;
    for f in &fields {
        if !available.iter().any(|c| c == f) {
            return Err(crate::services::pipeline::PipelineError::unknown_column(f, &available).into());
        }
    }
    let builder = ctx.builder(&file_id, &table, &available, &temporal);

    let (matched_rows, mut executed_stages) = row_count(ctx, &builder, &filters).await?;
    let truncated = matched_rows as usize > LARGE_RESULT_THRESHOLD;
    let fetch_limit = if truncated {
        TRUNCATED_SAMPLE_SIZE as i64
    } else {
        requested_limit.min(LARGE_RESULT_THRESHOLD as i64).max(1)
    };

    let pipeline = builder.load_rows(&filters, None, fetch_limit)?;
    executed_stages.extend(pipeline.clone());
    let rows = ctx.aggregate(pipeline).await?;
    let projected_rows: Vec<Document> = if fields.is_empty() {
        rows
    } else {
        rows.into_iter()
            .map(|r| {
                let mut projected = Document::new();
                for f in &fields {
                    if let Some(v) = r.get(f) {
                        projected.insert(f.clone(), v.clone());
                    }
                }
                projected
            })
            .collect()
    };
    let schema = infer_schema(&projected_rows);
    let sample_rows: Vec<Json> = projected_rows.iter().map(row_to_json).collect();

    let mut response = serde_json::Map::new();
    response.insert("schema".into(), serde_json::to_value(&schema).unwrap_or(Json::Null));
    response.insert("sample_rows".into(), Json::Array(sample_rows));
    response.insert("row_count".into(), Json::from(matched_rows));
    if truncated {
        response.insert("truncated".into(), Json::Bool(true));
        response.insert("stats".into(), summarize_numeric_columns(&projected_rows));
    }
    Ok((Json::Object(response), executed_stages))
}

/// Per-numeric-column `{min, max, mean, count}` over sampled rows, used
/// when a tool returns a truncated sample instead of the full result.
fn summarize_numeric_columns(rows: &[Document]) -> Json {
    let mut out = serde_json::Map::new();
    for col in super::schema::column_names(rows) {
        let values: Vec<Scalar> = rows.iter().map(|r| {
            r.get(&col).map(Scalar::from_bson).unwrap_or(Scalar::Null)
        }).collect();
        if !values.iter().any(Scalar::is_numeric) {
            continue;
        }
        out.insert(
            col,
            json!({
                "min": kernel::decimal_min(&values).map(kernel::decimal_to_json),
                "max": kernel::decimal_max(&values).map(kernel::decimal_to_json),
                "mean": kernel::decimal_mean(&values).map(kernel::decimal_to_json),
                "count": kernel::decimal_count(&values),
            }),
        );
    }
    Json::Object(out)
}

// ---------------------------------------------------------------------------
// agg_helper
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct MetricInput {
    op: ReductionOp,
    field: String,
    alias: Option<String>,
    group_by: Option<String>,
    derived: Option<DerivedColumnInput>,
}

#[derive(Debug, Deserialize)]
struct DerivedColumnInput {
    derived_name: String,
    source_column: String,
    extraction_pattern: String,
}

async fn agg_helper(ctx: &ToolContext, args: &str) -> Result<(Json, Vec<Document>), ToolError> {
    let parts = split_args("agg_helper", args, 4)?;
    let file_id = require_nonempty("agg_helper", "file_id", &parts[0])?;
    let table = require_nonempty("agg_helper", "table", &parts[1])?;
    let filters: Json = parse_json_field("agg_helper", "filters_json", &parts[2])?;
    let metrics_input: Vec<MetricInput> = parse_json_field("agg_helper", "metrics_json", &parts[3])?;
    if metrics_input.is_empty() {
        return Err(ToolError::ArgumentError {
            tool: "agg_helper".into(),
            reason: "metrics_json must be a non-empty array".into(),
        });
    }

    let derived = metrics_input.iter().find_map(|m| {
        m.derived.as_ref().map(|d| DerivedColumn {
            derived_name: d.derived_name.clone(),
            source_column: d.source_column.clone(),
            extraction_pattern: d.extraction_pattern.clone(),
        })
    });

    let (mut available, temporal) = ctx.columns(&file_id, &table).await?;
    if let Some(d) = &derived {
        available.push(d.derived_name.clone());
        let samples = ctx.sample_rows(&file_id, &table).await?;
        crate::services::pipeline::validate_derived_column(d, &samples)?;
    }

    let metrics: Vec<Metric> = metrics_input
        .into_iter()
        .map(|m| Metric { op: m.op, field: m.field, alias: m.alias, group_by: m.group_by })
        .collect();

    let builder = ctx.builder(&file_id, &table, &available, &temporal);
    let pipeline = builder.reduce(&filters, &metrics, derived.as_ref())?;
    let rows = ctx.aggregate(pipeline.clone()).await?;

    let application_reduced: Vec<ReductionOp> =
        metrics.iter().map(|m| m.op).filter(|op| op.requires_application_reduction()).collect();

    let mut out_rows: Vec<Json> = Vec::new();
    for row in &rows {
        let mut obj = serde_json::Map::new();
        if let Some(id) = row.get("_id") {
            if !matches!(id, bson::Bson::Null) {
                obj.insert("group_key".into(), Scalar::from_bson(id).to_json());
            }
        }
        for metric in &metrics {
            let alias = metric.alias_or_default();
            let raw = row.get(&alias).cloned().unwrap_or(bson::Bson::Null);
            let value = finish_metric_value(metric.op, raw, &application_reduced);
            obj.insert(alias, value);
        }
        out_rows.push(Json::Object(obj));
    }

    if out_rows.len() == 1 && out_rows[0].get("group_key").is_none() {
        Ok((out_rows.into_iter().next().unwrap(), pipeline))
    } else {
        Ok((Json::Array(out_rows), pipeline))
    }
}

/// `median`/`stddev`/`count_distinct` were staged as raw arrays
/// (`$push`/`$addToSet`); finish the reduction here in the Numeric Kernel.
fn finish_metric_value(op: ReductionOp, raw: bson::Bson, _ops: &[ReductionOp]) -> Json {
    if !op.requires_application_reduction() {
        return Scalar::from_bson(&raw).to_json();
    }
    let values: Vec<Scalar> = match raw {
        bson::Bson::Array(items) => items.iter().map(Scalar::from_bson).collect(),
        other => vec![Scalar::from_bson(&other)],
    };
    match op {
        ReductionOp::Median => kernel::decimal_median(&values)
            .map(kernel::decimal_to_json)
            .unwrap_or(Json::Null),
        ReductionOp::Stddev => kernel::decimal_stddev(&values)
            .map(kernel::decimal_to_json)
            .unwrap_or(Json::Null),
        ReductionOp::CountDistinct => Json::from(kernel::decimal_count_distinct(&values)),
        _ => unreachable!(),
    }
}

// ---------------------------------------------------------------------------
// timeseries_analyzer
// ---------------------------------------------------------------------------

async fn timeseries_analyzer(ctx: &ToolContext, args: &str) -> Result<(Json, Vec<Document>), ToolError> {
    let parts = split_args("timeseries_analyzer", args, 8)?;
    let file_id = require_nonempty("timeseries_analyzer", "file_id", &parts[0])?;
    let table = require_nonempty("timeseries_analyzer", "table", &parts[1])?;
    let time_col = require_nonempty("timeseries_analyzer", "time_col", &parts[2])?;
    let metric_col = require_nonempty("timeseries_analyzer", "metric_col", &parts[3])?;
    let freq = parse_freq(&parts[4])?;
    let agg = parse_reduction_op(&parts[5])?;
    let start = optional(&parts[6]);
    let end = optional(&parts[7]);

    let (available, temporal) = ctx.columns(&file_id, &table).await?;
    if !temporal.iter().any(|c| c == &time_col) {
        return Err(ToolError::NotTemporal(time_col));
    }
    let builder = ctx.builder(&file_id, &table, &available, &temporal);
    let pipeline =
        builder.timeseries(&time_col, &metric_col, freq, agg, start.as_deref(), end.as_deref())?;
    let rows = ctx.aggregate(pipeline.clone()).await?;

    let series: Vec<Json> = rows
        .iter()
        .map(|r| {
            let bucket = r.get("_id").map(Scalar::from_bson).unwrap_or(Scalar::Null);
            let value = r.get("value").map(Scalar::from_bson).unwrap_or(Scalar::Null);
            json!({ "bucket": bucket.to_json(), "value": value.to_json() })
        })
        .collect();

    let values: Vec<rust_decimal::Decimal> = rows
        .iter()
        .filter_map(|r| r.get("value").map(Scalar::from_bson).and_then(|s| s.as_decimal()))
        .collect();
    let (trend_pct_change, slope) = trend_stats(&values);

    Ok((
        json!({
            "series": series,
            "trend_pct_change": trend_pct_change,
            "slope": slope,
        }),
        pipeline,
    ))
}

/// Simple first-to-last percent change and a linear-regression slope over
/// evenly-spaced buckets — enough for the agent to describe a trend
/// direction without re-deriving it from the raw series itself.
fn trend_stats(values: &[rust_decimal::Decimal]) -> (Option<f64>, Option<f64>) {
    if values.len() < 2 {
        return (None, None);
    }
    let first = values[0];
    let last = *values.last().unwrap();
    let pct_change = if first.is_zero() {
        None
    } else {
        ((last - first) / first * rust_decimal::Decimal::from(100)).to_string().parse::<f64>().ok()
    };

    let n = values.len() as f64;
    let xs: Vec<f64> = (0..values.len()).map(|i| i as f64).collect();
    let ys: Vec<f64> = values.iter().map(|v| v.to_string().parse::<f64>().unwrap_or(0.0)).collect();
    let mean_x = xs.iter().sum::<f64>() / n;
    let mean_y = ys.iter().sum::<f64>() / n;
    let numerator: f64 = xs.iter().zip(&ys).map(|(x, y)| (x - mean_x) * (y - mean_y)).sum();
    let denominator: f64 = xs.iter().map(|x| (x - mean_x).powi(2)).sum();
    let slope = if denominator == 0.0 { None } else { Some(numerator / denominator) };

    (pct_change, slope)
}

// ---------------------------------------------------------------------------
// compare_entities
// ---------------------------------------------------------------------------

async fn compare_entities(ctx: &ToolContext, args: &str) -> Result<(Json, Vec<Document>), ToolError> {
    let parts = split_args("compare_entities", args, 8)?;
    let file_id = require_nonempty("compare_entities", "file_id", &parts[0])?;
    let table = require_nonempty("compare_entities", "table", &parts[1])?;
    let key_col = require_nonempty("compare_entities", "key_col", &parts[2])?;
    let metric_col = require_nonempty("compare_entities", "metric_col", &parts[3])?;
    let entity_a = require_nonempty("compare_entities", "entity_a", &parts[4])?;
    let entity_b = require_nonempty("compare_entities", "entity_b", &parts[5])?;
    let agg = parse_reduction_op(&parts[6])?;
    let filters: Json = parse_json_field("compare_entities", "filters_json", &parts[7])?;

    let (available, temporal) = ctx.columns(&file_id, &table).await?;
    let builder = ctx.builder(&file_id, &table, &available, &temporal);
    let pipeline = builder.compare(&key_col, &metric_col, &entity_a, &entity_b, agg, &filters)?;
    let rows = ctx.aggregate(pipeline.clone()).await?;
    let facet = rows.into_iter().next().ok_or(ToolError::ArgumentError {
        tool: "compare_entities".into(),
        reason: "facet produced no output document".into(),
    })?;

    let a = extract_facet_value(&facet, "entity_a");
    let b = extract_facet_value(&facet, "entity_b");

    match (a, b) {
        (Some(a), Some(b)) => {
            let pct_diff = if !a.is_zero() {
                ((b - a) / a * rust_decimal::Decimal::from(100)).to_string().parse::<f64>().ok()
            } else {
                None
            };
            Ok((
                json!({
                    "a": kernel::decimal_to_json(a),
                    "b": kernel::decimal_to_json(b),
                    "pct_diff": pct_diff,
                }),
                pipeline,
            ))
        },
        _ => Err(ToolError::ArgumentError {
            tool: "compare_entities".into(),
            reason: format!("entity '{entity_a}' or '{entity_b}' not found"),
        }),
    }
}

fn extract_facet_value(facet: &Document, branch: &str) -> Option<rust_decimal::Decimal> {
    let arr = facet.get_array(branch).ok()?;
    let first = arr.first()?.as_document()?;
    Scalar::from_bson(first.get("value")?).as_decimal()
}

// ---------------------------------------------------------------------------
// statistical_summary
// ---------------------------------------------------------------------------

async fn statistical_summary(ctx: &ToolContext, args: &str) -> Result<(Json, Vec<Document>), ToolError> {
    let parts = split_args("statistical_summary", args, 4)?;
    let file_id = require_nonempty("statistical_summary", "file_id", &parts[0])?;
    let table = require_nonempty("statistical_summary", "table", &parts[1])?;
    let columns: Vec<String> = parse_json_field("statistical_summary", "columns_json", &parts[2])?;
    let filters: Json = parse_json_field("statistical_summary", "filters_json", &parts[3])?;

    let (available, temporal) = ctx.columns(&file_id, &table).await?;
    let builder = ctx.builder(&file_id, &table, &available, &temporal);

    for col in &columns {
        if !available.iter().any(|c| c == col) {
            return Err(crate::services::pipeline::PipelineError::unknown_column(col, &available).into());
        }
    }

    let pipeline = builder.load_rows(&filters, None, crate::services::pipeline::MAX_LIMIT)?;
    let rows = ctx.aggregate(pipeline.clone()).await?;

    let mut out = serde_json::Map::new();
    for col in &columns {
        let values: Vec<Scalar> = rows.iter().map(|r| {
            r.get(col).map(Scalar::from_bson).unwrap_or(Scalar::Null)
        }).collect();

        if values.iter().all(|v| matches!(v, Scalar::Null)) {
            return Err(ToolError::ArgumentError {
                tool: "statistical_summary".into(),
                reason: format!("column '{col}' has no values to summarize"),
            });
        }
        if values.iter().any(|v| !matches!(v, Scalar::Null | Scalar::Number(_))) {
            return Err(ToolError::ArgumentError {
                tool: "statistical_summary".into(),
                reason: format!("column '{col}' is not numeric"),
            });
        }

        out.insert(
            col.clone(),
            json!({
                "min": kernel::decimal_min(&values).map(kernel::decimal_to_json),
                "max": kernel::decimal_max(&values).map(kernel::decimal_to_json),
                "mean": kernel::decimal_mean(&values).map(kernel::decimal_to_json),
                "median": kernel::decimal_median(&values).map(kernel::decimal_to_json),
                "stddev": kernel::decimal_stddev(&values).map(kernel::decimal_to_json),
                "count": kernel::decimal_count(&values),
                "null_count": kernel::null_count(&values),
            }),
        );
    }

    Ok((Json::Object(out), pipeline))
}

// ---------------------------------------------------------------------------
// rank_entities
// ---------------------------------------------------------------------------

async fn rank_entities(ctx: &ToolContext, args: &str) -> Result<(Json, Vec<Document>), ToolError> {
    let parts = split_args("rank_entities", args, 8)?;
    let file_id = require_nonempty("rank_entities", "file_id", &parts[0])?;
    let table = require_nonempty("rank_entities", "table", &parts[1])?;
    let key_col = require_nonempty("rank_entities", "key_col", &parts[2])?;
    let metric_col = require_nonempty("rank_entities", "metric_col", &parts[3])?;
    let agg = parse_reduction_op(&parts[4])?;
    let n = parse_i64_field("rank_entities", "n", &parts[5], 0)?;
    let order = parse_sort_order(&parts[6])?;
    let filters: Json = parse_json_field("rank_entities", "filters_json", &parts[7])?;

    if n <= 0 {
        return Err(ToolError::InvalidRank);
    }

    let (available, temporal) = ctx.columns(&file_id, &table).await?;
    let builder = ctx.builder(&file_id, &table, &available, &temporal);
    let pipeline = builder.rank(&key_col, &metric_col, agg, n, order, &filters)?;
    let rows = ctx.aggregate(pipeline.clone()).await?;

    let out: Vec<Json> = rows
        .iter()
        .map(|r| {
            let entity = r.get("_id").map(Scalar::from_bson).unwrap_or(Scalar::Null);
            let value = r.get("value").map(Scalar::from_bson).unwrap_or(Scalar::Null);
            json!({ "entity": entity.to_json(), "value": value.to_json() })
        })
        .collect();

    Ok((Json::Array(out), pipeline))
}

// ---------------------------------------------------------------------------
// calc_eval
// ---------------------------------------------------------------------------

fn calc_eval(args: &str) -> Result<(Json, Vec<Document>), ToolError> {
    let mut parts = args.splitn(2, '|');
    let expr = parts.next().unwrap_or("").trim();
    if expr.is_empty() {
        return Err(ToolError::ArgumentError {
            tool: "calc_eval".into(),
            reason: "expr is required".into(),
        });
    }
    let vars_raw = parts.next().unwrap_or("");
    let vars_json: std::collections::HashMap<String, Json> =
        parse_json_field("calc_eval", "vars_json", vars_raw)?;
    let mut vars = std::collections::HashMap::new();
    for (k, v) in vars_json {
        let decimal = match &v {
            Json::Number(n) => n.to_string().parse::<rust_decimal::Decimal>(),
            Json::String(s) => s.parse::<rust_decimal::Decimal>(),
            other => {
                return Err(ToolError::ArgumentError {
                    tool: "calc_eval".into(),
                    reason: format!("var '{k}' must be a number or numeric string, got {other}"),
                })
            },
        }
        .map_err(|e| ToolError::ArgumentError {
            tool: "calc_eval".into(),
            reason: format!("var '{k}' is not a valid decimal: {e}"),
        })?;
        vars.insert(k, decimal);
    }

    let value = kernel::safe_eval(expr, &vars).map_err(|e| ToolError::ArgumentError {
        tool: "calc_eval".into(),
        reason: e.to_string(),
    })?;
    Ok((json!({ "value": kernel::decimal_to_json(value) }), Vec::new()))
}

// ---------------------------------------------------------------------------
// get_date_range
// ---------------------------------------------------------------------------

async fn get_date_range(ctx: &ToolContext, args: &str) -> Result<(Json, Vec<Document>), ToolError> {
    let parts = split_args("get_date_range", args, 3)?;
    let file_id = require_nonempty("get_date_range", "file_id", &parts[0])?;
    let table = require_nonempty("get_date_range", "table", &parts[1])?;
    let time_col = require_nonempty("get_date_range", "time_col", &parts[2])?;

    let (_, temporal) = ctx.columns(&file_id, &table).await?;
    if !temporal.iter().any(|c| c == &time_col) {
        return Err(ToolError::NotTemporal(time_col));
    }

    let pipeline = vec![
        crate::services::pipeline::tenant_prelude(&ctx.user_id, &file_id, &table),
        doc! {
            "$group": {
                "_id": bson::Bson::Null,
                "min_date": { "$min": format!("${time_col}") },
                "max_date": { "$max": format!("${time_col}") },
                "row_count": { "$sum": 1 },
            }
        },
    ];
    let rows = ctx.aggregate(pipeline.clone()).await?;
    let row = rows.into_iter().next().ok_or(ToolError::UnknownFileOrTable(format!("{file_id}/{table}")))?;

    Ok((
        json!({
            "min_date": row.get("min_date").map(Scalar::from_bson).unwrap_or(Scalar::Null).to_json(),
            "max_date": row.get("max_date").map(Scalar::from_bson).unwrap_or(Scalar::Null).to_json(),
            "row_count": count_field(&row, "row_count"),
        }),
        pipeline,
    ))
}

// ---------------------------------------------------------------------------
// shared helpers
// ---------------------------------------------------------------------------

async fn row_count(
    ctx: &ToolContext,
    builder: &PipelineBuilder<'_>,
    filters: &Json,
) -> Result<(i64, Vec<Document>), ToolError> {
    let pipeline = builder.row_count(filters)?;
    let rows = ctx.aggregate(pipeline.clone()).await?;
    Ok((rows.first().map(|r| count_field(r, "row_count")).unwrap_or(0), pipeline))
}

/// Reads a `$count`/`$sum` accumulator field as `i64` regardless of
/// whether the backing store returned it as a BSON int32 or int64.
fn count_field(doc: &Document, field: &str) -> i64 {
    doc.get_i64(field).ok().or_else(|| doc.get_i32(field).ok().map(i64::from)).unwrap_or(0)
}

fn row_to_json(row: &Document) -> Json {
    let mut obj = serde_json::Map::new();
    for col in super::schema::column_names(std::slice::from_ref(row)) {
        let scalar = row.get(&col).map(Scalar::from_bson).unwrap_or(Scalar::Null);
        obj.insert(col, scalar.to_json());
    }
    Json::Object(obj)
}

fn parse_reduction_op(raw: &str) -> Result<ReductionOp, ToolError> {
    serde_json::from_value(Json::String(raw.trim().to_lowercase())).map_err(|_| {
        ToolError::ArgumentError { tool: "agg".into(), reason: format!("unknown op '{raw}'") }
    })
}

fn parse_freq(raw: &str) -> Result<TimeFreq, ToolError> {
    serde_json::from_value(Json::String(raw.trim().to_lowercase())).map_err(|_| {
        ToolError::ArgumentError { tool: "timeseries_analyzer".into(), reason: format!("unknown freq '{raw}'") }
    })
}

fn parse_sort_order(raw: &str) -> Result<SortOrder, ToolError> {
    serde_json::from_value(Json::String(raw.trim().to_lowercase())).map_err(|_| {
        ToolError::ArgumentError { tool: "rank_entities".into(), reason: format!("unknown order '{raw}'") }
    })
}
