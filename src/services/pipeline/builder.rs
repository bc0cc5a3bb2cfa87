//! Translates tool requests into deterministic aggregation pipelines.
//!
//! Every pipeline built here opens with the tenant prelude and is a literal
//! `Vec<bson::Document>` so it can be stored verbatim in
//! `AuditRecord.provenance.pipelines` and re-executed later.

use bson::{doc, Bson, Document};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use super::error::PipelineError;
use super::filter::{build_filter, tenant_prelude};

pub const DEFAULT_LIMIT: i64 = 100;
pub const MAX_LIMIT: i64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReductionOp {
    Sum,
    Avg,
    Count,
    CountDistinct,
    Min,
    Max,
    Median,
    Stddev,
}

impl ReductionOp {
    /// Metrics whose exact value must be finished off in the Numeric
    /// Kernel rather than trusted to a store-native accumulator.
    pub fn requires_application_reduction(self) -> bool {
        matches!(self, Self::Median | Self::Stddev | Self::CountDistinct)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Metric {
    pub op: ReductionOp,
    pub field: String,
    pub alias: Option<String>,
    pub group_by: Option<String>,
}

impl Metric {
    pub fn alias_or_default(&self) -> String {
        self.alias.clone().unwrap_or_else(|| format!("{:?}_{}", self.op, self.field).to_lowercase())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeFreq {
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

impl TimeFreq {
    /// The bson `$dateTrunc` unit for this bucket frequency.
    fn trunc_unit(self) -> &'static str {
        match self {
            Self::Day => "day",
            Self::Week => "week",
            Self::Month => "month",
            Self::Quarter => "quarter",
            Self::Year => "year",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    Desc,
}

/// A derived/composite-column extraction to inject as an upstream
/// `$project` stage before the rest of the pipeline runs.
#[derive(Debug, Clone)]
pub struct DerivedColumn {
    pub derived_name: String,
    pub source_column: String,
    pub extraction_pattern: String,
}

/// Checks that `derived`'s pattern actually extracts from sampled values of
/// its source column before the `$addFields`/`$regexFind` stage is built.
/// The store-native stage yields a silent `null` on a non-match, which
/// would bucket every failing row into one null group instead of surfacing
/// the failure — so the extraction is proved against real data up front.
pub fn validate_derived_column(
    derived: &DerivedColumn,
    sample_rows: &[Document],
) -> Result<(), PipelineError> {
    let fails = || PipelineError::DerivedColumnError {
        composite_column: derived.derived_name.clone(),
        pattern: derived.extraction_pattern.clone(),
    };
    let regex = Regex::new(&derived.extraction_pattern).map_err(|_| fails())?;

    let mut saw_value = false;
    for row in sample_rows {
        if let Some(value) = row.get(&derived.source_column).and_then(|v| v.as_str()) {
            saw_value = true;
            if regex.is_match(value) {
                return Ok(());
            }
        }
    }
    if saw_value {
        Err(fails())
    } else {
        Ok(())
    }
}

fn derived_column_stage(derived: &DerivedColumn) -> Document {
    doc! {
        "$addFields": {
            derived.derived_name.clone(): {
                "$let": {
                    "vars": {
                        "m": {
                            "$regexFind": {
                                "input": format!("${}", derived.source_column),
                                "regex": derived.extraction_pattern.clone(),
                            }
                        }
                    },
                    "in": { "$arrayElemAt": ["$$m.captures", 0] }
                }
            }
        }
    }
}

pub struct PipelineBuilder<'a> {
    pub user_id: &'a str,
    pub file_id: &'a str,
    pub table_name: &'a str,
    pub available_columns: &'a [String],
    pub temporal_columns: &'a [String],
}

impl<'a> PipelineBuilder<'a> {
    fn check_column(&self, column: &str) -> Result<(), PipelineError> {
        if self.available_columns.iter().any(|c| c == column) {
            Ok(())
        } else {
            Err(PipelineError::unknown_column(column, self.available_columns))
        }
    }

    fn prelude(&self) -> Document {
        tenant_prelude(self.user_id, self.file_id, self.table_name)
    }

    fn filter_stage(&self, filters: &Json) -> Result<Option<Document>, PipelineError> {
        let filter_doc = build_filter(filters, self.temporal_columns)?;
        if filter_doc.is_empty() {
            Ok(None)
        } else {
            Ok(Some(doc! { "$match": filter_doc }))
        }
    }

    /// `table_loader` / `statistical_summary` raw-row pipeline: prelude,
    /// optional filter, optional derived column, sampling.
    pub fn load_rows(
        &self,
        filters: &Json,
        derived: Option<&DerivedColumn>,
        limit: i64,
    ) -> Result<Vec<Document>, PipelineError> {
        let limit = limit.clamp(1, MAX_LIMIT);
        let mut pipeline = vec![self.prelude()];
        if let Some(stage) = self.filter_stage(filters)? {
            pipeline.push(stage);
        }
        if let Some(d) = derived {
            self.check_column(&d.source_column)?;
            pipeline.push(derived_column_stage(d));
        }
        pipeline.push(doc! { "$limit": limit });
        Ok(pipeline)
    }

    /// `agg_helper` pipeline: reduce `metrics` over the matched rows,
    /// optionally grouped by one `group_by` column shared across metrics
    /// that request it.
    pub fn reduce(
        &self,
        filters: &Json,
        metrics: &[Metric],
        derived: Option<&DerivedColumn>,
    ) -> Result<Vec<Document>, PipelineError> {
        if metrics.is_empty() {
            return Err(PipelineError::FilterGrammarError("metrics must be non-empty".into()));
        }
        for m in metrics {
            self.check_column(&m.field)?;
            if let Some(g) = &m.group_by {
                self.check_column(g)?;
            }
        }

        let mut pipeline = vec![self.prelude()];
        if let Some(stage) = self.filter_stage(filters)? {
            pipeline.push(stage);
        }
        if let Some(d) = derived {
            self.check_column(&d.source_column)?;
            pipeline.push(derived_column_stage(d));
        }

        let group_by = metrics.iter().find_map(|m| m.group_by.as_deref());
        let group_id: Bson = match group_by {
            Some(col) => Bson::String(format!("${col}")),
            None => Bson::Null,
        };

        let mut group_doc = doc! { "_id": group_id };
        for m in metrics {
            let alias = m.alias_or_default();
            let field_ref = format!("${}", m.field);
            let accumulator = match m.op {
                ReductionOp::Sum => doc! { "$sum": field_ref },
                ReductionOp::Avg => doc! { "$avg": field_ref },
                ReductionOp::Min => doc! { "$min": field_ref },
                ReductionOp::Max => doc! { "$max": field_ref },
                ReductionOp::Count => doc! { "$sum": 1 },
                ReductionOp::CountDistinct => doc! { "$addToSet": field_ref },
                ReductionOp::Median | ReductionOp::Stddev => doc! { "$push": field_ref },
            };
            group_doc.insert(alias, accumulator);
        }
        pipeline.push(doc! { "$group": group_doc });

        if group_by.is_some() {
            pipeline.push(doc! { "$sort": { "_id": 1 } });
        }

        Ok(pipeline)
    }

    /// `timeseries_analyzer` pipeline: bucket `time_col` at `freq`,
    /// reducing `metric_col` with `agg` inside each bucket.
    pub fn timeseries(
        &self,
        time_col: &str,
        metric_col: &str,
        freq: TimeFreq,
        agg: ReductionOp,
        start: Option<&str>,
        end: Option<&str>,
    ) -> Result<Vec<Document>, PipelineError> {
        self.check_column(time_col)?;
        self.check_column(metric_col)?;

        let mut pipeline = vec![self.prelude()];

        let mut range = Document::new();
        if let Some(s) = start {
            range.insert("$gte", parse_iso_date(s)?);
        }
        if let Some(e) = end {
            range.insert("$lte", parse_iso_date(e)?);
        }
        if !range.is_empty() {
            pipeline.push(doc! { "$match": { time_col: range } });
        }

        pipeline.push(doc! {
            "$addFields": {
                "__bucket": {
                    "$dateTrunc": {
                        "date": format!("${time_col}"),
                        "unit": freq.trunc_unit(),
                        // Weeks truncate to a Monday boundary, matching the
                        // Mon-start convention the spec requires.
                        "startOfWeek": "monday",
                    }
                }
            }
        });

        let accumulator = match agg {
            ReductionOp::Sum => doc! { "$sum": format!("${metric_col}") },
            ReductionOp::Avg => doc! { "$avg": format!("${metric_col}") },
            ReductionOp::Min => doc! { "$min": format!("${metric_col}") },
            ReductionOp::Max => doc! { "$max": format!("${metric_col}") },
            ReductionOp::Count => doc! { "$sum": 1 },
            ReductionOp::CountDistinct => doc! { "$addToSet": format!("${metric_col}") },
            ReductionOp::Median | ReductionOp::Stddev => doc! { "$push": format!("${metric_col}") },
        };
        pipeline.push(doc! {
            "$group": { "_id": "$__bucket", "value": accumulator }
        });
        pipeline.push(doc! { "$sort": { "_id": 1 } });

        Ok(pipeline)
    }

    /// `compare_entities`: a `$facet` stage running two parallel matches
    /// for `entity_a`/`entity_b` in one re-executable pipeline.
    pub fn compare(
        &self,
        key_col: &str,
        metric_col: &str,
        entity_a: &str,
        entity_b: &str,
        agg: ReductionOp,
        filters: &Json,
    ) -> Result<Vec<Document>, PipelineError> {
        self.check_column(key_col)?;
        self.check_column(metric_col)?;

        let mut pipeline = vec![self.prelude()];
        if let Some(stage) = self.filter_stage(filters)? {
            pipeline.push(stage);
        }

        let group_stage_for = |entity: &str| -> Document {
            let accumulator = match agg {
                ReductionOp::Sum => doc! { "$sum": format!("${metric_col}") },
                ReductionOp::Avg => doc! { "$avg": format!("${metric_col}") },
                ReductionOp::Min => doc! { "$min": format!("${metric_col}") },
                ReductionOp::Max => doc! { "$max": format!("${metric_col}") },
                ReductionOp::Count => doc! { "$sum": 1 },
                _ => doc! { "$push": format!("${metric_col}") },
            };
            doc! {
                "$group": { "_id": entity, "value": accumulator }
            }
        };

        pipeline.push(doc! {
            "$facet": {
                "entity_a": [
                    { "$match": { key_col: entity_a } },
                    group_stage_for(entity_a),
                ],
                "entity_b": [
                    { "$match": { key_col: entity_b } },
                    group_stage_for(entity_b),
                ],
            }
        });

        Ok(pipeline)
    }

    /// `rank_entities`: group by `key_col`, reduce `metric_col`, sort by
    /// value then key (ties broken ascending by key), limit `n`.
    pub fn rank(
        &self,
        key_col: &str,
        metric_col: &str,
        agg: ReductionOp,
        n: i64,
        order: SortOrder,
        filters: &Json,
    ) -> Result<Vec<Document>, PipelineError> {
        if n <= 0 {
            return Err(PipelineError::FilterGrammarError("n must be > 0".into()));
        }
        self.check_column(key_col)?;
        self.check_column(metric_col)?;

        let mut pipeline = vec![self.prelude()];
        if let Some(stage) = self.filter_stage(filters)? {
            pipeline.push(stage);
        }

        let accumulator = match agg {
            ReductionOp::Sum => doc! { "$sum": format!("${metric_col}") },
            ReductionOp::Avg => doc! { "$avg": format!("${metric_col}") },
            ReductionOp::Min => doc! { "$min": format!("${metric_col}") },
            ReductionOp::Max => doc! { "$max": format!("${metric_col}") },
            ReductionOp::Count => doc! { "$sum": 1 },
            ReductionOp::CountDistinct => doc! { "$addToSet": format!("${metric_col}") },
            ReductionOp::Median | ReductionOp::Stddev => doc! { "$push": format!("${metric_col}") },
        };
        pipeline.push(doc! {
            "$group": { "_id": format!("${key_col}"), "value": accumulator }
        });

        let sort_dir = if order == SortOrder::Desc { -1 } else { 1 };
        pipeline.push(doc! { "$sort": { "value": sort_dir, "_id": 1 } });
        pipeline.push(doc! { "$limit": n });

        Ok(pipeline)
    }

    /// Independent fast row count, always loaded alongside any tool that
    /// can return rows.
    pub fn row_count(&self, filters: &Json) -> Result<Vec<Document>, PipelineError> {
        let mut pipeline = vec![self.prelude()];
        if let Some(stage) = self.filter_stage(filters)? {
            pipeline.push(stage);
        }
        pipeline.push(doc! { "$count": "row_count" });
        Ok(pipeline)
    }
}

fn parse_iso_date(s: &str) -> Result<Bson, PipelineError> {
    let parsed = chrono::DateTime::parse_from_rfc3339(s)
        .map_err(|_| PipelineError::FilterGrammarError(format!("expected ISO-8601 date, got '{s}'")))?;
    Ok(Bson::DateTime(bson::DateTime::from_chrono(parsed.with_timezone(&chrono::Utc))))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder<'a>(cols: &'a [String], temporal: &'a [String]) -> PipelineBuilder<'a> {
        PipelineBuilder {
            user_id: "u1",
            file_id: "f1",
            table_name: "production",
            available_columns: cols,
            temporal_columns: temporal,
        }
    }

    #[test]
    fn reduce_pipeline_opens_with_tenant_prelude() {
        let cols = vec!["Actual_Qty".to_string()];
        let b = builder(&cols, &[]);
        let metrics =
            vec![Metric { op: ReductionOp::Sum, field: "Actual_Qty".into(), alias: None, group_by: None }];
        let pipeline = b.reduce(&serde_json::json!({}), &metrics, None).unwrap();
        let first = &pipeline[0];
        assert!(first.contains_key("$match"));
        let m = first.get_document("$match").unwrap();
        assert_eq!(m.get_str("user_id").unwrap(), "u1");
    }

    #[test]
    fn unknown_metric_column_is_rejected() {
        let cols = vec!["Actual_Qty".to_string()];
        let b = builder(&cols, &[]);
        let metrics =
            vec![Metric { op: ReductionOp::Sum, field: "Nonexistent".into(), alias: None, group_by: None }];
        let err = b.reduce(&serde_json::json!({}), &metrics, None).unwrap_err();
        assert!(matches!(err, PipelineError::UnknownColumn { .. }));
    }

    #[test]
    fn rank_rejects_non_positive_n() {
        let cols = vec!["Product".to_string(), "Failed_Qty".to_string()];
        let b = builder(&cols, &[]);
        let err = b
            .rank("Product", "Failed_Qty", ReductionOp::Sum, 0, SortOrder::Desc, &serde_json::json!({}))
            .unwrap_err();
        assert!(matches!(err, PipelineError::FilterGrammarError(_)));
    }

    #[test]
    fn rank_sorts_by_value_then_key_ascending() {
        let cols = vec!["Product".to_string(), "Failed_Qty".to_string()];
        let b = builder(&cols, &[]);
        let pipeline = b
            .rank("Product", "Failed_Qty", ReductionOp::Sum, 1, SortOrder::Desc, &serde_json::json!({}))
            .unwrap();
        let sort_stage = pipeline.iter().find(|s| s.contains_key("$sort")).unwrap();
        let sort_doc = sort_stage.get_document("$sort").unwrap();
        assert_eq!(sort_doc.get_i32("value").unwrap(), -1);
        assert_eq!(sort_doc.get_i32("_id").unwrap(), 1);
    }

    #[test]
    fn timeseries_truncates_weeks_to_monday() {
        let cols = vec!["Date".to_string(), "Actual_Qty".to_string()];
        let temporal = vec!["Date".to_string()];
        let b = builder(&cols, &temporal);
        let pipeline = b
            .timeseries("Date", "Actual_Qty", TimeFreq::Week, ReductionOp::Sum, None, None)
            .unwrap();
        let bucket_stage = pipeline.iter().find(|s| s.contains_key("$addFields")).unwrap();
        let trunc = bucket_stage
            .get_document("$addFields")
            .unwrap()
            .get_document("__bucket")
            .unwrap()
            .get_document("$dateTrunc")
            .unwrap();
        assert_eq!(trunc.get_str("startOfWeek").unwrap(), "monday");
    }

    #[test]
    fn derived_column_injects_addfields_with_regex_capture() {
        let cols = vec!["Line_Machine".to_string()];
        let b = builder(&cols, &[]);
        let derived = DerivedColumn {
            derived_name: "Line".into(),
            source_column: "Line_Machine".into(),
            extraction_pattern: r"^(Line-\d+)".into(),
        };
        let pipeline = b.load_rows(&serde_json::json!({}), Some(&derived), 100).unwrap();
        let project_stage = pipeline.iter().find(|s| s.contains_key("$addFields")).unwrap();
        assert!(project_stage.get_document("$addFields").unwrap().contains_key("Line"));
    }

    #[test]
    fn derived_column_validation_rejects_non_matching_samples() {
        let derived = DerivedColumn {
            derived_name: "Line".into(),
            source_column: "Line_Machine".into(),
            extraction_pattern: r"^(Line-\d+)".into(),
        };
        let samples = vec![doc! { "Line_Machine": "Assembly-West" }];
        let err = validate_derived_column(&derived, &samples).unwrap_err();
        assert!(matches!(err, PipelineError::DerivedColumnError { .. }));
    }

    #[test]
    fn derived_column_validation_accepts_a_matching_sample() {
        let derived = DerivedColumn {
            derived_name: "Line".into(),
            source_column: "Line_Machine".into(),
            extraction_pattern: r"^(Line-\d+)".into(),
        };
        let samples = vec![doc! { "Line_Machine": "Line-3-North" }];
        assert!(validate_derived_column(&derived, &samples).is_ok());
    }

    #[test]
    fn every_pipeline_kind_carries_the_prelude() {
        let cols = vec!["Actual_Qty".to_string(), "Product".to_string(), "Date".to_string()];
        let temporal = vec!["Date".to_string()];
        let b = builder(&cols, &temporal);
        let pipelines = vec![
            b.row_count(&serde_json::json!({})).unwrap(),
            b.load_rows(&serde_json::json!({}), None, 10).unwrap(),
            b.timeseries("Date", "Actual_Qty", TimeFreq::Day, ReductionOp::Sum, None, None).unwrap(),
        ];
        for p in pipelines {
            let m = p[0].get_document("$match").unwrap();
            assert_eq!(m.get_str("table_name").unwrap(), "production");
        }
    }
}
