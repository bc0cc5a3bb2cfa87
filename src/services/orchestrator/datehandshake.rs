//! Date-range clarification handshake (spec §4.5): pending tool-call
//! persistence plus the relative-phrase normalizer that resolves against
//! the dataset's own `max_date`, not wall-clock time, so answers replay
//! identically on re-execution.

use chrono::{DateTime, Duration, Utc};
use regex::Regex;

use crate::models::PendingDateRange;

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Parses a user utterance as a date range. `dataset_max` anchors relative
/// phrases ("last 30 days") so the same question always resolves to the
/// same window for a fixed dataset, regardless of when it is asked.
pub fn parse_date_range(text: &str, dataset_max: DateTime<Utc>) -> Option<ResolvedRange> {
    let text = text.trim();

    if let Some(range) = parse_relative_last(text, dataset_max) {
        return Some(range);
    }
    if let Some(range) = parse_iso_pair(text, "to") {
        return Some(range);
    }
    if let Some(range) = parse_iso_pair(text, "and") {
        return Some(range);
    }
    if let Some(start) = parse_since(text) {
        return Some(ResolvedRange { start, end: dataset_max });
    }
    None
}

fn parse_relative_last(text: &str, dataset_max: DateTime<Utc>) -> Option<ResolvedRange> {
    let re = Regex::new(r"(?i)last\s+(\d+)\s*(day|days|week|weeks|month|months)").ok()?;
    let caps = re.captures(text)?;
    let n: i64 = caps.get(1)?.as_str().parse().ok()?;
    let unit = caps.get(2)?.as_str().to_lowercase();
    let span = if unit.starts_with("day") {
        Duration::days(n)
    } else if unit.starts_with("week") {
        Duration::weeks(n)
    } else {
        Duration::days(n * 30)
    };
    Some(ResolvedRange { start: dataset_max - span, end: dataset_max })
}

fn parse_iso_pair(text: &str, joiner: &str) -> Option<ResolvedRange> {
    let pattern = format!(r"(?i)(\d{{4}}-\d{{2}}-\d{{2}})\s+{joiner}\s+(\d{{4}}-\d{{2}}-\d{{2}})");
    let re = Regex::new(&pattern).ok()?;
    let caps = re.captures(text)?;
    let start = parse_date_only(caps.get(1)?.as_str())?;
    let end = parse_date_only(caps.get(2)?.as_str())?;
    Some(ResolvedRange { start, end })
}

fn parse_since(text: &str) -> Option<DateTime<Utc>> {
    let re = Regex::new(r"(?i)since\s+(\d{4}-\d{2}-\d{2})").ok()?;
    let caps = re.captures(text)?;
    parse_date_only(caps.get(1)?.as_str())
}

fn parse_date_only(s: &str) -> Option<DateTime<Utc>> {
    let naive = chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()?;
    Some(DateTime::<Utc>::from_naive_utc_and_offset(naive.and_hms_opt(0, 0, 0)?, Utc))
}

/// Whether a pending tool call's observed range warrants the handshake:
/// unbounded span exceeding either threshold.
pub fn exceeds_threshold(
    min_date: DateTime<Utc>,
    max_date: DateTime<Utc>,
    row_count: i64,
    large_dataset_days: i64,
    large_dataset_rows: i64,
) -> bool {
    (max_date - min_date).num_days() >= large_dataset_days || row_count > large_dataset_rows
}

pub fn build_pending(
    min_date: DateTime<Utc>,
    max_date: DateTime<Utc>,
    time_column: &str,
    tool_name: &str,
    tool_args: &str,
) -> PendingDateRange {
    PendingDateRange {
        min_date,
        max_date,
        time_column: time_column.to_string(),
        tool_name: tool_name.to_string(),
        tool_args: tool_args.to_string(),
        clarification_attempts: 0,
    }
}

/// Re-injects a resolved range into the pending tool call's pipe-delimited
/// arguments at the two trailing `start`/`end` slots every time-bounded
/// tool accepts (`timeseries_analyzer`, `table_loader` via its
/// `filters_json`). Only the two tools whose signature ends in
/// `start?|end?` are supported; others are rejected as a caller error.
pub fn inject_range(pending: &PendingDateRange, range: &ResolvedRange) -> Option<String> {
    match pending.tool_name.as_str() {
        "timeseries_analyzer" => {
            let mut parts: Vec<String> = pending.tool_args.split('|').map(|s| s.to_string()).collect();
            parts.resize(8, String::new());
            parts[6] = range.start.to_rfc3339();
            parts[7] = range.end.to_rfc3339();
            Some(parts.join("|"))
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn max() -> DateTime<Utc> {
        parse_date_only("2026-07-26").unwrap()
    }

    #[test]
    fn resolves_last_n_days_against_dataset_max() {
        let range = parse_date_range("last 30 days", max()).unwrap();
        assert_eq!(range.end, max());
        assert_eq!(range.start, max() - Duration::days(30));
    }

    #[test]
    fn resolves_iso_pair() {
        let range = parse_date_range("2026-01-01 to 2026-02-01", max()).unwrap();
        assert_eq!(range.start, parse_date_only("2026-01-01").unwrap());
        assert_eq!(range.end, parse_date_only("2026-02-01").unwrap());
    }

    #[test]
    fn resolves_since_phrase_against_dataset_max() {
        let range = parse_date_range("since 2026-06-01", max()).unwrap();
        assert_eq!(range.start, parse_date_only("2026-06-01").unwrap());
        assert_eq!(range.end, max());
    }

    #[test]
    fn ambiguous_phrase_returns_none() {
        assert!(parse_date_range("sometime recently", max()).is_none());
    }

    #[test]
    fn threshold_trips_on_either_condition() {
        let min = parse_date_only("2023-01-01").unwrap();
        assert!(exceeds_threshold(min, max(), 5, 90, 10_000));
        assert!(exceeds_threshold(max() - Duration::days(1), max(), 20_000, 90, 10_000));
        assert!(!exceeds_threshold(max() - Duration::days(5), max(), 5, 90, 10_000));
    }

    #[test]
    fn injects_range_into_timeseries_args() {
        let pending = build_pending(min_date(), max(), "Date", "timeseries_analyzer", "f1|production|Date|Actual_Qty|month|sum||");
        let range = ResolvedRange { start: min_date(), end: max() };
        let injected = inject_range(&pending, &range).unwrap();
        assert!(injected.ends_with(&format!("{}|{}", min_date().to_rfc3339(), max().to_rfc3339())));
    }

    fn min_date() -> DateTime<Utc> {
        parse_date_only("2023-01-01").unwrap()
    }
}
