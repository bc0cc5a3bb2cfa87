//! In-memory `DocumentStore` fake.
//!
//! Interprets the constrained subset of aggregation stages this crate's
//! Pipeline Builder actually emits (`$match`, `$addFields` with the
//! `$let`/`$regexFind` derived-column shape, `$group`, `$sort`, `$limit`,
//! `$count`, `$facet`) well enough to drive pipeline/tool tests without a
//! live MongoDB server.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use bson::{Bson, Document};

use super::{DocumentStore, StoreError};

#[derive(Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<String, Vec<Document>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_many(&self, collection: &str, docs: Vec<Document>) {
        let mut guard = self.collections.lock().expect("memory store mutex poisoned");
        guard.entry(collection.to_string()).or_default().extend(docs);
    }

    fn snapshot(&self, collection: &str) -> Vec<Document> {
        let guard = self.collections.lock().expect("memory store mutex poisoned");
        guard.get(collection).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn aggregate(
        &self,
        collection: &str,
        pipeline: Vec<Document>,
    ) -> Result<Vec<Document>, StoreError> {
        let mut rows = self.snapshot(collection);
        for stage in &pipeline {
            rows = run_stage(stage, rows)?;
        }
        Ok(rows)
    }

    async fn count(&self, collection: &str, filter: Document) -> Result<i64, StoreError> {
        let rows = self.snapshot(collection);
        let matched: Vec<Document> =
            rows.into_iter().filter(|r| matches_filter(&filter, r)).collect();
        Ok(matched.len() as i64)
    }

    async fn find_one(
        &self,
        collection: &str,
        filter: Document,
        _projection: Option<Document>,
    ) -> Result<Option<Document>, StoreError> {
        let rows = self.snapshot(collection);
        Ok(rows.into_iter().find(|r| matches_filter(&filter, r)))
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
        upsert: bool,
    ) -> Result<(), StoreError> {
        let mut guard = self.collections.lock().expect("memory store mutex poisoned");
        let rows = guard.entry(collection.to_string()).or_default();

        if let Some(existing) = rows.iter_mut().find(|r| matches_filter(&filter, r)) {
            apply_update(existing, &update);
            return Ok(());
        }

        if upsert {
            let mut new_doc = Document::new();
            for (k, v) in filter.iter() {
                new_doc.insert(k.clone(), v.clone());
            }
            apply_update(&mut new_doc, &update);
            rows.push(new_doc);
        }
        Ok(())
    }
}

fn apply_update(doc: &mut Document, update: &Document) {
    if let Some(set) = update.get_document("$set").ok() {
        for (k, v) in set.iter() {
            doc.insert(k.clone(), v.clone());
        }
    } else {
        for (k, v) in update.iter() {
            doc.insert(k.clone(), v.clone());
        }
    }
}

fn run_stage(stage: &Document, rows: Vec<Document>) -> Result<Vec<Document>, StoreError> {
    let (name, value) = stage
        .iter()
        .next()
        .ok_or_else(|| StoreError::Transport("empty pipeline stage".into()))?;

    match name.as_str() {
        "$match" => {
            let filter = value.as_document().ok_or_else(|| {
                StoreError::Transport("$match requires a document".into())
            })?;
            Ok(rows.into_iter().filter(|r| matches_filter(filter, r)).collect())
        },
        "$addFields" => {
            let spec = value
                .as_document()
                .ok_or_else(|| StoreError::Transport("$addFields requires a document".into()))?;
            Ok(rows
                .into_iter()
                .map(|mut r| {
                    for (field, expr) in spec.iter() {
                        let computed = eval_expr(expr, &r);
                        r.insert(field.clone(), computed);
                    }
                    r
                })
                .collect())
        },
        "$sort" => {
            let spec = value
                .as_document()
                .ok_or_else(|| StoreError::Transport("$sort requires a document".into()))?;
            let keys: Vec<(String, i64)> = spec
                .iter()
                .map(|(k, v)| (k.clone(), v.as_i32().map(i64::from).unwrap_or(1)))
                .collect();
            let mut rows = rows;
            rows.sort_by(|a, b| {
                for (key, dir) in &keys {
                    let av = a.get(key).cloned().unwrap_or(Bson::Null);
                    let bv = b.get(key).cloned().unwrap_or(Bson::Null);
                    let ord = compare_bson(&av, &bv);
                    let ord = if *dir < 0 { ord.reverse() } else { ord };
                    if ord != std::cmp::Ordering::Equal {
                        return ord;
                    }
                }
                std::cmp::Ordering::Equal
            });
            Ok(rows)
        },
        "$limit" => {
            let n = value.as_i64().or_else(|| value.as_i32().map(i64::from)).unwrap_or(0);
            Ok(rows.into_iter().take(n.max(0) as usize).collect())
        },
        "$count" => {
            let field = value.as_str().unwrap_or("count");
            let mut doc = Document::new();
            doc.insert(field, rows.len() as i64);
            Ok(vec![doc])
        },
        "$group" => run_group(value, rows),
        "$facet" => run_facet(value, rows),
        other => Err(StoreError::Transport(format!("unsupported stage '{other}' in memory store"))),
    }
}

fn run_group(spec: &Bson, rows: Vec<Document>) -> Result<Vec<Document>, StoreError> {
    let spec = spec.as_document().ok_or_else(|| StoreError::Transport("$group requires a document".into()))?;
    let id_expr = spec.get("_id").ok_or_else(|| StoreError::Transport("$group missing _id".into()))?;

    let accumulators: Vec<(String, &Document)> = spec
        .iter()
        .filter(|(k, _)| k.as_str() != "_id")
        .filter_map(|(k, v)| v.as_document().map(|d| (k.clone(), d)))
        .collect();

    let mut groups: Vec<(Bson, Vec<Document>)> = Vec::new();
    for row in rows {
        let key = eval_expr(id_expr, &row);
        match groups.iter_mut().find(|(k, _)| bson_eq(k, &key)) {
            Some((_, bucket)) => bucket.push(row),
            None => groups.push((key, vec![row])),
        }
    }

    let mut out = Vec::new();
    for (key, bucket) in groups {
        let mut doc = Document::new();
        doc.insert("_id", key);
        for (alias, accumulator_doc) in &accumulators {
            let (op, expr) = accumulator_doc
                .iter()
                .next()
                .ok_or_else(|| StoreError::Transport("empty accumulator".into()))?;
            let value = apply_accumulator(op, expr, &bucket);
            doc.insert(alias.clone(), value);
        }
        out.push(doc);
    }
    Ok(out)
}

fn apply_accumulator(op: &str, expr: &Bson, bucket: &[Document]) -> Bson {
    let values: Vec<Bson> = bucket.iter().map(|r| eval_expr(expr, r)).collect();
    match op {
        "$sum" => {
            if let Bson::Int32(n) = expr {
                return Bson::Int64(*n as i64 * bucket.len() as i64);
            }
            sum_numeric(&values)
        },
        "$avg" => {
            let numeric: Vec<f64> = values.iter().filter_map(bson_as_f64).collect();
            if numeric.is_empty() {
                Bson::Null
            } else {
                Bson::Double(numeric.iter().sum::<f64>() / numeric.len() as f64)
            }
        },
        "$min" => values.into_iter().filter(|v| !matches!(v, Bson::Null)).min_by(compare_bson).unwrap_or(Bson::Null),
        "$max" => values.into_iter().filter(|v| !matches!(v, Bson::Null)).max_by(compare_bson).unwrap_or(Bson::Null),
        "$push" => Bson::Array(values),
        "$addToSet" => {
            let mut set: Vec<Bson> = Vec::new();
            for v in values {
                if !set.iter().any(|existing| bson_eq(existing, &v)) {
                    set.push(v);
                }
            }
            Bson::Array(set)
        },
        _ => Bson::Null,
    }
}

fn sum_numeric(values: &[Bson]) -> Bson {
    use rust_decimal::Decimal;
    use std::str::FromStr;

    let mut total = Decimal::ZERO;
    for v in values {
        let d = match v {
            Bson::Int32(n) => Decimal::from(*n),
            Bson::Int64(n) => Decimal::from(*n),
            Bson::Double(f) => Decimal::from_str(&f.to_string()).unwrap_or(Decimal::ZERO),
            Bson::Decimal128(d) => Decimal::from_str(&d.to_string()).unwrap_or(Decimal::ZERO),
            _ => continue,
        };
        total += d;
    }
    Bson::String(total.normalize().to_string())
}

fn run_facet(spec: &Bson, rows: Vec<Document>) -> Result<Vec<Document>, StoreError> {
    let spec = spec.as_document().ok_or_else(|| StoreError::Transport("$facet requires a document".into()))?;
    let mut out = Document::new();
    for (key, sub_pipeline) in spec.iter() {
        let stages = sub_pipeline
            .as_array()
            .ok_or_else(|| StoreError::Transport("$facet branch must be an array".into()))?;
        let mut branch_rows = rows.clone();
        for stage in stages {
            let stage_doc = stage
                .as_document()
                .ok_or_else(|| StoreError::Transport("$facet stage must be a document".into()))?;
            branch_rows = run_stage(stage_doc, branch_rows)?;
        }
        out.insert(key.clone(), Bson::Array(branch_rows.into_iter().map(Bson::Document).collect()));
    }
    Ok(vec![out])
}

fn matches_filter(filter: &Document, row: &Document) -> bool {
    filter.iter().all(|(col, expected)| match expected {
        Bson::Document(ops) if ops.keys().all(|k| k.starts_with('$')) => {
            ops.iter().all(|(op, operand)| eval_operator(op, operand, row.get(col)))
        },
        literal => row.get(col).map(|v| bson_eq(v, literal)).unwrap_or(false),
    })
}

fn eval_operator(op: &str, operand: &Bson, actual: Option<&Bson>) -> bool {
    let actual = match actual {
        Some(v) => v,
        None => return op == "$ne",
    };
    match op {
        "$eq" => bson_eq(actual, operand),
        "$ne" => !bson_eq(actual, operand),
        "$gt" => compare_bson(actual, operand) == std::cmp::Ordering::Greater,
        "$gte" => compare_bson(actual, operand) != std::cmp::Ordering::Less,
        "$lt" => compare_bson(actual, operand) == std::cmp::Ordering::Less,
        "$lte" => compare_bson(actual, operand) != std::cmp::Ordering::Greater,
        "$in" => operand.as_array().map(|a| a.iter().any(|v| bson_eq(v, actual))).unwrap_or(false),
        "$nin" => !operand.as_array().map(|a| a.iter().any(|v| bson_eq(v, actual))).unwrap_or(false),
        "$regex" => {
            let pattern = operand.as_str().unwrap_or("");
            let text = actual.as_str().unwrap_or("");
            regex::Regex::new(pattern).map(|re| re.is_match(text)).unwrap_or(false)
        },
        "$options" => true,
        _ => false,
    }
}

fn eval_expr(expr: &Bson, row: &Document) -> Bson {
    match expr {
        Bson::String(s) if s.starts_with('$') => {
            row.get(&s[1..]).cloned().unwrap_or(Bson::Null)
        },
        Bson::Document(doc) if doc.contains_key("$let") => eval_let(doc, row),
        Bson::Document(doc) if doc.contains_key("$regexFind") => eval_regex_find(doc, row),
        Bson::Document(doc) if doc.contains_key("$arrayElemAt") => eval_array_elem_at(doc, row),
        other => other.clone(),
    }
}

fn eval_let(doc: &Document, row: &Document) -> Bson {
    let let_spec = doc.get_document("$let").expect("checked by caller");
    let vars = let_spec.get_document("vars").cloned().unwrap_or_default();
    let mut scoped_row = row.clone();
    for (var_name, var_expr) in vars.iter() {
        let value = eval_expr(var_expr, row);
        scoped_row.insert(format!("$${var_name}"), value);
    }
    let in_expr = let_spec.get("in").cloned().unwrap_or(Bson::Null);
    eval_expr_with_vars(&in_expr, &scoped_row)
}

fn eval_expr_with_vars(expr: &Bson, scoped_row: &Document) -> Bson {
    match expr {
        Bson::Document(doc) if doc.contains_key("$arrayElemAt") => {
            let args = doc.get_array("$arrayElemAt").expect("checked above");
            let array_ref = args.first().cloned().unwrap_or(Bson::Null);
            let idx = args.get(1).and_then(Bson::as_i32).unwrap_or(0);
            let array = resolve_var(&array_ref, scoped_row);
            match array {
                Bson::Array(items) => items.get(idx as usize).cloned().unwrap_or(Bson::Null),
                _ => Bson::Null,
            }
        },
        other => eval_expr(other, scoped_row),
    }
}

fn resolve_var(expr: &Bson, scoped_row: &Document) -> Bson {
    if let Bson::String(s) = expr {
        if let Some(key) = s.strip_prefix("$$") {
            return scoped_row.get(&format!("$${key}")).cloned().unwrap_or(Bson::Null);
        }
    }
    eval_expr(expr, scoped_row)
}

fn eval_regex_find(doc: &Document, row: &Document) -> Bson {
    let spec = doc.get_document("$regexFind").expect("checked by caller");
    let input_expr = spec.get("input").cloned().unwrap_or(Bson::Null);
    let input = eval_expr(&input_expr, row);
    let text = input.as_str().unwrap_or("");
    let pattern = spec.get_str("regex").unwrap_or("");

    match regex::Regex::new(pattern) {
        Ok(re) => match re.captures(text) {
            Some(caps) => {
                let captures: Vec<Bson> = caps
                    .iter()
                    .skip(1)
                    .map(|m| m.map(|m| Bson::String(m.as_str().to_string())).unwrap_or(Bson::Null))
                    .collect();
                let mut result = Document::new();
                result.insert("match", caps.get(0).map(|m| m.as_str()).unwrap_or(""));
                result.insert("captures", captures);
                Bson::Document(result)
            },
            None => Bson::Null,
        },
        Err(_) => Bson::Null,
    }
}

fn eval_array_elem_at(doc: &Document, row: &Document) -> Bson {
    let args = doc.get_array("$arrayElemAt").expect("checked by caller");
    let array = args.first().map(|e| eval_expr(e, row)).unwrap_or(Bson::Null);
    let idx = args.get(1).and_then(Bson::as_i32).unwrap_or(0);
    match array {
        Bson::Array(items) => items.get(idx as usize).cloned().unwrap_or(Bson::Null),
        _ => Bson::Null,
    }
}

fn bson_eq(a: &Bson, b: &Bson) -> bool {
    compare_bson(a, b) == std::cmp::Ordering::Equal
}

fn bson_as_f64(v: &Bson) -> Option<f64> {
    match v {
        Bson::Int32(n) => Some(*n as f64),
        Bson::Int64(n) => Some(*n as f64),
        Bson::Double(f) => Some(*f),
        Bson::Decimal128(d) => d.to_string().parse().ok(),
        _ => None,
    }
}

fn compare_bson(a: &Bson, b: &Bson) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (a, b) {
        (Bson::Null, Bson::Null) => Ordering::Equal,
        (Bson::Null, _) => Ordering::Less,
        (_, Bson::Null) => Ordering::Greater,
        (Bson::String(x), Bson::String(y)) => x.cmp(y),
        (Bson::Boolean(x), Bson::Boolean(y)) => x.cmp(y),
        _ => match (bson_as_f64(a), bson_as_f64(b)) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            _ => Ordering::Equal,
        },
    }
}
