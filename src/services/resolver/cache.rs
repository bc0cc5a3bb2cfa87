//! In-process TTL cache for resolver results, keyed on the resolver's
//! entire deterministic input so identical `(purpose, column_list,
//! sample_row)` calls return identical answers within the TTL window —
//! the resolver's statelessness property, honored via a reconstructible
//! cache rather than a database table.

use std::time::{Duration, Instant};

use dashmap::DashMap;

use super::resolver::ColumnResolution;

#[derive(Hash, Eq, PartialEq, Clone)]
struct CacheKey {
    purpose: String,
    columns: Vec<String>,
    sample_row: String,
}

struct CacheEntry {
    value: ColumnResolution,
    inserted_at: Instant,
}

pub struct ResolverCache {
    entries: DashMap<CacheKey, CacheEntry>,
    ttl: Duration,
}

impl ResolverCache {
    pub fn new(ttl: Duration) -> Self {
        Self { entries: DashMap::new(), ttl }
    }

    pub fn with_default_ttl() -> Self {
        Self::new(Duration::from_secs(600))
    }

    fn key(purpose: &str, columns: &[String], sample_row: &serde_json::Value) -> CacheKey {
        CacheKey {
            purpose: purpose.to_string(),
            columns: columns.to_vec(),
            sample_row: sample_row.to_string(),
        }
    }

    pub fn get(
        &self,
        purpose: &str,
        columns: &[String],
        sample_row: &serde_json::Value,
    ) -> Option<ColumnResolution> {
        let key = Self::key(purpose, columns, sample_row);
        let entry = self.entries.get(&key)?;
        if entry.inserted_at.elapsed() > self.ttl {
            drop(entry);
            self.entries.remove(&key);
            return None;
        }
        Some(entry.value.clone())
    }

    pub fn put(
        &self,
        purpose: &str,
        columns: &[String],
        sample_row: &serde_json::Value,
        value: ColumnResolution,
    ) {
        let key = Self::key(purpose, columns, sample_row);
        self.entries.insert(key, CacheEntry { value, inserted_at: Instant::now() });
    }
}

impl Default for ResolverCache {
    fn default() -> Self {
        Self::with_default_ttl()
    }
}
