//! Semantic Column Resolver error taxonomy.
//!
//! The resolver never throws on an LLM or parsing failure — that path falls
//! back to the keyword heuristic per protocol. These variants cover the
//! caller-input class of mistake instead (a malformed extraction pattern
//! the resolver itself would otherwise accept).

#[derive(Debug, Clone, thiserror::Error)]
pub enum ResolverError {
    #[error("extraction pattern '{0}' must compile and have exactly one capture group")]
    InvalidExtractionPattern(String),
}
