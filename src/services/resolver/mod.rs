//! Semantic Column Resolver (C3) — AI-assisted mapping from free-form
//! column intent to concrete dataset columns, with keyword fallback and
//! optional composite-column extraction.

mod cache;
mod error;
mod lexicon;
mod resolver;

pub use cache::ResolverCache;
pub use error::ResolverError;
pub use resolver::{resolve_columns, ColumnResolution, ExtractionSpec, ResolutionSource};
