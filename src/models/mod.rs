pub mod analytics;

pub use analytics::*;
