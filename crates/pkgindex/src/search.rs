//! Query evaluation against an on-disk search index.
//!
//! This module provides:
//! - The IndexManager API with shared, refreshable index snapshots
//! - Evaluation of parsed queries into action or package results
//! - The manifest access and tokenizing seam

mod engine;
#[cfg(test)]
mod fixture;
mod manager;
mod term;
mod tokenize;

pub use engine::{ActionHit, ActionResult, QueryResult, SearchHit, SEARCH_PROTOCOL_VERSION};
pub use manager::{IndexManager, IndexSnapshot, SearchStats};
pub use tokenize::{ActionToken, ManifestDir, ManifestSource, SimpleActionTokenizer};
