//! Package catalog and search index library.
//!
//! This crate provides:
//! - FMRI parsing, comparison and pattern matching
//! - Catalog files with attributes, merging and package listing
//! - The on-disk search index stores and their consistent opening
//! - Query parsing and evaluation against a shared index snapshot

pub mod catalog;
pub mod config;
pub mod error;
pub mod escape;
pub mod fmri;
pub mod persist;
pub mod query;
pub mod search;
pub mod storage;
pub mod text_match;

// Re-export main types
pub use catalog::{Catalog, MatchResult};
pub use config::IndexConfig;
pub use error::{PkgIndexError, Result};
pub use fmri::version::{Constraint, Version};
pub use fmri::PkgFmri;
pub use query::{ParseError, Query, QueryParser, ReturnType, TopQuery};
pub use search::{IndexManager, ManifestDir, ManifestSource, QueryResult, SearchHit};
