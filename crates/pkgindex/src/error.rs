use std::path::PathBuf;

use crate::catalog::BadFileMode;
use crate::fmri::version::VersionError;
use crate::fmri::FmriError;
use crate::query::ParseError;

#[derive(Debug, thiserror::Error)]
pub enum PkgIndexError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Fmri(#[from] FmriError),

    #[error(transparent)]
    Version(#[from] VersionError),

    #[error("Duplicate package: {0}")]
    DuplicatePackage(String),

    #[error("Unversioned FMRI not supported: {0}")]
    UnversionedFmri(String),

    #[error("corrupt catalog entry for publisher '{publisher}': {entry}")]
    CorruptCatalog { publisher: String, entry: String },

    #[error(
        "The following catalog files have incorrect permissions:\n{}",
        format_bad_modes(.0)
    )]
    CatalogPermissions(Vec<BadFileMode>),

    #[error(
        "Index corrupted, remove all files and rebuild from scratch by clearing out {} and restarting the depot.",
        .dir.display()
    )]
    InconsistentIndex { dir: PathBuf },

    #[error("Could not find index to search, looked in: {}", .dir.display())]
    NoIndex { dir: PathBuf },

    #[error("existing_val was:{existing}\nincoming_val was:{incoming}")]
    IncorrectIndexFileHash { existing: String, incoming: String },

    #[error("corrupt index file {}: {detail}", .path.display())]
    CorruptIndex { path: PathBuf, detail: String },

    #[error("{0}")]
    QueryParse(Box<ParseError>),

    #[error(
        "This expression produces action results:\n\t{actions}\nThis expression produces package results:\n\t{packages}\n'AND' and 'OR' require those expressions to produce the same type of results."
    )]
    BooleanQuery { actions: String, packages: String },

    #[error("The number of terms in the query is {count}, which exceeds the maximum supported value of {max} terms.")]
    QueryLengthExceeded { count: usize, max: usize },

    #[error("A query is expected to have five fields: case sensitivity, return type, number of results to return, the number at which to start returning results, and the text of the query.  The query provided lacked at least one of those fields:\n{0}")]
    IncompleteQuery(String),

    #[error("In query {query}, {name} had a bad value of '{value}'.")]
    DetailedValue {
        name: String,
        value: String,
        query: String,
    },

    #[error("Unknown field type: {0}")]
    UnknownFieldType(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl From<ParseError> for PkgIndexError {
    fn from(error: ParseError) -> Self {
        Self::QueryParse(Box::new(error))
    }
}

fn format_bad_modes(files: &[BadFileMode]) -> String {
    files.iter().map(ToString::to_string).collect()
}

pub type Result<T> = std::result::Result<T, PkgIndexError>;

/// Returns true for errors that mean the caller may not write at that path.
pub(crate) fn is_permission_error(error: &std::io::Error) -> bool {
    if error.kind() == std::io::ErrorKind::PermissionDenied {
        return true;
    }
    // EROFS has no stable ErrorKind on older toolchains.
    matches!(error.raw_os_error(), Some(30))
}
