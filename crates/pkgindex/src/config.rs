use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PkgIndexError, Result};
use crate::fmri::version::DEFAULT_BUILD_RELEASE;

pub const DEFAULT_OPEN_TIMEOUT_MS: u64 = 1_000;
pub const DEFAULT_OPEN_RETRY_BACKOFF_MS: u64 = 10;
pub const DEFAULT_MAX_QUERY_TOKENS: usize = 100;

/// Tunables for opening and searching an index. Every field is optional in
/// the JSON form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// How long `consistent_open` keeps retrying a torn index.
    pub open_timeout_ms: u64,
    /// Pause between those retries.
    pub open_retry_backoff_ms: u64,
    pub max_query_tokens: usize,
    pub default_build_release: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            open_timeout_ms: DEFAULT_OPEN_TIMEOUT_MS,
            open_retry_backoff_ms: DEFAULT_OPEN_RETRY_BACKOFF_MS,
            max_query_tokens: DEFAULT_MAX_QUERY_TOKENS,
            default_build_release: DEFAULT_BUILD_RELEASE.to_string(),
        }
    }
}

impl IndexConfig {
    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.open_timeout_ms)
    }

    pub fn open_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.open_retry_backoff_ms)
    }

    pub fn from_json_str(data: &str) -> Result<Self> {
        serde_json::from_str(data)
            .map_err(|error| PkgIndexError::Config(format!("failed to parse index config: {error}")))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|error| {
            PkgIndexError::Config(format!("failed to read index config {}: {error}", path.display()))
        })?;
        Self::from_json_str(&data)
    }
}
