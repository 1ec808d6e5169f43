//! Where manifests live and how their action lines break into tokens.

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::fmri::PkgFmri;

/// One indexable token produced from an action line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionToken {
    pub action_type: String,
    pub key: String,
    pub token: String,
    pub full_value: String,
}

/// Access to the manifests an index was built from.
pub trait ManifestSource: Send + Sync {
    fn manifest_path(&self, fmri: &PkgFmri) -> Result<PathBuf>;

    /// Tokens the indexer would have produced for `line`.
    fn tokenize(&self, line: &str) -> Vec<ActionToken> {
        SimpleActionTokenizer.tokenize(line)
    }
}

/// Manifests stored as `<root>/<quoted name>/<quoted version>`.
#[derive(Debug, Clone)]
pub struct ManifestDir {
    root: PathBuf,
}

impl ManifestDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ManifestSource for ManifestDir {
    fn manifest_path(&self, fmri: &PkgFmri) -> Result<PathBuf> {
        Ok(self.root.join(fmri.get_dir_path(false)?))
    }
}

/// Reads `name key=value key="quoted value" ...` lines.
///
/// Every whitespace separated word of a value is a token, as is every
/// component of a value containing `/`. The whole value is carried along
/// as the full value.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleActionTokenizer;

impl SimpleActionTokenizer {
    pub fn tokenize(&self, line: &str) -> Vec<ActionToken> {
        let line = line.trim();
        let (action_type, rest) = line.split_once(' ').unwrap_or((line, ""));
        if action_type.is_empty() {
            return Vec::new();
        }

        let mut tokens = Vec::new();
        for (key, value) in attributes(rest) {
            let mut push = |token: &str| {
                if token.is_empty() || tokens.iter().any(|t: &ActionToken| t.key == key && t.token == token) {
                    return;
                }
                tokens.push(ActionToken {
                    action_type: action_type.to_string(),
                    key: key.to_string(),
                    token: token.to_string(),
                    full_value: value.to_string(),
                });
            };
            for word in value.split_whitespace() {
                push(word);
            }
            if value.contains('/') {
                for component in value.split('/') {
                    push(component);
                }
            }
        }
        tokens
    }
}

/// Splits `key=value` pairs. Values may be wrapped in single or double
/// quotes to include spaces. Pieces without `=` are skipped.
fn attributes(text: &str) -> Vec<(&str, &str)> {
    let mut pairs = Vec::new();
    let mut rest = text.trim_start();
    while !rest.is_empty() {
        let piece_end = rest.find(' ').unwrap_or(rest.len());
        let Some(eq) = rest[..piece_end].find('=') else {
            rest = rest[piece_end..].trim_start();
            continue;
        };
        let key = &rest[..eq];
        let after = &rest[eq + 1..];
        let (value, remaining) = match after.chars().next() {
            Some(quote @ ('"' | '\'')) => match after[1..].find(quote) {
                Some(close) => (&after[1..close + 1], &after[close + 2..]),
                None => (&after[1..], ""),
            },
            _ => {
                let end = after.find(' ').unwrap_or(after.len());
                (&after[..end], &after[end..])
            }
        };
        pairs.push((key, value));
        rest = remaining.trim_start();
    }
    pairs
}
