//! Package FMRIs: `pkg://publisher/name@version`.
//!
//! A [`PkgFmri`] names a package, optionally pinned to a publisher and a
//! [`Version`]. Publishers may carry the preferred-publisher marker
//! (`_PRE_`), which catalogs use when merging the default publisher's
//! packages with everyone else's.

pub mod version;

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use crate::escape::quote_all;
use crate::text_match::fnmatch;
use version::{Version, VersionError};

/// Marker prefixed to the preferred publisher's name.
pub const PREF_PUB_PFX: &str = "_PRE";
const PREF_PUB_PFX_: &str = "_PRE_";

/// A package-name predicate: `(pkg_name, pattern) -> matched`.
pub type NameMatcher = fn(&str, &str) -> bool;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FmriErrorKind {
    #[error("{0}")]
    BadVersion(VersionError),

    #[error("Invalid Package Name: {0}")]
    BadPackageName(String),

    #[error("{0}")]
    Syntax(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FmriError {
    #[error("Illegal FMRI '{fmri}': {kind}")]
    Illegal { fmri: String, kind: FmriErrorKind },

    /// A malformed user pattern, as opposed to malformed catalog data.
    #[error("Illegal matching pattern '{fmri}': {kind}")]
    IllegalMatching { fmri: String, kind: FmriErrorKind },

    #[error("FMRI '{0}' is missing version information.")]
    MissingVersion(String),
}

impl FmriError {
    pub fn kind(&self) -> Option<&FmriErrorKind> {
        match self {
            Self::Illegal { kind, .. } | Self::IllegalMatching { kind, .. } => Some(kind),
            Self::MissingVersion(_) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Name validation
// ---------------------------------------------------------------------------

/// Checks `name` against the package name grammar: `/`-separated segments
/// that start with an ASCII alphanumeric and continue with alphanumerics or
/// `_-.+`.
pub fn is_valid_pkg_name(name: &str) -> bool {
    !name.is_empty()
        && name.split('/').all(|segment| {
            let mut bytes = segment.bytes();
            matches!(bytes.next(), Some(first) if first.is_ascii_alphanumeric())
                && bytes.all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.' | b'+'))
        })
}

fn is_valid_matching_name(name: &str) -> bool {
    name.bytes().all(|b| {
        b.is_ascii_alphanumeric()
            || matches!(b, b'_' | b'/' | b'-' | b'.' | b'+' | b'*' | b'?' | b'[' | b']')
    })
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Byte offsets of the pieces of an FMRI string.
struct FmriIndexes {
    version: Option<usize>,
    name: usize,
    publisher: Option<usize>,
}

fn fmri_indexes(text: &str) -> Result<FmriIndexes, FmriErrorKind> {
    let version = text.rfind('@');
    let head = &text[..version.unwrap_or(text.len())];
    let missing_slash = || FmriErrorKind::Syntax("Missing '/' after publisher name".to_string());

    let (name, publisher) = if text.starts_with("pkg://") {
        let slash = head.get(6..).and_then(|rest| rest.find('/')).ok_or_else(missing_slash)?;
        (6 + slash + 1, Some(6))
    } else if text.starts_with("pkg:/") {
        (5, None)
    } else if text.starts_with("//") {
        let slash = head.get(2..).and_then(|rest| rest.find('/')).ok_or_else(missing_slash)?;
        (2 + slash + 1, Some(2))
    } else if text.starts_with('/') {
        (1, None)
    } else {
        (0, None)
    };

    Ok(FmriIndexes {
        version,
        name,
        publisher,
    })
}

/// Returns the package name portion of an FMRI string without validating it.
pub fn extract_pkg_name(text: &str) -> Option<&str> {
    let text = text.trim_end();
    let indexes = fmri_indexes(text).ok()?;
    let end = indexes.version.unwrap_or(text.len());
    Some(text.get(indexes.name..end).unwrap_or(""))
}

// ---------------------------------------------------------------------------
// PkgFmri
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PkgFmri {
    publisher: Option<String>,
    pkg_name: String,
    version: Option<Version>,
}

impl PkgFmri {
    /// Parses an FMRI. A publisher embedded in `text` wins over `publisher`.
    pub fn parse(
        text: &str,
        build_release: Option<&str>,
        publisher: Option<&str>,
    ) -> Result<Self, FmriError> {
        Self::parse_with(text, build_release, publisher, is_valid_pkg_name).map_err(|kind| {
            FmriError::Illegal {
                fmri: text.to_string(),
                kind,
            }
        })
    }

    /// Parses a user supplied pattern, which may contain `*`, `?` and `[]`
    /// in the package name.
    pub fn matching_parse(text: &str, build_release: Option<&str>) -> Result<Self, FmriError> {
        Self::parse_with(text, build_release, None, is_valid_matching_name).map_err(|kind| {
            FmriError::IllegalMatching {
                fmri: text.to_string(),
                kind,
            }
        })
    }

    /// Builds an FMRI from parts that were already split apart.
    pub fn from_parts(
        name: &str,
        version: Option<&str>,
        build_release: Option<&str>,
        publisher: Option<&str>,
    ) -> Result<Self, FmriError> {
        let illegal = |kind| FmriError::Illegal {
            fmri: name.to_string(),
            kind,
        };
        let version = version
            .filter(|v| !v.is_empty())
            .map(|v| Version::parse(v, build_release))
            .transpose()
            .map_err(|error| illegal(FmriErrorKind::BadVersion(error)))?;
        if name.is_empty() {
            return Err(illegal(FmriErrorKind::Syntax("Missing package name".to_string())));
        }
        if !is_valid_pkg_name(name) {
            return Err(illegal(FmriErrorKind::BadPackageName(name.to_string())));
        }
        Ok(Self {
            publisher: publisher.filter(|p| !p.is_empty()).map(str::to_string),
            pkg_name: name.to_string(),
            version,
        })
    }

    fn parse_with(
        text: &str,
        build_release: Option<&str>,
        publisher: Option<&str>,
        valid_name: fn(&str) -> bool,
    ) -> Result<Self, FmriErrorKind> {
        let text = text.trim_end();
        let indexes = fmri_indexes(text)?;

        let publisher = match indexes.publisher {
            Some(start) => text.get(start..indexes.name - 1),
            None => publisher,
        };

        let (pkg_name, version) = match indexes.version {
            Some(at) => {
                let version = Version::parse(&text[at + 1..], build_release)
                    .map_err(FmriErrorKind::BadVersion)?;
                (text.get(indexes.name..at).unwrap_or(""), Some(version))
            }
            None => (&text[indexes.name..], None),
        };

        if pkg_name.is_empty() {
            return Err(FmriErrorKind::Syntax("Missing package name".to_string()));
        }
        if !valid_name(pkg_name) {
            return Err(FmriErrorKind::BadPackageName(pkg_name.to_string()));
        }

        Ok(Self {
            publisher: publisher.filter(|p| !p.is_empty()).map(str::to_string),
            pkg_name: pkg_name.to_string(),
            version,
        })
    }

    // -- publisher ----------------------------------------------------------

    /// The publisher with any preferred marker stripped.
    pub fn get_publisher(&self) -> Option<&str> {
        let publisher = self.publisher.as_deref()?;
        if publisher.starts_with(PREF_PUB_PFX) {
            return Some(publisher.rsplit_once('_').map_or(publisher, |(_, name)| name));
        }
        Some(publisher)
    }

    /// The publisher exactly as stored, marker included.
    pub fn get_publisher_str(&self) -> Option<&str> {
        self.publisher.as_deref()
    }

    pub fn set_publisher(&mut self, publisher: &str, preferred: bool) {
        self.publisher = if preferred && !publisher.starts_with(PREF_PUB_PFX) {
            Some(format!("{PREF_PUB_PFX}_{publisher}"))
        } else {
            Some(publisher.to_string())
        };
    }

    pub fn remove_publisher(&mut self) {
        self.publisher = None;
    }

    pub fn has_publisher(&self) -> bool {
        self.publisher.is_some()
    }

    /// True when there is no publisher or it carries the preferred marker.
    pub fn preferred_publisher(&self) -> bool {
        self.publisher
            .as_deref()
            .map_or(true, |publisher| publisher.starts_with(PREF_PUB_PFX))
    }

    // -- name and version ---------------------------------------------------

    pub fn name(&self) -> &str {
        &self.pkg_name
    }

    pub fn set_name(&mut self, name: &str) {
        self.pkg_name = name.to_string();
    }

    pub fn version(&self) -> Option<&Version> {
        self.version.as_ref()
    }

    pub fn has_version(&self) -> bool {
        self.version.is_some()
    }

    /// The short `release[-branch]` form of the version.
    pub fn get_version(&self) -> Option<String> {
        self.version.as_ref().map(Version::get_short_version)
    }

    pub fn set_timestamp(&mut self, timestamp: chrono::DateTime<chrono::Utc>) {
        if let Some(version) = self.version.as_mut() {
            version.set_timestamp(timestamp);
        }
    }

    pub fn tuple(&self) -> (Option<&str>, &str, Option<&Version>) {
        (self.publisher.as_deref(), &self.pkg_name, self.version.as_ref())
    }

    // -- rendering ----------------------------------------------------------

    fn rendered_publisher<'a>(&'a self, default_publisher: Option<&'a str>, anarchy: bool) -> Option<&'a str> {
        let publisher = self.publisher.as_deref().or(default_publisher);
        match publisher {
            Some(publisher) if !anarchy && !publisher.is_empty() && !publisher.starts_with(PREF_PUB_PFX) => {
                Some(publisher)
            }
            _ => None,
        }
    }

    /// Full string form. `anarchy` drops the publisher; a missing or
    /// preferred publisher is dropped too.
    pub fn get_fmri(&self, default_publisher: Option<&str>, anarchy: bool, include_scheme: bool) -> String {
        let version = self
            .version
            .as_ref()
            .map(|version| format!("@{version}"))
            .unwrap_or_default();
        self.render(default_publisher, anarchy, include_scheme, &version)
    }

    /// Like [`get_fmri`](Self::get_fmri) but with the short version form.
    pub fn get_short_fmri(&self, default_publisher: Option<&str>, anarchy: bool, include_scheme: bool) -> String {
        let version = self
            .version
            .as_ref()
            .map(|version| format!("@{}", version.get_short_version()))
            .unwrap_or_default();
        self.render(default_publisher, anarchy, include_scheme, &version)
    }

    /// The FMRI without any version.
    pub fn get_pkg_stem(&self, anarchy: bool, include_scheme: bool) -> String {
        self.render(None, anarchy, include_scheme, "")
    }

    fn render(&self, default_publisher: Option<&str>, anarchy: bool, include_scheme: bool, version: &str) -> String {
        match self.rendered_publisher(default_publisher, anarchy) {
            Some(publisher) => {
                let scheme = if include_scheme { "pkg://" } else { "" };
                format!("{scheme}{publisher}/{}{version}", self.pkg_name)
            }
            None => {
                let scheme = if include_scheme { "pkg:/" } else { "" };
                format!("{scheme}{}{version}", self.pkg_name)
            }
        }
    }

    /// Every suffix of the name that could refer to this package, shortest
    /// first: `a/b/c` yields `c`, `b/c`, `a/b/c`.
    pub fn hierarchical_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for segment in self.pkg_name.rsplit('/') {
            let name = match names.last() {
                Some(previous) => format!("{segment}/{previous}"),
                None => segment.to_string(),
            };
            names.push(name);
        }
        names
    }

    /// Escaped `name@version` fragment used for file names.
    pub fn get_link_path(&self, stem_only: bool) -> Result<String, FmriError> {
        self.escaped_path(stem_only, '@')
    }

    /// Escaped `name/version` fragment used for directory layouts.
    pub fn get_dir_path(&self, stem_only: bool) -> Result<String, FmriError> {
        self.escaped_path(stem_only, '/')
    }

    pub fn get_url_path(&self) -> Result<String, FmriError> {
        self.escaped_path(false, '@')
    }

    fn escaped_path(&self, stem_only: bool, separator: char) -> Result<String, FmriError> {
        let name = quote_all(&self.pkg_name);
        if stem_only {
            return Ok(name.into_owned());
        }
        let version = self
            .version
            .as_ref()
            .ok_or_else(|| FmriError::MissingVersion(self.to_string()))?;
        Ok(format!("{name}{separator}{}", quote_all(&version.to_string())))
    }

    // -- comparisons --------------------------------------------------------

    pub fn is_same_pkg(&self, other: &PkgFmri) -> bool {
        self.pkg_name == other.pkg_name
    }

    /// True if both name the same package and `self` is at least as new.
    pub fn is_successor(&self, other: &PkgFmri) -> bool {
        self.pkg_name == other.pkg_name && self.version >= other.version
    }
}

impl fmt::Display for PkgFmri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.get_fmri(None, false, true))
    }
}

impl FromStr for PkgFmri {
    type Err = FmriError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s, None, None)
    }
}

impl PartialEq for PkgFmri {
    fn eq(&self, other: &Self) -> bool {
        self.pkg_name == other.pkg_name
            && self.version == other.version
            && self.publisher == other.publisher
    }
}

impl Eq for PkgFmri {}

impl Hash for PkgFmri {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.pkg_name.hash(state);
        self.version.hash(state);
        self.publisher.hash(state);
    }
}

impl PartialOrd for PkgFmri {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PkgFmri {
    fn cmp(&self, other: &Self) -> Ordering {
        self.pkg_name
            .cmp(&other.pkg_name)
            .then_with(|| self.version.cmp(&other.version))
            .then_with(|| self.publisher.cmp(&other.publisher))
    }
}

// ---------------------------------------------------------------------------
// Publisher helpers and name matchers
// ---------------------------------------------------------------------------

/// Strips the preferred marker from a publisher name.
pub fn strip_pub_pfx(publisher: &str) -> &str {
    publisher.strip_prefix(PREF_PUB_PFX_).unwrap_or(publisher)
}

/// Compares publishers, treating `_PRE_x` and `x` as the same publisher.
///
/// Two marked publishers always compare equal, whatever their names. Catalog
/// merges have long relied on this.
pub fn is_same_publisher(first: Option<&str>, second: Option<&str>) -> bool {
    if first == second {
        return true;
    }
    let first = first.unwrap_or("");
    let second = second.unwrap_or("");
    if strip_marker_exact(second) == Some(first) || strip_marker_exact(first) == Some(second) {
        return true;
    }
    first.starts_with(PREF_PUB_PFX_) && second.starts_with(PREF_PUB_PFX_)
}

fn strip_marker_exact(publisher: &str) -> Option<&str> {
    publisher.strip_prefix(PREF_PUB_PFX_)
}

/// True if `pattern` names a trailing run of `/` segments of `pkg_name`.
pub fn fmri_match(pkg_name: &str, pattern: &str) -> bool {
    let name = format!("/{pkg_name}");
    let suffix = format!("/{pattern}");
    name.ends_with(&suffix)
}

/// Case-sensitive shell wildcard match.
pub fn glob_match(pkg_name: &str, pattern: &str) -> bool {
    fnmatch(pkg_name, pattern)
}

pub fn exact_name_match(pkg_name: &str, pattern: &str) -> bool {
    pkg_name == pattern
}
