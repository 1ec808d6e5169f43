//! Package versions of the form `release[,build_release][-branch][:timestamp]`.
//!
//! `release`, `build_release` and `branch` are [`DotSequence`]s. The
//! timestamp is kept as its `YYYYMMDDTHHMMSSZ` string since that form
//! collates in date order. [`MatchingVersion`] is the relaxed variant used
//! for user supplied patterns, where any component may be `*`.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};

pub const DEFAULT_BUILD_RELEASE: &str = "5.11";

const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%SZ";
const WILDCARD: &str = "*";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VersionError {
    #[error("Illegal dot sequence: '{0}'")]
    IllegalDotSequence(String),

    #[error("{0}")]
    IllegalVersion(String),
}

/// How strictly [`Version::is_successor`] interprets "newer".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Constraint {
    /// Plain `>`.
    #[default]
    None,
    /// Every component present on the other side must prefix ours.
    Auto,
    Release,
    ReleaseMajor,
    ReleaseMinor,
    Branch,
    BranchMajor,
    BranchMinor,
}

// ---------------------------------------------------------------------------
// Dot sequences
// ---------------------------------------------------------------------------

/// A `x.y.z` sequence of non-negative integers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DotSequence(Vec<u64>);

impl DotSequence {
    pub fn parse(text: &str) -> Result<Self, VersionError> {
        let components = text
            .split('.')
            .map(parse_dot_component)
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| VersionError::IllegalDotSequence(text.to_string()))?;
        Ok(Self(components))
    }

    pub fn components(&self) -> &[u64] {
        &self.0
    }

    /// True if `other` starts with every component of `self`.
    pub fn is_subsequence(&self, other: &DotSequence) -> bool {
        self.0.len() <= other.0.len() && self.0.iter().zip(&other.0).all(|(a, b)| a == b)
    }

    pub fn is_same_major(&self, other: &DotSequence) -> bool {
        self.0.first() == other.0.first()
    }

    pub fn is_same_minor(&self, other: &DotSequence) -> bool {
        self.is_same_major(other) && self.0.get(1) == other.0.get(1)
    }
}

fn parse_dot_component(text: &str) -> Option<u64> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let value = text.parse::<u64>().ok()?;
    if value > 0 && text.starts_with('0') {
        return None;
    }
    Some(value)
}

impl fmt::Display for DotSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, value) in self.0.iter().enumerate() {
            if index > 0 {
                f.write_str(".")?;
            }
            write!(f, "{value}")?;
        }
        Ok(())
    }
}

impl FromStr for DotSequence {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchComponent {
    Any,
    Num(u64),
}

/// A dot sequence whose components may be `*`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MatchingDotSequence(Vec<MatchComponent>);

impl MatchingDotSequence {
    pub fn parse(text: &str) -> Result<Self, VersionError> {
        let components = text
            .split('.')
            .map(|part| {
                if part == WILDCARD {
                    Some(MatchComponent::Any)
                } else {
                    parse_dot_component(part).map(MatchComponent::Num)
                }
            })
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| VersionError::IllegalDotSequence(text.to_string()))?;
        Ok(Self(components))
    }

    pub fn wildcard() -> Self {
        Self(vec![MatchComponent::Any])
    }

    pub fn is_wildcard(&self) -> bool {
        self.0 == [MatchComponent::Any]
    }

    /// Wildcard-aware equality. A trailing `*` also absorbs any extra
    /// components on the other side.
    pub fn matches(&self, other: &DotSequence) -> bool {
        let other = other.components();
        let Some(&last) = self.0.last() else {
            return other.is_empty();
        };
        let len = self.0.len().max(other.len());
        for index in 0..len {
            match (self.0.get(index), other.get(index)) {
                (Some(MatchComponent::Num(a)), Some(b)) if a != b => return false,
                (None, Some(_)) if last != MatchComponent::Any => return false,
                (Some(MatchComponent::Num(_)), None) => return false,
                _ => {}
            }
        }
        true
    }

    /// Prefix test where only a whole-sequence `*` acts as a wildcard.
    pub fn is_subsequence(&self, other: &DotSequence) -> bool {
        if self.is_wildcard() {
            return true;
        }
        let other = other.components();
        self.0.len() <= other.len()
            && self
                .0
                .iter()
                .zip(other)
                .all(|(a, b)| *a == MatchComponent::Num(*b))
    }
}

impl fmt::Display for MatchingDotSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, value) in self.0.iter().enumerate() {
            if index > 0 {
                f.write_str(".")?;
            }
            match value {
                MatchComponent::Any => f.write_str(WILDCARD)?,
                MatchComponent::Num(value) => write!(f, "{value}")?,
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Version
// ---------------------------------------------------------------------------

/// Raw string pieces of a version before validation.
struct VersionParts<'a> {
    release: &'a str,
    build: Option<&'a str>,
    branch: Option<&'a str>,
    time: Option<&'a str>,
}

fn split_version(text: &str) -> VersionParts<'_> {
    let (rest, time) = match text.split_once(':') {
        Some((rest, time)) => (rest, Some(time)),
        None => (text, None),
    };
    let (rest, branch) = match rest.split_once('-') {
        Some((rest, branch)) => (rest, Some(branch)),
        None => (rest, None),
    };
    let (release, build) = match rest.split_once(',') {
        Some((release, build)) => (release, Some(build)),
        None => (rest, None),
    };
    VersionParts {
        release,
        build,
        branch,
        time,
    }
}

#[derive(Debug, Clone)]
pub struct Version {
    release: DotSequence,
    build_release: DotSequence,
    branch: Option<DotSequence>,
    timestr: Option<String>,
}

impl Version {
    /// Parses a version string. `build_release` is used when the string has
    /// no `,build` part; it defaults to [`DEFAULT_BUILD_RELEASE`].
    pub fn parse(text: &str, build_release: Option<&str>) -> Result<Self, VersionError> {
        if text.is_empty() {
            return Err(VersionError::IllegalVersion(
                "Version cannot be empty".to_string(),
            ));
        }
        let parts = split_version(text);
        if parts.release.is_empty() {
            return Err(VersionError::IllegalVersion(
                "Versions must have a release value".to_string(),
            ));
        }

        let bad = |error: VersionError| VersionError::IllegalVersion(format!("Bad Version: {error}"));
        let release = DotSequence::parse(parts.release).map_err(bad)?;
        let branch = parts
            .branch
            .map(DotSequence::parse)
            .transpose()
            .map_err(bad)?;
        let build_release = DotSequence::parse(
            parts
                .build
                .or(build_release)
                .unwrap_or(DEFAULT_BUILD_RELEASE),
        )
        .map_err(bad)?;

        let timestr = match parts.time {
            Some(time) => {
                validate_timestr(time)?;
                Some(time.to_string())
            }
            None => None,
        };

        Ok(Self {
            release,
            build_release,
            branch,
            timestr,
        })
    }

    pub fn release(&self) -> &DotSequence {
        &self.release
    }

    pub fn build_release(&self) -> &DotSequence {
        &self.build_release
    }

    pub fn branch(&self) -> Option<&DotSequence> {
        self.branch.as_ref()
    }

    pub fn timestr(&self) -> Option<&str> {
        self.timestr.as_deref()
    }

    pub fn get_version(&self, include_build: bool) -> String {
        let mut out = self.release.to_string();
        if include_build {
            out.push(',');
            out.push_str(&self.build_release.to_string());
        }
        if let Some(branch) = &self.branch {
            out.push('-');
            out.push_str(&branch.to_string());
        }
        if let Some(time) = &self.timestr {
            out.push(':');
            out.push_str(time);
        }
        out
    }

    /// `release[-branch]`.
    pub fn get_short_version(&self) -> String {
        match &self.branch {
            Some(branch) => format!("{}-{branch}", self.release),
            None => self.release.to_string(),
        }
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        let time = self.timestr.as_deref()?;
        NaiveDateTime::parse_from_str(time, TIMESTAMP_FORMAT)
            .ok()
            .map(|naive| naive.and_utc())
    }

    pub fn set_timestamp(&mut self, timestamp: DateTime<Utc>) {
        self.timestr = Some(timestamp.format(TIMESTAMP_FORMAT).to_string());
    }

    /// True if `self` is a successor of `other` under `constraint`.
    pub fn is_successor(&self, other: &Version, constraint: Constraint) -> bool {
        match constraint {
            Constraint::None => self > other,
            Constraint::Auto => {
                if !other.release.is_subsequence(&self.release) {
                    return false;
                }
                match (&other.branch, &self.branch) {
                    (Some(theirs), Some(ours)) if !theirs.is_subsequence(ours) => return false,
                    (Some(_), None) => return false,
                    _ => {}
                }
                match (&other.timestr, &self.timestr) {
                    (Some(theirs), Some(ours)) => theirs == ours,
                    (Some(_), None) => false,
                    _ => true,
                }
            }
            Constraint::Release => other.release.is_subsequence(&self.release),
            Constraint::ReleaseMajor => other.release.is_same_major(&self.release),
            Constraint::ReleaseMinor => other.release.is_same_minor(&self.release),
            Constraint::Branch => compare_branches(other, self, DotSequence::is_subsequence),
            Constraint::BranchMajor => compare_branches(other, self, DotSequence::is_same_major),
            Constraint::BranchMinor => compare_branches(other, self, DotSequence::is_same_minor),
        }
    }

    /// The `Auto` successor test against a user pattern.
    pub fn is_successor_of_pattern(&self, pattern: &MatchingVersion) -> bool {
        if !pattern.release.is_subsequence(&self.release) {
            return false;
        }
        match &self.branch {
            Some(ours) => {
                if !pattern.branch.is_subsequence(ours) {
                    return false;
                }
            }
            None if !pattern.branch.is_wildcard() => return false,
            None => {}
        }
        match &self.timestr {
            Some(ours) => pattern.timestr == WILDCARD || pattern.timestr == *ours,
            None => pattern.timestr == WILDCARD,
        }
    }
}

fn compare_branches(
    other: &Version,
    ours: &Version,
    predicate: fn(&DotSequence, &DotSequence) -> bool,
) -> bool {
    match (&other.branch, &ours.branch) {
        (Some(theirs), Some(ours)) => predicate(theirs, ours),
        (Some(_), None) => false,
        (None, _) => true,
    }
}

fn validate_timestr(time: &str) -> Result<(), VersionError> {
    let bytes = time.as_bytes();
    let well_formed = bytes.len() == 16
        && bytes[8] == b'T'
        && bytes[15] == b'Z'
        && bytes[..8].iter().all(u8::is_ascii_digit)
        && bytes[9..15].iter().all(u8::is_ascii_digit);
    if !well_formed || NaiveDateTime::parse_from_str(time, TIMESTAMP_FORMAT).is_err() {
        return Err(VersionError::IllegalVersion(
            "Time must be ISO8601 format.".to_string(),
        ));
    }
    Ok(())
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.get_version(true))
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s, None)
    }
}

// build_release records where the binaries were built; it does not take part
// in identity.
impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.release == other.release
            && self.branch == other.branch
            && self.timestr == other.timestr
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.release.hash(state);
        self.branch.hash(state);
        self.timestr.hash(state);
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.release
            .cmp(&other.release)
            .then_with(|| self.branch.cmp(&other.branch))
            .then_with(|| self.timestr.cmp(&other.timestr))
    }
}

// ---------------------------------------------------------------------------
// Matching version
// ---------------------------------------------------------------------------

/// A version pattern. Components after the release default to `*`, and
/// the literal `latest` is treated as `*`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MatchingVersion {
    release: MatchingDotSequence,
    build_release: MatchingDotSequence,
    branch: MatchingDotSequence,
    timestr: String,
    match_latest: bool,
    original: String,
}

impl MatchingVersion {
    pub fn parse(text: &str, build_release: Option<&str>) -> Result<Self, VersionError> {
        if text.is_empty() {
            return Err(VersionError::IllegalVersion(
                "Version cannot be empty".to_string(),
            ));
        }
        let match_latest = text == "latest";
        let text = if match_latest { WILDCARD } else { text };
        let parts = split_version(text);
        let build = parts.build.filter(|b| !b.is_empty()).or(build_release);

        let bad = |error: VersionError| VersionError::IllegalVersion(format!("Bad Version: {error}"));
        let release = MatchingDotSequence::parse(parts.release).map_err(bad)?;
        let parse_or_wildcard = |value: Option<&str>| match value.filter(|v| !v.is_empty()) {
            Some(value) => MatchingDotSequence::parse(value).map_err(bad),
            None => Ok(MatchingDotSequence::wildcard()),
        };
        let build_release = parse_or_wildcard(build)?;
        let branch = parse_or_wildcard(parts.branch)?;
        let timestr = parts
            .time
            .filter(|t| !t.is_empty())
            .unwrap_or(WILDCARD)
            .to_string();

        let mut original = parts.release.to_string();
        if let Some(build) = build {
            original.push(',');
            original.push_str(build);
        }
        if let Some(branch) = parts.branch {
            original.push('-');
            original.push_str(branch);
        }
        if let Some(time) = parts.time {
            original.push(':');
            original.push_str(time);
        }

        Ok(Self {
            release,
            build_release,
            branch,
            timestr,
            match_latest,
            original,
        })
    }

    pub fn is_latest(&self) -> bool {
        self.match_latest
    }

    /// Wildcard-aware equality against a concrete version.
    pub fn matches(&self, version: &Version) -> bool {
        let branch_matches = match &version.branch {
            Some(branch) => self.branch.matches(branch),
            None => self.branch.is_wildcard(),
        };
        let time_matches = self.timestr == WILDCARD || version.timestr() == Some(&self.timestr);
        self.release.matches(&version.release)
            && self.build_release.matches(&version.build_release)
            && branch_matches
            && time_matches
    }
}

impl fmt::Display for MatchingVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.match_latest {
            return f.write_str("latest");
        }
        f.write_str(&self.original)
    }
}
