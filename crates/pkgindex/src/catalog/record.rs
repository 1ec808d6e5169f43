//! Catalog line records.
//!
//! On disk every line starts with a one-character kind tag and a space. The
//! tag is turned into a [`RecordKind`] as soon as a line is read.

use crate::error::{PkgIndexError, Result};
use crate::fmri::{FmriError, PkgFmri};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RecordKind {
    /// `V`: an ordinary package version.
    Version,
    /// `C`: a critical package version.
    Critical,
    /// `S`: an attribute, `S key: value`.
    Attribute,
    /// `R`: reserved, passed through untouched.
    Reserved,
}

impl RecordKind {
    /// Every record kind this code understands.
    pub const KNOWN: [RecordKind; 4] = [
        RecordKind::Critical,
        RecordKind::Attribute,
        RecordKind::Version,
        RecordKind::Reserved,
    ];

    pub fn from_tag(tag: char) -> Option<Self> {
        match tag {
            'V' => Some(Self::Version),
            'C' => Some(Self::Critical),
            'S' => Some(Self::Attribute),
            'R' => Some(Self::Reserved),
            _ => None,
        }
    }

    pub fn tag(self) -> char {
        match self {
            Self::Version => 'V',
            Self::Critical => 'C',
            Self::Attribute => 'S',
            Self::Reserved => 'R',
        }
    }

    /// The tag string for [`KNOWN`](Self::KNOWN), as stored in the `prefix`
    /// attribute.
    pub fn known_tags() -> String {
        Self::KNOWN.iter().map(|kind| kind.tag()).collect()
    }

    pub fn is_package(self) -> bool {
        matches!(self, Self::Version | Self::Critical)
    }
}

/// A line read from a catalog stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogLine<'a> {
    /// A known record kind and the text after the tag and separator.
    Record { kind: RecordKind, body: &'a str },
    /// A line with a tag this code does not know; kept verbatim.
    Foreign(&'a str),
}

/// Classifies one raw line. Lines shorter than two characters or without
/// whitespace after the tag are not records at all.
pub fn classify_line(line: &str) -> Option<CatalogLine<'_>> {
    let mut chars = line.chars();
    let tag = chars.next()?;
    let separator = chars.next()?;
    if !separator.is_whitespace() {
        return None;
    }
    match RecordKind::from_tag(tag) {
        Some(kind) => Some(CatalogLine::Record {
            kind,
            body: &line[tag.len_utf8() + separator.len_utf8()..],
        }),
        None => Some(CatalogLine::Foreign(line)),
    }
}

/// True for `V pkg...` and `C pkg...` lines, the only ones holding FMRIs.
pub fn is_package_line(line: &str) -> bool {
    line.starts_with("V pkg") || line.starts_with("C pkg")
}

/// Parses the FMRI out of a package line.
///
/// Two layouts are accepted: `V pkg:/name@version` and
/// `V pkg name version`.
pub fn parse_package_line(line: &str, publisher: Option<&str>) -> Result<PkgFmri> {
    let corrupt = || PkgIndexError::CorruptCatalog {
        publisher: publisher.unwrap_or("None").to_string(),
        entry: line.to_string(),
    };
    let body = line.get(2..).ok_or_else(corrupt)?;
    parse_package_body(body, publisher).map_err(|_| corrupt())
}

/// Parses the part of a package line after the kind tag.
pub fn parse_package_body(body: &str, publisher: Option<&str>) -> std::result::Result<PkgFmri, FmriError> {
    match body.strip_prefix("pkg ") {
        Some(fields) => PkgFmri::parse(&fields.trim_end().replace(' ', "@"), None, publisher),
        None => PkgFmri::parse(body, None, publisher),
    }
}

/// Renders a package line in the `V pkg name version` layout written by
/// catalog transfers.
pub fn fielded_package_line(kind: RecordKind, fmri: &PkgFmri) -> String {
    match fmri.version() {
        Some(version) => format!("{} pkg {} {version}\n", kind.tag(), fmri.name()),
        None => format!("{} pkg {}\n", kind.tag(), fmri.name()),
    }
}

/// Renders a package line in the `V pkg:/name@version` layout.
pub fn package_line(fmri: &PkgFmri, critical: bool) -> String {
    let kind = if critical {
        RecordKind::Critical
    } else {
        RecordKind::Version
    };
    format!("{} {}\n", kind.tag(), fmri.get_fmri(None, true, true))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_line() {
        assert_eq!(
            classify_line("V pkg:/foo@1.0\n"),
            Some(CatalogLine::Record {
                kind: RecordKind::Version,
                body: "pkg:/foo@1.0\n"
            })
        );
        assert_eq!(classify_line("X something\n"), Some(CatalogLine::Foreign("X something\n")));
        assert_eq!(classify_line("V"), None);
        assert_eq!(classify_line("Vpkg"), None);
    }

    #[test]
    fn test_parse_both_layouts() {
        let legacy = parse_package_line("V pkg:/foo@1.0,5.11-1\n", Some("test")).unwrap();
        let fielded = parse_package_line("C pkg foo 1.0,5.11-1\n", Some("test")).unwrap();
        assert_eq!(legacy, fielded);
        assert_eq!(legacy.get_publisher(), Some("test"));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let error = parse_package_line("V pkg:/@@@\n", Some("test")).unwrap_err();
        assert!(matches!(error, PkgIndexError::CorruptCatalog { .. }));
        assert!(error.to_string().contains("publisher 'test'"));
    }

    #[test]
    fn test_package_line_is_anarchic() {
        let fmri = PkgFmri::parse("pkg://test/foo@1.0", None, None).unwrap();
        assert_eq!(package_line(&fmri, false), "V pkg:/foo@1.0,5.11\n");
        assert_eq!(package_line(&fmri, true), "C pkg:/foo@1.0,5.11\n");
    }

    #[test]
    fn test_fielded_line() {
        let fmri = PkgFmri::parse("pkg:/system/libc@1.0-2", None, None).unwrap();
        let line = fielded_package_line(RecordKind::Version, &fmri);
        assert_eq!(line, "V pkg system/libc 1.0,5.11-2\n");
        assert_eq!(parse_package_line(&line, None).unwrap(), fmri);
    }

    #[test]
    fn test_known_tags() {
        assert_eq!(RecordKind::known_tags(), "CSVR");
        assert!(RecordKind::Critical.is_package());
        assert!(!RecordKind::Reserved.is_package());
    }
}
