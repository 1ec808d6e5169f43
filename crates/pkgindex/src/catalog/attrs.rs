//! The catalog `attrs` file: one `S key: value` line per attribute.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind};
use std::path::Path;

use chrono::{Local, NaiveDateTime};

use crate::error::{is_permission_error, PkgIndexError, Result};
use crate::persist::write_atomic;

pub const ATTRS_FILE: &str = "attrs";

pub const NPKGS: &str = "npkgs";
pub const LAST_MODIFIED: &str = "Last-Modified";
pub const ORIGIN: &str = "origin";
pub const PREFIX: &str = "prefix";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
const TIMESTAMP_PARSE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Current local time in the catalog's timestamp format.
pub fn timestamp() -> String {
    format_timestamp(&Local::now().naive_local())
}

/// `YYYY-MM-DDTHH:MM:SS[.ffffff]`; the fraction is omitted when zero.
pub fn format_timestamp(value: &NaiveDateTime) -> String {
    let micros = value.and_utc().timestamp_subsec_micros();
    if micros == 0 {
        value.format(TIMESTAMP_FORMAT).to_string()
    } else {
        format!("{}.{micros:06}", value.format(TIMESTAMP_FORMAT))
    }
}

/// Parses a catalog timestamp; microseconds are optional.
pub fn ts_to_datetime(value: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value.trim(), TIMESTAMP_PARSE_FORMAT).ok()
}

/// Splits `S key: value` into its key and value.
pub fn parse_attr_line(line: &str) -> Option<(&str, &str)> {
    let rest = line.strip_prefix("S ")?;
    let (key, value) = rest.split_once(':')?;
    let value = value.strip_prefix(' ')?;
    let value = value.split('\n').next().unwrap_or("");
    Some((key, value))
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogAttrs {
    npkgs: u64,
    values: BTreeMap<String, String>,
}

impl CatalogAttrs {
    /// Loads `dir/attrs`. A missing file yields empty attributes.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(ATTRS_FILE);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(error) => return Err(error.into()),
        };

        let mut attrs = Self::default();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if let Some((key, value)) = parse_attr_line(&line) {
                attrs.set(key, value)?;
            }
        }
        Ok(attrs)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        if key == NPKGS {
            return None;
        }
        self.values.get(key).map(String::as_str)
    }

    /// Stores an attribute. `npkgs` must be an integer.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        if key == NPKGS {
            self.npkgs = value.trim().parse().map_err(|_| PkgIndexError::DetailedValue {
                name: NPKGS.to_string(),
                value: value.to_string(),
                query: ATTRS_FILE.to_string(),
            })?;
            return Ok(());
        }
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    pub fn contains(&self, key: &str) -> bool {
        key == NPKGS || self.values.contains_key(key)
    }

    pub fn npkgs(&self) -> u64 {
        self.npkgs
    }

    pub fn set_npkgs(&mut self, npkgs: u64) {
        self.npkgs = npkgs;
    }

    pub fn last_modified(&self) -> Option<&str> {
        self.get(LAST_MODIFIED)
    }

    pub fn origin(&self) -> Option<&str> {
        self.get(ORIGIN)
    }

    /// Attribute lines in the on-disk format, `npkgs` first.
    pub fn as_lines(&self) -> Vec<String> {
        let mut lines = Vec::with_capacity(self.values.len() + 1);
        lines.push(format!("S {NPKGS}: {}\n", self.npkgs));
        lines.extend(
            self.values
                .iter()
                .map(|(key, value)| format!("S {key}: {value}\n")),
        );
        lines
    }

    /// Writes `dir/attrs` atomically. Permission problems are logged and
    /// ignored since the attributes are advisory.
    pub fn save(&self, dir: &Path) -> Result<()> {
        let path = dir.join(ATTRS_FILE);
        let result = write_atomic(&path, |out| {
            for line in self.as_lines() {
                out.write_all(line.as_bytes())?;
            }
            Ok(())
        });
        match result {
            Err(PkgIndexError::Io(error)) if is_permission_error(&error) => {
                log::warn!("unable to save catalog attributes to {}: {error}", path.display());
                Ok(())
            }
            other => other,
        }
    }
}
