//! The main dictionary: one line per token listing every place it occurs.
//!
//! ```text
//! %25gconf.xml file!basename@basename#579,13249,13692,77391,77628
//! ```
//!
//! The quoted token is followed by space separated action types. Each action
//! type is followed by `!key` groups, each key by `@value` groups (the
//! quoted full value), each value by `#id` groups naming a manifest-list
//! entry, and each id by the `,offset` byte offsets of matching lines in
//! that manifest. The file is never loaded whole; lines are read by offset
//! or scanned in order.

use std::fmt::Write as _;
use std::io::{BufRead, Seek, SeekFrom};
use std::path::PathBuf;

use super::{IndexStore, StoreFile, MAIN_DICT_FILE};
use crate::error::{PkgIndexError, Result};
use crate::escape::{quote, unquote};

/// Separators from the outermost level to the innermost.
pub const SEPARATORS: [char; 5] = [' ', '!', '@', '#', ','];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageOffsets {
    pub package_id: u64,
    pub offsets: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueEntries {
    pub full_value: String,
    pub packages: Vec<PackageOffsets>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEntries {
    pub key: String,
    pub values: Vec<ValueEntries>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionTypeEntries {
    pub action_type: String,
    pub keys: Vec<KeyEntries>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MainDictEntry {
    pub token: String,
    pub action_types: Vec<ActionTypeEntries>,
}

fn corrupt_line(line: &str, detail: String) -> PkgIndexError {
    PkgIndexError::CorruptIndex {
        path: PathBuf::from(MAIN_DICT_FILE),
        detail: format!("{detail} in line '{line}'"),
    }
}

fn parse_number(text: &str, line: &str) -> Result<u64> {
    text.parse()
        .map_err(|_| corrupt_line(line, format!("bad number '{text}'")))
}

/// Parses one main dictionary line. A trailing newline is ignored.
pub fn parse_line(line: &str) -> Result<MainDictEntry> {
    let line = line.trim_end_matches('\n');
    let mut action_types = line.split(SEPARATORS[0]);
    let token = unquote(action_types.next().unwrap_or_default()).into_owned();

    let mut entry = MainDictEntry {
        token,
        action_types: Vec::new(),
    };
    for action_type_part in action_types {
        let mut keys = action_type_part.split(SEPARATORS[1]);
        let mut action_type = ActionTypeEntries {
            action_type: keys.next().unwrap_or_default().to_string(),
            keys: Vec::new(),
        };
        for key_part in keys {
            let mut values = key_part.split(SEPARATORS[2]);
            let mut key = KeyEntries {
                key: values.next().unwrap_or_default().to_string(),
                values: Vec::new(),
            };
            for value_part in values {
                let mut packages = value_part.split(SEPARATORS[3]);
                let mut value = ValueEntries {
                    full_value: unquote(packages.next().unwrap_or_default()).into_owned(),
                    packages: Vec::new(),
                };
                for package_part in packages {
                    let mut numbers = package_part.split(SEPARATORS[4]);
                    let package_id = parse_number(numbers.next().unwrap_or_default(), line)?;
                    let offsets = numbers
                        .map(|offset| parse_number(offset, line))
                        .collect::<Result<Vec<_>>>()?;
                    value.packages.push(PackageOffsets { package_id, offsets });
                }
                key.values.push(value);
            }
            action_type.keys.push(key);
        }
        entry.action_types.push(action_type);
    }
    Ok(entry)
}

/// Pulls only the token out of a main dictionary line.
pub fn parse_line_for_token(line: &str) -> String {
    let line = line.trim_end_matches('\n');
    let token = line.split(SEPARATORS[0]).next().unwrap_or_default();
    unquote(token).into_owned()
}

/// Renders `entry` as a main dictionary line, newline included.
pub fn transform_line(entry: &MainDictEntry) -> String {
    let mut line = quote(&entry.token).into_owned();
    for action_type in &entry.action_types {
        let _ = write!(line, "{}{}", SEPARATORS[0], action_type.action_type);
        for key in &action_type.keys {
            let _ = write!(line, "{}{}", SEPARATORS[1], key.key);
            for value in &key.values {
                let _ = write!(line, "{}{}", SEPARATORS[2], quote(&value.full_value));
                for package in &value.packages {
                    let _ = write!(line, "{}{}", SEPARATORS[3], package.package_id);
                    for offset in &package.offsets {
                        let _ = write!(line, "{}{offset}", SEPARATORS[4]);
                    }
                }
            }
        }
    }
    line.push('\n');
    line
}

#[derive(Debug)]
pub struct MainDict {
    file: StoreFile,
}

impl Default for MainDict {
    fn default() -> Self {
        Self::new(MAIN_DICT_FILE)
    }
}

impl MainDict {
    pub fn new(name: &str) -> Self {
        Self {
            file: StoreFile::new(name),
        }
    }

    /// Reads and parses the line starting at byte `offset` of the file.
    pub fn read_line_at(&mut self, offset: u64) -> Result<Option<MainDictEntry>> {
        let reader = self.file.reader_mut()?;
        reader.seek(SeekFrom::Start(offset))?;
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        self.parse(&line).map(Some)
    }

    /// Reads the lines at `offsets` in ascending offset order.
    pub fn read_lines_at(&mut self, offsets: &[u64]) -> Result<Vec<MainDictEntry>> {
        let mut sorted = offsets.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        let mut entries = Vec::with_capacity(sorted.len());
        for offset in sorted {
            if let Some(entry) = self.read_line_at(offset)? {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    /// Parses every line after the version header.
    pub fn scan(&mut self) -> Result<Vec<MainDictEntry>> {
        let reader = self.file.reader_mut()?;
        reader.seek(SeekFrom::Start(0))?;
        reader.read_line(&mut String::new())?;

        let mut lines = Vec::new();
        self.file.for_each_line(|_, line| {
            if !line.is_empty() {
                lines.push(line.to_string());
            }
            Ok(())
        })?;
        lines.iter().map(|line| self.parse(line)).collect()
    }

    fn parse(&self, line: &str) -> Result<MainDictEntry> {
        parse_line(line).map_err(|error| match error {
            PkgIndexError::CorruptIndex { detail, .. } => self.file.corrupt(detail),
            other => other,
        })
    }
}

impl IndexStore for MainDict {
    fn store_file(&self) -> &StoreFile {
        &self.file
    }

    fn store_file_mut(&mut self) -> &mut StoreFile {
        &mut self.file
    }

    fn read_dict_file(&mut self) -> Result<()> {
        self.file.mark_read();
        Ok(())
    }
}
