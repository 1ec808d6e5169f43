use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use super::{write_dict_file, IndexStore, StoreFile};
use crate::error::Result;
use crate::escape::{quote, unquote};

/// Read-only line number -> entity table, such as the manifest list.
#[derive(Debug)]
pub struct Dict {
    file: StoreFile,
    entities: Vec<String>,
}

impl Dict {
    pub fn new(name: &str) -> Self {
        Self {
            file: StoreFile::new(name),
            entities: Vec::new(),
        }
    }

    pub fn get_entity(&self, id: usize) -> Option<&str> {
        self.entities.get(id).map(String::as_str)
    }

    pub fn has_entity(&self, id: usize) -> bool {
        id < self.entities.len()
    }

    pub fn entities(&self) -> impl Iterator<Item = &str> {
        self.entities.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

impl IndexStore for Dict {
    fn store_file(&self) -> &StoreFile {
        &self.file
    }

    fn store_file_mut(&mut self) -> &mut StoreFile {
        &mut self.file
    }

    fn read_dict_file(&mut self) -> Result<()> {
        self.entities.clear();
        let entities = &mut self.entities;
        self.file.for_each_line(|_, line| {
            entities.push(line.to_string());
            Ok(())
        })?;
        self.file.mark_read();
        Ok(())
    }

    fn count_entries_removed_during_partial_indexing(&self) -> usize {
        self.entities.len()
    }
}

/// Entity -> number table that is written incrementally, such as the token
/// to main-dictionary offset map.
///
/// Each line is `<flag><entity> <number>`. Flag `1` marks an entity that
/// contained a space and was quoted; flag `0` marks one stored verbatim.
#[derive(Debug)]
pub struct DictMutable {
    file: StoreFile,
    ids: HashMap<String, u64>,
    out: Option<BufWriter<File>>,
}

fn encode_entity(entity: &str) -> String {
    if entity.contains(' ') {
        format!("1{}", quote(entity))
    } else {
        format!("0{entity}")
    }
}

impl DictMutable {
    pub fn new(name: &str) -> Self {
        Self {
            file: StoreFile::new(name),
            ids: HashMap::new(),
            out: None,
        }
    }

    pub fn get_keys(&self) -> impl Iterator<Item = &str> {
        self.ids.keys().map(String::as_str)
    }

    pub fn get_id(&self, entity: &str) -> Option<u64> {
        self.ids.get(entity).copied()
    }

    pub fn has_entity(&self, entity: &str) -> bool {
        self.ids.contains_key(entity)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Writes the version header to `dir` and keeps the file open for
    /// [`write_entity`](Self::write_entity).
    pub fn open_out_file(&mut self, dir: &Path, version: u64) -> Result<()> {
        write_dict_file(dir, self.file.name(), version, Vec::<String>::new())?;
        let file = OpenOptions::new().append(true).open(dir.join(self.file.name()))?;
        self.out = Some(BufWriter::new(file));
        Ok(())
    }

    pub fn write_entity(&mut self, entity: &str, id: u64) -> Result<()> {
        let Some(out) = self.out.as_mut() else {
            return Err(self.file.corrupt("output file is not open"));
        };
        writeln!(out, "{} {id}", encode_entity(entity))?;
        Ok(())
    }

    /// Flushes and closes the output file.
    pub fn close_out_file(&mut self) -> Result<()> {
        if let Some(mut out) = self.out.take() {
            out.flush()?;
        }
        Ok(())
    }
}

impl IndexStore for DictMutable {
    fn store_file(&self) -> &StoreFile {
        &self.file
    }

    fn store_file_mut(&mut self) -> &mut StoreFile {
        &mut self.file
    }

    fn read_dict_file(&mut self) -> Result<()> {
        self.ids.clear();
        let Self { file, ids, .. } = self;
        let mut bad_line = None;
        file.for_each_line(|_, line| {
            let parsed = line.split_once(' ').and_then(|(entity, number)| {
                let number = number.parse::<u64>().ok()?;
                let entity = if let Some(quoted) = entity.strip_prefix('1') {
                    unquote(quoted).into_owned()
                } else {
                    entity.strip_prefix('0')?.to_string()
                };
                Some((entity, number))
            });
            match parsed {
                Some((entity, number)) => {
                    ids.insert(entity, number);
                }
                None if bad_line.is_none() => bad_line = Some(line.to_string()),
                None => {}
            }
            Ok(())
        })?;
        if let Some(line) = bad_line {
            return Err(self.file.corrupt(format!("bad entry '{line}'")));
        }
        self.file.mark_read();
        Ok(())
    }

    fn close_file_handle(&mut self) {
        if let Err(error) = self.close_out_file() {
            log::warn!("failed to flush {}: {error}", self.file.name());
        }
        self.file.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{write_dict_file, BYTE_OFFSET_FILE, MANIFEST_LIST_FILE};
    use tempfile::TempDir;

    #[test]
    fn test_dict_reads_line_numbers() {
        let temp = TempDir::new().expect("tempdir");
        write_dict_file(temp.path(), MANIFEST_LIST_FILE, 2, ["test/foo@1.0,5.11", "test/bar@2.0,5.11"]).unwrap();

        let mut dict = Dict::new(MANIFEST_LIST_FILE);
        dict.open(temp.path()).unwrap();
        dict.read_dict_file().unwrap();
        assert_eq!(dict.get_entity(1), Some("test/bar@2.0,5.11"));
        assert!(dict.has_entity(0));
        assert!(!dict.has_entity(2));
        assert_eq!(dict.count_entries_removed_during_partial_indexing(), 2);
    }

    #[test]
    fn test_dict_mutable_flags_spaced_entities() {
        let temp = TempDir::new().expect("tempdir");
        let mut dict = DictMutable::new(BYTE_OFFSET_FILE);
        dict.open_out_file(temp.path(), 3).unwrap();
        dict.write_entity("sample", 11).unwrap();
        dict.write_entity("two words", 42).unwrap();
        dict.close_out_file().unwrap();

        let contents = std::fs::read_to_string(temp.path().join(BYTE_OFFSET_FILE)).unwrap();
        assert_eq!(contents, "VERSION: 3\n0sample 11\n1two%20words 42\n");

        let mut loaded = DictMutable::new(BYTE_OFFSET_FILE);
        assert_eq!(loaded.open(temp.path()).unwrap(), Some(3));
        loaded.read_dict_file().unwrap();
        assert_eq!(loaded.get_id("sample"), Some(11));
        assert_eq!(loaded.get_id("two words"), Some(42));
        assert!(!loaded.has_entity("two%20words"));
        let mut keys: Vec<&str> = loaded.get_keys().collect();
        keys.sort_unstable();
        assert_eq!(keys, vec!["sample", "two words"]);
    }

    #[test]
    fn test_dict_mutable_rejects_bad_lines() {
        let temp = TempDir::new().expect("tempdir");
        write_dict_file(temp.path(), BYTE_OFFSET_FILE, 1, ["0token notanumber"]).unwrap();
        let mut dict = DictMutable::new(BYTE_OFFSET_FILE);
        dict.open(temp.path()).unwrap();
        assert!(dict.read_dict_file().is_err());
        assert!(!dict.store_file().have_read());
    }

    #[test]
    fn test_write_without_open_fails() {
        let mut dict = DictMutable::new(BYTE_OFFSET_FILE);
        assert!(dict.write_entity("x", 1).is_err());
    }
}
