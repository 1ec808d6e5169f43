use std::collections::HashSet;
use std::path::Path;

use sha1::{Digest, Sha1};

use super::{write_dict_file, IndexStore, StoreFile};
use crate::error::{PkgIndexError, Result};
use crate::fmri::PkgFmri;

/// A set of strings, one per line. Used for the full FMRI list and the
/// fast add/remove lists.
#[derive(Debug)]
pub struct Set {
    file: StoreFile,
    values: HashSet<String>,
}

impl Set {
    pub fn new(name: &str) -> Self {
        Self {
            file: StoreFile::new(name),
            values: HashSet::new(),
        }
    }

    pub fn values(&self) -> &HashSet<String> {
        &self.values
    }

    pub fn add(&mut self, value: &str) {
        self.values.insert(value.to_string());
    }

    /// Returns false if `value` was not present.
    pub fn remove(&mut self, value: &str) -> bool {
        self.values.remove(value)
    }

    pub fn contains(&self, value: &str) -> bool {
        self.values.contains(value)
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn write_dict_file(&self, dir: &Path, version: u64) -> Result<()> {
        let mut lines: Vec<&str> = self.values.iter().map(String::as_str).collect();
        lines.sort_unstable();
        write_dict_file(dir, self.file.name(), version, lines)
    }

    /// Reads the rest of the open file as FMRIs and removes each of them
    /// from `fmris`. Does nothing when the file is not open.
    pub fn read_and_discard_matching_from_argument(&mut self, fmris: &mut HashSet<PkgFmri>) -> Result<()> {
        if !self.file.is_open() {
            return Ok(());
        }
        self.file.for_each_line(|_, line| {
            if !line.is_empty() {
                let fmri = PkgFmri::parse(line, None, None)?;
                fmris.remove(&fmri);
            }
            Ok(())
        })
    }
}

impl IndexStore for Set {
    fn store_file(&self) -> &StoreFile {
        &self.file
    }

    fn store_file_mut(&mut self) -> &mut StoreFile {
        &mut self.file
    }

    fn read_dict_file(&mut self) -> Result<()> {
        self.values.clear();
        let values = &mut self.values;
        self.file.for_each_line(|_, line| {
            values.insert(line.to_string());
            Ok(())
        })?;
        self.file.mark_read();
        Ok(())
    }

    fn count_entries_removed_during_partial_indexing(&self) -> usize {
        self.values.len()
    }
}

/// A single SHA-1 line summarizing a set of values, used to notice that the
/// manifest list no longer matches the catalog.
#[derive(Debug)]
pub struct SetHash {
    file: StoreFile,
    hash: String,
}

impl SetHash {
    pub fn new(name: &str) -> Self {
        Self {
            file: StoreFile::new(name),
            hash: format!("{:x}", Sha1::new().finalize()),
        }
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn set_hash<I, S>(&mut self, values: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.hash = Self::calc_hash(values);
    }

    /// Hex SHA-1 over the sorted values, concatenated without separators.
    pub fn calc_hash<I, S>(values: I) -> String
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut sorted: Vec<S> = values.into_iter().collect();
        sorted.sort_by(|a, b| a.as_ref().cmp(b.as_ref()));
        let mut hasher = Sha1::new();
        for value in &sorted {
            hasher.update(value.as_ref().as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }

    pub fn write_dict_file(&self, dir: &Path, version: u64) -> Result<()> {
        write_dict_file(dir, self.file.name(), version, [self.hash.as_str()])
    }

    /// Fails with [`PkgIndexError::IncorrectIndexFileHash`] when the stored
    /// hash differs from the hash of `values`.
    pub fn check_against_file<I, S>(&mut self, values: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if !self.file.have_read() {
            self.read_dict_file()?;
        }
        let incoming = Self::calc_hash(values);
        if self.hash != incoming {
            return Err(PkgIndexError::IncorrectIndexFileHash {
                existing: self.hash.clone(),
                incoming,
            });
        }
        Ok(())
    }
}

impl IndexStore for SetHash {
    fn store_file(&self) -> &StoreFile {
        &self.file
    }

    fn store_file_mut(&mut self) -> &mut StoreFile {
        &mut self.file
    }

    fn read_dict_file(&mut self) -> Result<()> {
        let mut lines = Vec::new();
        self.file.for_each_line(|_, line| {
            lines.push(line.trim_end().to_string());
            Ok(())
        })?;
        match lines.as_slice() {
            [hash] => self.hash = hash.clone(),
            [] => {}
            _ => return Err(self.file.corrupt(format!("expected one hash line, found {}", lines.len()))),
        }
        self.file.mark_read();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FULL_FMRI_FILE, FULL_FMRI_HASH_FILE};
    use tempfile::TempDir;

    #[test]
    fn test_default_hash_is_empty_digest() {
        let hash = SetHash::new(FULL_FMRI_HASH_FILE);
        assert_eq!(hash.hash(), "da39a3ee5e6b4b0d3255bfef95601890afd80709");
        assert_eq!(SetHash::calc_hash(Vec::<String>::new()), hash.hash());
    }

    #[test]
    fn test_hash_ignores_order() {
        assert_eq!(SetHash::calc_hash(["b", "a"]), SetHash::calc_hash(["a", "b"]));
        assert_eq!(SetHash::calc_hash(["abc"]), "a9993e364706816aba3e25717850c26c9cd0d89d");
    }

    #[test]
    fn test_check_against_file() {
        let temp = TempDir::new().expect("tempdir");
        let mut writer = SetHash::new(FULL_FMRI_HASH_FILE);
        writer.set_hash(["pkg:/foo@1.0", "pkg:/bar@1.0"]);
        writer.write_dict_file(temp.path(), 1).unwrap();

        let mut reader = SetHash::new(FULL_FMRI_HASH_FILE);
        reader.open(temp.path()).unwrap();
        reader.check_against_file(["pkg:/bar@1.0", "pkg:/foo@1.0"]).unwrap();

        let error = reader.check_against_file(["pkg:/bar@1.0"]).unwrap_err();
        match error {
            PkgIndexError::IncorrectIndexFileHash { existing, incoming } => {
                assert_eq!(existing, writer.hash());
                assert_eq!(incoming, SetHash::calc_hash(["pkg:/bar@1.0"]));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_set_discards_listed_fmris() {
        let temp = TempDir::new().expect("tempdir");
        let mut set = Set::new(FULL_FMRI_FILE);
        set.add("pkg://test/foo@1.0,5.11");
        set.add("pkg://test/bar@1.0,5.11");
        assert!(set.remove("pkg://test/bar@1.0,5.11"));
        assert!(!set.remove("pkg://test/bar@1.0,5.11"));
        set.add("pkg://test/bar@2.0,5.11");
        set.write_dict_file(temp.path(), 1).unwrap();

        let parse = |text: &str| PkgFmri::parse(text, None, None).unwrap();
        let mut fmris: HashSet<PkgFmri> = [
            parse("pkg://test/foo@1.0,5.11"),
            parse("pkg://test/bar@1.0,5.11"),
            parse("pkg://test/bar@2.0,5.11"),
        ]
        .into_iter()
        .collect();

        let mut reader = Set::new(FULL_FMRI_FILE);
        reader.read_and_discard_matching_from_argument(&mut fmris).unwrap();
        assert_eq!(fmris.len(), 3);

        reader.open(temp.path()).unwrap();
        reader.read_and_discard_matching_from_argument(&mut fmris).unwrap();
        assert_eq!(fmris.into_iter().collect::<Vec<_>>(), vec![parse("pkg://test/bar@1.0,5.11")]);
    }
}
