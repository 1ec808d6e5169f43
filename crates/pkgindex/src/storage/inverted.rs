//! Package -> manifest offsets, delta encoded and shared between packages.
//!
//! Each line lists the packages that own one offset sequence:
//!
//! ```text
//! foo@1.0,5.11 bar@2.0,5.11!17 40 3
//! ```
//!
//! FMRIs are written without scheme or publisher. The offsets are the
//! gaps between consecutive sorted, deduplicated offsets.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use super::{write_dict_file, IndexStore, StoreFile};
use crate::error::Result;
use crate::fmri::PkgFmri;

#[derive(Debug)]
pub struct InvertedDict {
    file: StoreFile,
    pending: BTreeMap<u64, Vec<u64>>,
    lines: Vec<(Vec<String>, Vec<u64>)>,
}

/// Undoes delta encoding with a running sum.
pub fn de_delta(deltas: &[u64]) -> Vec<u64> {
    deltas
        .iter()
        .scan(0u64, |total, delta| {
            *total += delta;
            Some(*total)
        })
        .collect()
}

fn delta_encode(offsets: &[u64]) -> String {
    let mut sorted = offsets.to_vec();
    sorted.sort_unstable();
    sorted.dedup();
    let mut previous = 0;
    let mut encoded = Vec::with_capacity(sorted.len());
    for offset in sorted {
        encoded.push((offset - previous).to_string());
        previous = offset;
    }
    encoded.join(" ")
}

impl InvertedDict {
    pub fn new(name: &str) -> Self {
        Self {
            file: StoreFile::new(name),
            pending: BTreeMap::new(),
            lines: Vec::new(),
        }
    }

    /// Records that package `package_id` has a match at `offset`.
    pub fn add_pair(&mut self, package_id: u64, offset: u64) {
        self.pending.entry(package_id).or_default().push(offset);
    }

    /// Drains the recorded pairs into encoded offset sequence -> package ids
    /// owning exactly that sequence.
    pub fn invert_id_to_offsets_dict(&mut self) -> BTreeMap<String, Vec<u64>> {
        let mut inverted: BTreeMap<String, Vec<u64>> = BTreeMap::new();
        for (package_id, offsets) in std::mem::take(&mut self.pending) {
            inverted.entry(delta_encode(&offsets)).or_default().push(package_id);
        }
        inverted
    }

    /// Writes the recorded pairs. `fmri_for` resolves a package id to its
    /// FMRI, normally through the manifest list.
    pub fn write_dict_file<F>(&mut self, dir: &Path, version: u64, mut fmri_for: F) -> Result<()>
    where
        F: FnMut(u64) -> Option<PkgFmri>,
    {
        let inverted = self.invert_id_to_offsets_dict();
        let mut lines = Vec::with_capacity(inverted.len());
        for (offsets, package_ids) in inverted {
            let mut fmris = Vec::with_capacity(package_ids.len());
            for package_id in package_ids {
                let fmri = fmri_for(package_id)
                    .ok_or_else(|| self.file.corrupt(format!("no fmri for package id {package_id}")))?;
                fmris.push(fmri.get_fmri(None, true, false));
            }
            lines.push(format!("{}!{offsets}", fmris.join(" ")));
        }
        write_dict_file(dir, self.file.name(), version, lines)
    }

    /// Union of the offsets of every line with at least one FMRI accepted by
    /// `predicate`.
    pub fn get_offsets<F>(&self, mut predicate: F) -> HashSet<u64>
    where
        F: FnMut(&str) -> bool,
    {
        let mut offsets = HashSet::new();
        for (fmris, deltas) in &self.lines {
            if fmris.iter().any(|fmri| predicate(fmri)) {
                offsets.extend(de_delta(deltas));
            }
        }
        offsets
    }
}

impl IndexStore for InvertedDict {
    fn store_file(&self) -> &StoreFile {
        &self.file
    }

    fn store_file_mut(&mut self) -> &mut StoreFile {
        &mut self.file
    }

    fn read_dict_file(&mut self) -> Result<()> {
        let mut raw = Vec::new();
        self.file.for_each_line(|_, line| {
            raw.push(line.to_string());
            Ok(())
        })?;

        let mut lines = Vec::with_capacity(raw.len());
        for line in raw {
            let Some((fmris, offsets)) = line.split_once('!') else {
                return Err(self.file.corrupt(format!("missing '!' in line '{line}'")));
            };
            let deltas = offsets
                .split_whitespace()
                .map(str::parse)
                .collect::<std::result::Result<Vec<u64>, _>>()
                .map_err(|_| self.file.corrupt(format!("bad offsets in line '{line}'")))?;
            let fmris = fmris.split_whitespace().map(str::to_string).collect();
            lines.push((fmris, deltas));
        }
        self.lines = lines;
        self.file.mark_read();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::FMRI_OFFSETS_FILE;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn fmri_for(package_id: u64) -> Option<PkgFmri> {
        PkgFmri::parse(&format!("pkg://test/pkg{package_id}@1.{package_id}"), None, None).ok()
    }

    #[test]
    fn test_de_delta() {
        assert_eq!(de_delta(&[17, 40, 3]), vec![17, 57, 60]);
        assert!(de_delta(&[]).is_empty());
    }

    #[test]
    fn test_identical_sequences_share_a_bucket() {
        let mut dict = InvertedDict::new(FMRI_OFFSETS_FILE);
        for (package_id, offset) in [(0, 57), (0, 17), (0, 17), (1, 17), (1, 57), (2, 5)] {
            dict.add_pair(package_id, offset);
        }
        let inverted = dict.invert_id_to_offsets_dict();
        assert_eq!(inverted.len(), 2);
        assert_eq!(inverted["17 40"], vec![0, 1]);
        assert_eq!(inverted["5"], vec![2]);
        assert!(dict.invert_id_to_offsets_dict().is_empty());
    }

    #[test]
    fn test_offsets_survive_write_and_read() {
        let original: HashMap<u64, Vec<u64>> = HashMap::from([
            (0, vec![900, 17, 233, 17]),
            (1, vec![17, 233, 900]),
            (2, vec![4]),
            (3, vec![1_000_000, 0]),
            (4, vec![64, 128, 4]),
        ]);
        let mut dict = InvertedDict::new(FMRI_OFFSETS_FILE);
        for (package_id, offsets) in &original {
            for offset in offsets {
                dict.add_pair(*package_id, *offset);
            }
        }
        let temp = TempDir::new().expect("tempdir");
        dict.write_dict_file(temp.path(), 9, fmri_for).unwrap();

        let mut loaded = InvertedDict::new(FMRI_OFFSETS_FILE);
        assert_eq!(loaded.open(temp.path()).unwrap(), Some(9));
        loaded.read_dict_file().unwrap();
        for (package_id, offsets) in &original {
            let wanted = fmri_for(*package_id).unwrap().get_fmri(None, true, false);
            let found = loaded.get_offsets(|fmri| fmri == wanted);
            let expected: HashSet<u64> = offsets.iter().copied().collect();
            assert_eq!(found, expected, "package {package_id}");
        }
        assert!(loaded.get_offsets(|_| false).is_empty());
    }

    #[test]
    fn test_line_format() {
        let temp = TempDir::new().expect("tempdir");
        let mut dict = InvertedDict::new(FMRI_OFFSETS_FILE);
        dict.add_pair(0, 60);
        dict.add_pair(0, 17);
        dict.add_pair(1, 17);
        dict.add_pair(1, 60);
        dict.write_dict_file(temp.path(), 1, fmri_for).unwrap();
        assert_eq!(
            std::fs::read_to_string(temp.path().join(FMRI_OFFSETS_FILE)).unwrap(),
            "VERSION: 1\npkg0@1.0,5.11 pkg1@1.1,5.11!17 43\n"
        );
    }

    #[test]
    fn test_unknown_package_id_fails() {
        let temp = TempDir::new().expect("tempdir");
        let mut dict = InvertedDict::new(FMRI_OFFSETS_FILE);
        dict.add_pair(7, 1);
        assert!(dict.write_dict_file(temp.path(), 1, |_| None).is_err());
    }
}
