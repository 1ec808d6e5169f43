//! Builds small on-disk indexes from manifest text for tests.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;

use super::manager::IndexManager;
use super::tokenize::{ManifestDir, ManifestSource, SimpleActionTokenizer};
use crate::config::IndexConfig;
use crate::fmri::PkgFmri;
use crate::storage::{
    transform_line, write_dict_file, ActionTypeEntries, DictMutable, IndexStore, InvertedDict,
    KeyEntries, MainDictEntry, PackageOffsets, ValueEntries, ACTION_TYPE_PREFIX, BYTE_OFFSET_FILE,
    FMRI_OFFSETS_FILE, KEY_PREFIX, LEGACY_PKG_DIR, MAIN_DICT_FILE, MANIFEST_LIST_FILE,
};

pub(crate) struct IndexFixture {
    _temp: TempDir,
    pub index_dir: PathBuf,
    pub manifests: Arc<ManifestDir>,
}

/// (token, action type, key, full value, package id, manifest offset)
type Occurrence = (String, String, String, String, u64, u64);

impl IndexFixture {
    pub fn build(packages: &[(&str, &[&str])]) -> Self {
        let temp = TempDir::new().expect("tempdir");
        let index_dir = temp.path().join("index");
        fs::create_dir_all(&index_dir).unwrap();
        let manifests = Arc::new(ManifestDir::new(temp.path().join("pkg")));
        let fixture = Self {
            _temp: temp,
            index_dir,
            manifests,
        };
        fixture.write(packages, 1);
        fixture
    }

    /// Like [`IndexFixture::build`], but package offsets live in per-package
    /// files under `pkg/` instead of `fmri_offsets.v1`.
    pub fn build_legacy(packages: &[(&str, &[&str])]) -> Self {
        let fixture = Self::build(packages);
        fixture.write_generation(packages, 1, true);
        fixture
    }

    pub fn manager(&self) -> IndexManager {
        let config = IndexConfig {
            open_timeout_ms: 50,
            open_retry_backoff_ms: 5,
            ..IndexConfig::default()
        };
        IndexManager::with_config(&self.index_dir, self.manifests.clone(), config)
    }

    /// Every manifest line with the manifest list entry of its package.
    pub fn all_lines(packages: &[(&str, &[&str])]) -> Vec<(String, String)> {
        packages
            .iter()
            .flat_map(|(fmri, lines)| {
                let entry = manifest_entry(fmri);
                lines
                    .iter()
                    .map(move |line| (entry.clone(), line.trim_end_matches('\n').to_string()))
            })
            .collect()
    }

    /// Writes manifests and a complete index generation `version`.
    pub fn write(&self, packages: &[(&str, &[&str])], version: u64) {
        self.write_generation(packages, version, false);
    }

    fn write_generation(&self, packages: &[(&str, &[&str])], version: u64, legacy: bool) {
        let mut occurrences: Vec<Occurrence> = Vec::new();
        let mut manifest_list = Vec::new();
        for (package_id, (fmri_text, lines)) in packages.iter().enumerate() {
            let fmri = PkgFmri::parse(fmri_text, None, None).unwrap();
            manifest_list.push(manifest_entry(fmri_text));

            let path = self.manifests.manifest_path(&fmri).unwrap();
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            let mut text = String::new();
            for line in lines.iter() {
                let offset = text.len() as u64;
                text.push_str(line);
                if !line.ends_with('\n') {
                    text.push('\n');
                }
                for token in SimpleActionTokenizer.tokenize(line) {
                    occurrences.push((
                        token.token,
                        token.action_type,
                        token.key,
                        token.full_value,
                        package_id as u64,
                        offset,
                    ));
                }
            }
            fs::write(&path, text).unwrap();
        }
        occurrences.sort();
        occurrences.dedup();

        let header = format!("VERSION: {version}\n");
        let mut main_text = header.clone();
        let mut token_offsets = DictMutable::new(BYTE_OFFSET_FILE);
        token_offsets.open_out_file(&self.index_dir, version).unwrap();
        let mut fmri_offsets = InvertedDict::new(FMRI_OFFSETS_FILE);
        let mut by_action_type: BTreeMap<String, BTreeSet<u64>> = BTreeMap::new();
        let mut by_key: BTreeMap<String, BTreeSet<u64>> = BTreeMap::new();
        let mut by_package: BTreeMap<u64, BTreeSet<u64>> = BTreeMap::new();

        for entry in group(&occurrences) {
            let offset = main_text.len() as u64;
            token_offsets.write_entity(&entry.token, offset).unwrap();
            let mut package_ids = BTreeSet::new();
            for action_type in &entry.action_types {
                by_action_type.entry(action_type.action_type.clone()).or_default().insert(offset);
                for key in &action_type.keys {
                    by_key.entry(key.key.clone()).or_default().insert(offset);
                    for value in &key.values {
                        package_ids.extend(value.packages.iter().map(|package| package.package_id));
                    }
                }
            }
            for package_id in package_ids {
                fmri_offsets.add_pair(package_id, offset);
                by_package.entry(package_id).or_default().insert(offset);
            }
            main_text.push_str(&transform_line(&entry));
        }
        token_offsets.close_out_file().unwrap();
        token_offsets.close_file_handle();
        fs::write(self.index_dir.join(MAIN_DICT_FILE), main_text).unwrap();
        write_dict_file(&self.index_dir, MANIFEST_LIST_FILE, version, &manifest_list).unwrap();
        if legacy {
            let _ = fs::remove_file(self.index_dir.join(FMRI_OFFSETS_FILE));
            for (package_id, offsets) in &by_package {
                let fmri = PkgFmri::parse(packages[*package_id as usize].0, None, None).unwrap();
                let dir = self.index_dir.join(LEGACY_PKG_DIR).join(fmri.name());
                fs::create_dir_all(&dir).unwrap();
                fs::write(dir.join(fmri.version().unwrap().to_string()), offset_lines(offsets)).unwrap();
            }
        } else {
            fmri_offsets
                .write_dict_file(&self.index_dir, version, |id| {
                    packages
                        .get(id as usize)
                        .map(|(fmri, _)| PkgFmri::parse(fmri, None, None).unwrap())
                })
                .unwrap();
        }

        for (prefix, groups) in [(ACTION_TYPE_PREFIX, &by_action_type), (KEY_PREFIX, &by_key)] {
            for (name, offsets) in groups {
                fs::write(self.index_dir.join(format!("{prefix}{name}")), offset_lines(offsets)).unwrap();
            }
        }
    }
}

fn offset_lines(offsets: &BTreeSet<u64>) -> String {
    offsets.iter().map(|offset| format!("{offset}\n")).collect()
}

pub(crate) fn manifest_entry(fmri: &str) -> String {
    PkgFmri::parse(fmri, None, None).unwrap().get_fmri(None, true, false)
}

/// Nests sorted occurrences into main dictionary entries.
fn group(occurrences: &[Occurrence]) -> Vec<MainDictEntry> {
    let mut entries: Vec<MainDictEntry> = Vec::new();
    for (token, action_type, key, full_value, package_id, offset) in occurrences {
        if entries.last().map_or(true, |entry| &entry.token != token) {
            entries.push(MainDictEntry {
                token: token.clone(),
                action_types: Vec::new(),
            });
        }
        let entry = entries.last_mut().unwrap();
        if entry.action_types.last().map_or(true, |at| &at.action_type != action_type) {
            entry.action_types.push(ActionTypeEntries {
                action_type: action_type.clone(),
                keys: Vec::new(),
            });
        }
        let at = entry.action_types.last_mut().unwrap();
        if at.keys.last().map_or(true, |k| &k.key != key) {
            at.keys.push(KeyEntries {
                key: key.clone(),
                values: Vec::new(),
            });
        }
        let k = at.keys.last_mut().unwrap();
        if k.values.last().map_or(true, |v| &v.full_value != full_value) {
            k.values.push(ValueEntries {
                full_value: full_value.clone(),
                packages: Vec::new(),
            });
        }
        let v = k.values.last_mut().unwrap();
        if v.packages.last().map_or(true, |p| p.package_id != *package_id) {
            v.packages.push(PackageOffsets {
                package_id: *package_id,
                offsets: Vec::new(),
            });
        }
        v.packages.last_mut().unwrap().offsets.push(*offset);
    }
    entries
}
