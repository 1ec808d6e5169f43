//! Bidirectional id <-> entity table, one entity per line.
//!
//! Ids are line numbers and stay stable for the life of the table. A
//! removed entity leaves a free slot, written as a blank line, that the
//! next insertion reuses.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use super::{write_dict_file, IndexStore, StoreFile};
use crate::error::Result;

#[derive(Debug)]
pub struct ListDict {
    file: StoreFile,
    slots: Vec<Option<String>>,
    ids: HashMap<String, usize>,
    free: BTreeSet<usize>,
}

impl ListDict {
    pub fn new(name: &str) -> Self {
        Self {
            file: StoreFile::new(name),
            slots: Vec::new(),
            ids: HashMap::new(),
            free: BTreeSet::new(),
        }
    }

    /// Number of slots, free ones included.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Stores `entity` and returns its id. A real entity takes the lowest
    /// free slot if there is one; `is_empty` appends a new free slot.
    pub fn add_entity(&mut self, entity: &str, is_empty: bool) -> usize {
        if is_empty {
            let id = self.slots.len();
            self.slots.push(None);
            self.free.insert(id);
            return id;
        }
        let id = match self.free.pop_first() {
            Some(id) => {
                self.slots[id] = Some(entity.to_string());
                id
            }
            None => {
                self.slots.push(Some(entity.to_string()));
                self.slots.len() - 1
            }
        };
        self.ids.insert(entity.to_string(), id);
        id
    }

    /// Returns the id of `entity`, storing it first if needed.
    pub fn get_id_and_add(&mut self, entity: &str) -> usize {
        match self.ids.get(entity) {
            Some(id) => *id,
            None => self.add_entity(entity, false),
        }
    }

    /// Frees slot `id`. Other ids are unaffected.
    pub fn remove_id(&mut self, id: usize) -> Option<String> {
        let entity = self.slots.get_mut(id)?.take()?;
        self.ids.remove(&entity);
        self.free.insert(id);
        Some(entity)
    }

    pub fn remove_entity(&mut self, entity: &str) -> Option<usize> {
        let id = *self.ids.get(entity)?;
        self.remove_id(id);
        Some(id)
    }

    pub fn get_entity(&self, id: usize) -> Option<&str> {
        self.slots.get(id)?.as_deref()
    }

    pub fn get_id(&self, entity: &str) -> Option<usize> {
        self.ids.get(entity).copied()
    }

    pub fn has_entity(&self, entity: &str) -> bool {
        self.ids.contains_key(entity)
    }

    pub fn has_empty(&self) -> bool {
        !self.free.is_empty()
    }

    /// Claims the highest free id without storing anything in it.
    pub fn get_next_empty(&mut self) -> Option<usize> {
        self.free.pop_last()
    }

    pub fn write_dict_file(&self, dir: &Path, version: u64) -> Result<()> {
        write_dict_file(
            dir,
            self.file.name(),
            version,
            self.slots.iter().map(|slot| slot.as_deref().unwrap_or("")),
        )
    }
}

impl IndexStore for ListDict {
    fn store_file(&self) -> &StoreFile {
        &self.file
    }

    fn store_file_mut(&mut self) -> &mut StoreFile {
        &mut self.file
    }

    fn read_dict_file(&mut self) -> Result<()> {
        self.slots.clear();
        self.ids.clear();
        self.free.clear();
        let Self {
            file,
            slots,
            ids,
            free,
        } = self;
        file.for_each_line(|id, line| {
            if line.is_empty() {
                slots.push(None);
                free.insert(id);
            } else {
                slots.push(Some(line.to_string()));
                ids.insert(line.to_string(), id);
            }
            Ok(())
        })?;
        self.file.mark_read();
        Ok(())
    }

    fn count_entries_removed_during_partial_indexing(&self) -> usize {
        self.slots.len()
    }
}
