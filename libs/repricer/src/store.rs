//! Persisted item record set.

use crate::Result;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::info;
use types::ItemRecord;

/// The engine's working set of [`ItemRecord`]s.
///
/// Records are held in a vector (the selector re-orders it by staleness
/// mid-run) with an item-id index kept alongside; lookups are explicit, there
/// are no sparse-array semantics. Saved files are sorted by item id so diffs
/// between runs stay stable, and written via a temp-file rename so a crashed
/// run never leaves a torn file behind.
pub struct RecordStore {
    path: PathBuf,
    records: Vec<ItemRecord>,
    by_id: HashMap<u32, usize>,
}

impl RecordStore {
    /// Load the record set; a missing file is an empty store.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let records: Vec<ItemRecord> = if path.exists() {
            serde_json::from_str(&std::fs::read_to_string(path)?)?
        } else {
            Vec::new()
        };

        info!("Loaded {} item records", records.len());
        Ok(Self::from_records(path, records))
    }

    pub fn from_records(path: impl AsRef<Path>, records: Vec<ItemRecord>) -> Self {
        let by_id = records
            .iter()
            .enumerate()
            .map(|(idx, rec)| (rec.item_id, idx))
            .collect();

        Self {
            path: path.as_ref().to_path_buf(),
            records,
            by_id,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, item_id: u32) -> bool {
        self.by_id.contains_key(&item_id)
    }

    pub fn get(&self, item_id: u32) -> Option<&ItemRecord> {
        self.by_id.get(&item_id).map(|&idx| &self.records[idx])
    }

    pub fn get_mut(&mut self, item_id: u32) -> Option<&mut ItemRecord> {
        self.by_id
            .get(&item_id)
            .map(|&idx| &mut self.records[idx])
    }

    /// Add a newly discovered item. Existing records are never replaced.
    pub fn insert(&mut self, record: ItemRecord) {
        if self.contains(record.item_id) {
            return;
        }
        self.by_id.insert(record.item_id, self.records.len());
        self.records.push(record);
    }

    pub fn iter(&self) -> impl Iterator<Item = &ItemRecord> {
        self.records.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ItemRecord> {
        self.records.iter_mut()
    }

    /// Order records oldest-verification-first so capped passes favor stale
    /// data, and rebuild the index.
    pub fn sort_by_staleness(&mut self) {
        self.records
            .sort_by_key(|rec| (rec.last_verified_at, rec.item_id));
        self.by_id = self
            .records
            .iter()
            .enumerate()
            .map(|(idx, rec)| (rec.item_id, idx))
            .collect();
    }

    /// Save sorted by item id, atomically (write-new-then-replace).
    pub fn save(&self) -> Result<()> {
        let mut sorted: Vec<&ItemRecord> = self.records.iter().collect();
        sorted.sort_by_key(|rec| rec.item_id);

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(&sorted)?)?;
        std::fs::rename(&tmp, &self.path)?;

        Ok(())
    }
}
