//! Durable entry table with file locking.
//!
//! The history lives in a single JSON file, one logical table keyed by entry
//! id. Every write replaces the whole file atomically (temp file, fsync,
//! rename), so a failed write leaves the previous table intact and bulk
//! operations are all-or-nothing.

use crate::{Entry, Error, Result};
use fs2::FileExt;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::PathBuf;
use tempfile::NamedTempFile;

/// Key-value persistence for finalized log entries.
pub struct EntryStore {
    path: PathBuf,
}

impl EntryStore {
    /// Create a store backed by the given JSON file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load the full table with a shared lock.
    ///
    /// A missing file is an empty store. A corrupt file is a hard error:
    /// the history must never be silently discarded.
    fn load_table(&self) -> Result<HashMap<String, Entry>> {
        if !self.path.exists() {
            return Ok(HashMap::new());
        }

        let file = std::fs::File::open(&self.path)?;
        file.lock_shared()?;

        let mut contents = String::new();
        let mut reader = std::io::BufReader::new(&file);
        let read = reader.read_to_string(&mut contents);
        file.unlock()?;
        read?;

        if contents.trim().is_empty() {
            return Ok(HashMap::new());
        }

        let entries: Vec<Entry> = serde_json::from_str(&contents)?;
        let mut table = HashMap::with_capacity(entries.len());
        for entry in entries {
            table.insert(entry.id.clone(), entry);
        }
        Ok(table)
    }

    /// Atomically replace the table file:
    /// 1. Write to a locked temp file in the same directory
    /// 2. Sync to disk
    /// 3. Rename over the original
    fn save_table(&self, table: &HashMap<String, Entry>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let temp = NamedTempFile::new_in(self.path.parent().ok_or_else(|| {
            Error::Store(format!("entry table path {:?} has no parent", self.path))
        })?)?;

        temp.as_file().lock_exclusive()?;

        {
            let mut writer = std::io::BufWriter::new(temp.as_file());
            // Stable on-disk order keeps diffs and backups readable
            let mut entries: Vec<&Entry> = table.values().collect();
            entries.sort_by(|a, b| a.id.cmp(&b.id));
            let contents = serde_json::to_string(&entries)?;
            writer.write_all(contents.as_bytes())?;
            writer.flush()?;
        }

        temp.as_file().sync_all()?;
        temp.as_file().unlock()?;
        temp.persist(&self.path).map_err(|e| Error::Io(e.error))?;

        Ok(())
    }

    /// Insert or fully replace a record by id. No partial-field merge.
    pub fn upsert(&self, entry: Entry) -> Result<()> {
        let mut table = self.load_table()?;
        let id = entry.id.clone();
        table.insert(id.clone(), entry);
        self.save_table(&table)?;
        tracing::debug!("Upserted entry {}", id);
        Ok(())
    }

    /// Delete by id. A missing id is a no-op, not an error.
    pub fn remove(&self, id: &str) -> Result<()> {
        let mut table = self.load_table()?;
        if table.remove(id).is_none() {
            tracing::debug!("Entry {} not found, nothing to remove", id);
            return Ok(());
        }
        self.save_table(&table)?;
        tracing::debug!("Removed entry {}", id);
        Ok(())
    }

    /// Fetch a single record.
    pub fn get(&self, id: &str) -> Result<Option<Entry>> {
        Ok(self.load_table()?.remove(id))
    }

    /// Every record ordered by `takenAt` descending.
    ///
    /// Comparison is on the raw timestamp strings with `""` standing in for
    /// a missing `takenAt`, which places those records last. This matches
    /// the ordering existing exports were produced with.
    pub fn list_all(&self) -> Result<Vec<Entry>> {
        let mut entries: Vec<Entry> = self.load_table()?.into_values().collect();
        entries.sort_by(|a, b| {
            let a_key = a.taken_at.as_deref().unwrap_or("");
            let b_key = b.taken_at.as_deref().unwrap_or("");
            b_key.cmp(a_key)
        });
        Ok(entries)
    }

    /// Upsert every record in one unit of work. The table file is swapped
    /// once, so readers observe either none or all of the batch.
    pub fn bulk_upsert(&self, entries: Vec<Entry>) -> Result<usize> {
        let mut table = self.load_table()?;
        let count = entries.len();
        for entry in entries {
            table.insert(entry.id.clone(), entry);
        }
        self.save_table(&table)?;
        tracing::info!("Bulk upserted {} entries", count);
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Draft;

    fn make_entry(taken_at: Option<&str>) -> Entry {
        let mut draft = Draft::blank();
        draft.medication = "Methylphenidate".into();
        draft.dose_mg = Some(10.0);
        draft.taken_at = taken_at.map(String::from);
        draft.into_entry()
    }

    fn store_in(dir: &tempfile::TempDir) -> EntryStore {
        EntryStore::new(dir.path().join("entries.json"))
    }

    #[test]
    fn test_upsert_then_get_returns_deep_equal_record() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = store_in(&temp_dir);

        let mut entry = make_entry(Some("2024-01-01T08:00:00+01:00"));
        entry.side_effects = vec!["appetite_low".into()];
        entry.notes = "first titration step".into();

        store.upsert(entry.clone()).unwrap();
        let loaded = store.get(&entry.id).unwrap();
        assert_eq!(loaded, Some(entry));
    }

    #[test]
    fn test_upsert_replaces_whole_record() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = store_in(&temp_dir);

        let mut entry = make_entry(Some("2024-01-01T08:00:00+01:00"));
        store.upsert(entry.clone()).unwrap();

        entry.benefit = 8;
        entry.notes = "revised".into();
        store.upsert(entry.clone()).unwrap();

        let loaded = store.get(&entry.id).unwrap().unwrap();
        assert_eq!(loaded.benefit, 8);
        assert_eq!(loaded.notes, "revised");
        assert_eq!(store.list_all().unwrap().len(), 1);
    }

    #[test]
    fn test_remove_missing_id_is_noop() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = store_in(&temp_dir);

        store.remove("never-written").unwrap();
        assert_eq!(store.get("never-written").unwrap(), None);

        let entry = make_entry(Some("2024-01-01T08:00:00+01:00"));
        store.upsert(entry.clone()).unwrap();
        store.remove(&entry.id).unwrap();
        assert_eq!(store.get(&entry.id).unwrap(), None);
    }

    #[test]
    fn test_list_all_orders_taken_at_descending_missing_last() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = store_in(&temp_dir);

        let oldest = make_entry(Some("2024-01-01T08:00:00+01:00"));
        let newest = make_entry(Some("2024-03-01T08:00:00+01:00"));
        let dateless = make_entry(None);
        store.upsert(oldest.clone()).unwrap();
        store.upsert(dateless.clone()).unwrap();
        store.upsert(newest.clone()).unwrap();

        let listed = store.list_all().unwrap();
        assert_eq!(listed.len(), 3);
        assert_eq!(listed[0].id, newest.id);
        assert_eq!(listed[1].id, oldest.id);
        assert_eq!(listed[2].id, dateless.id);
    }

    #[test]
    fn test_bulk_upsert_is_idempotent_by_id() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = store_in(&temp_dir);

        let batch = vec![
            make_entry(Some("2024-01-01T08:00:00+01:00")),
            make_entry(Some("2024-01-02T08:00:00+01:00")),
        ];

        assert_eq!(store.bulk_upsert(batch.clone()).unwrap(), 2);
        assert_eq!(store.bulk_upsert(batch).unwrap(), 2);
        assert_eq!(store.list_all().unwrap().len(), 2);
    }

    #[test]
    fn test_corrupt_table_is_an_error_not_a_wipe() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("entries.json");
        std::fs::write(&path, "{ not json }").unwrap();

        let store = EntryStore::new(&path);
        assert!(store.list_all().is_err());
        // The broken file is still there for manual recovery
        assert!(path.exists());
    }

    #[test]
    fn test_missing_file_is_empty_store() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = store_in(&temp_dir);
        assert!(store.list_all().unwrap().is_empty());
    }
}
