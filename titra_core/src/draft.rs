//! Draft lifecycle: the single in-progress dose record.
//!
//! State machine, with the draft persisted across restarts:
//!
//! ```text
//! EMPTY --take()--> PENDING_END --end_now()--> READY_TO_FINALIZE --finalize()--> EMPTY
//!   any state --discard()--> EMPTY
//! ```
//!
//! Confirmation (replace an existing take, soft validation warnings) is a
//! caller-supplied port, so the manager stays UI-agnostic.

use crate::{
    lifecycle, time, Draft, Entry, EntryFields, EntryMode, EntryStore, Error, Result,
};
use chrono::{NaiveDate, NaiveTime};
use fs2::FileExt;
use std::io::{Read, Write};
use std::path::PathBuf;
use tempfile::NamedTempFile;

/// Persistence port for the draft slot. Zero-or-one record.
pub trait DraftStore {
    fn load(&self) -> Result<Option<Draft>>;
    fn save(&self, draft: &Draft) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

/// Draft persistence as a single JSON file with file locking.
///
/// Absence of the file means "no active draft"; at most one file is ever
/// written. A draft that fails to parse is dropped with a warning rather
/// than blocking every command.
pub struct JsonDraftStore {
    path: PathBuf,
}

impl JsonDraftStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl DraftStore for JsonDraftStore {
    fn load(&self) -> Result<Option<Draft>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let file = std::fs::File::open(&self.path)?;
        file.lock_shared()?;
        let mut contents = String::new();
        let mut reader = std::io::BufReader::new(&file);
        let read = reader.read_to_string(&mut contents);
        file.unlock()?;
        read?;

        match serde_json::from_str::<Draft>(&contents) {
            Ok(draft) => Ok(Some(draft)),
            Err(e) => {
                tracing::warn!(
                    "Discarding unreadable draft file {:?}: {}",
                    self.path,
                    e
                );
                Ok(None)
            }
        }
    }

    fn save(&self, draft: &Draft) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let temp = NamedTempFile::new_in(self.path.parent().ok_or_else(|| {
            Error::Draft(format!("draft path {:?} has no parent", self.path))
        })?)?;

        temp.as_file().lock_exclusive()?;
        {
            let mut writer = std::io::BufWriter::new(temp.as_file());
            let contents = serde_json::to_string(draft)?;
            writer.write_all(contents.as_bytes())?;
            writer.flush()?;
        }
        temp.as_file().sync_all()?;
        temp.as_file().unlock()?;
        temp.persist(&self.path).map_err(|e| Error::Io(e.error))?;

        tracing::debug!("Saved draft {} to {:?}", draft.id, self.path);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl<T: DraftStore> DraftStore for &T {
    fn load(&self) -> Result<Option<Draft>> {
        (*self).load()
    }
    fn save(&self, draft: &Draft) -> Result<()> {
        (*self).save(draft)
    }
    fn clear(&self) -> Result<()> {
        (*self).clear()
    }
}

/// Holds the at-most-one in-progress dose record and drives the two-phase
/// take → end → finalize flow.
pub struct DraftManager<S: DraftStore> {
    storage: S,
}

impl<S: DraftStore> DraftManager<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    /// The persisted draft, or a fresh blank one (not yet persisted).
    pub fn current(&self) -> Result<Draft> {
        Ok(self.storage.load()?.unwrap_or_else(Draft::blank))
    }

    /// Record "dose taken now".
    ///
    /// An existing take is a destructive overwrite and must be confirmed;
    /// a declined confirmation returns Ok(None) with no state change.
    pub fn take(
        &self,
        fields: &EntryFields,
        confirm: &mut dyn FnMut(&str) -> bool,
    ) -> Result<Option<Draft>> {
        let mut draft = self.current()?;
        if draft.taken_at.is_some()
            && !confirm("A take is already recorded in the draft. Replace it?")
        {
            return Ok(None);
        }

        draft.apply_fields(fields);
        draft.taken_at = Some(time::now_local_timestamp());
        draft.end_at = None;
        draft.entry_mode = Some(EntryMode::NowButtons);
        self.storage.save(&draft)?;
        tracing::info!("Draft {} take recorded", draft.id);
        Ok(Some(draft))
    }

    /// Record "effect ended now". Requires a prior take.
    pub fn end_now(&self) -> Result<Draft> {
        let mut draft = self.current()?;
        if draft.taken_at.is_none() {
            return Err(Error::Draft("no take recorded yet; record the take first".into()));
        }

        draft.end_at = Some(time::now_local_timestamp());
        draft.entry_mode = Some(draft.entry_mode.unwrap_or(EntryMode::NowButtons));
        self.storage.save(&draft)?;
        tracing::info!("Draft {} end recorded", draft.id);
        Ok(draft)
    }

    /// Merge field edits into the draft and persist immediately, so every
    /// edit survives a restart.
    pub fn save_field_edits(&self, fields: &EntryFields) -> Result<Draft> {
        let mut draft = self.current()?;
        draft.apply_fields(fields);
        self.storage.save(&draft)?;
        Ok(draft)
    }

    /// Convert the draft plus any pending field edits into a committed
    /// entry: derive the duration, run lifecycle validation, upsert, and
    /// only then clear the draft slot.
    ///
    /// Returns Ok(None) when the user declined a soft-validation prompt.
    pub fn finalize(
        &self,
        fields: &EntryFields,
        confirm: &mut dyn FnMut(&str) -> bool,
        store: &EntryStore,
    ) -> Result<Option<Entry>> {
        let mut draft = self.current()?;
        if draft.taken_at.is_none() {
            return Err(Error::Draft("nothing to finalize; record a take first".into()));
        }

        draft.apply_fields(fields);
        let entry = match lifecycle::prepare_for_commit(draft.into_entry(), confirm) {
            Some(entry) => entry,
            None => return Ok(None),
        };

        store.upsert(entry.clone())?;
        // Commit is durable; now the slot may be freed
        self.storage.clear()?;
        tracing::info!("Draft finalized into entry {}", entry.id);
        Ok(Some(entry))
    }

    /// Clear the draft unconditionally. The caller is expected to have
    /// confirmed with the user.
    pub fn discard(&self) -> Result<()> {
        self.storage.clear()?;
        tracing::info!("Draft discarded");
        Ok(())
    }
}

/// Retroactive single-step entry, bypassing the draft machine.
///
/// Both timestamps derive from user-supplied date and wall-clock parts. An
/// end time earlier than the take time is reinterpreted as the following
/// calendar day before the duration is computed.
pub fn compose_manual_entry(
    date: NaiveDate,
    take_time: NaiveTime,
    end_time: Option<NaiveTime>,
    fields: &EntryFields,
) -> Result<Entry> {
    let taken_at = time::compose_local_timestamp(date, take_time)?;
    let mut end_at = end_time
        .map(|t| time::compose_local_timestamp(date, t))
        .transpose()?;

    if let Some(ref end) = end_at {
        let start_instant = time::parse_timestamp(&taken_at);
        let end_instant = time::parse_timestamp(end);
        if let (Some(a), Some(b)) = (start_instant, end_instant) {
            if b < a {
                end_at = time::next_day(end);
            }
        }
    }

    let mut draft = Draft::blank();
    draft.apply_fields(fields);
    draft.taken_at = Some(taken_at);
    draft.end_at = end_at;
    draft.entry_mode = Some(EntryMode::Manual);
    Ok(draft.into_entry())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    /// In-memory draft slot for state machine tests.
    #[derive(Default)]
    struct MemoryDraftStore {
        slot: RefCell<Option<Draft>>,
    }

    impl DraftStore for MemoryDraftStore {
        fn load(&self) -> Result<Option<Draft>> {
            Ok(self.slot.borrow().clone())
        }
        fn save(&self, draft: &Draft) -> Result<()> {
            *self.slot.borrow_mut() = Some(draft.clone());
            Ok(())
        }
        fn clear(&self) -> Result<()> {
            *self.slot.borrow_mut() = None;
            Ok(())
        }
    }

    fn manager() -> DraftManager<MemoryDraftStore> {
        DraftManager::new(MemoryDraftStore::default())
    }

    fn accept() -> impl FnMut(&str) -> bool {
        |_: &str| true
    }

    fn fields(medication: &str, dose: f64) -> EntryFields {
        EntryFields {
            medication: Some(medication.into()),
            dose_mg: Some(dose),
            ..Default::default()
        }
    }

    #[test]
    fn test_take_sets_timestamps_and_mode() {
        let manager = manager();
        let draft = manager
            .take(&fields("Methylphenidate", 10.0), &mut accept())
            .unwrap()
            .unwrap();

        assert!(draft.taken_at.is_some());
        assert!(draft.end_at.is_none());
        assert_eq!(draft.entry_mode, Some(EntryMode::NowButtons));
        assert_eq!(draft.medication, "Methylphenidate");
    }

    #[test]
    fn test_second_take_needs_confirmation() {
        let manager = manager();
        manager
            .take(&fields("Methylphenidate", 10.0), &mut accept())
            .unwrap();
        let first_taken_at = manager.current().unwrap().taken_at;

        // Declined: nothing changes
        let mut refuse = |_: &str| false;
        let result = manager
            .take(&fields("Methylphenidate", 15.0), &mut refuse)
            .unwrap();
        assert!(result.is_none());
        assert_eq!(manager.current().unwrap().taken_at, first_taken_at);
        assert_eq!(manager.current().unwrap().dose_mg, Some(10.0));

        // Accepted: take replaced, end cleared
        let replaced = manager
            .take(&fields("Methylphenidate", 15.0), &mut accept())
            .unwrap()
            .unwrap();
        assert_eq!(replaced.dose_mg, Some(15.0));
        assert!(replaced.end_at.is_none());
    }

    #[test]
    fn test_end_now_without_take_is_reported() {
        let manager = manager();
        let err = manager.end_now().unwrap_err();
        assert!(matches!(err, Error::Draft(_)));
        // State unchanged: still no persisted draft
        assert!(manager.storage.load().unwrap().is_none());
    }

    #[test]
    fn test_end_now_preserves_entry_mode() {
        let manager = manager();
        manager
            .take(&fields("Methylphenidate", 10.0), &mut accept())
            .unwrap();
        let draft = manager.end_now().unwrap();
        assert!(draft.end_at.is_some());
        assert_eq!(draft.entry_mode, Some(EntryMode::NowButtons));
    }

    #[test]
    fn test_field_edits_survive_reload() {
        let storage = MemoryDraftStore::default();
        {
            let manager = DraftManager::new(&storage);
            manager
                .save_field_edits(&EntryFields {
                    notes: Some("mild headache".into()),
                    benefit: Some(7),
                    ..Default::default()
                })
                .unwrap();
        }
        // A fresh manager over the same storage sees the edits
        let manager = DraftManager::new(&storage);
        let draft = manager.current().unwrap();
        assert_eq!(draft.notes, "mild headache");
        assert_eq!(draft.benefit, 7);
    }

    #[test]
    fn test_finalize_commits_then_clears_draft() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = EntryStore::new(temp_dir.path().join("entries.json"));
        let manager = manager();

        manager
            .take(&fields("Methylphenidate", 10.0), &mut accept())
            .unwrap();
        manager.end_now().unwrap();

        let entry = manager
            .finalize(&EntryFields::default(), &mut accept(), &store)
            .unwrap()
            .unwrap();

        assert_eq!(store.get(&entry.id).unwrap(), Some(entry.clone()));
        assert!(manager.storage.load().unwrap().is_none());
        // Take and end were both "now", so the derived duration is ~0
        assert_eq!(entry.duration_min, Some(0));
        assert_eq!(entry.entry_mode, EntryMode::NowButtons);

        // Next cycle starts from a fresh id
        assert_ne!(manager.current().unwrap().id, entry.id);
    }

    #[test]
    fn test_finalize_without_take_is_reported() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = EntryStore::new(temp_dir.path().join("entries.json"));
        let manager = manager();

        let err = manager
            .finalize(&EntryFields::default(), &mut accept(), &store)
            .unwrap_err();
        assert!(matches!(err, Error::Draft(_)));
        assert!(store.list_all().unwrap().is_empty());
    }

    #[test]
    fn test_finalize_declined_warning_changes_nothing() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = EntryStore::new(temp_dir.path().join("entries.json"));
        let manager = manager();

        // Empty medication triggers a soft warning
        manager.take(&EntryFields::default(), &mut accept()).unwrap();
        let mut refuse = |_: &str| false;
        let result = manager
            .finalize(&EntryFields::default(), &mut refuse, &store)
            .unwrap();

        assert!(result.is_none());
        assert!(store.list_all().unwrap().is_empty());
        assert!(manager.storage.load().unwrap().is_some());
    }

    #[test]
    fn test_json_draft_store_round_trip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let storage = JsonDraftStore::new(temp_dir.path().join("draft.json"));

        assert!(storage.load().unwrap().is_none());

        let mut draft = Draft::blank();
        draft.medication = "Methylphenidate".into();
        draft.taken_at = Some("2024-01-01T08:00:00+01:00".into());
        storage.save(&draft).unwrap();

        assert_eq!(storage.load().unwrap(), Some(draft));

        storage.clear().unwrap();
        assert!(storage.load().unwrap().is_none());
        // Clearing twice stays a no-op
        storage.clear().unwrap();
    }

    #[test]
    fn test_json_draft_store_drops_corrupt_draft() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("draft.json");
        std::fs::write(&path, "{ broken").unwrap();

        let storage = JsonDraftStore::new(&path);
        assert!(storage.load().unwrap().is_none());
    }

    #[test]
    fn test_manual_entry_rolls_end_to_next_day() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        let take = NaiveTime::from_hms_opt(22, 0, 0).unwrap();
        let end = NaiveTime::from_hms_opt(1, 0, 0).unwrap();

        let entry = compose_manual_entry(
            date,
            take,
            Some(end),
            &fields("Methylphenidate", 10.0),
        )
        .unwrap();

        assert_eq!(entry.entry_mode, EntryMode::Manual);
        assert_eq!(entry.duration_min, Some(180));
    }

    #[test]
    fn test_manual_entry_without_end_time() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        let take = NaiveTime::from_hms_opt(8, 30, 0).unwrap();

        let entry =
            compose_manual_entry(date, take, None, &fields("Methylphenidate", 10.0)).unwrap();

        assert!(entry.taken_at.is_some());
        assert!(entry.end_at.is_none());
        assert_eq!(entry.duration_min, None);
    }
}
