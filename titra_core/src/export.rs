//! JSON/CSV export and lenient JSON import.
//!
//! The JSON payload is the backup format and the import contract; CSV is the
//! spreadsheet-facing projection with a fixed 13-column layout.

use crate::{
    time, DoseForm, Entry, EntryMode, EntryStore, Error, Result, SCHEMA_VERSION,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Backup payload: `{ schemaVersion, exportedAt, entries }`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportPayload {
    pub schema_version: u32,
    pub exported_at: String,
    pub entries: Vec<Entry>,
}

/// Serialize entries to the pretty-printed backup payload.
pub fn export_json(entries: Vec<Entry>) -> Result<String> {
    let payload = ExportPayload {
        schema_version: SCHEMA_VERSION,
        exported_at: time::now_local_timestamp(),
        entries,
    };
    Ok(serde_json::to_string_pretty(&payload)?)
}

/// A row in the CSV output. Column order and header names are fixed.
#[derive(Debug, Serialize)]
struct CsvRow {
    id: String,
    #[serde(rename = "takenAt")]
    taken_at: Option<String>,
    #[serde(rename = "endAt")]
    end_at: Option<String>,
    #[serde(rename = "durationMin")]
    duration_min: Option<i64>,
    medication: String,
    #[serde(rename = "doseMg")]
    dose_mg: String,
    form: &'static str,
    benefit: i32,
    crash: i32,
    #[serde(rename = "sideEffects")]
    side_effects: String,
    notes: String,
    #[serde(rename = "entryMode")]
    entry_mode: &'static str,
    #[serde(rename = "schemaVersion")]
    schema_version: u32,
}

impl From<&Entry> for CsvRow {
    fn from(entry: &Entry) -> Self {
        CsvRow {
            id: entry.id.clone(),
            taken_at: entry.taken_at.clone(),
            end_at: entry.end_at.clone(),
            duration_min: entry.duration_min,
            medication: entry.medication.clone(),
            dose_mg: entry.dose_label(),
            form: entry.form.as_str(),
            benefit: entry.benefit,
            crash: entry.crash,
            side_effects: entry.side_effects.join("|"),
            notes: entry.notes.clone(),
            entry_mode: entry.entry_mode.as_str(),
            schema_version: entry.schema_version,
        }
    }
}

/// Serialize entries to CSV. Fields containing a comma, quote, or newline
/// get standard double-quote escaping; `sideEffects` is `|`-joined.
pub fn export_csv(entries: &[Entry]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for entry in entries {
        writer.serialize(CsvRow::from(entry))?;
    }
    writer.flush()?;
    let bytes = writer
        .into_inner()
        .map_err(|e| Error::Other(format!("CSV buffer error: {e}")))?;
    String::from_utf8(bytes).map_err(|e| Error::Other(format!("CSV not UTF-8: {e}")))
}

/// Import a backup payload and apply it with one bulk upsert.
///
/// Malformed JSON or a missing `entries` array aborts with no state change.
/// Each element is decoded leniently; returns the imported count.
pub fn import_entries(json: &str, store: &EntryStore) -> Result<usize> {
    let data: Value =
        serde_json::from_str(json).map_err(|e| Error::Import(format!("invalid JSON: {e}")))?;
    let items = data
        .get("entries")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            Error::Import("unexpected format (expected { \"entries\": [...] })".into())
        })?;

    let cleaned: Vec<Entry> = items.iter().map(lenient_entry).collect();
    let count = store.bulk_upsert(cleaned)?;
    tracing::info!("Imported {} entries", count);
    Ok(count)
}

/// Decode one payload element, defaulting every missing or mistyped field.
fn lenient_entry(v: &Value) -> Entry {
    let taken_at = non_empty_string(v.get("takenAt"));
    let end_at = non_empty_string(v.get("endAt"));
    // The payload's duration is kept when present; only recomputed if absent
    let duration_min = v
        .get("durationMin")
        .and_then(Value::as_i64)
        .or_else(|| time::duration_minutes(taken_at.as_deref(), end_at.as_deref()));

    Entry {
        id: non_empty_string(v.get("id")).unwrap_or_else(|| Uuid::new_v4().to_string()),
        schema_version: v
            .get("schemaVersion")
            .and_then(Value::as_u64)
            .map(|n| n as u32)
            .unwrap_or(SCHEMA_VERSION),
        taken_at,
        end_at,
        duration_min,
        medication: v
            .get("medication")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        // Import keeps the legacy default of 0 for a missing dose instead of
        // normalizing to absence, so re-imported backups stay byte-stable.
        dose_mg: Some(dose_number(v.get("doseMg"))),
        form: v
            .get("form")
            .and_then(Value::as_str)
            .and_then(DoseForm::parse)
            .unwrap_or(DoseForm::Unknown),
        benefit: rating(v.get("benefit")),
        crash: rating(v.get("crash")),
        side_effects: v
            .get("sideEffects")
            .and_then(Value::as_array)
            .map(|codes| {
                codes
                    .iter()
                    .filter_map(Value::as_str)
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default(),
        notes: v
            .get("notes")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        entry_mode: v
            .get("entryMode")
            .and_then(Value::as_str)
            .and_then(EntryMode::parse)
            .unwrap_or(EntryMode::Manual),
    }
}

fn non_empty_string(v: Option<&Value>) -> Option<String> {
    let s = v?.as_str()?.trim();
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

/// Coerce a dose to a number, accepting numeric strings; anything else is 0.
fn dose_number(v: Option<&Value>) -> f64 {
    match v {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

/// Clamp a rating value to [0,10]; non-numeric input maps to 0.
fn rating(v: Option<&Value>) -> i32 {
    v.and_then(Value::as_f64)
        .filter(|f| f.is_finite())
        .map(|f| (f.round() as i32).clamp(0, 10))
        .unwrap_or(0)
}
