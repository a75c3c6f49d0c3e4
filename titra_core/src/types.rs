//! Core domain types for the titration log.
//!
//! This module defines the fundamental records of the system:
//! - Finalized log entries (the persisted history)
//! - The in-progress draft (at most one at any time)
//! - Partial field edits applied to either

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current on-disk and export schema version.
pub const SCHEMA_VERSION: u32 = 2;

/// Known side-effect vocabulary. Codes outside this list are kept as-is so
/// imports from newer schema revisions survive a round trip.
pub const SIDE_EFFECT_CODES: [&str; 3] =
    ["appetite_low", "anxiety_irritability", "sleep_impact"];

/// Galenic form of the dose
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum DoseForm {
    #[default]
    #[serde(rename = "unknown")]
    Unknown,
    #[serde(rename = "IR")]
    Ir,
    #[serde(rename = "LP")]
    Lp,
}

impl DoseForm {
    pub fn as_str(&self) -> &'static str {
        match self {
            DoseForm::Unknown => "unknown",
            DoseForm::Ir => "IR",
            DoseForm::Lp => "LP",
        }
    }

    /// Parse a form label, case-insensitively. Unrecognized labels map to None.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "unknown" => Some(DoseForm::Unknown),
            "ir" => Some(DoseForm::Ir),
            "lp" => Some(DoseForm::Lp),
            _ => None,
        }
    }
}

/// Provenance of a record: live two-step capture vs. retroactive entry.
/// Immutable after creation.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EntryMode {
    NowButtons,
    Manual,
}

impl EntryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryMode::NowButtons => "now_buttons",
            EntryMode::Manual => "manual",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "now_buttons" => Some(EntryMode::NowButtons),
            "manual" => Some(EntryMode::Manual),
            _ => None,
        }
    }
}

/// A finalized, persisted dose record.
///
/// Field names are serialized in camelCase; this is the stored table format
/// and the JSON export contract. Timestamps are kept as the ISO string they
/// were serialized with (`YYYY-MM-DDTHH:MM:SS±HH:MM`) so history ordering and
/// exports are byte-stable across zone changes.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    pub id: String,
    pub schema_version: u32,
    pub taken_at: Option<String>,
    pub end_at: Option<String>,
    /// Minutes between `taken_at` and `end_at`. Always derived, never edited.
    pub duration_min: Option<i64>,
    pub medication: String,
    pub dose_mg: Option<f64>,
    pub form: DoseForm,
    pub benefit: i32,
    pub crash: i32,
    pub side_effects: Vec<String>,
    pub notes: String,
    pub entry_mode: EntryMode,
}

impl Entry {
    /// Dose rendered for display and grouping, without a trailing `.0`
    /// (doses are 0.5 mg increments). Empty string when absent.
    pub fn dose_label(&self) -> String {
        match self.dose_mg {
            Some(d) if d.fract() == 0.0 => format!("{}", d as i64),
            Some(d) => format!("{d}"),
            None => String::new(),
        }
    }
}

/// The in-progress, not-yet-finalized dose record.
///
/// Same shape as [`Entry`] but the timestamps and mode may still be unset.
/// Zero or one draft exists at any time; it never appears in the history.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Draft {
    pub id: String,
    pub schema_version: u32,
    pub taken_at: Option<String>,
    pub end_at: Option<String>,
    pub entry_mode: Option<EntryMode>,
    pub medication: String,
    pub dose_mg: Option<f64>,
    pub form: DoseForm,
    pub benefit: i32,
    pub crash: i32,
    pub side_effects: Vec<String>,
    pub notes: String,
}

impl Draft {
    /// A blank draft with a freshly generated id.
    pub fn blank() -> Self {
        Draft {
            id: Uuid::new_v4().to_string(),
            schema_version: SCHEMA_VERSION,
            taken_at: None,
            end_at: None,
            entry_mode: None,
            medication: String::new(),
            dose_mg: None,
            form: DoseForm::Unknown,
            benefit: 0,
            crash: 0,
            side_effects: Vec::new(),
            notes: String::new(),
        }
    }

    /// Merge non-timestamp field edits into the draft.
    pub fn apply_fields(&mut self, fields: &EntryFields) {
        if let Some(ref m) = fields.medication {
            self.medication = m.clone();
        }
        if let Some(d) = fields.dose_mg {
            self.dose_mg = Some(d);
        }
        if let Some(f) = fields.form {
            self.form = f;
        }
        if let Some(b) = fields.benefit {
            self.benefit = b;
        }
        if let Some(c) = fields.crash {
            self.crash = c;
        }
        if let Some(ref fx) = fields.side_effects {
            self.side_effects = fx.clone();
        }
        if let Some(ref n) = fields.notes {
            self.notes = n.clone();
        }
    }

    /// Convert the draft into an entry candidate. The duration is derived
    /// from the timestamps; callers run the result through lifecycle
    /// validation before committing it.
    pub fn into_entry(self) -> Entry {
        let duration_min =
            crate::time::duration_minutes(self.taken_at.as_deref(), self.end_at.as_deref());
        Entry {
            id: self.id,
            schema_version: SCHEMA_VERSION,
            taken_at: self.taken_at,
            end_at: self.end_at,
            duration_min,
            medication: self.medication,
            dose_mg: self.dose_mg,
            form: self.form,
            benefit: self.benefit,
            crash: self.crash,
            side_effects: self.side_effects,
            notes: self.notes,
            entry_mode: self.entry_mode.unwrap_or(EntryMode::Manual),
        }
    }
}

/// Partial, non-timestamp field edits.
///
/// `None` means "leave unchanged"; absence is not a reset.
#[derive(Clone, Debug, Default)]
pub struct EntryFields {
    pub medication: Option<String>,
    pub dose_mg: Option<f64>,
    pub form: Option<DoseForm>,
    pub benefit: Option<i32>,
    pub crash: Option<i32>,
    pub side_effects: Option<Vec<String>>,
    pub notes: Option<String>,
}

impl EntryFields {
    /// Merge the edits into an existing entry. The entry mode is never
    /// touched here; provenance is immutable after creation.
    pub fn apply_to_entry(&self, entry: &mut Entry) {
        if let Some(ref m) = self.medication {
            entry.medication = m.clone();
        }
        if let Some(d) = self.dose_mg {
            entry.dose_mg = Some(d);
        }
        if let Some(f) = self.form {
            entry.form = f;
        }
        if let Some(b) = self.benefit {
            entry.benefit = b;
        }
        if let Some(c) = self.crash {
            entry.crash = c;
        }
        if let Some(ref fx) = self.side_effects {
            entry.side_effects = fx.clone();
        }
        if let Some(ref n) = self.notes {
            entry.notes = n.clone();
        }
    }
}
