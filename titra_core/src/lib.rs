#![forbid(unsafe_code)]

//! Core domain model and business logic for the titra medication-titration log.
//!
//! This crate provides:
//! - Domain types (entries, drafts, field edits)
//! - The timestamp/duration model
//! - Durable entry and draft persistence
//! - Lifecycle validation before commit
//! - Aggregation, export/import, and the printable report

pub mod types;
pub mod error;
pub mod time;
pub mod config;
pub mod logging;
pub mod store;
pub mod draft;
pub mod lifecycle;
pub mod export;
pub mod report;

// Re-export commonly used types
pub use error::{Error, Result};
pub use types::*;
pub use config::Config;
pub use store::EntryStore;
pub use draft::{compose_manual_entry, DraftManager, DraftStore, JsonDraftStore};
pub use lifecycle::prepare_for_commit;
pub use export::{export_csv, export_json, import_entries, ExportPayload};
pub use report::{build_report, group_by_dose, median_of, summarize_groups, GroupSummary};
