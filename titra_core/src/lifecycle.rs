//! Normalization and sanity checks applied to every record before it is
//! committed to the store.
//!
//! Soft problems (empty medication, missing dose) are not validation
//! failures: they go through the caller-supplied confirmation port, and a
//! declined prompt aborts the commit with no state change.

use crate::{time, Entry};
use std::collections::HashSet;

/// Trim and collapse internal whitespace.
pub fn normalize_medication(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Round to the nearest 0.5 mg. Non-positive or non-finite input is the
/// absence value, never zero.
pub fn normalize_dose(dose: Option<f64>) -> Option<f64> {
    let d = dose?;
    if !d.is_finite() || d <= 0.0 {
        return None;
    }
    Some((d * 2.0).round() / 2.0)
}

/// Deduplicate side-effect codes, keeping first-seen order. Codes outside
/// the known vocabulary pass through untouched so forward-compatible
/// imports are not rejected.
pub fn dedup_side_effects(codes: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for code in codes {
        let code = code.trim();
        if code.is_empty() {
            continue;
        }
        if seen.insert(code.to_string()) {
            out.push(code.to_string());
        }
    }
    out
}

/// Normalize a raw record for commit.
///
/// Ratings are clamped to [0,10], text fields normalized, the duration
/// recomputed from the timestamps (a caller-supplied value is never
/// trusted). Returns None when the user declined a soft warning.
pub fn prepare_for_commit(
    mut raw: Entry,
    confirm: &mut dyn FnMut(&str) -> bool,
) -> Option<Entry> {
    raw.benefit = raw.benefit.clamp(0, 10);
    raw.crash = raw.crash.clamp(0, 10);
    raw.medication = normalize_medication(&raw.medication);
    raw.dose_mg = normalize_dose(raw.dose_mg);
    raw.side_effects = dedup_side_effects(&raw.side_effects);
    raw.notes = raw.notes.trim().to_string();
    raw.duration_min = time::duration_minutes(raw.taken_at.as_deref(), raw.end_at.as_deref());

    if raw.medication.is_empty() && !confirm("Medication is empty. Save anyway?") {
        return None;
    }
    if raw.dose_mg.is_none() && !confirm("Dose is empty. Save anyway?") {
        return None;
    }

    Some(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Draft;

    fn accept() -> impl FnMut(&str) -> bool {
        |_: &str| true
    }

    fn raw_entry() -> Entry {
        let mut draft = Draft::blank();
        draft.medication = "Methylphenidate".into();
        draft.dose_mg = Some(10.0);
        draft.into_entry()
    }

    #[test]
    fn test_ratings_clamped_to_scale() {
        let mut raw = raw_entry();
        raw.benefit = 14;
        raw.crash = -3;

        let entry = prepare_for_commit(raw, &mut accept()).unwrap();
        assert_eq!(entry.benefit, 10);
        assert_eq!(entry.crash, 0);
    }

    #[test]
    fn test_medication_whitespace_normalized() {
        assert_eq!(
            normalize_medication("  Methylphenidate   LP  "),
            "Methylphenidate LP"
        );
        assert_eq!(normalize_medication("\tRitaline\n10"), "Ritaline 10");
    }

    #[test]
    fn test_dose_rounds_to_half_steps() {
        assert_eq!(normalize_dose(Some(19.8)), Some(20.0));
        assert_eq!(normalize_dose(Some(7.3)), Some(7.5));
        assert_eq!(normalize_dose(Some(7.1)), Some(7.0));
    }

    #[test]
    fn test_invalid_dose_becomes_absence_not_zero() {
        assert_eq!(normalize_dose(Some(0.0)), None);
        assert_eq!(normalize_dose(Some(-5.0)), None);
        assert_eq!(normalize_dose(Some(f64::NAN)), None);
        assert_eq!(normalize_dose(Some(f64::INFINITY)), None);
        assert_eq!(normalize_dose(None), None);
    }

    #[test]
    fn test_side_effects_deduplicated_unknown_kept() {
        let codes = vec![
            "appetite_low".to_string(),
            "appetite_low".to_string(),
            "brand_new_code".to_string(),
            " sleep_impact ".to_string(),
            "".to_string(),
        ];
        assert_eq!(
            dedup_side_effects(&codes),
            vec!["appetite_low", "brand_new_code", "sleep_impact"]
        );
    }

    #[test]
    fn test_duration_recomputed_never_trusted() {
        let mut raw = raw_entry();
        raw.taken_at = Some("2024-01-01T08:00:00+01:00".into());
        raw.end_at = Some("2024-01-01T10:30:00+01:00".into());
        raw.duration_min = Some(9999);

        let entry = prepare_for_commit(raw, &mut accept()).unwrap();
        assert_eq!(entry.duration_min, Some(150));
    }

    #[test]
    fn test_empty_medication_asks_once_and_respects_refusal() {
        let mut raw = raw_entry();
        raw.medication = "   ".into();

        let mut prompts = Vec::new();
        let mut record_and_refuse = |msg: &str| {
            prompts.push(msg.to_string());
            false
        };
        assert!(prepare_for_commit(raw.clone(), &mut record_and_refuse).is_none());
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("Medication"));

        // Accepting the warning lets the commit proceed
        let entry = prepare_for_commit(raw, &mut accept()).unwrap();
        assert_eq!(entry.medication, "");
    }

    #[test]
    fn test_no_prompt_when_fields_present() {
        let mut called = false;
        let mut spy = |_: &str| {
            called = true;
            true
        };
        let entry = prepare_for_commit(raw_entry(), &mut spy).unwrap();
        assert!(!called);
        assert_eq!(entry.dose_mg, Some(10.0));
    }
}
