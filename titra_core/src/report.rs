//! Aggregation and the printable report.
//!
//! Entries group by the exact (medication, dose, form) tuple; per-group
//! medians feed a summary table. The report is a static HTML document built
//! from an already-fetched snapshot, a pure projection with no mutation.

use crate::{time, DoseForm, Entry};
use std::collections::HashMap;

const REPORT_TITLE: &str = "Titration report (self-tracking)";
const DISCLAIMER: &str = "Personal tracking tool. Not a substitute for medical advice.";

/// Literal grouping key: `medication__dose__form`. No fuzzy matching.
pub fn group_key(entry: &Entry) -> String {
    format!(
        "{}__{}__{}",
        entry.medication,
        entry.dose_label(),
        entry.form.as_str()
    )
}

/// Partition entries by grouping key.
pub fn group_by_dose(entries: &[Entry]) -> HashMap<String, Vec<&Entry>> {
    let mut groups: HashMap<String, Vec<&Entry>> = HashMap::new();
    for entry in entries {
        groups.entry(group_key(entry)).or_default().push(entry);
    }
    groups
}

/// Median over the present, finite values. Even-length sets average the
/// middle pair; empty input is the absence value.
pub fn median_of(values: &[Option<f64>]) -> Option<f64> {
    let mut xs: Vec<f64> = values
        .iter()
        .filter_map(|v| *v)
        .filter(|x| x.is_finite())
        .collect();
    if xs.is_empty() {
        return None;
    }
    xs.sort_by(|a, b| a.total_cmp(b));
    let mid = xs.len() / 2;
    Some(if xs.len() % 2 == 1 {
        xs[mid]
    } else {
        (xs[mid - 1] + xs[mid]) / 2.0
    })
}

/// Per-(medication, dose, form) summary line.
#[derive(Clone, Debug, PartialEq)]
pub struct GroupSummary {
    pub medication: String,
    pub dose: String,
    pub form: DoseForm,
    pub count: usize,
    /// Median duration converted to hours, one decimal.
    pub median_duration_hours: Option<f64>,
    pub median_benefit: Option<f64>,
    pub median_crash: Option<f64>,
}

/// Summarize every group, sorted by medication then dose label.
pub fn summarize_groups(entries: &[Entry]) -> Vec<GroupSummary> {
    let mut summaries: Vec<GroupSummary> = group_by_dose(entries)
        .into_values()
        .map(|group| {
            let durations: Vec<Option<f64>> = group
                .iter()
                .map(|e| e.duration_min.map(|m| m as f64))
                .collect();
            let benefits: Vec<Option<f64>> =
                group.iter().map(|e| Some(e.benefit as f64)).collect();
            let crashes: Vec<Option<f64>> =
                group.iter().map(|e| Some(e.crash as f64)).collect();
            let first = group[0];
            GroupSummary {
                medication: first.medication.clone(),
                dose: first.dose_label(),
                form: first.form,
                count: group.len(),
                median_duration_hours: median_of(&durations)
                    .map(|m| (m / 60.0 * 10.0).round() / 10.0),
                median_benefit: median_of(&benefits),
                median_crash: median_of(&crashes),
            }
        })
        .collect();

    summaries.sort_by(|a, b| {
        format!("{}{}", a.medication, a.dose).cmp(&format!("{}{}", b.medication, b.dose))
    });
    summaries
}

fn html_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn human_date(ts: Option<&str>) -> String {
    match ts.and_then(time::parse_timestamp) {
        Some(dt) => dt.format("%a %d %b %Y %H:%M").to_string(),
        None => ts.map(str::to_string).unwrap_or_else(|| "—".into()),
    }
}

fn duration_label(duration_min: Option<i64>) -> String {
    match duration_min {
        Some(m) => format!("{} h", (m as f64 / 6.0).round() / 10.0),
        None => "—".into(),
    }
}

fn median_label(v: Option<f64>) -> String {
    match v {
        Some(x) => format!("{}", (x * 10.0).round() / 10.0),
        None => "—".into(),
    }
}

fn dash_if_empty(s: &str) -> &str {
    if s.is_empty() {
        "—"
    } else {
        s
    }
}

/// Scatter of duration (hours) vs crash over entries carrying both.
/// Returns None when no entry qualifies.
fn scatter_svg(rows: &[&Entry]) -> Option<String> {
    let points: Vec<(f64, i32)> = rows
        .iter()
        .filter_map(|e| e.duration_min.map(|m| (m as f64 / 60.0, e.crash)))
        .collect();
    if points.is_empty() {
        return None;
    }

    let max_hours = points.iter().map(|p| p.0).fold(1.0_f64, f64::max);
    let circles: String = points
        .iter()
        .map(|(hours, crash)| {
            let cx = 30.0 + (hours / max_hours) * 540.0;
            let cy = 180.0 - (f64::from(*crash) / 10.0) * 160.0;
            format!(
                r##"<circle cx="{cx:.1}" cy="{cy:.1}" r="3" fill="#0ea5e9" fill-opacity="0.7"/>"##
            )
        })
        .collect();

    Some(format!(
        r##"<svg viewBox="0 0 600 200" role="img" aria-label="duration vs crash">
<line x1="30" y1="180" x2="570" y2="180" stroke="#94a3b8"/>
<line x1="30" y1="20" x2="30" y2="180" stroke="#94a3b8"/>
<text x="300" y="198" font-size="10" text-anchor="middle">duration (h, max {max_hours:.1})</text>
<text x="10" y="100" font-size="10" text-anchor="middle" transform="rotate(-90 10 100)">crash /10</text>
{circles}
</svg>"##
    ))
}

/// Build the static, read-only report: per-group summary, chronological
/// table (by `takenAt` ascending), and the duration-vs-crash scatter.
pub fn build_report(entries: &[Entry]) -> String {
    let mut rows: Vec<&Entry> = entries.iter().collect();
    rows.sort_by(|a, b| {
        a.taken_at
            .as_deref()
            .unwrap_or("")
            .cmp(b.taken_at.as_deref().unwrap_or(""))
    });

    let summary_rows: String = summarize_groups(entries)
        .iter()
        .map(|s| {
            format!(
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
                html_escape(dash_if_empty(&s.medication)),
                html_escape(dash_if_empty(&s.dose)),
                if s.form == DoseForm::Unknown { "—".into() } else { s.form.as_str().to_string() },
                s.count,
                s.median_duration_hours
                    .map(|h| format!("{h} h"))
                    .unwrap_or_else(|| "—".into()),
                median_label(s.median_benefit),
                median_label(s.median_crash),
            )
        })
        .collect();

    let table_rows: String = rows
        .iter()
        .map(|e| {
            format!(
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
                html_escape(&human_date(e.taken_at.as_deref())),
                html_escape(dash_if_empty(&e.medication)),
                html_escape(dash_if_empty(&e.dose_label())),
                if e.form == DoseForm::Unknown { "—".into() } else { e.form.as_str().to_string() },
                html_escape(&duration_label(e.duration_min)),
                e.benefit,
                e.crash,
                html_escape(dash_if_empty(&e.side_effects.join(", "))),
                html_escape(dash_if_empty(&e.notes)),
            )
        })
        .collect();

    let scatter = scatter_svg(&rows)
        .map(|svg| format!("<div class=\"box\"><strong>Duration vs crash</strong>{svg}</div>"))
        .unwrap_or_default();

    let generated = human_date(Some(&time::now_local_timestamp()));

    format!(
        r#"<!doctype html>
<html lang="en">
<head>
<meta charset="utf-8"/>
<meta name="viewport" content="width=device-width, initial-scale=1"/>
<title>{title}</title>
<style>
  body{{font-family:system-ui,sans-serif;color:#0f172a;margin:18px;}}
  h1{{margin:0 0 6px 0;font-size:18px;}}
  .meta{{color:#475569;font-size:12px;margin-bottom:10px;}}
  .box{{border:1px solid #e2e8f0;border-radius:12px;padding:12px;margin:12px 0;}}
  table{{width:100%;border-collapse:collapse;font-size:11px;}}
  th,td{{border-bottom:1px solid #e2e8f0;padding:6px 6px;vertical-align:top;}}
  th{{background:#f8fafc;text-align:left;font-size:11px;}}
  .small{{color:#64748b;font-size:11px;margin-top:10px;}}
  @media print{{ body{{margin:0;}} }}
</style>
</head>
<body>
  <h1>{title}</h1>
  <div class="meta">Generated {generated}</div>
  <div class="box">
    <strong>Summary by dose (medians)</strong>
    <table>
      <thead><tr><th>Medication</th><th>Dose (mg)</th><th>Form</th><th>N</th><th>Duration (h)</th><th>Benefit</th><th>Crash</th></tr></thead>
      <tbody>{summary}</tbody>
    </table>
  </div>
  <div class="box">
    <strong>Chronology</strong>
    <table>
      <thead><tr><th>Date/time</th><th>Medication</th><th>Dose</th><th>Form</th><th>Duration</th><th>Benefit</th><th>Crash</th><th>Effects</th><th>Notes</th></tr></thead>
      <tbody>{table}</tbody>
    </table>
  </div>
  {scatter}
  <div class="small">{disclaimer}</div>
</body>
</html>"#,
        title = html_escape(REPORT_TITLE),
        generated = html_escape(&generated),
        summary = if summary_rows.is_empty() {
            "<tr><td colspan='7'>—</td></tr>".into()
        } else {
            summary_rows
        },
        table = if table_rows.is_empty() {
            "<tr><td colspan='9'>—</td></tr>".into()
        } else {
            table_rows
        },
        scatter = scatter,
        disclaimer = html_escape(DISCLAIMER),
    )
}
