use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{ActivityReport, StepInterval};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DisplayZone {
    #[default]
    Utc,
    Local,
}

pub fn format_timestamp(timestamp: &DateTime<Utc>, zone: DisplayZone) -> String {
    match zone {
        DisplayZone::Utc => timestamp.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        DisplayZone::Local => timestamp
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M:%S %:z")
            .to_string(),
    }
}

/// `<time>: Walked 1,234 steps (0.9 km)`
pub fn format_interval_line(interval: &StepInterval, zone: DisplayZone) -> String {
    format!(
        "{}: Walked {} steps ({} km)",
        format_timestamp(&interval.timestamp, zone),
        group_thousands(interval.steps),
        format_km(interval.distance_km())
    )
}

pub fn render_text_report(report: &ActivityReport, zone: DisplayZone) -> String {
    let mut out = String::new();
    for interval in &report.intervals {
        out.push_str(&format_interval_line(interval, zone));
        out.push('\n');
    }
    out
}

pub fn render_markdown_summary(report: &ActivityReport, zone: DisplayZone) -> String {
    let mut out = String::new();
    out.push_str("# Walking Activity Summary\n\n");
    out.push_str(&format!(
        "- Report version: `{}`\n- Generated at: `{}`\n- Device root: `{}`\n- Pattern: `{}`\n- Baseline mode: `{:?}`\n\n",
        report.report_version,
        report.generated_at,
        report.device_root,
        report.pattern,
        report.baseline_mode
    ));

    out.push_str("## Totals\n\n");
    out.push_str(&format!(
        "- Intervals: {}\n- Steps: {}\n- Distance: {} km\n\n",
        report.totals.intervals,
        group_thousands(report.totals.steps),
        format_km(report.totals.distance_meters / 1000.0)
    ));

    out.push_str("## Files\n\n");
    if report.files.is_empty() {
        out.push_str("No monitoring files processed.\n\n");
    } else {
        for file in &report.files {
            out.push_str(&format!(
                "- `{}`: {} message(s), {} anchor(s), {} interval(s), {} dropped\n",
                file.path,
                file.messages,
                file.anchors,
                file.emitted,
                file.drops.total()
            ));
        }
        out.push('\n');
    }

    out.push_str("## Intervals\n\n");
    if report.intervals.is_empty() {
        out.push_str("No walking intervals found.\n\n");
    } else {
        out.push_str("| Time | Steps | Distance (km) |\n|---|---:|---:|\n");
        for interval in &report.intervals {
            out.push_str(&format!(
                "| {} | {} | {} |\n",
                format_timestamp(&interval.timestamp, zone),
                group_thousands(interval.steps),
                format_km(interval.distance_km())
            ));
        }
        out.push('\n');
    }

    if !report.warnings.is_empty() {
        out.push_str("## Warnings\n\n");
        for warning in &report.warnings {
            out.push_str(&format!("- {}\n", warning));
        }
        out.push('\n');
    }

    out
}

pub fn group_thousands(value: i64) -> String {
    let digits = value.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if value < 0 {
        grouped.push('-');
    }
    for (index, ch) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    grouped
}

fn format_km(km: f64) -> String {
    let fixed = format!("{:.1}", km.abs());
    let (whole, fraction) = fixed.split_once('.').unwrap_or((fixed.as_str(), "0"));
    let whole = whole.parse::<i64>().map(group_thousands).unwrap_or_else(|_| whole.to_string());
    let sign = if km < 0.0 && fixed != "0.0" { "-" } else { "" };
    format!("{sign}{whole}.{fraction}")
}
