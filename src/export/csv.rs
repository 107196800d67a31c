use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use log::info;

use crate::models::{ExperimentKind, Reading};

/// Renders the whole series as CSV, oldest row first. Rows are `\n`-joined
/// with no trailing newline. Returns `None` for an empty series so callers
/// never produce a header-only file.
pub fn to_csv(kind: ExperimentKind, readings: &[Reading]) -> Option<String> {
    if readings.is_empty() {
        return None;
    }

    let mut lines = Vec::with_capacity(readings.len() + 1);
    lines.push(kind.csv_header().to_string());
    lines.extend(readings.iter().map(format_row));
    Some(lines.join("\n"))
}

fn format_row(reading: &Reading) -> String {
    match reading {
        Reading::Count(r) => format!("{:.3},{}", r.time, r.count),
        Reading::Motion(r) => format!(
            "{:.3},{:.4},{:.3},{:.3}",
            r.time, r.displacement, r.velocity, r.acceleration
        ),
    }
}

/// `<prefix>_<ISO-8601 UTC with millis>.csv`, e.g.
/// `oscillation_count_2024-03-01T10:15:30.250Z.csv`.
pub fn export_file_name(kind: ExperimentKind, at: DateTime<Utc>) -> String {
    format!(
        "{}_{}.csv",
        kind.export_prefix(),
        at.to_rfc3339_opts(SecondsFormat::Millis, true)
    )
}

/// Writes the CSV into `dir`. `Ok(None)` when there is nothing to export.
pub fn write_csv(dir: &Path, kind: ExperimentKind, readings: &[Reading]) -> Result<Option<PathBuf>> {
    let Some(content) = to_csv(kind, readings) else {
        return Ok(None);
    };

    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create export directory {}", dir.display()))?;

    let path = dir.join(export_file_name(kind, Utc::now()));
    fs::write(&path, content)
        .with_context(|| format!("Failed to write CSV to {}", path.display()))?;

    info!("Exported {} readings to {}", readings.len(), path.display());
    Ok(Some(path))
}
