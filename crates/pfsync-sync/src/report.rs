//! Append-only text table of pass counters.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, FixedOffset, Offset, Utc};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::SyncStats;

/// Asia/Tashkent has no DST, so a fixed offset is exact.
const TASHKENT_OFFSET_SECS: i32 = 5 * 3600;

const RULE: &str =
    "+------------+----------+--------------+--------------+--------------+--------------+--------------+--------+\n";
const HEADER: &str =
    "|    Date    |   Time   | Prop Created | Prop Updated |    Images    | User Created | User Updated | Errors |\n";

pub fn tashkent_offset() -> FixedOffset {
    FixedOffset::east_opt(TASHKENT_OFFSET_SECS).unwrap_or_else(|| Utc.fix())
}

pub fn tashkent_time(at: DateTime<Utc>) -> DateTime<FixedOffset> {
    at.with_timezone(&tashkent_offset())
}

pub fn format_row(stats: &SyncStats, at: DateTime<FixedOffset>) -> String {
    format!(
        "| {} | {} | {:>12} | {:>12} | {:>12} | {:>12} | {:>12} | {:>6} |\n",
        at.format("%Y-%m-%d"),
        at.format("%H:%M:%S"),
        stats.properties_created,
        stats.properties_updated,
        stats.images_downloaded,
        stats.users_created,
        stats.users_updated,
        stats.errors,
    )
}

/// Append one row for `stats`, writing the table header first if the file is empty.
pub async fn append_report_row(path: &Path, stats: &SyncStats, at: DateTime<Utc>) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("creating {}", parent.display()))?;
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .with_context(|| format!("opening {}", path.display()))?;
    let len = file
        .metadata()
        .await
        .with_context(|| format!("reading metadata for {}", path.display()))?
        .len();

    let mut out = String::new();
    if len == 0 {
        out.push_str(RULE);
        out.push_str(HEADER);
        out.push_str(RULE);
    }
    out.push_str(&format_row(stats, tashkent_time(at)));

    file.write_all(out.as_bytes())
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    file.flush().await.context("flushing report")?;
    Ok(())
}
