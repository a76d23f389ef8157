//! Rotating partition writer
//!
//! Records are appended to exactly one open partition file. Before each
//! record the writer checks, in order:
//! 1. the partition key changed: close the file and open the next part for
//!    the new key (part 1 for a key never seen before)
//! 2. the open file holds `max_rows` data rows: close it and open the next
//!    part for the same key
//!
//! A closed file is never reopened. A key that comes back after it was
//! closed gets a fresh part with the next unused index, so file names stay
//! deterministic for a given input order.
//!
//! When continuing an earlier run, files that already exist are appended to
//! instead of truncated: a key starts at its highest existing part, the row
//! count is seeded from the lines on disk and full parts are skipped.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::OutputConfig;
use crate::error::{OutputError, Result};

use super::transform::ExportRecord;
use super::writers::{FormatWriter, SinkFactory};

const DEFAULT_EXTENSION: &str = "csv";

/// Deterministic file naming from (base path, partition key, part index)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    dir: PathBuf,
    stem: String,
    ext: String,
    by_count: bool,
}

impl OutputLayout {
    /// # Arguments
    /// * `base` - Configured output path, e.g. `./exports/messages.csv`
    /// * `by_count` - Whether row-count rotation is enabled
    pub fn new(base: &Path, by_count: bool) -> Self {
        let dir = base.parent().map(Path::to_path_buf).unwrap_or_default();
        let stem = base
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "export".to_string());
        let ext = base
            .extension()
            .map(|s| s.to_string_lossy().into_owned())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_EXTENSION.to_string());
        Self {
            dir,
            stem,
            ext,
            by_count,
        }
    }

    pub fn from_config(config: &OutputConfig) -> Self {
        Self::new(&config.path, config.max_rows_per_file.is_some())
    }

    /// Path of a partition file
    ///
    /// - day key: `{stem}_{key}.{ext}`, then `{stem}_{key}_partNNN.{ext}`
    /// - count only: `{stem}_partNNN.{ext}`
    /// - neither: `{stem}.{ext}`
    pub fn file_name(&self, key: Option<&str>, part: u32) -> PathBuf {
        let name = match key {
            Some(key) if part > 1 => format!("{}_{}_part{:03}", self.stem, key, part),
            Some(key) => format!("{}_{}", self.stem, key),
            None if self.by_count || part > 1 => format!("{}_part{:03}", self.stem, part),
            None => self.stem.clone(),
        };
        self.dir.join(format!("{}.{}", name, self.ext))
    }
}

/// A closed (or currently open) partition file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionSummary {
    pub path: PathBuf,
    pub key: Option<String>,
    pub part: u32,
    pub rows: u64,
}

/// Snapshot of the open partition, for progress lines
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionStatus {
    pub key: Option<String>,
    pub part: u32,
    pub rows: u64,
}

struct OpenPartition {
    key: Option<String>,
    part: u32,
    rows: u64,
    writer: Box<dyn FormatWriter>,
}

/// Writer that spreads records over rotating partition files
pub struct RotatingWriter {
    layout: OutputLayout,
    headers: Arc<[String]>,
    max_rows: Option<u64>,
    factory: Box<dyn SinkFactory>,
    current: Option<OpenPartition>,
    last_part: HashMap<Option<String>, u32>,
    closed: Vec<PartitionSummary>,
    total_rows: u64,
    append_existing: bool,
}

impl RotatingWriter {
    pub fn new(
        layout: OutputLayout,
        headers: Arc<[String]>,
        max_rows: Option<u64>,
        factory: Box<dyn SinkFactory>,
    ) -> Self {
        Self {
            layout,
            headers,
            max_rows: max_rows.filter(|&n| n > 0),
            factory,
            current: None,
            last_part: HashMap::new(),
            closed: Vec::new(),
            total_rows: 0,
            append_existing: false,
        }
    }

    /// Append to partition files left by an earlier run instead of truncating them
    pub fn set_append_existing(&mut self, enabled: bool) {
        self.append_existing = enabled;
    }

    /// Write one record into the partition for `key`, rotating first if needed
    pub async fn write(&mut self, key: Option<&str>, record: &ExportRecord) -> Result<()> {
        let key_changed = self
            .current
            .as_ref()
            .is_some_and(|open| open.key.as_deref() != key);
        if key_changed {
            self.close_current().await?;
        }

        let full = match (&self.current, self.max_rows) {
            (Some(open), Some(max)) => open.rows >= max,
            _ => false,
        };
        if full {
            self.close_current().await?;
        }

        if self.current.is_none() {
            self.open_next(key.map(str::to_string)).await?;
        }

        let open = self.current.as_mut().ok_or(OutputError::NoOpenPartition)?;
        open.writer.write_record(record).await?;
        open.rows += 1;
        self.total_rows += 1;
        Ok(())
    }

    /// Flush the open partition so every accepted record is in the file
    pub async fn flush(&mut self) -> Result<()> {
        match self.current.as_mut() {
            Some(open) => open.writer.flush().await,
            None => Ok(()),
        }
    }

    /// Close the open partition and return every partition written
    pub async fn finish(&mut self) -> Result<Vec<PartitionSummary>> {
        self.close_current().await?;
        Ok(self.closed.clone())
    }

    pub fn current(&self) -> Option<PartitionStatus> {
        self.current.as_ref().map(|open| PartitionStatus {
            key: open.key.clone(),
            part: open.part,
            rows: open.rows,
        })
    }

    pub fn total_rows(&self) -> u64 {
        self.total_rows
    }

    async fn open_next(&mut self, key: Option<String>) -> Result<()> {
        let mut part = match self.last_part.get(&key) {
            Some(&last) => {
                if self.closed.last().is_some_and(|c| c.key != key) {
                    warn!(
                        "Partition {} reappeared after it was closed; writing it to part {:03}",
                        key.as_deref().unwrap_or("-"),
                        last + 1
                    );
                }
                last + 1
            }
            None if self.append_existing => self.last_existing_part(key.as_deref()).await,
            None => 1,
        };

        let (writer, rows) = loop {
            let path = self.layout.file_name(key.as_deref(), part);
            if !(self.append_existing && self.factory.exists(&path).await) {
                info!("Opening {}", path.display());
                let mut writer = self.factory.create(&path).await?;
                writer.write_header(&self.headers).await?;
                break (writer, 0);
            }

            let reopened = self.factory.reopen(&path).await?;
            let mut writer = reopened.writer;
            let rows = reopened.lines.saturating_sub(1);
            if self.max_rows.is_some_and(|max| rows >= max) {
                writer.finalize().await?;
                debug!("{} is already full ({} rows)", path.display(), rows);
                part += 1;
                continue;
            }

            info!("Appending to {} ({} rows already present)", path.display(), rows);
            if reopened.lines == 0 {
                writer.write_header(&self.headers).await?;
            }
            break (writer, rows);
        };

        self.last_part.insert(key.clone(), part);
        self.current = Some(OpenPartition {
            key,
            part,
            rows,
            writer,
        });
        Ok(())
    }

    /// Highest part index already on disk for `key`, or 1
    async fn last_existing_part(&self, key: Option<&str>) -> u32 {
        let mut part = 1;
        while self.factory.exists(&self.layout.file_name(key, part + 1)).await {
            part += 1;
        }
        part
    }

    async fn close_current(&mut self) -> Result<()> {
        let Some(mut open) = self.current.take() else {
            return Ok(());
        };
        let path = open.writer.path().to_path_buf();
        let summary = PartitionSummary {
            path: path.clone(),
            key: open.key.take(),
            part: open.part,
            rows: open.rows,
        };
        // Recorded before finalizing so a failed close still shows up
        self.closed.push(summary);
        open.writer.finalize().await?;
        info!(
            "Closed {} (part {:03}, {} rows)",
            path.display(),
            open.part,
            open.rows
        );
        debug!("{} rows written in total", self.total_rows);
        Ok(())
    }
}
