//! Progress reporting for long-running exports
//!
//! Two channels: a periodic `info` line every N rows (the operator signal
//! that survives log redirection) and an optional terminal spinner.

use std::time::Instant;

use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use super::rotation::PartitionStatus;

/// Progress tracker for export operations
pub struct ProgressTracker {
    /// Rows between two progress lines
    every_rows: u64,
    /// Rows already reported
    last_reported: u64,
    /// Start time of the operation
    start_time: Instant,
    /// Spinner (optional, can be disabled)
    bar: Option<ProgressBar>,
}

impl ProgressTracker {
    /// Create a new progress tracker
    ///
    /// # Arguments
    /// * `every_rows` - Emit a progress line each time this many rows pass
    /// * `enable_bar` - Whether to draw a spinner on stderr
    pub fn new(every_rows: u64, enable_bar: bool) -> Self {
        let bar = enable_bar.then(|| {
            let bar = ProgressBar::new_spinner();
            if let Ok(style) =
                ProgressStyle::default_spinner().template("{spinner:.green} {pos} rows {msg}")
            {
                bar.set_style(style);
            }
            bar
        });

        Self {
            every_rows: every_rows.max(1),
            last_reported: 0,
            start_time: Instant::now(),
            bar,
        }
    }

    /// Record the cumulative row count
    ///
    /// Returns `true` when a progress line was emitted.
    pub fn update(&mut self, total: u64, partition: Option<&PartitionStatus>) -> bool {
        if let Some(ref bar) = self.bar {
            bar.set_position(total);
            let elapsed = self.start_time.elapsed().as_secs_f64();
            if elapsed > 0.0 {
                bar.set_message(format!("({:.0} rows/sec)", total as f64 / elapsed));
            }
        }

        if total / self.every_rows <= self.last_reported / self.every_rows {
            return false;
        }
        self.last_reported = total;

        match partition {
            Some(p) => info!(
                "Progress: {} rows (partition {}, part {:03}, rows in part {})",
                total,
                p.key.as_deref().unwrap_or("-"),
                p.part,
                p.rows
            ),
            None => info!("Progress: {} rows", total),
        }
        true
    }

    /// Rows per second since the tracker was created
    pub fn rate(&self, total: u64) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 { total as f64 / elapsed } else { 0.0 }
    }

    /// Finish and clear the spinner
    pub fn finish(&self) {
        if let Some(ref bar) = self.bar {
            bar.finish_and_clear();
        }
    }
}
