//! CSV partition writer
//!
//! Each record is rendered to a complete line in memory and handed to the
//! buffered file in a single write, so a failure can never leave half a row
//! behind in the buffer.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::debug;

use crate::error::{OutputError, Result};
use crate::export::transform::ExportRecord;

use super::{FormatWriter, create_writer, reopen_writer};

/// Writer for one CSV file
pub struct CsvWriter {
    /// Buffered file writer, `None` once finalized
    writer: Option<BufWriter<File>>,
    /// Path to the output file
    path: PathBuf,
    /// Data rows written
    written: u64,
}

impl CsvWriter {
    /// Create the file, truncating any previous content
    pub async fn create(path: &Path) -> Result<Self> {
        let writer = create_writer(path).await?;
        debug!("Created CSV writer for: {}", path.display());
        Ok(Self {
            writer: Some(writer),
            path: path.to_path_buf(),
            written: 0,
        })
    }

    /// Reopen an existing file for appending
    ///
    /// Returns the writer and the number of complete lines already present,
    /// header included.
    pub async fn append(path: &Path) -> Result<(Self, u64)> {
        let (writer, lines) = reopen_writer(path).await?;
        debug!("Reopened CSV writer for: {} ({} lines)", path.display(), lines);
        Ok((
            Self {
                writer: Some(writer),
                path: path.to_path_buf(),
                written: 0,
            },
            lines,
        ))
    }

    /// Quote a value if it contains a delimiter, quote or line break
    pub fn escape_csv_value(value: &str) -> String {
        if value.contains([',', '"', '\n', '\r']) {
            format!("\"{}\"", value.replace('"', "\"\""))
        } else {
            value.to_string()
        }
    }

    /// Render one line, including its terminator
    pub fn render_line<S: AsRef<str>>(values: &[S]) -> String {
        let mut line = values
            .iter()
            .map(|v| Self::escape_csv_value(v.as_ref()))
            .collect::<Vec<_>>()
            .join(",");
        line.push('\n');
        line
    }

    async fn write_line(&mut self, line: &str) -> Result<()> {
        let writer = self.writer.as_mut().ok_or(OutputError::NoOpenPartition)?;
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|source| OutputError::WriteFailed {
                path: self.path.display().to_string(),
                source,
            })?;
        Ok(())
    }
}

#[async_trait]
impl FormatWriter for CsvWriter {
    async fn write_header(&mut self, headers: &[String]) -> Result<()> {
        let line = Self::render_line(headers);
        self.write_line(&line).await
    }

    async fn write_record(&mut self, record: &ExportRecord) -> Result<()> {
        let line = Self::render_line(record.values());
        self.write_line(&line).await?;
        self.written += 1;
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer
                .flush()
                .await
                .map_err(|source| OutputError::FlushFailed {
                    path: self.path.display().to_string(),
                    source,
                })?;
        }
        Ok(())
    }

    async fn finalize(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            let closed = async {
                writer.flush().await?;
                writer.shutdown().await
            };
            closed.await.map_err(|source| OutputError::FlushFailed {
                path: self.path.display().to_string(),
                source,
            })?;
            debug!(
                "Finalized CSV file: {} ({} rows)",
                self.path.display(),
                self.written
            );
        }
        Ok(())
    }

    fn path(&self) -> &Path {
        &self.path
    }
}
