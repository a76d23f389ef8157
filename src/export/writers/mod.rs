//! Format writers for partition files
//!
//! A [`SinkFactory`] creates one [`FormatWriter`] per output partition. The
//! rotation writer only talks to these traits, so tests can substitute sinks
//! that fail on demand.

use std::io;
use std::path::Path;

use async_trait::async_trait;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, BufWriter};
use tracing::warn;

use crate::error::{OutputError, Result};
use crate::utils;

use super::transform::ExportRecord;

pub mod csv;

pub use csv::CsvWriter;

/// Output buffer per open partition file.
const WRITE_BUFFER_BYTES: usize = 1024 * 1024;

/// Writes records of one partition file
#[async_trait]
pub trait FormatWriter: Send {
    /// Write the header row; called once, before any record
    async fn write_header(&mut self, headers: &[String]) -> Result<()>;

    /// Write one complete record
    async fn write_record(&mut self, record: &ExportRecord) -> Result<()>;

    /// Push buffered bytes to the file
    async fn flush(&mut self) -> Result<()>;

    /// Flush and release the file
    async fn finalize(&mut self) -> Result<()>;

    /// Path of the file being written
    fn path(&self) -> &Path;
}

/// A partition file left by an earlier run, reopened for appending
pub struct ReopenedSink {
    pub writer: Box<dyn FormatWriter>,
    /// Complete lines already in the file, header included
    pub lines: u64,
}

/// Opens writers for partition files
#[async_trait]
pub trait SinkFactory: Send + Sync {
    /// Create a new file, truncating any previous content
    async fn create(&self, path: &Path) -> Result<Box<dyn FormatWriter>>;

    /// Reopen an existing file, keeping every complete line it holds
    async fn reopen(&self, path: &Path) -> Result<ReopenedSink>;

    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }
}

/// Factory producing CSV files on the local file system
#[derive(Debug, Default, Clone, Copy)]
pub struct CsvSinkFactory;

#[async_trait]
impl SinkFactory for CsvSinkFactory {
    async fn create(&self, path: &Path) -> Result<Box<dyn FormatWriter>> {
        Ok(Box::new(CsvWriter::create(path).await?))
    }

    async fn reopen(&self, path: &Path) -> Result<ReopenedSink> {
        let (writer, lines) = CsvWriter::append(path).await?;
        Ok(ReopenedSink {
            writer: Box::new(writer),
            lines,
        })
    }
}

/// Create a buffered file writer, creating the parent directory first
pub(crate) async fn create_writer(path: &Path) -> Result<BufWriter<File>> {
    let created = async {
        utils::fs::ensure_parent_dir(path).await?;
        File::create(path).await
    };
    let file = created.await.map_err(|source| OutputError::CreateFailed {
        path: path.display().to_string(),
        source,
    })?;
    Ok(BufWriter::with_capacity(WRITE_BUFFER_BYTES, file))
}

/// Reopen a file for appending after its last complete line
///
/// A trailing partial line (an interrupted write) is cut off. Returns the
/// writer and the number of complete lines kept.
pub(crate) async fn reopen_writer(path: &Path) -> Result<(BufWriter<File>, u64)> {
    let reopened = async {
        let (lines, complete_len, total_len) = scan_lines(path).await?;
        let file = OpenOptions::new().append(true).open(path).await?;
        if complete_len < total_len {
            warn!(
                "Dropping {} bytes of an incomplete line at the end of {}",
                total_len - complete_len,
                path.display()
            );
            file.set_len(complete_len).await?;
        }
        Ok::<_, io::Error>((file, lines))
    };
    let (file, lines) = reopened.await.map_err(|source| OutputError::CreateFailed {
        path: path.display().to_string(),
        source,
    })?;
    Ok((BufWriter::with_capacity(WRITE_BUFFER_BYTES, file), lines))
}

/// Count CSV lines, ignoring line breaks inside quoted values
///
/// Returns `(lines, bytes up to the last line end, total bytes)`.
async fn scan_lines(path: &Path) -> io::Result<(u64, u64, u64)> {
    let mut file = File::open(path).await?;
    let mut buf = vec![0u8; 64 * 1024];
    let mut offset = 0u64;
    let mut quoted = false;
    let mut lines = 0u64;
    let mut complete_len = 0u64;
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        for (i, &byte) in buf[..n].iter().enumerate() {
            match byte {
                b'"' => quoted = !quoted,
                b'\n' if !quoted => {
                    lines += 1;
                    complete_len = offset + i as u64 + 1;
                }
                _ => {}
            }
        }
        offset += n as u64;
    }
    Ok((lines, complete_len, offset))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scan_lines_respects_quotes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quoted.csv");
        tokio::fs::write(&path, "id,text\n1,\"two\nlines\"\n2,plain\n3,cut")
            .await
            .unwrap();

        let (lines, complete_len, total_len) = scan_lines(&path).await.unwrap();
        assert_eq!(lines, 3);
        assert_eq!(total_len - complete_len, "3,cut".len() as u64);
    }
}
