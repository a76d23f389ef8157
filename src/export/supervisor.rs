//! Retry supervisor
//!
//! Owns the export loop and its state machine:
//!
//! ```text
//! CONNECTING -> STREAMING -> DONE
//!      ^            |
//!      |            v
//!      +------ RETRY_WAIT
//! ```
//!
//! Documents are handled strictly one at a time: transformed, written, then
//! the cursor position advances to their primary key. The position becomes
//! the resume point once the writer has flushed, which happens at the end of
//! every batch and before every reconnect. Store faults go to `RETRY_WAIT`;
//! output and configuration faults abort with the last committed position.

use std::collections::HashSet;
use std::future::Future;
use std::time::Instant;

use mongodb::bson::Bson;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{ExportError, Result};

use super::backoff::Backoff;
use super::progress::ProgressTracker;
use super::query::{PRIMARY_KEY, QueryRange, format_resume_id};
use super::rotation::{OutputLayout, PartitionSummary, RotatingWriter};
use super::streaming::{DocumentStore, StreamingQuery};
use super::transform::RowTransformer;
use super::writers::{CsvSinkFactory, SinkFactory};

/// Result of an export run
#[derive(Debug, Clone)]
pub struct ExportSummary {
    /// Data rows written across all files
    pub rows_written: u64,
    /// Every partition file, in the order it was opened
    pub files: Vec<PartitionSummary>,
    /// Distinct partition keys
    pub partitions: usize,
    /// Reconnections performed
    pub retries: u32,
    /// Primary key of the last row written
    pub last_position: Option<String>,
    /// Time taken for the export
    pub elapsed_ms: u64,
    /// Whether the run stopped on an external signal
    pub cancelled: bool,
}

enum State {
    Connecting,
    Streaming(Box<dyn StreamingQuery>),
    RetryWait(ExportError),
    Done,
}

enum StreamEnd {
    Exhausted,
    Cancelled,
}

/// Drives store, transformer and writer until the range is exported
pub struct ExportSupervisor {
    store: Box<dyn DocumentStore>,
    range: QueryRange,
    transformer: RowTransformer,
    writer: RotatingWriter,
    tracker: ProgressTracker,
    backoff: Backoff,
    max_attempts: Option<u32>,
    cancel_token: CancellationToken,
    /// Last row handed to the writer
    written: Option<Bson>,
    /// Last row known to be in a file
    committed: Option<Bson>,
}

impl ExportSupervisor {
    pub fn new(
        store: Box<dyn DocumentStore>,
        range: QueryRange,
        transformer: RowTransformer,
        writer: RotatingWriter,
        tracker: ProgressTracker,
    ) -> Self {
        Self {
            store,
            range,
            transformer,
            writer,
            tracker,
            backoff: Backoff::default(),
            max_attempts: None,
            cancel_token: CancellationToken::new(),
            written: None,
            committed: None,
        }
    }

    /// Assemble a supervisor writing CSV files as configured
    pub fn from_config(config: &Config, store: Box<dyn DocumentStore>) -> Result<Self> {
        Self::with_sink(config, store, Box::new(CsvSinkFactory))
    }

    /// Assemble a supervisor with a custom sink factory
    pub fn with_sink(
        config: &Config,
        store: Box<dyn DocumentStore>,
        sink: Box<dyn SinkFactory>,
    ) -> Result<Self> {
        let transformer = RowTransformer::from_config(config)?;
        let range = QueryRange::from_config(config, &transformer.source_fields())?;
        let writer = RotatingWriter::new(
            OutputLayout::from_config(&config.output),
            transformer.headers(),
            config.output.max_rows_per_file,
            sink,
        );
        let tracker = ProgressTracker::new(config.progress.every_rows, config.progress.show_bar);

        Ok(Self::new(store, range, transformer, writer, tracker)
            .with_retry(Backoff::from_config(&config.retry), config.retry.max_attempts))
    }

    /// Set cancellation token for this export
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel_token = token;
        self
    }

    /// Start after this primary key instead of the range start
    ///
    /// Partition files an earlier run left behind are appended to.
    pub fn with_resume_after(mut self, position: Option<Bson>) -> Self {
        self.writer.set_append_existing(position.is_some());
        self.written = position.clone();
        self.committed = position;
        self
    }

    pub fn with_retry(mut self, backoff: Backoff, max_attempts: Option<u32>) -> Self {
        self.backoff = backoff;
        self.max_attempts = max_attempts;
        self
    }

    /// Run the export to completion, cancellation or a fatal error
    pub async fn run(mut self) -> Result<ExportSummary> {
        let started = Instant::now();
        let mut state = State::Connecting;
        let mut failures = 0u32;
        let mut retries = 0u32;
        let mut cancelled = false;

        info!("Starting export");
        loop {
            state = match state {
                State::Connecting => {
                    let request = self.range.request(self.committed.as_ref());
                    match with_cancel(&self.cancel_token, self.store.open(&request)).await {
                        None => {
                            cancelled = true;
                            State::Done
                        }
                        Some(Ok(query)) => State::Streaming(query),
                        Some(Err(e)) => State::RetryWait(e),
                    }
                }

                State::Streaming(mut query) => {
                    let mut session_rows = 0u64;
                    let outcome = self.stream(query.as_mut(), &mut session_rows).await;
                    if let Err(e) = query.close().await {
                        debug!("Ignoring error while closing cursor: {}", e);
                    }
                    if session_rows > 0 {
                        failures = 0;
                    }
                    match outcome {
                        Ok(StreamEnd::Exhausted) => State::Done,
                        Ok(StreamEnd::Cancelled) => {
                            cancelled = true;
                            State::Done
                        }
                        Err(e) => State::RetryWait(e),
                    }
                }

                State::RetryWait(fault) => {
                    if fault.is_fatal() {
                        return Err(self.abort(fault).await);
                    }
                    if let Err(e) = self.writer.flush().await {
                        return Err(self.abort(e).await);
                    }
                    self.committed = self.written.clone();

                    failures += 1;
                    if self.max_attempts.is_some_and(|max| failures >= max) {
                        let exhausted = ExportError::RetriesExhausted {
                            attempts: failures,
                            last_error: Box::new(fault),
                        };
                        return Err(self.abort(exhausted).await);
                    }

                    let delay = self.backoff.delay_for(failures);
                    warn!(
                        "{} ({}); retrying in {:?}, attempt {}, resume after {}",
                        fault.fault_kind(),
                        fault,
                        delay,
                        failures,
                        self.position_label()
                    );
                    match with_cancel(&self.cancel_token, tokio::time::sleep(delay)).await {
                        None => {
                            cancelled = true;
                            State::Done
                        }
                        Some(()) => {
                            retries += 1;
                            State::Connecting
                        }
                    }
                }

                State::Done => break,
            };
        }

        if cancelled {
            info!("Export cancelled; closing open partition");
        }
        let files = match self.writer.finish().await {
            Ok(files) => files,
            Err(e) => return Err(self.abort(e).await),
        };
        self.committed = self.written.clone();
        self.tracker.finish();

        let partitions = files
            .iter()
            .map(|f| f.key.as_deref())
            .collect::<HashSet<_>>()
            .len();
        let summary = ExportSummary {
            rows_written: self.writer.total_rows(),
            partitions,
            files,
            retries,
            last_position: self.committed.as_ref().map(format_resume_id),
            elapsed_ms: started.elapsed().as_millis() as u64,
            cancelled,
        };
        info!(
            "Export {}: {} rows, {} files, {} partitions, {} retries, {} ms ({:.0} rows/sec)",
            if cancelled { "cancelled" } else { "completed" },
            summary.rows_written,
            summary.files.len(),
            summary.partitions,
            summary.retries,
            summary.elapsed_ms,
            self.tracker.rate(summary.rows_written)
        );
        Ok(summary)
    }

    /// Pump one cursor until it ends, fails or the run is cancelled
    async fn stream(
        &mut self,
        query: &mut dyn StreamingQuery,
        session_rows: &mut u64,
    ) -> Result<StreamEnd> {
        loop {
            let batch = match with_cancel(&self.cancel_token, query.next_batch()).await {
                None => return Ok(StreamEnd::Cancelled),
                Some(batch) => batch?,
            };
            let Some(docs) = batch else {
                return Ok(StreamEnd::Exhausted);
            };

            for doc in &docs {
                if self.cancel_token.is_cancelled() {
                    break;
                }
                let record = self.transformer.transform(doc);
                let key = self.transformer.partition_key(doc);
                self.writer.write(key.as_deref(), &record).await?;
                if let Some(id) = doc.get(PRIMARY_KEY) {
                    self.written = Some(id.clone());
                }
                *session_rows += 1;
                self.tracker
                    .update(self.writer.total_rows(), self.writer.current().as_ref());
            }

            self.writer.flush().await?;
            self.committed = self.written.clone();

            if self.cancel_token.is_cancelled() {
                return Ok(StreamEnd::Cancelled);
            }
        }
    }

    /// Close what can be closed and wrap `reason` with the resume point
    async fn abort(&mut self, reason: ExportError) -> ExportError {
        match self.writer.finish().await {
            Ok(_) => self.committed = self.written.clone(),
            Err(e) => error!("Failed to close partition after fatal error: {}", e),
        }
        self.tracker.finish();
        error!("Export aborted: {}", reason);
        ExportError::aborted(reason, self.committed.as_ref().map(format_resume_id))
    }

    fn position_label(&self) -> String {
        self.committed
            .as_ref()
            .map(format_resume_id)
            .unwrap_or_else(|| "range start".to_string())
    }
}

/// Run `fut` unless the token fires first
async fn with_cancel<F: Future>(token: &CancellationToken, fut: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = token.cancelled() => None,
        out = fut => Some(out),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use mongodb::bson::{DateTime, Document, doc};

    use crate::config::{FieldRule, FieldSpec};
    use crate::error::{ConnectionError, OutputError};
    use crate::export::query::CursorRequest;
    use crate::export::transform::ExportRecord;
    use crate::export::writers::{FormatWriter, ReopenedSink};

    const DAY_MS: i64 = 86_400_000;
    const JULY_1: i64 = 1_751_328_000_000;

    #[derive(Debug, Clone)]
    enum Fault {
        ConnectFails,
        FailAfter(usize),
        /// Cancel the run once this many documents were served
        CancelAfter(usize, CancellationToken),
    }

    struct MockStore {
        docs: Arc<Vec<Document>>,
        faults: Mutex<VecDeque<Fault>>,
        requests: Arc<Mutex<Vec<CursorRequest>>>,
        always_fail: bool,
    }

    impl MockStore {
        fn new(docs: Vec<Document>, faults: Vec<Fault>) -> Self {
            Self {
                docs: Arc::new(docs),
                faults: Mutex::new(faults.into()),
                requests: Arc::new(Mutex::new(Vec::new())),
                always_fail: false,
            }
        }

        fn unreachable() -> Self {
            Self {
                always_fail: true,
                ..Self::new(Vec::new(), Vec::new())
            }
        }
    }

    #[async_trait]
    impl DocumentStore for MockStore {
        async fn open(&self, request: &CursorRequest) -> Result<Box<dyn StreamingQuery>> {
            self.requests.lock().unwrap().push(request.clone());
            let fault = self.faults.lock().unwrap().pop_front();
            if self.always_fail || matches!(fault, Some(Fault::ConnectFails)) {
                return Err(ConnectionError::ConnectionFailed("connection refused".into()).into());
            }

            let after = match &request.resume_after {
                Some(Bson::Int64(n)) => *n,
                _ => i64::MIN,
            };
            let remaining: VecDeque<Document> = self
                .docs
                .iter()
                .filter(|d| d.get_i64(PRIMARY_KEY).unwrap() > after)
                .cloned()
                .collect();
            let (fail_after, cancel_after) = match fault {
                Some(Fault::FailAfter(n)) => (Some(n), None),
                Some(Fault::CancelAfter(n, token)) => (None, Some((n, token))),
                _ => (None, None),
            };
            Ok(Box::new(MockCursor {
                remaining,
                batch_size: request.batch_size as usize,
                fail_after,
                cancel_after,
                served: 0,
            }))
        }
    }

    struct MockCursor {
        remaining: VecDeque<Document>,
        batch_size: usize,
        fail_after: Option<usize>,
        cancel_after: Option<(usize, CancellationToken)>,
        served: usize,
    }

    #[async_trait]
    impl StreamingQuery for MockCursor {
        async fn next_batch(&mut self) -> Result<Option<Vec<Document>>> {
            let mut limit = self.batch_size;
            if let Some(fail_after) = self.fail_after {
                if self.served >= fail_after {
                    return Err(ConnectionError::Timeout("cursor batch".into()).into());
                }
                limit = limit.min(fail_after - self.served);
            }
            if let Some((cancel_after, token)) = &self.cancel_after {
                if self.served >= *cancel_after {
                    // Signal arrives while the next batch is in flight
                    token.cancel();
                    std::future::pending::<()>().await;
                }
                limit = limit.min(cancel_after - self.served);
            }
            let take = limit.min(self.remaining.len());
            if take == 0 {
                return Ok(None);
            }
            self.served += take;
            Ok(Some(self.remaining.drain(..take).collect()))
        }

        async fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    /// Sink whose writes start failing after a number of records
    struct FailingSink {
        limit: u64,
        written: Arc<AtomicU64>,
    }

    struct FailingWriter {
        path: PathBuf,
        limit: u64,
        written: Arc<AtomicU64>,
    }

    #[async_trait]
    impl SinkFactory for FailingSink {
        async fn create(&self, path: &Path) -> Result<Box<dyn FormatWriter>> {
            Ok(Box::new(FailingWriter {
                path: path.to_path_buf(),
                limit: self.limit,
                written: Arc::clone(&self.written),
            }))
        }

        async fn reopen(&self, path: &Path) -> Result<ReopenedSink> {
            Ok(ReopenedSink {
                writer: self.create(path).await?,
                lines: 0,
            })
        }
    }

    #[async_trait]
    impl FormatWriter for FailingWriter {
        async fn write_header(&mut self, _headers: &[String]) -> Result<()> {
            Ok(())
        }

        async fn write_record(&mut self, _record: &ExportRecord) -> Result<()> {
            if self.written.load(Ordering::SeqCst) >= self.limit {
                return Err(OutputError::WriteFailed {
                    path: self.path.display().to_string(),
                    source: std::io::Error::other("No space left on device"),
                }
                .into());
            }
            self.written.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn flush(&mut self) -> Result<()> {
            Ok(())
        }

        async fn finalize(&mut self) -> Result<()> {
            Ok(())
        }

        fn path(&self) -> &Path {
            &self.path
        }
    }

    fn field(name: &str, rule: FieldRule) -> FieldSpec {
        FieldSpec {
            name: name.to_string(),
            rule,
            source: Vec::new(),
            replace: Default::default(),
        }
    }

    fn config(dir: &Path) -> Config {
        let mut config = Config::default();
        config.connection.database = "jasmin".into();
        config.connection.collection = "messages".into();
        config.query.start = "2025-07-01".into();
        config.query.end = "2025-08-01".into();
        config.query.batch_size = 64;
        config.output.path = dir.join("msgs.csv");
        config.output.rotate_by_day = true;
        config.output.max_rows_per_file = Some(500);
        config.fields = vec![
            field("msg_id", FieldRule::Identity),
            field("accepted_time", FieldRule::Datetime),
            field("status", FieldRule::Status),
        ];
        config
    }

    /// `per_day[i]` documents on day i of July, ids from 1
    fn documents(per_day: &[usize]) -> Vec<Document> {
        let mut docs = Vec::new();
        let mut id = 1i64;
        for (day, count) in per_day.iter().enumerate() {
            for n in 0..*count {
                docs.push(doc! {
                    "_id": id,
                    "msg_id": format!("m-{id}"),
                    "accepted_time": DateTime::from_millis(JULY_1 + day as i64 * DAY_MS + n as i64 * 1000),
                    "status": if id % 3 == 0 { "DELIVRD" } else { "ENROUTE" },
                });
                id += 1;
            }
        }
        docs
    }

    fn fast_retry() -> Backoff {
        Backoff::new(Duration::from_millis(1), Duration::from_millis(4))
    }

    fn supervisor(config: &Config, store: MockStore) -> ExportSupervisor {
        ExportSupervisor::from_config(config, Box::new(store))
            .unwrap()
            .with_retry(fast_retry(), config.retry.max_attempts)
    }

    fn read_all(files: &[PartitionSummary]) -> Vec<String> {
        files
            .iter()
            .map(|f| std::fs::read_to_string(&f.path).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_rotates_by_day_and_row_count() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let store = MockStore::new(documents(&[800, 400]), Vec::new());

        let summary = supervisor(&config, store).run().await.unwrap();

        assert_eq!(summary.rows_written, 1200);
        assert_eq!(summary.partitions, 2);
        assert_eq!(summary.retries, 0);
        assert!(!summary.cancelled);
        assert_eq!(summary.last_position.as_deref(), Some("1200"));

        let layout: Vec<(Option<&str>, u32, u64)> = summary
            .files
            .iter()
            .map(|f| (f.key.as_deref(), f.part, f.rows))
            .collect();
        assert_eq!(
            layout,
            vec![
                (Some("2025-07-01"), 1, 500),
                (Some("2025-07-01"), 2, 300),
                (Some("2025-07-02"), 1, 400),
            ]
        );

        let contents = read_all(&summary.files);
        assert!(contents.iter().all(|c| c.starts_with("msg_id,accepted_time,status\n")));
        assert!(contents[0].contains("m-3,2025-07-01 00:00:02,DTH\n"));
        assert!(contents[0].contains("m-1,2025-07-01 00:00:00,DTN\n"));
        for (file, content) in summary.files.iter().zip(&contents) {
            let day = file.key.as_deref().unwrap();
            assert!(content.lines().skip(1).all(|line| line.contains(day)));
        }
    }

    #[tokio::test]
    async fn test_resume_after_faults_matches_uninterrupted_run() {
        let docs = documents(&[700, 300]);

        let clean_dir = tempfile::tempdir().unwrap();
        let clean_config = config(clean_dir.path());
        let clean = supervisor(&clean_config, MockStore::new(docs.clone(), Vec::new()))
            .run()
            .await
            .unwrap();

        let faulty_dir = tempfile::tempdir().unwrap();
        let faulty_config = config(faulty_dir.path());
        let store = MockStore::new(
            docs,
            vec![Fault::FailAfter(300), Fault::ConnectFails, Fault::FailAfter(450)],
        );
        let requests = Arc::clone(&store.requests);
        let faulty = supervisor(&faulty_config, store).run().await.unwrap();

        assert_eq!(faulty.retries, 3);
        assert_eq!(faulty.rows_written, 1000);
        assert_eq!(read_all(&faulty.files), read_all(&clean.files));
        let names = |files: &[PartitionSummary]| -> Vec<_> {
            files.iter().map(|f| f.path.file_name().unwrap().to_owned()).collect()
        };
        assert_eq!(names(&faulty.files), names(&clean.files));

        let resumes: Vec<Option<Bson>> = requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.resume_after.clone())
            .collect();
        assert_eq!(
            resumes,
            vec![
                None,
                Some(Bson::Int64(300)),
                Some(Bson::Int64(300)),
                Some(Bson::Int64(750)),
            ]
        );
    }

    #[tokio::test]
    async fn test_failure_count_resets_after_progress() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.retry.max_attempts = Some(2);
        let store = MockStore::new(
            documents(&[400]),
            vec![Fault::FailAfter(100), Fault::FailAfter(100), Fault::FailAfter(100)],
        );

        let summary = supervisor(&config, store).run().await.unwrap();
        assert_eq!(summary.rows_written, 400);
        assert_eq!(summary.retries, 3);
    }

    #[tokio::test]
    async fn test_retry_cap_exhausted() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.retry.max_attempts = Some(3);

        let err = supervisor(&config, MockStore::unreachable())
            .run()
            .await
            .unwrap_err();
        match err {
            ExportError::Aborted {
                reason,
                last_position,
            } => {
                assert!(matches!(
                    *reason,
                    ExportError::RetriesExhausted { attempts: 3, .. }
                ));
                assert_eq!(last_position, None);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_output_fault_aborts_with_last_position() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let sink = FailingSink {
            limit: 150,
            written: Arc::new(AtomicU64::new(0)),
        };
        let store = MockStore::new(documents(&[400]), Vec::new());

        let err = ExportSupervisor::with_sink(&config, Box::new(store), Box::new(sink))
            .unwrap()
            .with_retry(fast_retry(), None)
            .run()
            .await
            .unwrap_err();

        match err {
            ExportError::Aborted {
                reason,
                last_position,
            } => {
                assert!(matches!(*reason, ExportError::Output(_)));
                assert_eq!(last_position.as_deref(), Some("150"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_decrypt_failure_keeps_row() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.fields.push(field("short_message", FieldRule::Decrypt));
        config.transform.decrypt_key = Some("0123456789abcdef".into());
        let mut docs = documents(&[2]);
        docs[0].insert("short_message", "dHJ1bmNhdGVk");
        docs[1].insert("short_message", "");

        let summary = supervisor(&config, MockStore::new(docs, Vec::new()))
            .run()
            .await
            .unwrap();

        assert_eq!(summary.rows_written, 2);
        let content = read_all(&summary.files).concat();
        assert!(content.contains("m-1,2025-07-01 00:00:00,DTN,[DECRYPT_FAIL]\n"));
        assert!(content.contains("m-2,2025-07-01 00:00:01,DTN,\n"));
    }

    #[tokio::test]
    async fn test_resume_after_skips_committed_rows() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let store = MockStore::new(documents(&[100]), Vec::new());
        let requests = Arc::clone(&store.requests);

        let summary = supervisor(&config, store)
            .with_resume_after(Some(Bson::Int64(60)))
            .run()
            .await
            .unwrap();

        assert_eq!(summary.rows_written, 40);
        assert_eq!(
            requests.lock().unwrap()[0].resume_after,
            Some(Bson::Int64(60))
        );
        let content = read_all(&summary.files).concat();
        assert!(!content.contains("m-60,"));
        assert!(content.contains("m-61,"));
    }

    #[tokio::test]
    async fn test_rerun_with_resume_after_appends_to_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.output.max_rows_per_file = Some(50);
        let docs = documents(&[100, 20]);

        let first = supervisor(&config, MockStore::new(docs[..60].to_vec(), Vec::new()))
            .run()
            .await
            .unwrap();
        assert_eq!(first.last_position.as_deref(), Some("60"));

        let second = supervisor(&config, MockStore::new(docs, Vec::new()))
            .with_resume_after(Some(Bson::Int64(60)))
            .run()
            .await
            .unwrap();
        assert_eq!(second.rows_written, 60);

        let clean_dir = tempfile::tempdir().unwrap();
        let mut clean_config = config.clone();
        clean_config.output.path = clean_dir.path().join("msgs.csv");
        let clean = supervisor(&clean_config, MockStore::new(documents(&[100, 20]), Vec::new()))
            .run()
            .await
            .unwrap();

        let names = |files: &[PartitionSummary]| -> Vec<_> {
            files.iter().map(|f| f.path.file_name().unwrap().to_owned()).collect()
        };
        let mut on_disk = names(&first.files);
        on_disk.extend(names(&second.files));
        on_disk.dedup();
        assert_eq!(on_disk, names(&clean.files));

        let resumed: Vec<String> = clean
            .files
            .iter()
            .map(|f| std::fs::read_to_string(dir.path().join(f.path.file_name().unwrap())).unwrap())
            .collect();
        assert_eq!(resumed, read_all(&clean.files));
        assert!(resumed[0].contains("m-1,"));
    }

    #[tokio::test]
    async fn test_cancel_while_streaming_closes_partition() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let token = CancellationToken::new();
        let store = MockStore::new(
            documents(&[400]),
            vec![Fault::CancelAfter(130, token.clone())],
        );

        let summary = supervisor(&config, store)
            .with_cancellation(token)
            .run()
            .await
            .unwrap();

        assert!(summary.cancelled);
        assert_eq!(summary.rows_written, 130);
        assert_eq!(summary.last_position.as_deref(), Some("130"));
        assert_eq!(summary.files.len(), 1);
        assert_eq!(summary.files[0].rows, 130);

        let content = std::fs::read_to_string(&summary.files[0].path).unwrap();
        assert!(content.ends_with('\n'));
        assert_eq!(content.lines().count() as u64, summary.rows_written + 1);
        assert!(content.ends_with("m-130,2025-07-01 00:02:09,DTN\n"));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let token = CancellationToken::new();
        token.cancel();

        let summary = supervisor(&config, MockStore::new(documents(&[10]), Vec::new()))
            .with_cancellation(token)
            .run()
            .await
            .unwrap();

        assert!(summary.cancelled);
        assert_eq!(summary.rows_written, 0);
        assert!(summary.files.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_interrupts_backoff() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let token = CancellationToken::new();

        let run = ExportSupervisor::from_config(&config, Box::new(MockStore::unreachable()))
            .unwrap()
            .with_retry(Backoff::new(Duration::from_secs(60), Duration::from_secs(60)), None)
            .with_cancellation(token.clone());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            token.cancel();
        });
        let summary = tokio::time::timeout(Duration::from_secs(5), run.run())
            .await
            .expect("backoff sleep was not interrupted")
            .unwrap();
        canceller.await.unwrap();

        assert!(summary.cancelled);
        assert_eq!(summary.retries, 0);
    }
}
