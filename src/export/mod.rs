//! Resumable export pipeline
//!
//! - `query`: immutable query range and per-attempt cursor requests
//! - `streaming`: cursor driver over a document store
//! - `transform`: declarative field rules, one source document to one row
//! - `writers` / `rotation`: CSV partition files rotated by day and row count
//! - `backoff` / `supervisor`: the retry state machine tying it together
//! - `progress`: operator-facing progress lines

pub mod backoff;
pub mod progress;
pub mod query;
pub mod rotation;
pub mod streaming;
pub mod supervisor;
pub mod transform;
pub mod writers;

pub use backoff::Backoff;
pub use progress::ProgressTracker;
pub use query::{CursorRequest, QueryRange, format_resume_id, parse_resume_id};
pub use rotation::{OutputLayout, PartitionSummary, RotatingWriter};
pub use streaming::{DocumentStore, MongoStore, StreamingQuery};
pub use supervisor::{ExportSummary, ExportSupervisor};
pub use transform::{ExportRecord, RowTransformer};
pub use writers::{CsvSinkFactory, FormatWriter, ReopenedSink, SinkFactory};
