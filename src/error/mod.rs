//! Error handling for the export pipeline.
//!
//! Errors fall into four groups that drive the supervisor's decisions:
//! - Store faults (driver, connection, cursor): retried with backoff
//! - Output faults (disk full, permission denied): abort the run
//! - Configuration faults: rejected before any connection is opened
//! - Transformation faults: never surface here, they degrade to sentinels
//!
//! # Example
//!
//! ```rust,no_run
//! use mongo_csv_export::error::mongo::{classify_mongodb_error, extract_error_info};
//!
//! fn log_fault(err: &mongodb::error::Error) {
//!     let info = extract_error_info(err);
//!     let kind = classify_mongodb_error(err);
//!     eprintln!("{kind}: {}", info.to_json_compact().unwrap_or_default());
//! }
//! ```

pub mod kinds;
pub mod mongo;

pub use kinds::{ConfigError, ConnectionError, ExportError, OutputError, Result};
pub use mongo::{ErrorInfo, FaultKind};
