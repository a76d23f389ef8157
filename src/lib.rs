//! Resumable MongoDB to CSV export library
//!
//! Streams a date range of a collection in primary-key order, turns each
//! document into a CSV row through a declarative field-rule table, and writes
//! rows into files rotated by calendar day and row count. Store faults are
//! retried with exponential backoff and the cursor resumes strictly after the
//! last written row.
//!
//! # Modules
//!
//! - `cli`: Command-line interface and argument parsing
//! - `config`: Job configuration
//! - `connection`: MongoDB connection management
//! - `error`: Error types and fault classification
//! - `export`: The export pipeline
//! - `utils`: Utility functions and helpers
//!
//! # Example
//!
//! ```no_run
//! use mongo_csv_export::{Config, ExportSupervisor, MongoStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load_from_file(Some(std::path::Path::new("export.toml")))?;
//!     config.validate()?;
//!
//!     let store = MongoStore::new(config.connection.clone());
//!     let summary = ExportSupervisor::from_config(&config, Box::new(store))?
//!         .run()
//!         .await?;
//!     println!("{} rows in {} files", summary.rows_written, summary.files.len());
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod config;
pub mod connection;
pub mod error;
pub mod export;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use connection::ConnectionManager;
pub use error::{ExportError, Result};
pub use export::{ExportSummary, ExportSupervisor, MongoStore};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library version string
pub fn version() -> &'static str {
    VERSION
}
