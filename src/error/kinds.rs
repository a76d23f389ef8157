use std::{fmt, io};

use crate::error::mongo::{FaultKind, classify_mongodb_error, format_mongodb_error};

/// Crate-wide `Result` type using [`ExportError`] as the error.
pub type Result<T> = std::result::Result<T, ExportError>;

/// Top-level error type for export operations.
#[derive(Debug)]
pub enum ExportError {
    /// Store connection and cursor errors.
    Connection(ConnectionError),

    /// Configuration errors, raised before the pipeline starts.
    Config(ConfigError),

    /// Output file errors.
    Output(OutputError),

    /// I/O errors not attributed to a specific output file.
    Io(io::Error),

    /// MongoDB driver errors.
    MongoDb(mongodb::error::Error),

    /// The configured cap on consecutive store failures was reached.
    RetriesExhausted {
        attempts: u32,
        last_error: Box<ExportError>,
    },

    /// The run stopped on a fatal error; `last_position` is the primary key
    /// of the last row that reached an output file.
    Aborted {
        reason: Box<ExportError>,
        last_position: Option<String>,
    },
}

/// Store connection and cursor errors.
#[derive(Debug)]
pub enum ConnectionError {
    /// Failed to establish a connection.
    ConnectionFailed(String),

    /// A connect, ping or batch fetch exceeded its deadline.
    Timeout(String),

    /// Not currently connected.
    NotConnected,
}

/// Output file errors.
#[derive(Debug)]
pub enum OutputError {
    /// Failed to create an output file or its directory.
    CreateFailed { path: String, source: io::Error },

    /// Failed to write to an output file.
    WriteFailed { path: String, source: io::Error },

    /// Failed to flush or close an output file.
    FlushFailed { path: String, source: io::Error },

    /// A write was attempted with no partition open.
    NoOpenPartition,
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    /// Config file not found.
    FileNotFound(String),

    /// Invalid config format.
    InvalidFormat(String),

    /// Missing required field.
    MissingField(String),

    /// Invalid field value.
    InvalidValue { field: String, value: String },

    /// Free-form configuration problem.
    Generic(String),
}

impl ExportError {
    /// Whether the supervisor must stop instead of reconnecting.
    ///
    /// Every store-side fault is retried; output and configuration faults
    /// are fatal.
    pub fn is_fatal(&self) -> bool {
        match self {
            ExportError::Connection(_) | ExportError::MongoDb(_) => false,
            ExportError::Config(_)
            | ExportError::Output(_)
            | ExportError::Io(_)
            | ExportError::RetriesExhausted { .. }
            | ExportError::Aborted { .. } => true,
        }
    }

    /// Classify the fault for retry logging.
    pub fn fault_kind(&self) -> FaultKind {
        match self {
            ExportError::MongoDb(e) => classify_mongodb_error(e),
            ExportError::Connection(ConnectionError::Timeout(_)) => FaultKind::NetworkTimeout,
            ExportError::Connection(ConnectionError::ConnectionFailed(_))
            | ExportError::Connection(ConnectionError::NotConnected) => FaultKind::Network,
            _ => FaultKind::Fatal,
        }
    }

    /// Wrap a fatal error with the last committed cursor position.
    pub fn aborted(reason: ExportError, last_position: Option<String>) -> Self {
        ExportError::Aborted {
            reason: Box::new(reason),
            last_position,
        }
    }
}

/* ========================= Display & Error impls ========================= */

impl fmt::Display for ExportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportError::Connection(e) => write!(f, "Connection error: {e}"),
            ExportError::Config(e) => write!(f, "Configuration error: {e}"),
            ExportError::Output(e) => write!(f, "Output error: {e}"),
            ExportError::Io(e) => write!(f, "I/O error: {e}"),
            ExportError::MongoDb(e) => format_mongodb_error(f, e),
            ExportError::RetriesExhausted {
                attempts,
                last_error,
            } => write!(
                f,
                "Gave up after {attempts} consecutive failures; last error: {last_error}"
            ),
            ExportError::Aborted {
                reason,
                last_position,
            } => match last_position {
                Some(pos) => write!(
                    f,
                    "{reason}\nLast committed position: {pos} (rerun with --resume-after {pos})"
                ),
                None => write!(f, "{reason}\nNo rows were committed"),
            },
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionError::ConnectionFailed(msg) => write!(f, "Failed to connect: {msg}"),
            ConnectionError::Timeout(what) => write!(f, "Timed out waiting for {what}"),
            ConnectionError::NotConnected => write!(f, "Not connected to MongoDB"),
        }
    }
}

impl fmt::Display for OutputError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputError::CreateFailed { path, source } => {
                write!(f, "Failed to create {path}: {source}")
            }
            OutputError::WriteFailed { path, source } => {
                write!(f, "Failed to write {path}: {source}")
            }
            OutputError::FlushFailed { path, source } => {
                write!(f, "Failed to flush {path}: {source}")
            }
            OutputError::NoOpenPartition => write!(f, "No output partition is open"),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::FileNotFound(path) => write!(f, "Config file not found: {path}"),
            ConfigError::InvalidFormat(msg) => write!(f, "Invalid config format: {msg}"),
            ConfigError::MissingField(field) => write!(f, "Missing required field: {field}"),
            ConfigError::InvalidValue { field, value } => {
                write!(f, "Invalid value '{value}' for field '{field}'")
            }
            ConfigError::Generic(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for ExportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ExportError::Io(e) => Some(e),
            ExportError::MongoDb(e) => Some(e),
            ExportError::Output(e) => Some(e),
            _ => None,
        }
    }
}

impl std::error::Error for ConnectionError {}
impl std::error::Error for ConfigError {}

impl std::error::Error for OutputError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            OutputError::CreateFailed { source, .. }
            | OutputError::WriteFailed { source, .. }
            | OutputError::FlushFailed { source, .. } => Some(source),
            OutputError::NoOpenPartition => None,
        }
    }
}

/* ========================= Conversions to ExportError ========================= */

impl From<io::Error> for ExportError {
    fn from(err: io::Error) -> Self {
        ExportError::Io(err)
    }
}

impl From<mongodb::error::Error> for ExportError {
    fn from(err: mongodb::error::Error) -> Self {
        ExportError::MongoDb(err)
    }
}

impl From<ConnectionError> for ExportError {
    fn from(err: ConnectionError) -> Self {
        ExportError::Connection(err)
    }
}

impl From<OutputError> for ExportError {
    fn from(err: OutputError) -> Self {
        ExportError::Output(err)
    }
}

impl From<ConfigError> for ExportError {
    fn from(err: ConfigError) -> Self {
        ExportError::Config(err)
    }
}
