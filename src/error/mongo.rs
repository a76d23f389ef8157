use std::fmt;

use serde::{Deserialize, Serialize};

/// Error labels the server or driver attach to faults that are safe to retry.
const RETRYABLE_LABELS: &[&str] = &[
    "ResetPool",
    "InterruptInUseConnections",
    "RetryableWriteError",
    "RetryableReadError",
];

/// Classification of a failure for retry logging.
///
/// The supervisor retries every store fault regardless of class; the class
/// only tells the operator what went wrong.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultKind {
    /// A socket read/connect exceeded its deadline.
    NetworkTimeout,
    /// Any other socket-level failure.
    Network,
    /// No suitable server was found within the selection timeout.
    ServerSelection,
    /// The driver invalidated its connection pool.
    PoolCleared,
    /// The error carried a retryable label.
    RetryableLabel(String),
    /// A store fault with no specific class.
    Other,
    /// Not a store fault; the run must stop.
    Fatal,
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaultKind::NetworkTimeout => write!(f, "network timeout"),
            FaultKind::Network => write!(f, "network error"),
            FaultKind::ServerSelection => write!(f, "server selection error"),
            FaultKind::PoolCleared => write!(f, "connection pool cleared"),
            FaultKind::RetryableLabel(label) => write!(f, "retryable ({label})"),
            FaultKind::Other => write!(f, "store error"),
            FaultKind::Fatal => write!(f, "fatal error"),
        }
    }
}

/// Structured error information extracted from MongoDB errors.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub(crate) error_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) message: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub(crate) labels: Vec<String>,
}

impl ErrorInfo {
    /// Convert error info to compact JSON string (single line).
    pub fn to_json_compact(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Format a driver error as a single line of JSON.
///
/// Used by `ExportError`'s `Display` so retry lines stay one line each.
pub fn format_mongodb_error(
    f: &mut fmt::Formatter<'_>,
    error: &mongodb::error::Error,
) -> fmt::Result {
    let info = extract_error_info(error);
    let json_output = info.to_json_compact().map_err(|_| fmt::Error)?;
    write!(f, "MongoDB error: {json_output}")
}

/// Extract structured information from a MongoDB error using the driver API.
pub fn extract_error_info(error: &mongodb::error::Error) -> ErrorInfo {
    use mongodb::error::ErrorKind;

    let mut info = ErrorInfo {
        labels: RETRYABLE_LABELS
            .iter()
            .filter(|label| error.contains_label(label))
            .map(|label| label.to_string())
            .collect(),
        ..ErrorInfo::default()
    };

    match error.kind.as_ref() {
        ErrorKind::Command(command_error) => {
            info.error_type = Some("mongo.command_error".to_string());
            info.code = Some(command_error.code);
            info.message = Some(command_error.message.clone());
            info.name = get_error_name(command_error.code)
                .or_else(|| Some(command_error.code_name.clone()).filter(|n| !n.is_empty()));
        }
        ErrorKind::Authentication { message, .. } => {
            info.error_type = Some("mongo.authentication_error".to_string());
            info.message = Some(message.clone());
        }
        ErrorKind::InvalidArgument { message, .. } => {
            info.error_type = Some("mongo.invalid_argument".to_string());
            info.message = Some(message.clone());
        }
        ErrorKind::ServerSelection { message, .. } => {
            info.error_type = Some("mongo.server_selection_error".to_string());
            info.message = Some(message.clone());
        }
        ErrorKind::ConnectionPoolCleared { message, .. } => {
            info.error_type = Some("mongo.pool_cleared".to_string());
            info.message = Some(message.clone());
        }
        ErrorKind::Io(io_error) => {
            info.error_type = Some("mongo.network_error".to_string());
            info.message = Some(io_error.to_string());
        }
        _ => {
            info.message = Some(error.to_string());
        }
    }

    info
}

/// Classify a driver error for retry logging.
pub fn classify_mongodb_error(error: &mongodb::error::Error) -> FaultKind {
    use mongodb::error::ErrorKind;

    match error.kind.as_ref() {
        ErrorKind::Io(io_error) if io_error.kind() == std::io::ErrorKind::TimedOut => {
            return FaultKind::NetworkTimeout;
        }
        ErrorKind::Io(_) => return FaultKind::Network,
        ErrorKind::ServerSelection { .. } => return FaultKind::ServerSelection,
        ErrorKind::ConnectionPoolCleared { .. } => return FaultKind::PoolCleared,
        ErrorKind::Command(command_error) if command_error.code == 50 => {
            return FaultKind::NetworkTimeout;
        }
        _ => {}
    }

    RETRYABLE_LABELS
        .iter()
        .find(|label| error.contains_label(label))
        .map(|label| FaultKind::RetryableLabel(label.to_string()))
        .unwrap_or(FaultKind::Other)
}

/// Get a human-readable error name from a MongoDB error code.
fn get_error_name(code: i32) -> Option<String> {
    let name = match code {
        13 => "Unauthorized",
        18 => "AuthenticationFailed",
        26 => "NamespaceNotFound",
        43 => "CursorNotFound",
        50 => "MaxTimeMSExpired",
        91 => "ShutdownInProgress",
        189 => "PrimarySteppedDown",
        _ => return None,
    };

    Some(name.to_string())
}
