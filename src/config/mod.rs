//! Configuration management for export jobs
//!
//! A job is described by a TOML file. Values are resolved with this
//! precedence (highest to lowest):
//! 1. Command-line arguments
//! 2. Environment variables (`MONGO_CSV_EXPORT_URI`, `MONGO_CSV_EXPORT_DECRYPT_KEY`)
//! 3. Configuration file
//! 4. Default values
//!
//! ```toml
//! [connection]
//! uri = "mongodb://localhost:27017"
//! database = "jasmin"
//! collection = "messages"
//!
//! [query]
//! start = "2025-07-01T00:00:00Z"
//! end = "2025-08-01T00:00:00Z"
//! filters = { uid = "acme", status = ["UNDELIV", "REJECTD"] }
//!
//! [output]
//! path = "./exports/messages.csv"
//! max_rows_per_file = 500000
//! rotate_by_day = true
//!
//! [[fields]]
//! name = "network_time"
//! rule = "datetime"
//! source = ["network_time", "accepted_time"]
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Environment variable overriding `connection.uri`.
pub const ENV_URI: &str = "MONGO_CSV_EXPORT_URI";

/// Environment variable overriding `transform.decrypt_key`.
pub const ENV_DECRYPT_KEY: &str = "MONGO_CSV_EXPORT_DECRYPT_KEY";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Store connection configuration
    pub connection: ConnectionConfig,

    /// Query range and filters
    pub query: QueryConfig,

    /// Output files and rotation
    pub output: OutputConfig,

    /// Ordered output columns and the rule that produces each one
    pub fields: Vec<FieldSpec>,

    /// Row transformation settings
    pub transform: TransformConfig,

    /// Retry and backoff settings
    pub retry: RetryConfig,

    /// Progress reporting settings
    pub progress: ProgressConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Connection-related configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// MongoDB connection URI
    #[serde(default = "default_uri")]
    pub uri: String,

    /// Database name
    #[serde(default)]
    pub database: String,

    /// Collection name
    #[serde(default)]
    pub collection: String,

    /// Connection establishment timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,

    /// Server selection timeout in seconds
    #[serde(default = "default_server_selection_timeout")]
    pub server_selection_timeout: u64,

    /// Per-batch read timeout in seconds
    #[serde(default = "default_read_timeout")]
    pub read_timeout: u64,

    /// Maximum pool size
    #[serde(default = "default_max_pool_size")]
    pub max_pool_size: u32,

    /// Prefer reading from a secondary member
    #[serde(default = "default_read_from_secondary")]
    pub read_from_secondary: bool,

    /// Application name reported to the server
    #[serde(default = "default_app_name")]
    pub app_name: String,
}

/// Query range and filter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Timestamp field the range applies to
    #[serde(default = "default_time_field")]
    pub time_field: String,

    /// Range start (inclusive)
    #[serde(default)]
    pub start: String,

    /// Range end
    #[serde(default)]
    pub end: String,

    /// Whether `end` is inclusive (`$lte`) instead of exclusive (`$lt`)
    #[serde(default)]
    pub end_inclusive: bool,

    /// Equality filters; arrays become `$in`
    #[serde(default)]
    pub filters: BTreeMap<String, FilterValue>,

    /// Cursor batch (prefetch) size
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
}

/// An equality filter value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    AnyOf(Vec<FilterValue>),
}

/// Output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Base output path; partition and part suffixes are added to the stem
    #[serde(default)]
    pub path: PathBuf,

    /// Rotate to a new part after this many data rows
    #[serde(default)]
    pub max_rows_per_file: Option<u64>,

    /// Rotate to a new file when the calendar day changes
    #[serde(default)]
    pub rotate_by_day: bool,

    /// Fields the day key is derived from, first present wins
    #[serde(default = "default_partition_fields")]
    pub partition_fields: Vec<String>,
}

/// Declarative output column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Output column name
    pub name: String,

    /// Rule producing the cell
    #[serde(default)]
    pub rule: FieldRule,

    /// Source fields, first present non-empty value wins; defaults to `name`
    #[serde(default)]
    pub source: Vec<String>,

    /// Exact substitutions applied to the produced cell
    #[serde(default)]
    pub replace: BTreeMap<String, String>,
}

/// Named field transforms
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldRule {
    #[default]
    Identity,
    Datetime,
    Decrypt,
    Status,
    PacketTotal,
}

/// Row transformation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformConfig {
    /// Fixed offset applied to every rendered timestamp and day key
    #[serde(default)]
    pub utc_offset_minutes: i32,

    /// Pre-shared AES key for `decrypt` fields
    #[serde(default)]
    pub decrypt_key: Option<String>,

    /// Marker written when a body cannot be decrypted
    #[serde(default = "default_decrypt_sentinel")]
    pub decrypt_sentinel: String,

    /// Status remapping table
    #[serde(default)]
    pub status: StatusMapConfig,
}

/// Status remapping table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusMapConfig {
    #[serde(default = "default_delivered_code")]
    pub delivered_code: String,

    #[serde(default = "default_delivered_values")]
    pub delivered_values: Vec<String>,

    #[serde(default = "default_failed_code")]
    pub failed_code: String,

    #[serde(default = "default_failed_values")]
    pub failed_values: Vec<String>,

    /// Code for every other raw value
    #[serde(default = "default_pending_code")]
    pub default_code: String,
}

/// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// First backoff delay in milliseconds
    #[serde(default = "default_retry_base")]
    pub base_delay_ms: u64,

    /// Backoff ceiling in milliseconds
    #[serde(default = "default_retry_max")]
    pub max_delay_ms: u64,

    /// Cap on consecutive failures; unset retries forever
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

/// Progress reporting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressConfig {
    /// Emit a progress line every N rows
    #[serde(default = "default_progress_every")]
    pub every_rows: u64,

    /// Draw a spinner on the terminal
    #[serde(default)]
    pub show_bar: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub level: LogLevel,

    /// Enable timestamps in logs
    #[serde(default = "default_log_timestamps")]
    pub timestamps: bool,
}

/// Log level options
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

// Default value functions
fn default_uri() -> String {
    "mongodb://localhost:27017".to_string()
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_server_selection_timeout() -> u64 {
    30
}

fn default_read_timeout() -> u64 {
    180
}

fn default_max_pool_size() -> u32 {
    20
}

fn default_read_from_secondary() -> bool {
    true
}

fn default_app_name() -> String {
    "mongo-csv-export".to_string()
}

fn default_time_field() -> String {
    "created_at".to_string()
}

fn default_batch_size() -> u32 {
    1000
}

fn default_partition_fields() -> Vec<String> {
    vec!["accepted_time".to_string(), "created_at".to_string()]
}

fn default_decrypt_sentinel() -> String {
    "[DECRYPT_FAIL]".to_string()
}

fn default_delivered_code() -> String {
    "DTH".to_string()
}

fn default_delivered_values() -> Vec<String> {
    vec!["DELIVRD".to_string()]
}

fn default_failed_code() -> String {
    "FAILED".to_string()
}

fn default_failed_values() -> Vec<String> {
    ["UNDELIV", "ESME_RSUBMITFAIL", "FAILED", "REJECTD"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_pending_code() -> String {
    "DTN".to_string()
}

fn default_retry_base() -> u64 {
    5_000
}

fn default_retry_max() -> u64 {
    300_000
}

fn default_progress_every() -> u64 {
    50_000
}

fn default_log_level() -> LogLevel {
    LogLevel::Info
}

fn default_log_timestamps() -> bool {
    true
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            uri: default_uri(),
            database: String::new(),
            collection: String::new(),
            connect_timeout: default_connect_timeout(),
            server_selection_timeout: default_server_selection_timeout(),
            read_timeout: default_read_timeout(),
            max_pool_size: default_max_pool_size(),
            read_from_secondary: default_read_from_secondary(),
            app_name: default_app_name(),
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            time_field: default_time_field(),
            start: String::new(),
            end: String::new(),
            end_inclusive: false,
            filters: BTreeMap::new(),
            batch_size: default_batch_size(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::new(),
            max_rows_per_file: None,
            rotate_by_day: false,
            partition_fields: default_partition_fields(),
        }
    }
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            utc_offset_minutes: 0,
            decrypt_key: None,
            decrypt_sentinel: default_decrypt_sentinel(),
            status: StatusMapConfig::default(),
        }
    }
}

impl Default for StatusMapConfig {
    fn default() -> Self {
        Self {
            delivered_code: default_delivered_code(),
            delivered_values: default_delivered_values(),
            failed_code: default_failed_code(),
            failed_values: default_failed_values(),
            default_code: default_pending_code(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_retry_base(),
            max_delay_ms: default_retry_max(),
            max_attempts: None,
        }
    }
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            every_rows: default_progress_every(),
            show_bar: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            timestamps: default_log_timestamps(),
        }
    }
}

impl Config {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| ConfigError::InvalidFormat(e.to_string()).into())
    }

    /// Load configuration from a file
    ///
    /// # Arguments
    /// * `path` - Path to the configuration file, or `None` for the default path
    ///
    /// # Returns
    /// * `Result<Config>` - Loaded configuration or error
    pub fn load_from_file(path: Option<&Path>) -> Result<Self> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(Self::default_path);
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()).into());
        }

        let content = std::fs::read_to_string(&path)?;
        Self::from_toml_str(&content)
    }

    /// Apply environment variable overrides
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary variable lookup
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(uri) = lookup(ENV_URI).filter(|v| !v.is_empty()) {
            self.connection.uri = uri;
        }
        if let Some(key) = lookup(ENV_DECRYPT_KEY).filter(|v| !v.is_empty()) {
            self.transform.decrypt_key = Some(key);
        }
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".mongo-csv-export")
            .join("config.toml")
    }

    /// Serialize the effective configuration, masking credentials and the decrypt key
    pub fn to_toml_redacted(&self) -> Result<String> {
        let mut shown = self.clone();
        shown.connection.uri = crate::utils::uri::sanitize(&shown.connection.uri);
        if shown.transform.decrypt_key.is_some() {
            shown.transform.decrypt_key = Some("***".to_string());
        }
        toml::to_string_pretty(&shown)
            .map_err(|e| ConfigError::InvalidFormat(e.to_string()).into())
    }

    /// Validate the configuration
    ///
    /// Runs before any connection is opened; every problem found here is a
    /// configuration fault.
    pub fn validate(&self) -> Result<()> {
        require("connection.uri", &self.connection.uri)?;
        require("connection.database", &self.connection.database)?;
        require("connection.collection", &self.connection.collection)?;
        require("query.time_field", &self.query.time_field)?;
        require("query.start", &self.query.start)?;
        require("query.end", &self.query.end)?;

        if !self.connection.uri.starts_with("mongodb://")
            && !self.connection.uri.starts_with("mongodb+srv://")
        {
            return Err(invalid("connection.uri", "<redacted>"));
        }

        let start = parse_range_bound(&self.query.start)
            .ok_or_else(|| invalid("query.start", &self.query.start))?;
        let end = parse_range_bound(&self.query.end)
            .ok_or_else(|| invalid("query.end", &self.query.end))?;
        if start >= end {
            return Err(ConfigError::Generic(format!(
                "query.start ({}) must be before query.end ({})",
                self.query.start, self.query.end
            ))
            .into());
        }

        if self.query.batch_size == 0 {
            return Err(invalid("query.batch_size", "0"));
        }

        if self.output.path.as_os_str().is_empty() {
            return Err(ConfigError::MissingField("output.path".to_string()).into());
        }
        if self.output.max_rows_per_file == Some(0) {
            return Err(invalid("output.max_rows_per_file", "0"));
        }
        if self.output.rotate_by_day && self.output.partition_fields.is_empty() {
            return Err(ConfigError::MissingField("output.partition_fields".to_string()).into());
        }

        if self.fields.is_empty() {
            return Err(ConfigError::MissingField("fields".to_string()).into());
        }
        let mut seen = HashSet::new();
        for field in &self.fields {
            require("fields.name", &field.name)?;
            if !seen.insert(field.name.as_str()) {
                return Err(ConfigError::Generic(format!(
                    "Duplicate output field '{}'",
                    field.name
                ))
                .into());
            }
        }

        if self.fields.iter().any(|f| f.rule == FieldRule::Decrypt) {
            match &self.transform.decrypt_key {
                None => {
                    return Err(ConfigError::MissingField("transform.decrypt_key".to_string()).into());
                }
                Some(key) if !matches!(key.len(), 16 | 24 | 32) => {
                    return Err(ConfigError::Generic(format!(
                        "transform.decrypt_key must be 16, 24 or 32 bytes, got {}",
                        key.len()
                    ))
                    .into());
                }
                Some(_) => {}
            }
        }

        if self.transform.utc_offset_minutes.abs() >= 24 * 60 {
            return Err(invalid(
                "transform.utc_offset_minutes",
                &self.transform.utc_offset_minutes.to_string(),
            ));
        }

        if self.retry.base_delay_ms == 0 || self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::Generic(format!(
                "retry.base_delay_ms ({}) must be positive and not exceed retry.max_delay_ms ({})",
                self.retry.base_delay_ms, self.retry.max_delay_ms
            ))
            .into());
        }

        if self.retry.max_attempts == Some(0) {
            return Err(invalid("retry.max_attempts", "0"));
        }

        if self.progress.every_rows == 0 {
            return Err(invalid("progress.every_rows", "0"));
        }

        Ok(())
    }

    /// Parsed query range start
    pub fn range_start(&self) -> Result<DateTime<Utc>> {
        parse_range_bound(&self.query.start).ok_or_else(|| invalid("query.start", &self.query.start))
    }

    /// Parsed query range end
    pub fn range_end(&self) -> Result<DateTime<Utc>> {
        parse_range_bound(&self.query.end).ok_or_else(|| invalid("query.end", &self.query.end))
    }
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

/// Parse a range bound: RFC 3339, `YYYY-MM-DD HH:MM:SS` (UTC) or a bare date
pub fn parse_range_bound(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(ConfigError::MissingField(field.to_string()).into());
    }
    Ok(())
}

fn invalid(field: &str, value: &str) -> crate::error::ExportError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
    }
    .into()
}
