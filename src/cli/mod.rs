//! Command-line interface for mongo-csv-export
//!
//! This module handles:
//! - Command-line argument parsing using clap
//! - Configuration loading (file, environment, arguments)
//! - The `version`, `completion` and `config` subcommands

use clap::{Parser, Subcommand};
use mongodb::bson::Bson;
use std::path::PathBuf;

use crate::config::{Config, LogLevel};
use crate::error::{ConfigError, ExportError, Result};
use crate::export::parse_resume_id;

pub mod completion;

/// Resumable MongoDB to CSV exporter
#[derive(Parser, Debug)]
#[command(
    name = "mongo-csv-export",
    version,
    about = "Export a MongoDB date range to rotating CSV files",
    long_about = "Streams a date range of a MongoDB collection in primary-key order into CSV
files rotated by calendar day and row count. Transient store faults are
retried with exponential backoff and the export resumes after the last
written row."
)]
pub struct CliArgs {
    /// Configuration file path
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    pub config_file: Option<PathBuf>,

    /// MongoDB connection URI
    #[arg(long, value_name = "URI")]
    pub uri: Option<String>,

    /// Database name
    #[arg(long, value_name = "NAME")]
    pub database: Option<String>,

    /// Collection name
    #[arg(long, value_name = "NAME")]
    pub collection: Option<String>,

    /// Range start (inclusive), RFC 3339 or YYYY-MM-DD
    #[arg(long, value_name = "TIME")]
    pub start: Option<String>,

    /// Range end, RFC 3339 or YYYY-MM-DD
    #[arg(long, value_name = "TIME")]
    pub end: Option<String>,

    /// Output base path
    #[arg(short = 'o', long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Rotate to a new part after this many rows
    #[arg(long, value_name = "ROWS")]
    pub max_rows: Option<u64>,

    /// Rotate to a new file when the calendar day changes (true/false)
    #[arg(
        long,
        value_name = "BOOL",
        num_args = 0..=1,
        default_missing_value = "true"
    )]
    pub rotate_by_day: Option<bool>,

    /// Cursor batch size
    #[arg(long, value_name = "DOCS")]
    pub batch_size: Option<u32>,

    /// Prefer secondaries for reads (true/false)
    #[arg(long, value_name = "BOOL")]
    pub secondary: Option<bool>,

    /// Give up after this many consecutive store failures
    #[arg(long, value_name = "N")]
    pub max_retries: Option<u32>,

    /// Skip every row up to and including this primary key
    #[arg(long, value_name = "ID")]
    pub resume_after: Option<String>,

    /// Draw a progress spinner
    #[arg(long)]
    pub progress: bool,

    /// Quiet mode (errors only)
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Verbose mode (detailed logging)
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Very verbose mode (trace logging)
    #[arg(long = "vv")]
    pub very_verbose: bool,

    /// Subcommands
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Subcommands for mongo-csv-export
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show version information
    Version,

    /// Generate shell completion script
    Completion {
        /// Shell type (bash, zsh, fish, powershell, elvish)
        #[arg(value_name = "SHELL")]
        shell: String,
    },

    /// Show or validate the effective configuration
    Config {
        /// Show effective configuration
        #[arg(long)]
        show: bool,

        /// Validate configuration
        #[arg(long)]
        validate: bool,
    },
}

/// CLI interface handler
pub struct CliInterface {
    /// Parsed command-line arguments
    args: CliArgs,

    /// Effective configuration
    config: Config,
}

impl CliInterface {
    /// Parse process arguments and load the configuration
    pub fn new() -> Result<Self> {
        Self::from_args(CliArgs::parse())
    }

    pub fn from_args(args: CliArgs) -> Result<Self> {
        let config = Self::load_config(&args)?;
        Ok(Self { args, config })
    }

    /// Load configuration from file, then apply environment and arguments
    ///
    /// A missing file is an error only when it was named with `--config`.
    fn load_config(args: &CliArgs) -> Result<Config> {
        let mut config = match Config::load_from_file(args.config_file.as_deref()) {
            Ok(config) => config,
            Err(ExportError::Config(ConfigError::FileNotFound(_))) if args.config_file.is_none() => {
                Config::default()
            }
            Err(e) => return Err(e),
        };

        config.apply_env();
        Self::apply_args_to_config(&mut config, args);
        Ok(config)
    }

    /// Apply CLI arguments to configuration
    fn apply_args_to_config(config: &mut Config, args: &CliArgs) {
        Self::apply_logging_args(config, args);
        Self::apply_connection_args(config, args);
        Self::apply_query_args(config, args);
        Self::apply_output_args(config, args);

        if let Some(max) = args.max_retries {
            config.retry.max_attempts = Some(max);
        }
        if args.progress {
            config.progress.show_bar = true;
        }
    }

    fn apply_logging_args(config: &mut Config, args: &CliArgs) {
        config.logging.level = if args.very_verbose {
            LogLevel::Trace
        } else if args.verbose {
            LogLevel::Debug
        } else if args.quiet {
            LogLevel::Error
        } else {
            config.logging.level
        };
    }

    fn apply_connection_args(config: &mut Config, args: &CliArgs) {
        if let Some(uri) = &args.uri {
            config.connection.uri = uri.clone();
        }
        if let Some(database) = &args.database {
            config.connection.database = database.clone();
        }
        if let Some(collection) = &args.collection {
            config.connection.collection = collection.clone();
        }
        if let Some(secondary) = args.secondary {
            config.connection.read_from_secondary = secondary;
        }
    }

    fn apply_query_args(config: &mut Config, args: &CliArgs) {
        if let Some(start) = &args.start {
            config.query.start = start.clone();
        }
        if let Some(end) = &args.end {
            config.query.end = end.clone();
        }
        if let Some(batch_size) = args.batch_size {
            config.query.batch_size = batch_size;
        }
    }

    fn apply_output_args(config: &mut Config, args: &CliArgs) {
        if let Some(output) = &args.output {
            config.output.path = output.clone();
        }
        if let Some(max_rows) = args.max_rows {
            config.output.max_rows_per_file = Some(max_rows);
        }
        if let Some(rotate) = args.rotate_by_day {
            config.output.rotate_by_day = rotate;
        }
    }

    /// Get the effective configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get the CLI arguments
    pub fn args(&self) -> &CliArgs {
        &self.args
    }

    /// Resume identifier given with `--resume-after`
    pub fn resume_after(&self) -> Option<Bson> {
        self.args
            .resume_after
            .as_deref()
            .filter(|v| !v.trim().is_empty())
            .map(parse_resume_id)
    }

    /// Handle subcommands
    ///
    /// # Returns
    /// * `Result<bool>` - True if a subcommand was handled, false to run the export
    pub fn handle_subcommand(&self) -> Result<bool> {
        match &self.args.command {
            Some(Commands::Version) => {
                self.show_version();
                Ok(true)
            }
            Some(Commands::Completion { shell }) => {
                completion::generate_completion(shell)?;
                Ok(true)
            }
            Some(Commands::Config { show, validate }) => {
                self.handle_config_command(*show, *validate)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn show_version(&self) {
        println!("mongo-csv-export version {}", crate::VERSION);
    }

    /// Handle config subcommand; with no flag the configuration is shown
    fn handle_config_command(&self, show: bool, validate: bool) -> Result<()> {
        if validate {
            self.config.validate()?;
            println!("Configuration is valid");
        }

        if show || !validate {
            println!("# Configuration file: {}", self.config_path().display());
            println!("{}", self.config.to_toml_redacted()?);
        }

        Ok(())
    }

    /// Configuration file path (from args or default)
    pub fn config_path(&self) -> PathBuf {
        self.args
            .config_file
            .clone()
            .unwrap_or_else(Config::default_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn parse(args: &[&str]) -> CliArgs {
        CliArgs::try_parse_from(args).unwrap()
    }

    fn config_file(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_cli_args_parsing() {
        let args = parse(&["mongo-csv-export"]);
        assert!(args.uri.is_none());
        assert!(args.command.is_none());
        assert_eq!(args.rotate_by_day, None);

        let args = parse(&[
            "mongo-csv-export",
            "--start",
            "2025-07-01",
            "--max-rows",
            "500000",
            "--secondary",
            "false",
            "--resume-after",
            "42",
        ]);
        assert_eq!(args.start.as_deref(), Some("2025-07-01"));
        assert_eq!(args.max_rows, Some(500_000));
        assert_eq!(args.secondary, Some(false));
    }

    #[test]
    fn test_subcommands_parse() {
        let args = parse(&["mongo-csv-export", "completion", "bash"]);
        assert!(matches!(args.command, Some(Commands::Completion { .. })));

        let args = parse(&["mongo-csv-export", "config", "--validate"]);
        assert!(matches!(
            args.command,
            Some(Commands::Config {
                show: false,
                validate: true
            })
        ));
    }

    #[test]
    fn test_args_override_file() {
        let file = config_file(
            r#"
            [connection]
            database = "jasmin"
            collection = "messages"

            [query]
            start = "2025-07-01"
            end = "2025-08-01"
            batch_size = 500

            [output]
            path = "out/messages.csv"

            [[fields]]
            name = "msg_id"
            "#,
        );
        let path = file.path().to_str().unwrap();
        let args = parse(&[
            "mongo-csv-export",
            "-c",
            path,
            "--collection",
            "archive",
            "--batch-size",
            "2000",
            "--rotate-by-day",
            "--max-retries",
            "5",
            "-v",
        ]);

        let cli = CliInterface::from_args(args).unwrap();
        let config = cli.config();
        assert_eq!(config.connection.database, "jasmin");
        assert_eq!(config.connection.collection, "archive");
        assert_eq!(config.query.batch_size, 2000);
        assert!(config.output.rotate_by_day);
        assert_eq!(config.retry.max_attempts, Some(5));
        assert_eq!(config.logging.level, LogLevel::Debug);
        config.validate().unwrap();
    }

    #[test]
    fn test_rotate_by_day_can_be_disabled() {
        let file = config_file(
            r#"
            [output]
            path = "out/messages.csv"
            rotate_by_day = true
            "#,
        );
        let path = file.path().to_str().unwrap();

        let cli = CliInterface::from_args(parse(&["mongo-csv-export", "-c", path])).unwrap();
        assert!(cli.config().output.rotate_by_day);

        let args = parse(&["mongo-csv-export", "-c", path, "--rotate-by-day", "false"]);
        let cli = CliInterface::from_args(args).unwrap();
        assert!(!cli.config().output.rotate_by_day);

        let args = parse(&["mongo-csv-export", "--rotate-by-day"]);
        assert_eq!(args.rotate_by_day, Some(true));
    }

    #[test]
    fn test_named_config_must_exist() {
        let args = parse(&["mongo-csv-export", "-c", "/nonexistent/export.toml"]);
        assert!(CliInterface::from_args(args).is_err());
    }

    #[test]
    fn test_resume_after_parsing() {
        let file = config_file("");
        let path = file.path().to_str().unwrap();
        let cli = CliInterface::from_args(parse(&[
            "mongo-csv-export",
            "-c",
            path,
            "--resume-after",
            "300000",
        ]))
        .unwrap();
        assert_eq!(cli.resume_after(), Some(Bson::Int64(300_000)));

        let cli = CliInterface::from_args(parse(&["mongo-csv-export", "-c", path])).unwrap();
        assert_eq!(cli.resume_after(), None);
    }
}
