//! mongo-csv-export
//!
//! Streams a date range of a MongoDB collection into rotating CSV files,
//! reconnecting and resuming after the last written row on store faults.
//!
//! # Usage
//!
//! ```bash
//! mongo-csv-export -c export.toml
//! mongo-csv-export -c export.toml --start 2025-07-01 --end 2025-07-02 --rotate-by-day
//! mongo-csv-export -c export.toml --resume-after 64a1f0c2e4b0a1b2c3d4e5f6
//! ```

use tokio_util::sync::CancellationToken;
use tracing::level_filters::LevelFilter;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use mongo_csv_export::cli::CliInterface;
use mongo_csv_export::error::Result;
use mongo_csv_export::export::{ExportSummary, ExportSupervisor, MongoStore};
use mongo_csv_export::utils;

/// Application entry point
#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Main application logic
///
/// 1. Parse arguments and load configuration
/// 2. Initialize logging
/// 3. Handle subcommands, or validate and run the export
async fn run() -> Result<()> {
    let cli = CliInterface::new()?;
    initialize_logging(&cli);

    if cli.handle_subcommand()? {
        return Ok(());
    }

    let config = cli.config();
    config.validate()?;
    info!(
        "Exporting {}.{} from {} ({} .. {})",
        config.connection.database,
        config.connection.collection,
        utils::uri::sanitize(&config.connection.uri),
        config.query.start,
        config.query.end
    );

    let token = CancellationToken::new();
    spawn_shutdown_listener(token.clone());

    let store = MongoStore::new(config.connection.clone());
    let summary = ExportSupervisor::from_config(config, Box::new(store))?
        .with_cancellation(token)
        .with_resume_after(cli.resume_after())
        .run()
        .await?;

    print_summary(&summary);
    Ok(())
}

/// Cancel `token` on Ctrl+C or SIGTERM
fn spawn_shutdown_listener(token: CancellationToken) {
    tokio::spawn(async move {
        shutdown_signal().await;
        warn!("Shutdown requested; closing the open partition");
        token.cancel();
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!("Failed to listen for SIGTERM: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

fn print_summary(summary: &ExportSummary) {
    let status = if summary.cancelled {
        "Export cancelled"
    } else {
        "Export completed"
    };
    println!(
        "{}: {} rows in {} files ({} partitions), {} retries, {} ms",
        status,
        summary.rows_written,
        summary.files.len(),
        summary.partitions,
        summary.retries,
        summary.elapsed_ms
    );
    for file in &summary.files {
        println!("  {} ({} rows)", file.path.display(), file.rows);
    }
    if let Some(position) = &summary.last_position {
        println!("Last written position: {}", position);
    }
}

/// Initialize logging on stderr; `RUST_LOG` overrides the configured level
fn initialize_logging(cli: &CliInterface) {
    let logging = &cli.config().logging;
    let level = LevelFilter::from_level(logging.level.to_tracing_level());
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if logging.timestamps {
        subscriber.init();
    } else {
        subscriber.without_time().init();
    }
}
