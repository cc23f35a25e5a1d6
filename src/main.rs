use std::path::Path;

use clap::Parser;
use meetkeeper::{
    App,
    config::AppConfig,
    db::DbPool,
    observability::{self, metrics},
};

const DEFAULT_CONFIG_PATH: &str = "meetkeeper.toml";

/// CLI arguments for meetkeeper
#[derive(Parser, Debug)]
#[command(version, about = "Meeting lifecycle and retention service", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to config file (defaults to ./meetkeeper.toml if it exists,
    /// otherwise built-in defaults)
    #[arg(short, long, global = true)]
    config: Option<String>,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Run the job dispatcher and the scheduled retention cleanup (default)
    Serve,
    /// Run one retention cleanup pass now and print the result as JSON
    Cleanup {
        /// Report what would be purged without deleting anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Run database migrations and exit
    Migrate,
    /// Load and validate the configuration, then exit
    CheckConfig,
    /// Show enabled compile-time features
    Features,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    match args.command {
        Some(Command::Features) => run_features(),
        Some(Command::CheckConfig) => {
            load_config(args.config.as_deref());
            println!("Configuration OK");
        }
        Some(Command::Migrate) => run_migrate(args.config.as_deref()).await,
        Some(Command::Cleanup { dry_run }) => run_cleanup(args.config.as_deref(), dry_run).await,
        Some(Command::Serve) | None => run_server(args.config.as_deref()).await,
    }
}

/// Load configuration or exit with a readable error.
fn load_config(path: Option<&str>) -> AppConfig {
    let result = match path {
        Some(path) => AppConfig::from_file(path),
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => AppConfig::from_file(DEFAULT_CONFIG_PATH),
        None => Ok(AppConfig::default()),
    };

    match result {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            std::process::exit(1);
        }
    }
}

fn init_observability(config: &AppConfig) {
    if let Err(e) = observability::init_tracing(&config.observability.logging) {
        eprintln!("Failed to initialize tracing: {e}");
        std::process::exit(1);
    }
    if let Err(e) = metrics::init_metrics(&config.observability.metrics) {
        tracing::error!(error = %e, "Failed to initialize metrics");
        std::process::exit(1);
    }
}

async fn build_app(config: AppConfig) -> App {
    match App::build(config).await {
        Ok(app) => app,
        Err(e) => {
            tracing::error!(error = %e, "Failed to start");
            std::process::exit(1);
        }
    }
}

async fn run_server(config_path: Option<&str>) {
    let config = load_config(config_path);
    init_observability(&config);

    let app = build_app(config).await;
    if let Err(e) = app.start_background().await {
        tracing::error!(error = %e, "Failed to schedule background jobs");
        app.shutdown().await;
        std::process::exit(1);
    }

    tracing::info!(
        database = %app.config.database.path,
        storage = app.store.backend_name(),
        bucket = %app.config.storage.bucket,
        "meetkeeper running"
    );

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, waiting for background tasks to complete...");
    app.shutdown().await;
}

async fn run_cleanup(config_path: Option<&str>, dry_run: bool) {
    let mut config = load_config(config_path);
    if dry_run {
        config.retention.safety.dry_run = true;
    }
    init_observability(&config);

    let app = build_app(config).await;
    let result = app.retention.run().await;
    app.shutdown().await;

    match result {
        Ok(result) => match serde_json::to_string_pretty(&result) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("Failed to serialize result: {e}");
                std::process::exit(1);
            }
        },
        Err(e) => {
            tracing::error!(error = %e, "Retention cleanup failed");
            std::process::exit(1);
        }
    }
}

async fn run_migrate(config_path: Option<&str>) {
    let config = load_config(config_path);
    init_observability(&config);

    let db = match DbPool::from_config(&config.database).await {
        Ok(db) => db,
        Err(e) => {
            tracing::error!(error = %e, "Failed to open database");
            std::process::exit(1);
        }
    };

    if let Err(e) = db.run_migrations().await {
        tracing::error!(error = %e, "Migration failed");
        std::process::exit(1);
    }
    db.close().await;
}

fn run_features() {
    let features = [
        ("s3-storage", cfg!(feature = "s3-storage")),
        ("prometheus", cfg!(feature = "prometheus")),
    ];
    for (name, enabled) in features {
        let marker = if enabled { "+" } else { "-" };
        println!("{marker} {name}");
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
