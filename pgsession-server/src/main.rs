//! pgsession - run the backend or inspect its configuration
//!
//! Settings come from the environment (and `./.env` when present):
//!   POSTGRES_HOST, POSTGRES_PORT, POSTGRES_USER, POSTGRES_PASSWORD, POSTGRES_DB
//!   POSTGRES_DB_TEST, DEBUG, LOG_LEVEL, LOGGER_NAME, API_V0_STR

use std::net::SocketAddr;
use std::path::Path;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pgsession_core::{load_dotenv, logging, Driver, LoggingConfig, Settings};
use serde_json::json;

#[derive(Parser, Debug)]
#[command(
    name = "pgsession",
    author,
    version,
    about = "Web backend with request-scoped Postgres sessions"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the HTTP server
    Serve(ServeArgs),
    /// Print the loaded settings, connection URLs and logging table (passwords masked)
    Config,
}

#[derive(Parser, Debug)]
struct ServeArgs {
    /// Address to bind to
    #[arg(long, short = 'b', default_value = "127.0.0.1:8000")]
    bind: SocketAddr,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let dotenv = load_dotenv().context("Failed to load .env")?;
    let settings = Settings::from_env().context("Invalid settings")?;

    match cli.command {
        Commands::Serve(args) => {
            logging::init(&settings).context("Failed to initialize logging")?;
            log_startup(dotenv.as_deref(), &settings);
            tracing::info!("Starting server on {}", args.bind);
            pgsession_server::serve(settings, args.bind)
                .await
                .context("Server error")?;
        }
        Commands::Config => print_config(&settings)?,
    }

    Ok(())
}

/// Settings are loaded before the subscriber exists, so report them here.
fn log_startup(dotenv: Option<&Path>, settings: &Settings) {
    match dotenv {
        Some(path) => tracing::debug!("Loaded .env from {}", path.display()),
        None => tracing::debug!("No .env file found, using environment variables only"),
    }
    tracing::debug!(?settings, "settings loaded");
}

fn print_config(settings: &Settings) -> Result<()> {
    let logging = LoggingConfig::from_settings(settings).context("Invalid LOG_LEVEL")?;

    let report = json!({
        "settings": {
            "debug": settings.debug,
            "api_v0_str": settings.api_v0_str,
            "log_level": settings.log_level,
            "logger_name": settings.logger_name,
            "pg_host": settings.pg_host,
            "pg_port": settings.pg_port,
            "pg_user": settings.pg_user,
            "pg_db": settings.pg_db,
            "pg_db_test": settings.pg_db_test,
        },
        "urls": {
            "db_url": settings.redacted_url(Driver::Plain, &settings.pg_db),
            "db_url_async": settings.redacted_url(Driver::Async, &settings.pg_db),
            "test_db_url": settings.redacted_url(Driver::Async, &settings.pg_db_test),
            "db_url_migrations": settings.redacted_url(Driver::Migration, &settings.pg_db),
        },
        "logging": logging,
    });

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
