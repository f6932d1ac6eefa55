// src/main.rs
use anyhow::{Context, Result as AnyhowResult};
use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use axum_server::tls_rustls::RustlsConfig;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use serde_json::json;
use std::{net::SocketAddr, sync::Arc};
use thiserror::Error;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod allocation;
mod allocation_timer;
mod assignment_api;
mod assignment_api_tests;
mod assignment_writer;
mod clock;
mod config;
mod daily_run;
mod daily_run_tests;
mod eligibility;
mod lifecycle;
mod memory_store;
mod models;
mod pg_store;
mod scheduler_error;
mod store;

use allocation::RandomSource;
use assignment_api::{router, AppState};
use clock::{Clock, SystemClock};
use config::Config;
use eligibility::resolve_eligible;
use memory_store::InMemoryStore;
use pg_store::PgStore;
use scheduler_error::SchedulerError;
use store::{SchedulerStore, StoreError};

// --- Error Handling ---

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error("Bad request: {0}")]
    BadRequest(String),
    /// An extractor refused the request before it reached a handler.
    #[error("Malformed request: {1}")]
    Rejected(StatusCode, String),
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Rejected(rejection.status(), rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::Rejected(rejection.status(), rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::Rejected(rejection.status(), rejection.body_text())
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError::Scheduler(SchedulerError::Storage(err))
    }
}

// Map AppError to Axum's IntoResponse
impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status_code, error_message) = match &self {
            AppError::BadRequest(message) => (StatusCode::BAD_REQUEST, message.clone()),
            AppError::Rejected(status, message) => (*status, message.clone()),
            AppError::Scheduler(SchedulerError::Validation(message)) => {
                (StatusCode::BAD_REQUEST, message.clone())
            }
            AppError::Scheduler(SchedulerError::NotFound(what)) => {
                (StatusCode::NOT_FOUND, format!("{} not found", what))
            }
            AppError::Scheduler(SchedulerError::Conflict(message)) => {
                (StatusCode::CONFLICT, message.clone())
            }
            AppError::Scheduler(SchedulerError::Storage(StoreError::Unavailable(_))) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Storage is unavailable. Try again later.".to_string(),
            ),
            AppError::Scheduler(SchedulerError::Storage(_)) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error (storage). Check logs.".to_string(),
            ),
        };

        if status_code.is_server_error() {
            error!("Error occurred: {}", self); // Log the original error
        } else {
            warn!("Request rejected: {}", self);
        }

        (status_code, Json(json!({ "error": error_message }))).into_response()
    }
}

// --- Command Line ---

#[derive(Parser, Debug)]
#[command(name = "roster", about = "Daily test assignment scheduler")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP API (default)
    Serve,
    /// Run the daily assignment once and print the report
    Run {
        /// Date to allocate for, YYYY-MM-DD (defaults to today)
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Print the employees eligible on a date
    Eligible {
        #[arg(long)]
        date: Option<NaiveDate>,
    },
}

async fn open_store(config: &Config) -> AnyhowResult<Arc<dyn SchedulerStore>> {
    if let Some(url) = config.database_url() {
        let store = PgStore::connect(url, config.db_max_connections)
            .await
            .context("Failed to connect to database")?;
        store
            .run_migrations()
            .await
            .context("Failed to run database migrations")?;
        return Ok(Arc::new(store));
    }

    match &config.seed_file {
        Some(path) => {
            info!("No DATABASE_URL configured, using in-memory store seeded from {}", path.display());
            Ok(Arc::new(InMemoryStore::from_seed_file(path)?))
        }
        None => {
            warn!("No DATABASE_URL or SEED_FILE configured, starting with an empty in-memory store");
            Ok(Arc::new(InMemoryStore::new()))
        }
    }
}

async fn serve(config: &Config, state: AppState) -> AnyhowResult<()> {
    if let Some(hour) = config.daily_run_hour {
        tokio::spawn(allocation_timer::run_daily_allocation(state.runner.clone(), hour));
    } else {
        info!("DAILY_RUN_HOUR not set, daily runs must be triggered externally");
    }

    let app = router(state);
    let addr: SocketAddr = config
        .bind_address()
        .parse()
        .with_context(|| format!("Invalid bind address {}", config.bind_address()))?;

    match config.tls_paths() {
        Some((cert_path, key_path)) => {
            let tls_config = RustlsConfig::from_pem_file(&cert_path, &key_path)
                .await
                .with_context(|| {
                    format!(
                        "Failed to load TLS cert/key from {} and {}",
                        cert_path.display(),
                        key_path.display()
                    )
                })?;
            info!("Listening on https://{}", addr);
            axum_server::bind_rustls(addr, tls_config)
                .serve(app.into_make_service())
                .await
                .context("Server error")?;
        }
        None => {
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .with_context(|| format!("Failed to bind {}", addr))?;
            info!("Listening on http://{}", addr);
            axum::serve(listener, app).await.context("Server error")?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> AnyhowResult<()> {
    let cli = Cli::parse();
    let config = Config::from_env().context("Failed to load configuration from environment")?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting roster in {} mode", config.environment);

    let store = open_store(&config).await?;
    let rng = Arc::new(RandomSource::from_seed_option(config.allocation_seed));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let state = AppState::new(store, rng, clock, config.today_only_edits);

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(&config, state).await,
        Command::Run { date } => {
            let date = date.unwrap_or_else(|| state.runner.today());
            let report = state.runner.run(date).await;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.success {
                anyhow::bail!("Daily run for {} failed: {}", date, report.message);
            }
            Ok(())
        }
        Command::Eligible { date } => {
            let date = date.unwrap_or_else(|| state.clock.today());
            let mut employees = resolve_eligible(state.store.as_ref(), date)
                .await
                .with_context(|| format!("Failed to resolve eligible employees for {}", date))?;
            employees.sort_by(|a, b| a.name.cmp(&b.name));
            info!("{} employees eligible on {}", employees.len(), date);
            println!("{}", serde_json::to_string_pretty(&employees)?);
            Ok(())
        }
    }
}
