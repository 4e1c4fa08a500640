use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};

use lembra_channels::{EmailDispatcher, SmsDispatcher};
use lembra_outbox::{Dispatcher, OutboxStore, ProcessOptions};
use lembra_scheduler::{ReminderEngine, ReminderStore, SqliteAppointmentStore};

/// Appointment reminder daemon for Saraiva Vision.
#[derive(Parser)]
#[command(name = "lembra-daemon", version)]
struct Args {
    /// Config file path (default: ~/.lembra/lembra.toml).
    #[arg(long)]
    config: Option<String>,

    /// Run a single tick and exit (for cron-style operation).
    #[arg(long)]
    once: bool,

    /// Print outbox statistics as JSON and exit.
    #[arg(long)]
    stats: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lembra=info".into()),
        )
        .init();

    // load config: explicit path > LEMBRA_CONFIG env > ~/.lembra/lembra.toml
    let config_path = args
        .config
        .or_else(|| std::env::var("LEMBRA_CONFIG").ok());
    let config = lembra_core::config::LembraConfig::load(config_path.as_deref())
        .unwrap_or_else(|e| {
            warn!("Config load failed ({}), using defaults", e);
            lembra_core::config::LembraConfig::default()
        });

    let db_path = &config.database.path;
    ensure_parent_dir(db_path);
    info!(path = %db_path, "opening SQLite database");

    let db = rusqlite::Connection::open(db_path)?;
    db.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;

    // run all schema migrations (idempotent)
    lembra_outbox::db::init_db(&db)?;
    lembra_scheduler::db::init_db(&db)?;
    info!("database migrations complete");

    // each store gets its own connection for thread safety
    let outbox = OutboxStore::new(rusqlite::Connection::open(db_path)?)?;

    if args.stats {
        let stats = outbox.stats()?;
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    let appointments = SqliteAppointmentStore::new(rusqlite::Connection::open(db_path)?)?;
    let reminders = ReminderStore::new(rusqlite::Connection::open(db_path)?)?;

    let mut dispatchers: Vec<Box<dyn Dispatcher>> = Vec::new();
    if let Some(email) = config.channels.email.clone() {
        info!(from = %email.from, "email channel configured (Resend)");
        dispatchers.push(Box::new(EmailDispatcher::new(email)));
    }
    if let Some(sms) = config.channels.sms.clone() {
        info!(from = %sms.from, "SMS channel configured (Zenvia)");
        dispatchers.push(Box::new(SmsDispatcher::new(sms)));
    }
    if dispatchers.is_empty() {
        warn!("no delivery channels configured — messages will queue but never send");
    }

    let process = ProcessOptions {
        max_attempts: config.outbox.max_attempts,
        dispatch_timeout: Duration::from_secs(config.outbox.dispatch_timeout_secs),
        batch_size: config.outbox.batch_size,
    };
    let engine = ReminderEngine::new(
        Box::new(appointments),
        reminders,
        outbox,
        dispatchers,
        config.clinic.clone(),
        config.scheduler.clone(),
        process,
    );

    if args.once {
        let report = engine.tick(chrono::Utc::now()).await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let engine_task = tokio::spawn(async move { engine.run(shutdown_rx).await });

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);
    engine_task.await??;
    Ok(())
}

/// Ensure the parent directory for a file path exists.
fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
