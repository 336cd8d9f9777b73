//! Feedlink Relay
//!
//! Backend daemon that subscribes to every appliance's event topic, enriches
//! events, and persists them to SQLite with age-based retention.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::info;

use feedlink_core::BusConfig;
use feedlink_core::tracing_init::init_tracing;

use feedlink_relay::ingest::BusRelay;
use feedlink_relay::retention::spawn_retention_task;
use feedlink_relay::storage::RelayDatabase;

#[derive(Parser, Debug)]
#[command(name = "feedlink-relay")]
#[command(version, about = "Feedlink backend relay - bus ingestion and event store")]
struct Args {
    /// Bus broker hostname.
    #[arg(long, default_value = "localhost")]
    broker_host: String,

    /// Bus broker port.
    #[arg(long, default_value_t = 1883)]
    broker_port: u16,

    /// Bus username.
    #[arg(long, env = "FEEDLINK_BUS_USERNAME")]
    username: Option<String>,

    /// Bus password.
    #[arg(long, env = "FEEDLINK_BUS_PASSWORD")]
    password: Option<String>,

    /// Topic namespace device topics live under.
    #[arg(long, default_value = "petfeeder")]
    namespace: String,

    /// Path to SQLite database file.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Delete events older than this many days.
    #[arg(long, default_value_t = 90)]
    retention_days: u32,

    /// Seconds between retention pruning runs.
    #[arg(long, default_value_t = 3600)]
    prune_interval: u64,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_tracing("feedlink_relay=info", args.log_json);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        broker = %args.broker_host,
        namespace = %args.namespace,
        "Starting feedlink-relay"
    );

    let db = match &args.db_path {
        Some(path) => {
            info!(path = %path.display(), "Opening relay database");
            RelayDatabase::open(path).await?
        }
        None => {
            let default_path = default_db_path()?;
            info!(path = %default_path.display(), "Opening relay database (default path)");
            RelayDatabase::open(&default_path).await?
        }
    };

    let retention = spawn_retention_task(
        db.clone(),
        args.retention_days,
        Duration::from_secs(args.prune_interval),
    );

    let mut config = BusConfig {
        broker_host: args.broker_host,
        broker_port: args.broker_port,
        namespace: args.namespace.clone(),
        ..BusConfig::default()
    };
    if let (Some(user), Some(pass)) = (args.username, args.password) {
        config = config.with_credentials(user, pass);
    }

    let relay = BusRelay::new(db, args.namespace);

    tokio::select! {
        () = relay.run(&config) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    retention.abort();
    info!("Relay stopped");
    Ok(())
}

fn default_db_path() -> anyhow::Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Cannot determine home directory"))?;
    Ok(home.join(".feedlink").join("relay.db"))
}
