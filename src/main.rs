//! WolfLease - Lease-Based Leader Election
//!
//! Runs one election participant, or the HTTP lease server that
//! participants on different hosts share.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wolflease::api::LeaseServer;
use wolflease::config::{LoggingConfig, WolfLeaseConfig};
use wolflease::election::{LeaderCallbacks, LeaderElector};
use wolflease::error::{Error, Result};
use wolflease::store::LeaseTable;

/// WolfLease - Lease-Based Leader Election
#[derive(Parser)]
#[command(name = "wolflease")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "wolflease.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long)]
    log_level: Option<String>,

    /// Participant identity; overrides node.id
    #[arg(long, env = "WOLFLEASE_IDENTITY")]
    identity: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Join the leader election
    Run,

    /// Start the HTTP lease server
    Serve {
        /// SQLite database path (defaults to store.path)
        #[arg(long)]
        db: Option<PathBuf>,

        /// Address to listen on (defaults to api.bind_address)
        #[arg(short, long)]
        listen: Option<String>,
    },

    /// Show the current lease record
    Status,

    /// Initialize a new configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "wolflease.toml")]
        output: PathBuf,

        /// Node ID
        #[arg(long, default_value = "node-1")]
        node_id: String,
    },

    /// Validate configuration file
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = cli.log_level.as_deref();

    match cli.command {
        Commands::Run => {
            let config = load_config(&cli.config, cli.identity)?;
            init_logging(&config.logging, level);
            run_election(config).await
        }
        Commands::Serve { db, listen } => {
            // node.id is not needed to serve
            let identity = cli.identity.or(Some("lease-server".into()));
            let loaded = if cli.config.exists() {
                Some(load_config(&cli.config, identity)?)
            } else {
                None
            };
            let logging = loaded.as_ref().map(|c| c.logging.clone()).unwrap_or_default();
            init_logging(&logging, level);
            run_serve(loaded, db, listen).await
        }
        Commands::Status => {
            let config = load_config(&cli.config, cli.identity)?;
            init_logging(&config.logging, level);
            run_status(config).await
        }
        Commands::Init { output, node_id } => {
            init_logging(&LoggingConfig::default(), level);
            run_init(output, node_id)
        }
        Commands::Validate => {
            init_logging(&LoggingConfig::default(), level);
            run_validate(cli.config, cli.identity)
        }
    }
}

/// Initialize logging
fn init_logging(logging: &LoggingConfig, level_override: Option<&str>) {
    let level = level_override.unwrap_or(&logging.level);
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    let registry = tracing_subscriber::registry().with(env_filter);
    if logging.format == "compact" {
        registry.with(tracing_subscriber::fmt::layer().compact()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Load the config file; the identity falls back to `POD_NAME` when neither
/// `--identity` nor `WOLFLEASE_IDENTITY` is set
fn load_config(path: &std::path::Path, identity: Option<String>) -> Result<WolfLeaseConfig> {
    let identity = identity.or_else(|| std::env::var("POD_NAME").ok().filter(|v| !v.is_empty()));
    WolfLeaseConfig::load(path, identity.as_deref())
}

/// Join the election and lead until Ctrl-C
async fn run_election(config: WolfLeaseConfig) -> Result<()> {
    let identity = config.node.id.clone();
    let store = config.open_store()?;
    let election = config.election_config();
    let work_interval = election.retry_period;

    tracing::info!("Starting WolfLease participant");
    tracing::info!("Identity: {}", identity);
    tracing::info!("Lease: {} ({})", config.lease_key(), store.describe());

    let callbacks = {
        let started_id = identity.clone();
        let stopped_id = identity.clone();
        let observer_id = identity.clone();

        LeaderCallbacks::new(
            move |token| {
                tracing::info!("{} is now the leader", started_id);
                tokio::spawn(lead(started_id.clone(), token, work_interval));
            },
            move || {
                tracing::info!("{} is not the leader anymore", stopped_id);
            },
        )
        .on_new_leader(move |leader| {
            if leader != observer_id {
                tracing::info!("{} is the new leader", leader);
            }
        })
    };

    let handle = LeaderElector::new(election, store, callbacks)?.spawn();

    tokio::signal::ctrl_c().await?;
    tracing::info!("Received shutdown signal");

    handle.shutdown().await?;
    tracing::info!(identity = %identity, "WolfLease participant stopped");
    Ok(())
}

/// Sample leader payload: works until the leadership token is cancelled
async fn lead(identity: String, token: CancellationToken, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    let mut ticks: u64 = 0;
    loop {
        tokio::select! {
            _ = token.cancelled() => {
                tracing::debug!(identity = %identity, ticks, "Leader work stopped");
                return;
            }
            _ = ticker.tick() => {
                ticks += 1;
                tracing::debug!(identity = %identity, ticks, "Leader work tick");
            }
        }
    }
}

/// Run the HTTP lease server
async fn run_serve(
    config: Option<WolfLeaseConfig>,
    db: Option<PathBuf>,
    listen: Option<String>,
) -> Result<()> {
    let (store_config, mut api_config) = match config {
        Some(config) => (config.store, config.api),
        None => (Default::default(), Default::default()),
    };
    let path = db.unwrap_or(store_config.path);
    if let Some(address) = listen {
        api_config.bind_address = address;
    }

    tracing::info!("Starting WolfLease lease server");
    let table = Arc::new(LeaseTable::open(&path)?);
    let server = LeaseServer::new(api_config, table);

    tokio::select! {
        result = server.start() => {
            if let Err(e) = result {
                tracing::error!("Lease server error: {}", e);
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal");
        }
    }

    Ok(())
}

/// Print the current lease record
async fn run_status(config: WolfLeaseConfig) -> Result<()> {
    let store = config.open_store()?;

    match store.read().await {
        Ok(current) => {
            let status = serde_json::json!({
                "key": config.lease_key(),
                "record": current.record,
                "version": current.token,
            });
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }
        Err(e) => {
            eprintln!("Failed to read lease {}: {}", store.describe(), e);
            Err(Error::Store(e))
        }
    }
}

/// Initialize a configuration file
fn run_init(output: PathBuf, node_id: String) -> Result<()> {
    let config_content = format!(r#"# WolfLease Configuration
# Generated configuration file

[node]
# Unique per participant; overridden by --identity, WOLFLEASE_IDENTITY or POD_NAME
id = "{node_id}"

[election]
lease_duration_ms = 15000
renew_deadline_ms = 10000
retry_period_ms = 2000
renew_attempts = 2
# store_timeout_ms = 1000
jitter_factor = 0.0
release_on_cancel = true

[store]
# "sqlite" shares a database file on this host, "http" talks to `wolflease serve`
backend = "sqlite"
path = "/var/lib/wolflease/leases.db"
# url = "http://lease-server:8080"
namespace = "lease-namespace"
name = "lease-name"

[api]
bind_address = "0.0.0.0:8080"

[logging]
level = "info"
format = "pretty"
"#);

    std::fs::write(&output, config_content)?;
    println!("Configuration file created: {}", output.display());
    println!("\nEdit the file to configure the lease store and timings.");
    println!("Then start with: wolflease --config {} run", output.display());

    Ok(())
}

/// Validate configuration file
fn run_validate(config_path: PathBuf, identity: Option<String>) -> Result<()> {
    match load_config(&config_path, identity) {
        Ok(config) => {
            let election = config.election_config();
            let timing = election.timing();
            println!("✓ Configuration is valid");
            println!("  Identity:       {}", config.node.id);
            println!("  Lease:          {}", config.lease_key());
            println!("  Backend:        {:?}", config.store.backend);
            println!("  Lease Duration: {:?}", election.lease_duration);
            println!("  Renew Deadline: {:?}", election.renew_deadline);
            println!("  Renew Interval: {:?}", timing.renew_interval());
            println!("  Retry Period:   {:?}", election.retry_period);
            println!("  Store Timeout:  {:?}", election.store_timeout());
            println!("  Release:        {}", election.release_on_cancel);
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration error: {}", e);
            Err(e)
        }
    }
}
