use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use decision_ledger::anchor::{verify_anchor, AnchorStore};
use decision_ledger::config::AppConfig;
use decision_ledger::database::Database;
use decision_ledger::ledger::{self, EventStore, LockFile};
use decision_ledger::publish::Publisher;
use decision_ledger::server::{self, AppState};
use decision_ledger::transmit;

const EXIT_MISSING_DATABASE: u8 = 2;

#[derive(Parser)]
#[command(name = "decision-ledger", version)]
#[command(about = "Tamper-evident decision ledger with anchored daily snapshots")]
struct Cli {
    /// Configuration file (default: ledger.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database file, overrides database_url
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Current-state anchor file
    #[arg(long, global = true)]
    anchor_file: Option<PathBuf>,

    /// Append-only anchor history file
    #[arg(long, global = true)]
    anchor_history: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Log errors only
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema
    Init {
        /// Publish an `init` anchor right away
        #[arg(long)]
        publish_now: bool,
    },
    /// Append one event
    Append {
        event_type: String,
        entity_type: String,
        entity_id: String,

        /// Event payload as JSON
        #[arg(long, default_value = "{}")]
        payload: String,
    },
    /// Verify the hash chain
    VerifyChain {
        /// Resume from the last verified checkpoint
        #[arg(long)]
        incremental: bool,
    },
    /// Verify the chain and compare its tip with the anchor file
    VerifyAnchor,
    /// Verify, anchor and transmit the current tip
    DailyPublish {
        #[arg(long)]
        label: Option<String>,
    },
    /// Send the current anchor again
    Retransmit,
    /// Print the anchor history
    History,
    /// Print the newest events as JSON lines
    Recent {
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    /// Run the status service and the scheduled publisher
    Serve,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool, quiet: bool) {
    let default_filter = if quiet {
        "decision_ledger=error"
    } else if verbose {
        "decision_ledger=debug,tower_http=debug"
    } else {
        "decision_ledger=info"
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_config(cli: &Cli) -> Result<AppConfig> {
    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(db) = &cli.db {
        config.database_url = format!("sqlite://{}", db.display());
    }
    if let Some(path) = &cli.anchor_file {
        config.anchor_file = path.clone();
    }
    if let Some(path) = &cli.anchor_history {
        config.anchor_history = path.clone();
    }
    config.validate()?;
    Ok(config)
}

async fn open_store(config: &AppConfig, create: bool) -> Result<EventStore> {
    let database = if create {
        let database = Database::new(&config.database_url).await?;
        database.run_migrations().await?;
        database
    } else {
        Database::open_existing(&config.database_url).await?
    };
    Ok(EventStore::new(
        database,
        Arc::new(LockFile::new(config.lock_file.clone())),
    ))
}

/// Anchors are written locally even when the channel is misconfigured; only
/// the send step then fails.
fn publisher(config: &AppConfig, store: EventStore, anchors: AnchorStore) -> Publisher {
    let transmitter = transmit::from_config_or_unavailable(config);
    Publisher::new(store, anchors, transmitter).with_timeout(config.transmit_timeout())
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = load_config(&cli)?;
    let anchors = AnchorStore::new(config.anchor_file.clone(), config.anchor_history.clone());

    let is_init = matches!(cli.command, Commands::Init { .. });
    if !is_init {
        if let Some(path) = config.database_path() {
            if !path.exists() {
                eprintln!(
                    "error: database {} not found; run `decision-ledger init` first",
                    path.display()
                );
                return Ok(ExitCode::from(EXIT_MISSING_DATABASE));
            }
        }
    }

    let store = open_store(&config, is_init).await?;

    match cli.command {
        Commands::Init { publish_now } => {
            info!("Ledger initialized at {}", config.database_url);
            println!("Initialized {}", config.database_url);
            if publish_now {
                let report = publisher(&config, store, anchors).publish("init").await?;
                println!("Published {} via {}", report.tip_hash, report.channel);
            }
        }
        Commands::Append {
            event_type,
            entity_type,
            entity_id,
            payload,
        } => {
            let payload: Value =
                serde_json::from_str(&payload).context("--payload is not valid JSON")?;
            ledger::verify_incremental(&store).await?;
            let hash = store
                .append(&event_type, &entity_type, &entity_id, &payload)
                .await?;
            println!("{}", hash);
        }
        Commands::VerifyChain { incremental } => {
            let result = if incremental {
                ledger::verify_incremental(&store).await.map(|o| {
                    println!(
                        "OK {} ({} events, {} checked)",
                        o.tip_hash, o.chain_length, o.events_checked
                    )
                })
            } else {
                ledger::verify(&store).await.map(|tip| println!("OK {}", tip))
            };

            if let Err(e) = result {
                if e.is_chain_fault() {
                    let report = ledger::inspect(&store).await?;
                    eprintln!("{}\n{}", report.summary(), report.detailed_status());
                }
                return Err(e.into());
            }
        }
        Commands::VerifyAnchor => {
            let tip = verify_anchor(&store, &anchors).await?;
            println!("OK anchor matches {}", tip);
        }
        Commands::DailyPublish { label } => {
            let label = label.unwrap_or_else(|| config.publish.label.clone());
            let report = publisher(&config, store, anchors).publish(&label).await?;
            println!("{}\n{}", report.note, report.tip_hash);
        }
        Commands::Retransmit => {
            let report = publisher(&config, store, anchors).retransmit().await?;
            println!("Retransmitted {} via {}", report.tip_hash, report.channel);
        }
        Commands::History => {
            for entry in anchors.read_history()? {
                println!("{}", entry.to_line());
            }
        }
        Commands::Recent { limit } => {
            for event in store.list_recent(limit).await? {
                println!("{}", serde_json::to_string(&event)?);
            }
        }
        Commands::Serve => {
            let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
                .parse()
                .map_err(|e| anyhow!("Invalid server address: {}", e))?;

            match transmit::from_config(&config) {
                Ok(transmitter) => {
                    let publisher = Publisher::new(store.clone(), anchors.clone(), transmitter)
                        .with_timeout(config.transmit_timeout());
                    server::spawn_publish_task(
                        Arc::new(publisher),
                        config.publish.label.clone(),
                        Duration::from_secs(config.publish.interval_secs),
                    );
                    info!(
                        "Scheduled publish every {}s",
                        config.publish.interval_secs
                    );
                }
                Err(e) => warn!("Scheduled publish disabled: {:#}", e),
            }

            server::serve(AppState { store, anchors }, addr).await?;
        }
    }

    Ok(ExitCode::SUCCESS)
}
