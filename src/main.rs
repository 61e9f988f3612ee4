//! StyleBroker CLI - cache-keyed product analysis with cost accounting

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use style_broker::{
    AnalysisBroker, AnalysisStore, AnalyzeOptions, BrokerConfig, CostLedger, Database,
    ProductDetails, ProfileStore, StyleProfile, BASIC_VERSION,
};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "style-broker")]
#[command(about = "Analyze products with cached, cost-accounted AI calls")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbosity level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Config file path (default: ~/.config/style-broker/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Database file path (overrides config)
    #[arg(long)]
    db: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a product, reusing a cached result when possible
    Analyze {
        /// Product JSON file (id, title, price, ...)
        #[arg(short, long)]
        product: PathBuf,

        /// Profile JSON file; defaults to the saved profile, if any
        #[arg(long)]
        profile: Option<PathBuf>,

        /// Force basic mode, ignoring any saved profile
        #[arg(long)]
        basic: bool,

        /// Skip the cache and always call the provider
        #[arg(long)]
        force: bool,

        /// Session id to log the cost under
        #[arg(short, long)]
        session: Option<String>,
    },

    /// Show session or all-time cost aggregates
    Costs {
        /// Session id; omit for all-time totals
        #[arg(short, long)]
        session: Option<String>,
    },

    /// Save a new profile revision
    SetProfile {
        /// Profile JSON file
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Show the current profile and its version token
    ShowProfile,

    /// Remove cached full-mode analyses that no longer match the current profile
    InvalidateStale,

    /// Verify provider credentials and connectivity
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = cli.log_level.parse::<Level>().unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = match &cli.config {
        Some(path) => BrokerConfig::load_from(path.clone())?,
        None => BrokerConfig::load()?,
    };
    if let Some(db) = &cli.db {
        config.store.database_path = db.clone();
    }

    match cli.command {
        Commands::Analyze {
            product,
            profile,
            basic,
            force,
            session,
        } => {
            config.validate()?;
            let broker = AnalysisBroker::from_config(&config)?;

            let product: ProductDetails = read_json(&product)?;
            let profile = resolve_profile(&broker, profile.as_deref(), basic)?;

            let outcome = broker
                .analyze(
                    &product,
                    profile.as_ref(),
                    AnalyzeOptions {
                        force_refresh: force,
                        session_id: session,
                    },
                )
                .await?;

            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }

        // The remaining commands only touch the local database, so they
        // open the stores directly and never construct a provider.
        Commands::Costs { session } => {
            let ledger = CostLedger::new(open_db(&config)?);
            match session {
                Some(id) => {
                    println!("{}", serde_json::to_string_pretty(&ledger.session_totals(&id)?)?)
                }
                None => {
                    println!("{}", serde_json::to_string_pretty(&ledger.all_time_totals()?)?)
                }
            }
        }

        Commands::SetProfile { file } => {
            let profiles = ProfileStore::new(open_db(&config)?);
            let snapshot = profiles.save(&read_profile(&file)?)?;
            println!("saved profile version {}", snapshot.version);
        }

        Commands::ShowProfile => {
            let profiles = ProfileStore::new(open_db(&config)?);
            match profiles.current()? {
                Some(snapshot) => {
                    println!("version: {}", snapshot.version);
                    println!("{}", serde_json::to_string_pretty(&snapshot.profile)?);
                }
                None => println!("no profile saved"),
            }
        }

        Commands::InvalidateStale => {
            let db = open_db(&config)?;
            let current_version = ProfileStore::new(db.clone())
                .current()?
                .map(|snapshot| snapshot.version)
                .unwrap_or_else(|| BASIC_VERSION.to_string());

            let removed = AnalysisStore::new(db).invalidate_stale(&current_version)?;
            println!("removed {removed} stale analyses");
        }

        Commands::Check => {
            config.validate()?;
            let broker = AnalysisBroker::from_config(&config)?;
            if broker.verify_connection().await {
                println!("connection ok");
            } else {
                anyhow::bail!("provider connection failed");
            }
        }
    }

    Ok(())
}

fn open_db(config: &BrokerConfig) -> Result<Database> {
    Ok(Database::open(&config.store.database_path)?)
}

/// Pick the profile for an analyze call: explicit file first, then the
/// saved profile, unless basic mode was forced.
fn resolve_profile(
    broker: &AnalysisBroker,
    file: Option<&std::path::Path>,
    basic: bool,
) -> Result<Option<StyleProfile>> {
    if basic {
        return Ok(None);
    }
    if let Some(path) = file {
        return Ok(Some(read_profile(path)?));
    }
    Ok(broker.current_profile()?.map(|snapshot| snapshot.profile))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &std::path::Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))
}

fn read_profile(path: &std::path::Path) -> Result<StyleProfile> {
    let value: serde_json::Value = read_json(path)?;
    StyleProfile::from_value(value)
        .with_context(|| format!("{} must contain a JSON object", path.display()))
}
