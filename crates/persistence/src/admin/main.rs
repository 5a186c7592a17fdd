//! Helios JDBC persistence administration.
//!
//! Creates the schema and reports on the state of a database.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use helios_persistence_jdbc::{JdbcPersistence, PersistenceConfig};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "helios-jdbc-admin")]
#[command(about = "Administer a Helios normalized FHIR persistence database")]
struct Cli {
    /// SQLite database file, or `:memory:`.
    #[arg(long, env = "HELIOS_JDBC_DATABASE", default_value = "fhir.db")]
    database: String,

    /// JSON file with persistence settings. `--database` overrides its path.
    #[arg(long, env = "HELIOS_JDBC_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long, env = "HELIOS_JDBC_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create the schema if it does not exist.
    Init,
    /// Dump the dictionary caches and compare them with the database.
    Diagnostics,
    /// Count stored resources and versions per type.
    Stats,
}

fn init_logging(level: &str) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("helios_persistence_jdbc={},helios_jdbc_admin={}", level, level)));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}

fn load_config(cli: &Cli) -> anyhow::Result<PersistenceConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            PersistenceConfig::from_json(&json)
                .with_context(|| format!("parsing {}", path.display()))?
        }
        None => PersistenceConfig::default(),
    };
    config.sqlite.path = cli.database.clone();
    Ok(config)
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let config = load_config(&cli)?;
    if let Err(errors) = config.validate() {
        for error in &errors {
            eprintln!("Configuration error: {}", error);
        }
        std::process::exit(1);
    }

    // opening creates the schema when it is missing
    let persistence = JdbcPersistence::open(config).context("opening database")?;

    match cli.command {
        Command::Init => {
            info!(database = %cli.database, "schema ready");
        }
        Command::Diagnostics => {
            print!("{}", persistence.cache_diagnostics()?);
        }
        Command::Stats => {
            println!("{:<24} {:>12} {:>12}", "resource type", "resources", "versions");
            for (resource_type, resources, versions) in persistence.resource_counts()? {
                println!("{:<24} {:>12} {:>12}", resource_type, resources, versions);
            }
        }
    }

    Ok(())
}
