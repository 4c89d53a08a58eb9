//! Tidemark Migration CLI Tool
//!
//! Command-line interface for applying and reverting the platform's schema
//! migrations. Suitable for CI/CD pipelines: exit code 0 on success, 2 when another
//! process holds the migration lock, 1 on any other failure.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::process;
use std::sync::Arc;
use tidemark::migration::{MigrationContext, Migrator};
use tidemark::{connect, TidemarkConfig};
use tidemark_migrate::{commands, exit_code, migrations};

#[derive(Parser)]
#[command(name = "tidemark-migrate")]
#[command(about = "Migration management tool for Tidemark")]
#[command(version = "0.1.0")]
struct Cli {
    /// Database connection URL
    #[arg(long)]
    database_url: Option<String>,

    /// Database name
    #[arg(long)]
    database: Option<String>,

    /// Configuration file (default: config/config.toml)
    #[arg(long)]
    config: Option<String>,

    /// Deadline for the whole run, in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Quiet output (errors only)
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show migration status (applied vs pending)
    Status,

    /// Apply all pending migrations
    Up {
        /// Dry run - show what would be executed without running
        #[arg(long)]
        dry_run: bool,
    },

    /// Revert the most recently applied migration
    Down {
        /// Dry run - show what would be reverted
        #[arg(long)]
        dry_run: bool,
    },

    /// Validate applied history against the registered migrations
    Validate,

    /// List applied migrations
    History,

    /// Print the current version
    Version,

    /// Show detailed migration information
    Info {
        /// Show information for a specific migration version
        #[arg(long)]
        version: Option<i64>,
    },
}

fn main() {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let level = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let quiet = cli.quiet;
    match run(cli) {
        Ok(()) => {
            if !quiet {
                println!("✅ Success");
            }
            process::exit(0);
        }
        Err(e) => {
            eprintln!("❌ Error: {:#}", e);
            process::exit(exit_code(&e));
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = match cli.config.as_deref() {
        Some(path) => TidemarkConfig::load_from(path),
        None => TidemarkConfig::load(),
    }
    .context("Failed to load configuration")?;

    if let Some(url) = cli.database_url {
        config.database.url = url;
    }
    if let Some(name) = cli.database {
        config.database.name = name;
    }
    if let Some(timeout) = cli.timeout {
        config.migration.timeout_seconds = timeout;
    }

    let registry = Arc::new(migrations::registry().context("Invalid migration registry")?);

    let database = connect(&config.database.url, &config.database.name)
        .with_context(|| format!("Error connecting to database '{}'", config.database.name))?;
    let migrator = Migrator::for_mongo(registry, &database, &config.migration);

    let ctx = MigrationContext::with_timeout(config.migration.timeout());

    match cli.command {
        Commands::Status => commands::status(&migrator)?,
        Commands::Up { dry_run } => {
            commands::up(&migrator, &ctx, dry_run)?;
        }
        Commands::Down { dry_run } => {
            commands::down(&migrator, &ctx, dry_run)?;
        }
        Commands::Validate => commands::validate(&migrator)?,
        Commands::History => commands::history(&migrator)?,
        Commands::Version => {
            commands::version(&migrator)?;
        }
        Commands::Info { version } => commands::info(&migrator, version)?,
    }
    Ok(())
}
