mod config;
mod dump_state_cmd;
mod enqueue_cmd;
mod reset_sessions_cmd;
mod run_cmd;
#[cfg(test)]
mod test_util;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use config::FoundryConfig;
use foundry_db::pool;

#[derive(Parser)]
#[command(name = "foundry", about = "Persistent control plane for headless coding-agent fleets")]
struct Cli {
    /// Database URL (overrides FOUNDRY_DATABASE_URL env var)
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a foundry config file (no database required)
    Init {
        /// PostgreSQL connection URL
        #[arg(long, default_value = "postgresql://localhost:5432/foundry")]
        db_url: String,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Initialize the foundry database (requires config file or env vars)
    DbInit,
    /// Validate and enqueue a task file for a project
    Enqueue {
        /// Path to the task file (JSON)
        task_file: PathBuf,
    },
    /// Start the control loop for a project
    Run {
        /// Project ID to run
        #[arg(long)]
        project: String,
    },
    /// Print a project's SupervisorState and queue contents as JSON
    DumpState {
        /// Project ID to inspect
        #[arg(long)]
        project: String,
    },
    /// Manually evict a session (or every session in a project)
    ResetSessions {
        /// Project ID
        #[arg(long)]
        project: String,
        /// Specific feature_id to evict (omit to evict all)
        feature_id: Option<String>,
    },
}

/// Execute the `foundry init` command: write config file.
fn cmd_init(db_url: &str, force: bool) -> anyhow::Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let cfg = config::ConfigFile {
        database: config::DatabaseSection { url: db_url.to_string() },
        ..Default::default()
    };

    config::save_config(&cfg)?;

    println!("Config written to {}", path.display());
    println!("  database.url = {db_url}");
    println!();
    println!("Next: run `foundry db-init` to create and migrate the database.");

    Ok(())
}

/// Execute the `foundry db-init` command: create database and run migrations.
async fn cmd_db_init(cli_db_url: Option<&str>) -> anyhow::Result<()> {
    let resolved = FoundryConfig::resolve(cli_db_url)?;

    println!("Initializing foundry database...");

    pool::ensure_database_exists(&resolved.db_config).await?;
    let db_pool = pool::create_pool(&resolved.db_config).await?;
    let migrations_path = pool::default_migrations_path();
    pool::run_migrations(&db_pool, migrations_path).await?;

    let counts = pool::table_counts(&db_pool).await?;
    println!("Database ready. Tables:");
    for (table, count) in &counts {
        println!("  {table}: {count} rows");
    }

    db_pool.close().await;

    println!("foundry db-init complete.");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { db_url, force } => {
            cmd_init(&db_url, force)?;
        }
        Commands::DbInit => {
            cmd_db_init(cli.database_url.as_deref()).await?;
        }
        Commands::Enqueue { task_file } => {
            let resolved = FoundryConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = enqueue_cmd::run_enqueue(&db_pool, &task_file).await;
            db_pool.close().await;
            result?;
        }
        Commands::Run { project } => {
            let resolved = FoundryConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = run_cmd::run_run(&db_pool, &project, &resolved).await;
            db_pool.close().await;
            result?;
        }
        Commands::DumpState { project } => {
            let resolved = FoundryConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = dump_state_cmd::run_dump_state(&db_pool, &project).await;
            db_pool.close().await;
            result?;
        }
        Commands::ResetSessions { project, feature_id } => {
            let resolved = FoundryConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result =
                reset_sessions_cmd::run_reset_sessions(&db_pool, &project, feature_id.as_deref())
                    .await;
            db_pool.close().await;
            result?;
        }
    }

    Ok(())
}
