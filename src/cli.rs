use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use crate::application::initialize_with_config;
use crate::config::Config;
use crate::db;
use crate::types::{ExecutionListFilter, ExecutionRecord, ExecutionStatus, DEFAULT_LIST_LIMIT};

#[derive(Parser)]
#[command(name = "bmd")]
#[command(about = "Biodiversity workflow submission and lifecycle tracking", long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default search)
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Database URL (overrides config file and env vars)
    #[arg(long, global = true)]
    pub database_url: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP service
    Serve {
        /// Address to bind (overrides server.bind)
        #[arg(long)]
        bind: Option<String>,
    },

    /// Run database migrations
    Migrate,

    /// Show one execution
    Status {
        /// Execution ID to query
        execution_id: String,

        /// Owner the execution belongs to
        #[arg(long)]
        owner: String,
    },

    /// List an owner's executions, newest first
    List {
        /// Owner whose executions to list
        #[arg(long)]
        owner: String,

        /// Filter by status
        #[arg(short = 's', long = "status")]
        status: Option<String>,

        /// Number of results
        #[arg(short = 'l', long = "limit", default_value_t = DEFAULT_LIST_LIMIT)]
        limit: i64,
    },

    /// Print the effective configuration as TOML (credentials redacted)
    Config,
}

/// Run the CLI by parsing process arguments
pub async fn run_cli() -> Result<()> {
    run_cli_with_args(Cli::parse()).await
}

/// Run the CLI with provided arguments
pub async fn run_cli_from_args(args: Vec<String>) -> Result<()> {
    run_cli_with_args(Cli::parse_from(args)).await
}

async fn run_cli_with_args(cli: Cli) -> Result<()> {
    // Load and validate configuration before executing any command
    let mut config = Config::builder()
        .database_url(cli.database_url)
        .config_path(cli.config.map(std::path::PathBuf::from))
        .build()
        .context("Failed to load configuration")?;

    match cli.command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            let app = initialize_with_config(config, true).await?;
            app.serve().await?;
        }

        Commands::Migrate => {
            if config.database.url.is_none() {
                bail!("database.url is not configured; nothing to migrate");
            }
            println!("Running migrations...");
            let pool = db::create_pool(&config.database).await?;
            db::migrate(&pool).await?;
            println!("Migrations complete!");
        }

        Commands::Status {
            execution_id,
            owner,
        } => {
            let app = initialize_with_config(config, false).await?;
            match app.store.get_for_owner(&owner, &execution_id).await? {
                Some(record) => print_record(&record)?,
                None => bail!("Execution {} not found", execution_id),
            }
        }

        Commands::List {
            owner,
            status,
            limit,
        } => {
            let status = status
                .as_deref()
                .map(str::parse::<ExecutionStatus>)
                .transpose()?;

            let app = initialize_with_config(config, false).await?;
            let records = app
                .store
                .list_for_owner(
                    &owner,
                    &ExecutionListFilter {
                        status,
                        limit: Some(limit),
                    },
                )
                .await?;

            if records.is_empty() {
                println!("No executions found");
            } else {
                println!(
                    "{:<40} {:<10} {:<25} {}",
                    "EXECUTION", "STATUS", "CREATED", "NAME"
                );
                for record in &records {
                    println!(
                        "{:<40} {:<10} {:<25} {}",
                        record.execution_id,
                        record.status,
                        record.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
                        record.descriptor.name
                    );
                }
            }
        }

        Commands::Config => {
            print!("{}", config.to_toml_redacted()?);
        }
    }

    Ok(())
}

fn print_record(record: &ExecutionRecord) -> Result<()> {
    println!("Execution: {}", record.execution_id);
    println!("Owner: {}", record.owner_id);
    println!("Name: {}", record.descriptor.name);
    println!("Species: {}", record.descriptor.species_tag);
    println!(
        "Template: {}",
        record.descriptor.ecosystem_type.workflow_template()
    );
    println!("Geometry: {}", record.descriptor.geometry_wkt);
    println!("Status: {}", record.status);
    println!("Created: {}", record.created_at);
    println!("Updated: {}", record.updated_at);

    if let Some(completed_at) = record.completed_at {
        println!("Completed: {}", completed_at);
    }

    if let Some(results) = &record.results {
        println!("\nResults:");
        println!("  {}", serde_json::to_string_pretty(results)?);
    }

    if let Some(error) = &record.error_message {
        println!("\nError:");
        println!("  {}", error);
    }

    Ok(())
}
