use anyhow::Result;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use herald::config::Config;

mod commands;

#[derive(Parser)]
#[command(
    name = "herald",
    version,
    about = "Campaign content pipeline: schedule, generate and publish social posts",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML config file (defaults to HERALD_* environment variables)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json), overrides the config file
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP trigger surface
    Serve {
        /// Override the configured bind address
        #[arg(short, long)]
        bind: Option<SocketAddr>,

        /// Also run the in-process ticker
        #[arg(long, default_value = "false")]
        ticker: bool,
    },

    /// Run the pipeline on the configured interval
    Run {
        /// Run every stage once and exit
        #[arg(long, default_value = "false")]
        once: bool,
    },

    /// Create tasks for campaigns inside the scheduling horizon
    Schedule,

    /// Generate content for due tasks
    Generate {
        /// Generate a single task now
        #[arg(long)]
        id: Option<String>,
    },

    /// Publish generated content for due tasks
    Publish {
        /// Publish a single task now
        #[arg(long)]
        id: Option<String>,
    },

    /// Manage campaigns
    Campaign {
        #[command(subcommand)]
        action: CampaignCommand,
    },
}

#[derive(Subcommand)]
enum CampaignCommand {
    /// List all campaigns
    List,

    /// Show one campaign
    Show { id: String },

    /// Create a campaign from a JSON file
    Create {
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Delete a campaign and its tasks
    Delete { id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };
    if let Some(format) = cli.log_format {
        config.logging.format = format;
    }
    config.validate()?;

    // Initialize tracing/logging
    setup_tracing(&config.logging.format, &config.logging.level, cli.verbose)?;

    tracing::debug!(config = ?cli.config, "Configuration loaded");

    match cli.command {
        Commands::Serve { bind, ticker } => {
            tracing::info!(bind = ?bind, ticker = %ticker, "Starting serve command");
            commands::serve(&config, bind, ticker).await?;
        }

        Commands::Run { once } => {
            tracing::info!(once = %once, "Starting run command");
            commands::run_ticker(&config, once).await?;
        }

        Commands::Schedule => commands::schedule(&config).await?,

        Commands::Generate { id } => commands::generate(&config, id).await?,

        Commands::Publish { id } => commands::publish(&config, id).await?,

        Commands::Campaign { action } => match action {
            CampaignCommand::List => commands::list_campaigns(&config).await?,
            CampaignCommand::Show { id } => commands::show_campaign(&config, &id).await?,
            CampaignCommand::Create { file } => commands::create_campaign(&config, &file).await?,
            CampaignCommand::Delete { id } => commands::delete_campaign(&config, &id).await?,
        },
    }

    Ok(())
}

fn setup_tracing(format: &str, level: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("herald=debug,tower_http=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("herald={level},warn")))
    };

    // Logs go to stderr so command output on stdout stays parseable
    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    Ok(())
}
