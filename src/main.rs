mod api;
mod cli;
mod config;
mod error;
mod jobs;
mod models;
mod services;
mod utils;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use crate::config::AppConfig;
use crate::models::Source;

#[derive(Parser)]
#[command(name = "league_history")]
#[command(about = "Multi-season fantasy football league history reports")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the API server
    Serve {
        #[arg(short, long, default_value = "3000")]
        port: u16,
    },
    /// List the leagues an account belongs to
    Leagues {
        #[arg(short, long)]
        source: Source,
        /// Yahoo access token or Sleeper username
        #[arg(short, long)]
        identity: String,
    },
    /// Build a history report for one league
    Generate {
        #[arg(short, long)]
        source: Source,
        #[arg(short, long)]
        league: String,
        /// Yahoo access token or Sleeper username
        #[arg(short, long)]
        identity: String,
        #[arg(long)]
        start: Option<i32>,
        #[arg(long)]
        end: Option<i32>,
        /// Copy the finished PDF here
        #[arg(short, long)]
        out: Option<PathBuf>,
        /// Also export the all-time table as CSV
        #[arg(long)]
        csv: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("league_history=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env()?;

    match cli.command {
        Some(Commands::Serve { port }) => {
            tracing::info!("Starting league history API server on port {}", port);
            api::serve(port, config).await?;
        }
        Some(Commands::Leagues { source, identity }) => {
            cli::list_leagues(&config, source, &identity).await?;
        }
        Some(Commands::Generate {
            source,
            league,
            identity,
            start,
            end,
            out,
            csv,
        }) => {
            tracing::info!("Generating report for {} league {}", source, league);
            cli::generate_report(
                &config,
                cli::GenerateOptions {
                    source,
                    league_id: league,
                    identity,
                    start_year: start,
                    end_year: end,
                    out,
                    csv,
                },
            )
            .await?;
        }
        None => {
            // Default to serving
            tracing::info!("Starting league history API server on port 3000");
            api::serve(3000, config).await?;
        }
    }

    Ok(())
}
