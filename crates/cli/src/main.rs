//! Fabric Control Plane CLI
//!
//! A command-line tool for inspecting path weights, collection statistics
//! and the alert journal of the central controller.

mod client;
mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{alerts, stats, weights};

/// Fabric Control Plane CLI
#[derive(Parser)]
#[command(name = "fcp")]
#[command(author, version, about = "CLI for the fabric control plane", long_about = None)]
pub struct Cli {
    /// Controller API URL (can also be set via FCP_API_URL env var)
    #[arg(long, env = "FCP_API_URL", default_value = "http://localhost:5000")]
    pub api_url: String,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the current path-selection weights
    Weights {
        /// Filter by route, e.g. "leaf1->leaf6"
        #[arg(long, short)]
        route: Option<String>,
    },

    /// Show push and collection statistics
    Stats,

    /// Inspect or manage alerts
    #[command(subcommand)]
    Alerts(AlertCommands),

    /// Trigger an immediate weight resync to the SDN host
    Sync,

    /// Controller health
    Health,
}

#[derive(Subcommand)]
pub enum AlertCommands {
    /// List recent alerts
    List {
        /// Maximum number of alerts to show
        #[arg(long, short, default_value_t = 20)]
        limit: usize,
    },

    /// Acknowledge an alert
    Ack {
        /// Alert id
        id: String,
    },

    /// Dismiss (delete) an alert
    Dismiss {
        /// Alert id
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = client::ApiClient::new(&cli.api_url)?;

    match cli.command {
        Commands::Weights { route } => {
            weights::show_weights(&client, route, cli.format).await?;
        }
        Commands::Stats => {
            stats::show_stats(&client, cli.format).await?;
        }
        Commands::Alerts(alert_cmd) => match alert_cmd {
            AlertCommands::List { limit } => {
                alerts::list_alerts(&client, limit, cli.format).await?;
            }
            AlertCommands::Ack { id } => {
                alerts::acknowledge(&client, &id).await?;
            }
            AlertCommands::Dismiss { id } => {
                alerts::dismiss(&client, &id).await?;
            }
        },
        Commands::Sync => {
            stats::force_sync(&client).await?;
        }
        Commands::Health => {
            stats::show_health(&client, cli.format).await?;
        }
    }

    Ok(())
}
