//! Terminal front-end for FinRobot tutorial scripts.

mod commands;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use finrobot_run_client::{ClientConfig, init_observability};

#[derive(Parser)]
#[command(name = "finrobot")]
#[command(about = "Run FinRobot analysis scripts and browse their history", long_about = None)]
struct Cli {
    /// Backend address (overrides FINROBOT_API_BASE_URL)
    #[arg(long, global = true)]
    base_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List runnable scripts and their parameters
    Scripts,
    /// List configured models
    Models,
    /// Run a script and stream its output
    Run {
        /// Script as `folder/name`, e.g. `beginner/agent_rag_qa`
        script: String,
        /// Parameter as `key=value`; values are parsed as JSON when possible
        #[arg(short = 'p', long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,
        #[arg(long, default_value = "en")]
        lang: String,
        /// Do not fill missing parameters from the script's defaults
        #[arg(long)]
        no_defaults: bool,
        /// Write an HTML report of the result to this path
        #[arg(long, value_name = "PATH")]
        html: Option<PathBuf>,
    },
    /// Browse persisted run history
    History {
        #[command(subcommand)]
        action: HistoryCommands,
    },
}

#[derive(Subcommand)]
enum HistoryCommands {
    /// List the records of a script
    List { script: String },
    /// Show one record (the newest by default)
    Show {
        script: String,
        #[arg(long)]
        id: Option<String>,
        /// Write an HTML report of the record to this path
        #[arg(long, value_name = "PATH")]
        html: Option<PathBuf>,
    },
    /// Delete a record, or every record when allowed and no timestamp is given
    Delete {
        script: String,
        #[arg(long)]
        timestamp: Option<String>,
    },
    /// Record counts across all scripts
    Summary,
}

fn load_config(base_url: Option<String>) -> Result<ClientConfig> {
    dotenvy::dotenv().ok();
    let mut config = ClientConfig::from_env().context("invalid client configuration")?;
    if let Some(base_url) = base_url {
        config = config.base_url(base_url);
        config.validate().context("invalid --base-url")?;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.base_url)?;
    init_observability("warn");
    tracing::debug!(base_url = %config.base_url, "finrobot cli starting");

    match cli.command {
        Commands::Scripts => commands::list_scripts(&config).await,
        Commands::Models => commands::list_models(&config).await,
        Commands::Run {
            script,
            params,
            lang,
            no_defaults,
            html,
        } => {
            let options = commands::RunOptions {
                script,
                params,
                lang,
                fill_defaults: !no_defaults,
                html,
            };
            commands::run(&config, options).await
        }
        Commands::History { action } => match action {
            HistoryCommands::List { script } => commands::history_list(&config, &script).await,
            HistoryCommands::Show { script, id, html } => {
                commands::history_show(&config, &script, id.as_deref(), html).await
            }
            HistoryCommands::Delete { script, timestamp } => {
                commands::history_delete(&config, &script, timestamp.as_deref()).await
            }
            HistoryCommands::Summary => commands::history_summary(&config).await,
        },
    }
}
