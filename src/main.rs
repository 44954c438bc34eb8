use anyhow::Result;
use boardsync::logging::LogFormat;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "boardsync")]
#[command(version, about = "Live collaborative board client")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to boardsync.toml (defaults to .boardsync/boardsync.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// REST base URL. Overrides BOARDSYNC_SERVER_URL and the config file.
    #[arg(long, global = true)]
    pub server_url: Option<String>,

    /// WebSocket URL. Derived from the server URL when unset.
    #[arg(long, global = true)]
    pub ws_url: Option<String>,

    #[arg(long, global = true)]
    pub board_id: Option<i64>,

    #[arg(long, value_enum, default_value_t = LogFormat::Plain, global = true)]
    pub log_format: LogFormat,

    /// Also write daily-rolling log files to this directory
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Load the board and print live changes until Ctrl-C
    Watch,
    /// Move a ticket to a column (slug or display name)
    Move { ticket: i64, column: String },
    /// Edit a ticket's title, description or assignee
    Edit {
        ticket: i64,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long, conflicts_with = "unassign")]
        assignee: Option<String>,
        /// Clear the assignee
        #[arg(long)]
        unassign: bool,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Write a default boardsync.toml
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let _log_guard =
        boardsync::logging::init_tracing(cli.verbose, cli.log_format, cli.log_dir.as_deref())?;
    let config = cmd::load_config(&cli)?;

    match &cli.command {
        Commands::Watch => cmd::cmd_watch(&config).await?,
        Commands::Move { ticket, column } => cmd::cmd_move(&config, *ticket, column).await?,
        Commands::Edit {
            ticket,
            title,
            description,
            assignee,
            unassign,
        } => {
            let patch = cmd::edit_patch(title.clone(), description.clone(), assignee.clone(), *unassign);
            cmd::cmd_edit(&config, *ticket, patch).await?
        }
        Commands::Config { command } => cmd::cmd_config(&config, command.clone())?,
    }

    Ok(())
}
