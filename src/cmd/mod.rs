//! CLI command implementations.
//!
//! | Module   | Commands handled         |
//! |----------|--------------------------|
//! | `board`  | `Watch`, `Move`, `Edit`  |
//! | `config` | `Config`                 |

pub mod board;
pub mod config;

use anyhow::{Context, Result};
use boardsync::config::{BoardsyncConfig, CliOverrides};

use super::Cli;

pub use board::{cmd_edit, cmd_move, cmd_watch, edit_patch};
pub use config::cmd_config;

/// Build the effective configuration from the file named on the command
/// line (or the default location) plus CLI overrides.
pub fn load_config(cli: &Cli) -> Result<BoardsyncConfig> {
    let config = match &cli.config {
        Some(path) => BoardsyncConfig::from_path(path.clone())?,
        None => {
            let cwd = std::env::current_dir().context("Failed to get current directory")?;
            BoardsyncConfig::new(&cwd)?
        }
    };
    Ok(config.with_cli(CliOverrides {
        server_url: cli.server_url.clone(),
        ws_url: cli.ws_url.clone(),
        board_id: cli.board_id,
    }))
}
