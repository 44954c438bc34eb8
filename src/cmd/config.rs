//! Configuration view and validation commands: `boardsync config`.

use anyhow::{Context, Result};
use boardsync::config::{BoardsyncConfig, BoardsyncToml};

use super::super::ConfigCommands;

fn print_sections(toml: &BoardsyncToml) {
    println!("[server]");
    println!("  base_url = \"{}\"", toml.server.base_url);
    if let Some(ws) = &toml.server.ws_url {
        println!("  ws_url = \"{}\"", ws);
    }
    println!("  board_id = {}", toml.server.board_id);
    println!();

    let conn = &toml.connection;
    println!("[connection]");
    println!("  ping_interval_secs = {}", conn.ping_interval_secs);
    println!("  dead_after_missed = {}", conn.dead_after_missed);
    println!("  base_backoff_ms = {}", conn.base_backoff_ms);
    println!("  max_backoff_ms = {}", conn.max_backoff_ms);
    println!("  max_attempts = {}", conn.max_attempts);
    println!();

    let mutations = &toml.mutations;
    println!("[mutations]");
    println!("  timeout_secs = {}", mutations.timeout_secs);
    println!("  notice_ttl_secs = {}", mutations.notice_ttl_secs);
    println!("  sweep_interval_secs = {}", mutations.sweep_interval_secs);
    println!();
}

pub fn cmd_config(config: &BoardsyncConfig, command: Option<ConfigCommands>) -> Result<()> {
    let config_path = &config.config_path;

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Boardsync Configuration");
            println!("=======================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No boardsync.toml found at {}; using defaults.", config_path.display());
            }
            println!();
            print_sections(&config.toml);

            println!("Effective values (with env/CLI overrides):");
            println!("  base_url = \"{}\"", config.base_url());
            println!("  ws_url = \"{}\"", config.ws_url());
            println!("  board_id = {}", config.board_id());
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No boardsync.toml found. Using defaults (valid).");
                return Ok(());
            }

            let warnings = config.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("boardsync.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }
            if let Some(dir) = config_path.parent() {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("Failed to create {}", dir.display()))?;
            }
            BoardsyncToml::default().save(config_path)?;
            println!("Created boardsync.toml at {}", config_path.display());
            println!();
        }
    }

    Ok(())
}
