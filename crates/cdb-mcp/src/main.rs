use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

mod cli;
mod doctor;
mod dumps;
mod mcp_server;
mod resources;
mod server;

use cdm_config::ServerConfig;
use cli::{Cli, Commands};
use server::DebugServer;

const DEFAULT_CONFIG_FILE: &str = "cdb-mcp.toml";

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries the JSON-RPC stream.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init()
        .ok();

    let cli = Cli::parse();
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    let mut config = ServerConfig::load(&config_path)?;
    if let Some(cdb_path) = cli.cdb_path.clone() {
        config.debugger.executable_override = Some(cdb_path);
    }
    if let Some(symbols_path) = cli.symbols_path.clone() {
        config.debugger.symbols_path = Some(symbols_path);
    }

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => {
            let server = Arc::new(DebugServer::new(config));
            mcp_server::run_mcp_server(server).await
        }
        Commands::ListDumps { directory } => {
            let listing = dumps::list_dump_files(&directory)?;
            print!("{}", dumps::format_dump_listing(&listing));
            Ok(())
        }
        Commands::Doctor => doctor::run_doctor(&config).await,
        Commands::Init { force } => {
            if config_path.exists() && !force {
                anyhow::bail!(
                    "{} already exists; pass --force to overwrite",
                    config_path.display()
                );
            }
            ServerConfig::default().save(&config_path)?;
            println!("Wrote default config to {}", config_path.display());
            Ok(())
        }
    }
}
