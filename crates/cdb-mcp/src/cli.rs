use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "cdb-mcp", version)]
#[command(about = "MCP tool server for Windows crash-dump debugging via cdb")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to cdb-mcp.toml (defaults next to the working directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Debugger executable; wins over the config file and the search list
    #[arg(long, global = true)]
    pub cdb_path: Option<String>,

    /// Symbol search path passed to the debugger (-y / _NT_SYMBOL_PATH)
    #[arg(long, global = true)]
    pub symbols_path: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve MCP tools over stdio (default when no subcommand is given)
    Serve,

    /// List crash dump files under a directory, newest first
    ListDumps {
        /// Directory to search recursively for *.dmp files
        directory: PathBuf,
    },

    /// Check the environment: debugger executable, symbols, settings
    Doctor,

    /// Write a default cdb-mcp.toml for editing
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
}
