//! Server configuration loading and validation (cdb-mcp.toml).

mod config;
mod validate;

pub use config::{
    CacheSettings, DebuggerSettings, QueueSettings, RecoverySettings, ServerConfig,
};
pub use validate::validate_config;
