use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable overriding the debugger executable path.
pub const CDB_PATH_ENV: &str = "CDM_CDB_PATH";
/// Environment variable overriding the symbol search path.
pub const SYMBOLS_PATH_ENV: &str = "CDM_SYMBOLS_PATH";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub debugger: DebuggerSettings,
    #[serde(default)]
    pub queue: QueueSettings,
    #[serde(default)]
    pub recovery: RecoverySettings,
    #[serde(default)]
    pub cache: CacheSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebuggerSettings {
    /// Explicit path to cdb.exe; wins over the search list and PATH lookup.
    #[serde(default)]
    pub executable_override: Option<String>,
    /// Symbol search path passed as `-y` and exported as `_NT_SYMBOL_PATH`.
    #[serde(default)]
    pub symbols_path: Option<String>,
    #[serde(default = "default_symbol_server_timeout_ms")]
    pub symbol_server_timeout_ms: u64,
    #[serde(default = "default_symbol_server_max_retries")]
    pub symbol_server_max_retries: u32,
    /// Warm-up delay after spawn before the first command is accepted.
    #[serde(default = "default_startup_delay_ms")]
    pub startup_delay_ms: u64,
    /// Session-internal read timeout for a single command.
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
    /// Grace period after `q` before the process tree is force-killed.
    #[serde(default = "default_stop_grace_ms")]
    pub stop_grace_ms: u64,
    /// Wrap each command in `.echo` start/end markers as an additional
    /// completion signal.
    #[serde(default)]
    pub use_command_markers: bool,
    /// Cap on accumulated output per command.
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
    /// Extra arguments appended to the debugger command line.
    #[serde(default)]
    pub extra_args: Vec<String>,
}

fn default_symbol_server_timeout_ms() -> u64 {
    10_000
}

fn default_symbol_server_max_retries() -> u32 {
    3
}

fn default_startup_delay_ms() -> u64 {
    1_000
}

fn default_read_timeout_secs() -> u64 {
    180
}

fn default_stop_grace_ms() -> u64 {
    2_000
}

fn default_max_output_bytes() -> usize {
    4 * 1024 * 1024
}

impl Default for DebuggerSettings {
    fn default() -> Self {
        Self {
            executable_override: None,
            symbols_path: None,
            symbol_server_timeout_ms: default_symbol_server_timeout_ms(),
            symbol_server_max_retries: default_symbol_server_max_retries(),
            startup_delay_ms: default_startup_delay_ms(),
            read_timeout_secs: default_read_timeout_secs(),
            stop_grace_ms: default_stop_grace_ms(),
            use_command_markers: false,
            max_output_bytes: default_max_output_bytes(),
            extra_args: Vec::new(),
        }
    }
}

impl DebuggerSettings {
    pub fn startup_delay(&self) -> Duration {
        Duration::from_millis(self.startup_delay_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    /// Executable override, with the environment variable taking precedence
    /// over the config file.
    pub fn resolved_executable_override(&self) -> Option<String> {
        std::env::var(CDB_PATH_ENV)
            .ok()
            .filter(|v| !v.is_empty())
            .or_else(|| self.executable_override.clone())
    }

    /// Symbol path from env or config, if any.
    pub fn resolved_symbols_path(&self) -> Option<String> {
        std::env::var(SYMBOLS_PATH_ENV)
            .ok()
            .filter(|v| !v.is_empty())
            .or_else(|| self.symbols_path.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSettings {
    #[serde(default = "default_command_timeout_secs")]
    pub default_command_timeout_secs: u64,
    #[serde(default = "default_extended_timeout_secs")]
    pub extended_command_timeout_secs: u64,
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    /// How long terminal commands stay visible in the active map.
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
    #[serde(default = "default_queue_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
    /// Extra substrings (matched case-insensitively) that push a command
    /// into the extended timeout class.
    #[serde(default)]
    pub extended_command_patterns: Vec<String>,
}

fn default_command_timeout_secs() -> u64 {
    120
}

fn default_extended_timeout_secs() -> u64 {
    600
}

fn default_heartbeat_interval_secs() -> u64 {
    10
}

fn default_retention_secs() -> u64 {
    1_800
}

fn default_queue_cleanup_interval_secs() -> u64 {
    60
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            default_command_timeout_secs: default_command_timeout_secs(),
            extended_command_timeout_secs: default_extended_timeout_secs(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            retention_secs: default_retention_secs(),
            cleanup_interval_secs: default_queue_cleanup_interval_secs(),
            extended_command_patterns: Vec::new(),
        }
    }
}

impl QueueSettings {
    pub fn default_command_timeout(&self) -> Duration {
        Duration::from_secs(self.default_command_timeout_secs)
    }

    pub fn extended_command_timeout(&self) -> Duration {
        Duration::from_secs(self.extended_command_timeout_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoverySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    #[serde(default = "default_restart_base_delay_ms")]
    pub restart_base_delay_ms: u64,
    #[serde(default = "default_health_check_interval_secs")]
    pub health_check_interval_secs: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_cooldown_secs() -> u64 {
    300
}

fn default_restart_base_delay_ms() -> u64 {
    1_000
}

fn default_health_check_interval_secs() -> u64 {
    30
}

impl Default for RecoverySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            cooldown_secs: default_cooldown_secs(),
            restart_base_delay_ms: default_restart_base_delay_ms(),
            health_check_interval_secs: default_health_check_interval_secs(),
        }
    }
}

impl RecoverySettings {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn restart_base_delay(&self) -> Duration {
        Duration::from_millis(self.restart_base_delay_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    #[serde(default = "default_max_memory_bytes")]
    pub max_memory_bytes: usize,
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,
    #[serde(default = "default_cache_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
    /// Fraction of `max_memory_bytes` at which pressure eviction starts.
    #[serde(default = "default_pressure_threshold")]
    pub pressure_threshold: f64,
    #[serde(default = "default_max_evict_per_cycle")]
    pub max_evict_per_cycle: usize,
}

fn default_max_memory_bytes() -> usize {
    100 * 1024 * 1024
}

fn default_ttl_secs() -> u64 {
    1_800
}

fn default_cache_cleanup_interval_secs() -> u64 {
    60
}

fn default_pressure_threshold() -> f64 {
    0.8
}

fn default_max_evict_per_cycle() -> usize {
    100
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_memory_bytes: default_max_memory_bytes(),
            default_ttl_secs: default_ttl_secs(),
            cleanup_interval_secs: default_cache_cleanup_interval_secs(),
            pressure_threshold: default_pressure_threshold(),
            max_evict_per_cycle: default_max_evict_per_cycle(),
        }
    }
}

impl CacheSettings {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

impl ServerConfig {
    /// Load config from an explicit path. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let config: ServerConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.display()))?;
        crate::validate::validate_config(&config)?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config: {}", path.display()))?;
        Ok(())
    }
}
