//! Environment diagnostics for the debugger server.

use anyhow::Result;
use cdm_config::ServerConfig;
use cdm_session::locate_debugger;
use std::env;

/// Run full environment diagnostics. Exits non-zero (via the returned error)
/// only when the debugger executable cannot be resolved at all.
pub async fn run_doctor(config: &ServerConfig) -> Result<()> {
    println!("=== cdb-mcp Environment Check ===");
    print_platform_info();
    println!();

    println!("=== Debugger ===");
    let debugger_ok = print_debugger_status(config).await;
    println!();

    println!("=== Symbols ===");
    print_symbol_status(config);
    println!();

    println!("=== Pipeline Settings ===");
    print_pipeline_settings(config);

    if !debugger_ok {
        anyhow::bail!("no usable debugger executable; install the Debugging Tools for Windows or set CDM_CDB_PATH");
    }
    Ok(())
}

fn print_platform_info() {
    println!("Platform:        {} {}", env::consts::OS, env::consts::ARCH);
    println!("cdb-mcp Version: {}", env!("CARGO_PKG_VERSION"));
}

async fn print_debugger_status(config: &ServerConfig) -> bool {
    match &config.debugger.executable_override {
        Some(path) => println!("Configured override: {path}"),
        None => println!("Configured override: (none; searching Windows Kits and PATH)"),
    }

    match locate_debugger(config.debugger.resolved_executable_override()).await {
        Ok(path) => {
            println!("Resolved executable: {}", path.display());
            true
        }
        Err(e) => {
            println!("Resolved executable: NOT FOUND ({e})");
            false
        }
    }
}

fn print_symbol_status(config: &ServerConfig) {
    match config.debugger.resolved_symbols_path() {
        Some(symbols) => println!("Symbol path: {symbols}"),
        None => println!("Symbol path: (none configured; the debugger inherits _NT_SYMBOL_PATH)"),
    }
    println!(
        "Symbol server timeout: {} ms, max retries: {}",
        config.debugger.symbol_server_timeout_ms, config.debugger.symbol_server_max_retries
    );
}

fn print_pipeline_settings(config: &ServerConfig) {
    println!(
        "Command timeouts: default {}s, extended {}s",
        config.queue.default_command_timeout_secs, config.queue.extended_command_timeout_secs
    );
    if !config.queue.extended_command_patterns.is_empty() {
        println!(
            "Extra extended patterns: {}",
            config.queue.extended_command_patterns.join(", ")
        );
    }
    println!(
        "Retention: {}s, heartbeat every {}s",
        config.queue.retention_secs, config.queue.heartbeat_interval_secs
    );
    println!(
        "Recovery: {} attempt(s) per {}s cooldown, restart backoff base {} ms",
        config.recovery.max_attempts,
        config.recovery.cooldown_secs,
        config.recovery.restart_base_delay_ms
    );
    println!(
        "Result cache: {} MB budget, TTL {}s",
        config.cache.max_memory_bytes / (1024 * 1024),
        config.cache.default_ttl_secs
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_doctor_fails_without_debugger() {
        // Point the override at a path that cannot exist so the outcome does
        // not depend on the host.
        let mut config = ServerConfig::default();
        config.debugger.executable_override = Some("/nonexistent/cdb.exe".into());
        assert!(run_doctor(&config).await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_doctor_passes_with_resolvable_debugger() {
        let dir = tempfile::tempdir().unwrap();
        let stub = dir.path().join("cdb-stub");
        std::fs::write(&stub, "#!/bin/sh\n").unwrap();

        let mut config = ServerConfig::default();
        config.debugger.executable_override = Some(stub.display().to_string());
        assert!(run_doctor(&config).await.is_ok());
    }
}
