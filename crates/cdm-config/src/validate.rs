use crate::ServerConfig;
use anyhow::{Result, bail};

/// Reject configurations that would make the pipeline misbehave in ways a
/// user cannot diagnose from runtime symptoms.
pub fn validate_config(config: &ServerConfig) -> Result<()> {
    let cache = &config.cache;
    if !(cache.pressure_threshold > 0.0 && cache.pressure_threshold < 1.0) {
        bail!(
            "cache.pressure_threshold must be in (0, 1), got {}",
            cache.pressure_threshold
        );
    }
    if cache.max_memory_bytes == 0 {
        bail!("cache.max_memory_bytes must be non-zero");
    }
    if cache.max_evict_per_cycle == 0 {
        bail!("cache.max_evict_per_cycle must be non-zero");
    }

    let queue = &config.queue;
    if queue.default_command_timeout_secs == 0 {
        bail!("queue.default_command_timeout_secs must be non-zero");
    }
    if queue.extended_command_timeout_secs < queue.default_command_timeout_secs {
        bail!(
            "queue.extended_command_timeout_secs ({}) must be >= default_command_timeout_secs ({})",
            queue.extended_command_timeout_secs,
            queue.default_command_timeout_secs
        );
    }
    if queue.heartbeat_interval_secs == 0 {
        bail!("queue.heartbeat_interval_secs must be non-zero");
    }

    let recovery = &config.recovery;
    if recovery.max_attempts == 0 {
        bail!("recovery.max_attempts must be non-zero");
    }

    if config.debugger.read_timeout_secs == 0 {
        bail!("debugger.read_timeout_secs must be non-zero");
    }
    if config.debugger.max_output_bytes == 0 {
        bail!("debugger.max_output_bytes must be non-zero");
    }

    Ok(())
}
