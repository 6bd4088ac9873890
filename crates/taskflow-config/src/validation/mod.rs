//! Configuration validation.
//!
//! Checks numeric ranges and required values, collecting every problem
//! into a single `ConfigError`.

mod helpers;


use taskflow_common::ConfigError;

use crate::schema::HubConfig;
use helpers::validate_range_u64;

/// Run all validations on a config, collecting all errors.
pub fn validate(config: &HubConfig) -> Result<(), ConfigError> {
    let mut errors: Vec<String> = Vec::new();

    if config.server.port == 0 {
        errors.push("server.port must not be 0".into());
    }
    if config.server.bind.trim().is_empty() {
        errors.push("server.bind must not be empty".into());
    }
    validate_range_u64(
        &mut errors,
        "server.hello_timeout_secs",
        config.server.hello_timeout_secs,
        1,
        120,
    );
    validate_range_u64(
        &mut errors,
        "server.outbound_queue",
        config.server.outbound_queue as u64,
        8,
        65_536,
    );
    validate_range_u64(
        &mut errors,
        "events.typing_timeout_ms",
        config.events.typing_timeout_ms,
        500,
        60_000,
    );
    validate_range_u64(
        &mut errors,
        "events.history_per_channel",
        config.events.history_per_channel as u64,
        1,
        10_000,
    );
    for url in &config.mesh.ice_servers {
        if !(url.starts_with("stun:") || url.starts_with("turn:") || url.starts_with("turns:")) {
            errors.push(format!("mesh.ice_servers entry {url:?} is not a stun/turn URL"));
        }
    }
    if config.logging.filter.trim().is_empty() {
        errors.push("logging.filter must not be empty".into());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError(errors.join("; ")))
    }
}
