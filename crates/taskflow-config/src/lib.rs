//! Taskflow hub configuration.
//!
//! TOML-based configuration with full validation. All config sections use
//! sensible defaults so partial configs work out of the box.
//!
//! ```rust,no_run
//! use taskflow_config::load_config;
//!
//! let config = load_config().expect("failed to load config");
//! println!("{}:{}", config.server.bind, config.server.port);
//! ```

pub mod schema;
pub mod toml_loader;
pub mod validation;

pub use schema::{
    EventsConfig, HubConfig, LoggingConfig, MeshConfig, PresenceConfig, ServerConfig,
};
pub use toml_loader::{load_default, load_from_path};

use taskflow_common::ConfigError;

/// Load config from the platform default path and validate it.
pub fn load_config() -> Result<HubConfig, ConfigError> {
    let config = toml_loader::load_default()?;
    validation::validate(&config)?;
    Ok(config)
}
