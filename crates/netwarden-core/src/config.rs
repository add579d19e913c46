//! Configuration loading for netwarden services.
//!
//! Configuration is loaded from (in priority order):
//! 1. Environment variables (`NETWARDEN__<SECTION>__<KEY>`)
//! 2. Config file (`netwarden.toml` by default)
//! 3. Serde defaults

use serde::de::DeserializeOwned;

use crate::error::NetwardenError;

/// Environment variable prefix for every section.
pub const ENV_PREFIX: &str = "NETWARDEN";

/// Build the layered configuration source for a file prefix.
pub fn load(file_prefix: &str) -> Result<config::Config, NetwardenError> {
    config::Config::builder()
        .add_source(config::File::with_name(file_prefix).required(false))
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .map_err(|e| NetwardenError::Config(e.to_string()))
}

/// Deserialize one section, falling back to its defaults when absent.
pub fn section<T>(cfg: &config::Config, name: &str) -> Result<T, NetwardenError>
where
    T: DeserializeOwned + Default,
{
    match cfg.get::<T>(name) {
        Ok(value) => Ok(value),
        Err(config::ConfigError::NotFound(_)) => {
            tracing::debug!(section = name, "Config section absent, using defaults");
            Ok(T::default())
        }
        Err(e) => Err(NetwardenError::Config(format!("[{name}]: {e}"))),
    }
}
