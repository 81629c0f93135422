//! Shared configuration helpers for services.
//!
//! A service describes its settings as a serde struct implementing
//! [`ServiceConfig`]. [`load`] reads an optional YAML file named by
//! `<PREFIX>CONFIG` and then lets the service apply `<PREFIX>*` environment
//! overrides on top.

use std::env;
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Settings for one service.
pub trait ServiceConfig: DeserializeOwned + Default {
    /// Environment variable prefix, including the trailing underscore.
    const PREFIX: &'static str;

    fn apply_environment_overrides(&mut self, prefix: &str);
}

/// Load a service's configuration using its own prefix.
pub fn load<T: ServiceConfig>() -> Result<T, ConfigError> {
    load_with_prefix(T::PREFIX)
}

/// Load configuration using an explicit environment prefix.
pub fn load_with_prefix<T: ServiceConfig>(prefix: &str) -> Result<T, ConfigError> {
    let mut config = match env::var(format!("{prefix}CONFIG")) {
        Ok(path) if !path.is_empty() => from_file(PathBuf::from(path))?,
        _ => T::default(),
    };
    config.apply_environment_overrides(prefix);
    Ok(config)
}

fn from_file<T: DeserializeOwned>(path: PathBuf) -> Result<T, ConfigError> {
    let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
        path: path.clone(),
        source,
    })?;
    serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse { path, source })
}

/// Read `<prefix><key>` and parse it.
///
/// Returns `None` when the variable is unset. Values that fail to parse are
/// logged and ignored.
pub fn env_override<T>(prefix: &str, key: &str) -> Option<T>
where
    T: FromStr,
    T::Err: Display,
{
    let var = format!("{prefix}{key}");
    let value = env::var(&var).ok()?;
    value
        .parse::<T>()
        .inspect_err(|error| {
            tracing::warn!(%var, %value, %error, "invalid configuration override, ignoring");
        })
        .ok()
}
