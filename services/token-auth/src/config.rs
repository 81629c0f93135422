use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use common_config::{env_override, ServiceConfig};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TokenAuthConfig {
    pub bind_address: String,
    pub port: u16,
    pub tokens_path: PathBuf,
    pub registry_mode: RegistryMode,
}

/// When the token registry is read from disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistryMode {
    /// Read on every validation; edits apply to the next request.
    #[default]
    PerRequest,
    /// Read once at startup and again only on an explicit reload.
    Cached,
}

#[derive(Debug, Error)]
#[error("unknown registry mode {0:?}, expected per_request or cached")]
pub struct UnknownRegistryMode(String);

impl RegistryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegistryMode::PerRequest => "per_request",
            RegistryMode::Cached => "cached",
        }
    }
}

impl fmt::Display for RegistryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RegistryMode {
    type Err = UnknownRegistryMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "per_request" | "per-request" => Ok(RegistryMode::PerRequest),
            "cached" => Ok(RegistryMode::Cached),
            _ => Err(UnknownRegistryMode(s.to_string())),
        }
    }
}

impl Default for TokenAuthConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 9000,
            tokens_path: PathBuf::from("tokens.yaml"),
            registry_mode: RegistryMode::default(),
        }
    }
}

impl TokenAuthConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.bind_address, self.port).parse()
    }
}

impl ServiceConfig for TokenAuthConfig {
    const PREFIX: &'static str = "TOKEN_AUTH_";

    fn apply_environment_overrides(&mut self, prefix: &str) {
        if let Some(bind_address) = env_override(prefix, "BIND_ADDRESS") {
            self.bind_address = bind_address;
        }
        if let Some(port) = env_override(prefix, "PORT") {
            self.port = port;
        }
        if let Some(path) = env_override::<String>(prefix, "TOKENS_PATH") {
            self.tokens_path = PathBuf::from(path);
        }
        if let Some(mode) = env_override(prefix, "REGISTRY_MODE") {
            self.registry_mode = mode;
        }
    }
}
