use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tokio::fs;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to read token registry {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse token registry: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Registry entry a token resolves to.
///
/// `expires` is kept as written so that a malformed date only affects
/// lookups of this record, not the whole registry load.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IdentityRecord {
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub expires: String,
}

/// Immutable mapping of token string to identity record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TokenRegistry {
    #[serde(default)]
    tokens: HashMap<String, IdentityRecord>,
}

impl TokenRegistry {
    pub fn new(tokens: HashMap<String, IdentityRecord>) -> Self {
        Self { tokens }
    }

    pub fn from_slice(raw: &[u8]) -> Result<Self, RegistryError> {
        Ok(serde_yaml::from_slice(raw)?)
    }

    /// Exact, case-sensitive lookup.
    pub fn get(&self, token: &str) -> Option<&IdentityRecord> {
        self.tokens.get(token)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// Where a [`TokenRegistry`] comes from.
#[async_trait]
pub trait RegistrySource: Send + Sync {
    async fn load(&self) -> Result<Arc<TokenRegistry>, RegistryError>;

    /// Re-read the underlying source and return the number of tokens it
    /// holds. Sources without retained state only verify that it loads.
    async fn reload(&self) -> Result<usize, RegistryError> {
        Ok(self.load().await?.len())
    }
}

/// Reads the YAML registry from disk on every call.
#[derive(Debug, Clone)]
pub struct FileRegistrySource {
    path: PathBuf,
}

impl FileRegistrySource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl RegistrySource for FileRegistrySource {
    async fn load(&self) -> Result<Arc<TokenRegistry>, RegistryError> {
        let bytes = fs::read(&self.path)
            .await
            .map_err(|source| RegistryError::Io {
                path: self.path.clone(),
                source,
            })?;
        let registry = TokenRegistry::from_slice(&bytes)?;
        Ok(Arc::new(registry))
    }
}

/// In-memory registry, mostly useful in tests.
#[derive(Debug, Clone, Default)]
pub struct StaticRegistrySource {
    registry: Arc<TokenRegistry>,
}

impl StaticRegistrySource {
    pub fn new(registry: TokenRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }
}

#[async_trait]
impl RegistrySource for StaticRegistrySource {
    async fn load(&self) -> Result<Arc<TokenRegistry>, RegistryError> {
        Ok(self.registry.clone())
    }
}

/// Holds one loaded registry and swaps it wholesale on [`reload`].
///
/// A failed reload leaves the previously loaded registry in place.
///
/// [`reload`]: RegistrySource::reload
pub struct CachedRegistry {
    inner: Arc<dyn RegistrySource>,
    current: RwLock<Arc<TokenRegistry>>,
}

impl CachedRegistry {
    pub async fn new(inner: Arc<dyn RegistrySource>) -> Result<Self, RegistryError> {
        let registry = inner.load().await?;
        Ok(Self {
            inner,
            current: RwLock::new(registry),
        })
    }

    fn snapshot(&self) -> Arc<TokenRegistry> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl RegistrySource for CachedRegistry {
    async fn load(&self) -> Result<Arc<TokenRegistry>, RegistryError> {
        Ok(self.snapshot())
    }

    async fn reload(&self) -> Result<usize, RegistryError> {
        let fresh = self.inner.load().await?;
        let count = fresh.len();
        *self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = fresh;
        Ok(count)
    }
}
