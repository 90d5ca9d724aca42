//! Configuration providers.
//!
//! The control loop asks for a configuration snapshot once per iteration;
//! changes therefore take effect on the next iteration only.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::SystemTime;

use tokio::sync::RwLock;
use tracing::{error, info};

use scalegrid_core::{ResourceConfig, ScalerConfig};

/// Boxed future returned by [`ConfigProvider::current`].
pub type ConfigFuture<'a> = Pin<Box<dyn Future<Output = Arc<ScalerConfig>> + Send + 'a>>;

pub trait ConfigProvider: Send + Sync {
    /// Read-only snapshot for the next iteration.
    fn current(&self) -> ConfigFuture<'_>;
}

/// Look up one resource in the provider's current snapshot.
pub async fn resource(provider: &dyn ConfigProvider, resource_id: &str) -> Option<Arc<ResourceConfig>> {
    provider.current().await.resource(resource_id).cloned()
}

// ── Static ───────────────────────────────────────────────────────

/// A configuration fixed at construction.
#[derive(Debug, Clone)]
pub struct StaticConfigProvider {
    config: Arc<ScalerConfig>,
}

impl StaticConfigProvider {
    pub fn new(config: ScalerConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}

impl ConfigProvider for StaticConfigProvider {
    fn current(&self) -> ConfigFuture<'_> {
        Box::pin(async move { self.config.clone() })
    }
}

// ── File ─────────────────────────────────────────────────────────

#[derive(Debug)]
struct Loaded {
    modified: Option<SystemTime>,
    config: Arc<ScalerConfig>,
}

/// Re-reads a TOML file whenever its modification time changes.
///
/// A reload that fails validation is logged and ignored; the previous
/// snapshot stays in effect.
#[derive(Debug)]
pub struct FileConfigProvider {
    path: PathBuf,
    loaded: RwLock<Loaded>,
}

impl FileConfigProvider {
    /// Load the initial configuration. Unlike later reloads, a failure here
    /// is returned to the caller.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let modified = std::fs::metadata(&path).and_then(|m| m.modified()).ok();
        let config = ScalerConfig::from_file(&path)?;
        info!(path = %path.display(), resources = config.resources.len(), "configuration loaded");
        Ok(Self {
            path,
            loaded: RwLock::new(Loaded {
                modified,
                config: Arc::new(config),
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn reload_if_changed(&self) -> Arc<ScalerConfig> {
        let modified = tokio::fs::metadata(&self.path)
            .await
            .and_then(|m| m.modified())
            .ok();

        {
            let loaded = self.loaded.read().await;
            if modified.is_none() || modified == loaded.modified {
                return loaded.config.clone();
            }
        }

        let mut loaded = self.loaded.write().await;
        if modified == loaded.modified {
            return loaded.config.clone();
        }
        // Remember the mtime either way so a broken file is reported once.
        loaded.modified = modified;

        let parsed = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => ScalerConfig::from_toml_str(&content).map_err(anyhow::Error::from),
            Err(e) => Err(anyhow::Error::from(e)),
        };
        match parsed {
            Ok(config) => {
                info!(path = %self.path.display(), resources = config.resources.len(), "configuration reloaded");
                loaded.config = Arc::new(config);
            }
            Err(e) => {
                error!(path = %self.path.display(), error = %e, "configuration reload rejected, keeping previous");
            }
        }
        loaded.config.clone()
    }
}

impl ConfigProvider for FileConfigProvider {
    fn current(&self) -> ConfigFuture<'_> {
        Box::pin(self.reload_if_changed())
    }
}
