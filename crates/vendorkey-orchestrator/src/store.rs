//! Vendor config store
//!
//! The record is written whole on every save; a failed save leaves the
//! previous record in place.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{OrchestratorError, Result};
use vendorkey_core::{ConfigRecord, VendorKeyConfig};

/// Read/update access to the persisted vendor key record
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn load(&self) -> Result<VendorKeyConfig>;
    async fn save(&self, config: &VendorKeyConfig) -> Result<()>;
}

/// Record held in memory
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    record: RwLock<ConfigRecord>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(record: ConfigRecord) -> Self {
        Self {
            record: RwLock::new(record),
        }
    }

    pub fn with_config(config: &VendorKeyConfig) -> Self {
        Self::with_record(config.to_record())
    }

    /// Raw record as last saved
    pub async fn record(&self) -> ConfigRecord {
        self.record.read().await.clone()
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn load(&self) -> Result<VendorKeyConfig> {
        Ok(VendorKeyConfig::from_record(&*self.record.read().await)?)
    }

    async fn save(&self, config: &VendorKeyConfig) -> Result<()> {
        *self.record.write().await = config.to_record();
        Ok(())
    }
}

/// Record kept as a JSON file
#[derive(Debug, Clone)]
pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Raw record; an absent file is an empty record
    pub async fn read_record(&self) -> Result<ConfigRecord> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => serde_json::from_str(&content)
                .map_err(|e| OrchestratorError::Store(format!("{}: {}", self.path.display(), e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No record at {}, starting empty", self.path.display());
                Ok(ConfigRecord::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Write the raw record via a temp file and rename
    pub async fn write_record(&self, record: &ConfigRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(record)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        info!("Saved vendor record to {}", self.path.display());
        Ok(())
    }
}

#[async_trait]
impl ConfigStore for FileConfigStore {
    async fn load(&self) -> Result<VendorKeyConfig> {
        let record = self.read_record().await?;
        Ok(VendorKeyConfig::from_record(&record)?)
    }

    async fn save(&self, config: &VendorKeyConfig) -> Result<()> {
        self.write_record(&config.to_record()).await
    }
}
