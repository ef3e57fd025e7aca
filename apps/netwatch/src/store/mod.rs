//! File-backed configuration store.
//!
//! The whole document is rewritten on every edit (load, modify, store).
//! Monitoring sessions never read the store directly, they get a
//! [`ConfigSnapshot`] taken before they start.

mod types;

pub use types::{ConfigSnapshot, ServerMap, ServiceConfig, ServiceMap};

use std::path::{Path, PathBuf};
use std::{fs, io};
use thiserror::Error;
use tracing::{debug, info};

use crate::monitoring::Protocol;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to read store {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("Failed to write store {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
    #[error("Store {path} is not valid JSON: {source}")]
    Parse { path: PathBuf, source: serde_json::Error },
    #[error("Failed to serialize store: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Server '{0}' is not configured")]
    UnknownServer(String),
    #[error("Server '{target}' has no {protocol} service")]
    UnknownService { target: String, protocol: Protocol },
    #[error("Server '{target}' already has a {protocol} service")]
    DuplicateService { target: String, protocol: Protocol },
}

pub struct ConfigStore {
    path: PathBuf,
    servers: ServerMap,
}

impl ConfigStore {
    /// Load the store at `path`; a missing file is an empty store
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();

        let servers = match fs::read_to_string(&path) {
            Ok(raw) if raw.trim().is_empty() => ServerMap::new(),
            Ok(raw) => serde_json::from_str(&raw)
                .map_err(|source| StoreError::Parse { path: path.clone(), source })?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "store file missing, starting empty");
                ServerMap::new()
            }
            Err(source) => return Err(StoreError::Read { path, source }),
        };

        Ok(Self { path, servers })
    }

    /// Rewrite the whole document through a sibling temp file
    fn write(&self, servers: &ServerMap) -> Result<(), StoreError> {
        let raw = serde_json::to_string_pretty(servers)?;
        let write_err = |source| StoreError::Write { path: self.path.clone(), source };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(write_err)?;
        }

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, raw).map_err(write_err)?;
        fs::rename(&tmp, &self.path).map_err(write_err)?;

        debug!(path = %self.path.display(), servers = servers.len(), "store saved");
        Ok(())
    }

    /// Persist `servers`; memory only changes once the file has been written
    fn commit(&mut self, servers: ServerMap) -> Result<(), StoreError> {
        self.write(&servers)?;
        self.servers = servers;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn servers(&self) -> &ServerMap {
        &self.servers
    }

    pub fn snapshot(&self) -> ConfigSnapshot {
        ConfigSnapshot::new(self.servers.clone())
    }

    pub fn add_service(
        &mut self,
        target: &str,
        protocol: Protocol,
        service: ServiceConfig,
    ) -> Result<(), StoreError> {
        let mut servers = self.servers.clone();
        let services = servers.entry(target.to_string()).or_default();
        if services.contains_key(protocol.as_str()) {
            return Err(StoreError::DuplicateService { target: target.to_string(), protocol });
        }

        services.insert(protocol.as_str().to_string(), service);
        self.commit(servers)?;

        info!(server = target, %protocol, "service added");
        Ok(())
    }

    pub fn edit_service(
        &mut self,
        target: &str,
        protocol: Protocol,
        service: ServiceConfig,
    ) -> Result<(), StoreError> {
        let mut servers = self.servers.clone();
        let services = servers
            .get_mut(target)
            .ok_or_else(|| StoreError::UnknownServer(target.to_string()))?;
        let slot = services
            .get_mut(protocol.as_str())
            .ok_or_else(|| StoreError::UnknownService { target: target.to_string(), protocol })?;

        *slot = service;
        self.commit(servers)?;

        info!(server = target, %protocol, "service updated");
        Ok(())
    }

    /// Remove one service; the server goes too when it was its last service
    pub fn delete_service(&mut self, target: &str, protocol: Protocol) -> Result<(), StoreError> {
        let mut servers = self.servers.clone();
        let services = servers
            .get_mut(target)
            .ok_or_else(|| StoreError::UnknownServer(target.to_string()))?;

        if services.remove(protocol.as_str()).is_none() {
            return Err(StoreError::UnknownService { target: target.to_string(), protocol });
        }
        if services.is_empty() {
            servers.remove(target);
        }
        self.commit(servers)?;

        info!(server = target, %protocol, "service deleted");
        Ok(())
    }

    pub fn delete_server(&mut self, target: &str) -> Result<(), StoreError> {
        let mut servers = self.servers.clone();
        if servers.remove(target).is_none() {
            return Err(StoreError::UnknownServer(target.to_string()));
        }
        self.commit(servers)?;

        info!(server = target, "server deleted");
        Ok(())
    }
}
