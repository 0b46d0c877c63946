//! Module registry
//!
//! Modules that fix a one-time condition (a completed data migration, say)
//! can ask to be removed after a clean commit run. The registry remembers
//! which module names have been removed so later runs skip them.
//!
//! `FileRegistry` persists the set as JSON:
//!
//! ```json
//! { "deregistered": ["unpack-acl-node-refs"] }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Registry I/O error: {0}")]
    Io(String),

    #[error("Registry parse error: {0}")]
    Parse(String),
}

/// Tracks which modules are still active
pub trait ModuleRegistry: Send + Sync {
    fn is_registered(&self, name: &str) -> bool;

    /// Remove a module from future runs
    fn deregister(&mut self, name: &str) -> Result<(), RegistryError>;

    /// Put a removed module back
    fn reregister(&mut self, name: &str) -> Result<(), RegistryError>;

    /// Names removed so far, sorted
    fn deregistered(&self) -> Vec<String>;
}

/// In-process registry, forgotten when dropped
#[derive(Debug, Clone, Default)]
pub struct MemoryRegistry {
    removed: BTreeSet<String>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ModuleRegistry for MemoryRegistry {
    fn is_registered(&self, name: &str) -> bool {
        !self.removed.contains(name)
    }

    fn deregister(&mut self, name: &str) -> Result<(), RegistryError> {
        self.removed.insert(name.to_string());
        Ok(())
    }

    fn reregister(&mut self, name: &str) -> Result<(), RegistryError> {
        self.removed.remove(name);
        Ok(())
    }

    fn deregistered(&self) -> Vec<String> {
        self.removed.iter().cloned().collect()
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    deregistered: BTreeSet<String>,
}

/// Registry persisted to a JSON file, written on every change
#[derive(Debug)]
pub struct FileRegistry {
    path: PathBuf,
    state: RegistryFile,
}

impl FileRegistry {
    /// Load the registry, starting empty if the file does not exist yet
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, RegistryError> {
        let path = path.into();
        let state = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| RegistryError::Io(format!("{}: {}", path.display(), e)))?;
            serde_json::from_str(&contents)
                .map_err(|e| RegistryError::Parse(format!("{}: {}", path.display(), e)))?
        } else {
            RegistryFile::default()
        };
        Ok(Self { path, state })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self) -> Result<(), RegistryError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| RegistryError::Io(format!("{}: {}", parent.display(), e)))?;
            }
        }
        let json = serde_json::to_string_pretty(&self.state)
            .map_err(|e| RegistryError::Parse(e.to_string()))?;
        std::fs::write(&self.path, json)
            .map_err(|e| RegistryError::Io(format!("{}: {}", self.path.display(), e)))
    }
}

impl ModuleRegistry for FileRegistry {
    fn is_registered(&self, name: &str) -> bool {
        !self.state.deregistered.contains(name)
    }

    fn deregister(&mut self, name: &str) -> Result<(), RegistryError> {
        if self.state.deregistered.insert(name.to_string()) {
            self.save()?;
            tracing::info!(module = name, path = %self.path.display(), "module deregistered");
        }
        Ok(())
    }

    fn reregister(&mut self, name: &str) -> Result<(), RegistryError> {
        if self.state.deregistered.remove(name) {
            self.save()?;
        }
        Ok(())
    }

    fn deregistered(&self) -> Vec<String> {
        self.state.deregistered.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn memory_registry_round_trip() {
        let mut registry = MemoryRegistry::new();
        assert!(registry.is_registered("a"));
        registry.deregister("a").unwrap();
        assert!(!registry.is_registered("a"));
        registry.reregister("a").unwrap();
        assert!(registry.is_registered("a"));
    }

    #[test]
    fn file_registry_persists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state").join("registry.json");

        let mut registry = FileRegistry::open(&path).unwrap();
        assert!(registry.is_registered("unpack"));
        registry.deregister("unpack").unwrap();

        let reopened = FileRegistry::open(&path).unwrap();
        assert!(!reopened.is_registered("unpack"));
        assert_eq!(reopened.deregistered(), vec!["unpack".to_string()]);
    }

    #[test]
    fn file_registry_rejects_garbage() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("registry.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(FileRegistry::open(&path), Err(RegistryError::Parse(_))));
    }
}
