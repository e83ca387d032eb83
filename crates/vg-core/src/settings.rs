//! Per-target persisted settings
//!
//! Two flags survive restarts for every target: whether the user approved
//! retrying without the transport trust check, and whether automatic
//! reconnection is disabled. Credentials are never stored here.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::SettingsError;
use crate::types::TargetId;

/// Persisted flags for one target
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetSettings {
    /// `None` until the user has been asked
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insecure_approved: Option<bool>,
    /// Automatic reconnection is off for this target
    pub reconnect_disabled: bool,
}

/// Storage for per-target flags
pub trait SettingsStore: Send + Sync {
    /// Whether an insecure retry was approved; `None` if never decided
    fn insecure_approved(&self, id: &TargetId) -> Option<bool>;

    /// Record the insecure retry decision
    fn set_insecure_approved(&self, id: &TargetId, approved: bool) -> Result<(), SettingsError>;

    /// Whether automatic reconnection is disabled
    fn reconnect_disabled(&self, id: &TargetId) -> bool;

    /// Enable or disable automatic reconnection
    fn set_reconnect_disabled(&self, id: &TargetId, disabled: bool) -> Result<(), SettingsError>;

    /// Drop everything stored for a target
    fn forget(&self, id: &TargetId) -> Result<(), SettingsError>;
}

/// Settings kept only for the lifetime of the process
#[derive(Debug, Default)]
pub struct MemorySettings {
    entries: DashMap<String, TargetSettings>,
}

impl MemorySettings {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the settings for a target
    pub fn get(&self, id: &TargetId) -> TargetSettings {
        self.entries
            .get(&id.storage_key())
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

impl SettingsStore for MemorySettings {
    fn insecure_approved(&self, id: &TargetId) -> Option<bool> {
        self.get(id).insecure_approved
    }

    fn set_insecure_approved(&self, id: &TargetId, approved: bool) -> Result<(), SettingsError> {
        self.entries
            .entry(id.storage_key())
            .or_default()
            .insecure_approved = Some(approved);
        Ok(())
    }

    fn reconnect_disabled(&self, id: &TargetId) -> bool {
        self.get(id).reconnect_disabled
    }

    fn set_reconnect_disabled(&self, id: &TargetId, disabled: bool) -> Result<(), SettingsError> {
        self.entries
            .entry(id.storage_key())
            .or_default()
            .reconnect_disabled = disabled;
        Ok(())
    }

    fn forget(&self, id: &TargetId) -> Result<(), SettingsError> {
        self.entries.remove(&id.storage_key());
        Ok(())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct SettingsFile {
    #[serde(default)]
    targets: BTreeMap<String, TargetSettings>,
}

/// Settings persisted to a TOML file, rewritten on every change
#[derive(Debug)]
pub struct FileSettings {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, TargetSettings>>,
}

impl FileSettings {
    /// Open the settings file, starting empty if it does not exist yet
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SettingsError> {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(content) => toml::from_str::<SettingsFile>(&content)?.targets,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => return Err(SettingsError::Io { path, source }),
        };

        tracing::debug!("Loaded settings for {} targets from {:?}", entries.len(), path);

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    /// Location of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self, id: &TargetId) -> TargetSettings {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.get(&id.storage_key()).cloned().unwrap_or_default()
    }

    fn update(
        &self,
        id: &TargetId,
        apply: impl FnOnce(&mut BTreeMap<String, TargetSettings>, String),
    ) -> Result<(), SettingsError> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        apply(&mut entries, id.storage_key());

        let content = toml::to_string_pretty(&SettingsFile {
            targets: entries.clone(),
        })?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| SettingsError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(&self.path, content).map_err(|source| SettingsError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

impl SettingsStore for FileSettings {
    fn insecure_approved(&self, id: &TargetId) -> Option<bool> {
        self.read(id).insecure_approved
    }

    fn set_insecure_approved(&self, id: &TargetId, approved: bool) -> Result<(), SettingsError> {
        self.update(id, |entries, key| {
            entries.entry(key).or_default().insecure_approved = Some(approved);
        })
    }

    fn reconnect_disabled(&self, id: &TargetId) -> bool {
        self.read(id).reconnect_disabled
    }

    fn set_reconnect_disabled(&self, id: &TargetId, disabled: bool) -> Result<(), SettingsError> {
        self.update(id, |entries, key| {
            entries.entry(key).or_default().reconnect_disabled = disabled;
        })
    }

    fn forget(&self, id: &TargetId) -> Result<(), SettingsError> {
        self.update(id, |entries, key| {
            entries.remove(&key);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::TargetAddress;
    use tempfile::TempDir;

    fn id(conn: &str) -> TargetId {
        TargetId::new(TargetAddress::parse(conn).unwrap(), None)
    }

    #[test]
    fn test_memory_settings_defaults() {
        let store = MemorySettings::new();
        let target = id("db-1:9010");
        assert_eq!(store.insecure_approved(&target), None);
        assert!(!store.reconnect_disabled(&target));

        store.set_reconnect_disabled(&target, true).unwrap();
        store.set_insecure_approved(&target, false).unwrap();
        assert!(store.reconnect_disabled(&target));
        assert_eq!(store.insecure_approved(&target), Some(false));

        store.forget(&target).unwrap();
        assert_eq!(store.get(&target), TargetSettings::default());
    }

    #[test]
    fn test_file_settings_persist_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("settings.toml");
        let target = id("db-1:9010");
        let other = id("db-2:9010");

        {
            let store = FileSettings::open(&path).unwrap();
            store.set_insecure_approved(&target, true).unwrap();
            store.set_reconnect_disabled(&other, true).unwrap();
        }

        let store = FileSettings::open(&path).unwrap();
        assert_eq!(store.insecure_approved(&target), Some(true));
        assert!(!store.reconnect_disabled(&target));
        assert!(store.reconnect_disabled(&other));
        assert_eq!(store.insecure_approved(&other), None);
    }

    #[test]
    fn test_file_settings_forget() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.toml");
        let target = id("db-1:9010");

        let store = FileSettings::open(&path).unwrap();
        store.set_reconnect_disabled(&target, true).unwrap();
        store.forget(&target).unwrap();

        let reopened = FileSettings::open(&path).unwrap();
        assert!(!reopened.reconnect_disabled(&target));
    }

    #[test]
    fn test_file_settings_rejects_corrupt_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "targets = 5").unwrap();
        assert!(matches!(FileSettings::open(&path), Err(SettingsError::Parse(_))));
    }
}
