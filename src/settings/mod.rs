//! Settings store
//!
//! ## Responsibilities
//!
//! - Single source of truth for runtime configuration
//! - Atomic snapshot swap so readers never observe a torn value
//! - Persistence of edits back to the env file (temp file + rename)
//!
//! Every component calls `current()` on each use, so hot-key edits take
//! effect without a restart. Cold keys (bind address, GPIO pins,
//! storage directory, auth switches) are only read once at startup.

mod file;
mod types;

pub use types::{
    cold_keys, hot_keys, is_known_key, secret_keys, CameraConfig, Settings, CAMERA_COUNT,
};

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Outcome of a settings patch.
#[derive(Debug, Clone, serde::Serialize)]
pub struct UpdateOutcome {
    pub updated_keys: Vec<String>,
    /// Subset of updated keys that only apply after a restart
    pub restart_required: Vec<String>,
}

struct Inner {
    raw: HashMap<String, String>,
    snapshot: Arc<Settings>,
}

/// Settings store backed by an env file at a fixed path.
pub struct SettingsStore {
    path: PathBuf,
    inner: RwLock<Inner>,
}

impl SettingsStore {
    /// Load settings from `path`. A missing file starts the daemon on
    /// defaults; a malformed file is a startup error.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let raw = file::parse_env_file(&path)?;
        if raw.is_empty() {
            tracing::warn!(path = %path.display(), "Env file missing or empty, using defaults");
        }
        let snapshot = Arc::new(Settings::from_map(&raw));
        Ok(Self {
            path,
            inner: RwLock::new(Inner { raw, snapshot }),
        })
    }

    /// The active snapshot. Cheap; callers should not cache it across
    /// long waits.
    pub async fn current(&self) -> Arc<Settings> {
        self.inner.read().await.snapshot.clone()
    }

    /// Re-parse the env file and swap the snapshot.
    pub async fn reload(&self) -> Result<()> {
        let raw = file::parse_env_file(&self.path)?;
        let snapshot = Arc::new(Settings::from_map(&raw));
        let mut inner = self.inner.write().await;
        inner.raw = raw;
        inner.snapshot = snapshot;
        tracing::info!(path = %self.path.display(), "Settings reloaded");
        Ok(())
    }

    /// Merge a patch of recognized keys, persist the file atomically,
    /// then swap the snapshot. The file write is the durability
    /// boundary: if it fails, the old snapshot stays active.
    pub async fn update(&self, patch: HashMap<String, String>) -> Result<UpdateOutcome> {
        if patch.is_empty() {
            return Err(Error::Validation("empty settings patch".to_string()));
        }
        for key in patch.keys() {
            if !is_known_key(key) {
                return Err(Error::Validation(format!("unknown settings key: {}", key)));
            }
        }

        let mut inner = self.inner.write().await;

        let mut merged = inner.raw.clone();
        for (key, value) in &patch {
            merged.insert(key.clone(), value.clone());
        }

        file::write_env_file(&self.path, &merged).await?;

        let snapshot = Arc::new(Settings::from_map(&merged));
        inner.raw = merged;
        inner.snapshot = snapshot;

        let mut updated_keys: Vec<String> = patch.keys().cloned().collect();
        updated_keys.sort();
        let restart_required: Vec<String> = updated_keys
            .iter()
            .filter(|k| cold_keys().contains(&k.as_str()))
            .cloned()
            .collect();

        tracing::info!(
            updated = ?updated_keys,
            restart_required = ?restart_required,
            "Settings updated"
        );

        Ok(UpdateOutcome {
            updated_keys,
            restart_required,
        })
    }

    /// Raw key/value view with secret values masked, for the config API.
    pub async fn redacted(&self) -> serde_json::Value {
        let inner = self.inner.read().await;
        let mut out = serde_json::Map::new();
        let mut keys: Vec<&String> = inner.raw.keys().collect();
        keys.sort();
        for key in keys {
            let value = if secret_keys().contains(&key.as_str()) && !inner.raw[key].is_empty() {
                "****".to_string()
            } else {
                inner.raw[key].clone()
            };
            out.insert(key.clone(), serde_json::Value::String(value));
        }
        serde_json::Value::Object(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn update_persists_and_swaps_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        let store = SettingsStore::load(&path).unwrap();

        assert!(store.current().await.camera_by_tag("r2").unwrap().enabled);

        let mut patch = HashMap::new();
        patch.insert("CAMERA_2_ENABLED".to_string(), "false".to_string());
        patch.insert("BIND_PORT".to_string(), "9000".to_string());
        let outcome = store.update(patch).await.unwrap();

        assert_eq!(outcome.updated_keys.len(), 2);
        assert_eq!(outcome.restart_required, vec!["BIND_PORT".to_string()]);
        assert!(!store.current().await.camera_by_tag("r2").unwrap().enabled);

        // Survives a reload from disk
        let store2 = SettingsStore::load(&path).unwrap();
        assert!(!store2.current().await.camera_by_tag("r2").unwrap().enabled);
        assert_eq!(store2.current().await.bind_port, 9000);
    }

    #[tokio::test]
    async fn unknown_key_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::load(dir.path().join(".env")).unwrap();

        let mut patch = HashMap::new();
        patch.insert("NOT_A_KEY".to_string(), "x".to_string());
        assert!(store.update(patch).await.is_err());
    }

    #[tokio::test]
    async fn secrets_are_redacted() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::load(dir.path().join(".env")).unwrap();

        let mut patch = HashMap::new();
        patch.insert("CAMERA_PASSWORD".to_string(), "hunter2".to_string());
        patch.insert("CAMERA_1_IP".to_string(), "10.1.1.1".to_string());
        store.update(patch).await.unwrap();

        let view = store.redacted().await;
        assert_eq!(view["CAMERA_PASSWORD"], "****");
        assert_eq!(view["CAMERA_1_IP"], "10.1.1.1");
    }
}
