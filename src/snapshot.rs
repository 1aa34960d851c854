//! Local filesystem snapshot store
//!
//! Write-through cache and disaster fallback for config values and server
//! lists. The store is advisory: every failure is reported on the error
//! stream and swallowed, so snapshot trouble can never break a read path.

use std::path::PathBuf;

use futures::future::join_all;
use tokio::fs;
use tracing::debug;

use crate::constants::DEFAULT_TENANT_DIR;
use crate::error::DiamondError;
use crate::events::ErrorSink;

/// Key→string store rooted at `<cache_dir>/snapshot`.
///
/// Keys are `/`-separated relative paths; they are re-joined with the
/// platform separator on disk. Directories are created on demand.
pub struct SnapshotStore {
    base: PathBuf,
    sink: ErrorSink,
}

impl SnapshotStore {
    pub fn new(cache_dir: impl Into<PathBuf>, sink: ErrorSink) -> Self {
        Self {
            base: cache_dir.into().join("snapshot"),
            sink,
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let mut path = self.base.clone();
        for part in key.split('/') {
            path.push(part);
        }
        path
    }

    /// Read a snapshot. "Missing" and "failed read" are both `None`;
    /// only the latter is reported.
    pub async fn get(&self, key: &str) -> Option<String> {
        match fs::read_to_string(self.path_for(key)).await {
            Ok(content) => Some(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                self.sink.emit(DiamondError::SnapshotRead {
                    key: key.to_string(),
                    source: e,
                });
                None
            }
        }
    }

    /// Persist a value (empty string for `None`). Failures are reported,
    /// never returned.
    pub async fn save(&self, key: &str, value: Option<&str>) {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            if let Err(e) = fs::create_dir_all(parent).await {
                self.sink.emit(DiamondError::SnapshotWrite {
                    key: key.to_string(),
                    source: e,
                });
                return;
            }
        }
        if let Err(e) = fs::write(&path, value.unwrap_or("")).await {
            self.sink.emit(DiamondError::SnapshotWrite {
                key: key.to_string(),
                source: e,
            });
        } else {
            debug!(key, "snapshot saved");
        }
    }

    /// Remove a snapshot file. Missing files are fine.
    pub async fn delete(&self, key: &str) {
        match fs::remove_file(self.path_for(key)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                self.sink.emit(DiamondError::SnapshotDelete {
                    key: key.to_string(),
                    source: e,
                });
            }
        }
    }

    /// Save many entries concurrently; each failure is reported on its own.
    pub async fn batch_save(&self, entries: Vec<(String, String)>) {
        join_all(
            entries
                .iter()
                .map(|(key, value)| self.save(key, Some(value.as_str()))),
        )
        .await;
    }
}

/// Snapshot key of one config value.
pub fn config_key(unit: &str, tenant: &str, group: &str, data_id: &str) -> String {
    let tenant_dir = if tenant.is_empty() {
        DEFAULT_TENANT_DIR
    } else {
        tenant
    };
    format!("config/{}/{}/{}/{}", unit, tenant_dir, group, data_id)
}

/// Snapshot key of one unit's server list.
pub fn server_list_key(unit: &str) -> String {
    format!("server_list/{}", unit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> SnapshotStore {
        let (sink, _rx) = ErrorSink::channel();
        SnapshotStore::new(dir.path(), sink)
    }

    #[test]
    fn test_config_key_layout() {
        assert_eq!(
            config_key("hz", "tenant-a", "DEFAULT_GROUP", "app.properties"),
            "config/hz/tenant-a/DEFAULT_GROUP/app.properties"
        );
        assert_eq!(
            config_key("hz", "", "g", "d"),
            "config/hz/default_tenant/g/d"
        );
        assert_eq!(server_list_key("sh"), "server_list/sh");
    }

    #[tokio::test]
    async fn test_save_and_get() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let key = config_key("hz", "t", "g", "d");
        store.save(&key, Some("hello")).await;
        assert_eq!(store.get(&key).await, Some("hello".to_string()));

        // Files live under <root>/snapshot with native separators.
        assert!(dir
            .path()
            .join("snapshot")
            .join("config")
            .join("hz")
            .join("t")
            .join("g")
            .join("d")
            .is_file());
    }

    #[tokio::test]
    async fn test_missing_key_is_none() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        assert_eq!(store.get("config/hz/t/g/absent").await, None);
    }

    #[tokio::test]
    async fn test_save_none_writes_empty() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.save("config/hz/t/g/d", None).await;
        assert_eq!(store.get("config/hz/t/g/d").await, Some(String::new()));
    }

    #[tokio::test]
    async fn test_delete() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.save("server_list/hz", Some("[\"h1\"]")).await;
        store.delete("server_list/hz").await;
        assert_eq!(store.get("server_list/hz").await, None);

        // Deleting again is a no-op, not an error event.
        store.delete("server_list/hz").await;
    }

    #[tokio::test]
    async fn test_batch_save() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store
            .batch_save(vec![
                ("config/hz/t/g/a".to_string(), "1".to_string()),
                ("config/hz/t/g/b".to_string(), "2".to_string()),
            ])
            .await;
        assert_eq!(store.get("config/hz/t/g/a").await, Some("1".to_string()));
        assert_eq!(store.get("config/hz/t/g/b").await, Some("2".to_string()));
    }
}
