//! Key-vault backends.
//!
//! The JSON file layout is an object keyed by content identifier. A value is
//! either a bare key string (legacy layout: standard delivery, display name =
//! identifier) or a full record:
//!
//! ```json
//! {
//!   "QmSeyg...": "q0vJ...=",
//!   "QmXk9a...": {
//!     "display_name": "Corn Disease Set",
//!     "delivery_mode": "COMPUTE_PRIVACY",
//!     "decryption_key": "Zm9v...=",
//!     "algorithm_id": "dataset_summary"
//!   }
//! }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::catalog::{AssetRecord, DeliveryMode, KeyVault, VaultError};
use crate::content::ContentId;

/// In-memory vault backed by a concurrent map.
#[derive(Debug, Default)]
pub struct MemoryVault {
    records: DashMap<ContentId, AssetRecord>,
}

impl MemoryVault {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: impl IntoIterator<Item = AssetRecord>) -> Self {
        let vault = Self::new();
        for record in records {
            vault.insert(record);
        }
        vault
    }

    /// Insert or replace the record for its content identifier.
    pub fn insert(&self, record: AssetRecord) {
        self.records.insert(record.content_id.clone(), record);
    }
}

impl KeyVault for MemoryVault {
    fn lookup(&self, content_id: &ContentId) -> Result<Option<AssetRecord>, VaultError> {
        Ok(self.records.get(content_id).map(|r| r.value().clone()))
    }

    fn len_hint(&self) -> Option<usize> {
        Some(self.records.len())
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum FileEntry {
    Key(String),
    Record(FileRecord),
}

#[derive(Debug, Serialize, Deserialize)]
struct FileRecord {
    display_name: String,
    #[serde(default = "default_mode")]
    delivery_mode: DeliveryMode,
    decryption_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    algorithm_id: Option<String>,
}

fn default_mode() -> DeliveryMode {
    DeliveryMode::Standard
}

/// Size and modification time of the vault file, `None` when it is absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    modified: Option<SystemTime>,
    len: u64,
}

fn file_stamp(path: &Path) -> Option<FileStamp> {
    std::fs::metadata(path).ok().map(|m| FileStamp {
        modified: m.modified().ok(),
        len: m.len(),
    })
}

/// Vault loaded from a JSON file and held in memory.
///
/// Other processes (`seal register`) may rewrite the file while the server
/// runs; a lookup miss re-reads it when its size or mtime changed.
pub struct JsonFileVault {
    path: PathBuf,
    records: RwLock<HashMap<ContentId, AssetRecord>>,
    stamp: Mutex<Option<FileStamp>>,
}

impl JsonFileVault {
    /// Load the vault file. A missing file yields an empty vault.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, VaultError> {
        let path = path.as_ref().to_path_buf();
        // Stamp first: a write racing the read shows up as a change later
        let stamp = file_stamp(&path);
        let records = read_records(&path)?;
        tracing::info!("Catalog loaded from {} ({} assets)", path.display(), records.len());
        Ok(Self {
            path,
            records: RwLock::new(records),
            stamp: Mutex::new(stamp),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the file, replacing the in-memory view. Returns the record count.
    pub fn reload(&self) -> Result<usize, VaultError> {
        let stamp = file_stamp(&self.path);
        let records = read_records(&self.path)?;
        let count = records.len();
        *self.write_guard()? = records;
        self.set_stamp(stamp)?;
        tracing::info!("Catalog reloaded from {} ({} assets)", self.path.display(), count);
        Ok(count)
    }

    /// Reload only if the file changed since it was last read or written.
    pub fn reload_if_changed(&self) -> Result<bool, VaultError> {
        let current = file_stamp(&self.path);
        let known = *self
            .stamp
            .lock()
            .map_err(|e| VaultError::Unavailable(format!("catalog lock poisoned: {}", e)))?;
        if current == known {
            return Ok(false);
        }
        self.reload()?;
        Ok(true)
    }

    fn set_stamp(&self, stamp: Option<FileStamp>) -> Result<(), VaultError> {
        *self
            .stamp
            .lock()
            .map_err(|e| VaultError::Unavailable(format!("catalog lock poisoned: {}", e)))? = stamp;
        Ok(())
    }

    /// Insert or replace a record in memory. Call [`JsonFileVault::save`] to persist.
    pub fn insert(&self, record: AssetRecord) -> Result<(), VaultError> {
        self.write_guard()?.insert(record.content_id.clone(), record);
        Ok(())
    }

    /// Write the vault back to disk (temp file + rename).
    pub fn save(&self) -> Result<(), VaultError> {
        let entries: BTreeMap<String, FileEntry> = self
            .read_guard()?
            .values()
            .map(|r| {
                (
                    r.content_id.to_string(),
                    FileEntry::Record(FileRecord {
                        display_name: r.display_name.clone(),
                        delivery_mode: r.delivery_mode,
                        decryption_key: r.decryption_key.clone(),
                        algorithm_id: r.algorithm_id.clone(),
                    }),
                )
            })
            .collect();
        let json = serde_json::to_vec_pretty(&entries).map_err(|e| VaultError::Parse(e.to_string()))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut tmp = self.path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        self.set_stamp(file_stamp(&self.path))
    }

    fn read_guard(
        &self,
    ) -> Result<std::sync::RwLockReadGuard<'_, HashMap<ContentId, AssetRecord>>, VaultError> {
        self.records
            .read()
            .map_err(|e| VaultError::Unavailable(format!("catalog lock poisoned: {}", e)))
    }

    fn write_guard(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<ContentId, AssetRecord>>, VaultError> {
        self.records
            .write()
            .map_err(|e| VaultError::Unavailable(format!("catalog lock poisoned: {}", e)))
    }
}

impl KeyVault for JsonFileVault {
    fn lookup(&self, content_id: &ContentId) -> Result<Option<AssetRecord>, VaultError> {
        if let Some(record) = self.read_guard()?.get(content_id).cloned() {
            return Ok(Some(record));
        }
        if !self.reload_if_changed()? {
            return Ok(None);
        }
        Ok(self.read_guard()?.get(content_id).cloned())
    }

    fn len_hint(&self) -> Option<usize> {
        self.read_guard().ok().map(|r| r.len())
    }
}

/// Spawn a background task that re-reads the catalog file whenever it changes.
///
/// Checks every `interval`; the lookup-miss path covers new assets in between,
/// this task also picks up edited and removed ones.
pub fn spawn_catalog_reload(vault: Arc<JsonFileVault>, interval: Duration) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;

            let vault_clone = vault.clone();
            match tokio::task::spawn_blocking(move || vault_clone.reload_if_changed()).await {
                Ok(Ok(true)) => tracing::debug!("Catalog change picked up"),
                Ok(Ok(false)) => {}
                Ok(Err(e)) => tracing::error!("Catalog reload error: {}", e),
                Err(e) => tracing::error!("Catalog reload task join error: {}", e),
            }
        }
    });
}

fn read_records(path: &Path) -> Result<HashMap<ContentId, AssetRecord>, VaultError> {
    let raw = match std::fs::read(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!("Catalog file {} not found, starting empty", path.display());
            return Ok(HashMap::new());
        }
        Err(e) => return Err(e.into()),
    };

    let entries: BTreeMap<String, FileEntry> =
        serde_json::from_slice(&raw).map_err(|e| VaultError::Parse(e.to_string()))?;

    let mut records = HashMap::with_capacity(entries.len());
    for (key, entry) in entries {
        let content_id = match ContentId::parse(&key) {
            Ok(cid) => cid,
            Err(e) => {
                tracing::warn!("Skipping catalog entry: {}", e);
                continue;
            }
        };
        let record = match entry {
            FileEntry::Key(decryption_key) => AssetRecord {
                display_name: content_id.to_string(),
                content_id: content_id.clone(),
                delivery_mode: DeliveryMode::Standard,
                decryption_key,
                algorithm_id: None,
            },
            FileEntry::Record(r) => AssetRecord {
                content_id: content_id.clone(),
                display_name: r.display_name,
                delivery_mode: r.delivery_mode,
                decryption_key: r.decryption_key,
                algorithm_id: r.algorithm_id,
            },
        };
        records.insert(content_id, record);
    }
    Ok(records)
}
