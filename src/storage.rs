//! Key/value storage backends.
//!
//! [`KeyValueStorage`] has the shape of the browser's `localStorage`: string keys,
//! string values, synchronous access. Backends that share one storage area
//! between several handles (tabs) report writes made through *other* handles
//! as [`StorageEvent`]s; a handle never sees its own writes.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::broadcast;

use crate::error::{Error, Result};

const EVENT_CAPACITY: usize = 64;

/// A change made to a shared storage area by another handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    pub key: String,
    /// New value, or `None` when the key was removed.
    pub new_value: Option<String>,
}

pub trait KeyValueStorage: Send + Sync + 'static {
    fn get_item(&self, key: &str) -> Result<Option<String>>;

    fn set_item(&self, key: &str, value: &str) -> Result<()>;

    fn remove_item(&self, key: &str) -> Result<()>;

    /// Changes made through other handles on the same area.
    ///
    /// Backends without cross-handle notification return `None`.
    fn subscribe(&self) -> Option<broadcast::Receiver<StorageEvent>> {
        None
    }
}

struct Area {
    items: Mutex<HashMap<String, String>>,
    tabs: Mutex<Vec<(u64, broadcast::Sender<StorageEvent>)>>,
    next_tab: AtomicU64,
}

impl Area {
    fn items(&self) -> Result<MutexGuard<'_, HashMap<String, String>>> {
        self.items
            .lock()
            .map_err(|_| Error::Storage("storage area lock poisoned".into()))
    }

    fn notify_others(&self, origin: u64, event: StorageEvent) -> Result<()> {
        let tabs = self
            .tabs
            .lock()
            .map_err(|_| Error::Storage("tab registry lock poisoned".into()))?;
        for (id, tx) in tabs.iter().filter(|(id, _)| *id != origin) {
            if tx.send(event.clone()).is_err() {
                tracing::trace!(tab = id, key = %event.key, "No listeners on tab");
            }
        }
        Ok(())
    }
}

/// In-memory storage area. Further handles ("tabs") on the same area come from [`tab`](Self::tab).
pub struct MemoryStorage {
    area: Arc<Area>,
    id: u64,
    events: broadcast::Sender<StorageEvent>,
}

impl MemoryStorage {
    /// Create a fresh, empty storage area with a single handle.
    #[must_use]
    pub fn new() -> Self {
        let area = Arc::new(Area {
            items: Mutex::new(HashMap::new()),
            tabs: Mutex::new(Vec::new()),
            next_tab: AtomicU64::new(0),
        });
        Self::attach(area)
    }

    /// Open another handle on the same area, as a second browser tab would.
    #[must_use]
    pub fn tab(&self) -> Self {
        Self::attach(Arc::clone(&self.area))
    }

    fn attach(area: Arc<Area>) -> Self {
        let id = area.next_tab.fetch_add(1, Ordering::Relaxed);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        if let Ok(mut tabs) = area.tabs.lock() {
            tabs.push((id, events.clone()));
        }
        Self { area, id, events }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MemoryStorage {
    fn drop(&mut self) {
        if let Ok(mut tabs) = self.area.tabs.lock() {
            tabs.retain(|(id, _)| *id != self.id);
        }
    }
}

impl KeyValueStorage for MemoryStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        Ok(self.area.items()?.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        self.area.items()?.insert(key.to_owned(), value.to_owned());
        self.area.notify_others(
            self.id,
            StorageEvent {
                key: key.to_owned(),
                new_value: Some(value.to_owned()),
            },
        )
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        let removed = self.area.items()?.remove(key);
        if removed.is_some() {
            self.area.notify_others(
                self.id,
                StorageEvent {
                    key: key.to_owned(),
                    new_value: None,
                },
            )?;
        }
        Ok(())
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<StorageEvent>> {
        Some(self.events.subscribe())
    }
}

/// One JSON document per key under a directory. Survives restarts; no events.
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    #[must_use]
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_owned(),
        }
    }

    fn path(&self, key: &str) -> PathBuf {
        let file: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{file}.json"))
    }
}

impl KeyValueStorage for FileStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        match std::fs::read_to_string(self.path(key)) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(self.path(key), value)?;
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        match std::fs::remove_file(self.path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_roundtrip() {
        let storage = MemoryStorage::new();
        assert_eq!(storage.get_item("k").unwrap(), None);
        storage.set_item("k", "v").unwrap();
        assert_eq!(storage.get_item("k").unwrap().as_deref(), Some("v"));
        storage.remove_item("k").unwrap();
        assert_eq!(storage.get_item("k").unwrap(), None);
    }

    #[test]
    fn tabs_share_items() {
        let first = MemoryStorage::new();
        let second = first.tab();
        first.set_item("k", "v").unwrap();
        assert_eq!(second.get_item("k").unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn events_reach_other_tabs_only() {
        let first = MemoryStorage::new();
        let second = first.tab();
        let mut own = first.subscribe().unwrap();
        let mut other = second.subscribe().unwrap();

        first.set_item("k", "v").unwrap();

        assert_eq!(
            other.try_recv().unwrap(),
            StorageEvent {
                key: "k".into(),
                new_value: Some("v".into())
            }
        );
        assert!(own.try_recv().is_err());
    }

    #[test]
    fn removing_missing_key_is_silent() {
        let first = MemoryStorage::new();
        let second = first.tab();
        let mut other = second.subscribe().unwrap();
        first.remove_item("missing").unwrap();
        assert!(other.try_recv().is_err());
    }

    #[test]
    fn file_storage_roundtrip() {
        let dir = std::env::temp_dir().join(format!(
            "course-session-test-{}-{}",
            std::process::id(),
            line!()
        ));
        let storage = FileStorage::new(&dir);
        assert_eq!(storage.get_item("staff_session").unwrap(), None);
        storage.set_item("staff_session", "{}").unwrap();
        assert_eq!(
            storage.get_item("staff_session").unwrap().as_deref(),
            Some("{}")
        );
        storage.remove_item("staff_session").unwrap();
        storage.remove_item("staff_session").unwrap();
        assert_eq!(storage.get_item("staff_session").unwrap(), None);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn file_storage_sanitizes_keys() {
        let storage = FileStorage::new("/tmp/x");
        assert_eq!(
            storage.path("../etc/passwd"),
            PathBuf::from("/tmp/x/___etc_passwd.json")
        );
    }
}
