use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::storage::KeyValueStorage;
use crate::types::StaffProfile;

/// Storage key under which the staff session is persisted.
pub const DEFAULT_STORAGE_KEY: &str = "staff_session";

/// Wall-clock source in epoch milliseconds.
pub trait Clock: Send + Sync + 'static {
    fn now_millis(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        let nanos = time::OffsetDateTime::now_utc().unix_timestamp_nanos();
        i64::try_from(nanos / 1_000_000).unwrap_or(i64::MAX)
    }
}

/// Settable clock for tests and replay.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicI64>,
}

impl ManualClock {
    #[must_use]
    pub fn new(now_millis: i64) -> Self {
        Self {
            now: Arc::new(AtomicI64::new(now_millis)),
        }
    }

    pub fn set(&self, now_millis: i64) {
        self.now.store(now_millis, Ordering::SeqCst);
    }

    pub fn advance(&self, millis: i64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Persisted staff credential bundle. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaffSessionRecord {
    pub token: String,
    pub user: StaffProfile,
    /// Epoch milliseconds.
    pub expires_at: i64,
}

impl StaffSessionRecord {
    #[must_use]
    pub fn new(token: impl Into<String>, user: StaffProfile, expires_at: i64) -> Self {
        Self {
            token: token.into(),
            user,
            expires_at,
        }
    }

    /// A record whose expiry is at or before `now_millis` is expired.
    #[must_use]
    pub fn is_expired_at(&self, now_millis: i64) -> bool {
        self.expires_at <= now_millis
    }
}

/// The staff session record in key/value storage.
///
/// Malformed data is never surfaced to the caller: it is logged, deleted, and
/// reported as "no session".
#[derive(Clone)]
pub struct LocalSessionStore {
    storage: Arc<dyn KeyValueStorage>,
    key: String,
    clock: Arc<dyn Clock>,
}

impl LocalSessionStore {
    #[must_use]
    pub fn new(
        storage: Arc<dyn KeyValueStorage>,
        key: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            storage,
            key: key.into(),
            clock,
        }
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Persist `record`. Expiry is not checked here.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be serialized or the backend
    /// rejects the write.
    pub fn write(&self, record: &StaffSessionRecord) -> Result<()> {
        let json = serde_json::to_string(record)?;
        self.storage.set_item(&self.key, &json)?;
        tracing::debug!(key = %self.key, staff_id = %record.user.id, "Staff session written");
        Ok(())
    }

    /// Read the raw record, expired or not.
    #[must_use]
    pub fn read(&self) -> Option<StaffSessionRecord> {
        let raw = match self.storage.get_item(&self.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(key = %self.key, error = %e, "Failed to read staff session");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!(key = %self.key, error = %e, "Discarding malformed staff session");
                if let Err(e) = self.storage.remove_item(&self.key) {
                    tracing::warn!(key = %self.key, error = %e, "Failed to remove malformed staff session");
                }
                None
            }
        }
    }

    /// Read the record, purging it if it has expired.
    #[must_use]
    pub fn read_valid(&self) -> Option<StaffSessionRecord> {
        let record = self.read()?;
        if self.is_expired(&record) {
            tracing::info!(key = %self.key, expires_at = record.expires_at, "Purging expired staff session");
            if let Err(e) = self.clear() {
                tracing::warn!(key = %self.key, error = %e, "Failed to purge expired staff session");
            }
            return None;
        }
        Some(record)
    }

    /// Remove the record unconditionally.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend rejects the removal.
    pub fn clear(&self) -> Result<()> {
        self.storage.remove_item(&self.key)
    }

    #[must_use]
    pub fn is_expired(&self, record: &StaffSessionRecord) -> bool {
        record.is_expired_at(self.clock.now_millis())
    }
}
