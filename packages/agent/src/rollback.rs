//! Pre-apply config snapshots, used to recover a section if its apply fails
//! or the process crashes mid-apply.
//!
//! One record per section, at `<base_dir>/rollback/<section>.bin`. The
//! `.bin` extension is the wire format's own naming choice — the content is
//! JSON. Writes are atomic (temp file + rename) for the same crash-safety
//! reason `mode.rs` uses that pattern for `mode.json`. A record's `pending`
//! flag is `true` from the moment a snapshot is taken until the apply it
//! guards reaches a terminal outcome (success or failure, rollback attempted
//! either way); a `pending = true` record found at startup means the
//! process died mid-apply and the operator should be told.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use ngfw_protocol::ConfigSection;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::PersistenceError;

const ROLLBACK_SUBDIR: &str = "rollback";

/// A section's pre-apply snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackRecord {
    pub section: ConfigSection,
    pub previous_version: Option<u64>,
    pub config: Value,
    pub timestamp: i64,
    pub pending: bool,
}

/// Owns every section's rollback record plus the per-section lock that
/// keeps at most one apply in flight per section at a time.
pub struct RollbackStore {
    base_dir: PathBuf,
    locks: HashMap<ConfigSection, Mutex<()>>,
}

impl RollbackStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        let locks = ConfigSection::ALL
            .into_iter()
            .map(|s| (s, Mutex::new(())))
            .collect();
        Self { base_dir: base_dir.into(), locks }
    }

    fn dir(&self) -> PathBuf {
        self.base_dir.join(ROLLBACK_SUBDIR)
    }

    fn path(&self, section: ConfigSection) -> PathBuf {
        self.dir().join(format!("{}.bin", section_name(section)))
    }

    /// Acquire the per-section apply lock. Held for the duration of a
    /// snapshot + apply + (on failure) rollback sequence, so a second
    /// `CONFIG_PUSH` for the same section queues rather than racing.
    pub async fn lock_section(&self, section: ConfigSection) -> tokio::sync::MutexGuard<'_, ()> {
        self.locks
            .get(&section)
            .expect("every ConfigSection has a lock")
            .lock()
            .await
    }

    /// Write a new snapshot for `section`, marked `pending`. Called before
    /// `apply()` runs; the write is atomic so the record is always either
    /// the previous full record or the new one, never a half-written file.
    pub async fn snapshot(
        &self,
        section: ConfigSection,
        previous_version: Option<u64>,
        config: Value,
    ) -> Result<(), PersistenceError> {
        tokio::fs::create_dir_all(self.dir())
            .await
            .map_err(PersistenceError::WriteFailed)?;

        let record = RollbackRecord {
            section,
            previous_version,
            config,
            timestamp: unix_now(),
            pending: true,
        };
        self.write_record(section, &record).await
    }

    /// Clear the `pending` flag on `section`'s record after its apply has
    /// reached a terminal outcome. A no-op if no record exists.
    pub async fn mark_complete(&self, section: ConfigSection) -> Result<(), PersistenceError> {
        let Some(mut record) = self.read_record(section).await else {
            return Ok(());
        };
        record.pending = false;
        self.write_record(section, &record).await
    }

    /// Read back the stored record for `section`, e.g. to recover the
    /// config an adapter's own `rollback()` should restore.
    pub async fn restore(&self, section: ConfigSection) -> Option<RollbackRecord> {
        self.read_record(section).await
    }

    /// Delete `section`'s record entirely.
    pub async fn forget(&self, section: ConfigSection) -> Result<(), PersistenceError> {
        match tokio::fs::remove_file(self.path(section)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(PersistenceError::WriteFailed(err)),
        }
    }

    /// Scan every section's record at startup and return those left
    /// `pending` — evidence of a crash mid-apply. The caller queues one
    /// `ALERT` per section once the connection reaches `Connected`.
    pub async fn pending_sections(&self) -> Vec<ConfigSection> {
        let mut pending = Vec::new();
        for section in ConfigSection::ALL {
            if let Some(record) = self.read_record(section).await {
                if record.pending {
                    pending.push(section);
                }
            }
        }
        pending
    }

    async fn read_record(&self, section: ConfigSection) -> Option<RollbackRecord> {
        let contents = tokio::fs::read_to_string(self.path(section)).await.ok()?;
        serde_json::from_str(&contents).ok()
    }

    async fn write_record(
        &self,
        section: ConfigSection,
        record: &RollbackRecord,
    ) -> Result<(), PersistenceError> {
        tokio::fs::create_dir_all(self.dir())
            .await
            .map_err(PersistenceError::WriteFailed)?;

        let path = self.path(section);
        let tmp_path = path.with_extension("bin.tmp");
        let serialized = serde_json::to_string_pretty(record)
            .expect("RollbackRecord always serializes");

        tokio::fs::write(&tmp_path, serialized)
            .await
            .map_err(PersistenceError::WriteFailed)?;
        tokio::fs::rename(&tmp_path, &path)
            .await
            .map_err(PersistenceError::WriteFailed)?;
        Ok(())
    }
}

fn section_name(section: ConfigSection) -> &'static str {
    match section {
        ConfigSection::System => "system",
        ConfigSection::Firewall => "firewall",
        ConfigSection::Dns => "dns",
        ConfigSection::Wifi => "wifi",
        ConfigSection::Vpn => "vpn",
        ConfigSection::Routing => "routing",
        ConfigSection::Wan => "wan",
        ConfigSection::Lan => "lan",
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn snapshot_then_restore_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = RollbackStore::new(dir.path());

        store
            .snapshot(ConfigSection::Firewall, Some(3), json!({"rules": []}))
            .await
            .unwrap();

        let record = store.restore(ConfigSection::Firewall).await.unwrap();
        assert_eq!(record.previous_version, Some(3));
        assert!(record.pending);
        assert_eq!(record.config, json!({"rules": []}));
    }

    #[tokio::test]
    async fn restore_missing_section_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = RollbackStore::new(dir.path());
        assert!(store.restore(ConfigSection::Dns).await.is_none());
    }

    #[tokio::test]
    async fn mark_complete_clears_pending() {
        let dir = tempfile::tempdir().unwrap();
        let store = RollbackStore::new(dir.path());
        store
            .snapshot(ConfigSection::Wan, None, json!({}))
            .await
            .unwrap();

        store.mark_complete(ConfigSection::Wan).await.unwrap();

        let record = store.restore(ConfigSection::Wan).await.unwrap();
        assert!(!record.pending);
    }

    #[tokio::test]
    async fn forget_removes_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = RollbackStore::new(dir.path());
        store
            .snapshot(ConfigSection::Lan, None, json!({}))
            .await
            .unwrap();
        store.forget(ConfigSection::Lan).await.unwrap();
        assert!(store.restore(ConfigSection::Lan).await.is_none());
    }

    #[tokio::test]
    async fn forget_missing_record_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = RollbackStore::new(dir.path());
        assert!(store.forget(ConfigSection::Vpn).await.is_ok());
    }

    #[tokio::test]
    async fn pending_sections_reports_only_pending_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = RollbackStore::new(dir.path());

        store
            .snapshot(ConfigSection::Firewall, None, json!({}))
            .await
            .unwrap();
        store
            .snapshot(ConfigSection::Dns, None, json!({}))
            .await
            .unwrap();
        store.mark_complete(ConfigSection::Dns).await.unwrap();

        let pending = store.pending_sections().await;
        assert_eq!(pending, vec![ConfigSection::Firewall]);
    }

    #[tokio::test]
    async fn snapshot_overwrites_prior_record_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let store = RollbackStore::new(dir.path());

        store
            .snapshot(ConfigSection::System, Some(1), json!({"a": 1}))
            .await
            .unwrap();
        store
            .snapshot(ConfigSection::System, Some(2), json!({"a": 2}))
            .await
            .unwrap();

        let record = store.restore(ConfigSection::System).await.unwrap();
        assert_eq!(record.previous_version, Some(2));
        assert!(!dir.path().join("rollback/system.bin.tmp").exists());
    }

    #[tokio::test]
    async fn per_section_locks_are_independent() {
        let dir = tempfile::tempdir().unwrap();
        let store = RollbackStore::new(dir.path());

        let _guard_fw = store.lock_section(ConfigSection::Firewall).await;
        // A different section's lock must not be blocked by the one above.
        let _guard_dns = store.lock_section(ConfigSection::Dns).await;
    }
}
