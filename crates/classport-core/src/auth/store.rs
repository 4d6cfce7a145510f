//! Durable credential storage.
//!
//! A session is one record: the access/renewal credential pair plus any
//! session-scoped client flags. Persisting the pair as a single record means
//! no reader can ever observe an access credential from one pair next to a
//! renewal credential from another, and a record can never hold only half a
//! pair.
//!
//! Stores are injected as `Arc<dyn CredentialStore>` so embedding code picks
//! the backend (file, OS keychain) and tests supply `MemoryStore`.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::RwLock;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use keyring::Entry;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// A matched access/renewal credential pair. Contents are opaque bearer
/// strings; this layer imposes no format on them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialPair {
    pub access: String,
    pub renewal: String,
}

impl CredentialPair {
    pub fn new(access: impl Into<String>, renewal: impl Into<String>) -> Self {
        Self {
            access: access.into(),
            renewal: renewal.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredPair {
    access: String,
    renewal: String,
    issued_at: DateTime<Utc>,
}

impl StoredPair {
    fn issue(pair: CredentialPair) -> Self {
        Self {
            access: pair.access,
            renewal: pair.renewal,
            issued_at: Utc::now(),
        }
    }

    fn pair(&self) -> CredentialPair {
        CredentialPair::new(self.access.clone(), self.renewal.clone())
    }
}

/// The single persisted record backing one role's session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct SessionRecord {
    pair: Option<StoredPair>,
    #[serde(default)]
    flags: BTreeMap<String, String>,
}

/// Durable key/value storage for one role's session.
///
/// Readers never fail: a backend error reads as "absent". Writes report
/// failures so callers can surface them.
pub trait CredentialStore: Send + Sync {
    /// Overwrite the stored pair unconditionally. Flags are preserved.
    fn store(&self, pair: CredentialPair) -> Result<()>;

    /// Current access credential, if any.
    fn read_access(&self) -> Option<String>;

    /// Current renewal credential, if any.
    fn read_renewal(&self) -> Option<String>;

    /// Both credentials at once, from a single consistent record.
    fn read_pair(&self) -> Option<CredentialPair>;

    /// Remove the pair and every session-scoped flag, so neither leaks into
    /// a subsequent session.
    fn clear(&self);

    /// True iff both credentials are present.
    fn is_authenticated(&self) -> bool {
        self.read_pair().is_some()
    }

    /// When the stored pair was issued. Diagnostics only; expiry is signaled
    /// by the server, never computed locally.
    fn issued_at(&self) -> Option<DateTime<Utc>>;

    /// Set a session-scoped client-only marker, e.g. a "profile form already
    /// reviewed" flag. Wiped by `clear`.
    fn set_flag(&self, name: &str, value: &str) -> Result<()>;

    /// Read back a session-scoped marker.
    fn flag(&self, name: &str) -> Option<String>;
}

// ============================================================================
// In-memory store
// ============================================================================

/// In-memory store for tests and short-lived embeddings.
#[derive(Default)]
pub struct MemoryStore {
    record: RwLock<SessionRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> SessionRecord {
        self.record
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn write(&self, mutate: impl FnOnce(&mut SessionRecord)) {
        let mut record = self
            .record
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        mutate(&mut record);
    }
}

impl CredentialStore for MemoryStore {
    fn store(&self, pair: CredentialPair) -> Result<()> {
        self.write(|record| record.pair = Some(StoredPair::issue(pair)));
        Ok(())
    }

    fn read_access(&self) -> Option<String> {
        self.read().pair.map(|stored| stored.access)
    }

    fn read_renewal(&self) -> Option<String> {
        self.read().pair.map(|stored| stored.renewal)
    }

    fn read_pair(&self) -> Option<CredentialPair> {
        self.read().pair.map(|stored| stored.pair())
    }

    fn clear(&self) {
        self.write(|record| *record = SessionRecord::default());
    }

    fn issued_at(&self) -> Option<DateTime<Utc>> {
        self.read().pair.map(|stored| stored.issued_at)
    }

    fn set_flag(&self, name: &str, value: &str) -> Result<()> {
        self.write(|record| {
            record.flags.insert(name.to_string(), value.to_string());
        });
        Ok(())
    }

    fn flag(&self, name: &str) -> Option<String> {
        self.read().flags.get(name).cloned()
    }
}

// ============================================================================
// File store
// ============================================================================

/// Session file name inside the namespace directory
const STORE_FILE: &str = "session.json";

/// File-backed store persisting one JSON record per role namespace under the
/// platform cache directory. Survives process restarts.
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    /// Store rooted at the platform cache directory for the given namespace.
    pub fn open(namespace: &str) -> Result<Self> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("could not find cache directory"))?;
        Ok(Self {
            path: cache_dir.join(namespace).join(STORE_FILE),
        })
    }

    /// Store at an explicit path, for tests and custom layouts.
    pub fn at_path(path: PathBuf) -> Self {
        Self { path }
    }

    fn load(&self) -> SessionRecord {
        let Ok(contents) = std::fs::read_to_string(&self.path) else {
            return SessionRecord::default();
        };
        serde_json::from_str(&contents).unwrap_or_default()
    }

    fn save(&self, record: &SessionRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let contents = serde_json::to_string_pretty(record)?;
        std::fs::write(&self.path, contents)
            .with_context(|| format!("failed to write session file: {}", self.path.display()))?;
        Ok(())
    }
}

impl CredentialStore for FileStore {
    fn store(&self, pair: CredentialPair) -> Result<()> {
        let mut record = self.load();
        record.pair = Some(StoredPair::issue(pair));
        self.save(&record)
    }

    fn read_access(&self) -> Option<String> {
        self.load().pair.map(|stored| stored.access)
    }

    fn read_renewal(&self) -> Option<String> {
        self.load().pair.map(|stored| stored.renewal)
    }

    fn read_pair(&self) -> Option<CredentialPair> {
        self.load().pair.map(|stored| stored.pair())
    }

    fn clear(&self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "session record cleared"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "failed to remove session record")
            }
        }
    }

    fn issued_at(&self) -> Option<DateTime<Utc>> {
        self.load().pair.map(|stored| stored.issued_at)
    }

    fn set_flag(&self, name: &str, value: &str) -> Result<()> {
        let mut record = self.load();
        record.flags.insert(name.to_string(), value.to_string());
        self.save(&record)
    }

    fn flag(&self, name: &str) -> Option<String> {
        self.load().flags.get(name).cloned()
    }
}

// ============================================================================
// OS keychain store
// ============================================================================

/// Account name for the keychain entry; the service name carries the role
/// namespace.
const KEYRING_USER: &str = "session";

/// OS-keychain-backed store. The whole record is serialized into a single
/// keyring entry per role namespace.
pub struct KeyringStore {
    service: String,
}

impl KeyringStore {
    pub fn new(namespace: &str) -> Self {
        Self {
            service: namespace.to_string(),
        }
    }

    fn entry(&self) -> Result<Entry> {
        Entry::new(&self.service, KEYRING_USER).context("failed to create keyring entry")
    }

    fn load(&self) -> SessionRecord {
        let Ok(entry) = self.entry() else {
            return SessionRecord::default();
        };
        let Ok(contents) = entry.get_password() else {
            return SessionRecord::default();
        };
        serde_json::from_str(&contents).unwrap_or_default()
    }

    fn save(&self, record: &SessionRecord) -> Result<()> {
        let contents = serde_json::to_string(record)?;
        self.entry()?
            .set_password(&contents)
            .context("failed to store session in keychain")
    }
}

impl CredentialStore for KeyringStore {
    fn store(&self, pair: CredentialPair) -> Result<()> {
        let mut record = self.load();
        record.pair = Some(StoredPair::issue(pair));
        self.save(&record)
    }

    fn read_access(&self) -> Option<String> {
        self.load().pair.map(|stored| stored.access)
    }

    fn read_renewal(&self) -> Option<String> {
        self.load().pair.map(|stored| stored.renewal)
    }

    fn read_pair(&self) -> Option<CredentialPair> {
        self.load().pair.map(|stored| stored.pair())
    }

    fn clear(&self) {
        if let Ok(entry) = self.entry() {
            if let Err(err) = entry.delete_credential() {
                debug!(service = %self.service, error = %err, "no keychain session to clear");
            }
        }
    }

    fn issued_at(&self) -> Option<DateTime<Utc>> {
        self.load().pair.map(|stored| stored.issued_at)
    }

    fn set_flag(&self, name: &str, value: &str) -> Result<()> {
        let mut record = self.load();
        record.flags.insert(name.to_string(), value.to_string());
        self.save(&record)
    }

    fn flag(&self, name: &str) -> Option<String> {
        self.load().flags.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        assert!(!store.is_authenticated());
        assert!(store.read_access().is_none());
        assert!(store.read_renewal().is_none());

        store
            .store(CredentialPair::new("A1", "R1"))
            .expect("store pair");
        assert!(store.is_authenticated());
        assert_eq!(store.read_access().as_deref(), Some("A1"));
        assert_eq!(store.read_renewal().as_deref(), Some("R1"));
        assert_eq!(store.read_pair(), Some(CredentialPair::new("A1", "R1")));
        assert!(store.issued_at().is_some());
    }

    #[test]
    fn test_store_overwrites_previous_pair() {
        let store = MemoryStore::new();
        store
            .store(CredentialPair::new("A1", "R1"))
            .expect("store pair");
        store
            .store(CredentialPair::new("A2", "R2"))
            .expect("store pair");
        assert_eq!(store.read_pair(), Some(CredentialPair::new("A2", "R2")));
    }

    #[test]
    fn test_clear_removes_pair_and_flags() {
        let store = MemoryStore::new();
        store
            .store(CredentialPair::new("A1", "R1"))
            .expect("store pair");
        store
            .set_flag("profile-form-reviewed", "true")
            .expect("set flag");

        store.clear();
        assert!(!store.is_authenticated());
        assert!(store.read_access().is_none());
        assert!(store.read_renewal().is_none());
        assert!(store.flag("profile-form-reviewed").is_none());
    }

    #[test]
    fn test_store_preserves_flags() {
        let store = MemoryStore::new();
        store.set_flag("grade-notice-seen", "2026").expect("set flag");
        store
            .store(CredentialPair::new("A1", "R1"))
            .expect("store pair");
        assert_eq!(store.flag("grade-notice-seen").as_deref(), Some("2026"));
    }

    #[test]
    fn test_file_store_roundtrip() {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = FileStore::at_path(dir.path().join("session.json"));

        assert!(!store.is_authenticated());
        store
            .store(CredentialPair::new("A1", "R1"))
            .expect("store pair");
        store.set_flag("profile-form-reviewed", "true").expect("set flag");

        assert_eq!(store.read_access().as_deref(), Some("A1"));
        assert_eq!(store.read_renewal().as_deref(), Some("R1"));
        assert_eq!(store.flag("profile-form-reviewed").as_deref(), Some("true"));
    }

    #[test]
    fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("session.json");

        FileStore::at_path(path.clone())
            .store(CredentialPair::new("A1", "R1"))
            .expect("store pair");

        let reopened = FileStore::at_path(path);
        assert_eq!(reopened.read_pair(), Some(CredentialPair::new("A1", "R1")));
        assert!(reopened.issued_at().is_some());
    }

    #[test]
    fn test_file_store_clear_removes_record() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("session.json");
        let store = FileStore::at_path(path.clone());

        store
            .store(CredentialPair::new("A1", "R1"))
            .expect("store pair");
        assert!(path.exists());

        store.clear();
        assert!(!path.exists());
        assert!(!store.is_authenticated());

        // Clearing an already-empty store is a no-op.
        store.clear();
    }

    #[test]
    fn test_file_store_corrupt_record_reads_as_absent() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("session.json");
        std::fs::write(&path, "not json").expect("write corrupt file");

        let store = FileStore::at_path(path);
        assert!(!store.is_authenticated());
        assert!(store.read_pair().is_none());
    }
}
