// Reload-scoped session persistence.
//
// Every connection attempt records the session id so a restarted client
// can offer to reattach. Records expire after one hour: a stale id is
// cleared on read rather than resumed. Only the session id and a
// timestamp are stored here, never credentials.

use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::global_dir;

/// Age beyond which a persisted record is ignored and cleared.
pub const SESSION_RECORD_TTL: Duration = Duration::from_secs(60 * 60);

/// The durable record: which session was live, and since when.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionRecord {
    pub session_id: String,
    pub persisted_at_epoch_ms: u64,
}

/// Raw record storage. Failures are logged and swallowed by the
/// implementations: persistence is best-effort and must never take the
/// live connection down with it.
pub trait SessionRecordStore: Send {
    fn read(&self) -> Option<SessionRecord>;
    fn write(&mut self, record: &SessionRecord);
    fn remove(&mut self);
}

fn epoch_ms_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ── TTL policy ─────────────────────────────────────────────────────

/// Staleness policy layered over a record store.
pub struct SessionPersistence {
    store: Box<dyn SessionRecordStore>,
}

impl SessionPersistence {
    pub fn new(store: Box<dyn SessionRecordStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Box::new(MemorySessionStore::default()))
    }

    /// Record the session id of a starting connection attempt.
    pub fn persist(&mut self, session_id: &str) {
        let record = SessionRecord {
            session_id: session_id.to_string(),
            persisted_at_epoch_ms: epoch_ms_now(),
        };
        self.store.write(&record);
        debug!(session_id, "session record persisted");
    }

    /// The reattachable session id, if a fresh record exists. Stale
    /// records are cleared as a side effect.
    pub fn restore(&mut self) -> Option<String> {
        let record = self.store.read()?;
        let age = Duration::from_millis(epoch_ms_now().saturating_sub(record.persisted_at_epoch_ms));
        if age < SESSION_RECORD_TTL {
            info!(session_id = %record.session_id, "restored persisted session");
            Some(record.session_id)
        } else {
            debug!(session_id = %record.session_id, "persisted session record is stale; clearing");
            self.store.remove();
            None
        }
    }

    /// Drop the record so a later restart does not resume a session the
    /// user deliberately left.
    pub fn clear(&mut self) {
        self.store.remove();
    }
}

// ── In-memory store ────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct MemorySessionStore {
    record: Option<SessionRecord>,
}

impl SessionRecordStore for MemorySessionStore {
    fn read(&self) -> Option<SessionRecord> {
        self.record.clone()
    }

    fn write(&mut self, record: &SessionRecord) {
        self.record = Some(record.clone());
    }

    fn remove(&mut self) {
        self.record = None;
    }
}

// ── File-backed store ──────────────────────────────────────────────

/// Stores the record as JSON under the Fresco state directory.
#[derive(Debug)]
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// `~/.fresco/session.json`, if a home directory exists.
    pub fn default_path() -> Option<PathBuf> {
        global_dir().map(|d| d.join("session.json"))
    }
}

impl SessionRecordStore for FileSessionStore {
    fn read(&self) -> Option<SessionRecord> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return None,
            Err(error) => {
                warn!(%error, path = %self.path.display(), "failed to read session record");
                return None;
            }
        };
        match serde_json::from_str(&contents) {
            Ok(record) => Some(record),
            Err(error) => {
                warn!(%error, "session record is corrupt; ignoring");
                None
            }
        }
    }

    fn write(&mut self, record: &SessionRecord) {
        if let Some(parent) = self.path.parent() {
            if let Err(error) = std::fs::create_dir_all(parent) {
                warn!(%error, "failed to create session record directory");
                return;
            }
        }
        match serde_json::to_string(record) {
            Ok(serialized) => {
                if let Err(error) = std::fs::write(&self.path, serialized) {
                    warn!(%error, path = %self.path.display(), "failed to persist session record");
                }
            }
            Err(error) => warn!(%error, "failed to serialize session record"),
        }
    }

    fn remove(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
            Err(error) => warn!(%error, "failed to remove session record"),
        }
    }
}
