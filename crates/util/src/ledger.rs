//! Transfer-ledger persistence.
//!
//! The ledger remembers the last fingerprint successfully delivered for
//! each `(host, artifact)` pair, which is what makes re-running a bootstrap
//! pipeline cheap: unchanged artifacts are skipped without touching the
//! network. The ledger is always passed into the orchestrator explicitly;
//! there is no process-wide store. A JSON-backed implementation mirrors the
//! ergonomics of the other config files (env override, config directory
//! fallback), and an in-memory implementation serves tests and one-shot
//! runs.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::serde::ts_seconds;
use chrono::{DateTime, Utc};
use dirs_next::{config_dir, home_dir};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::fingerprint::Fingerprint;

/// Environment variable controlling the ledger file location.
pub const LEDGER_PATH_ENV: &str = "RIGGER_LEDGER_PATH";

/// Default filename for the persisted ledger.
pub const LEDGER_FILE_NAME: &str = "ledger.json";

/// Errors surfaced by ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// I/O failure while reading or writing the ledger file.
    #[error("ledger I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Serialization or deserialization failure.
    #[error("ledger serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Uniquely identifies a delivered artifact.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct TransferKey {
    /// Stable host identifier from the plan document.
    pub host_id: String,
    /// Artifact identifier inside the plan.
    pub artifact_id: String,
}

impl TransferKey {
    pub fn new(host_id: impl Into<String>, artifact_id: impl Into<String>) -> Self {
        Self {
            host_id: host_id.into(),
            artifact_id: artifact_id.into(),
        }
    }
}

/// Last-known delivery for a transfer key.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransferRecord {
    /// Fingerprint of the rendered bytes that reached the host.
    pub fingerprint: Fingerprint,
    /// When the delivery completed.
    #[serde(with = "ts_seconds")]
    pub delivered_at: DateTime<Utc>,
}

/// Store consulted before and updated after every artifact transfer.
///
/// Updates are last-writer-wins per key and must only happen after a
/// transfer succeeded, so a crash mid-transfer leaves the previous record
/// in place and the next run retries.
pub trait TransferLedger: Send + Sync {
    /// The last record delivered for `key`, if any. Absence means the
    /// artifact has never been transferred.
    fn last_delivered(&self, key: &TransferKey) -> Result<Option<TransferRecord>, LedgerError>;

    /// Record a successful delivery of `fingerprint` under `key`.
    fn record_delivery(&self, key: TransferKey, fingerprint: Fingerprint) -> Result<(), LedgerError>;
}

/// In-memory ledger for tests and one-shot runs.
#[derive(Default)]
pub struct MemoryLedger {
    entries: Mutex<HashMap<TransferKey, TransferRecord>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TransferLedger for MemoryLedger {
    fn last_delivered(&self, key: &TransferKey) -> Result<Option<TransferRecord>, LedgerError> {
        let entries = self.entries.lock().expect("ledger mutex");
        Ok(entries.get(key).cloned())
    }

    fn record_delivery(&self, key: TransferKey, fingerprint: Fingerprint) -> Result<(), LedgerError> {
        let mut entries = self.entries.lock().expect("ledger mutex");
        entries.insert(
            key,
            TransferRecord {
                fingerprint,
                delivered_at: Utc::now(),
            },
        );
        Ok(())
    }
}

#[derive(Default, Serialize, Deserialize)]
struct LedgerFile {
    entries: Vec<LedgerEntry>,
}

#[derive(Serialize, Deserialize)]
struct LedgerEntry {
    key: TransferKey,
    record: TransferRecord,
}

/// JSON-file-backed ledger persisted between runs.
pub struct JsonFileLedger {
    path: PathBuf,
    state: Mutex<LedgerFile>,
}

impl JsonFileLedger {
    /// Open (or create) a ledger at an explicit path.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let path = path.into();
        let state = match fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content)?,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => LedgerFile::default(),
            Err(error) => return Err(error.into()),
        };
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// Open the ledger at the default location, honoring `RIGGER_LEDGER_PATH`.
    pub fn open_default() -> Result<Self, LedgerError> {
        Self::open(Self::default_path())
    }

    /// Resolve the ledger location: env override, then the user config
    /// directory, then a dotfile under the home directory.
    pub fn default_path() -> PathBuf {
        if let Ok(overridden) = std::env::var(LEDGER_PATH_ENV)
            && !overridden.trim().is_empty()
        {
            return PathBuf::from(overridden);
        }
        if let Some(base) = config_dir() {
            return base.join("rigger").join(LEDGER_FILE_NAME);
        }
        if let Some(home) = home_dir() {
            return home.join(".rigger").join(LEDGER_FILE_NAME);
        }
        PathBuf::from(LEDGER_FILE_NAME)
    }

    /// The path this ledger persists to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, state: &LedgerFile) -> Result<(), LedgerError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        // Write the whole file to a sibling temp path and rename it into
        // place, so a crash mid-write cannot truncate the ledger.
        let staged = self.path.with_extension("json.partial");
        fs::write(&staged, serde_json::to_vec_pretty(state)?)?;
        fs::rename(&staged, &self.path)?;
        Ok(())
    }
}

impl TransferLedger for JsonFileLedger {
    fn last_delivered(&self, key: &TransferKey) -> Result<Option<TransferRecord>, LedgerError> {
        let state = self.state.lock().expect("ledger mutex");
        Ok(state
            .entries
            .iter()
            .find(|entry| entry.key == *key)
            .map(|entry| entry.record.clone()))
    }

    fn record_delivery(&self, key: TransferKey, fingerprint: Fingerprint) -> Result<(), LedgerError> {
        let mut state = self.state.lock().expect("ledger mutex");
        let record = TransferRecord {
            fingerprint,
            delivered_at: Utc::now(),
        };
        if let Some(existing) = state.entries.iter_mut().find(|entry| entry.key == key) {
            existing.record = record;
        } else {
            state.entries.push(LedgerEntry { key, record });
        }
        if let Err(error) = self.persist(&state) {
            warn!(path = %self.path.display(), %error, "failed to persist transfer ledger");
            return Err(error);
        }
        Ok(())
    }
}
