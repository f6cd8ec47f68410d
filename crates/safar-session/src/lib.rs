//! Durable, TTL-bounded session store for the ride-booking dialogue.
//!
//! One JSON document per session id, written atomically and guarded by a
//! per-session lock file so at most one state mutation is in flight per
//! session at a time. Expired documents are destroyed on load; a revision
//! counter rejects commits built from stale reads.
use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use safar_core::{is_expired_unix, write_text_atomic};

mod session_locking;

use session_locking::{acquire_lock, LockGuard};

const SESSION_SCHEMA_VERSION: u32 = 1;
const DEFAULT_LOCK_WAIT_MS: u64 = 5_000;
const DEFAULT_LOCK_STALE_MS: u64 = 30_000;

/// Default session expiry window in seconds.
pub const DEFAULT_SESSION_TTL_SECONDS: u64 = 3_600;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
/// Enumerates the dialogue states a booking session moves through.
pub enum DialogueState {
    Greeting,
    AwaitPickup,
    AwaitDrop,
    AwaitPhone,
    RideRequested,
    DriverAssigned,
    Complete,
    Cancelled,
}

impl DialogueState {
    pub fn is_terminal(self) -> bool {
        matches!(self, DialogueState::Complete | DialogueState::Cancelled)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// A location slot after successful resolution: address plus coordinates.
pub struct ResolvedLocation {
    pub address: String,
    pub lat: f64,
    pub lng: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub place_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// Driver details recorded when the assignment push arrives.
pub struct DriverInfo {
    pub name: String,
    pub phone: String,
    pub vehicle_number: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
/// Persisted per-session state; the single source of truth for the dialogue.
pub struct SessionDocument {
    pub schema_version: u32,
    pub session_id: String,
    pub state: DialogueState,
    #[serde(default)]
    pub pickup_location: Option<ResolvedLocation>,
    #[serde(default)]
    pub drop_location: Option<ResolvedLocation>,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub ride_id: Option<String>,
    #[serde(default)]
    pub driver: Option<DriverInfo>,
    #[serde(default)]
    pub driver_eta: Option<String>,
    pub created_unix: u64,
    pub updated_unix: u64,
    pub expires_unix: u64,
    pub revision: u64,
}

impl SessionDocument {
    pub fn new(session_id: &str, now_unix: u64, ttl_seconds: u64) -> Self {
        Self {
            schema_version: SESSION_SCHEMA_VERSION,
            session_id: session_id.to_string(),
            state: DialogueState::Greeting,
            pickup_location: None,
            drop_location: None,
            phone_number: None,
            ride_id: None,
            driver: None,
            driver_eta: None,
            created_unix: now_unix,
            updated_unix: now_unix,
            expires_unix: now_unix.saturating_add(ttl_seconds),
            revision: 0,
        }
    }
}

#[derive(Debug)]
/// File-backed session store rooted at a directory, one document per session.
pub struct SessionStore {
    root: PathBuf,
    ttl_seconds: u64,
    lock_wait_ms: u64,
    lock_stale_ms: u64,
}

impl SessionStore {
    pub fn new(root: impl AsRef<Path>, ttl_seconds: u64) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create session root {}", root.display()))?;
        Ok(Self {
            root,
            ttl_seconds: ttl_seconds.max(1),
            lock_wait_ms: DEFAULT_LOCK_WAIT_MS,
            lock_stale_ms: DEFAULT_LOCK_STALE_MS,
        })
    }

    pub fn ttl_seconds(&self) -> u64 {
        self.ttl_seconds
    }

    pub fn set_lock_policy(&mut self, lock_wait_ms: u64, lock_stale_ms: u64) {
        self.lock_wait_ms = lock_wait_ms.max(1);
        self.lock_stale_ms = lock_stale_ms;
    }

    /// Acquires the per-session mutual-exclusion token and returns a guard
    /// scoping all reads and commits for one turn.
    pub fn lock_session(&self, session_id: &str) -> Result<SessionGuard> {
        let file_stem = sanitize_session_id(session_id)?;
        let document_path = self.root.join(format!("{file_stem}.json"));
        let lock_path = self.root.join(format!("{file_stem}.lock"));
        let lock = acquire_lock(
            &lock_path,
            Duration::from_millis(self.lock_wait_ms),
            Duration::from_millis(self.lock_stale_ms),
        )?;
        Ok(SessionGuard {
            session_id: session_id.to_string(),
            document_path,
            ttl_seconds: self.ttl_seconds,
            _lock: lock,
        })
    }

    /// Reads a session document without taking the lock. Expired documents
    /// read as absent but are left for the next locked access to destroy.
    pub fn peek(&self, session_id: &str, now_unix: u64) -> Result<Option<SessionDocument>> {
        let file_stem = sanitize_session_id(session_id)?;
        let document_path = self.root.join(format!("{file_stem}.json"));
        let Some(document) = read_document(&document_path)? else {
            return Ok(None);
        };
        if is_expired_unix(Some(document.expires_unix), now_unix) {
            return Ok(None);
        }
        Ok(Some(document))
    }
}

#[derive(Debug)]
/// Exclusive handle on one session for the duration of a turn.
pub struct SessionGuard {
    session_id: String,
    document_path: PathBuf,
    ttl_seconds: u64,
    _lock: LockGuard,
}

impl SessionGuard {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Loads the session document, destroying it first when its TTL has
    /// elapsed so the caller observes a brand-new session.
    pub fn load(&self, now_unix: u64) -> Result<Option<SessionDocument>> {
        let Some(document) = read_document(&self.document_path)? else {
            return Ok(None);
        };
        if is_expired_unix(Some(document.expires_unix), now_unix) {
            tracing::info!(
                target: "safar::session",
                session_id = %self.session_id,
                expired_unix = document.expires_unix,
                "session expired; destroying document"
            );
            remove_if_present(&self.document_path)?;
            return Ok(None);
        }
        Ok(Some(document))
    }

    pub fn load_or_create(&self, now_unix: u64) -> Result<SessionDocument> {
        if let Some(document) = self.load(now_unix)? {
            return Ok(document);
        }
        Ok(SessionDocument::new(
            &self.session_id,
            now_unix,
            self.ttl_seconds,
        ))
    }

    /// Commits the whole turn's mutation: bumps the revision, refreshes the
    /// expiry window, and writes atomically. A document built from a stale
    /// read is rejected so duplicate retries cannot double-apply.
    pub fn commit(&self, document: &mut SessionDocument, now_unix: u64) -> Result<()> {
        if let Some(on_disk) = read_document(&self.document_path)? {
            if on_disk.revision != document.revision {
                bail!(
                    "session revision conflict for {}: expected {}, found {}",
                    self.session_id,
                    document.revision,
                    on_disk.revision
                );
            }
        } else if document.revision != 0 {
            bail!(
                "session revision conflict for {}: document revision {} but no stored session",
                self.session_id,
                document.revision
            );
        }

        document.revision += 1;
        document.updated_unix = now_unix;
        document.expires_unix = now_unix.saturating_add(self.ttl_seconds);
        let serialized = serde_json::to_string_pretty(document)
            .context("failed to serialize session document")?;
        write_text_atomic(&self.document_path, &serialized)?;
        tracing::debug!(
            target: "safar::session",
            session_id = %self.session_id,
            state = ?document.state,
            revision = document.revision,
            "committed session document"
        );
        Ok(())
    }

    /// Destroys the session document. Used by explicit cancellation.
    pub fn destroy(&self) -> Result<bool> {
        let removed = remove_if_present(&self.document_path)?;
        if removed {
            tracing::info!(
                target: "safar::session",
                session_id = %self.session_id,
                "destroyed session document"
            );
        }
        Ok(removed)
    }
}

fn read_document(path: &Path) -> Result<Option<SessionDocument>> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
        Err(error) => {
            return Err(error)
                .with_context(|| format!("failed to read session document {}", path.display()));
        }
    };
    let document = serde_json::from_str::<SessionDocument>(&raw)
        .with_context(|| format!("invalid session document {}", path.display()))?;
    if document.schema_version != SESSION_SCHEMA_VERSION {
        bail!(
            "unsupported session schema version {} in {} (expected {})",
            document.schema_version,
            path.display(),
            SESSION_SCHEMA_VERSION
        );
    }
    Ok(Some(document))
}

fn remove_if_present(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(error) if error.kind() == ErrorKind::NotFound => Ok(false),
        Err(error) => Err(error)
            .with_context(|| format!("failed to remove session document {}", path.display())),
    }
}

fn sanitize_session_id(session_id: &str) -> Result<String> {
    let trimmed = session_id.trim();
    if trimmed.is_empty() {
        bail!("session id cannot be empty");
    }
    Ok(trimmed
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
                ch
            } else {
                '_'
            }
        })
        .collect())
}
