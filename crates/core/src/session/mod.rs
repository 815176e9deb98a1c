//! RTSP session management (§4.2, §4.7).
//!
//! A session is created the first time a connection's role becomes known
//! (the first SETUP, or an ANNOUNCE immediately followed by one) and
//! identifies that connection's (role, mount, state) across every
//! subsequent request carrying its `Session` header. One RTSP TCP
//! connection owns exactly one session for its lifetime (§9 design notes).

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use parking_lot::RwLock;
use rand::Rng;

use crate::error::{Result, RtspError};

/// Which side of a mount this session represents (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Not yet determined — before the first ANNOUNCE or SETUP.
    Unknown,
    /// Publishes media into a mount (ANNOUNCE, RECORD).
    Source,
    /// Consumes media from a mount (SETUP, PLAY).
    Client,
}

/// Session state machine (§4.2). Transition legality is enforced by the
/// connection dispatch layer; this type only records the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No session assigned yet.
    Init,
    /// SETUP completed, not yet playing/recording.
    Ready,
    /// Client side: media is flowing to this session.
    Playing,
    /// Source side: media is flowing from this session.
    Recording,
}

/// Default session timeout in seconds, included in every `Session`
/// response header (RFC 2326 §12.37).
pub const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 60;

const SESSION_ID_LEN: usize = 12;
const SESSION_ID_ALPHABET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

/// Generate an opaque, URL-safe session identifier of at least 8 characters
/// (§4.7), drawn from a CSPRNG rather than a counter so one session id
/// gives no hint about another.
pub fn generate_session_id() -> String {
    let mut rng = rand::rng();
    (0..SESSION_ID_LEN)
        .map(|_| SESSION_ID_ALPHABET[rng.random_range(0..SESSION_ID_ALPHABET.len())] as char)
        .collect()
}

/// A single RTSP session (§3 data model, §4.2 state machine).
#[derive(Debug)]
pub struct Session {
    pub id: String,
    role: RwLock<Role>,
    state: RwLock<SessionState>,
    pub timeout_secs: u64,
}

impl Session {
    fn new(id: String) -> Self {
        Self {
            id,
            role: RwLock::new(Role::Unknown),
            state: RwLock::new(SessionState::Init),
            timeout_secs: DEFAULT_SESSION_TIMEOUT_SECS,
        }
    }

    pub fn role(&self) -> Role {
        *self.role.read()
    }

    pub fn set_role(&self, role: Role) {
        *self.role.write() = role;
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    pub fn set_state(&self, state: SessionState) {
        tracing::debug!(session_id = %self.id, old = ?self.state(), new = ?state, "session state transition");
        *self.state.write() = state;
    }

    pub fn is_playing(&self) -> bool {
        self.state() == SessionState::Playing
    }

    /// Format the `Session` response header value (RFC 2326 §12.37),
    /// e.g. `"aZ3xQ9mKpL7q;timeout=60"`.
    pub fn header_value(&self) -> String {
        format!("{};timeout={}", self.id, self.timeout_secs)
    }
}

/// Thread-safe registry of active sessions, keyed by opaque session id.
#[derive(Clone)]
pub struct SessionManager {
    sessions: Arc<RwLock<HashMap<String, Arc<Session>>>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Create and register a session under a freshly generated id. Retries
    /// on the vanishingly unlikely chance of a collision against a live id.
    pub fn create_session(&self) -> Arc<Session> {
        let mut sessions = self.sessions.write();
        loop {
            let id = generate_session_id();
            if let Entry::Vacant(entry) = sessions.entry(id.clone()) {
                let session = Arc::new(Session::new(id.clone()));
                entry.insert(session.clone());
                tracing::debug!(session_id = %id, "session created");
                return session;
            }
        }
    }

    /// Look up a session by id, or `SessionNotFound` (§7) if it is missing
    /// or was never created (the "Session not found" rejection, §4.1).
    pub fn get(&self, id: &str) -> Result<Arc<Session>> {
        self.sessions
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| RtspError::SessionNotFound(id.to_string()))
    }

    /// Remove a session, e.g. on TEARDOWN or connection cleanup (§4.3).
    /// Idempotent: removing an absent id is a no-op, not an error.
    pub fn remove(&self, id: &str) -> Option<Arc<Session>> {
        let removed = self.sessions.write().remove(id);
        if removed.is_some() {
            tracing::debug!(session_id = id, "session removed");
        }
        removed
    }

    /// Whether `id` currently names a session in the Playing state. Used by
    /// [`crate::mount::Stream::broadcast`] without depending on this module.
    pub fn is_playing(&self, id: &str) -> bool {
        self.sessions
            .read()
            .get(id)
            .map(|s| s.is_playing())
            .unwrap_or(false)
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}
