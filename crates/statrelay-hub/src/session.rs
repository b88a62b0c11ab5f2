use std::collections::HashMap;
use std::io::Cursor;
use std::sync::{Arc, Mutex, MutexGuard};

use dashmap::DashMap;
use statrelay_wire::message::MessageReader;
use uuid::Uuid;

/// 128-bit account identifier.
pub type UserId = Uuid;

/// Byte source for a session decoder: one fully buffered request body.
pub type BodySource = Cursor<Vec<u8>>;

/// Mutable per-user ingestion state. Guarded by the session mutex.
pub struct SessionState {
    /// Persistent message decoder. Its dict mapping table spans request
    /// bodies; only the byte source is swapped per body.
    pub reader: MessageReader<BodySource>,
    /// Key name to its most recently seen JSON-encoded value.
    pub state: HashMap<String, Vec<u8>>,
}

impl SessionState {
    fn new() -> Self {
        Self {
            reader: MessageReader::new(Cursor::new(Vec::new())),
            state: HashMap::new(),
        }
    }

    /// Drops all learned dictionary state and accumulated values.
    pub fn reset(&mut self) {
        self.reader = MessageReader::new(Cursor::new(Vec::new()));
        self.state.clear();
    }
}

/// Server-side per-user context spanning HTTP requests.
///
/// One mutex serializes ingestion against sweeper resets and state-snapshot
/// reads; an ingesting request holds it for its entire body.
pub struct Session {
    inner: Mutex<SessionState>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(SessionState::new()),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide user to session map. Lookups are lock-free reads.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<UserId, Arc<Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, user_id: &UserId) -> Option<Arc<Session>> {
        self.sessions.get(user_id).map(|entry| Arc::clone(entry.value()))
    }

    /// Returns the user's session, creating one if absent. Re-authentication
    /// keeps the existing decoder and accumulated state.
    pub fn get_or_create(&self, user_id: UserId) -> Arc<Session> {
        self.sessions
            .entry(user_id)
            .or_insert_with(|| Arc::new(Session::new()))
            .clone()
    }
}

/// Renders an accumulated state map as one JSON object.
///
/// Stored values are already JSON-encoded and spliced in verbatim; keys are
/// emitted sorted for stable output.
pub fn state_snapshot_json(state: &HashMap<String, Vec<u8>>) -> Vec<u8> {
    let mut keys: Vec<&String> = state.keys().collect();
    keys.sort();

    let mut out = Vec::with_capacity(2 + state.len() * 16);
    out.push(b'{');
    for (i, key) in keys.iter().enumerate() {
        if i > 0 {
            out.push(b',');
        }
        out.push(b'"');
        out.extend_from_slice(key.as_bytes());
        out.extend_from_slice(b"\":");
        out.extend_from_slice(&state[*key]);
    }
    out.push(b'}');
    out
}
