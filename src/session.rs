//! Per-browser state that survives between requests.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::debug;

pub const SESSION_COOKIE: &str = "portal_session";
pub const SESSION_IDLE_TIMEOUT: Duration = Duration::from_secs(60 * 60);

#[derive(Debug)]
pub struct SessionState {
    selected_rows: Vec<usize>,
    /// Fingerprint of the table the selection indexes into.
    selection_source: Option<u64>,
    last_seen: Instant,
}

impl SessionState {
    fn new() -> Self {
        Self {
            selected_rows: Vec::new(),
            selection_source: None,
            last_seen: Instant::now(),
        }
    }

    /// Replace the selection. An empty list clears it.
    pub fn select(&mut self, rows: Vec<usize>, fingerprint: u64) {
        if rows.is_empty() {
            self.clear_selection();
        } else {
            self.selected_rows = rows;
            self.selection_source = Some(fingerprint);
        }
    }

    pub fn clear_selection(&mut self) {
        self.selected_rows.clear();
        self.selection_source = None;
    }

    /// The selection as it applies to the table with `fingerprint` and
    /// `row_count` rows. A selection made against another table is dropped.
    pub fn selection_for(&mut self, fingerprint: u64, row_count: usize) -> Vec<usize> {
        if self.selection_source != Some(fingerprint) {
            if self.selection_source.is_some() {
                debug!("discarding selection made against a different table");
            }
            self.clear_selection();
            return Vec::new();
        }
        self.selected_rows
            .iter()
            .copied()
            .filter(|&i| i < row_count)
            .collect()
    }
}

pub fn new_session_id() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    bytes.iter().fold(String::with_capacity(32), |mut s, b| {
        let _ = write!(s, "{b:02x}");
        s
    })
}

fn is_session_id(id: &str) -> bool {
    id.len() == 32 && id.bytes().all(|b| b.is_ascii_hexdigit())
}

pub struct Sessions {
    idle_timeout: Duration,
    inner: Mutex<HashMap<String, SessionState>>,
}

impl Default for Sessions {
    fn default() -> Self {
        Self::new(SESSION_IDLE_TIMEOUT)
    }
}

impl Sessions {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            idle_timeout,
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve the caller's session id, issuing a new one when the presented
    /// id is absent or malformed. Returns the id and whether it is new.
    pub fn resolve(&self, presented: Option<&str>) -> (String, bool) {
        match presented {
            Some(id) if is_session_id(id) => (id.to_string(), false),
            _ => (new_session_id(), true),
        }
    }

    /// Run `f` against the session `id`, creating it if needed. Idle sessions
    /// are pruned first.
    pub fn with<R>(&self, id: &str, f: impl FnOnce(&mut SessionState) -> R) -> R {
        let mut sessions = self.inner.lock();
        let timeout = self.idle_timeout;
        let before = sessions.len();
        sessions.retain(|_, s| s.last_seen.elapsed() < timeout);
        if sessions.len() != before {
            debug!(pruned = before - sessions.len(), "pruned idle sessions");
        }

        let state = sessions
            .entry(id.to_string())
            .or_insert_with(SessionState::new);
        state.last_seen = Instant::now();
        f(state)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }
}
