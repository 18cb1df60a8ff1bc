use dashmap::DashMap;
use engram_core::types::WorkingMemoryTurn;
use std::collections::VecDeque;
use tracing::debug;

struct SessionBuffer {
    turns: VecDeque<WorkingMemoryTurn>,
    last_active: i64,
}

/// Bounded per-session ring of recent conversation turns.
///
/// Each session keeps at most `window_turns` turns; appending beyond the
/// window evicts the oldest turn. Sessions idle past the configured timeout
/// are dropped wholesale by `expire_idle_sessions`.
pub struct WorkingMemoryStore {
    sessions: DashMap<String, SessionBuffer>,
    window_turns: usize,
}

impl WorkingMemoryStore {
    pub fn new(window_turns: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            window_turns: window_turns.max(1),
        }
    }

    /// Appends a turn to the session's buffer, evicting the oldest turn when
    /// the window is full. Creates the session on first append.
    pub fn append(&self, turn: WorkingMemoryTurn) {
        let now = chrono::Utc::now().timestamp();
        let mut buffer = self
            .sessions
            .entry(turn.session_id.clone())
            .or_insert_with(|| SessionBuffer {
                turns: VecDeque::with_capacity(self.window_turns),
                last_active: now,
            });

        if buffer.turns.len() >= self.window_turns {
            buffer.turns.pop_front();
        }
        buffer.turns.push_back(turn);
        buffer.last_active = now;
    }

    /// Returns up to `n` of the most recent turns for a session, oldest
    /// first. An unknown session yields an empty list.
    pub fn recent(&self, session_id: &str, n: usize) -> Vec<WorkingMemoryTurn> {
        match self.sessions.get(session_id) {
            Some(buffer) => {
                let skip = buffer.turns.len().saturating_sub(n);
                buffer.turns.iter().skip(skip).cloned().collect()
            }
            None => Vec::new(),
        }
    }

    /// All buffered turns for a session, oldest first.
    pub fn all(&self, session_id: &str) -> Vec<WorkingMemoryTurn> {
        self.recent(session_id, usize::MAX)
    }

    pub fn turn_count(&self, session_id: &str) -> usize {
        self.sessions
            .get(session_id)
            .map_or(0, |buffer| buffer.turns.len())
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Removes an entire session buffer, e.g. after its turns were distilled.
    pub fn drop_session(&self, session_id: &str) -> bool {
        self.sessions.remove(session_id).is_some()
    }

    /// Drops every session whose last activity is older than `idle_timeout`
    /// seconds. Returns the number of sessions removed.
    pub fn expire_idle_sessions(&self, idle_timeout_secs: u64) -> usize {
        let cutoff = chrono::Utc::now().timestamp() - idle_timeout_secs as i64;
        let before = self.sessions.len();
        self.sessions.retain(|_, buffer| buffer.last_active >= cutoff);
        let removed = before - self.sessions.len();
        if removed > 0 {
            debug!(removed, "Expired idle working-memory sessions");
        }
        removed
    }
}
