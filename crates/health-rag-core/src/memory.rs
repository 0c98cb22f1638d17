//! Per-session conversation memory.
//!
//! Holds one append-only turn history per session id. Sessions are created
//! lazily on first access and cleared only by an explicit [`SessionMemory::reset`].
//! There is no expiry: a session accumulates turns until it is reset.
//!
//! # Locking
//!
//! The session table is behind an `RwLock` that is held only long enough to
//! look up or insert a session. Each session's history has its own `Mutex`,
//! so concurrent turns on different sessions never wait on each other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use tracing::debug;

use crate::error::{RagError, Result};
use crate::models::ChatTurn;

type History = Arc<Mutex<Vec<ChatTurn>>>;

fn lock(history: &Mutex<Vec<ChatTurn>>) -> MutexGuard<'_, Vec<ChatTurn>> {
    history.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Read-only view of one session's history.
#[derive(Clone)]
pub struct MemoryHandle {
    session_id: String,
    history: History,
}

impl MemoryHandle {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn len(&self) -> usize {
        lock(&self.history).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Session id → ordered turn history.
#[derive(Default)]
pub struct SessionMemory {
    sessions: RwLock<HashMap<String, History>>,
}

impl SessionMemory {
    pub fn new() -> Self {
        Self::default()
    }

    fn find(&self, session_id: &str) -> Option<History> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .cloned()
    }

    /// Return the session's handle, creating an empty history if absent.
    pub fn get_or_create(&self, session_id: &str) -> MemoryHandle {
        if let Some(history) = self.find(session_id) {
            return MemoryHandle {
                session_id: session_id.to_string(),
                history,
            };
        }
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let history = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| {
                debug!(session_id, "created session memory");
                Arc::new(Mutex::new(Vec::new()))
            })
            .clone();
        MemoryHandle {
            session_id: session_id.to_string(),
            history,
        }
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.find(session_id).is_some()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Append one turn, stamping its `sequence_no` with the next position.
    ///
    /// # Errors
    ///
    /// [`RagError::UnknownSession`] if the session was never created.
    pub fn append(&self, session_id: &str, turn: ChatTurn) -> Result<()> {
        let history = self
            .find(session_id)
            .ok_or_else(|| RagError::UnknownSession(session_id.to_string()))?;
        push(&mut lock(&history), turn);
        Ok(())
    }

    /// Append a user turn and its assistant reply as one adjacent pair.
    pub fn append_exchange(&self, session_id: &str, user: ChatTurn, assistant: ChatTurn) -> Result<()> {
        let history = self
            .find(session_id)
            .ok_or_else(|| RagError::UnknownSession(session_id.to_string()))?;
        let mut turns = lock(&history);
        push(&mut turns, user);
        push(&mut turns, assistant);
        Ok(())
    }

    /// Snapshot of the session's turns for prompt assembly.
    ///
    /// An unknown session has an empty history.
    pub fn to_prompt_history(&self, session_id: &str) -> Vec<ChatTurn> {
        self.find(session_id)
            .map(|history| lock(&history).clone())
            .unwrap_or_default()
    }

    /// Clear the session's history. The session itself stays registered.
    pub fn reset(&self, session_id: &str) {
        if let Some(history) = self.find(session_id) {
            lock(&history).clear();
            debug!(session_id, "reset session memory");
        }
    }
}

fn push(turns: &mut Vec<ChatTurn>, mut turn: ChatTurn) {
    turn.sequence_no = turns.len() as u64;
    turns.push(turn);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use std::thread;

    #[test]
    fn test_get_or_create_is_lazy_and_idempotent() {
        let memory = SessionMemory::new();
        assert!(!memory.contains("S1"));
        let a = memory.get_or_create("S1");
        let b = memory.get_or_create("S1");
        assert!(a.is_empty());
        assert_eq!(memory.session_count(), 1);
        memory.append("S1", ChatTurn::user("hi")).unwrap();
        assert_eq!(b.len(), 1);
    }

    #[test]
    fn test_append_unknown_session() {
        let memory = SessionMemory::new();
        let err = memory.append("nope", ChatTurn::user("x")).unwrap_err();
        assert!(matches!(err, RagError::UnknownSession(id) if id == "nope"));
    }

    #[test]
    fn test_history_order_and_reset() {
        let memory = SessionMemory::new();
        memory.get_or_create("S2");
        memory
            .append_exchange("S2", ChatTurn::user("user1"), ChatTurn::assistant("assistant1"))
            .unwrap();
        memory
            .append_exchange("S2", ChatTurn::user("user2"), ChatTurn::assistant("assistant2"))
            .unwrap();

        let history = memory.to_prompt_history("S2");
        let contents: Vec<&str> = history.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["user1", "assistant1", "user2", "assistant2"]);
        let roles: Vec<Role> = history.iter().map(|t| t.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User, Role::Assistant]);
        let seqs: Vec<u64> = history.iter().map(|t| t.sequence_no).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3]);

        memory.reset("S2");
        assert!(memory.to_prompt_history("S2").is_empty());
        assert!(memory.contains("S2"));
    }

    #[test]
    fn test_unknown_session_history_is_empty() {
        let memory = SessionMemory::new();
        assert!(memory.to_prompt_history("ghost").is_empty());
        memory.reset("ghost");
        assert!(!memory.contains("ghost"));
    }

    #[test]
    fn test_concurrent_sessions_independent() {
        let memory = Arc::new(SessionMemory::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let memory = Arc::clone(&memory);
                thread::spawn(move || {
                    let id = format!("session-{}", i);
                    memory.get_or_create(&id);
                    for n in 0..50 {
                        memory
                            .append_exchange(&id, ChatTurn::user(format!("q{}", n)), ChatTurn::assistant(format!("a{}", n)))
                            .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(memory.session_count(), 8);
        for i in 0..8 {
            let history = memory.to_prompt_history(&format!("session-{}", i));
            assert_eq!(history.len(), 100);
            assert_eq!(history[0].content, "q0");
            assert_eq!(history[99].content, "a49");
            assert!(history.windows(2).all(|w| w[1].sequence_no == w[0].sequence_no + 1));
        }
    }
}
