//! # Session State Store
//!
//! Per-session conversation history, research results, and the processing
//! flag that enforces at most one active run per session. Critical sections
//! are brief and never span an await, so the store is a plain sync type
//! shared behind an `Arc`.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::collaborators::{ResearchResult, Source};
use crate::error::SessionError;

/// How a turn was answered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeKind {
    /// Plain conversational reply
    Chat,
    /// Answer built from a research run
    ResearchEnhanced,
}

/// One completed request-response turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exchange {
    pub input: String,
    pub response: String,
    #[serde(rename = "type")]
    pub kind: ExchangeKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<Source>,
}

/// Message role for collaborator context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A single message projected from the exchange history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

/// Conversational context spanning multiple runs
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: String,
    pub history: Vec<Exchange>,
    /// Result of the most recent research run, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_research: Option<ResearchResult>,
    /// Set when a research run has stored a result this session
    pub has_new_research: bool,
    /// True while a run is active; a second message is rejected, not queued
    pub processing: bool,
    pub created_at: DateTime<Utc>,
}

impl Session {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            history: Vec::new(),
            last_research: None,
            has_new_research: false,
            processing: false,
            created_at: Utc::now(),
        }
    }
}

/// Snapshot for the status surface
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SessionStatus {
    pub exists: bool,
    pub processing: bool,
    pub turns: usize,
}

/// In-process store of all sessions
///
/// Session fields are mutated only by the orchestrator owning the session's
/// active run; `begin_run` is the single gate that grants that ownership.
#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Session>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Session>> {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Session>> {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up a session, creating it on first contact
    pub fn get_or_create(&self, session_id: &str) -> Session {
        self.write()
            .entry(session_id.to_string())
            .or_insert_with(|| Session::new(session_id))
            .clone()
    }

    /// Claim the session for a new run.
    ///
    /// Atomically checks and sets the processing flag; a session mid-run
    /// rejects the message with a retriable error instead of queueing it.
    pub fn begin_run(&self, session_id: &str) -> Result<(), SessionError> {
        let mut sessions = self.write();
        let session = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Session::new(session_id));
        if session.processing {
            return Err(SessionError::AlreadyProcessing(session_id.to_string()));
        }
        session.processing = true;
        Ok(())
    }

    /// Append a completed (or failed) turn to the history
    pub fn append_exchange(&self, session_id: &str, exchange: Exchange) {
        let mut sessions = self.write();
        let session = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Session::new(session_id));
        session.history.push(exchange);
    }

    /// Store the result of a research run on the session
    pub fn store_research(&self, session_id: &str, result: ResearchResult) {
        if let Some(session) = self.write().get_mut(session_id) {
            session.last_research = Some(result);
            session.has_new_research = true;
        }
    }

    /// Release the processing flag, ending the run's ownership
    pub fn release(&self, session_id: &str) {
        if let Some(session) = self.write().get_mut(session_id) {
            session.processing = false;
        }
    }

    /// Clear history and flags, keeping the session id
    pub fn reset(&self, session_id: &str) {
        let mut sessions = self.write();
        sessions.insert(session_id.to_string(), Session::new(session_id));
    }

    pub fn is_processing(&self, session_id: &str) -> bool {
        self.read()
            .get(session_id)
            .map(|s| s.processing)
            .unwrap_or(false)
    }

    /// Snapshot for the status surface
    pub fn status(&self, session_id: &str) -> SessionStatus {
        match self.read().get(session_id) {
            Some(session) => SessionStatus {
                exists: true,
                processing: session.processing,
                turns: session.history.len(),
            },
            None => SessionStatus {
                exists: false,
                processing: false,
                turns: 0,
            },
        }
    }

    /// Project the last `window` exchanges into role-tagged messages for
    /// collaborator context
    pub fn recent_messages(&self, session_id: &str, window: usize) -> Vec<Message> {
        let sessions = self.read();
        let Some(session) = sessions.get(session_id) else {
            return Vec::new();
        };
        let start = session.history.len().saturating_sub(window);
        session.history[start..]
            .iter()
            .flat_map(|exchange| {
                [
                    Message {
                        role: Role::User,
                        content: exchange.input.clone(),
                    },
                    Message {
                        role: Role::Assistant,
                        content: exchange.response.clone(),
                    },
                ]
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chat_exchange(input: &str, response: &str) -> Exchange {
        Exchange {
            input: input.to_string(),
            response: response.to_string(),
            kind: ExchangeKind::Chat,
            sources: Vec::new(),
        }
    }

    #[test]
    fn test_begin_run_rejects_while_processing() {
        let store = SessionStore::new();
        store.begin_run("s").unwrap();
        let err = store.begin_run("s").unwrap_err();
        assert!(err.is_retriable());

        store.release("s");
        store.begin_run("s").unwrap();
    }

    #[test]
    fn test_sessions_are_independent() {
        let store = SessionStore::new();
        store.begin_run("a").unwrap();
        store.begin_run("b").unwrap();
        assert!(store.is_processing("a"));
        assert!(store.is_processing("b"));
    }

    #[test]
    fn test_reset_clears_history_and_flags() {
        let store = SessionStore::new();
        store.begin_run("s").unwrap();
        store.append_exchange("s", chat_exchange("hi", "hello"));
        store.reset("s");

        let status = store.status("s");
        assert!(status.exists);
        assert!(!status.processing);
        assert_eq!(status.turns, 0);
    }

    #[test]
    fn test_recent_messages_window() {
        let store = SessionStore::new();
        for i in 0..5 {
            store.append_exchange("s", chat_exchange(&format!("q{i}"), &format!("a{i}")));
        }

        let messages = store.recent_messages("s", 3);
        assert_eq!(messages.len(), 6);
        assert_eq!(messages[0].content, "q2");
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[5].content, "a4");
        assert_eq!(messages[5].role, Role::Assistant);
    }

    #[test]
    fn test_recent_messages_unknown_session() {
        let store = SessionStore::new();
        assert!(store.recent_messages("nope", 3).is_empty());
    }

    #[test]
    fn test_store_research_sets_flag() {
        let store = SessionStore::new();
        store.get_or_create("s");
        store.store_research(
            "s",
            ResearchResult {
                summary: "S".to_string(),
                ..Default::default()
            },
        );
        let session = store.get_or_create("s");
        assert!(session.has_new_research);
        assert_eq!(session.last_research.unwrap().summary, "S");
    }

    #[test]
    fn test_exchange_kind_wire_name() {
        let json = serde_json::to_string(&chat_exchange("q", "a")).unwrap();
        assert!(json.contains(r#""type":"chat""#));
    }
}
