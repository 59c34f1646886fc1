//! # Error Taxonomy
//!
//! Every failure inside a run is caught at the orchestrator boundary and
//! converted to exactly one `RUN_ERROR` event; nothing propagates past it
//! uncaught. The variants here distinguish what the server surface and the
//! tests need to distinguish, no more.

use std::time::Duration;

use thiserror::Error;

/// Errors raised by the session store
#[derive(Debug, Error)]
pub enum SessionError {
    /// A message arrived while the session's previous run is still active.
    /// The research path is not re-entrant per session; callers should
    /// retry once the active run terminates.
    #[error("session {0} is already processing a message")]
    AlreadyProcessing(String),
}

impl SessionError {
    /// Whether the caller can simply retry later
    pub fn is_retriable(&self) -> bool {
        matches!(self, SessionError::AlreadyProcessing(_))
    }
}

/// Errors raised while executing a run
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The chat responder failed; surfaced as RUN_ERROR.
    #[error("chat responder failed: {0}")]
    Responder(#[source] anyhow::Error),

    /// The research engine failed; surfaced as RUN_ERROR.
    #[error("research engine failed: {0}")]
    Research(#[source] anyhow::Error),

    /// The research run exceeded its overall deadline. Treated identically
    /// to any other engine failure.
    #[error("research run exceeded the {0:?} timeout")]
    ResearchTimeout(Duration),

    /// The spawned research task stopped without producing a result.
    #[error("research task stopped unexpectedly: {0}")]
    ResearchJoin(String),

    /// The client went away mid-run. No event is emitted for this; the
    /// channel is gone.
    #[error("client disconnected before the run finished")]
    Disconnected,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_already_processing_is_retriable() {
        let err = SessionError::AlreadyProcessing("default".to_string());
        assert!(err.is_retriable());
        assert!(err.to_string().contains("default"));
    }

    #[test]
    fn test_timeout_display() {
        let err = OrchestratorError::ResearchTimeout(Duration::from_secs(120));
        assert!(err.to_string().contains("120"));
    }
}
