//! # Progress Events
//!
//! Event types streamed to the client while a run executes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::collaborators::Source;

/// Kind of progress event
///
/// This is a closed set: the protocol encoder matches on it exhaustively,
/// so adding a kind forces an explicit wire mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProgressKind {
    /// Run accepted, processing begins
    RunStarted,
    /// An agent inside the research engine started working
    AgentStarted,
    /// An agent finished
    AgentCompleted,
    /// An agent failed
    AgentError,
    /// A tool invocation started
    ToolStarted,
    /// A tool invocation finished
    ToolCompleted,
    /// A tool invocation failed
    ToolError,
    /// An LLM call started
    LlmStarted,
    /// An LLM call finished
    LlmCompleted,
    /// An LLM call failed
    LlmError,
    /// A research task started
    TaskStarted,
    /// A research task finished
    TaskCompleted,
    /// A research task failed
    TaskFailed,
    /// A chunk of the final answer text
    TextMessageDelta,
    /// Sources backing the final answer
    SourcesUpdate,
    /// Run finished successfully (terminal)
    RunFinished,
    /// Run failed (terminal)
    RunError,
}

impl ProgressKind {
    /// Whether this kind ends a run; exactly one terminal event closes
    /// every run, and nothing may follow it.
    pub fn is_terminal(self) -> bool {
        matches!(self, ProgressKind::RunFinished | ProgressKind::RunError)
    }
}

/// A single unit of run progress
///
/// Carries a human-readable message plus whichever structured fields apply
/// to the kind. Unused fields stay `None` and are skipped on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Unique event ID
    pub id: String,
    /// Kind of event
    pub kind: ProgressKind,
    /// Timestamp
    pub timestamp: DateTime<Utc>,
    /// Human-readable status message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Role of the agent this event concerns
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_role: Option<String>,
    /// Tool name for tool events
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    /// Query passed to the tool
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_query: Option<String>,
    /// Model name for LLM events
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Execution time in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_time: Option<f64>,
    /// Token usage for LLM events
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<u64>,
    /// Answer text carried by `TextMessageDelta`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Sources carried by `SourcesUpdate`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<Source>,
    /// Error description carried by failure kinds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Correlation ID of the emitting agent, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    /// Session the run belongs to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl ProgressEvent {
    /// Create a new event
    pub fn new(kind: ProgressKind) -> Self {
        Self {
            id: event_id(),
            kind,
            timestamp: Utc::now(),
            message: None,
            agent_role: None,
            tool_name: None,
            tool_query: None,
            model: None,
            execution_time: None,
            token_usage: None,
            content: None,
            sources: Vec::new(),
            error: None,
            agent_id: None,
            session_id: None,
        }
    }

    /// Add a status message
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Add the agent role
    pub fn with_agent_role(mut self, role: impl Into<String>) -> Self {
        self.agent_role = Some(role.into());
        self
    }

    /// Add tool details
    pub fn with_tool(mut self, name: impl Into<String>, query: Option<String>) -> Self {
        self.tool_name = Some(name.into());
        self.tool_query = query;
        self
    }

    /// Add the model name
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Add execution time in seconds
    pub fn with_execution_time(mut self, seconds: f64) -> Self {
        self.execution_time = Some(seconds);
        self
    }

    /// Add token usage
    pub fn with_token_usage(mut self, tokens: u64) -> Self {
        self.token_usage = Some(tokens);
        self
    }

    /// Add answer text (for deltas)
    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Add sources (for source updates)
    pub fn with_sources(mut self, sources: Vec<Source>) -> Self {
        self.sources = sources;
        self
    }

    /// Add an error description
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Add the emitting agent's correlation ID
    pub fn with_agent_id(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    /// Tag the event with its session
    pub fn for_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// Generate a unique event ID (not cryptographic)
fn event_id() -> String {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_nanos();
    let salt = RandomState::new().build_hasher().finish() as u32;
    format!("{:x}-{:x}", nanos, salt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_builder() {
        let event = ProgressEvent::new(ProgressKind::AgentStarted)
            .with_agent_role("Research Agent")
            .with_message("Research agent thinking...")
            .for_session("s-1");

        assert_eq!(event.kind, ProgressKind::AgentStarted);
        assert_eq!(event.agent_role.as_deref(), Some("Research Agent"));
        assert_eq!(event.session_id.as_deref(), Some("s-1"));
        assert!(event.content.is_none());
    }

    #[test]
    fn test_kind_wire_names() {
        let json = serde_json::to_string(&ProgressKind::RunStarted).unwrap();
        assert_eq!(json, "\"RUN_STARTED\"");
        let json = serde_json::to_string(&ProgressKind::TextMessageDelta).unwrap();
        assert_eq!(json, "\"TEXT_MESSAGE_DELTA\"");
    }

    #[test]
    fn test_terminal_kinds() {
        assert!(ProgressKind::RunFinished.is_terminal());
        assert!(ProgressKind::RunError.is_terminal());
        assert!(!ProgressKind::TaskFailed.is_terminal());
        assert!(!ProgressKind::TextMessageDelta.is_terminal());
    }

    #[test]
    fn test_optional_fields_skipped() {
        let event = ProgressEvent::new(ProgressKind::RunFinished);
        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("tool_name"));
        assert!(!json.contains("sources"));
    }
}
