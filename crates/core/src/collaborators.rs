//! # Collaborator Seams
//!
//! Trait boundaries for the external collaborators the orchestrator drives:
//! intent classifier, chat responder, research engine, and synthesizer.
//! The orchestrator only depends on these contracts; the server crate wires
//! in concrete LLM-backed implementations.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::bridge::ProgressPublisher;
use crate::session::Message;

/// Classified intent of a user message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Intent {
    /// Regular conversation
    Chat,
    /// The user wants a research run
    Search,
    /// The user is saying goodbye
    Exit,
}

impl Intent {
    /// Parse a classifier label. Returns `None` for anything outside the
    /// closed label set so callers can decide how to recover.
    pub fn parse(raw: &str) -> Option<Intent> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "CHAT" => Some(Intent::Chat),
            "SEARCH" => Some(Intent::Search),
            "EXIT" => Some(Intent::Exit),
            _ => None,
        }
    }
}

/// A source backing a research answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    /// The source URL
    pub url: String,
    /// Title of the source
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Image associated with the source
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    /// Brief snippet or description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}

impl Source {
    /// Create a bare source from a URL
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: None,
            image_url: None,
            snippet: None,
        }
    }
}

/// Structured result of a research run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResearchResult {
    /// Concise summary of the findings
    #[serde(default)]
    pub summary: String,
    /// Sources with metadata
    #[serde(default)]
    pub sources: Vec<Source>,
    /// Citations for the sources used
    #[serde(default)]
    pub citations: Vec<String>,
}

/// Classifies a message into an [`Intent`] given recent history.
///
/// Failure is recoverable: the orchestrator fails open to the chat path.
#[async_trait]
pub trait IntentClassifier: Send + Sync {
    async fn classify(&self, message: &str, history: &[Message]) -> anyhow::Result<Intent>;
}

/// Produces a conversational reply. Emits no progress events.
#[async_trait]
pub trait ChatResponder: Send + Sync {
    async fn reply(&self, message: &str, history: &[Message]) -> anyhow::Result<String>;
}

/// Executes a multi-step research task.
///
/// Runs as an independently spawned task and may publish zero or more
/// progress events through the handed-in publisher while executing.
#[async_trait]
pub trait ResearchEngine: Send + Sync {
    async fn run(&self, query: &str, progress: ProgressPublisher)
        -> anyhow::Result<ResearchResult>;
}

/// Turns a structured research result into final prose.
///
/// Failure is recoverable: the orchestrator falls back to the raw summary.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(&self, query: &str, result: &ResearchResult) -> anyhow::Result<String>;
}

/// The full set of collaborators the orchestrator is wired with
#[derive(Clone)]
pub struct Collaborators {
    pub classifier: Arc<dyn IntentClassifier>,
    pub responder: Arc<dyn ChatResponder>,
    pub engine: Arc<dyn ResearchEngine>,
    pub synthesizer: Arc<dyn Synthesizer>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intent_parse() {
        assert_eq!(Intent::parse("SEARCH"), Some(Intent::Search));
        assert_eq!(Intent::parse(" chat \n"), Some(Intent::Chat));
        assert_eq!(Intent::parse("Exit"), Some(Intent::Exit));
        assert_eq!(Intent::parse("SHOPPING"), None);
        assert_eq!(Intent::parse(""), None);
    }

    #[test]
    fn test_research_result_lenient_deserialization() {
        // Engine output with missing optional fields still parses.
        let result: ResearchResult = serde_json::from_str(r#"{"summary":"S"}"#).unwrap();
        assert_eq!(result.summary, "S");
        assert!(result.sources.is_empty());
        assert!(result.citations.is_empty());
    }

    #[test]
    fn test_source_optional_fields_skipped() {
        let json = serde_json::to_string(&Source::new("http://a.com")).unwrap();
        assert_eq!(json, r#"{"url":"http://a.com"}"#);
    }
}
