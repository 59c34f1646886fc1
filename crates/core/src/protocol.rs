//! # Protocol Encoder
//!
//! Purely a projection: serializes progress events into self-describing
//! wire frames, one event per frame, each independently parseable. The
//! match on [`ProgressKind`] is exhaustive, so a new event kind cannot ship
//! without an explicit wire mapping. Source scrubbing lives here too - the
//! rendering boundary drops malformed URLs rather than the core.

use chrono::SecondsFormat;
use serde::Serialize;
use serde_json::{json, Map, Value};
use url::Url;

use crate::collaborators::Source;
use crate::events::{ProgressEvent, ProgressKind};

/// End-of-stream sentinel sent after the terminal event
pub const DONE_SENTINEL: &str = "[DONE]";

/// One wire frame
#[derive(Debug, Clone, Serialize)]
pub struct StreamFrame {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: Value,
    /// ISO-8601 timestamp
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl StreamFrame {
    /// Render as one SSE frame: `data: {json}\n\n`
    pub fn to_sse(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_default();
        format!("data: {json}\n\n")
    }
}

/// Render the end-of-stream sentinel as an SSE frame
pub fn done_sse() -> String {
    format!("data: {DONE_SENTINEL}\n\n")
}

/// Projects internal progress events onto the wire format
#[derive(Debug, Clone)]
pub struct ProtocolEncoder {
    /// Cap on sources per SOURCES_UPDATE frame
    max_sources: usize,
}

impl Default for ProtocolEncoder {
    fn default() -> Self {
        Self { max_sources: 5 }
    }
}

impl ProtocolEncoder {
    pub fn new(max_sources: usize) -> Self {
        Self { max_sources }
    }

    /// Encode one event. No semantic logic: every decision here is about
    /// field placement, not run behavior.
    pub fn encode(&self, event: &ProgressEvent) -> StreamFrame {
        let (event_type, data) = match event.kind {
            ProgressKind::RunStarted => (
                "RUN_STARTED",
                json!({
                    "status": "processing",
                    "message": event.message.clone().unwrap_or_default(),
                }),
            ),
            ProgressKind::TextMessageDelta => (
                "TEXT_MESSAGE_DELTA",
                json!({ "content": event.content.clone().unwrap_or_default() }),
            ),
            ProgressKind::SourcesUpdate => (
                "SOURCES_UPDATE",
                json!({ "sources": self.scrub_sources(&event.sources) }),
            ),
            ProgressKind::RunFinished => ("RUN_FINISHED", json!({ "status": "complete" })),
            ProgressKind::RunError => (
                "RUN_ERROR",
                json!({ "error": event.error.clone().unwrap_or_default() }),
            ),
            ProgressKind::AgentStarted | ProgressKind::AgentCompleted => {
                ("AGENT_STATUS", status_data(event))
            }
            ProgressKind::AgentError => ("AGENT_ERROR", status_data(event)),
            ProgressKind::TaskStarted | ProgressKind::TaskCompleted => {
                ("TASK_STATUS", status_data(event))
            }
            ProgressKind::TaskFailed => ("TASK_ERROR", status_data(event)),
            ProgressKind::ToolStarted | ProgressKind::ToolCompleted => {
                ("TOOL_USAGE", status_data(event))
            }
            ProgressKind::ToolError => ("TOOL_ERROR", status_data(event)),
            ProgressKind::LlmStarted | ProgressKind::LlmCompleted => {
                ("LLM_STATUS", status_data(event))
            }
            ProgressKind::LlmError => ("LLM_ERROR", status_data(event)),
        };

        StreamFrame {
            event_type: event_type.to_string(),
            data,
            timestamp: event
                .timestamp
                .to_rfc3339_opts(SecondsFormat::Millis, true),
            agent_id: event.agent_id.clone(),
            session_id: event.session_id.clone(),
        }
    }

    /// Drop malformed URLs, default missing titles from the domain, and cap
    /// the list. Sources survive the core untouched; this is the rendering
    /// boundary.
    fn scrub_sources(&self, sources: &[Source]) -> Vec<Source> {
        sources
            .iter()
            .filter_map(|source| {
                let url = parse_absolute(&source.url)?;
                let mut scrubbed = source.clone();
                if scrubbed.title.as_deref().map_or(true, str::is_empty) {
                    scrubbed.title = Some(display_domain(&url));
                }
                Some(scrubbed)
            })
            .take(self.max_sources)
            .collect()
    }
}

fn status_data(event: &ProgressEvent) -> Value {
    let mut data = Map::new();
    data.insert(
        "message".to_string(),
        Value::from(event.message.clone().unwrap_or_default()),
    );
    if let Some(role) = &event.agent_role {
        data.insert("agent_role".to_string(), Value::from(role.clone()));
    }
    if let Some(tool) = &event.tool_name {
        data.insert("tool_name".to_string(), Value::from(tool.clone()));
    }
    if let Some(query) = &event.tool_query {
        data.insert("tool_query".to_string(), Value::from(query.clone()));
    }
    if let Some(model) = &event.model {
        data.insert("model".to_string(), Value::from(model.clone()));
    }
    if let Some(seconds) = event.execution_time {
        data.insert("execution_time".to_string(), Value::from(seconds));
    }
    if let Some(tokens) = event.token_usage {
        data.insert("token_usage".to_string(), Value::from(tokens));
    }
    if let Some(error) = &event.error {
        data.insert("error".to_string(), Value::from(error.clone()));
    }
    Value::Object(data)
}

fn parse_absolute(raw: &str) -> Option<Url> {
    let url = Url::parse(raw).ok()?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return None;
    }
    Some(url)
}

/// Clean display name for a source without a title
fn display_domain(url: &Url) -> String {
    let Some(host) = url.host_str() else {
        return "Source".to_string();
    };
    let domain = host.strip_prefix("www.").unwrap_or(host);
    let mut chars = domain.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => "Source".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_kind_mapping() {
        let encoder = ProtocolEncoder::default();
        let cases = [
            (ProgressKind::AgentStarted, "AGENT_STATUS"),
            (ProgressKind::AgentCompleted, "AGENT_STATUS"),
            (ProgressKind::AgentError, "AGENT_ERROR"),
            (ProgressKind::TaskStarted, "TASK_STATUS"),
            (ProgressKind::TaskFailed, "TASK_ERROR"),
            (ProgressKind::ToolCompleted, "TOOL_USAGE"),
            (ProgressKind::ToolError, "TOOL_ERROR"),
            (ProgressKind::LlmStarted, "LLM_STATUS"),
            (ProgressKind::LlmError, "LLM_ERROR"),
            (ProgressKind::RunStarted, "RUN_STARTED"),
            (ProgressKind::RunFinished, "RUN_FINISHED"),
            (ProgressKind::RunError, "RUN_ERROR"),
        ];
        for (kind, wire) in cases {
            assert_eq!(encoder.encode(&ProgressEvent::new(kind)).event_type, wire);
        }
    }

    #[test]
    fn test_delta_carries_content() {
        let encoder = ProtocolEncoder::default();
        let frame = encoder.encode(
            &ProgressEvent::new(ProgressKind::TextMessageDelta).with_content("Hi there!"),
        );
        assert_eq!(frame.data["content"], "Hi there!");
    }

    #[test]
    fn test_status_data_structured_fields() {
        let encoder = ProtocolEncoder::default();
        let frame = encoder.encode(
            &ProgressEvent::new(ProgressKind::ToolStarted)
                .with_message("Searching the web...")
                .with_tool("web_search", Some("quantum computing".to_string()))
                .with_execution_time(1.25),
        );
        assert_eq!(frame.data["message"], "Searching the web...");
        assert_eq!(frame.data["tool_name"], "web_search");
        assert_eq!(frame.data["tool_query"], "quantum computing");
        assert_eq!(frame.data["execution_time"], 1.25);
        assert!(frame.data.get("model").is_none());
    }

    #[test]
    fn test_malformed_urls_dropped() {
        let encoder = ProtocolEncoder::default();
        let sources = vec![
            Source::new("http://a.com/article"),
            Source::new("not a url"),
            Source::new("ftp://files.example.com/x"),
            Source::new("https://b.org"),
        ];
        let frame = encoder
            .encode(&ProgressEvent::new(ProgressKind::SourcesUpdate).with_sources(sources));
        let kept = frame.data["sources"].as_array().unwrap();
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0]["url"], "http://a.com/article");
        assert_eq!(kept[1]["url"], "https://b.org");
    }

    #[test]
    fn test_title_defaults_to_domain() {
        let encoder = ProtocolEncoder::default();
        let frame = encoder.encode(
            &ProgressEvent::new(ProgressKind::SourcesUpdate)
                .with_sources(vec![Source::new("https://www.example.com/page")]),
        );
        assert_eq!(frame.data["sources"][0]["title"], "Example.com");
    }

    #[test]
    fn test_existing_title_kept() {
        let encoder = ProtocolEncoder::default();
        let mut source = Source::new("https://example.com");
        source.title = Some("Example Article".to_string());
        let frame = encoder
            .encode(&ProgressEvent::new(ProgressKind::SourcesUpdate).with_sources(vec![source]));
        assert_eq!(frame.data["sources"][0]["title"], "Example Article");
    }

    #[test]
    fn test_sources_capped() {
        let encoder = ProtocolEncoder::new(5);
        let sources: Vec<Source> = (0..8)
            .map(|i| Source::new(format!("https://site{i}.com")))
            .collect();
        let frame = encoder
            .encode(&ProgressEvent::new(ProgressKind::SourcesUpdate).with_sources(sources));
        assert_eq!(frame.data["sources"].as_array().unwrap().len(), 5);
    }

    #[test]
    fn test_sse_framing() {
        let encoder = ProtocolEncoder::default();
        let frame = encoder.encode(&ProgressEvent::new(ProgressKind::RunFinished));
        let sse = frame.to_sse();
        assert!(sse.starts_with("data: {"));
        assert!(sse.ends_with("\n\n"));
        assert!(sse.contains("RUN_FINISHED"));
        assert_eq!(done_sse(), "data: [DONE]\n\n");
    }

    #[test]
    fn test_frame_is_independently_parseable() {
        let encoder = ProtocolEncoder::default();
        let frame = encoder.encode(
            &ProgressEvent::new(ProgressKind::RunError)
                .with_error("engine failed")
                .for_session("s-1"),
        );
        let parsed: Value = serde_json::from_str(&serde_json::to_string(&frame).unwrap()).unwrap();
        assert_eq!(parsed["type"], "RUN_ERROR");
        assert_eq!(parsed["data"]["error"], "engine failed");
        assert_eq!(parsed["session_id"], "s-1");
        assert!(parsed["timestamp"].as_str().unwrap().contains('T'));
    }
}
