//! LLM-backed collaborators.
//!
//! One thin chat-completions client plus the four concrete collaborator
//! implementations the orchestrator is wired with: intent classifier, chat
//! responder, research engine, and synthesizer. All of them go through the
//! same OpenAI-compatible endpoint, so a single set of env vars configures
//! the whole stack.

use std::time::Instant;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use scout_core::{
    ChatResponder, Intent, IntentClassifier, Message, ProgressEvent, ProgressKind,
    ProgressPublisher, ResearchEngine, ResearchResult, Role, Synthesizer,
};

const INTENT_PROMPT: &str = "You are an intent classifier. Analyse the user's message and respond \
with exactly one word: SEARCH, CHAT, or EXIT.\n\n\
- SEARCH: User wants to search for information, research a topic, or find current data\n\
- CHAT: User wants to have a normal conversation\n\
- EXIT: User wants to end the session, leave, or stop chatting.\n\n\
Respond with only the classification word.";

const CHAT_PROMPT: &str = "You are a friendly, knowledgeable AI companion. If the user needs \
real-time data, politely suggest they ask for a search.\n\nBe engaging and friendly.";

const RESEARCH_PROMPT: &str = "You are an expert research agent. Research the user's query and \
respond with only a JSON object of this exact shape:\n\
{\"summary\": \"...\", \"sources\": [{\"url\": \"...\", \"title\": \"...\", \"snippet\": \"...\"}], \
\"citations\": [\"...\"]}\n\n\
Include every source you relied on, with absolute http(s) URLs.";

const SYNTHESIS_PROMPT: &str = "You are an expert research assistant. Create a clean, informative \
response based on the research summary, sources and citations.\n\n\
Format your response as clean markdown with proper headers, bullet points, and emphasis. \
Do not include any source references or URLs.";

/// One message in a chat-completions request
#[derive(Debug, Clone, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

impl ChatMessage {
    fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system",
            content: content.into(),
        }
    }

    fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user",
            content: content.into(),
        }
    }

    fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant",
            content: content.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// Thin client for an OpenAI-compatible chat-completions endpoint
#[derive(Debug, Clone)]
pub struct LlmClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl LlmClient {
    /// Build from `SCOUT_API_KEY` (required), `SCOUT_BASE_URL`, and
    /// `SCOUT_MODEL`
    pub fn from_env() -> anyhow::Result<Self> {
        let api_key = std::env::var("SCOUT_API_KEY")
            .context("SCOUT_API_KEY is not set; the LLM collaborators need it")?;
        let base_url = std::env::var("SCOUT_BASE_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let model = std::env::var("SCOUT_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
        Ok(Self {
            http: reqwest::Client::new(),
            api_key,
            base_url,
            model,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        temperature: f64,
        max_tokens: Option<u32>,
    ) -> anyhow::Result<String> {
        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": temperature,
        });
        if let Some(max_tokens) = max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("completion request failed")?
            .error_for_status()
            .context("completion request rejected")?;

        let completion: CompletionResponse = response
            .json()
            .await
            .context("malformed completion response")?;
        completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| anyhow!("completion response carried no content"))
    }
}

/// Project orchestrator history into chat-completions messages
fn history_messages(history: &[Message]) -> Vec<ChatMessage> {
    history
        .iter()
        .map(|message| match message.role {
            Role::User => ChatMessage::user(message.content.clone()),
            Role::Assistant => ChatMessage::assistant(message.content.clone()),
        })
        .collect()
}

fn with_current_time(prompt: &str) -> String {
    let now = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
    format!("{prompt}\n\nThe current time is {now}.")
}

/// Classifies intent with a single low-temperature completion
pub struct LlmIntentClassifier {
    client: LlmClient,
}

impl LlmIntentClassifier {
    pub fn new(client: LlmClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl IntentClassifier for LlmIntentClassifier {
    async fn classify(&self, message: &str, _history: &[Message]) -> anyhow::Result<Intent> {
        let label = self
            .client
            .complete(
                vec![
                    ChatMessage::system(with_current_time(INTENT_PROMPT)),
                    ChatMessage::user(message.to_string()),
                ],
                0.1,
                Some(10),
            )
            .await?;
        Intent::parse(&label).ok_or_else(|| anyhow!("unrecognized intent label: {label:?}"))
    }
}

/// Friendly conversational replies with recent history as context
pub struct LlmChatResponder {
    client: LlmClient,
}

impl LlmChatResponder {
    pub fn new(client: LlmClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ChatResponder for LlmChatResponder {
    async fn reply(&self, message: &str, history: &[Message]) -> anyhow::Result<String> {
        let mut messages = vec![ChatMessage::system(with_current_time(CHAT_PROMPT))];
        messages.extend(history_messages(history));
        messages.push(ChatMessage::user(message.to_string()));
        self.client.complete(messages, 0.7, None).await
    }
}

/// Single-shot research engine over the completions endpoint.
///
/// Publishes agent and LLM progress so the client sees activity while the
/// (slow) research completion runs.
pub struct LlmResearchEngine {
    client: LlmClient,
}

impl LlmResearchEngine {
    pub fn new(client: LlmClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ResearchEngine for LlmResearchEngine {
    async fn run(
        &self,
        query: &str,
        progress: ProgressPublisher,
    ) -> anyhow::Result<ResearchResult> {
        progress.publish(
            ProgressEvent::new(ProgressKind::AgentStarted)
                .with_agent_role("Research Agent")
                .with_message("Research agent thinking..."),
        );
        progress.publish(
            ProgressEvent::new(ProgressKind::LlmStarted)
                .with_model(self.client.model())
                .with_message("Researching the topic..."),
        );

        let started = Instant::now();
        let raw = match self
            .client
            .complete(
                vec![
                    ChatMessage::system(RESEARCH_PROMPT.to_string()),
                    ChatMessage::user(query.to_string()),
                ],
                0.3,
                None,
            )
            .await
        {
            Ok(raw) => raw,
            Err(err) => {
                progress.publish(
                    ProgressEvent::new(ProgressKind::LlmError)
                        .with_model(self.client.model())
                        .with_error(err.to_string()),
                );
                return Err(err);
            }
        };
        let elapsed = started.elapsed().as_secs_f64();

        progress.publish(
            ProgressEvent::new(ProgressKind::LlmCompleted)
                .with_model(self.client.model())
                .with_execution_time(elapsed)
                .with_message("Research model responded"),
        );

        let result = parse_research(&raw)?;

        progress.publish(
            ProgressEvent::new(ProgressKind::AgentCompleted)
                .with_agent_role("Research Agent")
                .with_message("Gathering final thoughts..."),
        );
        progress.publish(
            ProgressEvent::new(ProgressKind::TaskCompleted)
                .with_execution_time(elapsed)
                .with_message(format!("Research complete: {} sources", result.sources.len())),
        );

        Ok(result)
    }
}

/// Parse engine output into a structured result, tolerating markdown fences
fn parse_research(raw: &str) -> anyhow::Result<ResearchResult> {
    let trimmed = raw.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();
    serde_json::from_str(body).context("research output is not the expected JSON shape")
}

/// Turns a structured research result into final markdown prose
pub struct LlmSynthesizer {
    client: LlmClient,
}

impl LlmSynthesizer {
    pub fn new(client: LlmClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Synthesizer for LlmSynthesizer {
    async fn synthesize(&self, query: &str, result: &ResearchResult) -> anyhow::Result<String> {
        let sources = serde_json::to_string(&result.sources).unwrap_or_default();
        let citations = serde_json::to_string(&result.citations).unwrap_or_default();
        let system = format!(
            "{SYNTHESIS_PROMPT}\n\nResearch Summary:\n{}\n\nSources:\n{sources}\n\nCitations:\n{citations}\n\nUser Question: {query}",
            result.summary,
        );
        self.client
            .complete(
                vec![
                    ChatMessage::system(system),
                    ChatMessage::user(format!(
                        "Format this research into a professional response: {query}"
                    )),
                ],
                0.7,
                None,
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_research_plain_json() {
        let result =
            parse_research(r#"{"summary":"S","sources":[{"url":"http://a.com"}],"citations":[]}"#)
                .unwrap();
        assert_eq!(result.summary, "S");
        assert_eq!(result.sources.len(), 1);
    }

    #[test]
    fn test_parse_research_fenced_json() {
        let raw = "```json\n{\"summary\":\"S\"}\n```";
        let result = parse_research(raw).unwrap();
        assert_eq!(result.summary, "S");
        assert!(result.sources.is_empty());
    }

    #[test]
    fn test_parse_research_rejects_prose() {
        assert!(parse_research("I could not find anything.").is_err());
    }

    #[test]
    fn test_history_projection_keeps_roles() {
        let history = vec![
            Message {
                role: Role::User,
                content: "hi".to_string(),
            },
            Message {
                role: Role::Assistant,
                content: "hello".to_string(),
            },
        ];
        let messages = history_messages(&history);
        assert_eq!(messages[0].role, "user");
        assert_eq!(messages[1].role, "assistant");
    }
}
