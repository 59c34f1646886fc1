//! # Stream Orchestrator
//!
//! Drives one run end to end: claim the session, classify the message,
//! dispatch to the chat or research path, drain research progress while the
//! engine runs, synthesize, stream the chunked answer, and terminate with
//! exactly one RUN_FINISHED or RUN_ERROR.
//!
//! ## Concurrency
//!
//! The research engine executes as an independently spawned task and
//! publishes into the bridge; the orchestrator polls the bridge on a short
//! interval and forwards each event immediately, so progress reaches the
//! client while the engine is still working. The bridge never blocks either
//! side, and a failed send on the outbound channel means the client is gone:
//! the engine task is aborted, queued events are discarded, and the session
//! is released without emitting anything further.

mod phase;

pub use phase::{RunPhase, RunState};

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};

use crate::bridge::EventBridge;
use crate::collaborators::{Collaborators, Intent, ResearchResult, Source};
use crate::error::{OrchestratorError, SessionError};
use crate::events::{ProgressEvent, ProgressKind};
use crate::session::{Exchange, ExchangeKind, Message, SessionStore};

/// Canned reply for a goodbye turn
pub const EXIT_FAREWELL: &str =
    "Session ended. Feel free to start a new one whenever you like!";

/// Generic notice appended to history when a run fails, so turn count
/// stays consistent with messages taken
const FAILURE_NOTICE: &str =
    "Sorry, something went wrong while handling that message. Please try again.";

/// Tunables for the orchestrator
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// How often the bridge is drained while research runs
    pub poll_interval: Duration,
    /// Characters per TEXT_MESSAGE_DELTA chunk
    pub chunk_size: usize,
    /// Overall deadline for a research-path run
    pub research_timeout: Duration,
    /// Exchanges of history handed to collaborators
    pub history_window: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(350),
            chunk_size: 80,
            research_timeout: Duration::from_secs(120),
            history_window: 3,
        }
    }
}

/// What a completed run produced
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub kind: ExchangeKind,
    pub response: String,
    pub sources: Vec<Source>,
    pub success: bool,
    pub error: Option<String>,
}

/// What one execution path produced, before emission
struct PathResult {
    response: String,
    kind: ExchangeKind,
    sources: Vec<Source>,
    research: Option<ResearchResult>,
}

/// The stream orchestrator
pub struct Orchestrator {
    config: OrchestratorConfig,
    store: Arc<SessionStore>,
    bridge: Arc<EventBridge>,
    collaborators: Collaborators,
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        store: Arc<SessionStore>,
        bridge: Arc<EventBridge>,
        collaborators: Collaborators,
    ) -> Self {
        Self {
            config,
            store,
            bridge,
            collaborators,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Claim the session for a run without starting it.
    ///
    /// Rejection happens here, synchronously, so a caller that streams the
    /// run's events can refuse a busy session before opening any stream.
    /// A successful claim must be followed by [`Orchestrator::run_claimed`],
    /// which releases it on every exit path.
    pub fn claim(&self, session_id: &str) -> Result<(), SessionError> {
        self.store.begin_run(session_id)
    }

    /// Claim the session and execute one run. See [`Orchestrator::run_claimed`].
    pub async fn run(
        &self,
        session_id: &str,
        message: &str,
        out: mpsc::Sender<ProgressEvent>,
    ) -> Result<RunOutcome, OrchestratorError> {
        self.claim(session_id)?;
        self.run_claimed(session_id, message, out).await
    }

    /// Execute one run for a session already claimed via
    /// [`Orchestrator::claim`], pushing every event for it into `out` in
    /// order.
    ///
    /// Returns `Err` only when the client disconnected mid-run; every other
    /// failure is converted into a single RUN_ERROR event and reported
    /// through the outcome.
    #[tracing::instrument(skip(self, message, out), fields(preview = %message.chars().take(50).collect::<String>()))]
    pub async fn run_claimed(
        &self,
        session_id: &str,
        message: &str,
        out: mpsc::Sender<ProgressEvent>,
    ) -> Result<RunOutcome, OrchestratorError> {
        self.bridge.open(session_id);
        let mut cleanup = RunGuard::armed(&self.store, &self.bridge, session_id);
        let mut state = RunState::new();

        let started = ProgressEvent::new(ProgressKind::RunStarted)
            .with_message(format!("Processing: {message}"))
            .for_session(session_id);
        forward(&out, started).await?;
        state.advance(RunPhase::Classifying);

        let history = self
            .store
            .recent_messages(session_id, self.config.history_window);

        let intent = match self
            .collaborators
            .classifier
            .classify(message, &history)
            .await
        {
            Ok(intent) => intent,
            // Fail open to the cheaper path.
            Err(err) => {
                tracing::warn!(error = %err, "intent classification failed, defaulting to chat");
                Intent::Chat
            }
        };

        let path = match intent {
            Intent::Search => {
                self.research_path(session_id, message, &mut state, &out)
                    .await
            }
            Intent::Chat => self.chat_path(message, &history, &mut state).await,
            Intent::Exit => {
                state.advance(RunPhase::Responding);
                Ok(PathResult {
                    response: EXIT_FAREWELL.to_string(),
                    kind: ExchangeKind::Chat,
                    sources: Vec::new(),
                    research: None,
                })
            }
        };

        match path {
            Ok(path) => {
                state.advance(RunPhase::Emitting);
                self.emit_answer(session_id, &path, &out).await?;

                // Persist the turn before the terminal event is observable,
                // so a status poll racing RUN_FINISHED sees the new count.
                if let Some(research) = path.research {
                    self.store.store_research(session_id, research);
                }
                self.store.append_exchange(
                    session_id,
                    Exchange {
                        input: message.to_string(),
                        response: path.response.clone(),
                        kind: path.kind,
                        sources: path.sources.clone(),
                    },
                );

                forward(
                    &out,
                    ProgressEvent::new(ProgressKind::RunFinished)
                        .with_message("complete")
                        .for_session(session_id),
                )
                .await?;
                cleanup.finish();
                state.advance(RunPhase::Succeeded);

                Ok(RunOutcome {
                    kind: path.kind,
                    response: path.response,
                    sources: path.sources,
                    success: true,
                    error: None,
                })
            }
            Err(OrchestratorError::Disconnected) => {
                // The channel is gone; clean up silently.
                drop(cleanup);
                Err(OrchestratorError::Disconnected)
            }
            Err(err) => {
                state.fail();
                let description = err.to_string();
                tracing::warn!(error = %description, "run failed");

                self.store.append_exchange(
                    session_id,
                    Exchange {
                        input: message.to_string(),
                        response: FAILURE_NOTICE.to_string(),
                        kind: ExchangeKind::Chat,
                        sources: Vec::new(),
                    },
                );

                // Best effort: the client may already be gone.
                let _ = out
                    .send(
                        ProgressEvent::new(ProgressKind::RunError)
                            .with_error(&description)
                            .for_session(session_id),
                    )
                    .await;
                cleanup.finish();

                Ok(RunOutcome {
                    kind: ExchangeKind::Chat,
                    response: FAILURE_NOTICE.to_string(),
                    sources: Vec::new(),
                    success: false,
                    error: Some(description),
                })
            }
        }
    }

    /// Chat path: a single awaited reply, no progress events
    async fn chat_path(
        &self,
        message: &str,
        history: &[Message],
        state: &mut RunState,
    ) -> Result<PathResult, OrchestratorError> {
        state.advance(RunPhase::Responding);
        let reply = self
            .collaborators
            .responder
            .reply(message, history)
            .await
            .map_err(OrchestratorError::Responder)?;
        Ok(PathResult {
            response: reply,
            kind: ExchangeKind::Chat,
            sources: Vec::new(),
            research: None,
        })
    }

    /// Research path: spawn the engine, drain the bridge while it runs,
    /// then synthesize (falling back to the raw summary on failure)
    async fn research_path(
        &self,
        session_id: &str,
        query: &str,
        state: &mut RunState,
        out: &mpsc::Sender<ProgressEvent>,
    ) -> Result<PathResult, OrchestratorError> {
        state.advance(RunPhase::Researching);

        let engine = Arc::clone(&self.collaborators.engine);
        let publisher = self.bridge.publisher(session_id);
        let owned_query = query.to_string();
        let mut task = tokio::spawn(async move { engine.run(&owned_query, publisher).await });

        let deadline = Instant::now() + self.config.research_timeout;
        let result = loop {
            for event in self.bridge.drain_available(session_id) {
                if let Err(err) = forward(out, event).await {
                    task.abort();
                    return Err(err);
                }
            }
            if out.is_closed() {
                task.abort();
                return Err(OrchestratorError::Disconnected);
            }
            if Instant::now() >= deadline {
                task.abort();
                break Err(OrchestratorError::ResearchTimeout(
                    self.config.research_timeout,
                ));
            }
            match timeout(self.config.poll_interval, &mut task).await {
                Ok(Ok(engine_result)) => {
                    break engine_result.map_err(OrchestratorError::Research)
                }
                Ok(Err(join_err)) => {
                    break Err(OrchestratorError::ResearchJoin(join_err.to_string()))
                }
                // Interval elapsed; drain again.
                Err(_) => continue,
            }
        };
        let result = result?;

        // Final drain so every progress event precedes the answer.
        for event in self.bridge.drain_available(session_id) {
            forward(out, event).await?;
        }

        state.advance(RunPhase::Synthesizing);
        let answer = match self
            .collaborators
            .synthesizer
            .synthesize(query, &result)
            .await
        {
            Ok(text) => text,
            // The result must never be lost to a synthesis fault.
            Err(err) => {
                tracing::warn!(error = %err, "synthesis failed, falling back to the raw summary");
                result.summary.clone()
            }
        };

        Ok(PathResult {
            response: answer,
            kind: ExchangeKind::ResearchEnhanced,
            sources: result.sources.clone(),
            research: Some(result),
        })
    }

    /// Stream the final text as ordered deltas, then sources if any
    async fn emit_answer(
        &self,
        session_id: &str,
        path: &PathResult,
        out: &mpsc::Sender<ProgressEvent>,
    ) -> Result<(), OrchestratorError> {
        for chunk in chunk_text(&path.response, self.config.chunk_size) {
            forward(
                out,
                ProgressEvent::new(ProgressKind::TextMessageDelta)
                    .with_content(chunk)
                    .for_session(session_id),
            )
            .await?;
        }
        if !path.sources.is_empty() {
            forward(
                out,
                ProgressEvent::new(ProgressKind::SourcesUpdate)
                    .with_sources(path.sources.clone())
                    .for_session(session_id),
            )
            .await?;
        }
        Ok(())
    }
}

async fn forward(
    out: &mpsc::Sender<ProgressEvent>,
    event: ProgressEvent,
) -> Result<(), OrchestratorError> {
    out.send(event)
        .await
        .map_err(|_| OrchestratorError::Disconnected)
}

/// Split text into chunks of at most `size` characters.
/// Concatenating the chunks reconstructs the input exactly.
pub fn chunk_text(text: &str, size: usize) -> Vec<String> {
    let size = size.max(1);
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(size)
        .map(|chunk| chunk.iter().collect())
        .collect()
}

/// Releases the session and closes the bridge if the run future is dropped
/// or the client disconnects, so the session is never left stuck processing.
struct RunGuard {
    store: Arc<SessionStore>,
    bridge: Arc<EventBridge>,
    session_id: String,
    armed: bool,
}

impl RunGuard {
    fn armed(store: &Arc<SessionStore>, bridge: &Arc<EventBridge>, session_id: &str) -> Self {
        Self {
            store: Arc::clone(store),
            bridge: Arc::clone(bridge),
            session_id: session_id.to_string(),
            armed: true,
        }
    }

    /// Normal completion: run the cleanup now, once
    fn finish(&mut self) {
        self.release();
        self.armed = false;
    }

    fn release(&self) {
        self.bridge.close(&self.session_id);
        self.store.release(&self.session_id);
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if self.armed {
            tracing::debug!(session_id = %self.session_id, "run dropped mid-flight, releasing session");
            self.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_text_reconstructs_exactly() {
        let text = "The quick brown fox jumps over the lazy dog";
        let chunks = chunk_text(text, 7);
        assert!(chunks.iter().all(|c| c.chars().count() <= 7));
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn test_chunk_text_multibyte() {
        let text = "héllo wörld — ünïcode ✓";
        let chunks = chunk_text(text, 4);
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn test_chunk_text_empty() {
        assert!(chunk_text("", 10).is_empty());
    }

    #[test]
    fn test_chunk_text_zero_size_clamped() {
        let chunks = chunk_text("ab", 0);
        assert_eq!(chunks, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_default_config_poll_interval_is_subsecond() {
        let config = OrchestratorConfig::default();
        assert!(config.poll_interval >= Duration::from_millis(300));
        assert!(config.poll_interval <= Duration::from_millis(500));
    }
}
