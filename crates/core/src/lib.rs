//! # Scout Core
//!
//! The "Brain" of the Scout system - session state, the progress event
//! bridge, the stream orchestrator, and the wire protocol encoder.
//!
//! ## Architecture
//!
//! - `session` - Per-session conversation state with single-writer discipline
//! - `events` - Closed taxonomy of run progress events
//! - `bridge` - Queue decoupling research progress emission from consumption
//! - `collaborators` - Trait seams for the classifier, responder, research
//!   engine, and synthesizer
//! - `orchestrator` - The run state machine: classify, dispatch, drain,
//!   emit, terminate
//! - `protocol` - Projection of progress events onto self-describing frames
//!
//! ## Usage
//!
//! ```rust,ignore
//! use scout_core::{Orchestrator, OrchestratorConfig};
//!
//! let orchestrator = Orchestrator::new(config, store, bridge, collaborators);
//! let outcome = orchestrator.run("default", "hello", event_tx).await?;
//! ```

pub mod bridge;
pub mod collaborators;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod protocol;
pub mod session;

pub use bridge::{EventBridge, ProgressPublisher};
pub use collaborators::{
    ChatResponder, Collaborators, Intent, IntentClassifier, ResearchEngine, ResearchResult,
    Source, Synthesizer,
};
pub use error::{OrchestratorError, SessionError};
pub use events::{ProgressEvent, ProgressKind};
pub use orchestrator::{Orchestrator, OrchestratorConfig, RunOutcome, RunPhase};
pub use protocol::{ProtocolEncoder, StreamFrame, DONE_SENTINEL};
pub use session::{Exchange, ExchangeKind, Message, Role, Session, SessionStatus, SessionStore};
