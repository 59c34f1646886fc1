//! Scout Server
//!
//! Axum server exposing the streaming agent endpoint plus the small status
//! surface around it. Fully wired to the real Orchestrator from crates/core
//! with LLM-backed collaborators.

mod llm;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json, Response,
    },
    routing::{get, post},
    Router,
};
use clap::{Parser, Subcommand};
use futures::{stream, StreamExt};
use scout_core::{
    protocol::done_sse, Collaborators, EventBridge, Orchestrator, OrchestratorConfig,
    OrchestratorError, ProtocolEncoder, SessionStore, DONE_SENTINEL,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::{convert::Infallible, net::SocketAddr, sync::Arc};
use tokio::{net::TcpListener, sync::mpsc};
use tokio_stream::wrappers::ReceiverStream;
use utoipa::{OpenApi, ToSchema};

use llm::{LlmChatResponder, LlmClient, LlmIntentClassifier, LlmResearchEngine, LlmSynthesizer};

/// Session used when the client does not name one
const DEFAULT_SESSION: &str = "default";

/// Application state
struct AppState {
    store: Arc<SessionStore>,
    bridge: Arc<EventBridge>,
    orchestrator: Arc<Orchestrator>,
    encoder: ProtocolEncoder,
}

type SharedState = Arc<AppState>;

// === API Types ===

#[derive(Deserialize, ToSchema)]
struct IncomingMessage {
    #[serde(default)]
    role: String,
    #[serde(default)]
    content: String,
}

#[derive(Deserialize, ToSchema)]
struct AgentRequest {
    #[serde(default)]
    messages: Vec<IncomingMessage>,
    session_id: Option<String>,
}

#[derive(Serialize, ToSchema)]
struct HealthResponse {
    status: String,
}

#[derive(Deserialize)]
struct SessionQuery {
    session_id: Option<String>,
}

#[derive(Serialize, ToSchema)]
struct FlowStatusResponse {
    session_id: String,
    exists: bool,
    processing: bool,
    conversation_count: usize,
    events_pending: usize,
}

#[derive(Serialize, ToSchema)]
struct PendingEventsResponse {
    events: Vec<serde_json::Value>,
}

#[derive(Serialize, ToSchema)]
struct ResetResponse {
    status: String,
    message: String,
}

#[derive(Parser, Clone)]
#[command(author, version, about = "Scout - Streaming Chat and Research Agent")]
struct Args {
    #[command(subcommand)]
    command: Option<CliCommand>,
}

#[derive(Subcommand, Clone)]
enum CliCommand {
    /// Start the Scout server (default)
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
    },
    /// Handle one message (CLI mode, no server), printing the event stream
    Run {
        /// The message to process
        message: String,
    },
}

// === OpenAPI Definition ===

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Scout API",
        version = "1.0.0",
        description = "API for the Scout streaming chat and research agent"
    ),
    paths(health, flow_status, pending_events, reset_flow),
    components(schemas(
        AgentRequest,
        IncomingMessage,
        HealthResponse,
        FlowStatusResponse,
        PendingEventsResponse,
        ResetResponse
    )),
    tags(
        (name = "agent", description = "Streaming agent endpoint"),
        (name = "flow", description = "Session status and control")
    )
)]
struct ApiDoc;

// === API Handlers ===

/// Main agent endpoint with real-time event streaming
async fn agent(State(state): State<SharedState>, Json(request): Json<AgentRequest>) -> Response {
    let message = request
        .messages
        .iter()
        .rev()
        .find(|m| m.role == "user" || m.role.is_empty())
        .map(|m| m.content.trim().to_string())
        .filter(|content| !content.is_empty());
    let Some(message) = message else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "No user message" })),
        )
            .into_response();
    };

    let session_id = request
        .session_id
        .unwrap_or_else(|| DEFAULT_SESSION.to_string());

    // Claim the session before any stream exists, so a busy session is a
    // real 409 instead of an empty stream.
    if let Err(err) = state.orchestrator.claim(&session_id) {
        return (
            StatusCode::CONFLICT,
            Json(json!({
                "error": err.to_string(),
                "retriable": err.is_retriable(),
            })),
        )
            .into_response();
    }

    let (tx, rx) = mpsc::channel(64);
    let orchestrator = Arc::clone(&state.orchestrator);
    {
        let session_id = session_id.clone();
        tokio::spawn(async move {
            match orchestrator.run_claimed(&session_id, &message, tx).await {
                // The client hanging up is normal stream teardown.
                Ok(_) | Err(OrchestratorError::Disconnected) => {}
                Err(err) => eprintln!("⚠️ Run failed for session {session_id}: {err}"),
            }
        });
    }

    let encoder = state.encoder.clone();
    let events = ReceiverStream::new(rx)
        .map(move |event| {
            let frame = encoder.encode(&event);
            let json = serde_json::to_string(&frame).unwrap_or_default();
            Ok::<Event, Infallible>(Event::default().data(json))
        })
        .chain(stream::once(async {
            Ok(Event::default().data(DONE_SENTINEL))
        }));

    Sse::new(events)
        .keep_alive(KeepAlive::default())
        .into_response()
}

/// Health check
#[utoipa::path(
    get,
    path = "/health",
    tag = "flow",
    responses((status = 200, description = "Server is up", body = HealthResponse))
)]
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// Session status including pending event statistics
#[utoipa::path(
    get,
    path = "/flow/status",
    tag = "flow",
    params(("session_id" = Option<String>, Query, description = "Session to inspect (default session if omitted)")),
    responses((status = 200, description = "Current session status", body = FlowStatusResponse))
)]
async fn flow_status(
    State(state): State<SharedState>,
    Query(query): Query<SessionQuery>,
) -> Json<FlowStatusResponse> {
    let session_id = query
        .session_id
        .unwrap_or_else(|| DEFAULT_SESSION.to_string());
    let status = state.store.status(&session_id);
    let events_pending = state.bridge.pending(&session_id);
    Json(FlowStatusResponse {
        session_id,
        exists: status.exists,
        processing: status.processing,
        conversation_count: status.turns,
        events_pending,
    })
}

/// Drain any progress events not yet delivered through a stream
#[utoipa::path(
    get,
    path = "/flow/events",
    tag = "flow",
    params(("session_id" = Option<String>, Query, description = "Session to drain (default session if omitted)")),
    responses((status = 200, description = "Pending events, encoded as wire frames", body = PendingEventsResponse))
)]
async fn pending_events(
    State(state): State<SharedState>,
    Query(query): Query<SessionQuery>,
) -> Json<PendingEventsResponse> {
    let session_id = query
        .session_id
        .unwrap_or_else(|| DEFAULT_SESSION.to_string());
    let events = state
        .bridge
        .drain_available(&session_id)
        .iter()
        .map(|event| {
            serde_json::to_value(state.encoder.encode(event)).unwrap_or(serde_json::Value::Null)
        })
        .collect();
    Json(PendingEventsResponse { events })
}

/// Reset a session to start fresh
#[utoipa::path(
    post,
    path = "/flow/reset",
    tag = "flow",
    params(("session_id" = Option<String>, Query, description = "Session to reset (default session if omitted)")),
    responses((status = 200, description = "Session reset", body = ResetResponse))
)]
async fn reset_flow(
    State(state): State<SharedState>,
    Query(query): Query<SessionQuery>,
) -> Json<ResetResponse> {
    let session_id = query
        .session_id
        .unwrap_or_else(|| DEFAULT_SESSION.to_string());
    state.bridge.close(&session_id);
    state.store.reset(&session_id);
    Json(ResetResponse {
        status: "reset".to_string(),
        message: format!("Session {session_id} has been reset"),
    })
}

async fn serve_openapi() -> impl IntoResponse {
    let spec = ApiDoc::openapi().to_json().unwrap_or_default();
    ([("content-type", "application/json")], spec)
}

// === Wiring ===

fn build_state() -> anyhow::Result<SharedState> {
    let client = LlmClient::from_env()?;
    let collaborators = Collaborators {
        classifier: Arc::new(LlmIntentClassifier::new(client.clone())),
        responder: Arc::new(LlmChatResponder::new(client.clone())),
        engine: Arc::new(LlmResearchEngine::new(client.clone())),
        synthesizer: Arc::new(LlmSynthesizer::new(client)),
    };

    let store = Arc::new(SessionStore::new());
    let bridge = Arc::new(EventBridge::new());
    let orchestrator = Arc::new(Orchestrator::new(
        OrchestratorConfig::default(),
        Arc::clone(&store),
        Arc::clone(&bridge),
        collaborators,
    ));

    Ok(Arc::new(AppState {
        store,
        bridge,
        orchestrator,
        encoder: ProtocolEncoder::default(),
    }))
}

async fn serve(port: u16) -> anyhow::Result<()> {
    let state = build_state()?;

    let app = Router::new()
        .route("/agent", post(agent))
        .route("/health", get(health))
        .route("/flow/status", get(flow_status))
        .route("/flow/events", get(pending_events))
        .route("/flow/reset", post(reset_flow))
        .route("/api/v1/openapi.json", get(serve_openapi))
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    println!("🚀 Scout Server running at http://{}", addr);
    println!("   Routes:");
    println!("   Agent:   POST /agent (SSE stream)");
    println!("   Status:  GET /health, /flow/status, /flow/events");
    println!("   Control: POST /flow/reset");
    println!("   OpenAPI: GET /api/v1/openapi.json");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// CLI mode: process one message and print its event stream
async fn run_once(message: &str) -> anyhow::Result<()> {
    let state = build_state()?;
    let (tx, mut rx) = mpsc::channel(64);

    let encoder = state.encoder.clone();
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            print!("{}", encoder.encode(&event).to_sse());
        }
        print!("{}", done_sse());
    });

    let outcome = state
        .orchestrator
        .run(DEFAULT_SESSION, message, tx)
        .await?;
    printer.await?;

    if outcome.success {
        println!("✅ Run complete ({:?})", outcome.kind);
    } else {
        eprintln!(
            "❌ Run failed: {}",
            outcome.error.unwrap_or_else(|| "unknown error".to_string())
        );
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    println!("╔══════════════════════════════════════╗");
    println!("║            SCOUT SERVER              ║");
    println!("╚══════════════════════════════════════╝");

    // Load .env for API keys
    dotenvy::dotenv().ok();

    let args = Args::parse();
    match args.command {
        Some(CliCommand::Run { message }) => run_once(&message).await,
        Some(CliCommand::Serve { port }) => serve(port).await,
        None => serve(8080).await,
    }
}
