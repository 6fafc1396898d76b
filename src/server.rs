//! The HTTP translation layer over the run service.
//!
//! Three endpoints mirror what the web client needs: submit-and-run a
//! snippet, reload a stored snippet, and watch a run's output live over
//! server-sent events. All wire concerns (form decoding, status codes,
//! event framing, keep-alives) live here; the core stays wire-agnostic.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::{Form, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::broker::{Broker, SubscriberId};
use crate::engine::ContainerRuntime;
use crate::error::{PoolError, RunboxError};
use crate::service::{RunRequest, RunService};
use crate::snippets::{Snippet, SnippetStore};

/// Idle interval between SSE keep-alive comments.
const KEEP_ALIVE_SECS: u64 = 15;

/// Shared state handed to every request handler.
pub struct AppState<R: ContainerRuntime + 'static> {
    /// The run orchestration seam.
    pub service: RunService<R>,
    /// Snippet persistence collaborator.
    pub snippets: SnippetStore,
    /// Wall-clock budget applied to HTTP-submitted runs.
    pub run_timeout: Duration,
}

/// Build the HTTP router for the snippet service.
///
/// The returned router can be served directly with axum or composed into a
/// larger application.
pub fn build_router<R: ContainerRuntime + 'static>(state: Arc<AppState<R>>) -> Router {
    Router::new()
        .route("/run-snippet", post(run_snippet::<R>))
        .route("/load-snippet", get(load_snippet::<R>))
        .route("/event-stream", get(event_stream::<R>))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint.
async fn health() -> Response {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "runbox"
    }))
    .into_response()
}

/// Start the HTTP server.
///
/// Runs until the provided shutdown future resolves.
///
/// # Errors
///
/// Returns the underlying I/O error if the listener cannot be bound or the
/// server fails while serving.
pub async fn serve<R: ContainerRuntime + 'static>(
    state: Arc<AppState<R>>,
    addr: SocketAddr,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let router = build_router(state);

    tracing::info!(%addr, "starting HTTP server");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}

/// Maps domain failures onto HTTP status codes at the service boundary.
enum ApiError {
    /// The request itself is malformed.
    BadRequest(&'static str),
    /// A run or lookup failed; the status depends on the error kind.
    Run(RunboxError),
}

impl From<RunboxError> for ApiError {
    fn from(error: RunboxError) -> Self {
        Self::Run(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::BadRequest(message) => (StatusCode::BAD_REQUEST, message).into_response(),
            Self::Run(error) => {
                let status = match &error {
                    RunboxError::Language(_) => StatusCode::UNPROCESSABLE_ENTITY,
                    RunboxError::Pool(PoolError::Exhausted) => StatusCode::SERVICE_UNAVAILABLE,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                tracing::warn!(%error, "request failed");
                (status, error.to_string()).into_response()
            }
        }
    }
}

/// Form payload of `POST /run-snippet`.
#[derive(Debug, Deserialize)]
struct RunSnippetForm {
    /// Optional caller-chosen run id; generated when blank or absent.
    #[serde(default)]
    id: Option<String>,
    /// The submitted language tag.
    language: String,
    /// The submitted source code.
    code: String,
}

/// JSON response of `POST /run-snippet`.
#[derive(Debug, Serialize)]
struct RunSnippetResponse {
    /// The run's topic identifier.
    id: String,
    /// `completed` or `timed_out`.
    outcome: &'static str,
}

/// Persist the snippet, run it, and report how it concluded.
async fn run_snippet<R: ContainerRuntime + 'static>(
    State(state): State<Arc<AppState<R>>>,
    Form(form): Form<RunSnippetForm>,
) -> Result<Json<RunSnippetResponse>, ApiError> {
    let run_id = form
        .id
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    state
        .snippets
        .save(
            &run_id,
            Snippet {
                language: form.language.clone(),
                code: form.code.clone(),
            },
        )
        .await;

    let report = state
        .service
        .submit(
            Some(run_id),
            RunRequest {
                language: form.language,
                code: form.code,
                timeout: state.run_timeout,
            },
        )
        .await?;

    Ok(Json(RunSnippetResponse {
        id: report.run_id,
        outcome: report.outcome.as_str(),
    }))
}

/// Query payload carrying a run id.
#[derive(Debug, Deserialize)]
struct IdQuery {
    /// The run/topic identifier.
    #[serde(default)]
    id: String,
}

/// Return the stored snippet for a run id.
async fn load_snippet<R: ContainerRuntime + 'static>(
    State(state): State<Arc<AppState<R>>>,
    Query(query): Query<IdQuery>,
) -> Response {
    if query.id.is_empty() {
        return ApiError::BadRequest("id can't be blank").into_response();
    }

    match state.snippets.load(&query.id).await {
        Some(snippet) => Json(snippet).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Unsubscribes the wrapped delivery endpoint when the SSE connection goes
/// away.
struct SubscriptionGuard {
    broker: Arc<Broker>,
    topic: String,
    id: SubscriberId,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        let broker = Arc::clone(&self.broker);
        let topic = std::mem::take(&mut self.topic);
        let id = self.id;
        tracing::debug!(run_id = %topic, "event-stream subscriber disconnected");
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            drop(handle.spawn(async move { broker.unsubscribe(&topic, id).await }));
        }
    }
}

/// Stream a run's events as server-sent events.
async fn event_stream<R: ContainerRuntime + 'static>(
    State(state): State<Arc<AppState<R>>>,
    Query(query): Query<IdQuery>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    if query.id.is_empty() {
        return Err(ApiError::BadRequest("id can't be blank"));
    }

    tracing::debug!(run_id = %query.id, "new event-stream subscriber");
    let (subscriber_id, receiver) = state.service.subscribe(&query.id).await.into_parts();
    let guard = SubscriptionGuard {
        broker: Arc::clone(state.service.broker()),
        topic: query.id,
        id: subscriber_id,
    };

    let stream = futures_util::stream::unfold(
        (receiver, guard),
        |(mut receiver, guard)| async move {
            let event = receiver.recv().await?;
            Some((
                Ok::<SseEvent, Infallible>(SseEvent::default().data(event.into_body())),
                (receiver, guard),
            ))
        },
    );

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(KEEP_ALIVE_SECS))
            .text("keepalive"),
    ))
}
