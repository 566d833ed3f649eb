use std::convert::Infallible;
use std::sync::Arc;

use async_stream::stream;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::Stream;
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info};
use uuid::Uuid;

use crate::errors::AppError;
use crate::interview::models::InterviewSetup;
use crate::interview::runner;
use crate::interview::session::SessionSnapshot;
use crate::interview::store::{FeedbackEvent, SessionEntry};
use crate::llm_client::{Credential, Provider};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub provider: Option<Provider>,
    #[serde(default, alias = "apiKey")]
    pub api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CredentialRequest {
    #[serde(default)]
    pub provider: Option<Provider>,
    #[serde(alias = "apiKey")]
    pub api_key: String,
}

#[derive(Debug, Deserialize)]
pub struct AnswerRequest {
    #[serde(alias = "answerText", alias = "answer_text")]
    pub answer: String,
}

async fn find_session(state: &AppState, id: Uuid) -> Result<Arc<SessionEntry>, AppError> {
    state
        .sessions
        .get(id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("Session {id} not found")))
}

/// POST /api/v1/sessions
pub async fn handle_create_session(
    State(state): State<AppState>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<SessionSnapshot>), AppError> {
    let provider = req.provider.unwrap_or(state.config.default_provider);
    let credential = match req.api_key.as_deref() {
        Some(key) => Some(Credential::new(provider, key)?),
        None => state.config.fallback_credential(provider),
    };

    let entry = state.sessions.create(provider, credential).await;
    let snapshot = entry.snapshot().await;
    info!(
        "Created session {} (provider: {}, credential: {})",
        snapshot.id, snapshot.provider, snapshot.has_credential
    );
    Ok((StatusCode::CREATED, Json(snapshot)))
}

/// GET /api/v1/sessions/:id
pub async fn handle_get_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionSnapshot>, AppError> {
    let entry = find_session(&state, id).await?;
    let snapshot = entry.snapshot().await;
    Ok(Json(snapshot))
}

/// DELETE /api/v1/sessions/:id
pub async fn handle_delete_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    if !state.sessions.remove(id).await {
        return Err(AppError::NotFound(format!("Session {id} not found")));
    }
    info!("Deleted session {id}");
    Ok(StatusCode::NO_CONTENT)
}

/// PUT /api/v1/sessions/:id/credential
pub async fn handle_set_credential(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<CredentialRequest>,
) -> Result<Json<SessionSnapshot>, AppError> {
    let entry = find_session(&state, id).await?;
    let mut session = entry.lock().await;
    let provider = req.provider.unwrap_or(session.provider());
    session.set_credential(Credential::new(provider, &req.api_key)?);
    info!("Session {id} credential set (provider: {provider})");
    Ok(Json(session.snapshot()))
}

/// DELETE /api/v1/sessions/:id/credential
pub async fn handle_clear_credential(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionSnapshot>, AppError> {
    let entry = find_session(&state, id).await?;
    let mut session = entry.lock().await;
    session.clear_credential();
    info!("Session {id} credential cleared");
    Ok(Json(session.snapshot()))
}

/// POST /api/v1/sessions/:id/start
pub async fn handle_start(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(setup): Json<InterviewSetup>,
) -> Result<Json<SessionSnapshot>, AppError> {
    let entry = find_session(&state, id).await?;
    let snapshot = runner::start_interview(&entry, state.llm.as_ref(), setup).await?;
    Ok(Json(snapshot))
}

/// POST /api/v1/sessions/:id/answers
///
/// Records the answer and returns immediately; feedback arrives on the
/// feedback stream.
pub async fn handle_submit_answer(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<AnswerRequest>,
) -> Result<(StatusCode, Json<SessionSnapshot>), AppError> {
    let entry = find_session(&state, id).await?;
    let job = runner::submit_answer(&entry, state.llm.as_ref(), &req.answer).await?;
    let snapshot = entry.snapshot().await;

    let feedback_entry = entry.clone();
    tokio::spawn(async move {
        runner::run_feedback(&feedback_entry, job).await;
    });

    Ok((StatusCode::ACCEPTED, Json(snapshot)))
}

/// GET /api/v1/sessions/:id/feedback/stream
///
/// Sends the current buffer first, then live events until the run ends.
pub async fn handle_feedback_stream(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let entry = find_session(&state, id).await?;
    let (initial, mut rx) = entry.subscribe().await;

    let events = stream! {
        let done = initial.is_terminal();
        yield Ok::<Event, Infallible>(to_sse(&initial));
        if done {
            return;
        }

        loop {
            match rx.recv().await {
                Ok(event) => {
                    let done = event.is_terminal();
                    yield Ok(to_sse(&event));
                    if done {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!("Feedback subscriber for {id} lagged by {skipped} events");
                    // the old receiver still holds events the snapshot already covers
                    let (resync, fresh) = entry.subscribe().await;
                    rx = fresh;
                    let done = resync.is_terminal();
                    yield Ok(to_sse(&resync));
                    if done {
                        break;
                    }
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

fn to_sse(event: &FeedbackEvent) -> Event {
    Event::default()
        .event(event.name())
        .data(serde_json::to_string(event).unwrap_or_default())
}

/// POST /api/v1/sessions/:id/advance
pub async fn handle_advance(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionSnapshot>, AppError> {
    let entry = find_session(&state, id).await?;
    let snapshot = runner::advance(&entry, state.llm.as_ref()).await?;
    Ok(Json(snapshot))
}

/// POST /api/v1/sessions/:id/restart
pub async fn handle_restart(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionSnapshot>, AppError> {
    let entry = find_session(&state, id).await?;
    let snapshot = runner::restart(&entry).await;
    info!("Session {id} restarted");
    Ok(Json(snapshot))
}
