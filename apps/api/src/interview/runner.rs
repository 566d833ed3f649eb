//! Session orchestration. Drives the three suspension points.
//!
//! Flow per operation: lock → `begin_*` transition → unlock → provider call →
//! lock → `complete_*` transition. The session lock is never held while
//! waiting on a provider, so snapshots and Restart stay responsive.
//!
//! Each provider call holds the entry's operation permit and races the
//! session's restart signal. Restart drops the call, which closes its
//! connection and releases the permit.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::{watch, MutexGuard, OwnedSemaphorePermit};
use tracing::{error, info, warn};

use crate::errors::AppError;
use crate::interview::generation::{generate_questions, generate_report, stream_feedback};
use crate::interview::models::{InterviewQuestion, InterviewSetup};
use crate::interview::session::{
    Advance, Completion, Session, SessionError, SessionSnapshot, Ticket,
};
use crate::interview::store::{FeedbackEvent, SessionEntry};
use crate::llm_client::{LlmProvider, ProviderFactory};

/// A feedback stream waiting to be pumped into its session.
pub struct FeedbackJob {
    ticket: Ticket,
    question: InterviewQuestion,
    answer_text: String,
    provider: Arc<dyn LlmProvider>,
    cancelled: watch::Receiver<u64>,
    _permit: OwnedSemaphorePermit,
}

/// The operation permit, or why a new provider call cannot start yet.
fn claim_operation(
    entry: &SessionEntry,
    session: &MutexGuard<'_, Session>,
) -> Result<OwnedSemaphorePermit, AppError> {
    match entry.try_claim_operation() {
        Some(permit) => Ok(permit),
        None => match session.pending() {
            Some(operation) => Err(SessionError::Busy(operation).into()),
            None => Err(AppError::Conflict(
                "a cancelled operation is still shutting down".to_string(),
            )),
        },
    }
}

/// Setup → Interview. On failure the session stays in Setup and the failure
/// is returned.
pub async fn start_interview(
    entry: &SessionEntry,
    llm: &dyn ProviderFactory,
    setup: InterviewSetup,
) -> Result<SessionSnapshot, AppError> {
    let (_permit, request, mut cancelled) = {
        let mut session = entry.lock().await;
        let permit = claim_operation(entry, &session)?;
        let request = session.begin_question_generation(setup)?;
        (permit, request, entry.cancellation(&session))
    };
    info!(
        "Generating questions for '{}' at '{}'",
        request.setup.position, request.setup.target_company
    );

    let provider = llm.connect(&request.credential);
    let outcome = tokio::select! {
        biased;
        _ = cancelled.changed() => {
            info!("Question generation cancelled by restart");
            return Err(AppError::Conflict(
                "session was restarted while questions were generated".to_string(),
            ));
        }
        outcome = generate_questions(provider.as_ref(), &request.setup) => outcome,
    };
    let outcome = outcome.map_err(|e| {
        error!("Question generation failed: {e}");
        e.to_string()
    });

    let mut session = entry.lock().await;
    match session.complete_question_generation(request.ticket, outcome) {
        Ok(Completion::Applied) => Ok(session.snapshot()),
        Ok(Completion::Stale) => Err(AppError::Conflict(
            "session was restarted while questions were generated".to_string(),
        )),
        Err(failure) => Err(AppError::Generation(failure.to_string())),
    }
}

/// Records the answer and prepares its feedback stream. The caller runs the
/// returned job, usually on a spawned task.
pub async fn submit_answer(
    entry: &SessionEntry,
    llm: &dyn ProviderFactory,
    answer_text: &str,
) -> Result<FeedbackJob, AppError> {
    let mut session = entry.lock().await;
    let permit = claim_operation(entry, &session)?;
    let request = session.submit_answer(answer_text)?;
    entry.publish(
        &session,
        FeedbackEvent::Started {
            question_id: request.question.id.clone(),
        },
    );

    Ok(FeedbackJob {
        ticket: request.ticket,
        provider: llm.connect(&request.credential),
        question: request.question,
        answer_text: request.answer_text,
        cancelled: entry.cancellation(&session),
        _permit: permit,
    })
}

/// Pumps feedback fragments into the session until the provider completes,
/// the stream fails, or the session is restarted. Returning drops the stream,
/// which closes the connection.
pub async fn run_feedback(entry: &SessionEntry, job: FeedbackJob) {
    let FeedbackJob {
        ticket,
        question,
        answer_text,
        provider,
        mut cancelled,
        _permit: permit,
    } = job;

    let opened = tokio::select! {
        biased;
        _ = cancelled.changed() => {
            info!("Feedback for question {} cancelled by restart", question.id);
            return;
        }
        opened = stream_feedback(provider.as_ref(), &question, &answer_text) => opened,
    };
    let mut stream = match opened {
        Ok(stream) => stream,
        Err(e) => {
            drop(permit);
            fail_feedback(entry, ticket, e.to_string()).await;
            return;
        }
    };

    let mut fragments = 0usize;
    loop {
        let item = tokio::select! {
            biased;
            _ = cancelled.changed() => {
                info!("Feedback for question {} cancelled by restart", question.id);
                return;
            }
            item = stream.next() => item,
        };

        match item {
            Some(Ok(fragment)) => {
                let mut session = entry.lock().await;
                if !session.append_feedback(ticket, &fragment) {
                    info!("Dropping stale feedback stream for question {}", question.id);
                    return;
                }
                fragments += 1;
                entry.publish(&session, FeedbackEvent::Fragment { text: fragment });
            }
            Some(Err(e)) => {
                drop(stream);
                drop(permit);
                fail_feedback(entry, ticket, e.to_string()).await;
                return;
            }
            None => break,
        }
    }

    // free the slot before subscribers can see the run end
    drop(stream);
    drop(permit);
    let mut session = entry.lock().await;
    if session.finish_feedback(ticket) == Completion::Applied {
        info!(
            "Feedback for question {} completed ({} fragments)",
            question.id, fragments
        );
        entry.publish(&session, FeedbackEvent::Completed);
    }
}

async fn fail_feedback(entry: &SessionEntry, ticket: Ticket, reason: String) {
    warn!("Feedback stream failed: {reason}");
    let mut session = entry.lock().await;
    if session.fail_feedback(ticket, reason.clone()) == Completion::Applied {
        entry.publish(&session, FeedbackEvent::Failed { message: reason });
    }
}

/// Moves to the next question, or past the last one generates the report.
pub async fn advance(
    entry: &SessionEntry,
    llm: &dyn ProviderFactory,
) -> Result<SessionSnapshot, AppError> {
    let (_permit, request, mut cancelled) = {
        let mut session = entry.lock().await;
        let permit = claim_operation(entry, &session)?;
        match session.advance()? {
            Advance::NextQuestion(index) => {
                info!("Advanced to question {}", index + 1);
                return Ok(session.snapshot());
            }
            Advance::Report(request) => (permit, request, entry.cancellation(&session)),
        }
    };

    info!("Generating report over {} answers", request.answers.len());
    let provider = llm.connect(&request.credential);
    let outcome = tokio::select! {
        biased;
        _ = cancelled.changed() => {
            info!("Report generation cancelled by restart");
            return Err(AppError::Conflict(
                "session was restarted while the report was generated".to_string(),
            ));
        }
        outcome = generate_report(
            provider.as_ref(),
            &request.setup,
            &request.questions,
            &request.answers,
        ) => outcome,
    };
    let outcome = outcome.map_err(|e| {
        error!("Report generation failed: {e}");
        e.to_string()
    });

    let mut session = entry.lock().await;
    match session.complete_report(request.ticket, outcome) {
        Ok(Completion::Applied) => Ok(session.snapshot()),
        Ok(Completion::Stale) => Err(AppError::Conflict(
            "session was restarted while the report was generated".to_string(),
        )),
        Err(failure) => Err(AppError::Generation(failure.to_string())),
    }
}

/// Back to Setup. Cancels any provider call in flight and wakes feedback
/// subscribers with the now idle buffer.
pub async fn restart(entry: &SessionEntry) -> SessionSnapshot {
    let mut session = entry.lock().await;
    session.restart();
    entry.cancel_in_flight(&session);
    entry.publish(&session, FeedbackEvent::from(session.feedback()));
    session.snapshot()
}
