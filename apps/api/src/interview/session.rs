//! Interview session state machine.
//!
//! `Setup → Interview → ReportPending → Report`, with Restart back to `Setup`
//! from anywhere. The machine never awaits: every provider call is bracketed
//! by a `begin_*` transition that hands out a `Ticket` and a `complete_*`
//! transition that must present it. At most one ticket is live at a time, so a
//! second request while one is pending is rejected with `SessionError::Busy`,
//! and completions from before a Restart are ignored as stale.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::interview::models::{
    InterviewQuestion, InterviewReport, InterviewSetup, ScoreBand, UserAnswer,
};
use crate::llm_client::{Credential, Provider};

/// Shown in the feedback buffer when the feedback stream fails.
pub const FEEDBACK_FAILURE_MESSAGE: &str = "Failed to generate feedback. Please try again later.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Setup,
    Interview,
    ReportPending,
    Report,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    QuestionGeneration,
    Feedback,
    ReportGeneration,
}

/// Identifies the in-flight operation. Only the current ticket may complete it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
    epoch: u64,
    operation: Operation,
}

/// Failures surfaced to the UI as the session's last-failure indicator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum Failure {
    #[error("no API key is configured for this session")]
    CredentialMissing,

    #[error("generation failed: {0}")]
    Generation(String),

    #[error("feedback stream failed: {0}")]
    FeedbackStream(String),
}

/// A transition the current state does not allow. The session is unchanged.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("not allowed in phase {actual:?} (requires {expected:?})")]
    WrongPhase { expected: Phase, actual: Phase },

    #[error("{0:?} is already in progress")]
    Busy(Operation),

    #[error("invalid setup: {0}")]
    InvalidSetup(String),

    #[error("answer cannot be empty")]
    EmptyAnswer,

    #[error("the current question has already been answered")]
    AlreadyAnswered,

    #[error("the current question has not been answered yet")]
    NotAnswered,

    #[error("no API key is configured for this session")]
    CredentialMissing,
}

/// Whether a completion was applied or belonged to a superseded operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Applied,
    Stale,
}

#[derive(Debug, Clone)]
pub struct QuestionRequest {
    pub ticket: Ticket,
    pub setup: InterviewSetup,
    pub credential: Credential,
}

#[derive(Debug, Clone)]
pub struct FeedbackRequest {
    pub ticket: Ticket,
    pub question: InterviewQuestion,
    pub answer_text: String,
    pub credential: Credential,
}

#[derive(Debug, Clone)]
pub struct ReportRequest {
    pub ticket: Ticket,
    pub setup: InterviewSetup,
    pub questions: Vec<InterviewQuestion>,
    pub answers: Vec<UserAnswer>,
    pub credential: Credential,
}

#[derive(Debug)]
pub enum Advance {
    /// Moved to the question at this index.
    NextQuestion(usize),
    /// Past the last question; the report must now be generated.
    Report(ReportRequest),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackBuffer {
    pub text: String,
    pub in_progress: bool,
}

#[derive(Debug)]
pub struct Session {
    id: Uuid,
    created_at: DateTime<Utc>,
    provider: Provider,
    credential: Option<Credential>,
    phase: Phase,
    setup: Option<InterviewSetup>,
    questions: Vec<InterviewQuestion>,
    answers: Vec<UserAnswer>,
    current_index: usize,
    feedback: FeedbackBuffer,
    report: Option<InterviewReport>,
    pending: Option<Ticket>,
    epoch: u64,
    last_error: Option<Failure>,
}

impl Session {
    pub fn new(provider: Provider, credential: Option<Credential>) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            provider: credential.as_ref().map(|c| c.provider).unwrap_or(provider),
            credential,
            phase: Phase::Setup,
            setup: None,
            questions: Vec::new(),
            answers: Vec::new(),
            current_index: 0,
            feedback: FeedbackBuffer::default(),
            report: None,
            pending: None,
            epoch: 0,
            last_error: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    pub fn questions(&self) -> &[InterviewQuestion] {
        &self.questions
    }

    pub fn answers(&self) -> &[UserAnswer] {
        &self.answers
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn current_question(&self) -> Option<&InterviewQuestion> {
        match self.phase {
            Phase::Interview | Phase::ReportPending => self.questions.get(self.current_index),
            _ => None,
        }
    }

    pub fn feedback(&self) -> &FeedbackBuffer {
        &self.feedback
    }

    pub fn report(&self) -> Option<&InterviewReport> {
        self.report.as_ref()
    }

    pub fn pending(&self) -> Option<Operation> {
        self.pending.map(|t| t.operation)
    }

    pub fn last_error(&self) -> Option<&Failure> {
        self.last_error.as_ref()
    }

    pub fn set_credential(&mut self, credential: Credential) {
        self.provider = credential.provider;
        self.credential = Some(credential);
        if self.last_error == Some(Failure::CredentialMissing) {
            self.last_error = None;
        }
    }

    pub fn clear_credential(&mut self) {
        self.credential = None;
    }

    // ── Setup → Interview ────────────────────────────────────────────────────

    pub fn begin_question_generation(
        &mut self,
        setup: InterviewSetup,
    ) -> Result<QuestionRequest, SessionError> {
        self.require_phase(Phase::Setup)?;
        self.require_idle()?;
        let setup = setup.validated().map_err(SessionError::InvalidSetup)?;
        let credential = self.require_credential()?;

        self.setup = Some(setup.clone());
        self.last_error = None;
        let ticket = self.start(Operation::QuestionGeneration);
        Ok(QuestionRequest {
            ticket,
            setup,
            credential,
        })
    }

    /// An empty question list counts as a generation failure: the machine
    /// stays in `Setup`.
    pub fn complete_question_generation(
        &mut self,
        ticket: Ticket,
        outcome: Result<Vec<InterviewQuestion>, String>,
    ) -> Result<Completion, Failure> {
        if !self.owns(ticket) {
            return Ok(Completion::Stale);
        }
        self.pending = None;

        match outcome {
            Ok(questions) if !questions.is_empty() => {
                self.questions = questions;
                self.answers.clear();
                self.current_index = 0;
                self.feedback = FeedbackBuffer::default();
                self.report = None;
                self.phase = Phase::Interview;
                Ok(Completion::Applied)
            }
            Ok(_) => Err(self.fail(Failure::Generation(
                "the model did not return a usable question set".to_string(),
            ))),
            Err(reason) => Err(self.fail(Failure::Generation(reason))),
        }
    }

    // ── Answers and streamed feedback ────────────────────────────────────────

    pub fn submit_answer(&mut self, answer_text: &str) -> Result<FeedbackRequest, SessionError> {
        self.require_phase(Phase::Interview)?;
        self.require_idle()?;
        let answer_text = answer_text.trim();
        if answer_text.is_empty() {
            return Err(SessionError::EmptyAnswer);
        }
        let question = self
            .questions
            .get(self.current_index)
            .cloned()
            .ok_or(SessionError::WrongPhase {
                expected: Phase::Interview,
                actual: self.phase,
            })?;
        if self.is_answered(&question.id) {
            return Err(SessionError::AlreadyAnswered);
        }
        let credential = self.require_credential()?;

        self.answers.push(UserAnswer {
            question_id: question.id.clone(),
            answer_text: answer_text.to_string(),
            submitted_at: Utc::now(),
        });
        self.feedback = FeedbackBuffer {
            text: String::new(),
            in_progress: true,
        };
        self.last_error = None;
        let ticket = self.start(Operation::Feedback);
        Ok(FeedbackRequest {
            ticket,
            question,
            answer_text: answer_text.to_string(),
            credential,
        })
    }

    /// Appends one fragment. Returns false when the ticket is stale, telling
    /// the producer to stop.
    pub fn append_feedback(&mut self, ticket: Ticket, fragment: &str) -> bool {
        if !self.owns(ticket) {
            return false;
        }
        self.feedback.text.push_str(fragment);
        true
    }

    pub fn finish_feedback(&mut self, ticket: Ticket) -> Completion {
        if !self.owns(ticket) {
            return Completion::Stale;
        }
        self.pending = None;
        self.feedback.in_progress = false;
        Completion::Applied
    }

    /// Keeps whatever partial text arrived and appends the failure message.
    pub fn fail_feedback(&mut self, ticket: Ticket, reason: String) -> Completion {
        if !self.owns(ticket) {
            return Completion::Stale;
        }
        self.pending = None;
        if !self.feedback.text.is_empty() {
            self.feedback.text.push_str("\n\n");
        }
        self.feedback.text.push_str(FEEDBACK_FAILURE_MESSAGE);
        self.feedback.in_progress = false;
        self.last_error = Some(Failure::FeedbackStream(reason));
        Completion::Applied
    }

    // ── Interview → ReportPending → Report ───────────────────────────────────

    pub fn advance(&mut self) -> Result<Advance, SessionError> {
        self.require_phase(Phase::Interview)?;
        self.require_idle()?;
        let answered = self
            .questions
            .get(self.current_index)
            .map(|q| self.is_answered(&q.id))
            .unwrap_or(false);
        if !answered {
            return Err(SessionError::NotAnswered);
        }

        if self.current_index + 1 < self.questions.len() {
            self.current_index += 1;
            self.feedback = FeedbackBuffer::default();
            return Ok(Advance::NextQuestion(self.current_index));
        }

        let credential = self.require_credential()?;
        let setup = self
            .setup
            .clone()
            .ok_or_else(|| SessionError::InvalidSetup("no setup recorded".to_string()))?;

        self.phase = Phase::ReportPending;
        self.last_error = None;
        let ticket = self.start(Operation::ReportGeneration);
        Ok(Advance::Report(ReportRequest {
            ticket,
            setup,
            questions: self.questions.clone(),
            answers: self.answers.clone(),
            credential,
        }))
    }

    /// On failure the machine returns to `Interview` at the last question with
    /// every answer kept.
    pub fn complete_report(
        &mut self,
        ticket: Ticket,
        outcome: Result<InterviewReport, String>,
    ) -> Result<Completion, Failure> {
        if !self.owns(ticket) {
            return Ok(Completion::Stale);
        }
        self.pending = None;

        match outcome {
            Ok(report) => {
                self.report = Some(report);
                self.phase = Phase::Report;
                Ok(Completion::Applied)
            }
            Err(reason) => {
                self.phase = Phase::Interview;
                Err(self.fail(Failure::Generation(reason)))
            }
        }
    }

    /// Back to `Setup` with nothing but the credential kept. Any in-flight
    /// operation becomes stale.
    pub fn restart(&mut self) {
        self.phase = Phase::Setup;
        self.setup = None;
        self.questions.clear();
        self.answers.clear();
        self.current_index = 0;
        self.feedback = FeedbackBuffer::default();
        self.report = None;
        self.pending = None;
        self.last_error = None;
    }

    // ── Helpers ──────────────────────────────────────────────────────────────

    fn require_phase(&self, expected: Phase) -> Result<(), SessionError> {
        if self.phase != expected {
            return Err(SessionError::WrongPhase {
                expected,
                actual: self.phase,
            });
        }
        Ok(())
    }

    fn require_idle(&self) -> Result<(), SessionError> {
        match self.pending {
            Some(ticket) => Err(SessionError::Busy(ticket.operation)),
            None => Ok(()),
        }
    }

    fn require_credential(&mut self) -> Result<Credential, SessionError> {
        match &self.credential {
            Some(credential) => Ok(credential.clone()),
            None => {
                self.last_error = Some(Failure::CredentialMissing);
                Err(SessionError::CredentialMissing)
            }
        }
    }

    fn start(&mut self, operation: Operation) -> Ticket {
        self.epoch += 1;
        let ticket = Ticket {
            epoch: self.epoch,
            operation,
        };
        self.pending = Some(ticket);
        ticket
    }

    fn owns(&self, ticket: Ticket) -> bool {
        self.pending == Some(ticket)
    }

    fn fail(&mut self, failure: Failure) -> Failure {
        self.last_error = Some(failure.clone());
        failure
    }

    fn is_answered(&self, question_id: &str) -> bool {
        self.answers.iter().any(|a| a.question_id == question_id)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let total_questions = self.questions.len();
        let progress_percent = match self.phase {
            Phase::Report => 100,
            _ if total_questions == 0 => 0,
            _ => ((self.current_index + 1) * 100 + total_questions / 2) / total_questions,
        };

        SessionSnapshot {
            id: self.id,
            created_at: self.created_at,
            phase: self.phase,
            provider: self.provider,
            has_credential: self.credential.is_some(),
            setup: self.setup.clone(),
            questions: self.questions.clone(),
            current_index: self.current_index,
            total_questions,
            progress_percent,
            current_question: self.current_question().cloned(),
            answers: self.answers.clone(),
            feedback: self.feedback.clone(),
            report: self.report.clone().map(ReportView::from),
            busy: self.pending(),
            last_error: self.last_error.clone(),
        }
    }
}

/// Read-only view handed to the UI collaborator. Never carries the API key.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub phase: Phase,
    pub provider: Provider,
    pub has_credential: bool,
    pub setup: Option<InterviewSetup>,
    pub questions: Vec<InterviewQuestion>,
    pub current_index: usize,
    pub total_questions: usize,
    pub progress_percent: usize,
    pub current_question: Option<InterviewQuestion>,
    pub answers: Vec<UserAnswer>,
    pub feedback: FeedbackBuffer,
    pub report: Option<ReportView>,
    pub busy: Option<Operation>,
    pub last_error: Option<Failure>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportView {
    #[serde(flatten)]
    pub report: InterviewReport,
    pub overall_band: ScoreBand,
    pub question_bands: Vec<QuestionBand>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionBand {
    pub question_id: String,
    pub band: ScoreBand,
}

impl From<InterviewReport> for ReportView {
    fn from(report: InterviewReport) -> Self {
        let question_bands = report
            .question_feedbacks
            .iter()
            .map(|f| QuestionBand {
                question_id: f.question_id.clone(),
                band: ScoreBand::for_question_score(f.score),
            })
            .collect();
        Self {
            overall_band: ScoreBand::for_score(u32::from(report.overall_score)),
            question_bands,
            report,
        }
    }
}
