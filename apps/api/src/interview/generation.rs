//! Provider + prompt + parser pipelines for the three model calls.
//!
//! Degrade policy: unparseable model output never fails the call. Questions
//! degrade to an empty list, the report to `fallback_report()`. Only provider
//! failures surface as `Err`.

use tracing::{info, warn};

use crate::interview::models::{InterviewQuestion, InterviewReport, InterviewSetup, UserAnswer};
use crate::interview::parser::{decode_questions, decode_report};
use crate::interview::prompts::{
    build_feedback_prompt, build_question_prompt, build_report_prompt, question_system,
    report_system, FEEDBACK_MAX_TOKENS, FEEDBACK_SYSTEM, FEEDBACK_TEMPERATURE,
    QUESTION_MAX_TOKENS, QUESTION_TEMPERATURE, REPORT_MAX_TOKENS, REPORT_TEMPERATURE,
};
use crate::llm_client::{LlmError, LlmProvider, LlmRequest, TextStream};

pub const REPORT_FAILURE_SUMMARY: &str =
    "Failed to generate the report. The model response could not be read.";

pub fn fallback_report() -> InterviewReport {
    InterviewReport {
        overall_score: 0,
        summary: REPORT_FAILURE_SUMMARY.to_string(),
        question_feedbacks: Vec::new(),
        general_advice: Vec::new(),
    }
}

pub async fn generate_questions(
    llm: &dyn LlmProvider,
    setup: &InterviewSetup,
) -> Result<Vec<InterviewQuestion>, LlmError> {
    let prompt = build_question_prompt(setup);
    let system = question_system();
    let text = llm
        .generate(&LlmRequest {
            system: &system,
            prompt: &prompt,
            max_tokens: QUESTION_MAX_TOKENS,
            temperature: QUESTION_TEMPERATURE,
        })
        .await?;

    match decode_questions(&text) {
        Ok(questions) => {
            info!("Generated {} questions via {}", questions.len(), llm.provider());
            Ok(questions)
        }
        Err(e) => {
            warn!("Failed to parse questions: {e}");
            Ok(Vec::new())
        }
    }
}

pub async fn stream_feedback(
    llm: &dyn LlmProvider,
    question: &InterviewQuestion,
    answer_text: &str,
) -> Result<TextStream, LlmError> {
    let prompt = build_feedback_prompt(question, answer_text);
    let request = LlmRequest {
        system: FEEDBACK_SYSTEM,
        prompt: &prompt,
        max_tokens: FEEDBACK_MAX_TOKENS,
        temperature: FEEDBACK_TEMPERATURE,
    };
    let stream = llm.stream(&request).await?;
    Ok(stream)
}

pub async fn generate_report(
    llm: &dyn LlmProvider,
    setup: &InterviewSetup,
    questions: &[InterviewQuestion],
    answers: &[UserAnswer],
) -> Result<InterviewReport, LlmError> {
    let prompt = build_report_prompt(setup, questions, answers);
    let system = report_system();
    let text = llm
        .generate(&LlmRequest {
            system: &system,
            prompt: &prompt,
            max_tokens: REPORT_MAX_TOKENS,
            temperature: REPORT_TEMPERATURE,
        })
        .await?;

    match decode_report(&text) {
        Ok(report) => {
            info!(
                "Generated report: overall_score={}, feedbacks={}",
                report.overall_score,
                report.question_feedbacks.len()
            );
            Ok(report)
        }
        Err(e) => {
            warn!("Failed to parse report: {e}");
            Ok(fallback_report())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interview::models::ExperienceLevel;
    use crate::llm_client::testing::{ScriptedProvider, ScriptedStream};
    use futures::StreamExt;

    fn setup() -> InterviewSetup {
        InterviewSetup {
            position: "Backend Engineer".to_string(),
            experience_level: ExperienceLevel::Senior,
            target_company: "Acme".to_string(),
            skills: String::new(),
            additional_info: None,
        }
    }

    #[tokio::test]
    async fn test_unparseable_questions_degrade_to_empty() {
        let llm = ScriptedProvider::new();
        llm.push_generation(Ok("Sorry, I cannot help with that.".to_string()));
        let questions = generate_questions(llm.as_ref(), &setup()).await.unwrap();
        assert!(questions.is_empty());
        assert!(llm.prompts()[0].contains("- Key skills: none provided"));
    }

    #[tokio::test]
    async fn test_provider_failure_is_an_error() {
        let llm = ScriptedProvider::new();
        llm.push_generation(Err(LlmError::Unauthorized {
            status: 401,
            message: "invalid x-api-key".to_string(),
        }));
        assert!(generate_questions(llm.as_ref(), &setup()).await.is_err());
    }

    #[tokio::test]
    async fn test_unparseable_report_degrades_to_fallback() {
        let llm = ScriptedProvider::new();
        llm.push_generation(Ok("The candidate did well overall.".to_string()));
        let report = generate_report(llm.as_ref(), &setup(), &[], &[])
            .await
            .unwrap();
        assert_eq!(report, fallback_report());
        assert_eq!(report.overall_score, 0);
        assert_eq!(report.summary, REPORT_FAILURE_SUMMARY);
    }

    #[tokio::test]
    async fn test_feedback_stream_yields_fragments_in_order() {
        let llm = ScriptedProvider::new();
        llm.push_stream(Ok(ScriptedStream::ok(&["a", "b", "c"])));
        let question = InterviewQuestion {
            id: "q1".to_string(),
            category: crate::interview::models::QuestionCategory::Situational,
            question_text: "What now?".to_string(),
            tip: None,
        };
        let stream = stream_feedback(llm.as_ref(), &question, "Roll back.")
            .await
            .unwrap();
        let fragments: Vec<String> = stream.map(|f| f.unwrap()).collect().await;
        assert_eq!(fragments.concat(), "abc");
        assert!(llm.prompts()[0].contains("Roll back."));
    }
}
