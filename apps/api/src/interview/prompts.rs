// All LLM prompt templates for the interview module.
// Builders are pure: the same inputs always render the same text.

use crate::interview::models::{InterviewQuestion, InterviewSetup, UserAnswer};
use crate::llm_client::prompts::JSON_ONLY_INSTRUCTION;

/// Rendered in place of any absent or blank setup field.
pub const NONE_PROVIDED: &str = "none provided";

/// Rendered in the report transcript for a question without an answer.
pub const NO_ANSWER: &str = "(no answer)";

pub const QUESTION_COUNT: usize = 7;

pub const QUESTION_MAX_TOKENS: u32 = 2048;
pub const QUESTION_TEMPERATURE: f32 = 0.7;
pub const FEEDBACK_MAX_TOKENS: u32 = 1024;
pub const FEEDBACK_TEMPERATURE: f32 = 0.7;
pub const REPORT_MAX_TOKENS: u32 = 4096;
pub const REPORT_TEMPERATURE: f32 = 0.5;

pub const FEEDBACK_SYSTEM: &str = "You are a friendly interview coach who gives honest, \
    constructive feedback. Follow the requested section format exactly.";

pub fn question_system() -> String {
    format!(
        "You are a professional interviewer preparing a mock interview. {JSON_ONLY_INSTRUCTION}"
    )
}

pub fn report_system() -> String {
    format!(
        "You are an expert interview coach writing an end-of-interview assessment. \
         {JSON_ONLY_INSTRUCTION}"
    )
}

/// Replace: {position}, {experience}, {company}, {skills}, {additional_info}
const QUESTION_PROMPT_TEMPLATE: &str = r#"Based on the candidate profile below, write exactly 7 interview questions.

CANDIDATE PROFILE:
- Position: {position}
- Experience level: {experience}
- Target company: {company}
- Key skills: {skills}
- Additional information: {additional_info}

QUESTION MIX (exactly 7 in total):
- technical: 3
- behavioral: 2
- situational: 1
- culture: 1

Respond ONLY with a JSON array in this exact shape:
[
  {
    "id": "q1",
    "category": "technical",
    "question": "question text",
    "tips": "a short hint on how to answer"
  }
]

RULES:
1. Use the ids "q1" through "q7", in order
2. "category" must be exactly one of "technical", "behavioral", "situational", "culture"
3. Order the questions technical first, then behavioral, situational and culture
4. Tailor every question to the position, the experience level and the target company"#;

/// Replace: {category}, {question}, {answer}
const FEEDBACK_PROMPT_TEMPLATE: &str = r#"Analyze the interview question and the candidate's answer below.

QUESTION ({category}): {question}

CANDIDATE ANSWER:
{answer}

Give your feedback in exactly this format:

**Strengths:**
- (what worked well in the answer)

**Improvements:**
- (what should be strengthened or added)

**Suggested answer:**
(a stronger example answer)

**Score: X/10**"#;

/// Replace: {position}, {experience}, {company}, {skills}, {additional_info},
///          {transcript}, {question_count}
const REPORT_PROMPT_TEMPLATE: &str = r#"Analyze the whole interview below and write a final report.

CANDIDATE PROFILE:
- Position: {position}
- Experience level: {experience}
- Target company: {company}
- Key skills: {skills}
- Additional information: {additional_info}

INTERVIEW TRANSCRIPT:
{transcript}

Respond ONLY with a JSON object in this exact shape:
{
  "overallScore": 75,
  "summary": "overall summary of the interview",
  "questionFeedbacks": [
    {
      "questionId": "q1",
      "strengths": ["strength"],
      "improvements": ["improvement"],
      "suggestedAnswer": "example answer",
      "score": 7
    }
  ],
  "generalAdvice": ["advice 1", "advice 2", "advice 3"]
}

RULES:
1. "questionFeedbacks" has exactly one entry per question in the transcript ({question_count} in total), using the ids shown
2. "overallScore" is an integer from 0 to 100
3. Every "score" is an integer from 1 to 10
4. Unanswered questions receive the lowest score"#;

pub fn build_question_prompt(setup: &InterviewSetup) -> String {
    render_template(QUESTION_PROMPT_TEMPLATE, &profile_vars(setup))
}

pub fn build_feedback_prompt(question: &InterviewQuestion, answer_text: &str) -> String {
    render_template(
        FEEDBACK_PROMPT_TEMPLATE,
        &[
            ("category", question.category.label()),
            ("question", question.question_text.as_str()),
            ("answer", or_none(answer_text)),
        ],
    )
}

pub fn build_report_prompt(
    setup: &InterviewSetup,
    questions: &[InterviewQuestion],
    answers: &[UserAnswer],
) -> String {
    let transcript = questions
        .iter()
        .enumerate()
        .map(|(i, q)| {
            let answer = answers
                .iter()
                .find(|a| a.question_id == q.id)
                .map(|a| a.answer_text.as_str())
                .unwrap_or(NO_ANSWER);
            format!(
                "Q{}. [{}] (id: {}) {}\nA: {}",
                i + 1,
                q.category.label(),
                q.id,
                q.question_text,
                answer
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");
    let question_count = questions.len().to_string();

    let mut vars = profile_vars(setup).to_vec();
    vars.push(("transcript", transcript.as_str()));
    vars.push(("question_count", question_count.as_str()));
    render_template(REPORT_PROMPT_TEMPLATE, &vars)
}

fn profile_vars(setup: &InterviewSetup) -> [(&'static str, &str); 5] {
    [
        ("position", or_none(&setup.position)),
        ("experience", setup.experience_level.label()),
        ("company", or_none(&setup.target_company)),
        ("skills", or_none(&setup.skills)),
        (
            "additional_info",
            or_none(setup.additional_info.as_deref().unwrap_or_default()),
        ),
    ]
}

fn or_none(value: &str) -> &str {
    if value.trim().is_empty() {
        NONE_PROVIDED
    } else {
        value
    }
}

/// Single-pass `{key}` substitution. Substituted values are never rescanned,
/// so user text containing `{company}` stays literal. Unknown braces (JSON
/// examples) are copied through.
fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    'scan: while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let tail = &rest[start + 1..];
        for (key, value) in vars {
            if let Some(after) = tail.strip_prefix(key).and_then(|s| s.strip_prefix('}')) {
                out.push_str(value);
                rest = after;
                continue 'scan;
            }
        }
        out.push('{');
        rest = tail;
    }
    out.push_str(rest);
    out
}
