//! Response Parser: pulls JSON out of free-form model text and maps it into
//! interview records.
//!
//! Models wrap JSON in prose, code fences or example snippets. Extraction
//! takes the leftmost opening bracket of the wanted kind, scans to its
//! balanced closing bracket (ignoring brackets inside JSON strings) and tries
//! to decode that span. A span that does not decode is skipped and the scan
//! resumes at the next opening bracket.
//!
//! Nothing here panics or propagates past the caller: every failure is a
//! `ParseFailure` value, and the degrade policy lives in `generation`.

use std::collections::{HashMap, HashSet};

use serde_json::Value;
use thiserror::Error;

use crate::interview::models::{InterviewQuestion, InterviewReport, QuestionCategory};
use crate::interview::prompts::QUESTION_COUNT;

/// Required category mix of a generated question set.
pub const QUESTION_MIX: [(QuestionCategory, usize); 4] = [
    (QuestionCategory::Technical, 3),
    (QuestionCategory::Behavioral, 2),
    (QuestionCategory::Situational, 1),
    (QuestionCategory::Culture, 1),
];

#[derive(Debug, Error, PartialEq)]
pub enum ParseFailure {
    #[error("no decodable JSON {0} found in model output")]
    NotFound(&'static str),

    #[error("JSON does not match the expected shape: {0}")]
    Shape(String),
}

pub fn extract_json_array(text: &str) -> Result<Value, ParseFailure> {
    extract_balanced(text, '[', ']').ok_or(ParseFailure::NotFound("array"))
}

pub fn extract_json_object(text: &str) -> Result<Value, ParseFailure> {
    extract_balanced(text, '{', '}').ok_or(ParseFailure::NotFound("object"))
}

fn extract_balanced(text: &str, open: char, close: char) -> Option<Value> {
    let mut from = 0;
    while let Some(offset) = text[from..].find(open) {
        let start = from + offset;
        if let Some(end) = balanced_end(&text[start..], open, close) {
            if let Ok(value) = serde_json::from_str::<Value>(&text[start..start + end]) {
                return Some(value);
            }
        }
        from = start + open.len_utf8();
    }
    None
}

/// Byte length of the balanced span starting at `s[0] == open`, if it closes.
fn balanced_end(s: &str, open: char, close: char) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in s.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        if c == '"' {
            in_string = true;
        } else if c == open {
            depth += 1;
        } else if c == close {
            depth -= 1;
            if depth == 0 {
                return Some(i + c.len_utf8());
            }
        }
    }
    None
}

/// Decodes a generated question set. Anything short of a complete, well-formed
/// set with the required category mix is a failure; partial sets are never
/// returned.
pub fn decode_questions(text: &str) -> Result<Vec<InterviewQuestion>, ParseFailure> {
    let value = extract_json_array(text)?;
    let questions: Vec<InterviewQuestion> =
        serde_json::from_value(value).map_err(|e| ParseFailure::Shape(e.to_string()))?;

    let questions: Vec<InterviewQuestion> = questions
        .into_iter()
        .map(|q| InterviewQuestion {
            id: q.id.trim().to_string(),
            question_text: q.question_text.trim().to_string(),
            tip: q
                .tip
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty()),
            ..q
        })
        .collect();

    validate_question_set(&questions)?;
    Ok(questions)
}

fn validate_question_set(questions: &[InterviewQuestion]) -> Result<(), ParseFailure> {
    if questions.len() != QUESTION_COUNT {
        return Err(ParseFailure::Shape(format!(
            "expected {QUESTION_COUNT} questions, got {}",
            questions.len()
        )));
    }

    let mut ids = HashSet::new();
    let mut counts: HashMap<QuestionCategory, usize> = HashMap::new();
    for q in questions {
        if q.id.is_empty() || q.question_text.is_empty() {
            return Err(ParseFailure::Shape("question with empty id or text".to_string()));
        }
        if !ids.insert(q.id.as_str()) {
            return Err(ParseFailure::Shape(format!("duplicate question id '{}'", q.id)));
        }
        *counts.entry(q.category).or_default() += 1;
    }

    for (category, expected) in QUESTION_MIX {
        let actual = counts.get(&category).copied().unwrap_or(0);
        if actual != expected {
            return Err(ParseFailure::Shape(format!(
                "expected {expected} {} questions, got {actual}",
                category.label()
            )));
        }
    }
    Ok(())
}

/// Decodes a final report. Score ranges are not checked beyond integer shape.
pub fn decode_report(text: &str) -> Result<InterviewReport, ParseFailure> {
    let value = extract_json_object(text)?;
    serde_json::from_value(value).map_err(|e| ParseFailure::Shape(e.to_string()))
}
