use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Candidate experience band.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperienceLevel {
    New,
    #[default]
    Junior,
    Mid,
    Senior,
    Lead,
}

impl ExperienceLevel {
    pub fn label(&self) -> &'static str {
        match self {
            ExperienceLevel::New => "Entry level (0-1 years)",
            ExperienceLevel::Junior => "Junior (1-3 years)",
            ExperienceLevel::Mid => "Mid-level (3-5 years)",
            ExperienceLevel::Senior => "Senior (5-10 years)",
            ExperienceLevel::Lead => "Lead / Manager (10+ years)",
        }
    }
}

/// Candidate and target-role context. Frozen once the interview starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterviewSetup {
    pub position: String,
    #[serde(alias = "experience")]
    pub experience_level: ExperienceLevel,
    #[serde(alias = "company")]
    pub target_company: String,
    #[serde(default)]
    pub skills: String,
    #[serde(default)]
    pub additional_info: Option<String>,
}

impl InterviewSetup {
    /// Trims free-text fields and rejects a blank position or company.
    pub fn validated(self) -> Result<Self, String> {
        let position = self.position.trim().to_string();
        let target_company = self.target_company.trim().to_string();
        if position.is_empty() {
            return Err("position cannot be empty".to_string());
        }
        if target_company.is_empty() {
            return Err("targetCompany cannot be empty".to_string());
        }
        Ok(Self {
            position,
            target_company,
            skills: self.skills.trim().to_string(),
            additional_info: self
                .additional_info
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            ..self
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionCategory {
    Technical,
    Behavioral,
    Situational,
    Culture,
}

impl QuestionCategory {
    pub fn label(&self) -> &'static str {
        match self {
            QuestionCategory::Technical => "Technical",
            QuestionCategory::Behavioral => "Behavioral",
            QuestionCategory::Situational => "Situational",
            QuestionCategory::Culture => "Culture fit",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterviewQuestion {
    pub id: String,
    pub category: QuestionCategory,
    #[serde(rename = "question")]
    pub question_text: String,
    #[serde(rename = "tips", default, skip_serializing_if = "Option::is_none")]
    pub tip: Option<String>,
}

/// One submitted answer. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAnswer {
    pub question_id: String,
    pub answer_text: String,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionFeedback {
    pub question_id: String,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub improvements: Vec<String>,
    #[serde(default)]
    pub suggested_answer: String,
    pub score: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterviewReport {
    pub overall_score: u8,
    pub summary: String,
    #[serde(default)]
    pub question_feedbacks: Vec<QuestionFeedback>,
    #[serde(default)]
    pub general_advice: Vec<String>,
}

/// Display band for a 0-100 score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreBand {
    Excellent,
    Good,
    Fair,
    NeedsWork,
}

impl ScoreBand {
    pub fn for_score(score: u32) -> Self {
        if score >= 80 {
            ScoreBand::Excellent
        } else if score >= 60 {
            ScoreBand::Good
        } else if score >= 40 {
            ScoreBand::Fair
        } else {
            ScoreBand::NeedsWork
        }
    }

    /// Per-question scores are out of 10.
    pub fn for_question_score(score: u8) -> Self {
        Self::for_score(u32::from(score) * 10)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup(position: &str, company: &str) -> InterviewSetup {
        InterviewSetup {
            position: position.to_string(),
            experience_level: ExperienceLevel::Junior,
            target_company: company.to_string(),
            skills: " Go, PostgreSQL ".to_string(),
            additional_info: Some("   ".to_string()),
        }
    }

    #[test]
    fn test_setup_validation_trims_fields() {
        let s = setup("  Backend Engineer ", " Acme").validated().unwrap();
        assert_eq!(s.position, "Backend Engineer");
        assert_eq!(s.target_company, "Acme");
        assert_eq!(s.skills, "Go, PostgreSQL");
        assert_eq!(s.additional_info, None);
    }

    #[test]
    fn test_setup_validation_rejects_blank_required_fields() {
        assert!(setup("   ", "Acme").validated().is_err());
        assert!(setup("Backend Engineer", "").validated().is_err());
    }

    #[test]
    fn test_setup_accepts_short_field_names() {
        let json = r#"{"position":"Backend Engineer","experience":"junior","company":"Acme",
            "skills":"Go","additionalInfo":""}"#;
        let s: InterviewSetup = serde_json::from_str(json).unwrap();
        assert_eq!(s.experience_level, ExperienceLevel::Junior);
        assert_eq!(s.target_company, "Acme");
    }

    #[test]
    fn test_question_uses_model_field_names() {
        let json = r#"{"id":"q1","category":"culture","question":"Why us?","tips":"Be specific"}"#;
        let q: InterviewQuestion = serde_json::from_str(json).unwrap();
        assert_eq!(q.category, QuestionCategory::Culture);
        assert_eq!(q.question_text, "Why us?");
        assert_eq!(q.tip.as_deref(), Some("Be specific"));
    }

    #[test]
    fn test_report_decodes_camel_case() {
        let json = r#"{
            "overallScore": 72,
            "summary": "Solid",
            "questionFeedbacks": [{
                "questionId": "q1", "strengths": ["clear"], "improvements": [],
                "suggestedAnswer": "...", "score": 7
            }],
            "generalAdvice": ["practice"]
        }"#;
        let r: InterviewReport = serde_json::from_str(json).unwrap();
        assert_eq!(r.overall_score, 72);
        assert_eq!(r.question_feedbacks[0].score, 7);
    }

    #[test]
    fn test_score_bands() {
        assert_eq!(ScoreBand::for_score(80), ScoreBand::Excellent);
        assert_eq!(ScoreBand::for_score(79), ScoreBand::Good);
        assert_eq!(ScoreBand::for_score(40), ScoreBand::Fair);
        assert_eq!(ScoreBand::for_score(0), ScoreBand::NeedsWork);
        assert_eq!(ScoreBand::for_question_score(6), ScoreBand::Good);
    }
}
