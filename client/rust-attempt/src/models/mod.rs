use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod notification;
pub mod timer;

/// One student's ongoing or completed try at a quiz, as returned by the
/// attempt `start` endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Attempt {
    pub id: String,
    pub quiz_id: String,
    #[serde(default)]
    pub quiz_title: String,
    #[serde(rename = "type")]
    pub attempt_type: AttemptType,
    pub status: AttemptStatus,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_minutes: Option<u32>,
    #[serde(default)]
    pub questions: Vec<Question>,
}

impl Attempt {
    /// Hard deadline implied by the start timestamp and duration.
    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        let started_at = self.started_at?;
        let minutes = self.duration_minutes?;
        Some(started_at + chrono::Duration::minutes(i64::from(minutes)))
    }

    pub fn question(&self, question_id: &str) -> Option<&Question> {
        self.questions.iter().find(|q| q.id == question_id)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttemptType {
    Graded,
    Practice,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttemptStatus {
    InProgress,
    Submitted,
    Passed,
    Failed,
}

impl AttemptStatus {
    pub fn is_active(self) -> bool {
        matches!(self, AttemptStatus::InProgress)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: String,
    pub content: String,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    #[serde(default)]
    pub answers: Vec<AnswerOption>,
    /// Selections already stored server-side (resumed attempts).
    #[serde(default)]
    pub selected_answer_ids: Vec<String>,
}

impl Question {
    pub fn has_option(&self, option_id: &str) -> bool {
        self.answers.iter().any(|a| a.id == option_id)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuestionType {
    SingleChoice,
    MultipleChoice,
    TrueFalse,
}

impl QuestionType {
    pub fn allows_multiple(self) -> bool {
        matches!(self, QuestionType::MultipleChoice)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnswerOption {
    pub id: String,
    pub content: String,
}

/// One entry of a full answer-state snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AnswerPayload {
    pub question_id: String,
    pub selected_answer_ids: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AnswersRequest {
    pub answers: Vec<AnswerPayload>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckAnswerRequest {
    pub selected_answer_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResult {
    pub attempt_id: String,
    pub status: AttemptStatus,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub max_score: Option<f64>,
    #[serde(default)]
    pub passed: Option<bool>,
}

/// Verdict returned by the practice-mode "check answer" endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PracticeFeedback {
    pub correct: bool,
    #[serde(default)]
    pub explanation: Option<String>,
    #[serde(default)]
    pub correct_answer_ids: Vec<String>,
}
