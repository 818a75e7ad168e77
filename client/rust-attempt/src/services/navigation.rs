use std::collections::HashSet;

use serde::Serialize;

/// Visual status of a question in the navigator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionStatus {
    Current,
    Flagged,
    Answered,
    Unanswered,
}

/// Derives the status with precedence current > flagged > answered > unanswered.
///
/// Flags outrank "answered" so flagged-but-answered questions stay visible.
pub fn question_status(is_current: bool, is_flagged: bool, is_answered: bool) -> QuestionStatus {
    if is_current {
        QuestionStatus::Current
    } else if is_flagged {
        QuestionStatus::Flagged
    } else if is_answered {
        QuestionStatus::Answered
    } else {
        QuestionStatus::Unanswered
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub total: usize,
    pub answered: usize,
    pub flagged: usize,
    pub current_index: usize,
}

/// Current question index plus the client-only "review later" flags.
#[derive(Debug, Clone, Default)]
pub struct NavigationState {
    current_index: usize,
    question_count: usize,
    flagged: HashSet<String>,
}

impl NavigationState {
    pub fn new(question_count: usize) -> Self {
        Self {
            current_index: 0,
            question_count,
            flagged: HashSet::new(),
        }
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    fn last_index(&self) -> usize {
        self.question_count.saturating_sub(1)
    }

    /// Moves forward one question; no-op on the last one.
    pub fn next(&mut self) -> usize {
        if self.current_index < self.last_index() {
            self.current_index += 1;
        }
        self.current_index
    }

    /// Moves back one question; no-op on the first one.
    pub fn previous(&mut self) -> usize {
        self.current_index = self.current_index.saturating_sub(1);
        self.current_index
    }

    pub fn go_to(&mut self, index: usize) -> usize {
        self.current_index = index.min(self.last_index());
        self.current_index
    }

    /// Flips the flag; returns whether the question is flagged afterwards.
    pub fn toggle_flag(&mut self, question_id: &str) -> bool {
        if self.flagged.remove(question_id) {
            false
        } else {
            self.flagged.insert(question_id.to_string());
            true
        }
    }

    pub fn is_flagged(&self, question_id: &str) -> bool {
        self.flagged.contains(question_id)
    }

    pub fn flagged_count(&self) -> usize {
        self.flagged.len()
    }

    pub fn status_of(&self, index: usize, question_id: &str, is_answered: bool) -> QuestionStatus {
        question_status(
            index == self.current_index,
            self.is_flagged(question_id),
            is_answered,
        )
    }
}
