use std::collections::HashMap;

use crate::models::PracticeFeedback;

#[derive(Debug, Clone)]
struct CachedFeedback {
    selection: Vec<String>,
    feedback: PracticeFeedback,
}

/// Per-question "check answer" verdicts for practice attempts.
///
/// Each entry remembers the selection it was computed for; an entry is only
/// served while that selection is still current.
#[derive(Debug, Clone, Default)]
pub struct PracticeFeedbackCache {
    entries: HashMap<String, CachedFeedback>,
}

impl PracticeFeedbackCache {
    pub fn get(&self, question_id: &str) -> Option<&PracticeFeedback> {
        self.entries.get(question_id).map(|entry| &entry.feedback)
    }

    /// Cached verdict, provided it was computed for exactly `selection`.
    pub fn get_for(&self, question_id: &str, selection: &[String]) -> Option<&PracticeFeedback> {
        self.entries
            .get(question_id)
            .filter(|entry| entry.selection == selection)
            .map(|entry| &entry.feedback)
    }

    pub fn insert(&mut self, question_id: &str, selection: Vec<String>, feedback: PracticeFeedback) {
        self.entries.insert(
            question_id.to_string(),
            CachedFeedback {
                selection,
                feedback,
            },
        );
    }

    /// Evicts the verdict for a question whose selection changed.
    pub fn invalidate(&mut self, question_id: &str) -> bool {
        self.entries.remove(question_id).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wrong(correct: &str) -> PracticeFeedback {
        PracticeFeedback {
            correct: false,
            explanation: Some("Borrowed slices do not own data".into()),
            correct_answer_ids: vec![correct.to_string()],
        }
    }

    #[test]
    fn invalidate_evicts_entry() {
        let mut cache = PracticeFeedbackCache::default();
        cache.insert("Q3", vec!["A".into()], wrong("B"));
        assert!(cache.get("Q3").is_some());

        assert!(cache.invalidate("Q3"));
        assert!(cache.get("Q3").is_none());
        assert!(!cache.invalidate("Q3"));
    }

    #[test]
    fn get_for_requires_matching_selection() {
        let mut cache = PracticeFeedbackCache::default();
        cache.insert("Q3", vec!["A".into()], wrong("B"));

        assert!(cache.get_for("Q3", &["A".to_string()]).is_some());
        assert!(cache.get_for("Q3", &["B".to_string()]).is_none());
        assert!(cache.get_for("Q4", &["A".to_string()]).is_none());
    }
}
