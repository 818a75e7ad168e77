use std::collections::BTreeMap;

use crate::models::{AnswerPayload, Question, QuestionType};

/// Full answer state: question id to selected option ids, in selection order.
pub type AnswerSnapshot = BTreeMap<String, Vec<String>>;

/// Local approximation of the server-side answers between saves.
#[derive(Debug, Clone, Default)]
pub struct AnswerStateStore {
    selections: AnswerSnapshot,
    order: Vec<String>,
}

impl AnswerStateStore {
    /// Seeds the store with selections the server already holds (resume).
    pub fn from_questions(questions: &[Question]) -> Self {
        let mut selections = AnswerSnapshot::new();
        for question in questions {
            if question.selected_answer_ids.is_empty() {
                continue;
            }
            let mut selected = question.selected_answer_ids.clone();
            if !question.question_type.allows_multiple() {
                selected.truncate(1);
            }
            dedup_in_order(&mut selected);
            selections.insert(question.id.clone(), selected);
        }

        Self {
            selections,
            order: questions.iter().map(|q| q.id.clone()).collect(),
        }
    }

    /// Applies a click on `option_id`.
    ///
    /// Multiple-choice questions toggle membership; single-choice and
    /// true/false questions replace the selection. Returns `true` when the
    /// question's selection changed.
    pub fn select(&mut self, question_id: &str, option_id: &str, question_type: QuestionType) -> bool {
        let selected = self.selections.entry(question_id.to_string()).or_default();

        if question_type.allows_multiple() {
            if let Some(pos) = selected.iter().position(|id| id == option_id) {
                selected.remove(pos);
            } else {
                selected.push(option_id.to_string());
            }
            return true;
        }

        if selected.len() == 1 && selected[0] == option_id {
            return false;
        }
        selected.clear();
        selected.push(option_id.to_string());
        true
    }

    /// Removes every selection for the question. Returns `true` if anything was selected.
    pub fn clear(&mut self, question_id: &str) -> bool {
        match self.selections.get_mut(question_id) {
            Some(selected) if !selected.is_empty() => {
                selected.clear();
                true
            }
            _ => false,
        }
    }

    pub fn selected(&self, question_id: &str) -> &[String] {
        self.selections
            .get(question_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn is_answered(&self, question_id: &str) -> bool {
        !self.selected(question_id).is_empty()
    }

    pub fn answered_count(&self) -> usize {
        self.selections.values().filter(|s| !s.is_empty()).count()
    }

    pub fn snapshot(&self) -> AnswerSnapshot {
        self.selections.clone()
    }

    /// Full answer set in question order, for save and submit.
    pub fn to_payload(&self) -> Vec<AnswerPayload> {
        snapshot_to_payload(&self.selections, &self.order)
    }
}

/// Serializes a snapshot, listing questions in `order` first and any others after.
pub fn snapshot_to_payload(snapshot: &AnswerSnapshot, order: &[String]) -> Vec<AnswerPayload> {
    let mut payload: Vec<AnswerPayload> = order
        .iter()
        .filter_map(|id| {
            snapshot.get(id).map(|selected| AnswerPayload {
                question_id: id.clone(),
                selected_answer_ids: selected.clone(),
            })
        })
        .collect();

    for (id, selected) in snapshot {
        if !order.contains(id) {
            payload.push(AnswerPayload {
                question_id: id.clone(),
                selected_answer_ids: selected.clone(),
            });
        }
    }

    payload
}

fn dedup_in_order(ids: &mut Vec<String>) {
    let mut seen = Vec::with_capacity(ids.len());
    ids.retain(|id| {
        if seen.contains(id) {
            false
        } else {
            seen.push(id.clone());
            true
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AnswerOption;

    fn question(id: &str, question_type: QuestionType, selected: &[&str]) -> Question {
        Question {
            id: id.to_string(),
            content: format!("Question {}", id),
            question_type,
            answers: ["A", "B", "X", "Y", "Z"]
                .iter()
                .map(|o| AnswerOption {
                    id: o.to_string(),
                    content: o.to_string(),
                })
                .collect(),
            selected_answer_ids: selected.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn single_choice_replaces_selection() {
        let mut store = AnswerStateStore::default();

        assert!(store.select("Q1", "A", QuestionType::SingleChoice));
        assert_eq!(store.selected("Q1"), ["A"]);

        assert!(store.select("Q1", "B", QuestionType::SingleChoice));
        assert_eq!(store.selected("Q1"), ["B"]);
    }

    #[test]
    fn single_choice_reselect_is_noop() {
        let mut store = AnswerStateStore::default();
        store.select("Q1", "A", QuestionType::TrueFalse);

        assert!(!store.select("Q1", "A", QuestionType::TrueFalse));
        assert_eq!(store.selected("Q1"), ["A"]);
    }

    #[test]
    fn single_choice_never_exceeds_one() {
        let mut store = AnswerStateStore::default();
        for option in ["A", "B", "A", "X", "X", "Z"] {
            store.select("Q1", option, QuestionType::SingleChoice);
            assert!(store.selected("Q1").len() <= 1);
        }
        assert_eq!(store.selected("Q1"), ["Z"]);
    }

    #[test]
    fn multiple_choice_toggles_membership() {
        let mut store = AnswerStateStore::default();

        store.select("Q2", "X", QuestionType::MultipleChoice);
        store.select("Q2", "Y", QuestionType::MultipleChoice);
        store.select("Q2", "X", QuestionType::MultipleChoice);

        assert_eq!(store.selected("Q2"), ["Y"]);
    }

    #[test]
    fn multiple_choice_final_membership_is_order_independent() {
        let sequences: [&[&str]; 3] = [
            &["X", "Y", "Z", "X"],
            &["X", "X", "Z", "Y"],
            &["Z", "Y", "X", "X"],
        ];

        for sequence in sequences {
            let mut store = AnswerStateStore::default();
            for option in sequence {
                store.select("Q2", option, QuestionType::MultipleChoice);
            }
            let mut selected = store.selected("Q2").to_vec();
            selected.sort();
            assert_eq!(selected, ["Y", "Z"], "sequence {:?}", sequence);
        }
    }

    #[test]
    fn clear_empties_selection() {
        let mut store = AnswerStateStore::default();
        store.select("Q1", "A", QuestionType::SingleChoice);

        assert!(store.clear("Q1"));
        assert!(!store.is_answered("Q1"));
        assert!(!store.clear("Q1"));
        assert!(!store.clear("missing"));
    }

    #[test]
    fn seeds_from_resumed_questions() {
        let questions = vec![
            question("Q1", QuestionType::SingleChoice, &["A", "B"]),
            question("Q2", QuestionType::MultipleChoice, &["X", "Y", "X"]),
            question("Q3", QuestionType::TrueFalse, &[]),
        ];

        let store = AnswerStateStore::from_questions(&questions);
        assert_eq!(store.selected("Q1"), ["A"]);
        assert_eq!(store.selected("Q2"), ["X", "Y"]);
        assert_eq!(store.answered_count(), 2);
        assert!(!store.is_answered("Q3"));
    }

    #[test]
    fn payload_follows_question_order() {
        let questions = vec![
            question("q-b", QuestionType::SingleChoice, &[]),
            question("q-a", QuestionType::SingleChoice, &[]),
        ];
        let mut store = AnswerStateStore::from_questions(&questions);
        store.select("q-a", "A", QuestionType::SingleChoice);
        store.select("q-b", "B", QuestionType::SingleChoice);

        let ids: Vec<_> = store
            .to_payload()
            .into_iter()
            .map(|p| p.question_id)
            .collect();
        assert_eq!(ids, ["q-b", "q-a"]);
    }
}
