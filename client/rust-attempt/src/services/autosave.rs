use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::metrics::AUTOSAVES_TOTAL;
use crate::services::answer_state::{snapshot_to_payload, AnswerSnapshot};
use crate::services::attempt_api::AttemptApi;
use crate::utils::debounce::Debouncer;

/// What produced an observed snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeCause {
    /// User edit: restarts the quiet window.
    Edit,
    /// Periodic re-check: only opens a window if none is pending.
    Tick,
}

#[derive(Debug)]
struct AutosaveState {
    pending: Option<AnswerSnapshot>,
    last_saved: AnswerSnapshot,
}

/// Debounced background persistence of the full answer snapshot.
///
/// `last_saved` only advances when the server acknowledged a save, so a
/// failed save is retried by the next edit or tick with the newest snapshot.
pub struct AutosaveScheduler {
    state: Arc<Mutex<AutosaveState>>,
    debouncer: Debouncer,
}

impl AutosaveScheduler {
    pub fn new(
        api: Arc<dyn AttemptApi>,
        attempt_id: String,
        question_order: Vec<String>,
        initial: AnswerSnapshot,
        delay: Duration,
    ) -> Self {
        let state = Arc::new(Mutex::new(AutosaveState {
            pending: None,
            last_saved: initial,
        }));

        let flush_state = state.clone();
        let attempt_id = Arc::new(attempt_id);
        let question_order = Arc::new(question_order);
        let debouncer = Debouncer::spawn(delay, move || {
            flush(
                flush_state.clone(),
                api.clone(),
                attempt_id.clone(),
                question_order.clone(),
            )
        });

        Self { state, debouncer }
    }

    /// Records the current answer state and schedules a save if it differs
    /// from what the server last acknowledged.
    pub async fn observe(&self, snapshot: AnswerSnapshot, cause: ChangeCause) {
        let mut state = self.state.lock().await;
        if snapshot == state.last_saved {
            state.pending = None;
            return;
        }
        state.pending = Some(snapshot);
        drop(state);

        match cause {
            ChangeCause::Edit => self.debouncer.trigger(),
            ChangeCause::Tick => self.debouncer.arm(),
        }
    }

    pub async fn last_saved(&self) -> AnswerSnapshot {
        self.state.lock().await.last_saved.clone()
    }

    /// Whether an observed snapshot has not been acknowledged yet.
    pub async fn is_dirty(&self) -> bool {
        self.state.lock().await.pending.is_some()
    }

    pub fn delay(&self) -> Duration {
        self.debouncer.delay()
    }

    pub fn cancel(&self) {
        self.debouncer.cancel();
    }
}

async fn flush(
    state: Arc<Mutex<AutosaveState>>,
    api: Arc<dyn AttemptApi>,
    attempt_id: Arc<String>,
    question_order: Arc<Vec<String>>,
) {
    let snapshot = {
        let state = state.lock().await;
        match &state.pending {
            Some(pending) if *pending != state.last_saved => pending.clone(),
            _ => return,
        }
    };

    let payload = snapshot_to_payload(&snapshot, &question_order);
    match api.save(&attempt_id, &payload).await {
        Ok(()) => {
            let mut state = state.lock().await;
            if state.pending.as_ref() == Some(&snapshot) {
                state.pending = None;
            }
            state.last_saved = snapshot;
            AUTOSAVES_TOTAL.with_label_values(&["success"]).inc();
            tracing::debug!(attempt_id = %attempt_id, "Autosave acknowledged");
        }
        Err(e) => {
            AUTOSAVES_TOTAL.with_label_values(&["error"]).inc();
            tracing::warn!(
                attempt_id = %attempt_id,
                error = %e,
                "Autosave failed, will retry with the next change"
            );
        }
    }
}
