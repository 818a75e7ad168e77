use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::AttemptError;
use crate::metrics::SUBMISSIONS_TOTAL;
use crate::models::{AnswerPayload, SubmitResult};
use crate::services::attempt_api::AttemptApi;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitTrigger {
    Manual,
    TimerExpired,
}

impl SubmitTrigger {
    pub fn as_str(self) -> &'static str {
        match self {
            SubmitTrigger::Manual => "manual",
            SubmitTrigger::TimerExpired => "timer_expired",
        }
    }
}

#[derive(Debug, Clone)]
enum Guard {
    Idle,
    InFlight,
    Done(SubmitResult),
}

/// Calls the remote submit at most once per attempt.
///
/// The guard is the single source of truth for "a submission is
/// outstanding": `Idle → InFlight → Done`, or back to `Idle` on failure.
pub struct SubmissionCoordinator {
    api: Arc<dyn AttemptApi>,
    attempt_id: String,
    idempotency_key: String,
    guard: Mutex<Guard>,
}

impl SubmissionCoordinator {
    pub fn new(api: Arc<dyn AttemptApi>, attempt_id: impl Into<String>) -> Self {
        Self {
            api,
            attempt_id: attempt_id.into(),
            idempotency_key: Uuid::new_v4().to_string(),
            guard: Mutex::new(Guard::Idle),
        }
    }

    /// Key sent with every submit for this attempt, retries included.
    pub fn idempotency_key(&self) -> &str {
        &self.idempotency_key
    }

    pub async fn is_in_flight(&self) -> bool {
        matches!(*self.guard.lock().await, Guard::InFlight)
    }

    pub async fn result(&self) -> Option<SubmitResult> {
        match &*self.guard.lock().await {
            Guard::Done(result) => Some(result.clone()),
            _ => None,
        }
    }

    pub async fn submit(
        &self,
        answers: Vec<AnswerPayload>,
        trigger: SubmitTrigger,
    ) -> Result<SubmitResult, AttemptError> {
        {
            let mut guard = self.guard.lock().await;
            match &*guard {
                Guard::InFlight => {
                    tracing::debug!(
                        attempt_id = %self.attempt_id,
                        trigger = trigger.as_str(),
                        "Submit ignored, another submission is in flight"
                    );
                    return Err(AttemptError::SubmissionInProgress);
                }
                Guard::Done(_) => return Err(AttemptError::AlreadySubmitted),
                Guard::Idle => {}
            }
            *guard = Guard::InFlight;
        }

        tracing::info!(
            attempt_id = %self.attempt_id,
            trigger = trigger.as_str(),
            answers = answers.len(),
            "Submitting attempt"
        );

        let outcome = self
            .api
            .submit(&self.attempt_id, &answers, &self.idempotency_key)
            .await;

        let mut guard = self.guard.lock().await;
        match outcome {
            Ok(result) => {
                *guard = Guard::Done(result.clone());
                SUBMISSIONS_TOTAL
                    .with_label_values(&[trigger.as_str(), "success"])
                    .inc();
                tracing::info!(
                    attempt_id = %self.attempt_id,
                    status = ?result.status,
                    "Attempt submitted"
                );
                Ok(result)
            }
            Err(e) => {
                *guard = Guard::Idle;
                SUBMISSIONS_TOTAL
                    .with_label_values(&[trigger.as_str(), "error"])
                    .inc();
                tracing::error!(
                    attempt_id = %self.attempt_id,
                    error = %e,
                    "Failed to submit attempt"
                );
                Err(AttemptError::SubmitFailed(e))
            }
        }
    }
}
