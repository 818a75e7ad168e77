use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

use crate::error::{ApiError, AttemptError};
use crate::metrics::{ATTEMPT_SESSIONS_ACTIVE, PRACTICE_CHECKS_TOTAL};
use crate::models::timer::TimerEvent;
use crate::models::{Attempt, AttemptType, PracticeFeedback, Question, SubmitResult};
use crate::services::answer_state::AnswerStateStore;
use crate::services::attempt_api::AttemptApi;
use crate::services::autosave::{AutosaveScheduler, ChangeCause};
use crate::services::countdown::{self, remaining_seconds, Countdown, CountdownObserver};
use crate::services::feedback_cache::PracticeFeedbackCache;
use crate::services::navigation::{NavigationState, Progress, QuestionStatus};
use crate::services::submission::{SubmissionCoordinator, SubmitTrigger};
use crate::utils::clock::Clock;
use crate::utils::retry::{retry_async_if, RetryConfig};

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub autosave_delay: Duration,
    pub tick_interval: Duration,
    pub time_warning_seconds: u32,
    pub start_retry: RetryConfig,
    pub event_capacity: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            autosave_delay: Duration::from_secs(5),
            tick_interval: Duration::from_secs(1),
            time_warning_seconds: 60,
            start_retry: RetryConfig::default(),
            event_capacity: 256,
        }
    }
}

/// Client-observed attempt lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptPhase {
    Loading,
    Active,
    Submitting,
    Submitted,
    SubmitFailed,
}

impl AttemptPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            AttemptPhase::Loading => "loading",
            AttemptPhase::Active => "active",
            AttemptPhase::Submitting => "submitting",
            AttemptPhase::Submitted => "submitted",
            AttemptPhase::SubmitFailed => "submit_failed",
        }
    }
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    Timer(TimerEvent),
    Submitted {
        result: SubmitResult,
        trigger: SubmitTrigger,
    },
    SubmitFailed {
        message: String,
        trigger: SubmitTrigger,
    },
    /// Transient, user-visible message (e.g. a failed practice check).
    Notice { message: String },
}

/// Snapshot shown before a manual submit. Confirming it yields the token
/// `AttemptSession::submit` requires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitReview {
    attempt_id: String,
    pub total: usize,
    pub answered: usize,
    pub unanswered: Vec<String>,
    pub flagged: Vec<String>,
}

impl SubmitReview {
    pub fn confirm(self) -> Confirmation {
        Confirmation {
            attempt_id: self.attempt_id,
        }
    }
}

/// Proof that the user confirmed a manual submission.
#[derive(Debug)]
pub struct Confirmation {
    attempt_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuestionView {
    pub index: usize,
    pub question_id: String,
    pub status: QuestionStatus,
    pub answered: bool,
    pub flagged: bool,
}

struct SessionState {
    phase: AttemptPhase,
    disposed: bool,
    answers: AnswerStateStore,
    navigation: NavigationState,
    feedback: PracticeFeedbackCache,
}

impl SessionState {
    fn ensure_active(&self) -> Result<(), AttemptError> {
        if self.disposed {
            return Err(AttemptError::InvalidPhase("disposed"));
        }
        match self.phase {
            AttemptPhase::Active => Ok(()),
            other => Err(AttemptError::InvalidPhase(other.as_str())),
        }
    }
}

struct SessionInner {
    attempt: Attempt,
    api: Arc<dyn AttemptApi>,
    clock: Arc<dyn Clock>,
    settings: SessionSettings,
    state: Mutex<SessionState>,
    autosave: AutosaveScheduler,
    submission: SubmissionCoordinator,
    events: broadcast::Sender<SessionEvent>,
    timer: StdMutex<Option<JoinHandle<()>>>,
}

impl SessionInner {
    fn emit(&self, event: SessionEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    fn question(&self, question_id: &str) -> Result<&Question, AttemptError> {
        self.attempt
            .question(question_id)
            .ok_or_else(|| AttemptError::UnknownQuestion(question_id.to_string()))
    }

    fn take_timer(&self) -> Option<JoinHandle<()>> {
        match self.timer.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    fn stop_timer(&self) {
        if let Some(handle) = self.take_timer() {
            handle.abort();
        }
    }

    async fn submit_with(&self, trigger: SubmitTrigger) -> Result<SubmitResult, AttemptError> {
        let answers = {
            let mut state = self.state.lock().await;
            if state.disposed {
                return Err(AttemptError::InvalidPhase("disposed"));
            }
            match state.phase {
                AttemptPhase::Active | AttemptPhase::SubmitFailed => {}
                AttemptPhase::Submitting => return Err(AttemptError::SubmissionInProgress),
                AttemptPhase::Submitted => return Err(AttemptError::AlreadySubmitted),
                AttemptPhase::Loading => return Err(AttemptError::InvalidPhase("loading")),
            }
            state.phase = AttemptPhase::Submitting;
            // full current state, whatever autosave has flushed so far
            state.answers.to_payload()
        };

        let outcome = self.submission.submit(answers, trigger).await;

        let mut state = self.state.lock().await;
        match &outcome {
            Ok(result) => {
                state.phase = AttemptPhase::Submitted;
                drop(state);
                self.autosave.cancel();
                match trigger {
                    SubmitTrigger::Manual => self.stop_timer(),
                    // the countdown task is the caller and ends on its own
                    SubmitTrigger::TimerExpired => drop(self.take_timer()),
                }
                self.emit(SessionEvent::Submitted {
                    result: result.clone(),
                    trigger,
                });
            }
            Err(AttemptError::AlreadySubmitted) => state.phase = AttemptPhase::Submitted,
            Err(AttemptError::SubmissionInProgress) => {}
            Err(e) => {
                state.phase = AttemptPhase::SubmitFailed;
                drop(state);
                self.emit(SessionEvent::SubmitFailed {
                    message: e.to_string(),
                    trigger,
                });
            }
        }

        outcome
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        self.stop_timer();
        ATTEMPT_SESSIONS_ACTIVE.dec();
    }
}

struct TimerObserver {
    session: Weak<SessionInner>,
}

#[async_trait]
impl CountdownObserver for TimerObserver {
    async fn on_event(&self, event: &TimerEvent) -> bool {
        let Some(inner) = self.session.upgrade() else {
            return false;
        };

        let snapshot = {
            let state = inner.state.lock().await;
            if state.disposed || state.phase == AttemptPhase::Submitted {
                return false;
            }
            (state.phase == AttemptPhase::Active).then(|| state.answers.snapshot())
        };

        inner.emit(SessionEvent::Timer(event.clone()));

        if let (TimerEvent::TimerTick(_), Some(snapshot)) = (event, snapshot) {
            inner.autosave.observe(snapshot, ChangeCause::Tick).await;
        }
        true
    }

    async fn on_expired(&self) {
        let Some(inner) = self.session.upgrade() else {
            return;
        };

        match inner.submit_with(SubmitTrigger::TimerExpired).await {
            Ok(_) => {}
            Err(AttemptError::SubmissionInProgress) | Err(AttemptError::AlreadySubmitted) => {
                tracing::debug!(
                    attempt_id = %inner.attempt.id,
                    "Time expired while a submission was already handled"
                );
            }
            Err(e) => {
                tracing::warn!(
                    attempt_id = %inner.attempt.id,
                    error = %e,
                    "Auto-submit on expiry failed"
                );
            }
        }
    }
}

/// One student's live attempt: answer state, countdown, autosave and
/// submission, with an explicit start/dispose lifecycle.
pub struct AttemptSession {
    inner: Arc<SessionInner>,
}

impl AttemptSession {
    /// Creates or resumes the attempt for `quiz_id` and starts its countdown.
    pub async fn start(
        api: Arc<dyn AttemptApi>,
        quiz_id: &str,
        settings: SessionSettings,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, AttemptError> {
        tracing::info!("Starting attempt for quiz {}", quiz_id);

        let attempt = retry_async_if(
            settings.start_retry.clone(),
            ApiError::is_transient,
            || api.start(quiz_id),
        )
            .await
            .map_err(|e| {
                tracing::error!("Failed to start attempt for quiz {}: {}", quiz_id, e);
                AttemptError::Initialization(e)
            })?;

        Self::from_attempt(api, attempt, settings, clock).await
    }

    /// Builds a session around an attempt that was already fetched.
    pub async fn from_attempt(
        api: Arc<dyn AttemptApi>,
        attempt: Attempt,
        settings: SessionSettings,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, AttemptError> {
        if !attempt.status.is_active() {
            return Err(AttemptError::AttemptNotActive(attempt.status));
        }

        let answers = AnswerStateStore::from_questions(&attempt.questions);
        let question_order = attempt.questions.iter().map(|q| q.id.clone()).collect();
        let autosave = AutosaveScheduler::new(
            api.clone(),
            attempt.id.clone(),
            question_order,
            answers.snapshot(),
            settings.autosave_delay,
        );
        let submission = SubmissionCoordinator::new(api.clone(), attempt.id.clone());
        let (events, _) = broadcast::channel(settings.event_capacity.max(1));

        let state = SessionState {
            phase: AttemptPhase::Loading,
            disposed: false,
            answers,
            navigation: NavigationState::new(attempt.questions.len()),
            feedback: PracticeFeedbackCache::default(),
        };

        let inner = Arc::new(SessionInner {
            attempt,
            api,
            clock,
            settings,
            state: Mutex::new(state),
            autosave,
            submission,
            events,
            timer: StdMutex::new(None),
        });
        ATTEMPT_SESSIONS_ACTIVE.inc();

        let session = Self { inner };
        // must be Active before the countdown can observe an already-past deadline
        session.inner.state.lock().await.phase = AttemptPhase::Active;
        session.start_timer();

        tracing::info!(
            attempt_id = %session.inner.attempt.id,
            attempt_type = ?session.inner.attempt.attempt_type,
            questions = session.inner.attempt.questions.len(),
            "Attempt session active"
        );

        Ok(session)
    }

    fn start_timer(&self) {
        let Some(countdown) =
            Countdown::for_attempt(&self.inner.attempt, self.inner.settings.time_warning_seconds)
        else {
            tracing::debug!(attempt_id = %self.inner.attempt.id, "Attempt is untimed");
            return;
        };

        let observer = TimerObserver {
            session: Arc::downgrade(&self.inner),
        };
        let handle = tokio::spawn(countdown::drive(
            countdown,
            self.inner.clock.clone(),
            self.inner.settings.tick_interval,
            observer,
        ));

        match self.inner.timer.lock() {
            Ok(mut slot) => *slot = Some(handle),
            Err(poisoned) => *poisoned.into_inner() = Some(handle),
        }
    }

    pub fn attempt(&self) -> &Attempt {
        &self.inner.attempt
    }

    pub fn attempt_id(&self) -> &str {
        &self.inner.attempt.id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub async fn phase(&self) -> AttemptPhase {
        self.inner.state.lock().await.phase
    }

    /// Seconds left right now, for timed attempts.
    pub fn remaining_seconds(&self) -> Option<u32> {
        let started_at = self.inner.attempt.started_at?;
        let duration = self.inner.attempt.duration_minutes?;
        Some(remaining_seconds(started_at, duration, self.inner.clock.now()))
    }

    pub async fn select(&self, question_id: &str, option_id: &str) -> Result<Vec<String>, AttemptError> {
        let question = self.inner.question(question_id)?;
        if !question.has_option(option_id) {
            return Err(AttemptError::UnknownOption {
                question_id: question_id.to_string(),
                option_id: option_id.to_string(),
            });
        }

        let (selection, snapshot) = {
            let mut state = self.inner.state.lock().await;
            state.ensure_active()?;

            let changed = state
                .answers
                .select(question_id, option_id, question.question_type);
            if changed {
                state.feedback.invalidate(question_id);
            }
            (
                state.answers.selected(question_id).to_vec(),
                changed.then(|| state.answers.snapshot()),
            )
        };

        if let Some(snapshot) = snapshot {
            self.inner.autosave.observe(snapshot, ChangeCause::Edit).await;
        }
        Ok(selection)
    }

    pub async fn clear(&self, question_id: &str) -> Result<(), AttemptError> {
        self.inner.question(question_id)?;

        let snapshot = {
            let mut state = self.inner.state.lock().await;
            state.ensure_active()?;

            if !state.answers.clear(question_id) {
                return Ok(());
            }
            state.feedback.invalidate(question_id);
            state.answers.snapshot()
        };

        self.inner.autosave.observe(snapshot, ChangeCause::Edit).await;
        Ok(())
    }

    pub async fn selected(&self, question_id: &str) -> Vec<String> {
        self.inner
            .state
            .lock()
            .await
            .answers
            .selected(question_id)
            .to_vec()
    }

    pub async fn toggle_flag(&self, question_id: &str) -> Result<bool, AttemptError> {
        self.inner.question(question_id)?;
        let mut state = self.inner.state.lock().await;
        state.ensure_active()?;
        Ok(state.navigation.toggle_flag(question_id))
    }

    pub async fn next(&self) -> usize {
        self.inner.state.lock().await.navigation.next()
    }

    pub async fn previous(&self) -> usize {
        self.inner.state.lock().await.navigation.previous()
    }

    pub async fn go_to(&self, index: usize) -> usize {
        self.inner.state.lock().await.navigation.go_to(index)
    }

    pub async fn current_question(&self) -> Option<Question> {
        let index = self.inner.state.lock().await.navigation.current_index();
        self.inner.attempt.questions.get(index).cloned()
    }

    /// Per-question status for the navigator panel.
    pub async fn navigator(&self) -> Vec<QuestionView> {
        let state = self.inner.state.lock().await;
        self.inner
            .attempt
            .questions
            .iter()
            .enumerate()
            .map(|(index, question)| {
                let answered = state.answers.is_answered(&question.id);
                QuestionView {
                    index,
                    question_id: question.id.clone(),
                    status: state.navigation.status_of(index, &question.id, answered),
                    answered,
                    flagged: state.navigation.is_flagged(&question.id),
                }
            })
            .collect()
    }

    pub async fn progress(&self) -> Progress {
        let state = self.inner.state.lock().await;
        Progress {
            total: self.inner.attempt.questions.len(),
            answered: state.answers.answered_count(),
            flagged: state.navigation.flagged_count(),
            current_index: state.navigation.current_index(),
        }
    }

    /// Cached practice verdict for the question's current selection, if any.
    pub async fn feedback(&self, question_id: &str) -> Option<PracticeFeedback> {
        self.inner.state.lock().await.feedback.get(question_id).cloned()
    }

    /// Asks the server whether the current selection is correct (practice only).
    pub async fn check(&self, question_id: &str) -> Result<PracticeFeedback, AttemptError> {
        if self.inner.attempt.attempt_type != AttemptType::Practice {
            return Err(AttemptError::NotPracticeAttempt);
        }
        self.inner.question(question_id)?;

        let selection = {
            let state = self.inner.state.lock().await;
            state.ensure_active()?;

            let selection = state.answers.selected(question_id).to_vec();
            if selection.is_empty() {
                return Err(AttemptError::EmptySelection(question_id.to_string()));
            }
            if let Some(cached) = state.feedback.get_for(question_id, &selection) {
                PRACTICE_CHECKS_TOTAL.with_label_values(&["cache"]).inc();
                return Ok(cached.clone());
            }
            selection
        };

        match self.inner.api.check_answer(question_id, &selection).await {
            Ok(feedback) => {
                PRACTICE_CHECKS_TOTAL.with_label_values(&["network"]).inc();
                let mut state = self.inner.state.lock().await;
                if state.answers.selected(question_id) == selection.as_slice() {
                    state
                        .feedback
                        .insert(question_id, selection, feedback.clone());
                } else {
                    tracing::debug!(
                        "Selection for question {} changed during check, not caching",
                        question_id
                    );
                }
                Ok(feedback)
            }
            Err(e) => {
                PRACTICE_CHECKS_TOTAL.with_label_values(&["error"]).inc();
                tracing::warn!("Answer check failed for question {}: {}", question_id, e);
                self.inner.emit(SessionEvent::Notice {
                    message: format!("Could not check the answer: {}", e),
                });
                Err(AttemptError::CheckFailed(e))
            }
        }
    }

    /// Summary for the confirmation step of a manual submit.
    pub async fn review(&self) -> Result<SubmitReview, AttemptError> {
        let state = self.inner.state.lock().await;
        match state.phase {
            AttemptPhase::Active | AttemptPhase::SubmitFailed => {}
            AttemptPhase::Submitting => return Err(AttemptError::SubmissionInProgress),
            AttemptPhase::Submitted => return Err(AttemptError::AlreadySubmitted),
            AttemptPhase::Loading => return Err(AttemptError::InvalidPhase("loading")),
        }

        let questions = &self.inner.attempt.questions;
        Ok(SubmitReview {
            attempt_id: self.inner.attempt.id.clone(),
            total: questions.len(),
            answered: state.answers.answered_count(),
            unanswered: questions
                .iter()
                .filter(|q| !state.answers.is_answered(&q.id))
                .map(|q| q.id.clone())
                .collect(),
            flagged: questions
                .iter()
                .filter(|q| state.navigation.is_flagged(&q.id))
                .map(|q| q.id.clone())
                .collect(),
        })
    }

    /// Manual submit after the user confirmed the review.
    pub async fn submit(&self, confirmation: Confirmation) -> Result<SubmitResult, AttemptError> {
        if confirmation.attempt_id != self.inner.attempt.id {
            return Err(AttemptError::ConfirmationMismatch);
        }
        self.inner.submit_with(SubmitTrigger::Manual).await
    }

    /// Retries a failed submission; only valid after a failure.
    pub async fn retry_submit(&self) -> Result<SubmitResult, AttemptError> {
        let phase = self.phase().await;
        if phase != AttemptPhase::SubmitFailed {
            return Err(AttemptError::InvalidPhase(phase.as_str()));
        }
        self.inner.submit_with(SubmitTrigger::Manual).await
    }

    pub async fn submission_result(&self) -> Option<SubmitResult> {
        self.inner.submission.result().await
    }

    /// Whether answers changed since the last acknowledged autosave.
    pub async fn has_unsaved_changes(&self) -> bool {
        self.inner.autosave.is_dirty().await
    }

    /// Stops the countdown and autosave; the session rejects edits afterwards.
    pub async fn dispose(&self) {
        self.inner.state.lock().await.disposed = true;
        self.inner.stop_timer();
        self.inner.autosave.cancel();
        tracing::info!(attempt_id = %self.inner.attempt.id, "Attempt session disposed");
    }
}
