use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time::MissedTickBehavior;

use crate::models::timer::{TimeExpired, TimeWarning, TimerEvent, TimerTick};
use crate::models::Attempt;
use crate::utils::clock::Clock;

/// Whole seconds left before the deadline, never negative.
pub fn remaining_seconds(started_at: DateTime<Utc>, duration_minutes: u32, now: DateTime<Utc>) -> u32 {
    let deadline = started_at + chrono::Duration::minutes(i64::from(duration_minutes));
    let remaining_ms = (deadline - now).num_milliseconds();
    if remaining_ms <= 0 {
        0
    } else {
        u32::try_from(remaining_ms / 1000).unwrap_or(u32::MAX)
    }
}

/// Countdown state for one attempt. Remaining time is re-derived from the
/// clock on every tick and never increases.
#[derive(Debug, Clone)]
pub struct Countdown {
    attempt_id: String,
    started_at: DateTime<Utc>,
    duration_minutes: u32,
    warning_threshold: u32,
    last_remaining: Option<u32>,
    warned: bool,
    expired: bool,
}

impl Countdown {
    pub fn new(
        attempt_id: impl Into<String>,
        started_at: DateTime<Utc>,
        duration_minutes: u32,
        warning_threshold: u32,
    ) -> Self {
        Self {
            attempt_id: attempt_id.into(),
            started_at,
            duration_minutes,
            warning_threshold,
            last_remaining: None,
            warned: false,
            expired: false,
        }
    }

    /// `None` when the attempt is not timed or no longer in progress.
    pub fn for_attempt(attempt: &Attempt, warning_threshold: u32) -> Option<Self> {
        if !attempt.status.is_active() {
            return None;
        }
        let started_at = attempt.started_at?;
        let duration_minutes = attempt.duration_minutes?;
        Some(Self::new(
            attempt.id.clone(),
            started_at,
            duration_minutes,
            warning_threshold,
        ))
    }

    pub fn total_seconds(&self) -> u32 {
        self.duration_minutes.saturating_mul(60)
    }

    pub fn is_expired(&self) -> bool {
        self.expired
    }

    pub fn remaining_at(&self, now: DateTime<Utc>) -> u32 {
        let remaining = remaining_seconds(self.started_at, self.duration_minutes, now);
        match self.last_remaining {
            Some(last) => remaining.min(last),
            None => remaining,
        }
    }

    /// Advances to `now`; yields a tick, plus the one-shot warning and expiry
    /// events when their thresholds are crossed. Empty once expired.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<TimerEvent> {
        if self.expired {
            return Vec::new();
        }

        let remaining = self.remaining_at(now);
        self.last_remaining = Some(remaining);

        let mut events = vec![TimerEvent::TimerTick(TimerTick {
            attempt_id: self.attempt_id.clone(),
            remaining_seconds: remaining,
            total_seconds: self.total_seconds(),
            timestamp: now,
        })];

        if !self.warned && remaining > 0 && remaining <= self.warning_threshold {
            self.warned = true;
            events.push(TimerEvent::TimeWarning(TimeWarning {
                attempt_id: self.attempt_id.clone(),
                remaining_seconds: remaining,
                threshold_seconds: self.warning_threshold,
                timestamp: now,
            }));
        }

        if remaining == 0 {
            self.expired = true;
            events.push(TimerEvent::TimeExpired(TimeExpired {
                attempt_id: self.attempt_id.clone(),
                timestamp: now,
                message: "Time limit exceeded".to_string(),
            }));
        }

        events
    }
}

#[async_trait]
pub trait CountdownObserver: Send + Sync {
    /// Called for every timer event; returning `false` stops the countdown.
    async fn on_event(&self, event: &TimerEvent) -> bool;

    /// Called exactly once when the countdown reaches zero.
    async fn on_expired(&self);
}

/// Ticks `countdown` every `interval` until it expires or the observer stops it.
pub async fn drive<O>(mut countdown: Countdown, clock: Arc<dyn Clock>, interval: Duration, observer: O)
where
    O: CountdownObserver,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::debug!(
        attempt_id = %countdown.attempt_id,
        total_seconds = countdown.total_seconds(),
        "Countdown started"
    );

    loop {
        ticker.tick().await;

        for event in countdown.tick(clock.now()) {
            if !observer.on_event(&event).await {
                tracing::debug!(attempt_id = %countdown.attempt_id, "Countdown stopped by observer");
                return;
            }
        }

        if countdown.is_expired() {
            tracing::info!(attempt_id = %countdown.attempt_id, "Countdown expired");
            observer.on_expired().await;
            return;
        }
    }
}
