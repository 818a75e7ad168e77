use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TimerEvent {
    TimerTick(TimerTick),
    TimeWarning(TimeWarning),
    TimeExpired(TimeExpired),
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TimerTick {
    pub attempt_id: String,
    pub remaining_seconds: u32,
    pub total_seconds: u32,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TimeWarning {
    pub attempt_id: String,
    pub remaining_seconds: u32,
    pub threshold_seconds: u32,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TimeExpired {
    pub attempt_id: String,
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

impl TimerEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            TimerEvent::TimerTick(_) => "timer-tick",
            TimerEvent::TimeWarning(_) => "time-warning",
            TimerEvent::TimeExpired(_) => "time-expired",
        }
    }

    pub fn remaining_seconds(&self) -> u32 {
        match self {
            TimerEvent::TimerTick(tick) => tick.remaining_seconds,
            TimerEvent::TimeWarning(warning) => warning.remaining_seconds,
            TimerEvent::TimeExpired(_) => 0,
        }
    }
}
