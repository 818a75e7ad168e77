pub mod answer_state;
pub mod attempt_api;
pub mod attempt_session;
pub mod autosave;
pub mod countdown;
pub mod feedback_cache;
pub mod navigation;
pub mod notifications;
pub mod submission;

pub use attempt_api::{AttemptApi, HttpAttemptApi};
pub use attempt_session::{AttemptPhase, AttemptSession, SessionEvent, SessionSettings};
pub use notifications::{NotificationChannel, StompConnectionManager, Subscription};
pub use submission::SubmitTrigger;
