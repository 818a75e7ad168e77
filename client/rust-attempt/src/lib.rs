pub mod config;
pub mod error;
pub mod metrics;
pub mod models;
pub mod services;
pub mod utils;

pub use config::Config;
pub use error::{ApiError, AttemptError, NotificationError};
pub use services::{
    AttemptApi, AttemptPhase, AttemptSession, HttpAttemptApi, NotificationChannel, SessionEvent,
    SessionSettings, StompConnectionManager, Subscription, SubmitTrigger,
};
