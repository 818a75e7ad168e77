use crate::models::AttemptStatus;
use crate::services::notifications::FrameError;

/// Failures talking to the remote attempt-lifecycle API.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("API returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid API URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("API base URL cannot carry path segments: {0}")]
    InvalidBaseUrl(String),
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            ApiError::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Transport failures and 5xx responses may succeed on a later try;
    /// client errors and bad URLs never will.
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Transport(_) | ApiError::Status { .. } => {
                self.status().map_or(true, |status| status >= 500)
            }
            ApiError::Url(_) | ApiError::InvalidBaseUrl(_) => false,
        }
    }
}

/// Errors surfaced by an attempt session to its caller.
#[derive(Debug, thiserror::Error)]
pub enum AttemptError {
    #[error("failed to start attempt: {0}")]
    Initialization(#[source] ApiError),

    #[error("attempt is not in progress (status {0:?})")]
    AttemptNotActive(AttemptStatus),

    #[error("operation not allowed while the session is {0}")]
    InvalidPhase(&'static str),

    #[error("unknown question {0}")]
    UnknownQuestion(String),

    #[error("question {question_id} has no option {option_id}")]
    UnknownOption {
        question_id: String,
        option_id: String,
    },

    #[error("select an answer before checking question {0}")]
    EmptySelection(String),

    #[error("answer checking is only available in practice attempts")]
    NotPracticeAttempt,

    #[error("confirmation belongs to a different attempt")]
    ConfirmationMismatch,

    #[error("a submission is already in flight")]
    SubmissionInProgress,

    #[error("attempt was already submitted")]
    AlreadySubmitted,

    #[error("submission failed: {0}")]
    SubmitFailed(#[source] ApiError),

    #[error("answer check failed: {0}")]
    CheckFailed(#[source] ApiError),
}

/// Notification channel failures.
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("STOMP frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("broker rejected the connection: {0}")]
    Rejected(String),

    #[error("timed out waiting for the broker")]
    ConnectTimeout,

    #[error("notification channel is not open")]
    NotOpen,

    #[error("notification channel is disconnected")]
    Disconnected,

    #[error("connection closed by broker")]
    Closed,

    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl AttemptError {
    /// Whether the caller may retry the same operation later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AttemptError::SubmitFailed(_)
                | AttemptError::CheckFailed(_)
                | AttemptError::Initialization(_)
        )
    }
}
