use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use url::Url;

use crate::error::ApiError;
use crate::metrics::track_api_call;
use crate::models::{
    AnswerPayload, AnswersRequest, Attempt, CheckAnswerRequest, PracticeFeedback, SubmitResult,
};

pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

/// Remote attempt lifecycle, as consumed by an attempt session.
#[async_trait]
pub trait AttemptApi: Send + Sync {
    /// Creates a new attempt or resumes the caller's in-progress one.
    async fn start(&self, quiz_id: &str) -> Result<Attempt, ApiError>;

    /// Upserts the full answer snapshot.
    async fn save(&self, attempt_id: &str, answers: &[AnswerPayload]) -> Result<(), ApiError>;

    async fn submit(
        &self,
        attempt_id: &str,
        answers: &[AnswerPayload],
        idempotency_key: &str,
    ) -> Result<SubmitResult, ApiError>;

    /// Practice mode only; stateless per call.
    async fn check_answer(
        &self,
        question_id: &str,
        selected_answer_ids: &[String],
    ) -> Result<PracticeFeedback, ApiError>;
}

/// `AttemptApi` over the LMS REST endpoints.
#[derive(Debug, Clone)]
pub struct HttpAttemptApi {
    http_client: Client,
    base_url: Url,
    auth_token: Option<String>,
    timeout: Duration,
}

impl HttpAttemptApi {
    pub fn new(base_url: &str, auth_token: Option<String>, timeout: Duration) -> Result<Self, ApiError> {
        let base_url = Url::parse(base_url)?;
        if base_url.cannot_be_a_base() {
            return Err(ApiError::InvalidBaseUrl(base_url.to_string()));
        }

        Ok(Self {
            http_client: Client::new(),
            base_url,
            auth_token,
            timeout,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidBaseUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request.timeout(self.timeout);
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn ensure_success(response: Response) -> Result<Response, ApiError> {
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        Err(ApiError::Status { status, body })
    }

    async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl AttemptApi for HttpAttemptApi {
    async fn start(&self, quiz_id: &str) -> Result<Attempt, ApiError> {
        let url = self.endpoint(&["quizzes", quiz_id, "attempts"])?;
        tracing::debug!("Starting attempt: POST {}", url);

        track_api_call("start", async {
            let response = self.authorize(self.http_client.post(url)).send().await?;
            Self::read_json(response).await
        })
        .await
    }

    async fn save(&self, attempt_id: &str, answers: &[AnswerPayload]) -> Result<(), ApiError> {
        let url = self.endpoint(&["attempts", attempt_id, "answers"])?;
        let body = AnswersRequest {
            answers: answers.to_vec(),
        };
        tracing::debug!(
            "Saving {} answers for attempt {}",
            body.answers.len(),
            attempt_id
        );

        track_api_call("save", async {
            let response = self
                .authorize(self.http_client.put(url))
                .json(&body)
                .send()
                .await?;
            Self::ensure_success(response).await?;
            Ok::<(), ApiError>(())
        })
        .await
    }

    async fn submit(
        &self,
        attempt_id: &str,
        answers: &[AnswerPayload],
        idempotency_key: &str,
    ) -> Result<SubmitResult, ApiError> {
        let url = self.endpoint(&["attempts", attempt_id, "submit"])?;
        let body = AnswersRequest {
            answers: answers.to_vec(),
        };
        tracing::info!(
            "Submitting attempt {} with {} answers",
            attempt_id,
            body.answers.len()
        );

        track_api_call("submit", async {
            let response = self
                .authorize(self.http_client.post(url))
                .header(IDEMPOTENCY_KEY_HEADER, idempotency_key)
                .json(&body)
                .send()
                .await?;
            Self::read_json(response).await
        })
        .await
    }

    async fn check_answer(
        &self,
        question_id: &str,
        selected_answer_ids: &[String],
    ) -> Result<PracticeFeedback, ApiError> {
        let url = self.endpoint(&["questions", question_id, "check"])?;
        let body = CheckAnswerRequest {
            selected_answer_ids: selected_answer_ids.to_vec(),
        };

        track_api_call("check_answer", async {
            let response = self
                .authorize(self.http_client.post(url))
                .json(&body)
                .send()
                .await?;
            Self::read_json(response).await
        })
        .await
    }
}
