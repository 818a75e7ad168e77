#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, TimeZone, Utc};
use lms_attempt_client::{
    error::ApiError,
    models::{
        AnswerOption, AnswerPayload, AnswersRequest, Attempt, AttemptStatus, AttemptType,
        CheckAnswerRequest, PracticeFeedback, Question, QuestionType, SubmitResult,
    },
    services::{
        attempt_api::{AttemptApi, IDEMPOTENCY_KEY_HEADER},
        notifications::{Command, Frame, FrameDecoder},
    },
};
use serde_json::{json, Value};
use tokio::sync::broadcast;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Attempt start time used across the scenario tests.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 19, 9, 0, 0).unwrap()
}

pub fn question(id: &str, question_type: QuestionType, options: &[&str]) -> Question {
    Question {
        id: id.to_string(),
        content: format!("Question {}", id),
        question_type,
        answers: options
            .iter()
            .map(|o| AnswerOption {
                id: o.to_string(),
                content: format!("Option {}", o),
            })
            .collect(),
        selected_answer_ids: Vec::new(),
    }
}

pub fn attempt(
    id: &str,
    attempt_type: AttemptType,
    duration_minutes: Option<u32>,
    questions: Vec<Question>,
) -> Attempt {
    Attempt {
        id: id.to_string(),
        quiz_id: "quiz-1".to_string(),
        quiz_title: "Borrow checker basics".to_string(),
        attempt_type,
        status: AttemptStatus::InProgress,
        started_at: Some(t0()),
        duration_minutes,
        questions,
    }
}

/// Q1 single choice {A,B}, Q2 multiple choice {X,Y,Z}, Q3 true/false {T,F}.
pub fn standard_questions() -> Vec<Question> {
    vec![
        question("Q1", QuestionType::SingleChoice, &["A", "B"]),
        question("Q2", QuestionType::MultipleChoice, &["X", "Y", "Z"]),
        question("Q3", QuestionType::TrueFalse, &["T", "F"]),
    ]
}

pub fn graded_attempt(duration_minutes: u32) -> Attempt {
    attempt(
        "att-graded",
        AttemptType::Graded,
        Some(duration_minutes),
        standard_questions(),
    )
}

pub fn practice_attempt() -> Attempt {
    attempt(
        "att-practice",
        AttemptType::Practice,
        Some(30),
        standard_questions(),
    )
}

pub fn selection(payload: &[AnswerPayload], question_id: &str) -> Vec<String> {
    payload
        .iter()
        .find(|a| a.question_id == question_id)
        .map(|a| a.selected_answer_ids.clone())
        .unwrap_or_default()
}

#[derive(Debug, Clone)]
pub struct SubmitCall {
    pub attempt_id: String,
    pub answers: Vec<AnswerPayload>,
    pub idempotency_key: String,
}

#[derive(Default)]
struct FakeState {
    attempt: Option<Attempt>,
    start_calls: usize,
    start_failures: usize,
    saves: Vec<Vec<AnswerPayload>>,
    save_failures: usize,
    submits: Vec<SubmitCall>,
    submit_failures: usize,
    submit_delay: Duration,
    checks: Vec<(String, Vec<String>)>,
    check_failures: usize,
    correct_answers: HashMap<String, Vec<String>>,
}

/// In-memory `AttemptApi` that records every call.
#[derive(Default)]
pub struct FakeAttemptApi {
    state: Mutex<FakeState>,
}

fn unavailable() -> ApiError {
    ApiError::Status {
        status: 503,
        body: "service unavailable".to_string(),
    }
}

impl FakeAttemptApi {
    pub fn new(attempt: Attempt) -> Arc<Self> {
        let api = Self::default();
        api.state.lock().unwrap().attempt = Some(attempt);
        Arc::new(api)
    }

    /// No attempt to hand out: `start` answers 404.
    pub fn without_attempt() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_next_starts(&self, count: usize) {
        self.state.lock().unwrap().start_failures = count;
    }

    pub fn fail_next_saves(&self, count: usize) {
        self.state.lock().unwrap().save_failures = count;
    }

    pub fn fail_next_submits(&self, count: usize) {
        self.state.lock().unwrap().submit_failures = count;
    }

    pub fn fail_next_checks(&self, count: usize) {
        self.state.lock().unwrap().check_failures = count;
    }

    pub fn set_submit_delay(&self, delay: Duration) {
        self.state.lock().unwrap().submit_delay = delay;
    }

    pub fn set_correct(&self, question_id: &str, answer_ids: &[&str]) {
        self.state.lock().unwrap().correct_answers.insert(
            question_id.to_string(),
            answer_ids.iter().map(|s| s.to_string()).collect(),
        );
    }

    pub fn start_calls(&self) -> usize {
        self.state.lock().unwrap().start_calls
    }

    pub fn saves(&self) -> Vec<Vec<AnswerPayload>> {
        self.state.lock().unwrap().saves.clone()
    }

    pub fn submits(&self) -> Vec<SubmitCall> {
        self.state.lock().unwrap().submits.clone()
    }

    pub fn checks(&self) -> Vec<(String, Vec<String>)> {
        self.state.lock().unwrap().checks.clone()
    }
}

#[async_trait]
impl AttemptApi for FakeAttemptApi {
    async fn start(&self, _quiz_id: &str) -> Result<Attempt, ApiError> {
        let mut state = self.state.lock().unwrap();
        state.start_calls += 1;
        if state.start_failures > 0 {
            state.start_failures -= 1;
            return Err(unavailable());
        }
        state.attempt.clone().ok_or(ApiError::Status {
            status: 404,
            body: "quiz not found".to_string(),
        })
    }

    async fn save(&self, _attempt_id: &str, answers: &[AnswerPayload]) -> Result<(), ApiError> {
        let mut state = self.state.lock().unwrap();
        state.saves.push(answers.to_vec());
        if state.save_failures > 0 {
            state.save_failures -= 1;
            return Err(unavailable());
        }
        Ok(())
    }

    async fn submit(
        &self,
        attempt_id: &str,
        answers: &[AnswerPayload],
        idempotency_key: &str,
    ) -> Result<SubmitResult, ApiError> {
        let (delay, fail) = {
            let mut state = self.state.lock().unwrap();
            state.submits.push(SubmitCall {
                attempt_id: attempt_id.to_string(),
                answers: answers.to_vec(),
                idempotency_key: idempotency_key.to_string(),
            });
            let fail = state.submit_failures > 0;
            if fail {
                state.submit_failures -= 1;
            }
            (state.submit_delay, fail)
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if fail {
            return Err(unavailable());
        }

        let answered = answers
            .iter()
            .filter(|a| !a.selected_answer_ids.is_empty())
            .count();
        Ok(SubmitResult {
            attempt_id: attempt_id.to_string(),
            status: AttemptStatus::Submitted,
            score: Some(answered as f64),
            max_score: Some(answers.len() as f64),
            passed: None,
        })
    }

    async fn check_answer(
        &self,
        question_id: &str,
        selected_answer_ids: &[String],
    ) -> Result<PracticeFeedback, ApiError> {
        let mut state = self.state.lock().unwrap();
        state
            .checks
            .push((question_id.to_string(), selected_answer_ids.to_vec()));
        if state.check_failures > 0 {
            state.check_failures -= 1;
            return Err(unavailable());
        }

        let correct = state
            .correct_answers
            .get(question_id)
            .cloned()
            .unwrap_or_default();
        Ok(PracticeFeedback {
            correct: correct == selected_answer_ids,
            explanation: Some(format!("Explanation for {}", question_id)),
            correct_answer_ids: correct,
        })
    }
}

// --- Fake LMS REST server -------------------------------------------------

#[derive(Debug, Default)]
pub struct LmsRecord {
    pub authorization: Vec<Option<String>>,
    pub saved: Vec<(String, Vec<AnswerPayload>)>,
    pub submitted: Vec<(String, Option<String>)>,
    pub checked: Vec<(String, Vec<String>)>,
}

pub type SharedRecord = Arc<Mutex<LmsRecord>>;

pub struct FakeLms {
    pub base_url: String,
    pub record: SharedRecord,
}

pub async fn spawn_fake_lms() -> FakeLms {
    let record = SharedRecord::default();
    let app = Router::new()
        .route("/api/quizzes/{quiz_id}/attempts", post(lms_start))
        .route("/api/attempts/{attempt_id}/answers", put(lms_save))
        .route("/api/attempts/{attempt_id}/submit", post(lms_submit))
        .route("/api/questions/{question_id}/check", post(lms_check))
        .with_state(record.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    FakeLms {
        base_url: format!("http://{}/api", addr),
        record,
    }
}

fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

async fn lms_start(
    State(record): State<SharedRecord>,
    Path(quiz_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    record.lock().unwrap().authorization.push(bearer(&headers));
    if quiz_id == "missing" {
        return (StatusCode::NOT_FOUND, "quiz not found").into_response();
    }

    Json(json!({
        "id": format!("att-{}", quiz_id),
        "quizId": quiz_id,
        "quizTitle": "Lifetimes",
        "type": "GRADED",
        "status": "IN_PROGRESS",
        "startedAt": "2026-10-19T09:00:00Z",
        "durationMinutes": 20,
        "questions": [{
            "id": "Q1",
            "content": "Pick one",
            "type": "SINGLE_CHOICE",
            "answers": [{"id": "A", "content": "a"}, {"id": "B", "content": "b"}],
            "selectedAnswerIds": ["B"]
        }]
    }))
    .into_response()
}

async fn lms_save(
    State(record): State<SharedRecord>,
    Path(attempt_id): Path<String>,
    Json(body): Json<AnswersRequest>,
) -> StatusCode {
    record.lock().unwrap().saved.push((attempt_id, body.answers));
    StatusCode::NO_CONTENT
}

async fn lms_submit(
    State(record): State<SharedRecord>,
    Path(attempt_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<AnswersRequest>,
) -> Response {
    let key = headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    record
        .lock()
        .unwrap()
        .submitted
        .push((attempt_id.clone(), key));

    if attempt_id == "broken" {
        return (StatusCode::INTERNAL_SERVER_ERROR, "grading backend down").into_response();
    }

    Json(json!({
        "attemptId": attempt_id,
        "status": "PASSED",
        "score": body.answers.len(),
        "maxScore": 10,
        "passed": true
    }))
    .into_response()
}

async fn lms_check(
    State(record): State<SharedRecord>,
    Path(question_id): Path<String>,
    Json(body): Json<CheckAnswerRequest>,
) -> Json<Value> {
    record
        .lock()
        .unwrap()
        .checked
        .push((question_id, body.selected_answer_ids.clone()));

    Json(json!({
        "correct": body.selected_answer_ids == ["B"],
        "explanation": "B is the owner",
        "correctAnswerIds": ["B"]
    }))
}

// --- Fake STOMP broker ----------------------------------------------------

struct BrokerInner {
    connections: AtomicUsize,
    subscribes: Mutex<Vec<String>>,
    unsubscribes: AtomicUsize,
    disconnects: AtomicUsize,
    kick: broadcast::Sender<()>,
    push: broadcast::Sender<(String, String)>,
}

/// Minimal STOMP 1.2 broker: answers CONNECT, tracks subscriptions, echoes
/// SEND frames to matching subscriptions and can drop every connection.
#[derive(Clone)]
pub struct FakeBroker {
    inner: Arc<BrokerInner>,
}

impl FakeBroker {
    pub fn connections(&self) -> usize {
        self.inner.connections.load(Ordering::SeqCst)
    }

    pub fn subscribes(&self) -> Vec<String> {
        self.inner.subscribes.lock().unwrap().clone()
    }

    pub fn unsubscribes(&self) -> usize {
        self.inner.unsubscribes.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.inner.disconnects.load(Ordering::SeqCst)
    }

    /// Closes every live connection from the broker side.
    pub fn kick_all(&self) {
        let _ = self.inner.kick.send(());
    }

    /// Sends a MESSAGE to every subscription on `destination`.
    pub fn push(&self, destination: &str, body: &str) {
        let _ = self
            .inner
            .push
            .send((destination.to_string(), body.to_string()));
    }
}

pub async fn spawn_fake_broker() -> (String, FakeBroker) {
    let (kick, _) = broadcast::channel(8);
    let (push, _) = broadcast::channel(64);
    let broker = FakeBroker {
        inner: Arc::new(BrokerInner {
            connections: AtomicUsize::new(0),
            subscribes: Mutex::new(Vec::new()),
            unsubscribes: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            kick,
            push,
        }),
    };

    let app = Router::new()
        .route("/ws", get(broker_upgrade))
        .with_state(broker.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("ws://{}/ws", addr), broker)
}

async fn broker_upgrade(State(broker): State<FakeBroker>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| broker_session(socket, broker))
}

async fn send_frame(socket: &mut WebSocket, frame: Frame) -> bool {
    socket
        .send(Message::Text(frame.encode().into()))
        .await
        .is_ok()
}

async fn deliver(
    socket: &mut WebSocket,
    subscriptions: &[(String, String)],
    destination: &str,
    body: &str,
) {
    for (id, topic) in subscriptions {
        if topic == destination {
            let frame = Frame::new(Command::Message)
                .header("subscription", id.clone())
                .header("destination", destination)
                .header("message-id", uuid::Uuid::new_v4().to_string())
                .with_body(body);
            send_frame(socket, frame).await;
        }
    }
}

async fn broker_session(mut socket: WebSocket, broker: FakeBroker) {
    let inner = broker.inner.clone();
    inner.connections.fetch_add(1, Ordering::SeqCst);

    let mut kick = inner.kick.subscribe();
    let mut push = inner.push.subscribe();
    let mut subscriptions: Vec<(String, String)> = Vec::new();
    let mut decoder = FrameDecoder::default();

    loop {
        tokio::select! {
            _ = kick.recv() => {
                let _ = socket.send(Message::Close(None)).await;
                return;
            }
            pushed = push.recv() => {
                if let Ok((destination, body)) = pushed {
                    deliver(&mut socket, &subscriptions, &destination, &body).await;
                }
            }
            incoming = socket.recv() => {
                let Some(Ok(message)) = incoming else {
                    return;
                };
                let Message::Text(text) = message else {
                    continue;
                };
                let Ok(frames) = decoder.push(text.as_str()) else {
                    return;
                };

                for frame in frames {
                    match frame.command {
                        Command::Connect | Command::Stomp => {
                            let connected = Frame::new(Command::Connected)
                                .header("version", "1.2")
                                .header("heart-beat", "0,0");
                            send_frame(&mut socket, connected).await;
                        }
                        Command::Subscribe => {
                            let id = frame.get("id").unwrap_or_default().to_string();
                            let destination = frame.get("destination").unwrap_or_default().to_string();
                            inner.subscribes.lock().unwrap().push(destination.clone());
                            subscriptions.push((id, destination));
                        }
                        Command::Unsubscribe => {
                            let id = frame.get("id").unwrap_or_default();
                            subscriptions.retain(|(sub_id, _)| sub_id != id);
                            inner.unsubscribes.fetch_add(1, Ordering::SeqCst);
                        }
                        Command::Send => {
                            let destination = frame.get("destination").unwrap_or_default().to_string();
                            deliver(&mut socket, &subscriptions, &destination, &frame.body).await;
                        }
                        Command::Disconnect => {
                            inner.disconnects.fetch_add(1, Ordering::SeqCst);
                            if let Some(receipt) = frame.get("receipt") {
                                let frame = Frame::new(Command::Receipt).header("receipt-id", receipt);
                                send_frame(&mut socket, frame).await;
                            }
                            return;
                        }
                        _ => {}
                    }
                }
            }
        }
    }
}

/// Polls `condition` until it holds or `timeout` elapses.
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
