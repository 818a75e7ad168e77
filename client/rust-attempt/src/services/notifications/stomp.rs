use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Sink, SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::{self, Message};
use url::Url;
use uuid::Uuid;

use super::frame::{Command, Frame, FrameDecoder};
use super::{NotificationChannel, Request, Subscription};
use crate::error::NotificationError;
use crate::metrics::{NOTIFICATION_FRAMES_TOTAL, NOTIFICATION_RECONNECTS_TOTAL};
use crate::utils::retry::{backoff_delay, RetryConfig};

#[derive(Debug, Clone)]
pub struct StompSettings {
    pub url: String,
    /// Virtual host; defaults to the URL host.
    pub host: Option<String>,
    pub login: Option<String>,
    pub passcode: Option<String>,
    pub heartbeat_outgoing: Duration,
    pub heartbeat_incoming: Duration,
    pub connect_timeout: Duration,
    pub reconnect: RetryConfig,
}

impl Default for StompSettings {
    fn default() -> Self {
        Self {
            url: "ws://localhost:8080/ws".to_string(),
            host: None,
            login: None,
            passcode: None,
            heartbeat_outgoing: Duration::from_secs(10),
            heartbeat_incoming: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
            reconnect: RetryConfig::reconnect(Duration::from_secs(1), Duration::from_secs(30)),
        }
    }
}

impl StompSettings {
    fn virtual_host(&self) -> String {
        if let Some(host) = &self.host {
            return host.clone();
        }
        Url::parse(&self.url)
            .ok()
            .and_then(|url| url.host_str().map(str::to_owned))
            .unwrap_or_else(|| "/".to_string())
    }

    fn connect_frame(&self) -> Frame {
        let mut frame = Frame::new(Command::Connect)
            .header("accept-version", "1.2")
            .header("host", self.virtual_host())
            .header(
                "heart-beat",
                format!(
                    "{},{}",
                    self.heartbeat_outgoing.as_millis(),
                    self.heartbeat_incoming.as_millis()
                ),
            );
        if let Some(login) = &self.login {
            frame = frame.header("login", login.clone());
        }
        if let Some(passcode) = &self.passcode {
            frame = frame.header("passcode", passcode.clone());
        }
        frame
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    Connecting,
    Connected,
    Reconnecting,
}

/// Heart-beat intervals agreed with the broker; `None` disables a direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    pub outgoing: Option<Duration>,
    pub incoming: Option<Duration>,
}

/// Applies the STOMP 1.2 negotiation to the CONNECTED `heart-beat` header.
pub fn negotiate_heartbeat(
    client_outgoing: Duration,
    client_incoming: Duration,
    server_header: Option<&str>,
) -> Heartbeat {
    let (server_outgoing, server_incoming) = server_header
        .and_then(|value| value.split_once(','))
        .and_then(|(sx, sy)| Some((sx.trim().parse::<u64>().ok()?, sy.trim().parse::<u64>().ok()?)))
        .unwrap_or((0, 0));

    let pick = |client: Duration, server_ms: u64| {
        if client.is_zero() || server_ms == 0 {
            None
        } else {
            Some(client.max(Duration::from_millis(server_ms)))
        }
    };

    Heartbeat {
        outgoing: pick(client_outgoing, server_incoming),
        incoming: pick(client_incoming, server_outgoing),
    }
}

const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

struct Running {
    requests: mpsc::UnboundedSender<Request>,
    worker: JoinHandle<()>,
}

/// Owns one broker connection and reconnects it with backoff until closed.
///
/// Subscriptions are remembered by the worker and re-issued after every
/// reconnect, so callers keep a single `Subscription` for the whole session.
pub struct StompConnectionManager {
    settings: StompSettings,
    running: Mutex<Option<Running>>,
    state: Arc<watch::Sender<ConnectionState>>,
}

impl StompConnectionManager {
    pub fn new(settings: StompSettings) -> Self {
        let (state, _) = watch::channel(ConnectionState::Closed);
        Self {
            settings,
            running: Mutex::new(None),
            state: Arc::new(state),
        }
    }

    /// Starts the connection worker. Opening twice is a no-op.
    pub async fn open(&self) {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return;
        }

        self.state.send_replace(ConnectionState::Connecting);
        let (requests, inbox) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_connection(
            self.settings.clone(),
            inbox,
            self.state.clone(),
        ));
        tracing::info!(url = %self.settings.url, "Notification channel opening");

        *running = Some(Running { requests, worker });
    }

    /// Disconnects and stops reconnecting.
    pub async fn close(&self) {
        let running = self.running.lock().await.take();
        if let Some(mut running) = running {
            let _ = running.requests.send(Request::Shutdown);
            if tokio::time::timeout(CLOSE_TIMEOUT, &mut running.worker)
                .await
                .is_err()
            {
                // a worker stuck in connect must not report Connected later
                running.worker.abort();
                tracing::warn!("Notification worker did not stop in time, aborted");
            }
        }
        self.state.send_replace(ConnectionState::Closed);
        tracing::info!("Notification channel closed");
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub async fn wait_until_connected(&self, timeout: Duration) -> Result<(), NotificationError> {
        let mut state = self.state.subscribe();
        tokio::time::timeout(
            timeout,
            state.wait_for(|s| *s == ConnectionState::Connected),
        )
        .await
        .map_err(|_| NotificationError::ConnectTimeout)?
        .map_err(|_| NotificationError::Disconnected)?;
        Ok(())
    }

    /// Subscribes and feeds every payload to `callback` on a background task.
    pub async fn subscribe_with<F>(
        &self,
        topic: &str,
        mut callback: F,
    ) -> Result<JoinHandle<()>, NotificationError>
    where
        F: FnMut(Value) + Send + 'static,
    {
        let mut subscription = self.subscribe(topic).await?;
        Ok(tokio::spawn(async move {
            while let Some(payload) = subscription.recv().await {
                callback(payload);
            }
        }))
    }

    async fn requests(&self) -> Result<mpsc::UnboundedSender<Request>, NotificationError> {
        self.running
            .lock()
            .await
            .as_ref()
            .map(|running| running.requests.clone())
            .ok_or(NotificationError::NotOpen)
    }
}

impl Drop for StompConnectionManager {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            let _ = running.requests.send(Request::Shutdown);
        }
    }
}

#[async_trait]
impl NotificationChannel for StompConnectionManager {
    async fn subscribe(&self, topic: &str) -> Result<Subscription, NotificationError> {
        let requests = self.requests().await?;
        let (deliver, messages) = mpsc::unbounded_channel();
        let id = format!("sub-{}", Uuid::new_v4());

        requests
            .send(Request::Subscribe {
                id: id.clone(),
                topic: topic.to_string(),
                deliver,
            })
            .map_err(|_| NotificationError::NotOpen)?;

        tracing::debug!(topic, subscription = %id, "Subscribed");
        Ok(Subscription::new(id, topic.to_string(), messages, requests))
    }

    async fn publish(&self, topic: &str, payload: &Value) -> Result<(), NotificationError> {
        let requests = self.requests().await?;
        let body = serde_json::to_string(payload)?;
        let (reply, outcome) = oneshot::channel();

        requests
            .send(Request::Publish {
                destination: topic.to_string(),
                body,
                reply,
            })
            .map_err(|_| NotificationError::NotOpen)?;

        outcome.await.map_err(|_| NotificationError::Disconnected)?
    }
}

struct SubscriptionEntry {
    topic: String,
    deliver: mpsc::UnboundedSender<Value>,
}

type Subscriptions = HashMap<String, SubscriptionEntry>;

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

enum SessionEnd {
    Shutdown,
    Lost(String),
}

async fn run_connection(
    settings: StompSettings,
    mut requests: mpsc::UnboundedReceiver<Request>,
    state: Arc<watch::Sender<ConnectionState>>,
) {
    let mut subscriptions = Subscriptions::new();
    let mut failures: u32 = 0;

    loop {
        match connect(&settings).await {
            Ok((ws, heartbeat, decoder)) => {
                failures = 0;
                state.send_replace(ConnectionState::Connected);
                tracing::info!(
                    url = %settings.url,
                    outgoing_ms = heartbeat.outgoing.map(|d| d.as_millis() as u64),
                    incoming_ms = heartbeat.incoming.map(|d| d.as_millis() as u64),
                    "Notification channel connected"
                );

                match serve(ws, heartbeat, decoder, &mut requests, &mut subscriptions).await {
                    SessionEnd::Shutdown => {
                        state.send_replace(ConnectionState::Closed);
                        return;
                    }
                    SessionEnd::Lost(reason) => {
                        tracing::warn!(reason = %reason, "Notification connection lost");
                    }
                }
            }
            Err(e) => {
                tracing::warn!(url = %settings.url, error = %e, "Notification connect failed");
            }
        }

        state.send_replace(ConnectionState::Reconnecting);
        let delay = backoff_delay(&settings.reconnect, failures);
        failures = failures.saturating_add(1);
        NOTIFICATION_RECONNECTS_TOTAL.inc();
        tracing::info!(delay_ms = delay.as_millis() as u64, "Reconnecting notification channel");

        if !wait_before_reconnect(delay, &mut requests, &mut subscriptions).await {
            state.send_replace(ConnectionState::Closed);
            return;
        }
    }
}

/// Keeps serving requests while disconnected. Returns `false` on shutdown.
async fn wait_before_reconnect(
    delay: Duration,
    requests: &mut mpsc::UnboundedReceiver<Request>,
    subscriptions: &mut Subscriptions,
) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            _ = &mut sleep => return true,
            request = requests.recv() => match request {
                None | Some(Request::Shutdown) => return false,
                Some(Request::Subscribe { id, topic, deliver }) => {
                    subscriptions.insert(id, SubscriptionEntry { topic, deliver });
                }
                Some(Request::Unsubscribe { id }) => {
                    subscriptions.remove(&id);
                }
                Some(Request::Publish { reply, .. }) => {
                    let _ = reply.send(Err(NotificationError::Disconnected));
                }
            },
        }
    }
}

async fn connect(
    settings: &StompSettings,
) -> Result<(WsStream, Heartbeat, FrameDecoder), NotificationError> {
    let (mut ws, _) = tokio::time::timeout(
        settings.connect_timeout,
        tokio_tungstenite::connect_async(settings.url.as_str()),
    )
    .await
    .map_err(|_| NotificationError::ConnectTimeout)??;

    send_frame(&mut ws, &settings.connect_frame()).await?;

    let mut decoder = FrameDecoder::default();
    let connected = tokio::time::timeout(
        settings.connect_timeout,
        await_connected(&mut ws, &mut decoder),
    )
    .await
    .map_err(|_| NotificationError::ConnectTimeout)??;

    let heartbeat = negotiate_heartbeat(
        settings.heartbeat_outgoing,
        settings.heartbeat_incoming,
        connected.get("heart-beat"),
    );
    Ok((ws, heartbeat, decoder))
}

async fn await_connected(
    ws: &mut WsStream,
    decoder: &mut FrameDecoder,
) -> Result<Frame, NotificationError> {
    loop {
        let message = match ws.next().await {
            Some(message) => message?,
            None => return Err(NotificationError::Closed),
        };
        let Some(text) = message_text(&message) else {
            continue;
        };
        for frame in decoder.push(&text)? {
            match frame.command {
                Command::Connected => return Ok(frame),
                Command::Error => {
                    let reason = frame.get("message").unwrap_or(&frame.body).to_string();
                    return Err(NotificationError::Rejected(reason));
                }
                _ => {}
            }
        }
    }
}

async fn serve(
    ws: WsStream,
    heartbeat: Heartbeat,
    mut decoder: FrameDecoder,
    requests: &mut mpsc::UnboundedReceiver<Request>,
    subscriptions: &mut Subscriptions,
) -> SessionEnd {
    let (mut sink, mut stream) = ws.split();

    for (id, entry) in subscriptions.iter() {
        if let Err(e) = send_frame(&mut sink, &subscribe_frame(id, &entry.topic)).await {
            return SessionEnd::Lost(e.to_string());
        }
    }
    if !subscriptions.is_empty() {
        tracing::info!(count = subscriptions.len(), "Restored subscriptions");
    }

    let mut outgoing = heartbeat.outgoing.map(|period| {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });
    // Tolerate one missed beat before declaring the broker gone.
    let incoming_limit = heartbeat.incoming.map(|period| period * 2);
    let mut last_seen = Instant::now();

    loop {
        let deadline = incoming_limit.map(|limit| last_seen + limit);
        let silence = async move {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            message = stream.next() => {
                let message = match message {
                    Some(Ok(message)) => message,
                    Some(Err(e)) => return SessionEnd::Lost(e.to_string()),
                    None => return SessionEnd::Lost("stream ended".to_string()),
                };
                last_seen = Instant::now();

                if let Message::Close(_) = message {
                    return SessionEnd::Lost("closed by broker".to_string());
                }
                let Some(text) = message_text(&message) else {
                    continue;
                };
                let frames = match decoder.push(&text) {
                    Ok(frames) => frames,
                    Err(e) => return SessionEnd::Lost(e.to_string()),
                };
                for frame in frames {
                    if let Err(reason) = dispatch(frame, subscriptions) {
                        return SessionEnd::Lost(reason);
                    }
                }
            }
            request = requests.recv() => match request {
                None | Some(Request::Shutdown) => {
                    let disconnect = Frame::new(Command::Disconnect)
                        .header("receipt", format!("disconnect-{}", Uuid::new_v4()));
                    let _ = send_frame(&mut sink, &disconnect).await;
                    let _ = sink.close().await;
                    return SessionEnd::Shutdown;
                }
                Some(Request::Subscribe { id, topic, deliver }) => {
                    let frame = subscribe_frame(&id, &topic);
                    subscriptions.insert(id, SubscriptionEntry { topic, deliver });
                    if let Err(e) = send_frame(&mut sink, &frame).await {
                        return SessionEnd::Lost(e.to_string());
                    }
                }
                Some(Request::Unsubscribe { id }) => {
                    if subscriptions.remove(&id).is_some() {
                        let frame = Frame::new(Command::Unsubscribe).header("id", id);
                        if let Err(e) = send_frame(&mut sink, &frame).await {
                            return SessionEnd::Lost(e.to_string());
                        }
                    }
                }
                Some(Request::Publish { destination, body, reply }) => {
                    let frame = Frame::new(Command::Send)
                        .header("destination", destination)
                        .header("content-type", "application/json")
                        .with_body(body);
                    match send_frame(&mut sink, &frame).await {
                        Ok(()) => {
                            let _ = reply.send(Ok(()));
                        }
                        Err(e) => {
                            let _ = reply.send(Err(NotificationError::Disconnected));
                            return SessionEnd::Lost(e.to_string());
                        }
                    }
                }
            },
            _ = next_tick(&mut outgoing) => {
                if let Err(e) = sink.send(Message::Text("\n".into())).await {
                    return SessionEnd::Lost(format!("heart-beat send failed: {e}"));
                }
            }
            _ = silence => return SessionEnd::Lost("heart-beat timeout".to_string()),
        }
    }
}

/// Routes an inbound frame. `Err` carries the reason to drop the connection.
fn dispatch(frame: Frame, subscriptions: &Subscriptions) -> Result<(), String> {
    NOTIFICATION_FRAMES_TOTAL
        .with_label_values(&[frame.command.as_str()])
        .inc();

    match frame.command {
        Command::Message => {
            let Some(entry) = frame
                .get("subscription")
                .and_then(|id| subscriptions.get(id))
            else {
                tracing::debug!(
                    destination = frame.get("destination"),
                    "Message for unknown subscription dropped"
                );
                return Ok(());
            };

            match serde_json::from_str::<Value>(&frame.body) {
                Ok(payload) => {
                    let _ = entry.deliver.send(payload);
                }
                Err(e) => {
                    tracing::warn!(
                        topic = %entry.topic,
                        error = %e,
                        "Skipping non-JSON notification body"
                    );
                }
            }
            Ok(())
        }
        Command::Error => Err(frame
            .get("message")
            .map(str::to_owned)
            .unwrap_or_else(|| frame.body.clone())),
        Command::Receipt => {
            tracing::debug!(receipt = frame.get("receipt-id"), "Receipt");
            Ok(())
        }
        other => {
            tracing::debug!(command = other.as_str(), "Ignoring frame");
            Ok(())
        }
    }
}

fn subscribe_frame(id: &str, topic: &str) -> Frame {
    Frame::new(Command::Subscribe)
        .header("id", id)
        .header("destination", topic)
        .header("ack", "auto")
}

fn message_text(message: &Message) -> Option<String> {
    match message {
        Message::Text(text) => Some(text.as_str().to_owned()),
        Message::Binary(bytes) => String::from_utf8(bytes.to_vec()).ok(),
        _ => None,
    }
}

async fn send_frame<S>(sink: &mut S, frame: &Frame) -> Result<(), tungstenite::Error>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    sink.send(Message::Text(frame.encode().into())).await
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
