//! Real-time notifications over STOMP-on-WebSocket.

pub mod frame;
pub mod stomp;

use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::Stream;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::NotificationError;

pub use frame::{Command, Frame, FrameDecoder, FrameError};
pub use stomp::{negotiate_heartbeat, ConnectionState, Heartbeat, StompConnectionManager, StompSettings};

/// Topic-based publish/subscribe over a persistent connection.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Subscribes to `topic`; survives reconnects until the handle is dropped.
    async fn subscribe(&self, topic: &str) -> Result<Subscription, NotificationError>;

    async fn publish(&self, topic: &str, payload: &Value) -> Result<(), NotificationError>;
}

#[derive(Debug)]
pub(crate) enum Request {
    Subscribe {
        id: String,
        topic: String,
        deliver: mpsc::UnboundedSender<Value>,
    },
    Unsubscribe {
        id: String,
    },
    Publish {
        destination: String,
        body: String,
        reply: tokio::sync::oneshot::Sender<Result<(), NotificationError>>,
    },
    Shutdown,
}

/// Live topic subscription. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    id: String,
    topic: String,
    messages: mpsc::UnboundedReceiver<Value>,
    requests: mpsc::UnboundedSender<Request>,
}

impl Subscription {
    pub(crate) fn new(
        id: String,
        topic: String,
        messages: mpsc::UnboundedReceiver<Value>,
        requests: mpsc::UnboundedSender<Request>,
    ) -> Self {
        Self {
            id,
            topic,
            messages,
            requests,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Next JSON payload; `None` once the channel is closed.
    pub async fn recv(&mut self) -> Option<Value> {
        self.messages.recv().await
    }
}

impl Stream for Subscription {
    type Item = Value;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Value>> {
        self.get_mut().messages.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let _ = self.requests.send(Request::Unsubscribe {
            id: self.id.clone(),
        });
    }
}
