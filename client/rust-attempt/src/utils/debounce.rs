use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};

#[derive(Debug, Clone, Copy)]
enum Signal {
    Restart,
    Arm,
}

/// Trailing debounce: runs `action` once the signals have been quiet for `delay`.
///
/// The action runs on a dedicated worker task, so at most one invocation is in
/// flight. Signals received while it runs open a new window afterwards.
pub struct Debouncer {
    signals: mpsc::UnboundedSender<Signal>,
    worker: JoinHandle<()>,
    delay: Duration,
}

impl Debouncer {
    pub fn spawn<F, Fut>(delay: Duration, action: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (signals, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_worker(delay, rx, action));

        Self {
            signals,
            worker,
            delay,
        }
    }

    /// Starts the quiet window, or restarts it if one is already pending.
    pub fn trigger(&self) {
        let _ = self.signals.send(Signal::Restart);
    }

    /// Starts the quiet window only if none is pending.
    pub fn arm(&self) {
        let _ = self.signals.send(Signal::Arm);
    }

    /// Stops the worker; a pending window is discarded.
    pub fn cancel(&self) {
        self.worker.abort();
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

async fn run_worker<F, Fut>(delay: Duration, mut rx: mpsc::UnboundedReceiver<Signal>, action: F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = ()>,
{
    while rx.recv().await.is_some() {
        let deadline = sleep(delay);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline => break,
                signal = rx.recv() => match signal {
                    Some(Signal::Restart) => deadline.as_mut().reset(Instant::now() + delay),
                    Some(Signal::Arm) => {}
                    None => return,
                },
            }
        }

        action().await;
    }
}
