// src/core/notifier/mod.rs

//! The notification dispatcher (spec §4.3): a bounded queue, a single
//! background worker, and two channels (webhook, SMTP). Mirrors the
//! teacher's single-consumer background-task convention (`core::tasks`).

mod channel;
mod smtp;
mod webhook;

pub use channel::NotifyChannel;
pub use smtp::SmtpChannel;
pub use webhook::WebhookChannel;

use crate::core::model::Severity;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

/// Status tag carried on a notification; `Unspecified` renders as `""` on
/// the wire, matching spec.md's `status ∈ {firing, resolved, test, ""}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationStatus {
    Firing,
    Resolved,
    Test,
    Unspecified,
}

impl NotificationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationStatus::Firing => "firing",
            NotificationStatus::Resolved => "resolved",
            NotificationStatus::Test => "test",
            NotificationStatus::Unspecified => "",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Notification {
    pub subject: String,
    pub body: String,
    pub severity: Severity,
    pub status: NotificationStatus,
}

#[derive(Debug, Clone)]
pub struct NotifierConfig {
    pub queue_capacity: usize,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        NotifierConfig { queue_capacity: 64 }
    }
}

enum Cmd {
    Send(Notification),
    Flush(oneshot::Sender<()>),
    Stop(oneshot::Sender<()>),
}

/// Retry schedule for a single channel delivery attempt: try up to 3 times,
/// backing off 0s, then 1s, then 3s between attempts.
const RETRY_BACKOFFS: [Duration; 2] = [Duration::from_secs(1), Duration::from_secs(3)];

pub struct Notifier {
    tx: mpsc::Sender<Cmd>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Notifier {
    pub fn new(config: NotifierConfig) -> Self {
        Self::with_channels(config, Vec::new())
    }

    pub fn with_channels(config: NotifierConfig, channels: Vec<Arc<dyn NotifyChannel>>) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let worker = tokio::spawn(Self::run(rx, channels));
        Notifier { tx, worker: Mutex::new(Some(worker)) }
    }

    /// Enqueues `notification` non-blockingly. On a full or closed queue the
    /// message is dropped with a warning, never blocking the caller (the
    /// alerter calls this while holding its own lock).
    pub fn send(&self, notification: Notification) {
        match self.tx.try_send(Cmd::Send(notification)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("notifier queue full, dropping notification");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::warn!("notifier worker stopped, dropping notification");
            }
        }
    }

    /// Blocks until every notification enqueued before this call has been
    /// fully processed. Used in tests.
    pub async fn flush(&self) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send(Cmd::Flush(reply_tx)).await.is_ok() {
            let _ = reply_rx.await;
        }
    }

    /// Idempotent: stops the worker and waits for it to drain, doing nothing
    /// on a second call.
    pub async fn stop(&self) {
        let mut guard = self.worker.lock().await;
        let Some(handle) = guard.take() else {
            return;
        };
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send(Cmd::Stop(reply_tx)).await.is_ok() {
            let _ = reply_rx.await;
        }
        let _ = handle.await;
    }

    async fn run(mut rx: mpsc::Receiver<Cmd>, channels: Vec<Arc<dyn NotifyChannel>>) {
        while let Some(cmd) = rx.recv().await {
            match cmd {
                Cmd::Send(notification) => Self::deliver(&channels, &notification).await,
                Cmd::Flush(reply) => {
                    let _ = reply.send(());
                }
                Cmd::Stop(reply) => {
                    let _ = reply.send(());
                    break;
                }
            }
        }
    }

    async fn deliver(channels: &[Arc<dyn NotifyChannel>], notification: &Notification) {
        for channel in channels {
            let mut attempt = 0usize;
            loop {
                match channel.send(notification).await {
                    Ok(()) => break,
                    Err(err) => {
                        if attempt >= RETRY_BACKOFFS.len() {
                            tracing::warn!(channel = channel.name(), error = %err, "notification delivery failed, giving up");
                            break;
                        }
                        tokio::time::sleep(RETRY_BACKOFFS[attempt]).await;
                        attempt += 1;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::AgentResult;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingChannel {
        count: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl NotifyChannel for CountingChannel {
        async fn send(&self, _notification: &Notification) -> AgentResult<()> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn name(&self) -> &str {
            "counting"
        }
    }

    #[tokio::test]
    async fn flush_waits_for_prior_sends_to_complete() {
        let count = Arc::new(AtomicUsize::new(0));
        let notifier = Notifier::with_channels(
            NotifierConfig::default(),
            vec![Arc::new(CountingChannel { count: count.clone() })],
        );
        for _ in 0..5 {
            notifier.send(Notification {
                subject: "s".to_string(),
                body: "b".to_string(),
                severity: Severity::Warning,
                status: NotificationStatus::Firing,
            });
        }
        notifier.flush().await;
        assert_eq!(count.load(Ordering::SeqCst), 5);
        notifier.stop().await;
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let notifier = Notifier::new(NotifierConfig::default());
        notifier.stop().await;
        notifier.stop().await;
    }
}
