use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

enum Envelope<E> {
    Event(E),
    Flush(oneshot::Sender<()>),
}

/// Non-blocking fan-out of notifications to a background task.
///
/// `dispatch` never waits: when the queue is full the event is dropped and
/// counted. A slow or panicking handler therefore cannot delay the caller.
pub struct Dispatcher<E> {
    name: &'static str,
    tx: mpsc::Sender<Envelope<E>>,
    dropped: Arc<AtomicU64>,
}

impl<E: Send + 'static> Dispatcher<E> {
    /// Spawn the delivery task. Must be called inside a tokio runtime.
    pub fn spawn<F>(name: &'static str, capacity: usize, mut handler: F) -> Self
    where
        F: FnMut(E) + Send + 'static,
    {
        let (tx, mut rx) = mpsc::channel::<Envelope<E>>(capacity.max(1));

        tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                match envelope {
                    Envelope::Event(event) => handler(event),
                    Envelope::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
            debug!(dispatcher = name, "Notification channel closed");
        });

        Self {
            name,
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn dispatch(&self, event: E) {
        match self.tx.try_send(Envelope::Event(event)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    dispatcher = self.name,
                    dropped, "Notification queue full, dropping event"
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(dispatcher = self.name, "Notification task gone, dropping event");
            }
        }
    }

    /// Wait until every event dispatched before this call has been handled.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Envelope::Flush(done_tx)).await.is_err() {
            return;
        }
        let _ = done_rx.await;
    }

    /// Events dropped because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
