//! Cancellation signals
//!
//! A [`CancelSource`] owns the right to cancel; any number of [`Cancellation`]
//! observers watch it. Observers of several sources can be joined into one
//! signal that fires as soon as any source does, which is how a handler sees
//! both scheduler shutdown and lease loss through a single value.
//!
//! Built on `tokio::sync::watch`. Dropping every handle of a source counts
//! as cancelling it.

use futures::future::select_all;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Owner side of a cancellation signal
#[derive(Debug, Clone)]
pub struct CancelSource {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelSource {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Cancels every observer; repeated calls are no-ops
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Creates an observer of this source
    pub fn signal(&self) -> Cancellation {
        Cancellation {
            signals: vec![self.tx.subscribe()],
        }
    }
}

impl Default for CancelSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Observer side of one or more cancellation sources
#[derive(Debug, Clone)]
pub struct Cancellation {
    signals: Vec<watch::Receiver<bool>>,
}

impl Cancellation {
    /// A signal that never fires
    pub fn never() -> Self {
        Self {
            signals: Vec::new(),
        }
    }

    /// Combines two signals; the result fires when either does
    pub fn join(&self, other: &Cancellation) -> Cancellation {
        let mut signals = self.signals.clone();
        signals.extend(other.signals.iter().cloned());
        Cancellation { signals }
    }

    pub fn is_cancelled(&self) -> bool {
        self.signals
            .iter()
            .any(|rx| *rx.borrow() || rx.has_changed().is_err())
    }

    /// Resolves once any watched source is cancelled or dropped
    pub async fn cancelled(&self) {
        if self.signals.is_empty() {
            return std::future::pending().await;
        }

        let waits = self.signals.iter().map(|rx| {
            let mut rx = rx.clone();
            Box::pin(async move {
                // Err means the source is gone, which also cancels
                let _ = rx.wait_for(|cancelled| *cancelled).await;
            }) as Pin<Box<dyn Future<Output = ()> + Send>>
        });
        select_all(waits).await;
    }

    /// Sleeps for `duration` unless cancelled first
    ///
    /// Returns `true` if the full duration elapsed, `false` on cancellation.
    pub async fn sleep(&self, duration: Duration) -> bool {
        if self.is_cancelled() {
            return false;
        }
        tokio::select! {
            _ = self.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::never()
    }
}
