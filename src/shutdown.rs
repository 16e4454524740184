//! Cancellation plumbing for long-running validation and consume loops.
//!
//! A `CancelHandle`/`CancelSignal` pair over a watch channel: the scheduler
//! owns the handle, the spawned run clones the signal and checks it between
//! pages and inside sleeps.

use tokio::sync::watch;

/// Create a linked handle/signal pair.
pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelSignal { rx })
}

/// Owner side. Dropping the handle also cancels the signal.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_canceled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Clonable side handed to spawned tasks.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    pub fn is_canceled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve when the handle cancels or is dropped.
    pub async fn canceled(&mut self) {
        // wait_for errs when the sender is gone; that counts as canceled
        let _ = self.rx.wait_for(|canceled| *canceled).await;
    }
}
