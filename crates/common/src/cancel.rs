use tokio::sync::watch;
use tokio::time::Instant;

/// Caller-side switch that aborts in-flight work holding the paired
/// [`CancelSignal`].
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Cooperative cancellation: fires when the handle is cancelled or the
/// optional deadline passes, whichever comes first.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
    deadline: Option<Instant>,
}

pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (
        CancelHandle { tx },
        CancelSignal { rx, deadline: None },
    )
}

impl CancelSignal {
    /// A signal that only fires on its deadline, if one is added.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx, deadline: None }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Resolves once the signal fires. Pending forever if it never does.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        let flag = async move {
            loop {
                if *rx.borrow() {
                    return;
                }
                if rx.changed().await.is_err() {
                    // Handle dropped without cancelling.
                    std::future::pending::<()>().await;
                }
            }
        };
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = flag => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => flag.await,
        }
    }
}
