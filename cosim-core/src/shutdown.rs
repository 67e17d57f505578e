use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

/// A handle used to end a session early.
/// Clones are connected: shutting down one shuts down all of them.
#[derive(Debug, Clone)]
pub struct Shutdown {
    /// Wakes everyone currently waiting.
    notify: broadcast::Sender<ExitStatus>,
    /// The first status sent, so waiters that arrive late still see it.
    status: Arc<Mutex<Option<ExitStatus>>>,
}

impl Shutdown {
    /// Creates a new active shutdown.
    pub fn new() -> Self {
        let (notify, _) = broadcast::channel(1);
        Self {
            notify,
            status: Arc::new(Mutex::new(None)),
        }
    }

    /// Sends `ExitStatus::Interrupted` to all `Shutdowns` cloned from this one.
    pub fn shut_down(&self) {
        self.shut_down_with_status(ExitStatus::Interrupted)
    }

    /// Sends `status` to all `Shutdowns` cloned from this one. Only the first
    /// status sticks.
    pub fn shut_down_with_status(&self, status: ExitStatus) {
        match self.status.lock() {
            Ok(mut current) => {
                if current.is_some() {
                    return;
                }
                *current = Some(status);
            }
            Err(e) => {
                tracing::error!("Failed to initiate shutdown: {}", e);
                return;
            }
        }
        // Nobody waiting is fine, the stored status covers later waiters
        let _ = self.notify.send(status);
    }

    /// The status sent so far, if any.
    pub fn status(&self) -> Option<ExitStatus> {
        self.status.lock().ok().and_then(|status| *status)
    }

    /// Waits to receive a shutdown status.
    pub async fn wait_for_shutdown(&self) -> ExitStatus {
        use tokio::sync::broadcast::error::RecvError;

        let mut recv = self.notify.subscribe();
        if let Some(status) = self.status() {
            return status;
        }
        loop {
            match recv.recv().await {
                Ok(status) => return status,
                Err(RecvError::Lagged(_)) => {
                    if let Some(status) = self.status() {
                        return status;
                    }
                }
                // The handle itself holds a sender, so the channel cannot close
                Err(RecvError::Closed) => std::future::pending::<()>().await,
            }
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// How a session or node process ended.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ExitStatus {
    Completed,
    Failed,
    Interrupted,
}

impl ExitStatus {
    /// The process exit code for this status.
    pub fn code(self) -> i32 {
        match self {
            ExitStatus::Completed => 0,
            ExitStatus::Failed | ExitStatus::Interrupted => 1,
        }
    }
}
