//! Shutdown coordination.

use std::future::Future;
use std::time::Duration;

use tokio::runtime::{Handle, TryCurrentError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Coordinator for graceful shutdown.
///
/// Every long-running task (gateway listener, stats reporter, exporter
/// loops) watches a token derived from this one. Tasks started through
/// [`Shutdown::spawn`] are tracked so [`Shutdown::wait`] can let them
/// finish their last flush before the runtime goes away.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    token: CancellationToken,
    tasks: TaskTracker,
}

impl Shutdown {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }

    /// The root token.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// A child token cancelled together with the root.
    pub fn subscribe(&self) -> CancellationToken {
        self.token.child_token()
    }

    pub fn trigger(&self) {
        if !self.token.is_cancelled() {
            tracing::info!("Shutdown triggered");
        }
        self.token.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Spawn a background task on the current runtime and track it.
    pub fn spawn<F>(&self, task: F) -> Result<JoinHandle<F::Output>, TryCurrentError>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let handle = Handle::try_current()?;
        Ok(self.tasks.spawn_on(task, &handle))
    }

    /// Number of tracked tasks still running.
    pub fn pending(&self) -> usize {
        self.tasks.len()
    }

    /// Wait for every tracked task, at most `timeout`.
    ///
    /// Returns `false` when tasks were still running at the deadline.
    pub async fn wait(&self, timeout: Duration) -> bool {
        self.tasks.close();
        match tokio::time::timeout(timeout, self.tasks.wait()).await {
            Ok(()) => true,
            Err(_) => {
                tracing::warn!(
                    pending = self.tasks.len(),
                    "Background tasks still running at shutdown deadline"
                );
                false
            }
        }
    }
}
