//! Graceful shutdown coordination.
//!
//! Coordinates shutdown of the long-running pipeline tasks (consumer loops,
//! expiry sweeper) with a grace period.
//!
//! ## Architecture
//!
//! - **`ShutdownCoordinator`**: spawns named tasks, broadcasts the shutdown
//!   signal, then waits for every task to drain
//! - **`Shutdown`**: per-task receiver of that signal
//! - **`wait_for_signal()`**: waits for SIGTERM or Ctrl+C
//!
//! ## Usage
//!
//! ```ignore
//! let mut coordinator = ShutdownCoordinator::new(Duration::from_secs(30));
//!
//! let shutdown = coordinator.subscribe();
//! coordinator.spawn("product-events", async move { consumer.run(shutdown).await });
//!
//! wait_for_signal().await?;
//! coordinator.shutdown().await?;
//! ```

use std::future::Future;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Receiver side of the shutdown signal.
///
/// Once the signal has been observed, every later [`recv`](Self::recv)
/// returns immediately. A dropped coordinator counts as a signal.
#[derive(Debug)]
pub struct Shutdown {
    rx: broadcast::Receiver<()>,
    triggered: bool,
}

impl Shutdown {
    fn new(rx: broadcast::Receiver<()>) -> Self {
        Self {
            rx,
            triggered: false,
        }
    }

    /// Whether shutdown has been observed.
    #[must_use]
    pub const fn is_triggered(&self) -> bool {
        self.triggered
    }

    /// Wait for the shutdown signal.
    ///
    /// Cancel safe: can be used as a `tokio::select!` branch.
    pub async fn recv(&mut self) {
        if self.triggered {
            return;
        }
        // Ok, Lagged and Closed all mean the signal was sent or can no longer be.
        let _ = self.rx.recv().await;
        self.triggered = true;
    }
}

/// Owns the pipeline tasks and stops them together.
pub struct ShutdownCoordinator {
    shutdown_tx: broadcast::Sender<()>,
    tasks: Vec<(String, JoinHandle<()>)>,
    timeout_duration: Duration,
}

impl ShutdownCoordinator {
    /// Create new shutdown coordinator
    ///
    /// # Arguments
    ///
    /// * `timeout` - Maximum time to wait for all tasks to drain
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);

        Self {
            shutdown_tx,
            tasks: Vec::new(),
            timeout_duration: timeout,
        }
    }

    /// Get a receiver for the shutdown signal.
    #[must_use]
    pub fn subscribe(&self) -> Shutdown {
        Shutdown::new(self.shutdown_tx.subscribe())
    }

    /// Spawn a named task that will be awaited on shutdown.
    ///
    /// The task is expected to watch a [`Shutdown`] obtained from
    /// [`subscribe`](Self::subscribe) and return once it fires.
    pub fn spawn<F>(&mut self, name: impl Into<String>, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        info!(task = %name, "Spawned pipeline task");
        self.tasks.push((name, tokio::spawn(task)));
    }

    /// Number of tasks owned by the coordinator.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Signal every task and wait for them to finish.
    ///
    /// Tasks still running after the timeout are aborted.
    ///
    /// # Errors
    ///
    /// Returns one message per task that panicked or timed out.
    pub async fn shutdown(self) -> Result<(), Vec<String>> {
        info!(
            tasks = self.tasks.len(),
            timeout = ?self.timeout_duration,
            "Initiating graceful shutdown"
        );

        if self.shutdown_tx.send(()).is_err() {
            warn!("No active shutdown signal receivers");
        }

        let timeout_duration = self.timeout_duration;
        let drains = self.tasks.into_iter().map(|(name, mut handle)| async move {
            match tokio::time::timeout(timeout_duration, &mut handle).await {
                Ok(Ok(())) => {
                    info!(task = %name, "Task drained");
                    Ok(())
                }
                Ok(Err(e)) => {
                    error!(task = %name, error = %e, "Task failed during shutdown");
                    Err(format!("{name}: {e}"))
                }
                Err(_) => {
                    handle.abort();
                    error!(task = %name, "Task shutdown timed out, aborted");
                    Err(format!("{name}: timeout after {timeout_duration:?}"))
                }
            }
        });

        let errors: Vec<String> = futures::future::join_all(drains)
            .await
            .into_iter()
            .filter_map(Result::err)
            .collect();

        if errors.is_empty() {
            info!("All tasks shut down successfully");
            Ok(())
        } else {
            error!(errors = errors.len(), "Shutdown completed with errors");
            Err(errors)
        }
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
///
/// # Errors
///
/// Returns an error if the signal handlers cannot be installed.
pub async fn wait_for_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                info!("Received Ctrl+C");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
        }
        Ok(())
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn test_coordinator_drains_tasks() {
        let mut coordinator = ShutdownCoordinator::new(Duration::from_secs(5));
        let finished = Arc::new(AtomicBool::new(false));

        let mut shutdown = coordinator.subscribe();
        let flag = Arc::clone(&finished);
        coordinator.spawn("worker", async move {
            shutdown.recv().await;
            // In-flight work completes after the signal.
            tokio::time::sleep(Duration::from_millis(10)).await;
            flag.store(true, Ordering::SeqCst);
        });

        assert_eq!(coordinator.task_count(), 1);
        coordinator.shutdown().await.unwrap();
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_coordinator_timeout() {
        let mut coordinator = ShutdownCoordinator::new(Duration::from_secs(1));
        coordinator.spawn("stuck", async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });

        let errors = coordinator.shutdown().await.unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("stuck: timeout"));
    }

    #[tokio::test]
    async fn test_signal_is_sticky() {
        let coordinator = ShutdownCoordinator::new(Duration::from_secs(1));
        let mut shutdown = coordinator.subscribe();
        assert!(!shutdown.is_triggered());

        coordinator.shutdown().await.unwrap();

        shutdown.recv().await;
        assert!(shutdown.is_triggered());
        shutdown.recv().await;
    }
}
