//! Per-connection idle timer.
//!
//! Each arming spawns one task that races a cancel signal against the
//! deadline. Dropping or cancelling the [`Watchdog`] before the deadline
//! makes the task exit quietly. Once the deadline passes, the expiry future
//! runs to completion regardless of later cancellation.

use std::future::Future;
use std::time::Duration;
use tokio::sync::oneshot;

use super::connection::ConnectionId;
use super::ConnectionError;

/// What happened when an armed watchdog reached its deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// The connection was idle and has been closed.
    Evicted,
    /// The connection was refreshed or closed in the meantime.
    Superseded,
}

pub(crate) struct Watchdog {
    generation: u64,
    cancel: oneshot::Sender<()>,
}

impl Watchdog {
    /// Spawn a timer that runs `on_expiry` after `timeout` unless cancelled.
    pub fn arm<F>(id: ConnectionId, generation: u64, timeout: Duration, on_expiry: F) -> Self
    where
        F: Future<Output = Result<Expiry, ConnectionError>> + Send + 'static,
    {
        let (cancel, cancelled) = oneshot::channel::<()>();

        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = cancelled => {
                    tracing::trace!(connection_id = %id, generation, "Watchdog cancelled");
                }
                _ = tokio::time::sleep(timeout) => match on_expiry.await {
                    Ok(Expiry::Evicted) => tracing::info!(
                        connection_id = %id,
                        idle_ms = timeout.as_millis() as u64,
                        "Connection closed by inactivity"
                    ),
                    Ok(Expiry::Superseded) => {
                        tracing::trace!(connection_id = %id, generation, "Watchdog superseded");
                    }
                    Err(e) => tracing::error!(
                        connection_id = %id,
                        error = %e,
                        "Can not close connection by timeout"
                    ),
                },
            }
        });

        Self { generation, cancel }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn cancel(self) {
        let _ = self.cancel.send(());
    }
}
