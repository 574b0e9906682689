//! Background connection loop and its reconnect policy.
//!
//! [`run_connection`] drives the store's connection status through
//! `connecting → connected`, applies every batch the source streams, and on
//! failure backs off exponentially before retrying. [`ConnectionTask`] is the
//! owner-side handle that spawns the loop and stops it.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;

use crate::action::StoreAction;
use crate::error::SourceError;
use crate::model::ConnectionStatus;
use crate::source::{RealtimeSource, UpdateStream};
use crate::store::AuditStore;

/// Retry schedule for a dropped or refused connection.
///
/// Retry `n` (1-based) waits `base_delay * 2^n`, capped at `max_delay`.
/// With the defaults that is 2, 4, 8, 16 and 32 seconds.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use audit_pulse::ReconnectPolicy;
///
/// let policy = ReconnectPolicy::default();
/// assert_eq!(policy.delay_for(1), Duration::from_secs(2));
/// assert_eq!(policy.delay_for(3), Duration::from_secs(8));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Unit of the exponential schedule.
    ///
    /// Default: 1 second.
    pub base_delay: Duration,

    /// Upper bound for any single wait.
    ///
    /// Default: 60 seconds.
    pub max_delay: Duration,

    /// Retries after the first failure before giving up in `error`.
    /// A successful handshake resets the count.
    ///
    /// Default: 5.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    /// Wait before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Owner-side handle of a running connection loop.
///
/// Unlike a shared handle this is held by exactly one owner (the service
/// actor), so [`stop`](ConnectionTask::stop) consumes it.
#[derive(Debug)]
pub(crate) struct ConnectionTask {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ConnectionTask {
    /// Spawn [`run_connection`] on the current runtime.
    pub(crate) fn spawn(
        store: AuditStore,
        source: Arc<dyn RealtimeSource>,
        policy: ReconnectPolicy,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run_connection(store, source, policy, shutdown_rx));
        Self { shutdown_tx, task }
    }

    /// `false` once the loop has exited, e.g. after exhausting its retries.
    pub(crate) fn is_active(&self) -> bool {
        !self.task.is_finished()
    }

    /// Signal the loop and wait until it has exited.
    ///
    /// Any pending handshake, stream read or backoff timer is abandoned.
    /// When this returns the loop will not touch the store again.
    pub(crate) async fn stop(self) {
        // The receiver is gone if the loop already exited.
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "connection task panicked");
        }
    }
}

/// Why [`pump`] returned.
enum StreamOutcome {
    /// Shutdown was signalled.
    Shutdown,
    /// The stream failed or ended; reconnect.
    Dropped(SourceError),
}

/// Run the connection loop until shutdown or retry exhaustion.
///
/// # Arguments
///
/// * `store` - Receives status transitions and streamed actions.
/// * `source` - Handshake and update producer.
/// * `policy` - Backoff schedule and retry limit.
/// * `shutdown_rx` - Flipping to `true` (or dropping the sender) stops the
///   loop at its next wait point without further store mutations.
pub(crate) async fn run_connection(
    store: AuditStore,
    source: Arc<dyn RealtimeSource>,
    policy: ReconnectPolicy,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut attempts: u32 = 0;

    loop {
        if *shutdown_rx.borrow() {
            return;
        }
        store.set_connection_status(ConnectionStatus::Connecting);
        tracing::info!(source = source.name(), attempt = attempts, "connecting");

        let opened = tokio::select! {
            biased;
            _ = shutdown_rx.changed() => return,
            opened = source.open(&store) => opened,
        };

        let failure = match opened {
            Ok(stream) => {
                attempts = 0;
                store.set_connection_status(ConnectionStatus::Connected);
                tracing::info!(source = source.name(), "connected");
                match pump(&store, stream, &mut shutdown_rx).await {
                    StreamOutcome::Shutdown => return,
                    StreamOutcome::Dropped(e) => e,
                }
            }
            Err(e) => e,
        };

        store.set_connection_status(ConnectionStatus::Error);
        if attempts >= policy.max_attempts {
            tracing::error!(
                source = source.name(),
                attempts,
                error = %failure,
                "connection lost, retries exhausted"
            );
            return;
        }

        attempts += 1;
        let delay = policy.delay_for(attempts);
        tracing::warn!(
            source = source.name(),
            attempt = attempts,
            max_attempts = policy.max_attempts,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %failure,
            "connection lost, retrying"
        );
        tokio::select! {
            biased;
            _ = shutdown_rx.changed() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// Apply batches from `stream` until it fails, ends or shutdown is signalled.
async fn pump(
    store: &AuditStore,
    mut stream: UpdateStream,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> StreamOutcome {
    loop {
        let item = tokio::select! {
            biased;
            _ = shutdown_rx.changed() => return StreamOutcome::Shutdown,
            item = stream.next() => item,
        };
        match item {
            Some(Ok(batch)) => {
                for action in batch {
                    let kind = action.kind();
                    // The status belongs to the connection lifecycle.
                    if let StoreAction::SetConnectionStatus(status) = action {
                        tracing::warn!(%status, "dropping streamed connection status");
                        continue;
                    }
                    if let Err(e) = store.dispatch(action) {
                        tracing::error!(action = kind, error = %e, "dropping malformed update");
                    }
                }
            }
            Some(Err(e)) => return StreamOutcome::Dropped(e),
            None => return StreamOutcome::Dropped(SourceError::Closed),
        }
    }
}
