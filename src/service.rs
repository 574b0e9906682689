//! The real-time service: an actor that owns the connection task and the
//! source, behind a cheap, cloneable [`RealtimeService`] handle.
//!
//! All lifecycle requests go through one `mpsc` channel, so `connect` and
//! `disconnect` are serialized without locks. Assistant questions are
//! answered on their own tasks and never hold up the actor.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use crate::connection::{ConnectionTask, ReconnectPolicy};
use crate::error::ServiceError;
use crate::model::ConnectionStatus;
use crate::simulator::{SimulatedSource, SimulatorConfig};
use crate::source::{AssistantReply, RealtimeSource};
use crate::store::AuditStore;

/// Bound on queued requests per service.
const CHANNEL_CAPACITY: usize = 32;

/// Result of [`RealtimeService::connect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectOutcome {
    /// A new connection loop was spawned.
    Started,
    /// A loop is already connecting, connected or backing off.
    AlreadyActive,
}

/// Messages sent from [`RealtimeService`] to the actor loop.
enum ServiceMessage {
    Connect {
        reply: oneshot::Sender<ConnectOutcome>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    Ask {
        prompt: String,
        reply: oneshot::Sender<Result<AssistantReply, ServiceError>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// State owned by the actor task.
struct ServiceActor {
    store: AuditStore,
    source: Arc<dyn RealtimeSource>,
    policy: ReconnectPolicy,
    connection: Option<ConnectionTask>,
}

impl ServiceActor {
    fn connect(&mut self) -> ConnectOutcome {
        if self.connection.as_ref().is_some_and(ConnectionTask::is_active) {
            return ConnectOutcome::AlreadyActive;
        }
        // A loop that gave up has already exited; nothing to stop.
        self.connection = None;

        self.store.set_connection_status(ConnectionStatus::Connecting);
        self.connection = Some(ConnectionTask::spawn(
            self.store.clone(),
            Arc::clone(&self.source),
            self.policy.clone(),
        ));
        ConnectOutcome::Started
    }

    async fn disconnect(&mut self) {
        if let Some(task) = self.connection.take() {
            task.stop().await;
            tracing::info!(source = self.source.name(), "disconnected");
        }
        self.store.set_connection_status(ConnectionStatus::Disconnected);
    }

    fn ask(&self, prompt: String, reply: oneshot::Sender<Result<AssistantReply, ServiceError>>) {
        if let Err(e) = self.store.record_topic(prompt.as_str()) {
            let _ = reply.send(Err(e.into()));
            return;
        }
        let source = Arc::clone(&self.source);
        let context = self.store.get_state().conversation.clone();
        tokio::spawn(async move {
            let result = source.ask(&prompt, &context).await;
            if let Err(e) = &result {
                tracing::warn!(source = source.name(), error = %e, "assistant request failed");
            }
            // The caller may have given up waiting.
            let _ = reply.send(result.map_err(ServiceError::from));
        });
    }
}

/// Process messages until shutdown or until every handle is dropped.
async fn run_service(mut actor: ServiceActor, mut rx: mpsc::Receiver<ServiceMessage>) {
    while let Some(msg) = rx.recv().await {
        match msg {
            ServiceMessage::Connect { reply } => {
                let outcome = actor.connect();
                tracing::debug!(?outcome, "connect requested");
                let _ = reply.send(outcome);
            }
            ServiceMessage::Disconnect { reply } => {
                actor.disconnect().await;
                let _ = reply.send(());
            }
            ServiceMessage::Ask { prompt, reply } => actor.ask(prompt, reply),
            ServiceMessage::Shutdown { reply } => {
                actor.disconnect().await;
                let _ = reply.send(());
                return;
            }
        }
    }
    // Channel closed: all handles dropped.
    actor.disconnect().await;
}

/// Async handle to the real-time service.
///
/// Lightweight, cloneable, and `Send + Sync`. Build one with
/// [`RealtimeService::builder`] inside a Tokio runtime.
///
/// # Examples
///
/// ```no_run
/// # async fn example() -> Result<(), audit_pulse::ServiceError> {
/// use audit_pulse::{AuditStore, RealtimeService};
///
/// let store = AuditStore::new();
/// let service = RealtimeService::builder().store(store.clone()).build();
/// service.connect().await?;
/// let reply = service.send_message("Summarize open risks").await?;
/// println!("{}", reply.content);
/// service.shutdown().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RealtimeService {
    sender: mpsc::Sender<ServiceMessage>,
    store: AuditStore,
}

impl fmt::Debug for RealtimeService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealtimeService")
            .field("alive", &self.is_alive())
            .field("store", &self.store)
            .finish()
    }
}

impl RealtimeService {
    /// Start configuring a service. See [`RealtimeServiceBuilder`].
    pub fn builder() -> RealtimeServiceBuilder {
        RealtimeServiceBuilder::new()
    }

    /// The store this service feeds.
    pub fn store(&self) -> &AuditStore {
        &self.store
    }

    /// Start the connection loop unless one is already running.
    ///
    /// On `Started`, the store reads `connecting` by the time this returns.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::ServiceGone`] after shutdown.
    pub async fn connect(&self) -> Result<ConnectOutcome, ServiceError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ServiceMessage::Connect { reply: tx })
            .await
            .map_err(|_| ServiceError::ServiceGone)?;
        rx.await.map_err(|_| ServiceError::ServiceGone)
    }

    /// Stop the connection loop and set the status to `disconnected`.
    ///
    /// Waits until the loop has exited, so no streamed update lands after
    /// this returns. Calling it while disconnected is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::ServiceGone`] after shutdown.
    pub async fn disconnect(&self) -> Result<(), ServiceError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ServiceMessage::Disconnect { reply: tx })
            .await
            .map_err(|_| ServiceError::ServiceGone)?;
        rx.await.map_err(|_| ServiceError::ServiceGone)
    }

    /// Ask the assistant.
    ///
    /// Once the service accepts the question, `text` is recorded as an
    /// active conversation topic and forwarded to the source together with
    /// the conversation context. A question the service never accepts
    /// leaves the store untouched.
    ///
    /// # Arguments
    ///
    /// * `text` - The user's question.
    ///
    /// # Returns
    ///
    /// The source's [`AssistantReply`].
    ///
    /// # Errors
    ///
    /// * [`ServiceError::InvalidMessage`] -- `text` is blank.
    /// * [`ServiceError::Source`] -- the source could not answer.
    /// * [`ServiceError::ServiceGone`] -- the service has shut down.
    pub async fn send_message(&self, text: &str) -> Result<AssistantReply, ServiceError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ServiceMessage::Ask {
                prompt: text.to_owned(),
                reply: tx,
            })
            .await
            .map_err(|_| ServiceError::ServiceGone)?;
        rx.await.map_err(|_| ServiceError::ServiceGone)?
    }

    /// Disconnect and stop the actor.
    ///
    /// Every handle becomes inert afterwards. Calling `shutdown` more than
    /// once is safe.
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self
            .sender
            .send(ServiceMessage::Shutdown { reply: tx })
            .await
            .is_ok()
        {
            let _ = rx.await;
        }
    }

    /// `false` once the actor has exited.
    pub fn is_alive(&self) -> bool {
        !self.sender.is_closed()
    }
}

/// Builder for [`RealtimeService`].
///
/// Defaults: a freshly seeded [`AuditStore`], a [`SimulatedSource`] with
/// [`SimulatorConfig::default`], and [`ReconnectPolicy::default`].
///
/// # Examples
///
/// ```no_run
/// # async fn example() {
/// use std::time::Duration;
/// use audit_pulse::{ReconnectPolicy, RealtimeService, SimulatorConfig};
///
/// let service = RealtimeService::builder()
///     .simulator(SimulatorConfig { seed: Some(7), ..SimulatorConfig::default() })
///     .reconnect_policy(ReconnectPolicy {
///         max_attempts: 3,
///         ..ReconnectPolicy::default()
///     })
///     .build();
/// # }
/// ```
pub struct RealtimeServiceBuilder {
    store: Option<AuditStore>,
    source: Option<Arc<dyn RealtimeSource>>,
    policy: ReconnectPolicy,
}

impl fmt::Debug for RealtimeServiceBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealtimeServiceBuilder")
            .field("source", &self.source.as_ref().map(|s| s.name()))
            .field("policy", &self.policy)
            .finish()
    }
}

impl Default for RealtimeServiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RealtimeServiceBuilder {
    /// A builder with every default in place.
    pub fn new() -> Self {
        Self {
            store: None,
            source: None,
            policy: ReconnectPolicy::default(),
        }
    }

    /// Feed `store` instead of a fresh one.
    pub fn store(mut self, store: AuditStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Use `source` for updates and assistant answers.
    pub fn source(self, source: impl RealtimeSource) -> Self {
        self.shared_source(Arc::new(source))
    }

    /// Use an already shared source.
    pub fn shared_source(mut self, source: Arc<dyn RealtimeSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Shorthand for `.source(SimulatedSource::new(config))`.
    pub fn simulator(self, config: SimulatorConfig) -> Self {
        self.source(SimulatedSource::new(config))
    }

    /// Backoff schedule and retry limit for the connection loop.
    pub fn reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Spawn the actor and return its handle.
    ///
    /// Must be called inside a Tokio runtime. The service starts
    /// disconnected; call [`RealtimeService::connect`].
    pub fn build(self) -> RealtimeService {
        let store = self.store.unwrap_or_default();
        let source = self
            .source
            .unwrap_or_else(|| Arc::new(SimulatedSource::default()));
        let (sender, rx) = mpsc::channel(CHANNEL_CAPACITY);
        tracing::debug!(source = source.name(), "starting realtime service");
        let actor = ServiceActor {
            store: store.clone(),
            source,
            policy: self.policy,
            connection: None,
        };
        tokio::spawn(run_service(actor, rx));
        RealtimeService { sender, store }
    }
}
