//! The seam between the connection loop and whatever produces real-time
//! updates.
//!
//! A [`RealtimeSource`] performs a handshake, then yields batches of
//! [`StoreAction`]s. The connection loop owns retries and status
//! transitions; a source only reports what happened.

use std::pin::Pin;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_stream::Stream;

use crate::action::StoreAction;
use crate::error::SourceError;
use crate::model::ConversationContext;
use crate::store::AuditStore;

/// Batches of actions produced after a successful handshake.
///
/// Each item is applied to the store in order. An `Err` item or the end of
/// the stream counts as a dropped connection.
pub type UpdateStream = Pin<Box<dyn Stream<Item = Result<Vec<StoreAction>, SourceError>> + Send>>;

/// Answer to an assistant question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantReply {
    pub content: String,
    /// Answer confidence in percent.
    pub confidence: f64,
    /// Follow-up actions offered to the user.
    pub suggestions: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Producer of real-time store updates and assistant answers.
///
/// # Contract
///
/// - [`open`](RealtimeSource::open) resolves once the handshake is done.
///   Dropping the returned future (or the stream) must abandon the
///   connection without side effects on the store.
/// - Sources never set the connection status themselves; a streamed
///   [`StoreAction::SetConnectionStatus`](crate::StoreAction) is dropped.
/// - [`ask`](RealtimeSource::ask) must not depend on an open stream.
#[tonic::async_trait]
pub trait RealtimeSource: Send + Sync + 'static {
    /// Short name used in log fields.
    fn name(&self) -> &'static str;

    /// Handshake and return the update stream.
    ///
    /// # Arguments
    ///
    /// * `store` - Read access for sources whose updates depend on the
    ///   current state (e.g. advancing in-flight pipeline items).
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if the handshake fails.
    async fn open(&self, store: &AuditStore) -> Result<UpdateStream, SourceError>;

    /// Answer `prompt` in the given conversation.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if the backend cannot answer.
    async fn ask(
        &self,
        prompt: &str,
        context: &ConversationContext,
    ) -> Result<AssistantReply, SourceError>;
}
