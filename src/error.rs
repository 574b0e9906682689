//! Crate-level error types for store validation, real-time sources and the
//! service handle.

/// Error returned when an action payload is malformed.
///
/// Raised by [`StoreAction::validate`](crate::StoreAction::validate) before
/// anything is merged into the store. Lookup misses are not errors; they
/// yield [`ActionOutcome::Unaffected`](crate::ActionOutcome::Unaffected).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// A required text field was empty or whitespace.
    #[error("field `{field}` must not be empty")]
    Empty {
        /// Name of the offending field.
        field: &'static str,
    },

    /// A numeric field was NaN or infinite.
    #[error("field `{field}` must be a finite number")]
    NonFinite {
        /// Name of the offending field.
        field: &'static str,
    },
}

/// Error produced by a [`RealtimeSource`](crate::RealtimeSource).
///
/// Connection-level variants are never shown to readers of the store
/// directly; the connection loop logs them and surfaces the `error`
/// connection status instead.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The remote end refused the handshake.
    #[error("handshake refused: {0}")]
    Handshake(String),

    /// The update stream failed mid-flight.
    #[error("update stream failed: {0}")]
    Stream(String),

    /// The update stream ended without an error.
    #[error("update stream closed by the remote end")]
    Closed,

    /// A received message could not be mapped onto store actions.
    #[error("malformed update: {0}")]
    Decode(String),

    /// The gRPC channel could not be established.
    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// A gRPC call returned a non-OK status.
    #[error("rpc failed: {0}")]
    Rpc(#[from] tonic::Status),
}

/// Error returned by [`RealtimeService`](crate::RealtimeService) calls.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// The source failed to answer.
    #[error(transparent)]
    Source(#[from] SourceError),

    /// The message text was rejected before it reached the source.
    #[error("message rejected: {0}")]
    InvalidMessage(#[from] ValidationError),

    /// The service actor has shut down.
    ///
    /// Every handle becomes inert once [`shutdown`](crate::RealtimeService::shutdown)
    /// has run or the actor task has exited.
    #[error("realtime service is no longer running")]
    ServiceGone,
}
