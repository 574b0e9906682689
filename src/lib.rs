//! Reactive audit dashboard state with a pluggable real-time feed.
//!
//! [`AuditStore`] holds everything the dashboard reads and notifies
//! selector-scoped subscribers on every applied [`StoreAction`].
//! [`RealtimeService`] drives the connection lifecycle and streams updates
//! from a [`RealtimeSource`] into the store: the built-in
//! [`SimulatedSource`] or a [`GrpcFeedSource`] talking to a real backend.

mod action;
pub use action::{
    ActionOutcome, ConversationPatch, CountersPatch, MetricPatch, PipelinePatch, StoreAction,
};
mod connection;
pub use connection::ReconnectPolicy;
mod error;
pub use error::{ServiceError, SourceError, ValidationError};
mod feed;
pub use feed::{ENDPOINT_ENV, FeedConfig, GrpcFeedSource, decode_reply, decode_update, encode_ask};
mod model;
pub use model::{
    Anomaly, AnomalyKind, AnomalyStatus, AutomationRule, ChartPoint, ChartSeries,
    ConnectionStatus, ConversationContext, MAX_ACTIVE_TOPICS, MAX_ANOMALIES, Metric, MetricValue,
    NotificationSettings, PipelineItem, PipelineStage, Preferences, Priority, RealTimeCounters,
    Severity, StoreState, UnknownVariant,
};
pub mod proto;
pub mod selector;
pub use selector::{Trend, TrendDirection};
mod service;
pub use service::{ConnectOutcome, RealtimeService, RealtimeServiceBuilder};
mod simulator;
pub use simulator::{SimulatedSource, SimulatorConfig};
mod source;
pub use source::{AssistantReply, RealtimeSource, UpdateStream};
mod store;
pub use store::{AuditStore, Subscription};
