//! gRPC client for a real `auditpulse.v1.RealtimeFeed` backend.
//!
//! [`GrpcFeedSource`] implements [`RealtimeSource`] over the generated
//! [`RealtimeFeedClient`]: `Subscribe` is the update stream, `Ask` answers
//! assistant questions. The conversion functions are free functions so they
//! can be unit-tested without a server.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_stream::StreamExt;
use tonic::transport::{Channel, Endpoint};

use crate::action::{CountersPatch, MetricPatch, PipelinePatch, StoreAction};
use crate::error::SourceError;
use crate::model::{
    Anomaly, AnomalyKind, AnomalyStatus, ConversationContext, MetricValue, PipelineStage, Priority,
};
use crate::proto::realtime_feed_client::RealtimeFeedClient;
use crate::proto::{self, feed_update, metric_value};
use crate::source::{AssistantReply, RealtimeSource, UpdateStream};
use crate::store::AuditStore;

/// Environment variable read by [`FeedConfig::from_env`].
pub const ENDPOINT_ENV: &str = "AUDIT_PULSE_ENDPOINT";

const DEFAULT_ENDPOINT: &str = "http://localhost:8001";

/// Where and how to reach the feed backend.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// URI of the gRPC server.
    ///
    /// Default: `http://localhost:8001`.
    pub endpoint: String,

    /// Upper bound on establishing the HTTP/2 connection.
    ///
    /// Default: 5 seconds.
    pub connect_timeout: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_owned(),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl FeedConfig {
    /// Defaults, with the endpoint overridden by `AUDIT_PULSE_ENDPOINT` when
    /// it is set and non-empty.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(endpoint) = lookup(ENDPOINT_ENV).filter(|v| !v.trim().is_empty()) {
            config.endpoint = endpoint;
        }
        config
    }
}

/// [`RealtimeSource`] backed by the `RealtimeFeed` gRPC service.
///
/// The channel connects lazily, so construction never touches the network;
/// a down server shows up as a failed `open`, which the connection loop
/// retries. `Clone` is cheap: the client wraps a shared connection pool.
#[derive(Clone)]
pub struct GrpcFeedSource {
    config: FeedConfig,
    client: RealtimeFeedClient<Channel>,
}

impl fmt::Debug for GrpcFeedSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GrpcFeedSource")
            .field("endpoint", &self.config.endpoint)
            .finish()
    }
}

impl GrpcFeedSource {
    /// Build a source for `config.endpoint`.
    ///
    /// Must be called inside a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Transport`] if the endpoint is not a valid URI.
    pub fn new(config: FeedConfig) -> Result<Self, SourceError> {
        let channel = Endpoint::from_shared(config.endpoint.clone())?
            .connect_timeout(config.connect_timeout)
            .connect_lazy();
        Ok(Self {
            config,
            client: RealtimeFeedClient::new(channel),
        })
    }

    /// The configuration this source was built with.
    pub fn config(&self) -> &FeedConfig {
        &self.config
    }
}

#[tonic::async_trait]
impl RealtimeSource for GrpcFeedSource {
    fn name(&self) -> &'static str {
        "grpc-feed"
    }

    async fn open(&self, store: &AuditStore) -> Result<UpdateStream, SourceError> {
        let request = proto::SubscribeRequest {
            session_id: store.get_state().conversation.session_id.clone(),
        };
        // Cloning the generated client is cheap; it shares the channel.
        let response = self.client.clone().subscribe(request).await?;
        tracing::debug!(endpoint = %self.config.endpoint, "feed subscription open");

        let updates = response.into_inner().map(|item| match item {
            Ok(update) => decode_update(update),
            Err(status) => Err(SourceError::Rpc(status)),
        });
        Ok(Box::pin(updates))
    }

    async fn ask(
        &self,
        prompt: &str,
        context: &ConversationContext,
    ) -> Result<AssistantReply, SourceError> {
        let response = self
            .client
            .clone()
            .ask(encode_ask(prompt, context))
            .await?;
        Ok(decode_reply(response.into_inner()))
    }
}

/// Build the `Ask` request for `prompt` in `context`.
pub fn encode_ask(prompt: &str, context: &ConversationContext) -> proto::AskRequest {
    proto::AskRequest {
        session_id: context.session_id.clone(),
        prompt: prompt.to_owned(),
        active_topics: context.active_topics.clone(),
    }
}

/// Convert an `Ask` response, stamping the receive time.
pub fn decode_reply(reply: proto::AskReply) -> AssistantReply {
    AssistantReply {
        content: reply.content,
        confidence: reply.confidence,
        suggestions: reply.suggestions,
        created_at: Utc::now(),
    }
}

/// Map one stream message onto store actions.
///
/// Heartbeats decode to an empty batch. Range checks are left to action
/// validation; this only rejects what cannot be represented at all.
///
/// # Errors
///
/// Returns [`SourceError::Decode`] for an empty message or metric value,
/// an unknown enum name, or an out-of-range timestamp.
pub fn decode_update(update: proto::FeedUpdate) -> Result<Vec<StoreAction>, SourceError> {
    let Some(update) = update.update else {
        return Err(SourceError::Decode("feed update carries no payload".into()));
    };
    let action = match update {
        feed_update::Update::Heartbeat(_) => return Ok(Vec::new()),
        feed_update::Update::Counters(c) => StoreAction::UpdateCounters(CountersPatch {
            active_sessions: Some(c.active_sessions),
            documents_in_flight: Some(c.documents_in_flight),
            load_percent: Some(u8::try_from(c.load_percent.min(100)).unwrap_or(100)),
        }),
        feed_update::Update::Metric(m) => StoreAction::UpdateMetric {
            key: m.key,
            patch: MetricPatch {
                value: m.value.map(metric).transpose()?,
                change: m.change,
                prediction: m.prediction.map(metric).transpose()?,
                confidence: m.confidence,
            },
        },
        feed_update::Update::PipelineItem(p) => StoreAction::UpdatePipelineItem {
            id: p.id,
            patch: PipelinePatch {
                stage: p.stage.as_deref().map(parse::<PipelineStage>).transpose()?,
                progress: p.progress,
                ai_progress: p.ai_progress,
                estimated_time: p.estimated_time,
                ..PipelinePatch::default()
            },
        },
        feed_update::Update::Anomaly(a) => StoreAction::AddAnomaly(Anomaly {
            id: a.id,
            kind: parse::<AnomalyKind>(&a.kind)?,
            severity: parse::<Priority>(&a.severity)?,
            description: a.description,
            confidence: a.confidence,
            created_at: detected_at(a.detected_at_ms)?,
            status: AnomalyStatus::Investigating,
        }),
        feed_update::Update::AnomalyStatus(s) => StoreAction::UpdateAnomalyStatus {
            id: s.id,
            status: if s.resolved {
                AnomalyStatus::Resolved
            } else {
                AnomalyStatus::Investigating
            },
        },
    };
    Ok(vec![action])
}

fn parse<T>(raw: &str) -> Result<T, SourceError>
where
    T: std::str::FromStr<Err = crate::model::UnknownVariant>,
{
    raw.parse().map_err(|e| SourceError::Decode(format!("{e}")))
}

fn metric(value: proto::MetricValue) -> Result<MetricValue, SourceError> {
    match value.kind {
        Some(metric_value::Kind::Number(n)) => Ok(MetricValue::Number(n)),
        Some(metric_value::Kind::Label(label)) => Ok(MetricValue::Label(label)),
        None => Err(SourceError::Decode(
            "metric value carries neither number nor label".into(),
        )),
    }
}

fn detected_at(millis: i64) -> Result<DateTime<Utc>, SourceError> {
    if millis == 0 {
        return Ok(Utc::now());
    }
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| SourceError::Decode(format!("timestamp out of range: {millis}")))
}
