//! Data model held by the [`AuditStore`](crate::AuditStore).
//!
//! Every type here is plain data: no locks, no I/O. The store owns one
//! [`StoreState`] and swaps it atomically on each action, so these types
//! derive `Clone` and serde traits to make snapshots cheap to hand out and
//! easy to render as JSON.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum number of anomalies retained, newest first.
pub const MAX_ANOMALIES: usize = 10;

/// Maximum number of active conversation topics, most recent first.
pub const MAX_ACTIVE_TOPICS: usize = 5;

/// Lifecycle of the real-time channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// A handshake (or a retry) is in flight.
    Connecting,
    /// The update stream is live.
    Connected,
    /// No connection, either never opened or closed on request.
    #[default]
    Disconnected,
    /// The last attempt failed. Retries may still be pending.
    Error,
}

impl ConnectionStatus {
    /// Stable lowercase name, matching the serde representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Live counters shown in the dashboard header.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RealTimeCounters {
    /// Number of users with an open session.
    pub active_sessions: u32,
    /// Documents currently moving through the pipeline.
    pub documents_in_flight: u32,
    /// Analysis engine load, always within `0..=100`.
    pub load_percent: u8,
    /// Time of the last counters update. Never moves backwards.
    pub last_update: DateTime<Utc>,
}

/// A headline metric value: numeric for scores, a label for levels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    /// A numeric reading such as a count or a score.
    Number(f64),
    /// A categorical reading such as `"Low"`.
    Label(String),
}

impl MetricValue {
    pub(crate) fn is_finite(&self) -> bool {
        match self {
            Self::Number(n) => n.is_finite(),
            Self::Label(_) => true,
        }
    }
}

impl From<f64> for MetricValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for MetricValue {
    fn from(value: &str) -> Self {
        Self::Label(value.to_owned())
    }
}

/// A dashboard metric with its trend and model prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    /// Current reading.
    pub value: MetricValue,
    /// Relative change against the previous period, in percent.
    pub change: f64,
    /// Predicted next reading.
    pub prediction: MetricValue,
    /// Prediction confidence in percent.
    pub confidence: f64,
}

/// Stage of a document in the processing pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Upload,
    Analysis,
    Complete,
}

impl PipelineStage {
    /// All stages, in processing order.
    pub const ALL: [Self; 3] = [Self::Upload, Self::Analysis, Self::Complete];

    /// Stable lowercase name, matching the serde representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Upload => "upload",
            Self::Analysis => "analysis",
            Self::Complete => "complete",
        }
    }
}

impl FromStr for PipelineStage {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| UnknownVariant(s.to_owned()))
    }
}

/// Three-level ordering shared by pipeline priority and anomaly severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
}

/// Severity of a detected anomaly.
pub type Severity = Priority;

/// One document moving through upload, analysis and completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineItem {
    /// Unique within the pipeline.
    pub id: u64,
    /// Document file name.
    pub name: String,
    pub stage: PipelineStage,
    /// Upload progress, clamped to `0..=100`.
    pub progress: f64,
    /// Analysis progress, clamped to `0..=100`.
    pub ai_progress: f64,
    /// Human-readable estimate such as `"2 min"`.
    pub estimated_time: String,
    pub priority: Priority,
}

/// Category of a detected irregularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    DataInconsistency,
    ComplianceDeviation,
    UnusualPattern,
}

impl AnomalyKind {
    /// All kinds, in declaration order.
    pub const ALL: [Self; 3] = [
        Self::DataInconsistency,
        Self::ComplianceDeviation,
        Self::UnusualPattern,
    ];

    /// Stable snake_case name, matching the serde representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DataInconsistency => "data_inconsistency",
            Self::ComplianceDeviation => "compliance_deviation",
            Self::UnusualPattern => "unusual_pattern",
        }
    }
}

impl FromStr for AnomalyKind {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownVariant(s.to_owned()))
    }
}

impl Priority {
    /// All levels, lowest first.
    pub const ALL: [Self; 3] = [Self::Low, Self::Medium, Self::High];

    /// Stable lowercase name, matching the serde representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl FromStr for Priority {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|level| level.as_str() == s)
            .ok_or_else(|| UnknownVariant(s.to_owned()))
    }
}

/// Returned when a wire string does not name a known enum variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown variant: {0:?}")]
pub struct UnknownVariant(pub String);

/// Whether an anomaly still needs attention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyStatus {
    Investigating,
    Resolved,
}

/// A detected irregularity surfaced on the risk screens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    pub id: u64,
    pub kind: AnomalyKind,
    pub severity: Severity,
    pub description: String,
    /// Detection confidence, clamped to `0..=100`.
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
    pub status: AnomalyStatus,
}

/// A trigger/condition/action rule on the automation screen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationRule {
    pub id: u64,
    pub name: String,
    pub trigger: String,
    pub condition: String,
    pub action: String,
    pub enabled: bool,
    /// Historical success rate in percent.
    pub success_rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationSettings {
    pub real_time: bool,
    pub summary: bool,
}

/// How the assistant should tailor its answers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    pub detail_level: String,
    pub focus_areas: Vec<String>,
    pub notifications: NotificationSettings,
}

/// Context carried across assistant exchanges.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationContext {
    pub session_id: String,
    /// Lower-cased, de-duplicated, most recent first, at most
    /// [`MAX_ACTIVE_TOPICS`] entries.
    pub active_topics: Vec<String>,
    pub preferences: Preferences,
}

/// One period of a chart series.
///
/// `values` holds one reading per metric name (`"documents"`, `"accuracy"`,
/// ...). Predicted points also carry the model confidence in `0..=1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartPoint {
    pub period: String,
    #[serde(flatten)]
    pub values: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl ChartPoint {
    /// Build a point from `(metric, value)` pairs.
    pub fn new<'a>(
        period: impl Into<String>,
        values: impl IntoIterator<Item = (&'a str, f64)>,
    ) -> Self {
        Self {
            period: period.into(),
            values: values
                .into_iter()
                .map(|(name, value)| (name.to_owned(), value))
                .collect(),
            confidence: None,
        }
    }

    /// Attach a prediction confidence.
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }
}

/// Historical readings followed by model predictions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChartSeries {
    pub historical: Vec<ChartPoint>,
    pub predicted: Vec<ChartPoint>,
}

/// Everything the dashboard reads.
///
/// `Default` yields an empty state; [`StoreState::seeded`] yields the
/// fixture values the dashboard starts with.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreState {
    pub connection_status: ConnectionStatus,
    pub counters: RealTimeCounters,
    pub metrics: BTreeMap<String, Metric>,
    pub pipeline: Vec<PipelineItem>,
    /// Newest first, at most [`MAX_ANOMALIES`] entries.
    pub anomalies: Vec<Anomaly>,
    pub automation_rules: Vec<AutomationRule>,
    pub conversation: ConversationContext,
    pub chart: ChartSeries,
}

impl StoreState {
    /// Fixture state the dashboard starts with.
    pub fn seeded() -> Self {
        let now = Utc::now();

        let metric =
            |value: MetricValue, change: f64, prediction: MetricValue, confidence: f64| Metric {
                value,
                change,
                prediction,
                confidence,
            };
        let metrics = BTreeMap::from([
            (
                "total_documents".to_owned(),
                metric(2847.0.into(), 12.3, 3100.0.into(), 94.0),
            ),
            (
                "ai_analysis_score".to_owned(),
                metric(94.2.into(), 5.1, 96.5.into(), 89.0),
            ),
            (
                "risk_level".to_owned(),
                metric("Low".into(), -2.3, "Low".into(), 92.0),
            ),
            (
                "processing_time".to_owned(),
                metric(1.2.into(), -18.5, 0.9.into(), 87.0),
            ),
        ]);

        let pipeline = vec![
            PipelineItem {
                id: 1,
                name: "Financial_Report_Q4.pdf".to_owned(),
                stage: PipelineStage::Upload,
                progress: 100.0,
                ai_progress: 0.0,
                estimated_time: "2 min".to_owned(),
                priority: Priority::High,
            },
            PipelineItem {
                id: 2,
                name: "Compliance_Audit.docx".to_owned(),
                stage: PipelineStage::Analysis,
                progress: 100.0,
                ai_progress: 67.0,
                estimated_time: "1 min".to_owned(),
                priority: Priority::Medium,
            },
            PipelineItem {
                id: 3,
                name: "Risk_Assessment.xlsx".to_owned(),
                stage: PipelineStage::Complete,
                progress: 100.0,
                ai_progress: 100.0,
                estimated_time: "Complete".to_owned(),
                priority: Priority::Low,
            },
        ];

        let anomalies = vec![
            Anomaly {
                id: 1,
                kind: AnomalyKind::DataInconsistency,
                severity: Priority::Medium,
                description: "Unusual pattern in expense categorization".to_owned(),
                confidence: 78.0,
                created_at: now - Duration::minutes(15),
                status: AnomalyStatus::Investigating,
            },
            Anomaly {
                id: 2,
                kind: AnomalyKind::ComplianceDeviation,
                severity: Priority::High,
                description: "Document approval workflow bypassed".to_owned(),
                confidence: 94.0,
                created_at: now - Duration::minutes(45),
                status: AnomalyStatus::Resolved,
            },
        ];

        let automation_rules = vec![
            AutomationRule {
                id: 1,
                name: "Auto-categorize Financial Documents".to_owned(),
                trigger: "document_upload".to_owned(),
                condition: "contains_financial_keywords".to_owned(),
                action: "categorize_and_route".to_owned(),
                enabled: true,
                success_rate: 96.2,
            },
            AutomationRule {
                id: 2,
                name: "Risk Alert Notifications".to_owned(),
                trigger: "risk_level_change".to_owned(),
                condition: "risk_above_threshold".to_owned(),
                action: "send_notification".to_owned(),
                enabled: true,
                success_rate: 98.7,
            },
        ];

        let conversation = ConversationContext {
            session_id: format!("audit-session-{}", Uuid::new_v4()),
            active_topics: vec![
                "financial audit".to_owned(),
                "compliance".to_owned(),
                "risk assessment".to_owned(),
            ],
            preferences: Preferences {
                detail_level: "detailed".to_owned(),
                focus_areas: vec!["compliance".to_owned(), "efficiency".to_owned()],
                notifications: NotificationSettings {
                    real_time: true,
                    summary: true,
                },
            },
        };

        let point = |period: &str, documents: f64, accuracy: f64, risk: f64| {
            ChartPoint::new(
                period,
                [("documents", documents), ("accuracy", accuracy), ("risk", risk)],
            )
        };
        let chart = ChartSeries {
            historical: vec![
                point("2024-01", 120.0, 94.0, 15.0),
                point("2024-02", 150.0, 96.0, 12.0),
                point("2024-03", 180.0, 93.0, 18.0),
                point("2024-04", 220.0, 97.0, 8.0),
                point("2024-05", 190.0, 95.0, 10.0),
                point("2024-06", 240.0, 98.0, 6.0),
                point("2024-07", 280.0, 96.0, 9.0),
            ],
            predicted: vec![
                point("2024-08", 310.0, 97.0, 7.0).with_confidence(0.89),
                point("2024-09", 340.0, 98.0, 5.0).with_confidence(0.84),
                point("2024-10", 360.0, 96.0, 8.0).with_confidence(0.78),
            ],
        };

        Self {
            connection_status: ConnectionStatus::Disconnected,
            counters: RealTimeCounters {
                active_sessions: 12,
                documents_in_flight: 3,
                load_percent: 67,
                last_update: now,
            },
            metrics,
            pipeline,
            anomalies,
            automation_rules,
            conversation,
            chart,
        }
    }
}
