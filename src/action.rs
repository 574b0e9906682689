//! Typed store actions and their application to [`StoreState`].
//!
//! Every mutation of the store goes through a [`StoreAction`]. Actions are
//! plain data so they can arrive from any source (a view, the simulator, a
//! gRPC feed) and be logged or serialized uniformly. Patch payloads reject
//! unknown fields when deserialized, so a feed cannot smuggle new keys into
//! the state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::model::{
    Anomaly, AnomalyStatus, ConnectionStatus, MAX_ACTIVE_TOPICS, MAX_ANOMALIES, MetricValue,
    NotificationSettings, PipelineItem, PipelineStage, Priority, StoreState,
};

/// Result of applying an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionOutcome {
    /// The state changed and subscribers were notified.
    Applied,
    /// Nothing matched (unknown id, duplicate id, or no effective change).
    /// The state is untouched.
    Unaffected,
}

impl ActionOutcome {
    /// Returns `true` for [`ActionOutcome::Applied`].
    pub fn is_applied(self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// Partial update of the real-time counters. `None` keeps the current value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CountersPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_sessions: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub documents_in_flight: Option<u32>,
    /// Values above 100 are clamped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_percent: Option<u8>,
}

/// Partial update of a headline metric.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MetricPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<MetricValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prediction: Option<MetricValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

/// Partial update of a pipeline item. Progress values are clamped to `0..=100`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelinePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<PipelineStage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_progress: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
}

/// Partial update of the assistant preferences.
///
/// Topics are not patched wholesale; use [`StoreAction::RecordTopic`] so the
/// ordering and size invariants hold.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConversationPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail_level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub focus_areas: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notifications: Option<NotificationSettings>,
}

/// A single, typed mutation of the store.
///
/// Uses adjacently tagged serialization (`"type"` + `"data"`), e.g.
/// `{"type": "ToggleAutomationRule", "data": {"id": 1}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum StoreAction {
    /// Merge counters and stamp a fresh `last_update`.
    UpdateCounters(CountersPatch),
    /// Overwrite the connection status.
    SetConnectionStatus(ConnectionStatus),
    /// Merge into an existing metric.
    UpdateMetric { key: String, patch: MetricPatch },
    /// Merge into the pipeline item with `id`.
    UpdatePipelineItem { id: u64, patch: PipelinePatch },
    /// Prepend a new pipeline item.
    AddPipelineItem(PipelineItem),
    /// Remove the pipeline item with `id`.
    RemovePipelineItem { id: u64 },
    /// Prepend an anomaly, evicting the oldest beyond the cap.
    AddAnomaly(Anomaly),
    /// Overwrite the status of the anomaly with `id`.
    UpdateAnomalyStatus { id: u64, status: AnomalyStatus },
    /// Flip `enabled` on the rule with `id`.
    ToggleAutomationRule { id: u64 },
    /// Merge assistant preferences.
    UpdateConversation(ConversationPatch),
    /// Move a topic to the front of the active topics.
    RecordTopic(String),
}

impl StoreAction {
    /// Short variant name used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UpdateCounters(_) => "update_counters",
            Self::SetConnectionStatus(_) => "set_connection_status",
            Self::UpdateMetric { .. } => "update_metric",
            Self::UpdatePipelineItem { .. } => "update_pipeline_item",
            Self::AddPipelineItem(_) => "add_pipeline_item",
            Self::RemovePipelineItem { .. } => "remove_pipeline_item",
            Self::AddAnomaly(_) => "add_anomaly",
            Self::UpdateAnomalyStatus { .. } => "update_anomaly_status",
            Self::ToggleAutomationRule { .. } => "toggle_automation_rule",
            Self::UpdateConversation(_) => "update_conversation",
            Self::RecordTopic(_) => "record_topic",
        }
    }

    /// Reject malformed payloads before they reach the state.
    ///
    /// Finite out-of-range percentages are accepted here and clamped on
    /// apply; only empty text and NaN/infinite numbers are rejected.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Self::UpdateCounters(_)
            | Self::SetConnectionStatus(_)
            | Self::RemovePipelineItem { .. }
            | Self::UpdateAnomalyStatus { .. }
            | Self::ToggleAutomationRule { .. } => Ok(()),
            Self::UpdateMetric { key, patch } => {
                non_empty("key", key)?;
                if let Some(value) = &patch.value {
                    finite_value("value", value)?;
                }
                if let Some(prediction) = &patch.prediction {
                    finite_value("prediction", prediction)?;
                }
                finite_opt("change", patch.change)?;
                finite_opt("confidence", patch.confidence)
            }
            Self::UpdatePipelineItem { patch, .. } => {
                if let Some(name) = &patch.name {
                    non_empty("name", name)?;
                }
                finite_opt("progress", patch.progress)?;
                finite_opt("ai_progress", patch.ai_progress)
            }
            Self::AddPipelineItem(item) => {
                non_empty("name", &item.name)?;
                finite("progress", item.progress)?;
                finite("ai_progress", item.ai_progress)
            }
            Self::AddAnomaly(anomaly) => {
                non_empty("description", &anomaly.description)?;
                finite("confidence", anomaly.confidence)
            }
            Self::UpdateConversation(patch) => match &patch.detail_level {
                Some(level) => non_empty("detail_level", level),
                None => Ok(()),
            },
            Self::RecordTopic(topic) => non_empty("topic", topic),
        }
    }

    /// Apply the action to `state`.
    ///
    /// Total for validated input: lookups on a missing id leave the state
    /// as it was and return [`ActionOutcome::Unaffected`]. `now` stamps the
    /// counters; the stored timestamp never moves backwards.
    pub fn apply(self, state: &mut StoreState, now: DateTime<Utc>) -> ActionOutcome {
        match self {
            Self::UpdateCounters(patch) => {
                let counters = &mut state.counters;
                if let Some(n) = patch.active_sessions {
                    counters.active_sessions = n;
                }
                if let Some(n) = patch.documents_in_flight {
                    counters.documents_in_flight = n;
                }
                if let Some(load) = patch.load_percent {
                    counters.load_percent = load.min(100);
                }
                counters.last_update = counters.last_update.max(now);
                ActionOutcome::Applied
            }

            Self::SetConnectionStatus(status) => {
                if state.connection_status == status {
                    return ActionOutcome::Unaffected;
                }
                state.connection_status = status;
                ActionOutcome::Applied
            }

            Self::UpdateMetric { key, patch } => {
                let Some(metric) = state.metrics.get_mut(&key) else {
                    return ActionOutcome::Unaffected;
                };
                if let Some(value) = patch.value {
                    metric.value = value;
                }
                if let Some(change) = patch.change {
                    metric.change = change;
                }
                if let Some(prediction) = patch.prediction {
                    metric.prediction = prediction;
                }
                if let Some(confidence) = patch.confidence {
                    metric.confidence = clamp_percent(confidence);
                }
                ActionOutcome::Applied
            }

            Self::UpdatePipelineItem { id, patch } => {
                let Some(item) = state.pipeline.iter_mut().find(|item| item.id == id) else {
                    return ActionOutcome::Unaffected;
                };
                if let Some(name) = patch.name {
                    item.name = name;
                }
                if let Some(stage) = patch.stage {
                    item.stage = stage;
                }
                if let Some(progress) = patch.progress {
                    item.progress = clamp_percent(progress);
                }
                if let Some(ai_progress) = patch.ai_progress {
                    item.ai_progress = clamp_percent(ai_progress);
                }
                if let Some(estimate) = patch.estimated_time {
                    item.estimated_time = estimate;
                }
                if let Some(priority) = patch.priority {
                    item.priority = priority;
                }
                ActionOutcome::Applied
            }

            Self::AddPipelineItem(mut item) => {
                if state.pipeline.iter().any(|existing| existing.id == item.id) {
                    return ActionOutcome::Unaffected;
                }
                item.progress = clamp_percent(item.progress);
                item.ai_progress = clamp_percent(item.ai_progress);
                state.pipeline.insert(0, item);
                ActionOutcome::Applied
            }

            Self::RemovePipelineItem { id } => {
                let before = state.pipeline.len();
                state.pipeline.retain(|item| item.id != id);
                if state.pipeline.len() == before {
                    ActionOutcome::Unaffected
                } else {
                    ActionOutcome::Applied
                }
            }

            Self::AddAnomaly(mut anomaly) => {
                anomaly.confidence = clamp_percent(anomaly.confidence);
                state.anomalies.insert(0, anomaly);
                state.anomalies.truncate(MAX_ANOMALIES);
                ActionOutcome::Applied
            }

            Self::UpdateAnomalyStatus { id, status } => {
                match state.anomalies.iter_mut().find(|a| a.id == id) {
                    Some(anomaly) if anomaly.status != status => {
                        anomaly.status = status;
                        ActionOutcome::Applied
                    }
                    _ => ActionOutcome::Unaffected,
                }
            }

            Self::ToggleAutomationRule { id } => {
                match state.automation_rules.iter_mut().find(|rule| rule.id == id) {
                    Some(rule) => {
                        rule.enabled = !rule.enabled;
                        ActionOutcome::Applied
                    }
                    None => ActionOutcome::Unaffected,
                }
            }

            Self::UpdateConversation(patch) => {
                let preferences = &mut state.conversation.preferences;
                let before = preferences.clone();
                if let Some(level) = patch.detail_level {
                    preferences.detail_level = level;
                }
                if let Some(areas) = patch.focus_areas {
                    preferences.focus_areas = areas;
                }
                if let Some(notifications) = patch.notifications {
                    preferences.notifications = notifications;
                }
                if *preferences == before {
                    ActionOutcome::Unaffected
                } else {
                    ActionOutcome::Applied
                }
            }

            Self::RecordTopic(topic) => {
                let topic = topic.trim().to_lowercase();
                let topics = &mut state.conversation.active_topics;
                if topics.first() == Some(&topic) {
                    return ActionOutcome::Unaffected;
                }
                topics.retain(|existing| *existing != topic);
                topics.insert(0, topic);
                topics.truncate(MAX_ACTIVE_TOPICS);
                ActionOutcome::Applied
            }
        }
    }
}

fn clamp_percent(value: f64) -> f64 {
    value.clamp(0.0, 100.0)
}

fn non_empty(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::Empty { field });
    }
    Ok(())
}

fn finite(field: &'static str, value: f64) -> Result<(), ValidationError> {
    if !value.is_finite() {
        return Err(ValidationError::NonFinite { field });
    }
    Ok(())
}

fn finite_opt(field: &'static str, value: Option<f64>) -> Result<(), ValidationError> {
    value.map_or(Ok(()), |v| finite(field, v))
}

fn finite_value(field: &'static str, value: &MetricValue) -> Result<(), ValidationError> {
    if !value.is_finite() {
        return Err(ValidationError::NonFinite { field });
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_fixtures {
    use chrono::Utc;

    use crate::model::{Anomaly, AnomalyKind, AnomalyStatus, PipelineItem, PipelineStage, Priority};

    /// An investigating anomaly with the given id.
    pub(crate) fn anomaly(id: u64) -> Anomaly {
        Anomaly {
            id,
            kind: AnomalyKind::UnusualPattern,
            severity: Priority::Low,
            description: format!("anomaly {id}"),
            confidence: 80.0,
            created_at: Utc::now(),
            status: AnomalyStatus::Investigating,
        }
    }

    /// A pipeline item in the given stage with no analysis progress.
    pub(crate) fn pipeline_item(id: u64, stage: PipelineStage) -> PipelineItem {
        PipelineItem {
            id,
            name: format!("doc-{id}.pdf"),
            stage,
            progress: 100.0,
            ai_progress: 0.0,
            estimated_time: "1 min".to_owned(),
            priority: Priority::Medium,
        }
    }
}
