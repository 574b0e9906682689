//! Timer-driven stand-in for a real-time backend.
//!
//! After a short handshake the simulator emits one batch per tick: fresh
//! counters, occasionally a synthetic anomaly, and progress for documents
//! under analysis. Assistant questions get one of a few canned answers after
//! a randomized delay. All randomness comes from one seedable [`StdRng`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::IntervalStream;

use crate::action::{CountersPatch, PipelinePatch, StoreAction};
use crate::error::SourceError;
use crate::model::{
    Anomaly, AnomalyKind, AnomalyStatus, ConversationContext, PipelineStage, Priority, StoreState,
};
use crate::source::{AssistantReply, RealtimeSource, UpdateStream};
use crate::store::AuditStore;

const ANOMALY_DESCRIPTION: &str = "Detected during real-time monitoring";

/// Timing and randomness knobs for [`SimulatedSource`].
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use audit_pulse::SimulatorConfig;
///
/// let config = SimulatorConfig {
///     tick_interval: Duration::from_millis(500),
///     seed: Some(7),
///     ..SimulatorConfig::default()
/// };
/// assert_eq!(config.handshake_delay, Duration::from_secs(1));
/// ```
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Time before `open` reports a successful handshake.
    ///
    /// Default: 1 second.
    pub handshake_delay: Duration,

    /// Period between update batches. The first batch arrives one period
    /// after the handshake.
    ///
    /// Default: 3 seconds.
    pub tick_interval: Duration,

    /// Chance per tick of emitting an anomaly, in `0.0..=1.0`.
    ///
    /// Default: 0.1.
    pub anomaly_probability: f64,

    /// Lower bound of the assistant reply delay.
    ///
    /// Default: 1.5 seconds.
    pub reply_delay_min: Duration,

    /// Upper bound (exclusive) of the assistant reply delay.
    ///
    /// Default: 2.5 seconds.
    pub reply_delay_max: Duration,

    /// Fixed RNG seed. `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            handshake_delay: Duration::from_secs(1),
            tick_interval: Duration::from_secs(3),
            anomaly_probability: 0.1,
            reply_delay_min: Duration::from_millis(1500),
            reply_delay_max: Duration::from_millis(2500),
            seed: None,
        }
    }
}

/// The default [`RealtimeSource`]: synthetic updates on a timer.
///
/// `Clone` is cheap; clones share the RNG and the anomaly id counter.
#[derive(Debug, Clone)]
pub struct SimulatedSource {
    config: SimulatorConfig,
    rng: Arc<Mutex<StdRng>>,
    next_anomaly_id: Arc<AtomicU64>,
}

impl Default for SimulatedSource {
    fn default() -> Self {
        Self::new(SimulatorConfig::default())
    }
}

impl SimulatedSource {
    /// Seed the generator from `config.seed`, or from OS entropy if unset.
    pub fn new(config: SimulatorConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        // Millisecond ids keep synthetic anomalies clear of small fixture ids.
        let first_id = u64::try_from(Utc::now().timestamp_millis()).unwrap_or(1_000_000);
        Self {
            config,
            rng: Arc::new(Mutex::new(rng)),
            next_anomaly_id: Arc::new(AtomicU64::new(first_id)),
        }
    }

    /// The configuration this source was built with.
    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    /// Build one update batch against `state`.
    pub(crate) fn tick(&self, state: &StoreState) -> Vec<StoreAction> {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        let mut batch = vec![StoreAction::UpdateCounters(CountersPatch {
            active_sessions: Some(rng.gen_range(5..25)),
            documents_in_flight: Some(rng.gen_range(1..9)),
            load_percent: Some(rng.gen_range(30..70)),
        })];

        let probability = self.config.anomaly_probability;
        let probability = if probability.is_finite() {
            probability.clamp(0.0, 1.0)
        } else {
            0.0
        };
        if rng.gen_bool(probability) {
            let anomaly = Anomaly {
                id: self.next_anomaly_id.fetch_add(1, Ordering::Relaxed),
                kind: AnomalyKind::ALL[rng.gen_range(0..AnomalyKind::ALL.len())],
                severity: Priority::ALL[rng.gen_range(0..Priority::ALL.len())],
                description: ANOMALY_DESCRIPTION.to_owned(),
                confidence: rng.gen_range(70.0..100.0),
                created_at: Utc::now(),
                status: AnomalyStatus::Investigating,
            };
            tracing::debug!(id = anomaly.id, kind = anomaly.kind.as_str(), "simulated anomaly");
            batch.push(StoreAction::AddAnomaly(anomaly));
        }

        for item in &state.pipeline {
            if item.stage == PipelineStage::Analysis && item.ai_progress < 100.0 {
                let ai_progress = (item.ai_progress + rng.gen_range(0.0..15.0)).min(100.0);
                batch.push(StoreAction::UpdatePipelineItem {
                    id: item.id,
                    patch: PipelinePatch {
                        ai_progress: Some(ai_progress),
                        ..PipelinePatch::default()
                    },
                });
            }
        }
        batch
    }

    fn reply_delay(&self, rng: &mut StdRng) -> Duration {
        let (min, max) = (self.config.reply_delay_min, self.config.reply_delay_max);
        if max <= min {
            return min;
        }
        rng.gen_range(min..max)
    }
}

/// One of the canned assistant answers, quoting `prompt`.
fn canned_reply(choice: usize, prompt: &str) -> AssistantReply {
    let (content, confidence, suggestions) = match choice {
        0 => (
            format!(
                "I've analyzed your query: \"{prompt}\". Based on current audit data, I recommend \
                 focusing on the compliance areas showing recent variations."
            ),
            92.0,
            [
                "Review compliance reports",
                "Check risk assessments",
                "Analyze trend patterns",
            ],
        ),
        1 => (
            format!(
                "Regarding \"{prompt}\" - I've detected 3 related patterns in your documents. \
                 The AI confidence is high for automated recommendations."
            ),
            88.0,
            [
                "Generate detailed report",
                "Set up monitoring alerts",
                "Schedule follow-up review",
            ],
        ),
        _ => (
            format!(
                "Processing \"{prompt}\"... Found correlations with risk management protocols. \
                 Suggested actions have been prioritized by impact."
            ),
            94.0,
            [
                "Update risk matrix",
                "Notify stakeholders",
                "Implement mitigation steps",
            ],
        ),
    };
    AssistantReply {
        content,
        confidence,
        suggestions: suggestions.iter().map(|s| (*s).to_owned()).collect(),
        created_at: Utc::now(),
    }
}

#[tonic::async_trait]
impl RealtimeSource for SimulatedSource {
    fn name(&self) -> &'static str {
        "simulator"
    }

    async fn open(&self, store: &AuditStore) -> Result<UpdateStream, SourceError> {
        tokio::time::sleep(self.config.handshake_delay).await;

        let period = self.config.tick_interval.max(Duration::from_millis(1));
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let source = self.clone();
        let store = store.clone();
        let updates = IntervalStream::new(interval)
            .map(move |_| Ok::<_, SourceError>(source.tick(&store.get_state())));
        Ok(Box::pin(updates))
    }

    async fn ask(
        &self,
        prompt: &str,
        _context: &ConversationContext,
    ) -> Result<AssistantReply, SourceError> {
        let (delay, choice) = {
            let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
            let delay = self.reply_delay(&mut rng);
            (delay, rng.gen_range(0..3))
        };
        tokio::time::sleep(delay).await;
        Ok(canned_reply(choice, prompt))
    }
}
