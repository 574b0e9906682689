//! The [`AuditStore`] context object: snapshot reads, typed dispatch and
//! selector-scoped subscriptions.
//!
//! The store is an explicitly constructed value rather than a global. Views
//! and the [`RealtimeService`](crate::RealtimeService) each hold a clone; all
//! clones share one state.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use chrono::Utc;

use crate::action::{
    ActionOutcome, ConversationPatch, CountersPatch, MetricPatch, PipelinePatch, StoreAction,
};
use crate::error::ValidationError;
use crate::model::{Anomaly, AnomalyStatus, ConnectionStatus, PipelineItem, StoreState};
use crate::selector::{self, Trend};

/// Type-erased subscriber. Implemented once, for [`SelectorWatcher`].
trait Watcher: Send + Sync {
    /// Re-evaluate against the newest snapshot in `state` and fire the
    /// callback on change.
    fn notify(&self, state: &RwLock<Arc<StoreState>>);
}

/// Remembers the last selected value so the callback only fires when the
/// selection changes by value.
struct SelectorWatcher<T, S, F> {
    selector: S,
    callback: F,
    last: Mutex<T>,
}

impl<T, S, F> Watcher for SelectorWatcher<T, S, F>
where
    T: Clone + PartialEq + Send + 'static,
    S: Fn(&StoreState) -> T + Send + Sync + 'static,
    F: Fn(&T, &T) + Send + Sync + 'static,
{
    fn notify(&self, state: &RwLock<Arc<StoreState>>) {
        let (current, previous) = {
            let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
            // Read under `last` so concurrent dispatchers never move it backwards.
            let snapshot = Arc::clone(&state.read().unwrap_or_else(PoisonError::into_inner));
            let current = (self.selector)(&snapshot);
            if *last == current {
                return;
            }
            let previous = std::mem::replace(&mut *last, current.clone());
            (current, previous)
        };
        // Lock released: the callback may dispatch back into the store.
        (self.callback)(&current, &previous);
    }
}

struct StoreInner {
    state: RwLock<Arc<StoreState>>,
    watchers: Mutex<Vec<(u64, Arc<dyn Watcher>)>>,
    next_watcher_id: AtomicU64,
}

/// Shared, reactive container for the dashboard state.
///
/// `Clone` is cheap -- all clones point at the same `Arc`-wrapped state.
/// Every mutation goes through [`dispatch`](AuditStore::dispatch) (or one
/// of the convenience methods that build the action for you), swaps in a
/// fresh snapshot, and notifies subscribers synchronously before returning.
#[derive(Clone)]
pub struct AuditStore {
    inner: Arc<StoreInner>,
}

impl fmt::Debug for AuditStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let subscribers = self
            .inner
            .watchers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        f.debug_struct("AuditStore")
            .field("connection_status", &self.connection_status())
            .field("subscribers", &subscribers)
            .finish()
    }
}

impl Default for AuditStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditStore {
    /// Create a store holding the dashboard's fixture state.
    pub fn new() -> Self {
        Self::with_state(StoreState::seeded())
    }

    /// Create a store holding `state`.
    ///
    /// Useful for tests and for running several isolated stores side by
    /// side.
    pub fn with_state(state: StoreState) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                state: RwLock::new(Arc::new(state)),
                watchers: Mutex::new(Vec::new()),
                next_watcher_id: AtomicU64::new(0),
            }),
        }
    }

    /// Current snapshot.
    ///
    /// The returned value is immutable: later actions build a new snapshot
    /// instead of changing this one.
    pub fn get_state(&self) -> Arc<StoreState> {
        Arc::clone(&self.inner.state.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Shorthand for `get_state().connection_status`.
    pub fn connection_status(&self) -> ConnectionStatus {
        self.inner
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .connection_status
    }

    /// Register `callback` to run whenever `selector`'s output changes.
    ///
    /// The selector is evaluated once immediately to capture the baseline;
    /// the callback is not invoked for it. After each applied action the
    /// selector is re-evaluated and, if the result differs from the last
    /// one, `callback(current, previous)` runs on the dispatching thread
    /// before `dispatch` returns.
    ///
    /// # Arguments
    ///
    /// * `selector` - Pure projection of the state, e.g.
    ///   [`selector::active_anomalies`].
    /// * `callback` - Receives the new and the previous selected values.
    ///
    /// # Returns
    ///
    /// A [`Subscription`]. Dropping it keeps the callback registered; call
    /// [`Subscription::unsubscribe`] to remove it.
    pub fn subscribe<T, S, F>(&self, selector: S, callback: F) -> Subscription
    where
        T: Clone + PartialEq + Send + 'static,
        S: Fn(&StoreState) -> T + Send + Sync + 'static,
        F: Fn(&T, &T) + Send + Sync + 'static,
    {
        let baseline = selector(&self.get_state());
        let watcher = Arc::new(SelectorWatcher {
            selector,
            callback,
            last: Mutex::new(baseline),
        });
        let id = self.inner.next_watcher_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .watchers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, watcher));
        Subscription {
            id,
            store: Arc::downgrade(&self.inner),
        }
    }

    /// Validate and apply `action`.
    ///
    /// # Returns
    ///
    /// [`ActionOutcome::Applied`] if the state changed (subscribers have
    /// been notified by the time this returns), or
    /// [`ActionOutcome::Unaffected`] if the action matched nothing.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] for a malformed payload. The state is
    /// not touched and no subscriber runs.
    pub fn dispatch(&self, action: StoreAction) -> Result<ActionOutcome, ValidationError> {
        if let Err(e) = action.validate() {
            tracing::debug!(action = action.kind(), error = %e, "rejected store action");
            return Err(e);
        }
        Ok(self.commit(action))
    }

    /// Apply a validated action and notify.
    fn commit(&self, action: StoreAction) -> ActionOutcome {
        let kind = action.kind();
        let outcome = {
            let mut guard = self.inner.state.write().unwrap_or_else(PoisonError::into_inner);
            let mut next = StoreState::clone(&guard);
            let outcome = action.apply(&mut next, Utc::now());
            if outcome.is_applied() {
                *guard = Arc::new(next);
            }
            outcome
        };
        tracing::debug!(action = kind, outcome = ?outcome, "dispatched store action");

        if outcome.is_applied() {
            self.notify();
        }
        outcome
    }

    fn notify(&self) {
        let watchers: Vec<Arc<dyn Watcher>> = self
            .inner
            .watchers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, watcher)| Arc::clone(watcher))
            .collect();
        for watcher in watchers {
            watcher.notify(&self.inner.state);
        }
    }

    // -- convenience actions ------------------------------------------------

    /// Merge new counter values and stamp `last_update`.
    pub fn update_real_time_counters(&self, patch: CountersPatch) -> ActionOutcome {
        self.commit(StoreAction::UpdateCounters(patch))
    }

    /// Overwrite the connection status.
    pub fn set_connection_status(&self, status: ConnectionStatus) -> ActionOutcome {
        self.commit(StoreAction::SetConnectionStatus(status))
    }

    /// Merge `patch` into the metric named `key`.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] for an empty key or non-finite numbers.
    pub fn update_metric(
        &self,
        key: impl Into<String>,
        patch: MetricPatch,
    ) -> Result<ActionOutcome, ValidationError> {
        self.dispatch(StoreAction::UpdateMetric {
            key: key.into(),
            patch,
        })
    }

    /// Merge `patch` into the pipeline item `id`.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] for an empty name or non-finite progress.
    pub fn update_pipeline_item(
        &self,
        id: u64,
        patch: PipelinePatch,
    ) -> Result<ActionOutcome, ValidationError> {
        self.dispatch(StoreAction::UpdatePipelineItem { id, patch })
    }

    /// Prepend a pipeline item. A duplicate id is [`ActionOutcome::Unaffected`].
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] for an empty name or non-finite progress.
    pub fn add_pipeline_item(&self, item: PipelineItem) -> Result<ActionOutcome, ValidationError> {
        self.dispatch(StoreAction::AddPipelineItem(item))
    }

    /// Drop the pipeline item with `id`; `Unaffected` if there is none.
    pub fn remove_pipeline_item(&self, id: u64) -> ActionOutcome {
        self.commit(StoreAction::RemovePipelineItem { id })
    }

    /// Prepend an anomaly, keeping the ten newest.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] for an empty description or a
    /// non-finite confidence.
    pub fn add_anomaly(&self, anomaly: Anomaly) -> Result<ActionOutcome, ValidationError> {
        self.dispatch(StoreAction::AddAnomaly(anomaly))
    }

    /// Set the status of anomaly `id`.
    pub fn update_anomaly_status(&self, id: u64, status: AnomalyStatus) -> ActionOutcome {
        self.commit(StoreAction::UpdateAnomalyStatus { id, status })
    }

    /// Flip `enabled` on automation rule `id`.
    pub fn toggle_automation_rule(&self, id: u64) -> ActionOutcome {
        self.commit(StoreAction::ToggleAutomationRule { id })
    }

    /// Merge assistant preferences.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] for an empty detail level.
    pub fn update_conversation(
        &self,
        patch: ConversationPatch,
    ) -> Result<ActionOutcome, ValidationError> {
        self.dispatch(StoreAction::UpdateConversation(patch))
    }

    /// Move `topic` (lower-cased) to the front of the active topics.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::Empty`] for a blank topic.
    pub fn record_topic(&self, topic: impl Into<String>) -> Result<ActionOutcome, ValidationError> {
        self.dispatch(StoreAction::RecordTopic(topic.into()))
    }

    // -- selectors ------------------------------------------------------------

    /// See [`selector::processing_progress_percent`].
    pub fn processing_progress_percent(&self) -> f64 {
        selector::processing_progress_percent(&self.get_state())
    }

    /// See [`selector::active_anomalies`].
    pub fn active_anomalies(&self) -> Vec<Anomaly> {
        selector::active_anomalies(&self.get_state())
    }

    /// See [`selector::prediction_trend`].
    pub fn prediction_trend(&self, metric: &str) -> Trend {
        selector::prediction_trend(&self.get_state(), metric)
    }
}

/// Registration returned by [`AuditStore::subscribe`].
///
/// Holds only a weak reference, so an outstanding subscription never keeps
/// a store alive.
#[derive(Debug)]
#[must_use = "call unsubscribe() to remove the callback"]
pub struct Subscription {
    id: u64,
    store: Weak<StoreInner>,
}

impl Subscription {
    /// Remove the callback. It will not run for any later action.
    pub fn unsubscribe(self) {
        if let Some(inner) = self.store.upgrade() {
            inner
                .watchers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|(id, _)| *id != self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::action::test_fixtures::anomaly;
    use crate::model::MAX_ANOMALIES;

    type Seen<T> = Arc<Mutex<Vec<(T, T)>>>;

    fn collector<T: Clone + Send + 'static>() -> (Seen<T>, impl Fn(&T, &T) + Send + Sync + 'static)
    {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback = move |current: &T, previous: &T| {
            sink.lock().unwrap().push((current.clone(), previous.clone()));
        };
        (seen, callback)
    }

    #[test]
    fn snapshot_is_immutable() {
        let store = AuditStore::new();
        let before = store.get_state();
        store.toggle_automation_rule(1);
        let after = store.get_state();

        assert!(before.automation_rules[0].enabled);
        assert!(!after.automation_rules[0].enabled);
    }

    #[test]
    fn stores_are_isolated() {
        let a = AuditStore::new();
        let b = AuditStore::new();
        a.set_connection_status(ConnectionStatus::Connected);
        assert_eq!(b.connection_status(), ConnectionStatus::Disconnected);
    }

    #[test]
    fn clones_share_state() {
        let a = AuditStore::new();
        let b = a.clone();
        a.set_connection_status(ConnectionStatus::Connecting);
        assert_eq!(b.connection_status(), ConnectionStatus::Connecting);
    }

    #[test]
    fn subscriber_fires_with_current_and_previous() {
        let store = AuditStore::new();
        let (seen, callback) = collector();
        let _sub = store.subscribe(|s: &StoreState| s.connection_status, callback);

        store.set_connection_status(ConnectionStatus::Connecting);
        store.set_connection_status(ConnectionStatus::Connected);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                (ConnectionStatus::Connecting, ConnectionStatus::Disconnected),
                (ConnectionStatus::Connected, ConnectionStatus::Connecting),
            ]
        );
    }

    #[test]
    fn subscriber_ignores_unrelated_changes() {
        let store = AuditStore::new();
        let (seen, callback) = collector();
        let _sub = store.subscribe(|s: &StoreState| s.connection_status, callback);

        store.toggle_automation_rule(1);
        store.record_topic("payroll").unwrap();

        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn rejected_action_changes_nothing() {
        let store = AuditStore::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let _sub = store.subscribe(
            |s: &StoreState| s.clone(),
            move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
            },
        );
        let before = store.get_state();

        let err = store.record_topic("  ").unwrap_err();
        assert_eq!(err, ValidationError::Empty { field: "topic" });
        assert_eq!(*store.get_state(), *before);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unaffected_action_keeps_snapshot_identity() {
        let store = AuditStore::new();
        let before = store.get_state();
        let outcome = store
            .update_pipeline_item(
                999,
                PipelinePatch {
                    progress: Some(10.0),
                    ..PipelinePatch::default()
                },
            )
            .unwrap();
        assert_eq!(outcome, ActionOutcome::Unaffected);
        assert!(Arc::ptr_eq(&before, &store.get_state()));
    }

    #[test]
    fn unsubscribe_stops_notifications() {
        let store = AuditStore::new();
        let (seen, callback) = collector();
        let sub = store.subscribe(|s: &StoreState| s.connection_status, callback);

        store.set_connection_status(ConnectionStatus::Connecting);
        sub.unsubscribe();
        store.set_connection_status(ConnectionStatus::Connected);

        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn dropping_subscription_keeps_callback() {
        let store = AuditStore::new();
        let (seen, callback) = collector();
        drop(store.subscribe(|s: &StoreState| s.connection_status, callback));

        store.set_connection_status(ConnectionStatus::Error);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn independent_subscribers_all_fire() {
        let store = AuditStore::new();
        let (status_seen, on_status) = collector();
        let (anomaly_seen, on_anomalies) = collector();
        let _a = store.subscribe(|s: &StoreState| s.connection_status, on_status);
        let _b = store.subscribe(|s: &StoreState| s.anomalies.len(), on_anomalies);

        store.add_anomaly(anomaly(42)).unwrap();

        assert!(status_seen.lock().unwrap().is_empty());
        assert_eq!(*anomaly_seen.lock().unwrap(), vec![(3, 2)]);
    }

    #[test]
    fn callback_may_dispatch_without_deadlock() {
        let store = AuditStore::new();
        let inner_store = store.clone();
        let _sub = store.subscribe(
            |s: &StoreState| s.connection_status,
            move |current, _| {
                if *current == ConnectionStatus::Connected {
                    inner_store.record_topic("reconnected").unwrap();
                }
            },
        );

        store.set_connection_status(ConnectionStatus::Connected);
        assert_eq!(store.get_state().conversation.active_topics[0], "reconnected");
    }

    #[test]
    fn resolved_anomaly_leaves_active_selector() {
        let store = AuditStore::new();
        assert!(store.active_anomalies().iter().any(|a| a.id == 1));
        store.update_anomaly_status(1, AnomalyStatus::Resolved);
        assert!(store.active_anomalies().iter().all(|a| a.id != 1));
    }

    #[test]
    fn anomaly_cap_holds_through_store() {
        let store = AuditStore::with_state(StoreState::default());
        for id in 0..25 {
            store.add_anomaly(anomaly(id)).unwrap();
        }
        let state = store.get_state();
        assert_eq!(state.anomalies.len(), MAX_ANOMALIES);
        assert_eq!(state.anomalies[0].id, 24);
    }

    #[test]
    fn concurrent_dispatch_is_serialized() {
        let store = AuditStore::with_state(StoreState::default());
        let threads: Vec<_> = (0..8)
            .map(|t| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        store.record_topic(format!("topic-{t}-{i}")).unwrap();
                    }
                })
            })
            .collect();
        for handle in threads {
            handle.join().unwrap();
        }
        let topics = &store.get_state().conversation.active_topics;
        assert_eq!(topics.len(), 5);
    }

    #[test]
    fn concurrent_notifications_never_go_backwards() {
        let store = AuditStore::with_state(StoreState::default());
        let (seen, callback) = collector();
        let _ = store.subscribe(|s: &StoreState| s.counters.last_update, callback);

        let threads: Vec<_> = (0..8u32)
            .map(|t| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        store.update_real_time_counters(CountersPatch {
                            active_sessions: Some(t * 1000 + i),
                            ..CountersPatch::default()
                        });
                    }
                })
            })
            .collect();
        for handle in threads {
            handle.join().unwrap();
        }

        let seen = seen.lock().unwrap();
        assert!(!seen.is_empty());
        for (current, previous) in seen.iter() {
            assert!(current > previous, "{previous} -> {current}");
        }
    }

    #[test]
    fn store_selectors_match_free_functions() {
        let store = AuditStore::new();
        let state = store.get_state();
        assert_eq!(
            store.processing_progress_percent(),
            selector::processing_progress_percent(&state)
        );
        assert_eq!(
            store.prediction_trend("documents"),
            selector::prediction_trend(&state, "documents")
        );
    }

    // The store is shared across tasks and threads.
    const _: () = {
        #[allow(dead_code)]
        fn assert_send_sync<T: Send + Sync>() {}

        #[allow(dead_code)]
        fn check() {
            assert_send_sync::<AuditStore>();
            assert_send_sync::<Subscription>();
        }
    };
}
