//! Property tests for the store's structural invariants.

use audit_pulse::{
    Anomaly, AnomalyKind, AnomalyStatus, AuditStore, CountersPatch, MAX_ACTIVE_TOPICS,
    MAX_ANOMALIES, PipelinePatch, Priority, StoreState,
};
use chrono::Utc;
use proptest::prelude::*;

fn anomaly(id: u64, confidence: f64) -> Anomaly {
    Anomaly {
        id,
        kind: AnomalyKind::DataInconsistency,
        severity: Priority::Medium,
        description: format!("anomaly {id}"),
        confidence,
        created_at: Utc::now(),
        status: AnomalyStatus::Investigating,
    }
}

proptest! {
    #[test]
    fn anomalies_are_capped_newest_first(ids in prop::collection::vec(any::<u64>(), 0..40)) {
        let store = AuditStore::with_state(StoreState::default());
        for &id in &ids {
            store.add_anomaly(anomaly(id, 80.0)).unwrap();
        }
        let state = store.get_state();
        prop_assert!(state.anomalies.len() <= MAX_ANOMALIES);

        let expected: Vec<u64> = ids.iter().rev().take(MAX_ANOMALIES).copied().collect();
        let actual: Vec<u64> = state.anomalies.iter().map(|a| a.id).collect();
        prop_assert_eq!(actual, expected);
    }

    #[test]
    fn anomaly_confidence_is_clamped(confidence in -1.0e6f64..1.0e6) {
        let store = AuditStore::with_state(StoreState::default());
        store.add_anomaly(anomaly(1, confidence)).unwrap();
        let stored = store.get_state().anomalies[0].confidence;
        prop_assert!((0.0..=100.0).contains(&stored));
    }

    #[test]
    fn toggling_twice_is_identity(id in 1u64..=2) {
        let store = AuditStore::new();
        let before = store.get_state();
        store.toggle_automation_rule(id);
        store.toggle_automation_rule(id);
        prop_assert_eq!(&store.get_state().automation_rules, &before.automation_rules);
    }

    #[test]
    fn pipeline_progress_is_clamped(progress in -1.0e6f64..1.0e6, ai in -1.0e6f64..1.0e6) {
        let store = AuditStore::new();
        store
            .update_pipeline_item(2, PipelinePatch {
                progress: Some(progress),
                ai_progress: Some(ai),
                ..PipelinePatch::default()
            })
            .unwrap();
        let state = store.get_state();
        let item = state.pipeline.iter().find(|i| i.id == 2).unwrap();
        prop_assert!((0.0..=100.0).contains(&item.progress));
        prop_assert!((0.0..=100.0).contains(&item.ai_progress));
    }

    #[test]
    fn topics_stay_bounded_unique_lowercase(topics in prop::collection::vec("[A-Za-z ]{0,12}", 0..30)) {
        let store = AuditStore::new();
        for topic in &topics {
            // Blank topics are rejected; the rest must keep the invariants.
            let _ = store.record_topic(topic.as_str());
        }
        let state = store.get_state();
        let active = &state.conversation.active_topics;
        prop_assert!(active.len() <= MAX_ACTIVE_TOPICS);
        for (i, topic) in active.iter().enumerate() {
            prop_assert_eq!(topic, &topic.to_lowercase());
            prop_assert!(!active[i + 1..].contains(topic));
        }
    }

    #[test]
    fn counters_timestamp_never_decreases(loads in prop::collection::vec(any::<u8>(), 1..20)) {
        let store = AuditStore::new();
        let mut last = store.get_state().counters.last_update;
        for load in loads {
            store.update_real_time_counters(CountersPatch {
                load_percent: Some(load),
                ..CountersPatch::default()
            });
            let counters = store.get_state().counters.clone();
            prop_assert!(counters.last_update >= last);
            prop_assert!(counters.load_percent <= 100);
            last = counters.last_update;
        }
    }
}
