//! Drives a store from the real-time service and prints what a dashboard
//! would render.
//!
//! Run with: `cargo run --example live_dashboard`
//!
//! Uses the built-in simulator unless `AUDIT_PULSE_ENDPOINT` is set, in
//! which case it subscribes to that `RealtimeFeed` gRPC server instead.
//! Log output is controlled by `AUDIT_PULSE_LOG` (falling back to
//! `RUST_LOG`, then `info`).

use std::time::Duration;

use audit_pulse::{
    AuditStore, ENDPOINT_ENV, FeedConfig, GrpcFeedSource, RealtimeService, StoreState, selector,
};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = std::env::var("AUDIT_PULSE_LOG")
        .ok()
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let store = AuditStore::new();

    // -- Views subscribe to the slices they render --------------------------

    let status = store.subscribe(
        |s: &StoreState| s.connection_status,
        |current, previous| println!("connection: {previous} -> {current}"),
    );
    let counters = store.subscribe(
        |s: &StoreState| {
            let c = &s.counters;
            (c.active_sessions, c.documents_in_flight, c.load_percent)
        },
        |(sessions, docs, load), _| {
            println!("live: {sessions} sessions, {docs} documents in flight, {load}% load");
        },
    );
    let anomalies = store.subscribe(selector::active_anomalies, |current, previous| {
        if current.len() > previous.len()
            && let Some(newest) = current.first()
        {
            println!(
                "anomaly #{}: {} ({}, {:.0}% confidence)",
                newest.id,
                newest.description,
                newest.severity.as_str(),
                newest.confidence
            );
        }
    });

    // -- Service -----------------------------------------------------------

    let builder = RealtimeService::builder().store(store.clone());
    let builder = if std::env::var(ENDPOINT_ENV).is_ok() {
        let config = FeedConfig::from_env();
        println!("using feed at {}", config.endpoint);
        builder.source(GrpcFeedSource::new(config)?)
    } else {
        builder
    };
    let service = builder.build();

    service.connect().await?;

    let trend = store.prediction_trend("documents");
    println!(
        "pipeline {:.0}% complete, documents trending {} {}%",
        store.processing_progress_percent(),
        trend.direction,
        trend.percentage
    );

    let reply = service
        .send_message("Which compliance areas need attention?")
        .await?;
    println!("assistant ({:.0}%): {}", reply.confidence, reply.content);
    for suggestion in &reply.suggestions {
        println!("  - {suggestion}");
    }

    tokio::time::sleep(Duration::from_secs(10)).await;

    service.disconnect().await?;
    println!(
        "active topics: {}",
        store.get_state().conversation.active_topics.join(", ")
    );

    status.unsubscribe();
    counters.unsubscribe();
    anomalies.unsubscribe();
    service.shutdown().await;
    Ok(())
}
