//! `GrpcFeedSource` against an in-process `RealtimeFeed` server.

use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use audit_pulse::proto::realtime_feed_server::{RealtimeFeed, RealtimeFeedServer};
use audit_pulse::proto::{self, feed_update, metric_value};
use audit_pulse::{
    AuditStore, ConnectionStatus, FeedConfig, GrpcFeedSource, MetricValue, RealtimeService,
};
use tokio_stream::wrappers::TcpListenerStream;
use tokio_stream::{Stream, StreamExt};
use tonic::{Request, Response, Status};

type UpdateStream = Pin<Box<dyn Stream<Item = Result<proto::FeedUpdate, Status>> + Send>>;

/// Streams a fixed script, then keeps the subscription open.
#[derive(Clone, Default)]
struct ScriptedFeed {
    sessions: Arc<Mutex<Vec<String>>>,
}

fn update(update: feed_update::Update) -> proto::FeedUpdate {
    proto::FeedUpdate {
        update: Some(update),
    }
}

#[tonic::async_trait]
impl RealtimeFeed for ScriptedFeed {
    type SubscribeStream = UpdateStream;

    async fn subscribe(
        &self,
        request: Request<proto::SubscribeRequest>,
    ) -> Result<Response<Self::SubscribeStream>, Status> {
        self.sessions
            .lock()
            .unwrap()
            .push(request.into_inner().session_id);
        let script = vec![
            update(feed_update::Update::Heartbeat(proto::Heartbeat {})),
            update(feed_update::Update::Counters(proto::Counters {
                active_sessions: 21,
                documents_in_flight: 4,
                load_percent: 55,
            })),
            update(feed_update::Update::Metric(proto::MetricUpdate {
                key: "risk_level".into(),
                value: Some(proto::MetricValue {
                    kind: Some(metric_value::Kind::Label("Medium".into())),
                }),
                ..proto::MetricUpdate::default()
            })),
        ];
        let stream: Self::SubscribeStream = Box::pin(
            tokio_stream::iter(script.into_iter().map(Ok::<_, Status>))
                .chain(tokio_stream::pending()),
        );
        Ok(Response::new(stream))
    }

    async fn ask(
        &self,
        request: Request<proto::AskRequest>,
    ) -> Result<Response<proto::AskReply>, Status> {
        let request = request.into_inner();
        Ok(Response::new(proto::AskReply {
            content: format!("Looked into: {}", request.prompt),
            confidence: 88.0,
            suggestions: request.active_topics,
        }))
    }
}

async fn serve(feed: ScriptedFeed) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(
        tonic::transport::Server::builder()
            .add_service(RealtimeFeedServer::new(feed))
            .serve_with_incoming(TcpListenerStream::new(listener)),
    );
    format!("http://{addr}")
}

async fn wait_for(store: &AuditStore, done: impl Fn(&AuditStore) -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !done(store) {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("store never reached the expected state");
}

#[tokio::test]
async fn streamed_updates_reach_the_store() {
    let feed = ScriptedFeed::default();
    let endpoint = serve(feed.clone()).await;
    let store = AuditStore::new();
    let source = GrpcFeedSource::new(FeedConfig {
        endpoint,
        ..FeedConfig::default()
    })
    .unwrap();
    let service = RealtimeService::builder()
        .store(store.clone())
        .source(source)
        .build();

    service.connect().await.unwrap();
    wait_for(&store, |s| s.get_state().counters.active_sessions == 21).await;

    let state = store.get_state();
    assert_eq!(state.connection_status, ConnectionStatus::Connected);
    assert_eq!(state.counters.load_percent, 55);
    assert_eq!(
        state.metrics["risk_level"].value,
        MetricValue::Label("Medium".into())
    );
    assert_eq!(
        *feed.sessions.lock().unwrap(),
        vec![state.conversation.session_id.clone()]
    );

    service.disconnect().await.unwrap();
    assert_eq!(store.connection_status(), ConnectionStatus::Disconnected);
    service.shutdown().await;
}

#[tokio::test]
async fn ask_round_trips_through_the_server() {
    let endpoint = serve(ScriptedFeed::default()).await;
    let store = AuditStore::new();
    let source = GrpcFeedSource::new(FeedConfig {
        endpoint,
        ..FeedConfig::default()
    })
    .unwrap();
    let service = RealtimeService::builder()
        .store(store.clone())
        .source(source)
        .build();

    let reply = service.send_message("Open Invoices").await.unwrap();
    assert_eq!(reply.content, "Looked into: Open Invoices");
    assert_eq!(reply.confidence, 88.0);
    // The server echoed the active topics it received.
    assert_eq!(reply.suggestions[0], "open invoices");
    service.shutdown().await;
}
