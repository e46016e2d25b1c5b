//! Ticker integration tests

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{launch_campaign, utc, Harness, StubAdapter};
use herald::pipeline::ticker::TickEvent;
use herald::pipeline::{PipelineTicker, TickerConfig};
use herald::platforms::PlatformId;
use herald::task::{Stage, TaskStatus};

async fn launch_harness() -> Harness {
    // Every stage is due for every lead on the launch day
    let harness = Harness::builder(utc(2025, 3, 10, 1))
        .adapter(StubAdapter::ok(PlatformId::Webhook))
        .build();
    harness
        .orchestrator
        .create_campaign(launch_campaign([PlatformId::Webhook]))
        .await
        .unwrap();
    harness
}

#[tokio::test]
async fn test_single_tick_runs_stages_in_order() {
    let harness = launch_harness().await;
    let ticker = PipelineTicker::new(TickerConfig::default(), harness.orchestrator.clone()).unwrap();
    let mut events = ticker.subscribe();

    let reports = ticker.tick(1).await;
    let stages: Vec<_> = reports.iter().map(|r| r.stage).collect();
    assert_eq!(stages, vec![Stage::Schedule, Stage::Generate, Stage::Publish]);
    assert!(reports.iter().all(|r| r.advanced == 8 && r.failed == 0));

    let tasks = harness.orchestrator.list_tasks(&Default::default()).await.unwrap();
    assert_eq!(tasks.len(), 8);
    assert!(tasks.iter().all(|t| t.status == TaskStatus::Published));

    match events.recv().await.unwrap() {
        TickEvent::TickCompleted { tick, reports, .. } => {
            assert_eq!(tick, 1);
            assert_eq!(reports.len(), 3);
        }
        other => panic!("unexpected event: {other:?}"),
    }

    // Nothing left to do on the next tick
    let reports = ticker.tick(2).await;
    assert!(reports.iter().all(|r| r.advanced == 0));
}

#[tokio::test]
async fn test_configured_stages_only() {
    let harness = launch_harness().await;
    let config = TickerConfig::builder()
        .stages(vec![Stage::Schedule])
        .build()
        .unwrap();
    let ticker = PipelineTicker::new(config, harness.orchestrator.clone()).unwrap();

    let reports = ticker.tick(1).await;
    assert_eq!(reports.len(), 1);

    let tasks = harness.orchestrator.list_tasks(&Default::default()).await.unwrap();
    assert!(tasks.iter().all(|t| t.status == TaskStatus::Scheduled));
}

#[tokio::test]
async fn test_start_runs_on_startup_and_stops() {
    let harness = launch_harness().await;
    let ticker = Arc::new(
        PipelineTicker::new(TickerConfig::default(), harness.orchestrator.clone()).unwrap(),
    );
    let mut events = ticker.subscribe();

    let handle = tokio::spawn({
        let ticker = ticker.clone();
        async move { ticker.start().await }
    });

    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("first tick")
        .unwrap();
    assert!(matches!(event, TickEvent::TickCompleted { tick: 1, .. }));

    ticker.stop().await;
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("ticker stops")
        .unwrap()
        .unwrap();
    assert!(!ticker.is_running().await);
}
