// Aggregator service: message dispatch, tick loop, broadcast, intensity propagation, shutdown

mod common;

use carbonscope::aggregator::{
    self, Aggregator, AggregatorHandle, ServiceConfig, ServiceDeps, dispatch,
};
use carbonscope::error::PipelineError;
use carbonscope::models::{Request, Response, Sample};
use carbonscope::settings::IntensityStore;
use common::reading;
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Duration, sleep};

struct Running {
    handle: AggregatorHandle,
    join: JoinHandle<Aggregator>,
    samples_rx: broadcast::Receiver<Sample>,
    intensity_rx: watch::Receiver<f64>,
    shutdown_tx: oneshot::Sender<()>,
}

fn start(store: Option<IntensityStore>) -> Running {
    let (samples_tx, samples_rx) = broadcast::channel(16);
    let (intensity_tx, intensity_rx) = watch::channel(475.0);
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let (handle, join) = aggregator::spawn(
        ServiceDeps {
            aggregator: Aggregator::default(),
            store,
            samples_tx,
            intensity_tx,
            shutdown_rx,
        },
        ServiceConfig {
            tick_interval_ms: 1_000,
            mailbox_capacity: 8,
            stats_log_interval_secs: 3_600,
        },
    );
    Running {
        handle,
        join,
        samples_rx,
        intensity_rx,
        shutdown_tx,
    }
}

#[test]
fn test_dispatch_ping() {
    let mut agg = Aggregator::default();
    assert_eq!(
        dispatch(&mut agg, Request::Ping, 1_000),
        Response::Pong { alive: true }
    );
}

#[test]
fn test_dispatch_update_requires_source_id() {
    let mut agg = Aggregator::default();
    let response = dispatch(
        &mut agg,
        Request::UpdateMetrics {
            source_id: String::new(),
            reading: reading(1.0, 1.0, 1.0),
        },
        1_000,
    );
    assert!(!response.is_success());
    assert!(agg.sources().is_empty());
}

#[test]
fn test_dispatch_update_then_remove() {
    let mut agg = Aggregator::default();
    let update = Request::UpdateMetrics {
        source_id: "a".into(),
        reading: reading(10.0, 1.0, 0.0),
    };
    assert_eq!(dispatch(&mut agg, update, 1_000), Response::ack());
    assert_eq!(agg.sources().len(), 1);

    let remove = Request::RemoveSource {
        source_id: "a".into(),
    };
    assert_eq!(dispatch(&mut agg, remove.clone(), 1_500), Response::ack());
    assert_eq!(dispatch(&mut agg, remove, 1_600), Response::ack());
    assert!(agg.sources().is_empty());
}

#[test]
fn test_dispatch_rejects_bad_intensity() {
    let mut agg = Aggregator::default();
    let response = dispatch(&mut agg, Request::SetCo2Intensity { intensity: 2_000.0 }, 0);
    assert_eq!(response.error().map(|e| e.contains("invalid input")), Some(true));
    assert_eq!(agg.intensity(), 475.0);
}

#[test]
fn test_dispatch_current_reports_profiling_flag() {
    let mut agg = Aggregator::default();
    dispatch(&mut agg, Request::StartProfiling, 1_000);
    match dispatch(&mut agg, Request::GetCurrentMetrics, 1_500) {
        Response::Current {
            success,
            metrics,
            is_profiling,
        } => {
            assert!(success);
            assert!(is_profiling);
            assert_eq!(metrics, Sample::zero(1_500));
        }
        other => panic!("unexpected response {:?}", other),
    }
}

#[test]
fn test_dispatch_range_summary() {
    let mut agg = Aggregator::default();
    let response = dispatch(
        &mut agg,
        Request::GetRangeSummary {
            start_time: 1_000,
            end_time: 3_000,
        },
        5_000,
    );
    match response {
        Response::Range { summary, .. } => {
            assert_eq!(summary.sample_count, 0);
            assert_eq!(summary.range_duration, 2.0);
        }
        other => panic!("unexpected response {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_service_ticks_and_broadcasts_while_profiling() {
    let mut running = start(None);
    let h = &running.handle;
    assert_eq!(h.request(Request::StartProfiling).await.unwrap(), Response::ack());
    h.request(Request::UpdateMetrics {
        source_id: "a".into(),
        reading: reading(20.0, 10.0, 1.0),
    })
    .await
    .unwrap();

    sleep(Duration::from_millis(3_500)).await;

    let sample = running.samples_rx.recv().await.unwrap();
    assert_eq!(sample.source_metrics.source_count, 1);

    match h.request(Request::StopProfiling).await.unwrap() {
        Response::Summary { summary, .. } => assert!(summary.sample_count >= 3),
        other => panic!("unexpected response {:?}", other),
    }

    let _ = running.shutdown_tx.send(());
    let agg = running.join.await.unwrap();
    assert!(!agg.is_profiling());
}

#[tokio::test(start_paused = true)]
async fn test_service_idle_until_profiling_starts() {
    let running = start(None);
    sleep(Duration::from_millis(3_500)).await;
    match running.handle.request(Request::GetFullSummary).await.unwrap() {
        Response::Summary { summary, .. } => assert_eq!(summary.sample_count, 0),
        other => panic!("unexpected response {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_accepted_intensity_reaches_watchers() {
    let running = start(None);
    let response = running
        .handle
        .request(Request::SetCo2Intensity { intensity: 120.0 })
        .await
        .unwrap();
    assert_eq!(response, Response::ack());
    assert_eq!(*running.intensity_rx.borrow(), 120.0);

    let response = running
        .handle
        .request(Request::SetCo2Intensity { intensity: -3.0 })
        .await
        .unwrap();
    assert!(!response.is_success());
    assert_eq!(*running.intensity_rx.borrow(), 120.0);
}

#[tokio::test]
async fn test_accepted_intensity_is_persisted() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = IntensityStore::new(dir.path().join("settings.toml"));
    let running = start(Some(store.clone()));
    running
        .handle
        .request(Request::SetCo2Intensity { intensity: 250.0 })
        .await
        .unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    loop {
        if let Ok(Some(v)) = store.load() {
            assert_eq!(v, 250.0);
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "intensity was not persisted"
        );
        sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn test_handle_fails_after_shutdown() {
    let running = start(None);
    let _ = running.shutdown_tx.send(());
    running.join.await.unwrap();
    let err = running.handle.request(Request::Ping).await.unwrap_err();
    assert!(matches!(err, PipelineError::TransportUnavailable(_)));
    assert!(running.handle.is_closed());
}

#[tokio::test]
async fn test_rapid_intensity_updates_persist_the_last_value() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = IntensityStore::new(dir.path().join("settings.toml"));
    for round in 0..5 {
        let running = start(Some(store.clone()));
        for i in 0..50 {
            let response = running
                .handle
                .request(Request::SetCo2Intensity {
                    intensity: (round * 50 + i) as f64,
                })
                .await
                .unwrap();
            assert_eq!(response, Response::ack());
        }
        let _ = running.shutdown_tx.send(());
        running.join.await.unwrap();

        let expected = (round * 50 + 49) as f64;
        assert_eq!(store.load().unwrap(), Some(expected), "round {}", round);
    }
    assert!(!dir.path().join("settings.toml.tmp").exists());
}
