// Producer: signal collection, isolation of failing signals, page-local estimate, detach

mod common;

use carbonscope::channel::{ChannelConfig, ResilientChannel};
use carbonscope::estimation;
use carbonscope::models::Request;
use carbonscope::producer::{
    self, NavigationMarks, Producer, ProducerConfig, ProducerDeps, ResourceEvent, ResourceKind,
    Signal, SignalError, domain_of,
};
use common::{FakeMemory, ScriptedTransport};
use tokio::sync::watch;
use tokio::time::{Duration, Instant, sleep};

fn config() -> ProducerConfig {
    ProducerConfig {
        source_id: "tab-1".into(),
        url: "https://Example.com:8443/path?q=1".into(),
        frame_interval_ms: 0,
        ..ProducerConfig::default()
    }
}

fn resource(at_ms: u64) -> Signal {
    Signal::Resource(ResourceEvent {
        kind: ResourceKind::Resource,
        name: "script.js".into(),
        at_ms,
    })
}

#[test]
fn test_domain_of_strips_scheme_port_and_path() {
    assert_eq!(domain_of("https://Example.com:8443/path?q=1"), "example.com");
    assert_eq!(domain_of("http://user:pw@host.local/x"), "host.local");
    assert_eq!(domain_of("app://carbonscope"), "carbonscope");
    assert_eq!(domain_of(""), "");
}

#[test]
fn test_cpu_proxy_from_frame_rate() {
    let mut p = Producer::new(&config());
    let start = Instant::now();
    for i in 0..30 {
        p.observe(Signal::Frame(start + Duration::from_millis(i * 30)));
    }
    let now = start + Duration::from_millis(900);
    let reading = p.sample(1_000, now, estimation::DEFAULT_CO2_INTENSITY);
    assert_eq!(reading.cpu_percent, 50.0);
    assert!(!reading.defaulted.cpu);
}

#[test]
fn test_cpu_proxy_caps_at_100() {
    let mut p = Producer::new(&config());
    let start = Instant::now();
    for i in 0..120 {
        p.observe(Signal::Frame(start + Duration::from_millis(i * 5)));
    }
    let reading = p.sample(1_000, start + Duration::from_millis(600), 475.0);
    assert_eq!(reading.cpu_percent, 100.0);
}

#[test]
fn test_no_frames_defaults_cpu_only() {
    let mut p = Producer::new(&config());
    p.record_memory(1_000, Ok(64 * 1024 * 1024));
    let reading = p.sample(1_000, Instant::now(), 475.0);
    assert_eq!(reading.cpu_percent, 0.0);
    assert!(reading.defaulted.cpu);
    assert!(!reading.defaulted.memory);
    assert_eq!(reading.memory_mb, 64.0);
}

#[test]
fn test_memory_failure_does_not_affect_other_signals() {
    let mut p = Producer::new(&config());
    p.record_memory(1_000, Err(SignalError::Unavailable("memory")));
    let start = Instant::now();
    for i in 0..6 {
        p.observe(Signal::Frame(start + Duration::from_millis(i * 100)));
    }
    p.observe(resource(900));
    let reading = p.sample(1_000, start + Duration::from_millis(600), 475.0);
    assert_eq!(reading.memory_mb, 0.0);
    assert!(reading.defaulted.memory);
    assert_eq!(reading.cpu_percent, 10.0);
    assert_eq!(reading.network_count, 1.0);
}

#[test]
fn test_memory_recovers_after_failure() {
    let mut p = Producer::new(&config());
    p.record_memory(
        1_000,
        Err(SignalError::Failed {
            signal: "memory",
            reason: "process gone".into(),
        }),
    );
    assert!(p.sample(1_000, Instant::now(), 475.0).defaulted.memory);

    p.record_memory(2_000, Ok(2 * 1024 * 1024));
    let reading = p.sample(2_000, Instant::now(), 475.0);
    assert_eq!(reading.memory_mb, 2.0);
    assert!(!reading.defaulted.memory);
    assert_eq!(p.memory_history().len(), 1);
}

#[test]
fn test_network_count_uses_last_minute_only() {
    let mut p = Producer::new(&config());
    for at in [0, 50_000, 100_000] {
        p.observe(resource(at));
    }
    let reading = p.sample(110_000, Instant::now(), 475.0);
    assert_eq!(reading.network_count, 2.0);
    assert_eq!(p.network().len(), 3);
}

#[test]
fn test_signal_buffers_are_bounded() {
    let mut p = Producer::new(&config());
    for at in 0..1_100 {
        p.observe(resource(at));
    }
    assert_eq!(p.network().len(), 1_000);
    for ts in 1..=150 {
        p.sample(ts * 1_000, Instant::now(), 475.0);
    }
    assert_eq!(p.cpu_history().len(), 100);
    assert_eq!(p.cpu_history().latest().map(|(ts, _)| *ts), Some(150_000));
}

#[test]
fn test_navigation_timings_reported() {
    let mut p = Producer::new(&config());
    let r = p.sample(1_000, Instant::now(), 475.0);
    assert!(r.defaulted.timings);

    p.observe(Signal::Navigation(NavigationMarks {
        navigation_start: Some(10_000),
        dom_interactive: Some(10_300),
        dom_content_loaded: Some(10_400),
        load_event_end: Some(11_000),
    }));
    let r = p.sample(12_000, Instant::now(), 475.0);
    assert!(!r.defaulted.timings);
    assert_eq!(r.timings.interactive_ms, 300.0);
    assert_eq!(r.timings.dom_ready_ms, 400.0);
    assert_eq!(r.timings.load_ms, 1_000.0);
}

#[test]
fn test_reading_carries_identity() {
    let mut p = Producer::new(&config());
    let r = p.sample(5_000, Instant::now(), 475.0);
    assert_eq!(r.source_id, "tab-1");
    assert_eq!(r.timestamp, 5_000);
    assert_eq!(r.domain, "example.com");
}

#[test]
fn test_page_estimate_accumulates_elapsed_energy() {
    let mut p = Producer::new(&config());
    p.sample(1_000, Instant::now(), 475.0);
    let first = p.estimate();
    assert_eq!(first.samples, 1);
    assert_eq!(first.energy_wh, 0.0);
    assert_eq!(first.power_w, estimation::local::BASE_W);

    p.sample(2_000, Instant::now(), 475.0);
    let second = p.estimate();
    let expected_wh = estimation::local::BASE_W / 3600.0;
    assert!((second.energy_wh - expected_wh).abs() < 1e-12);
    assert!((second.co2e_g - expected_wh / 1000.0 * 475.0).abs() < 1e-12);
}

#[tokio::test(start_paused = true)]
async fn test_spawned_producer_delivers_and_detach_removes_source() {
    let transport = ScriptedTransport::up();
    let (_intensity_tx, intensity_rx) = watch::channel(475.0);
    let handle = producer::spawn(
        ProducerDeps {
            channel: ResilientChannel::new(transport.clone(), ChannelConfig::default()),
            memory: Box::new(FakeMemory::new(1024 * 1024)),
            intensity_rx,
        },
        ProducerConfig {
            sample_interval_ms: 1_000,
            ..config()
        },
    );
    assert_eq!(handle.source_id(), "tab-1");

    sleep(Duration::from_millis(2_500)).await;
    assert!(handle.estimate().samples >= 2);
    handle.detach().await;

    let calls = transport.calls();
    let updates = calls
        .iter()
        .filter(|r| matches!(r, Request::UpdateMetrics { .. }))
        .count();
    assert!(updates >= 2, "expected periodic updates, got {}", updates);
    assert_eq!(
        calls.last(),
        Some(&Request::RemoveSource {
            source_id: "tab-1".into()
        })
    );
}

#[tokio::test(start_paused = true)]
async fn test_detach_while_disconnected_still_completes() {
    let transport = ScriptedTransport::down();
    let (_intensity_tx, intensity_rx) = watch::channel(475.0);
    let handle = producer::spawn(
        ProducerDeps {
            channel: ResilientChannel::new(transport.clone(), ChannelConfig::default()),
            memory: Box::new(FakeMemory::new(0)),
            intensity_rx,
        },
        config(),
    );
    sleep(Duration::from_millis(3_500)).await;
    handle.detach().await;

    let pings = transport.pings();
    sleep(Duration::from_secs(120)).await;
    assert_eq!(transport.pings(), pings, "reconnection stopped on detach");
}

#[tokio::test(start_paused = true)]
async fn test_host_signals_reach_the_producer() {
    let transport = ScriptedTransport::up();
    let (_intensity_tx, intensity_rx) = watch::channel(475.0);
    let handle = producer::spawn(
        ProducerDeps {
            channel: ResilientChannel::new(transport.clone(), ChannelConfig::default()),
            memory: Box::new(FakeMemory::new(0)),
            intensity_rx,
        },
        config(),
    );
    let now_ms = carbonscope::clock::now_ms();
    handle.signals().send(resource(now_ms)).await.unwrap();
    sleep(Duration::from_millis(1_500)).await;
    handle.detach().await;

    let saw_network = transport.delivered().iter().any(|r| match r {
        Request::UpdateMetrics { reading, .. } => reading.network_count >= 1.0,
        _ => false,
    });
    assert!(saw_network);
}

fn memory_readings(transport: &ScriptedTransport) -> Vec<(f64, bool)> {
    transport
        .delivered()
        .iter()
        .filter_map(|r| match r {
            Request::UpdateMetrics { reading, .. } => {
                Some((reading.memory_mb, reading.defaulted.memory))
            }
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_spawned_producer_reads_memory_on_its_own_schedule() {
    let transport = ScriptedTransport::up();
    let memory = FakeMemory::new(3 * 1024 * 1024);
    let (_intensity_tx, intensity_rx) = watch::channel(475.0);
    let handle = producer::spawn(
        ProducerDeps {
            channel: ResilientChannel::new(transport.clone(), ChannelConfig::default()),
            memory: Box::new(memory.clone()),
            intensity_rx,
        },
        ProducerConfig {
            sample_interval_ms: 1_000,
            memory_interval_ms: 2_000,
            ..config()
        },
    );
    sleep(Duration::from_millis(500)).await;
    assert_eq!(memory_readings(&transport).first(), Some(&(3.0, false)));

    // Next memory read at 2 s; the 3 s sample is the first to carry it.
    memory
        .bytes
        .store(5 * 1024 * 1024, std::sync::atomic::Ordering::SeqCst);
    sleep(Duration::from_millis(3_000)).await;
    assert_eq!(memory_readings(&transport).last(), Some(&(5.0, false)));

    memory.fail.store(true, std::sync::atomic::Ordering::SeqCst);
    sleep(Duration::from_millis(2_000)).await;
    handle.detach().await;
    assert_eq!(memory_readings(&transport).last(), Some(&(0.0, true)));
}
