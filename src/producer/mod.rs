// Local producer: one per observed source. Turns frame, memory, resource-event
// and navigation signals into a Reading per sampling tick, prices it with the
// page-local model, and hands it to the resilient channel.

pub mod memory;
pub mod signals;

pub use memory::{MemoryProbe, ProcessMemory};
pub use signals::{
    BoundedLog, FrameCounter, NavigationMarks, NetworkLog, ResourceEvent, ResourceKind,
    SignalError,
};

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Duration, Instant, interval, interval_at};
use tracing::{debug, instrument, warn};

use crate::channel::{Delivery, ResilientChannel, Transport};
use crate::clock::now_ms;
use crate::error::PipelineError;
use crate::estimation;
use crate::models::{PageTimings, Reading, Request, SignalFlags};
use memory::BYTES_PER_MB;
use signals::{CPU_HISTORY_CAPACITY, MEMORY_HISTORY_CAPACITY, page_timings};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ProducerConfig {
    pub source_id: String,
    pub url: String,
    pub sample_interval_ms: u64,
    pub memory_interval_ms: u64,
    /// 0 disables the built-in frame pump (frames then come from the host).
    pub frame_interval_ms: u64,
    pub signal_capacity: usize,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            source_id: "self".into(),
            url: "app://carbonscope".into(),
            sample_interval_ms: 1_000,
            memory_interval_ms: 5_000,
            frame_interval_ms: 16,
            signal_capacity: 1_024,
        }
    }
}

/// Observations pushed into a producer by its host.
#[derive(Debug, Clone)]
pub enum Signal {
    /// One animation callback.
    Frame(Instant),
    Resource(ResourceEvent),
    Navigation(NavigationMarks),
}

/// Page-local view of this source: latest power and session-cumulative energy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageEstimate {
    pub power_w: f64,
    pub energy_wh: f64,
    #[serde(rename = "co2eG")]
    pub co2e_g: f64,
    pub samples: u64,
}

/// Host part of a URL, without scheme, credentials or port.
pub fn domain_of(url: &str) -> String {
    let rest = url.split_once("://").map_or(url, |(_, r)| r);
    let authority = rest.split(['/', '?', '#']).next().unwrap_or("");
    let host = authority.rsplit_once('@').map_or(authority, |(_, h)| h);
    let host = if host.starts_with('[') {
        host.split_inclusive(']').next().unwrap_or(host)
    } else {
        host.split(':').next().unwrap_or(host)
    };
    host.to_ascii_lowercase()
}

/// Sampling state for one source. Synchronous; the task in [`spawn`] drives it.
pub struct Producer {
    source_id: String,
    url: String,
    domain: String,
    frames: FrameCounter,
    network: NetworkLog,
    marks: NavigationMarks,
    last_memory_mb: Option<f64>,
    cpu_history: BoundedLog<(u64, f64)>,
    memory_history: BoundedLog<(u64, f64)>,
    last_sample_ms: Option<u64>,
    estimate: PageEstimate,
}

impl Producer {
    pub fn new(config: &ProducerConfig) -> Self {
        Self {
            source_id: config.source_id.clone(),
            url: config.url.clone(),
            domain: domain_of(&config.url),
            frames: FrameCounter::new(),
            network: NetworkLog::default(),
            marks: NavigationMarks::default(),
            last_memory_mb: None,
            cpu_history: BoundedLog::new(CPU_HISTORY_CAPACITY),
            memory_history: BoundedLog::new(MEMORY_HISTORY_CAPACITY),
            last_sample_ms: None,
            estimate: PageEstimate::default(),
        }
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn observe(&mut self, signal: Signal) {
        match signal {
            Signal::Frame(at) => self.frames.record(at),
            Signal::Resource(event) => self.network.record(event),
            Signal::Navigation(marks) => self.marks = marks,
        }
    }

    /// Record the outcome of a memory read. A failure clears the cached
    /// value so the next readings report the default and say so.
    pub fn record_memory(&mut self, now_ms: u64, heap: Result<u64, SignalError>) {
        match heap {
            Ok(bytes) => {
                let mb = bytes as f64 / BYTES_PER_MB;
                self.last_memory_mb = Some(mb);
                self.memory_history.push((now_ms, mb));
            }
            Err(e) => {
                debug!(source_id = %self.source_id, error = %e, "memory signal unavailable");
                self.last_memory_mb = None;
            }
        }
    }

    fn collect_cpu(&mut self, now: Instant) -> Result<f64, SignalError> {
        if !self.frames.has_observed() {
            return Err(SignalError::Unavailable("animation frames"));
        }
        Ok(self.frames.cpu_percent(now))
    }

    fn collect_memory(&self) -> Result<f64, SignalError> {
        self.last_memory_mb
            .ok_or(SignalError::Unavailable("memory"))
    }

    fn collect_timings(&self) -> Result<PageTimings, SignalError> {
        page_timings(&self.marks)
    }

    /// Build this tick's reading and fold its page-local estimate into the
    /// running totals. Each signal falls back to its zero default on its own.
    pub fn sample(&mut self, now_ms: u64, now: Instant, intensity: f64) -> Reading {
        let mut defaulted = SignalFlags::default();

        let cpu_percent = self.collect_cpu(now).unwrap_or_else(|e| {
            debug!(source_id = %self.source_id, error = %e, "cpu signal defaulted");
            defaulted.cpu = true;
            0.0
        });
        let memory_mb = self.collect_memory().unwrap_or_else(|_| {
            defaulted.memory = true;
            0.0
        });
        let timings = self.collect_timings().unwrap_or_else(|_| {
            defaulted.timings = true;
            PageTimings::default()
        });
        let network_count = self.network.recent_count(now_ms) as f64;

        self.cpu_history.push((now_ms, cpu_percent));

        let reading = Reading {
            source_id: self.source_id.clone(),
            timestamp: now_ms,
            cpu_percent,
            memory_mb,
            network_count,
            url: self.url.clone(),
            domain: self.domain.clone(),
            timings,
            defaulted,
        }
        .sanitized();

        let elapsed_secs = self
            .last_sample_ms
            .map(|prev| now_ms.saturating_sub(prev) as f64 / 1000.0)
            .unwrap_or(0.0);
        self.last_sample_ms = Some(now_ms);
        let power_w = estimation::estimate_page_power(&reading);
        let energy_wh = estimation::energy_from_power(power_w, elapsed_secs);
        self.estimate.power_w = power_w;
        self.estimate.energy_wh += energy_wh;
        self.estimate.co2e_g += estimation::co2e_from_energy(energy_wh, intensity);
        self.estimate.samples += 1;

        reading
    }

    pub fn estimate(&self) -> PageEstimate {
        self.estimate
    }

    pub fn cpu_history(&self) -> &BoundedLog<(u64, f64)> {
        &self.cpu_history
    }

    pub fn memory_history(&self) -> &BoundedLog<(u64, f64)> {
        &self.memory_history
    }

    pub fn network(&self) -> &NetworkLog {
        &self.network
    }
}

/// Collaborators for a running producer.
pub struct ProducerDeps<T: Transport> {
    pub channel: ResilientChannel<T>,
    pub memory: Box<dyn MemoryProbe>,
    /// Shared with the aggregator so both price CO2e with the same intensity.
    pub intensity_rx: watch::Receiver<f64>,
}

/// Owner's side of an attached producer. Dropping it also stops the sampling
/// task, but only [`Self::detach`] waits for the teardown to finish.
pub struct ProducerHandle {
    source_id: String,
    signals: mpsc::Sender<Signal>,
    estimate_rx: watch::Receiver<PageEstimate>,
    shutdown_tx: oneshot::Sender<()>,
    task: tokio::task::JoinHandle<()>,
    frame_pump: Option<tokio::task::JoinHandle<()>>,
}

impl ProducerHandle {
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Sender for host-side observations (frames, resource events, navigation).
    pub fn signals(&self) -> mpsc::Sender<Signal> {
        self.signals.clone()
    }

    pub fn estimate(&self) -> PageEstimate {
        *self.estimate_rx.borrow()
    }

    pub fn subscribe_estimate(&self) -> watch::Receiver<PageEstimate> {
        self.estimate_rx.clone()
    }

    /// Stop sampling, release timers, tell the aggregator the source is gone
    /// (best effort) and tear the channel down.
    pub async fn detach(self) {
        if let Some(pump) = &self.frame_pump {
            pump.abort();
        }
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.task.await {
            warn!(source_id = %self.source_id, error = %e, "producer task ended abnormally");
        }
    }
}

/// Attach a producer: spawns the sampling task and, when configured, the
/// frame pump that stands in for animation callbacks.
pub fn spawn<T: Transport>(deps: ProducerDeps<T>, config: ProducerConfig) -> ProducerHandle {
    let (signals_tx, signals_rx) = mpsc::channel(config.signal_capacity.max(1));
    let (estimate_tx, estimate_rx) = watch::channel(PageEstimate::default());
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    let frame_pump = (config.frame_interval_ms > 0)
        .then(|| spawn_frame_pump(signals_tx.clone(), config.frame_interval_ms));

    let source_id = config.source_id.clone();
    let task = tokio::spawn(run(deps, config, signals_rx, estimate_tx, shutdown_rx));

    ProducerHandle {
        source_id,
        signals: signals_tx,
        estimate_rx,
        shutdown_tx,
        task,
        frame_pump,
    }
}

fn spawn_frame_pump(
    signals: mpsc::Sender<Signal>,
    frame_interval_ms: u64,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = interval(Duration::from_millis(frame_interval_ms));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tick.tick().await;
            match signals.try_send(Signal::Frame(Instant::now())) {
                Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => {}
                Err(mpsc::error::TrySendError::Closed(_)) => break,
            }
        }
    })
}

/// Read the probe on the blocking pool; sysinfo refreshes are synchronous.
async fn read_memory(
    probe: &Arc<std::sync::Mutex<Box<dyn MemoryProbe>>>,
) -> Result<u64, SignalError> {
    let probe = probe.clone();
    tokio::task::spawn_blocking(move || {
        let mut probe = probe.lock().map_err(|e| SignalError::Failed {
            signal: "memory",
            reason: format!("memory probe lock poisoned: {}", e),
        })?;
        probe.heap_bytes()
    })
    .await
    .map_err(|e| SignalError::Failed {
        signal: "memory",
        reason: format!("memory probe task join: {}", e),
    })?
}

#[instrument(skip_all, fields(source_id = %config.source_id))]
async fn run<T: Transport>(
    deps: ProducerDeps<T>,
    config: ProducerConfig,
    mut signals_rx: mpsc::Receiver<Signal>,
    estimate_tx: watch::Sender<PageEstimate>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let ProducerDeps {
        channel,
        memory,
        intensity_rx,
    } = deps;
    let memory = Arc::new(std::sync::Mutex::new(memory));
    let mut producer = Producer::new(&config);
    producer.record_memory(now_ms(), read_memory(&memory).await);

    let mut sample_tick = interval(Duration::from_millis(config.sample_interval_ms));
    sample_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let memory_period = Duration::from_millis(config.memory_interval_ms);
    let mut memory_tick = interval_at(Instant::now() + memory_period, memory_period);
    memory_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = sample_tick.tick() => {
                let intensity = *intensity_rx.borrow();
                let reading = producer.sample(now_ms(), Instant::now(), intensity);
                estimate_tx.send_replace(producer.estimate());
                let request = Request::UpdateMetrics {
                    source_id: config.source_id.clone(),
                    reading,
                };
                match channel.deliver(request).await {
                    Ok(Delivery::Sent) => {}
                    Ok(Delivery::Buffered) => {
                        debug!(
                            pending = channel.pending().len(),
                            state = ?channel.state(),
                            "reading buffered"
                        );
                    }
                    Err(PipelineError::ChannelClosed) => break,
                    Err(e) => debug!(error = %e, "reading not delivered"),
                }
            }
            _ = memory_tick.tick() => {
                let heap = read_memory(&memory).await;
                producer.record_memory(now_ms(), heap);
            }
            Some(signal) = signals_rx.recv() => producer.observe(signal),
            _ = &mut shutdown_rx => break,
        }
    }

    let timeout = Duration::from_millis(channel.config().request_timeout_ms);
    let removal = Request::RemoveSource {
        source_id: config.source_id.clone(),
    };
    if let Err(e) = channel.send(removal, timeout).await {
        debug!(error = %e, "removal not delivered; aggregator will purge the source as stale");
    }
    channel.shutdown();
    debug!("producer detached");
}
