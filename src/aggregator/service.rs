// Aggregator service task: sole owner of the Aggregator.
// Requests arrive on an mpsc mailbox and are handled in the same select! loop
// as the 1 Hz tick, so an ingest never interleaves with a tick computation.

use super::Aggregator;
use crate::clock::now_ms;
use crate::error::PipelineError;
use crate::models::{Request, Response, Sample};
use crate::settings::IntensityStore;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{Duration, Instant, interval};
use tracing::instrument;

/// Rate limit for the "no sample subscribers" debug line.
const NO_RECEIVERS_LOG_INTERVAL: Duration = Duration::from_secs(60);

/// A request plus the slot its response goes back through.
pub struct Envelope {
    pub request: Request,
    pub reply: oneshot::Sender<Response>,
}

/// Cloneable address of a running aggregator service.
#[derive(Clone, Debug)]
pub struct AggregatorHandle {
    tx: mpsc::Sender<Envelope>,
}

impl AggregatorHandle {
    pub fn new(tx: mpsc::Sender<Envelope>) -> Self {
        Self { tx }
    }

    /// Queue `request` and wait for its response. Unbounded wait: callers that
    /// need a deadline wrap this (the resilient channel does).
    pub async fn request(&self, request: Request) -> Result<Response, PipelineError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Envelope { request, reply })
            .await
            .map_err(|_| PipelineError::TransportUnavailable("aggregator mailbox closed".into()))?;
        rx.await.map_err(|_| {
            PipelineError::TransportUnavailable("aggregator dropped the request".into())
        })
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// State and channels handed to the service task.
pub struct ServiceDeps {
    pub aggregator: Aggregator,
    /// Where accepted intensity changes are persisted, if anywhere.
    pub store: Option<IntensityStore>,
    pub samples_tx: broadcast::Sender<Sample>,
    /// Producers watch this so local and global emissions use the same intensity.
    pub intensity_tx: watch::Sender<f64>,
    pub shutdown_rx: oneshot::Receiver<()>,
}

/// Service timing.
pub struct ServiceConfig {
    pub tick_interval_ms: u64,
    pub mailbox_capacity: usize,
    pub stats_log_interval_secs: u64,
}

/// Handle one request against the aggregator. Pure apart from the aggregator itself.
pub fn dispatch(aggregator: &mut Aggregator, request: Request, now_ms: u64) -> Response {
    match request {
        Request::Ping => Response::Pong { alive: true },
        Request::UpdateMetrics { source_id, reading } => {
            if source_id.is_empty() {
                return Response::failure(&PipelineError::InvalidInput(
                    "sourceId must be non-empty".into(),
                ));
            }
            aggregator.ingest(&source_id, reading, now_ms);
            Response::ack()
        }
        Request::RemoveSource { source_id } => {
            aggregator.remove_source(&source_id);
            Response::ack()
        }
        Request::StartProfiling => {
            aggregator.start_profiling(now_ms);
            tracing::info!("profiling started");
            Response::ack()
        }
        Request::StopProfiling => {
            let summary = aggregator.stop_profiling();
            tracing::info!(
                samples = summary.sample_count,
                energy_wh = summary.total_energy_wh,
                co2e_g = summary.total_co2e_g,
                "profiling stopped"
            );
            Response::Summary {
                success: true,
                summary,
            }
        }
        Request::GetCurrentMetrics => Response::Current {
            success: true,
            metrics: aggregator.current(now_ms),
            is_profiling: aggregator.is_profiling(),
        },
        Request::GetRangeSummary {
            start_time,
            end_time,
        } => Response::Range {
            success: true,
            summary: aggregator.range_summary(start_time, end_time),
        },
        Request::GetFullSummary => Response::Summary {
            success: true,
            summary: aggregator.summary(),
        },
        Request::SetCo2Intensity { intensity } => match aggregator.set_intensity(intensity) {
            Ok(()) => Response::ack(),
            Err(e) => Response::failure(&e),
        },
    }
}

/// Spawns the service. The join handle yields the aggregator once the task
/// stops (shutdown signal or every handle dropped).
pub fn spawn(
    deps: ServiceDeps,
    config: ServiceConfig,
) -> (AggregatorHandle, tokio::task::JoinHandle<Aggregator>) {
    let (tx, rx) = mpsc::channel(config.mailbox_capacity.max(1));
    let handle = AggregatorHandle::new(tx);
    let join = tokio::spawn(run(deps, config, rx));
    (handle, join)
}

#[instrument(skip_all, fields(tick_interval_ms = config.tick_interval_ms))]
async fn run(
    deps: ServiceDeps,
    config: ServiceConfig,
    mut rx: mpsc::Receiver<Envelope>,
) -> Aggregator {
    let ServiceDeps {
        mut aggregator,
        store,
        samples_tx,
        intensity_tx,
        mut shutdown_rx,
    } = deps;

    let persister = store.map(|store| spawn_persister(store, intensity_tx.subscribe()));

    let mut tick = interval(Duration::from_millis(config.tick_interval_ms));
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut stats_log_tick = interval(Duration::from_secs(config.stats_log_interval_secs));
    stats_log_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut last_no_receivers_log: Option<Instant> = None;

    loop {
        tokio::select! {
            envelope = rx.recv() => {
                let Some(Envelope { request, reply }) = envelope else {
                    tracing::debug!("all aggregator handles dropped");
                    break;
                };
                let action = request.action();
                let requested_intensity = match request {
                    Request::SetCo2Intensity { intensity } => Some(intensity),
                    _ => None,
                };
                let response = dispatch(&mut aggregator, request, now_ms());
                if let Some(error) = response.error() {
                    tracing::warn!(action, error, "request failed");
                } else if let Some(intensity) = requested_intensity {
                    intensity_tx.send_replace(intensity);
                    tracing::info!(intensity, "CO2 intensity updated");
                }
                if reply.send(response).is_err() {
                    tracing::debug!(action, "requester went away before the response");
                }
            }
            _ = tick.tick() => {
                let Some(sample) = aggregator.tick(now_ms()) else {
                    continue;
                };
                if samples_tx.send(sample).is_err() {
                    let should_log = last_no_receivers_log
                        .is_none_or(|t| t.elapsed() >= NO_RECEIVERS_LOG_INTERVAL);
                    if should_log {
                        tracing::debug!(
                            operation = "broadcast_sample",
                            "No sample subscribers; broadcast channel has no receivers"
                        );
                        last_no_receivers_log = Some(Instant::now());
                    }
                }
            }
            _ = stats_log_tick.tick() => {
                let totals = aggregator.totals();
                tracing::info!(
                    profiling = aggregator.is_profiling(),
                    sources = aggregator.sources().len(),
                    history_len = aggregator.history().len(),
                    history_evicted = aggregator.history().evicted(),
                    fallback_ticks = totals.fallback_ticks,
                    session_energy_wh = totals.energy_wh,
                    session_co2e_g = totals.co2e_g,
                    "pipeline stats"
                );
            }
            _ = &mut shutdown_rx => {
                tracing::debug!("aggregator service shutting down");
                break;
            }
        }
    }
    // Closing the watch lets the persister write the last value and stop.
    drop(intensity_tx);
    if let Some(persister) = persister
        && let Err(e) = persister.await
    {
        tracing::warn!(error = %e, operation = "persist_intensity", "persister ended abnormally");
    }
    aggregator
}

/// Single writer for the intensity store. Changes coalesce in the watch, so
/// only the latest accepted value is written and writes never overlap.
fn spawn_persister(
    store: IntensityStore,
    mut intensity_rx: watch::Receiver<f64>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while intensity_rx.changed().await.is_ok() {
            let intensity = *intensity_rx.borrow_and_update();
            let store = store.clone();
            let result = tokio::task::spawn_blocking(move || store.save(intensity)).await;
            match result {
                Ok(Ok(())) => tracing::debug!(intensity, "CO2 intensity persisted"),
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, operation = "persist_intensity", "failed to persist CO2 intensity")
                }
                Err(e) => {
                    tracing::warn!(error = %e, operation = "persist_intensity", "persist task panicked")
                }
            }
        }
    })
}
