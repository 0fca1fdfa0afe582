use anyhow::Result;
use carbonscope::aggregator::{self, Aggregator, ServiceConfig, ServiceDeps};
use carbonscope::channel::ResilientChannel;
use carbonscope::producer::{self, ProcessMemory, ProducerDeps};
use carbonscope::{config, models, routes, settings};
use tokio::sync::{broadcast, oneshot, watch};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::FormatTime;

struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(
            w,
            "{}",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z")
        )
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(s) => s,
                Err(_) => {
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_timer(LocalTimer)
        .with_env_filter(filter)
        .init();

    let app_config = config::AppConfig::load()?;

    let store = settings::IntensityStore::new(&app_config.emissions.store_path);
    let mut aggregator_config = app_config.aggregator_config();
    match store.load() {
        Ok(Some(intensity)) => {
            tracing::info!(intensity, path = %store.path().display(), "loaded persisted CO2 intensity");
            aggregator_config.co2_intensity = intensity;
        }
        Ok(None) => {}
        Err(e) => tracing::warn!(error = %e, "ignoring persisted CO2 intensity"),
    }

    let (samples_tx, _) =
        broadcast::channel::<models::Sample>(app_config.publishing.broadcast_capacity);
    let (intensity_tx, intensity_rx) = watch::channel(aggregator_config.co2_intensity);
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    let (handle, service_handle) = aggregator::spawn(
        ServiceDeps {
            aggregator: Aggregator::new(aggregator_config),
            store: Some(store),
            samples_tx: samples_tx.clone(),
            intensity_tx,
            shutdown_rx,
        },
        ServiceConfig {
            tick_interval_ms: app_config.aggregator.tick_interval_ms,
            mailbox_capacity: app_config.aggregator.mailbox_capacity,
            stats_log_interval_secs: app_config.aggregator.stats_log_interval_secs,
        },
    );

    let self_producer = app_config.producer.enabled.then(|| {
        producer::spawn(
            ProducerDeps {
                channel: ResilientChannel::new(handle.clone(), app_config.channel_config()),
                memory: Box::new(ProcessMemory::current()),
                intensity_rx,
            },
            app_config.producer_config(),
        )
    });

    let app = routes::app(handle, samples_tx, app_config.clone());
    let addr = format!("{}:{}", app_config.server.host, app_config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on http://{}", addr);

    tokio::select! {
        result = axum::serve(listener, app) => {
            result?;
        }
        _ = shutdown_signal() => {
            tracing::info!("Received shutdown signal");
        }
    }

    if let Some(p) = self_producer {
        p.detach().await;
    }
    let _ = shutdown_tx.send(());
    let _ = service_handle.await;

    Ok(())
}
