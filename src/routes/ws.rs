// WebSocket stream of appended samples

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use bytes::Bytes;
use tokio::sync::broadcast;
use tokio::time::{Duration, timeout};

use super::AppState;
use crate::models::Sample;
use crate::version::{NAME, VERSION};

pub(super) const WS_PING_INTERVAL: Duration = Duration::from_secs(30);
pub(super) const WS_SEND_TIMEOUT: Duration = Duration::from_secs(10);

pub(super) async fn ws_samples(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let tx = state.samples_tx.clone();
    let tick_interval_ms = state.config.aggregator.tick_interval_ms;
    ws.on_upgrade(move |socket| async move {
        let mut rx = tx.subscribe();
        if let Err(e) = stream_samples(socket, &mut rx, tick_interval_ms).await {
            tracing::info!("Sample stream error: {}", e);
        }
    })
}

async fn send_text(socket: &mut WebSocket, text: String) -> bool {
    let r = timeout(WS_SEND_TIMEOUT, socket.send(Message::Text(text.into()))).await;
    matches!(r, Ok(Ok(())))
}

async fn stream_samples(
    mut socket: WebSocket,
    rx: &mut broadcast::Receiver<Sample>,
    tick_interval_ms: u64,
) -> anyhow::Result<()> {
    tracing::info!("Client connected to sample stream");

    let welcome = serde_json::json!({
        "type": "info",
        "name": NAME,
        "version": VERSION,
        "tickIntervalMs": tick_interval_ms,
    });
    if !send_text(&mut socket, serde_json::to_string(&welcome)?).await {
        return Ok(());
    }

    let mut ping_interval = tokio::time::interval(WS_PING_INTERVAL);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            result = rx.recv() => {
                match result {
                    Ok(sample) => {
                        if !send_text(&mut socket, serde_json::to_string(&sample)?).await {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("WebSocket /ws/samples client lagged, skipped {} samples", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            _ = ping_interval.tick() => {
                let r = timeout(WS_SEND_TIMEOUT, socket.send(Message::Ping(Bytes::new()))).await;
                if r.is_err() || r.unwrap_or(Ok(())).is_err() {
                    break;
                }
            }
        }
    }
    Ok(())
}
