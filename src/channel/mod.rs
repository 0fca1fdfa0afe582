// Producer-side resilient link to the aggregator.
//
// CONNECTED -> (send fails / times out / probe fails) -> DISCONNECTED
// DISCONNECTED -> (scheduled probe succeeds) -> CONNECTED, then flush
// DISCONNECTED -> (max_reconnection_attempts failed probes) -> GIVING_UP
// GIVING_UP -> (manual probe succeeds) -> CONNECTED
//
// Shared state sits behind a std Mutex that is never held across an await.

mod pending;
mod transport;

pub use pending::{DEFAULT_MAX_PENDING, PendingBuffer};
pub use transport::Transport;

use serde::Deserialize;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::error::PipelineError;
use crate::models::{Request, Response};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connected,
    Disconnected,
    /// No more automatic probes; a manual probe can still reconnect.
    GivingUp,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    pub request_timeout_ms: u64,
    pub probe_timeout_ms: u64,
    pub max_reconnection_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub max_pending: usize,
    /// Spacing between consecutive sends while flushing the buffer.
    pub flush_delay_ms: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 5_000,
            probe_timeout_ms: 1_000,
            max_reconnection_attempts: 5,
            base_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
            max_pending: DEFAULT_MAX_PENDING,
            flush_delay_ms: 50,
        }
    }
}

/// `min(base * 2^attempt, max)`.
pub fn backoff_delay(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    Duration::from_millis(base_ms.saturating_mul(factor).min(max_ms))
}

/// What happened to a payload handed to [`ResilientChannel::deliver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// Queued for the next flush.
    Buffered,
}

struct Inner {
    state: ChannelState,
    attempts: u32,
    pending: PendingBuffer<Request>,
    reconnect: Option<tokio::task::JoinHandle<()>>,
    flushing: bool,
    closed: bool,
}

fn push_pending(inner: &mut Inner, request: Request) {
    if let Some(evicted) = inner.pending.push_back(request) {
        warn!(
            action = evicted.action(),
            dropped_total = inner.pending.dropped(),
            "pending buffer full; oldest payload dropped"
        );
    }
}

struct Shared<T> {
    transport: T,
    config: ChannelConfig,
    inner: Mutex<Inner>,
}

pub struct ResilientChannel<T: Transport> {
    shared: Arc<Shared<T>>,
}

impl<T: Transport> Clone for ResilientChannel<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Transport> ResilientChannel<T> {
    /// Starts optimistic: CONNECTED until the first failure says otherwise.
    pub fn new(transport: T, config: ChannelConfig) -> Self {
        let inner = Inner {
            state: ChannelState::Connected,
            attempts: 0,
            pending: PendingBuffer::new(config.max_pending),
            reconnect: None,
            flushing: false,
            closed: false,
        };
        Self {
            shared: Arc::new(Shared {
                transport,
                config,
                inner: Mutex::new(inner),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panic while holding the lock leaves plain data behind; keep going with it.
        self.shared
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.shared.config
    }

    pub fn state(&self) -> ChannelState {
        self.lock().state
    }

    /// Consecutive failed reconnection probes.
    pub fn attempts(&self) -> u32 {
        self.lock().attempts
    }

    /// Undelivered payloads, oldest first.
    pub fn pending(&self) -> Vec<Request> {
        self.lock().pending.snapshot()
    }

    pub fn dropped(&self) -> u64 {
        self.lock().pending.dropped()
    }

    pub fn is_reconnect_scheduled(&self) -> bool {
        self.lock().reconnect.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// One exchange under `timeout`. A response that reports failure counts as one.
    async fn exchange(&self, request: Request, timeout: Duration) -> Result<Response, PipelineError> {
        match tokio::time::timeout(timeout, self.shared.transport.call(request)).await {
            Err(_) => Err(PipelineError::TransportTimeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
            Ok(Err(e)) => Err(e),
            Ok(Ok(response)) if response.is_success() => Ok(response),
            Ok(Ok(response)) => Err(PipelineError::Rejected(
                response.error().unwrap_or("request refused").to_string(),
            )),
        }
    }

    /// Issue `request` once. Fails immediately, without touching the transport,
    /// unless the channel is CONNECTED. A failure is not retried here; it
    /// moves the channel to DISCONNECTED and schedules reconnection.
    #[instrument(skip(self, request), fields(action = request.action()))]
    pub async fn send(&self, request: Request, timeout: Duration) -> Result<Response, PipelineError> {
        {
            let inner = self.lock();
            if inner.closed {
                return Err(PipelineError::ChannelClosed);
            }
            if inner.state != ChannelState::Connected {
                return Err(PipelineError::TransportUnavailable(
                    "link is down; not attempting send".into(),
                ));
            }
        }
        let result = self.exchange(request, timeout).await;
        if self.is_closed() {
            return Err(PipelineError::ChannelClosed);
        }
        if let Err(e) = &result {
            self.mark_disconnected(e);
        }
        result
    }

    /// Send a payload that must not be lost while the link is down: on any
    /// failure it is buffered (FIFO, oldest dropped on overflow) and flushed
    /// after reconnection. While a backlog exists new payloads queue behind it.
    pub async fn deliver(&self, request: Request) -> Result<Delivery, PipelineError> {
        // Decide and enqueue under one lock so a flush finishing concurrently
        // cannot miss the payload.
        let (direct, flush_now) = {
            let mut inner = self.lock();
            if inner.closed {
                return Err(PipelineError::ChannelClosed);
            }
            let connected = inner.state == ChannelState::Connected;
            let backlog = inner.flushing || !inner.pending.is_empty();
            if connected && !backlog {
                (Some(request), false)
            } else {
                let flush_now = connected && !inner.flushing;
                push_pending(&mut inner, request);
                (None, flush_now)
            }
        };
        let Some(request) = direct else {
            if flush_now {
                self.flush().await;
            }
            return Ok(Delivery::Buffered);
        };
        let timeout = Duration::from_millis(self.shared.config.request_timeout_ms);
        match self.send(request.clone(), timeout).await {
            Ok(_) => Ok(Delivery::Sent),
            Err(PipelineError::ChannelClosed) => Err(PipelineError::ChannelClosed),
            Err(e) => {
                debug!(error = %e, "delivery failed; buffering payload");
                self.buffer(request);
                Ok(Delivery::Buffered)
            }
        }
    }

    fn buffer(&self, request: Request) {
        push_pending(&mut self.lock(), request);
    }

    /// Liveness check that bypasses the state gate, so it also works from
    /// DISCONNECTED and GIVING_UP. Success resets the attempt counter and
    /// marks the link CONNECTED; it does not flush (see [`Self::reconnect_now`]).
    #[instrument(skip(self))]
    pub async fn probe(&self, timeout: Duration) -> Result<(), PipelineError> {
        match self.probe_once(timeout).await {
            Ok(()) => Ok(()),
            Err(PipelineError::ChannelClosed) => Err(PipelineError::ChannelClosed),
            Err(e) => {
                self.mark_disconnected(&e);
                Err(e)
            }
        }
    }

    /// Manual re-probe followed by a flush of the backlog on success.
    pub async fn reconnect_now(&self) -> Result<usize, PipelineError> {
        let timeout = Duration::from_millis(self.shared.config.probe_timeout_ms);
        self.probe(timeout).await?;
        Ok(self.flush().await)
    }

    async fn probe_once(&self, timeout: Duration) -> Result<(), PipelineError> {
        if self.is_closed() {
            return Err(PipelineError::ChannelClosed);
        }
        let result = self.exchange(Request::Ping, timeout).await;
        let mut inner = self.lock();
        if inner.closed {
            return Err(PipelineError::ChannelClosed);
        }
        result?;
        if inner.state != ChannelState::Connected {
            info!(after_attempts = inner.attempts, "link restored");
        }
        inner.state = ChannelState::Connected;
        inner.attempts = 0;
        Ok(())
    }

    fn mark_disconnected(&self, error: &PipelineError) {
        {
            let mut inner = self.lock();
            if inner.closed {
                return;
            }
            if inner.state == ChannelState::Connected {
                warn!(error = %error, "link lost");
                inner.state = ChannelState::Disconnected;
            }
        }
        self.schedule_reconnect();
    }

    /// At most one reconnection task exists. Spawned and recorded under the
    /// lock so the task cannot clear its slot before it has been filled.
    fn schedule_reconnect(&self) {
        let mut inner = self.lock();
        if inner.closed || inner.reconnect.is_some() || inner.state == ChannelState::GivingUp {
            return;
        }
        if inner.attempts >= self.shared.config.max_reconnection_attempts {
            inner.state = ChannelState::GivingUp;
            warn!(attempts = inner.attempts, "giving up on automatic reconnection");
            return;
        }
        let channel = self.clone();
        inner.reconnect = Some(tokio::spawn(channel.reconnect_loop()));
    }

    async fn reconnect_loop(self) {
        let config = self.shared.config.clone();
        let probe_timeout = Duration::from_millis(config.probe_timeout_ms);
        loop {
            let (attempt, delay) = {
                let mut inner = self.lock();
                inner.attempts += 1;
                let delay = backoff_delay(inner.attempts, config.base_backoff_ms, config.max_backoff_ms);
                (inner.attempts, delay)
            };
            debug!(attempt, delay_ms = delay.as_millis() as u64, "reconnection scheduled");
            tokio::time::sleep(delay).await;

            match self.probe_once(probe_timeout).await {
                Ok(()) => {
                    self.lock().reconnect = None;
                    let flushed = self.flush().await;
                    debug!(flushed, "backlog flushed after reconnection");
                    return;
                }
                Err(PipelineError::ChannelClosed) => return,
                Err(e) => {
                    let mut inner = self.lock();
                    if inner.closed {
                        return;
                    }
                    debug!(attempt, error = %e, "reconnection probe failed");
                    if inner.state == ChannelState::Connected {
                        // A manual probe got there first.
                        inner.reconnect = None;
                        return;
                    }
                    if inner.attempts >= config.max_reconnection_attempts {
                        inner.state = ChannelState::GivingUp;
                        inner.reconnect = None;
                        warn!(attempts = inner.attempts, "giving up on automatic reconnection");
                        return;
                    }
                }
            }
        }
    }

    /// Send the backlog strictly in order, one at a time, `flush_delay_ms`
    /// apart. On the first failure that payload goes back to the head of the
    /// buffer, the rest stay queued behind it, and flushing stops until the
    /// next reconnection. Returns how many payloads were delivered.
    pub async fn flush(&self) -> usize {
        {
            let mut inner = self.lock();
            if inner.closed || inner.flushing || inner.state != ChannelState::Connected {
                return 0;
            }
            inner.flushing = true;
        }
        let timeout = Duration::from_millis(self.shared.config.request_timeout_ms);
        let spacing = Duration::from_millis(self.shared.config.flush_delay_ms);
        let mut sent = 0;
        loop {
            if sent > 0 {
                tokio::time::sleep(spacing).await;
            }
            let next = {
                let mut inner = self.lock();
                if inner.closed {
                    inner.flushing = false;
                    return sent;
                }
                let next = inner.pending.pop_front();
                if next.is_none() {
                    // Cleared under the same lock as the empty check.
                    inner.flushing = false;
                }
                next
            };
            let Some(request) = next else {
                return sent;
            };
            let result = self.exchange(request.clone(), timeout).await;
            if self.is_closed() {
                self.lock().flushing = false;
                return sent;
            }
            if let Err(e) = result {
                let remaining = {
                    let mut inner = self.lock();
                    inner.pending.push_front(request);
                    inner.flushing = false;
                    inner.pending.len()
                };
                warn!(error = %e, delivered = sent, remaining, "flush interrupted; payloads re-buffered");
                self.mark_disconnected(&e);
                return sent;
            }
            sent += 1;
        }
    }

    /// Tear down: cancel the reconnection task and discard anything still
    /// buffered. A send already in flight may finish but its result is dropped.
    pub fn shutdown(&self) {
        let mut inner = self.lock();
        if inner.closed {
            return;
        }
        inner.closed = true;
        if let Some(task) = inner.reconnect.take() {
            task.abort();
        }
        let discarded = inner.pending.len();
        inner.pending.clear();
        debug!(discarded, "channel shut down");
    }
}
