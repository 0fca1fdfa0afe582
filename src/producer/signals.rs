// Per-signal collectors. Each keeps its own bounded buffer and can fail
// without affecting the others.

use std::collections::VecDeque;
use tokio::time::{Duration, Instant};

use crate::models::PageTimings;

pub const NETWORK_LOG_CAPACITY: usize = 1000;
pub const CPU_HISTORY_CAPACITY: usize = 100;
pub const MEMORY_HISTORY_CAPACITY: usize = 100;

/// Frames per second treated as 100% busy.
pub const FRAME_BASELINE_FPS: f64 = 60.0;
/// Only events this recent count towards `networkCount`.
pub const NETWORK_WINDOW_MS: u64 = 60_000;

#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    #[error("{0} unavailable")]
    Unavailable(&'static str),
    #[error("{signal} probe failed: {reason}")]
    Failed {
        signal: &'static str,
        reason: String,
    },
}

/// FIFO with a hard capacity; the oldest entry goes first.
#[derive(Debug, Clone)]
pub struct BoundedLog<T> {
    entries: VecDeque<T>,
    capacity: usize,
}

impl<T> BoundedLog<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    pub fn push(&mut self, entry: T) {
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> {
        self.entries.iter()
    }

    pub fn latest(&self) -> Option<&T> {
        self.entries.back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// CPU proxy: animation callbacks counted over a rolling one-second window.
///
/// This approximates load against a 60 fps baseline; it is not a measured
/// CPU share.
#[derive(Debug, Clone)]
pub struct FrameCounter {
    frames: VecDeque<Instant>,
    window: Duration,
    observed_any: bool,
}

impl Default for FrameCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCounter {
    pub fn new() -> Self {
        Self {
            frames: VecDeque::new(),
            window: Duration::from_secs(1),
            observed_any: false,
        }
    }

    pub fn record(&mut self, at: Instant) {
        self.frames.push_back(at);
        self.observed_any = true;
        self.evict(at);
    }

    fn evict(&mut self, now: Instant) {
        while let Some(front) = self.frames.front() {
            if now.saturating_duration_since(*front) > self.window {
                self.frames.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn frames_in_window(&mut self, now: Instant) -> usize {
        self.evict(now);
        self.frames.len()
    }

    /// `min(100, frames / 60 * 100)`.
    pub fn cpu_percent(&mut self, now: Instant) -> f64 {
        let frames = self.frames_in_window(now) as f64;
        (frames / FRAME_BASELINE_FPS * 100.0).min(100.0)
    }

    /// False until the first frame arrives (no animation source attached).
    pub fn has_observed(&self) -> bool {
        self.observed_any
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Resource,
    Navigation,
    Paint,
}

/// One entry from the passive performance-event stream.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceEvent {
    pub kind: ResourceKind,
    pub name: String,
    /// Unix ms.
    pub at_ms: u64,
}

/// Every event seen since the source started (capped), reported windowed.
#[derive(Debug, Clone)]
pub struct NetworkLog {
    events: BoundedLog<ResourceEvent>,
    window_ms: u64,
}

impl Default for NetworkLog {
    fn default() -> Self {
        Self::new(NETWORK_WINDOW_MS)
    }
}

impl NetworkLog {
    pub fn new(window_ms: u64) -> Self {
        Self {
            events: BoundedLog::new(NETWORK_LOG_CAPACITY),
            window_ms,
        }
    }

    pub fn record(&mut self, event: ResourceEvent) {
        self.events.push(event);
    }

    /// Events with `now - at <= window`. Future-dated events count as recent.
    pub fn recent_count(&self, now_ms: u64) -> usize {
        self.events
            .iter()
            .rev()
            .take_while(|e| now_ms.saturating_sub(e.at_ms) <= self.window_ms)
            .count()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Absolute navigation marks, Unix ms. Any of them may be missing.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NavigationMarks {
    pub navigation_start: Option<u64>,
    pub dom_interactive: Option<u64>,
    pub dom_content_loaded: Option<u64>,
    pub load_event_end: Option<u64>,
}

/// Deltas from navigation start. A missing or earlier-than-start mark reads 0.
pub fn page_timings(marks: &NavigationMarks) -> Result<PageTimings, SignalError> {
    let start = marks
        .navigation_start
        .ok_or(SignalError::Unavailable("navigation start"))?;
    let delta = |mark: Option<u64>| {
        mark.and_then(|m| m.checked_sub(start))
            .map(|d| d as f64)
            .unwrap_or(0.0)
    };
    Ok(PageTimings {
        load_ms: delta(marks.load_event_end),
        dom_ready_ms: delta(marks.dom_content_loaded),
        interactive_ms: delta(marks.dom_interactive),
    })
}
