// Error kinds shared by the producer, channel and aggregator.
// Buffer/history overflow is not an error value: see PendingBuffer::dropped and History::evicted.

/// Failures surfaced by the pipeline. None of them is fatal; callers degrade
/// (buffer, back off, substitute a fallback) rather than abort.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PipelineError {
    /// Out-of-range or non-finite numeric input that cannot be clamped (configuration).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// No response within the deadline; treated as a disconnection.
    #[error("transport timed out after {timeout_ms} ms")]
    TransportTimeout { timeout_ms: u64 },

    /// Link known dead; the request was not attempted.
    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),

    /// The aggregator answered but refused the request.
    #[error("request rejected: {0}")]
    Rejected(String),

    /// The owning channel or producer has been torn down.
    #[error("channel closed")]
    ChannelClosed,

    /// A message whose `action` tag matches no known request.
    #[error("unknown action: {0}")]
    UnknownAction(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
