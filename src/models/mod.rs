// Domain models: per-source readings, merged samples, summaries and the message set.

mod message;
mod reading;
mod sample;

pub use message::{ACTIONS, Request, Response};
pub use reading::{PageTimings, Reading, SignalFlags, clamp_metric};
pub use sample::{AggregatedSnapshot, RangeSummary, Sample, Summary};
