// Producer <-> aggregator message set. Requests are tagged by `action`;
// responses are shaped per action and distinguished structurally.

use serde::{Deserialize, Serialize};

use super::{RangeSummary, Reading, Sample, Summary};
use crate::error::PipelineError;

/// Every `action` tag a [`Request`] can carry.
pub const ACTIONS: &[&str] = &[
    "ping",
    "updateMetrics",
    "removeSource",
    "startProfiling",
    "stopProfiling",
    "getCurrentMetrics",
    "getRangeSummary",
    "getFullSummary",
    "setCO2Intensity",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Request {
    Ping,
    UpdateMetrics {
        source_id: String,
        reading: Reading,
    },
    RemoveSource {
        source_id: String,
    },
    StartProfiling,
    StopProfiling,
    GetCurrentMetrics,
    GetRangeSummary {
        start_time: u64,
        end_time: u64,
    },
    GetFullSummary,
    #[serde(rename = "setCO2Intensity")]
    SetCo2Intensity {
        intensity: f64,
    },
}

impl Request {
    pub fn action(&self) -> &'static str {
        match self {
            Request::Ping => "ping",
            Request::UpdateMetrics { .. } => "updateMetrics",
            Request::RemoveSource { .. } => "removeSource",
            Request::StartProfiling => "startProfiling",
            Request::StopProfiling => "stopProfiling",
            Request::GetCurrentMetrics => "getCurrentMetrics",
            Request::GetRangeSummary { .. } => "getRangeSummary",
            Request::GetFullSummary => "getFullSummary",
            Request::SetCo2Intensity { .. } => "setCO2Intensity",
        }
    }

    /// Decode a JSON message, telling an unknown `action` apart from a malformed known one.
    pub fn from_json(value: serde_json::Value) -> Result<Self, PipelineError> {
        let action = value
            .get("action")
            .and_then(|a| a.as_str())
            .map(str::to_owned);
        match serde_json::from_value::<Request>(value) {
            Ok(request) => Ok(request),
            Err(e) => match action {
                Some(a) if !ACTIONS.contains(&a.as_str()) => Err(PipelineError::UnknownAction(a)),
                Some(a) => Err(PipelineError::InvalidInput(format!("{}: {}", a, e))),
                None => Err(PipelineError::InvalidInput("missing action".into())),
            },
        }
    }
}

/// Variant order matters for decoding: more specific shapes come first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged, rename_all_fields = "camelCase")]
pub enum Response {
    Pong {
        alive: bool,
    },
    Current {
        success: bool,
        metrics: Sample,
        is_profiling: bool,
    },
    Range {
        success: bool,
        summary: RangeSummary,
    },
    Summary {
        success: bool,
        summary: Summary,
    },
    Failure {
        success: bool,
        error: String,
    },
    Ack {
        success: bool,
    },
}

impl Response {
    pub fn ack() -> Self {
        Response::Ack { success: true }
    }

    pub fn failure(error: &PipelineError) -> Self {
        Response::Failure {
            success: false,
            error: error.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        match self {
            Response::Pong { alive } => *alive,
            Response::Current { success, .. }
            | Response::Range { success, .. }
            | Response::Summary { success, .. }
            | Response::Failure { success, .. }
            | Response::Ack { success } => *success,
        }
    }

    /// The error text of a failed response, if any.
    pub fn error(&self) -> Option<&str> {
        match self {
            Response::Failure { error, .. } => Some(error),
            _ => None,
        }
    }
}
