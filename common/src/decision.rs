//! Decision payloads returned to clients.
//!
use serde::{Deserialize, Serialize};

/// Why a request stopped consuming frames.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// At least one label reached its threshold.
    Threshold,
    /// The frame budget was used up.
    FrameLimit,
    /// The time budget elapsed or the request was cancelled.
    TimeLimit,
    /// The frame source had no more frames.
    StreamEnded,
}

impl StopReason {
    /// Whether frame consumption ended before the budget or the stream ran out.
    pub fn is_early(&self) -> bool {
        matches!(self, StopReason::Threshold)
    }
}

/// Final outcome of one classification request.
///
/// An empty `labels` list is a valid outcome meaning no sign was recognised.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionResult {
    pub labels: Vec<String>,
    pub early_stop: bool,
    pub frames_processed: usize,
    pub reason: StopReason,
}

impl DecisionResult {
    pub fn new(labels: Vec<String>, reason: StopReason, frames_processed: usize) -> Self {
        Self {
            labels,
            early_stop: reason.is_early(),
            frames_processed,
            reason,
        }
    }
}

/// Successful HTTP response envelope, `{"data": {...}}`.
#[derive(Debug, Deserialize, Serialize)]
pub struct DecisionResponse {
    pub data: DecisionResult,
}

/// Failed HTTP response envelope.
#[derive(Debug, Deserialize, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
}
