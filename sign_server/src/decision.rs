//! Turns accumulated evidence into the response payload.
//!
use common::decision::{DecisionResult, StopReason};

use crate::{
    evidence::EvidenceTally,
    normalize::{LabelBook, NormalizedLabel},
    policy::ranked_by_count,
};

/// Build the final result of a request.
///
/// A threshold stop reports exactly its winners in their tie-break order. Every other stop
/// reports all labels with evidence by descending count, then ascending normalized name.
/// Labels missing from `labels` are shown as first spelled by the classifier.
pub fn format(
    tally: &EvidenceTally,
    reason: StopReason,
    winners: &[NormalizedLabel],
    frames_processed: usize,
    labels: &LabelBook,
) -> DecisionResult {
    let keys: Vec<NormalizedLabel> = match reason {
        StopReason::Threshold => winners.to_vec(),
        StopReason::FrameLimit | StopReason::TimeLimit | StopReason::StreamEnded => {
            ranked_by_count(tally)
        }
    };

    let display = keys
        .iter()
        .map(|key| {
            labels
                .get(key)
                .or_else(|| tally.get(key).map(|evidence| evidence.spelling.as_str()))
                .unwrap_or_else(|| key.as_str())
                .to_owned()
        })
        .collect();

    DecisionResult::new(display, reason, frames_processed)
}
