//! Stopping policy.
//!
//! Evaluated after every frame. First match wins:
//! 1. a label touched by this frame reached its threshold,
//! 2. the frame budget is used up,
//! 3. otherwise keep going.
//!
//! End of stream and cancellation are reported by the frame loop through
//! [`StoppingPolicy::stream_ended`] and [`StoppingPolicy::time_limited`].
use std::cmp::Ordering;

use common::decision::StopReason;

use crate::{
    config::{DecisionConfig, TieBreak},
    detection::FrameIndex,
    evidence::EvidenceTally,
    normalize::NormalizedLabel,
};

/// Outcome of evaluating the policy.
#[derive(Clone, Debug, PartialEq)]
pub enum StopDecision {
    Continue,
    Stop {
        reason: StopReason,
        /// Ordered winners. On a threshold stop these are the labels that crossed; otherwise
        /// every label with evidence.
        winners: Vec<NormalizedLabel>,
    },
}

impl StopDecision {
    pub fn is_stop(&self) -> bool {
        matches!(self, StopDecision::Stop { .. })
    }
}

pub struct StoppingPolicy<'a> {
    config: &'a DecisionConfig,
}

impl<'a> StoppingPolicy<'a> {
    pub fn new(config: &'a DecisionConfig) -> Self {
        Self { config }
    }

    /// Decide after frame `frame` was accumulated.
    ///
    /// Only `updated` labels are checked against their thresholds; labels untouched by this
    /// frame cannot have crossed on it.
    pub fn should_stop(
        &self,
        tally: &EvidenceTally,
        updated: &[NormalizedLabel],
        frame: FrameIndex,
    ) -> StopDecision {
        let winners = self.threshold_winners(tally, updated);
        if !winners.is_empty() {
            return StopDecision::Stop {
                reason: StopReason::Threshold,
                winners,
            };
        }

        if frame + 1 >= self.config.frame_limit {
            return self.best_effort(StopReason::FrameLimit, tally);
        }

        StopDecision::Continue
    }

    /// The frame source ran dry.
    pub fn stream_ended(&self, tally: &EvidenceTally) -> StopDecision {
        self.best_effort(StopReason::StreamEnded, tally)
    }

    /// The time budget elapsed or the request was cancelled.
    pub fn time_limited(&self, tally: &EvidenceTally) -> StopDecision {
        self.best_effort(StopReason::TimeLimit, tally)
    }

    /// The frame budget was reached outside of [`Self::should_stop`].
    pub fn frame_limited(&self, tally: &EvidenceTally) -> StopDecision {
        self.best_effort(StopReason::FrameLimit, tally)
    }

    fn threshold_winners(
        &self,
        tally: &EvidenceTally,
        updated: &[NormalizedLabel],
    ) -> Vec<NormalizedLabel> {
        let mut winners: Vec<(&NormalizedLabel, f64)> = updated
            .iter()
            .filter_map(|label| {
                let threshold = self.config.thresholds.threshold_for(label)? as f64;
                let score = tally.get(label)?.score(self.config.weighting);
                (score >= threshold).then_some((label, score - threshold))
            })
            .collect();

        match self.config.tie_break {
            TieBreak::ExcessThenName => winners.sort_by(|a, b| {
                b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0))
            }),
            TieBreak::Name => winners.sort_by(|a, b| a.0.cmp(b.0)),
        }

        winners.into_iter().map(|(label, _)| label.clone()).collect()
    }

    fn best_effort(&self, reason: StopReason, tally: &EvidenceTally) -> StopDecision {
        StopDecision::Stop {
            reason,
            winners: ranked_by_count(tally),
        }
    }
}

/// Every label with evidence, by descending count then ascending normalized name.
pub fn ranked_by_count(tally: &EvidenceTally) -> Vec<NormalizedLabel> {
    let mut ranked: Vec<(&NormalizedLabel, u32)> = tally
        .iter()
        .filter(|(_, evidence)| evidence.count > 0)
        .map(|(label, evidence)| (label, evidence.count))
        .collect();

    ranked.sort_by(|a, b| match b.1.cmp(&a.1) {
        Ordering::Equal => a.0.cmp(b.0),
        other => other,
    });

    ranked.into_iter().map(|(label, _)| label.clone()).collect()
}

#[cfg(test)]
mod test {

    use std::collections::HashMap;

    use super::*;
    use crate::{
        config::{EngineConfig, Weighting},
        detection::Detection,
        error::Result,
        evidence::EvidenceAccumulator,
        normalize::normalize,
    };

    fn decision_config(thresholds: &[(&str, i64)], frame_limit: i64) -> Result<DecisionConfig> {
        DecisionConfig::try_from(EngineConfig {
            thresholds: thresholds
                .iter()
                .map(|(label, t)| (label.to_string(), *t))
                .collect::<HashMap<_, _>>(),
            frame_limit,
            ..Default::default()
        })
    }

    fn frame(labels: &[&str]) -> Vec<Detection> {
        labels.iter().map(|label| Detection::new(*label, 0.9)).collect()
    }

    /// Feed frames until the policy stops, returning the stopping frame and decision.
    fn run(config: &DecisionConfig, frames: &[Vec<Detection>]) -> Option<(FrameIndex, StopDecision)> {
        let policy = StoppingPolicy::new(config);
        let mut acc = EvidenceAccumulator::new(config.min_confidence);
        for (index, detections) in frames.iter().enumerate() {
            let updated = acc.observe(detections, index);
            let decision = policy.should_stop(acc.tally(), &updated, index);
            if decision.is_stop() {
                return Some((index, decision));
            }
        }
        None
    }

    #[test]
    fn test_stops_exactly_when_threshold_reached() -> Result<()> {
        let config = decision_config(&[("A", 3)], 100)?;
        let frames = vec![frame(&["A"]), frame(&[]), frame(&["A"]), frame(&["A"]), frame(&["A"])];

        let (index, decision) = run(&config, &frames).expect("should stop");

        assert_eq!(index, 3);
        assert_eq!(
            decision,
            StopDecision::Stop {
                reason: StopReason::Threshold,
                winners: vec![normalize("A")]
            }
        );

        Ok(())
    }

    #[test]
    fn test_first_label_to_threshold_wins() -> Result<()> {
        let config = decision_config(&[("A", 3), ("B", 2)], 100)?;
        let frames = vec![frame(&["A"]), frame(&["A"]), frame(&["B"]), frame(&["B"]), frame(&["A"])];

        let (index, decision) = run(&config, &frames).expect("should stop");

        assert_eq!(index, 3);
        assert_eq!(
            decision,
            StopDecision::Stop {
                reason: StopReason::Threshold,
                winners: vec![normalize("B")]
            }
        );

        Ok(())
    }

    #[test]
    fn test_simultaneous_winners_by_excess_then_name() -> Result<()> {
        let config = decision_config(&[("A", 2), ("B", 2), ("C", 1)], 100)?;
        // C crosses on frame 0 already, before A or B can
        let frames = vec![frame(&["A", "C"]), frame(&["B", "B", "A", "C"])];

        let (index, decision) = run(&config, &frames).expect("should stop");

        assert_eq!(index, 0);
        assert_eq!(
            decision,
            StopDecision::Stop {
                reason: StopReason::Threshold,
                winners: vec![normalize("C")]
            }
        );

        // A and B cross with no excess, C with excess 2
        let frames = vec![frame(&["B", "B", "A", "A", "C", "C", "C"])];
        let (_, decision) = run(&config, &frames).expect("should stop");

        assert_eq!(
            decision,
            StopDecision::Stop {
                reason: StopReason::Threshold,
                winners: vec![normalize("C"), normalize("A"), normalize("B")]
            }
        );

        Ok(())
    }

    #[test]
    fn test_name_tie_break() -> Result<()> {
        let mut config = decision_config(&[("A", 2), ("B", 2), ("C", 1)], 100)?;
        config.tie_break = TieBreak::Name;
        let frames = vec![frame(&["B", "B", "A", "A", "C", "C", "C"])];

        let (_, decision) = run(&config, &frames).expect("should stop");

        assert_eq!(
            decision,
            StopDecision::Stop {
                reason: StopReason::Threshold,
                winners: vec![normalize("A"), normalize("B"), normalize("C")]
            }
        );

        Ok(())
    }

    #[test]
    fn test_frame_limit_reports_best_effort() -> Result<()> {
        let config = decision_config(&[("A", 5)], 2)?;
        let frames = vec![frame(&["A"]), frame(&["A"]), frame(&["A"])];

        let (index, decision) = run(&config, &frames).expect("should stop");

        assert_eq!(index, 1);
        assert_eq!(
            decision,
            StopDecision::Stop {
                reason: StopReason::FrameLimit,
                winners: vec![normalize("A")]
            }
        );

        Ok(())
    }

    #[test]
    fn test_threshold_beats_frame_limit_on_same_frame() -> Result<()> {
        let config = decision_config(&[("A", 2)], 2)?;
        let frames = vec![frame(&["A"]), frame(&["A"])];

        let (index, decision) = run(&config, &frames).expect("should stop");

        assert_eq!(index, 1);
        assert!(matches!(
            decision,
            StopDecision::Stop {
                reason: StopReason::Threshold,
                ..
            }
        ));

        Ok(())
    }

    #[test]
    fn test_unknown_labels_never_trigger_without_default() -> Result<()> {
        let mut config = decision_config(&[("A", 5)], 100)?;
        let frames = vec![frame(&["Z", "Z", "Z", "Z", "Z", "Z"])];

        assert_eq!(run(&config, &frames), None);

        config.thresholds = DecisionConfig::try_from(EngineConfig {
            default_threshold: Some(3),
            ..Default::default()
        })?
        .thresholds;
        let (_, decision) = run(&config, &frames).expect("default threshold applies");
        assert_eq!(
            decision,
            StopDecision::Stop {
                reason: StopReason::Threshold,
                winners: vec![normalize("Z")]
            }
        );

        Ok(())
    }

    #[test]
    fn test_confidence_weighting() -> Result<()> {
        let mut config = decision_config(&[("A", 1)], 100)?;
        config.weighting = Weighting::Confidence;
        let frames = vec![
            vec![Detection::new("A", 0.4)],
            vec![Detection::new("A", 0.4)],
            vec![Detection::new("A", 0.4)],
        ];

        let (index, _) = run(&config, &frames).expect("should stop");

        assert_eq!(index, 2);

        Ok(())
    }

    #[test]
    fn test_ranked_by_count_then_name() {
        let mut acc = EvidenceAccumulator::new(0.0);
        acc.observe(&frame(&["c", "b", "a", "b", "c"]), 0);
        acc.observe(&frame(&["d"]), 1);

        let ranked = ranked_by_count(acc.tally());

        assert_eq!(
            ranked,
            vec![normalize("b"), normalize("c"), normalize("a"), normalize("d")]
        );
    }
}
