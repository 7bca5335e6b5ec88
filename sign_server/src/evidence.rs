//! Per-request evidence accumulation.
//!
use std::collections::HashMap;

use crate::{
    config::Weighting,
    detection::{Detection, FrameIndex},
    normalize::{normalize, NormalizedLabel},
};

/// Evidence gathered for one label.
#[derive(Clone, Debug, PartialEq)]
pub struct Evidence {
    /// Number of supporting detections.
    pub count: u32,
    /// Sum of the confidences of the supporting detections.
    pub confidence_sum: f64,
    pub first_frame: FrameIndex,
    pub last_frame: FrameIndex,
    /// Label as spelled by the first supporting detection.
    pub spelling: String,
}

impl Evidence {
    /// Score compared against a label's threshold.
    pub fn score(&self, weighting: Weighting) -> f64 {
        match weighting {
            Weighting::Count => self.count as f64,
            Weighting::Confidence => self.confidence_sum,
        }
    }
}

/// Per-label evidence in first-seen order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EvidenceTally {
    entries: Vec<(NormalizedLabel, Evidence)>,
    index: HashMap<NormalizedLabel, usize>,
}

impl EvidenceTally {
    pub fn get(&self, label: &NormalizedLabel) -> Option<&Evidence> {
        self.index.get(label).map(|&i| &self.entries[i].1)
    }

    pub fn count(&self, label: &NormalizedLabel) -> u32 {
        self.get(label).map_or(0, |evidence| evidence.count)
    }

    /// Labels and their evidence in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = (&NormalizedLabel, &Evidence)> {
        self.entries.iter().map(|(label, evidence)| (label, evidence))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn add(&mut self, label: NormalizedLabel, raw: &str, confidence: f32, frame: FrameIndex) {
        match self.index.get(&label) {
            Some(&i) => {
                let evidence = &mut self.entries[i].1;
                evidence.count += 1;
                evidence.confidence_sum += confidence as f64;
                evidence.last_frame = frame;
            }
            None => {
                self.index.insert(label.clone(), self.entries.len());
                self.entries.push((
                    label,
                    Evidence {
                        count: 1,
                        confidence_sum: confidence as f64,
                        first_frame: frame,
                        last_frame: frame,
                        spelling: raw.trim().to_owned(),
                    },
                ));
            }
        }
    }
}

/// Accumulates detections of one request, frame by frame.
///
/// Owned by a single request and driven sequentially, so it needs no locking.
#[derive(Debug)]
pub struct EvidenceAccumulator {
    tally: EvidenceTally,
    min_confidence: f32,
}

impl EvidenceAccumulator {
    pub fn new(min_confidence: f32) -> Self {
        Self {
            tally: EvidenceTally::default(),
            min_confidence,
        }
    }

    /// Add the detections of one frame.
    ///
    /// Returns the distinct labels whose evidence changed, in the order they were first
    /// touched by this call. Detections below the minimum confidence or with an empty label
    /// are ignored.
    pub fn observe(&mut self, detections: &[Detection], frame: FrameIndex) -> Vec<NormalizedLabel> {
        let mut updated: Vec<NormalizedLabel> = Vec::new();

        for detection in detections {
            if detection.confidence < self.min_confidence {
                continue;
            }
            let label = normalize(&detection.label);
            if label.as_str().is_empty() {
                continue;
            }

            self.tally.add(label.clone(), &detection.label, detection.confidence, frame);
            log::debug!(
                "Label '{}' detected on frame {}, count {}",
                label,
                frame,
                self.tally.count(&label)
            );

            if !updated.contains(&label) {
                updated.push(label);
            }
        }

        updated
    }

    /// Read-only copy of everything observed so far.
    pub fn snapshot(&self) -> EvidenceTally {
        self.tally.clone()
    }

    pub fn tally(&self) -> &EvidenceTally {
        &self.tally
    }
}

#[cfg(test)]
mod test {

    use super::*;

    fn detections(labels: &[&str]) -> Vec<Detection> {
        labels.iter().map(|label| Detection::new(*label, 0.9)).collect()
    }

    #[test]
    fn test_counts_match_detections() {
        let mut acc = EvidenceAccumulator::new(0.0);

        acc.observe(&detections(&["Hola", "Adiós"]), 0);
        acc.observe(&detections(&["hola"]), 1);
        acc.observe(&[], 2);
        acc.observe(&detections(&["HOLA", "adios", "Hola"]), 3);

        let tally = acc.snapshot();
        assert_eq!(tally.count(&normalize("Hola")), 4);
        assert_eq!(tally.count(&normalize("Adiós")), 2);
        assert_eq!(tally.count(&normalize("Gracias")), 0);
        assert_eq!(tally.len(), 2);
    }

    #[test]
    fn test_updated_labels_are_distinct_and_ordered() {
        let mut acc = EvidenceAccumulator::new(0.0);

        let updated = acc.observe(&detections(&["B", "A", "b", "A"]), 0);

        assert_eq!(updated, vec![normalize("B"), normalize("A")]);
        assert_eq!(acc.tally().count(&normalize("b")), 2);
    }

    #[test]
    fn test_first_seen_order_and_frames() {
        let mut acc = EvidenceAccumulator::new(0.0);
        acc.observe(&detections(&["Hola"]), 0);
        acc.observe(&detections(&["Adiós"]), 1);
        acc.observe(&detections(&["Hola"]), 4);

        let order: Vec<_> = acc.tally().iter().map(|(l, _)| l.as_str()).collect();
        assert_eq!(order, vec!["hola", "adios"]);

        let hola = acc.tally().get(&normalize("Hola")).cloned();
        assert_eq!(hola.map(|e| (e.first_frame, e.last_frame)), Some((0, 4)));
    }

    #[test]
    fn test_low_confidence_ignored() {
        let mut acc = EvidenceAccumulator::new(0.5);

        let updated = acc.observe(
            &[Detection::new("Hola", 0.3), Detection::new("Adiós", 0.7)],
            0,
        );

        assert_eq!(updated, vec![normalize("Adiós")]);
        assert_eq!(acc.tally().count(&normalize("Hola")), 0);
    }

    #[test]
    fn test_confidence_score() {
        let mut acc = EvidenceAccumulator::new(0.0);
        acc.observe(&[Detection::new("Hola", 0.5)], 0);
        acc.observe(&[Detection::new("Hola", 0.25)], 1);

        let evidence = acc.tally().get(&normalize("Hola")).cloned();
        let evidence = evidence.expect("hola tallied");
        assert_eq!(evidence.score(Weighting::Count), 2.0);
        assert!((evidence.score(Weighting::Confidence) - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_snapshot_is_detached() {
        let mut acc = EvidenceAccumulator::new(0.0);
        acc.observe(&detections(&["Hola"]), 0);
        let before = acc.snapshot();

        acc.observe(&detections(&["Hola"]), 1);

        assert_eq!(before.count(&normalize("Hola")), 1);
        assert_eq!(acc.tally().count(&normalize("Hola")), 2);
    }
}
