//! The streaming decision engine.
//!
//! One request runs `Init → Streaming → {Decided | Exhausted}`. [`Session`] holds the
//! per-request state and is consumed by every step, so a finished request cannot be stepped
//! again. [`Engine`] owns the shared, read-only collaborators and drives sessions over a
//! frame source.
use std::sync::Arc;

use common::decision::{DecisionResult, StopReason};
use image::RgbImage;
use tokio_util::sync::CancellationToken;

use crate::{
    config::{DecisionConfig, EngineConfig},
    decision,
    detection::{Detection, FrameIndex},
    error::Result,
    evidence::EvidenceAccumulator,
    meter::METER,
    nn::SignClassifier,
    normalize::{LabelBook, NormalizedLabel},
    policy::{StopDecision, StoppingPolicy},
    source::{BoundedSource, EndCause, FrameError, FrameSource},
};

/// State of one request while frames are being consumed.
pub struct Session<'a> {
    config: &'a DecisionConfig,
    labels: &'a LabelBook,
    accumulator: EvidenceAccumulator,
    next_frame: FrameIndex,
}

/// Result of feeding one frame to a [`Session`].
pub enum Step<'a> {
    Streaming(Session<'a>),
    Finished(DecisionResult),
}

impl<'a> Session<'a> {
    pub fn new(config: &'a DecisionConfig, labels: &'a LabelBook) -> Self {
        Self {
            config,
            labels,
            accumulator: EvidenceAccumulator::new(config.min_confidence),
            next_frame: 0,
        }
    }

    /// Index the next frame will get.
    pub fn next_index(&self) -> FrameIndex {
        self.next_frame
    }

    /// Feed the detections of the next frame.
    pub fn step(mut self, detections: &[Detection]) -> Step<'a> {
        let frame = self.next_frame;
        self.next_frame += 1;

        let updated = self.accumulator.observe(detections, frame);
        let policy = StoppingPolicy::new(self.config);
        match policy.should_stop(self.accumulator.tally(), &updated, frame) {
            StopDecision::Continue => Step::Streaming(self),
            StopDecision::Stop { reason, winners } => {
                if reason == StopReason::Threshold {
                    log::info!(
                        "Threshold reached on frame {} by {:?}, stopping",
                        frame,
                        winners.iter().map(|w| self.labels.display(w)).collect::<Vec<_>>()
                    );
                }
                Step::Finished(self.finish(reason, &winners))
            }
        }
    }

    /// End the request without a threshold hit, because the frames ran out for `cause`.
    pub fn exhaust(self, cause: EndCause) -> DecisionResult {
        let policy = StoppingPolicy::new(self.config);
        let tally = self.accumulator.tally();
        let decision = match cause {
            EndCause::TimeLimit | EndCause::Cancelled => policy.time_limited(tally),
            EndCause::FrameLimit => policy.frame_limited(tally),
            EndCause::Exhausted => policy.stream_ended(tally),
        };

        match decision {
            StopDecision::Stop { reason, winners } => self.finish(reason, &winners),
            StopDecision::Continue => self.finish(StopReason::StreamEnded, &[]),
        }
    }

    fn finish(self, reason: StopReason, winners: &[NormalizedLabel]) -> DecisionResult {
        decision::format(
            &self.accumulator.snapshot(),
            reason,
            winners,
            self.next_frame,
            self.labels,
        )
    }
}

/// Decision engine shared by all requests.
pub struct Engine {
    classifier: Arc<dyn SignClassifier>,
    config: Arc<DecisionConfig>,
    labels: Arc<LabelBook>,
}

impl Engine {
    /// Build an engine. Display labels come from the classifier's label table first, then the
    /// threshold keys, and explicit display labels of the config override both.
    pub fn new(classifier: Arc<dyn SignClassifier>, config: DecisionConfig) -> Self {
        let mut labels = LabelBook::new();
        for label in classifier.labels() {
            labels.register(label);
        }
        config.register_labels(&mut labels);

        log::info!(
            "Engine ready: {} labels, {} thresholds, frame limit {}",
            labels.len(),
            config.thresholds.len(),
            config.frame_limit
        );

        Self {
            classifier,
            config: Arc::new(config),
            labels: Arc::new(labels),
        }
    }

    /// Validate a raw config and build an engine, failing before any frame is seen.
    pub fn from_config(classifier: Arc<dyn SignClassifier>, config: EngineConfig) -> Result<Self> {
        Ok(Self::new(classifier, DecisionConfig::try_from(config)?))
    }

    pub fn config(&self) -> &DecisionConfig {
        &self.config
    }

    pub fn labels(&self) -> &LabelBook {
        &self.labels
    }

    /// Decide on a single image. Thresholds still apply; without a hit the result carries
    /// every detected label with reason `FrameLimit`.
    pub fn classify_image(&self, image: &RgbImage) -> DecisionResult {
        let config = self.config.with_frame_limit(1);
        let session = Session::new(&config, &self.labels);

        METER.tick_decoded();
        let detections = self.detect(image).unwrap_or_else(|err| {
            log::warn!("Image: {}", err);
            vec![]
        });

        let result = match session.step(&detections) {
            Step::Finished(result) => result,
            Step::Streaming(session) => session.exhaust(EndCause::FrameLimit),
        };
        METER.tick_decision();
        log::info!("Image decision: {:?}", result.labels);

        result
    }

    /// Decide on a frame stream with the engine's config.
    pub fn classify_stream<S: FrameSource>(&self, source: S, cancel: &CancellationToken) -> DecisionResult {
        self.classify_stream_with(source, &self.config, cancel)
    }

    /// Decide on a frame stream with an explicit config.
    ///
    /// Frames are consumed strictly in order. A frame that fails to decode or classify counts
    /// as a frame without detections. Cancellation is honoured between frames and yields a
    /// best-effort result with reason `TimeLimit`. The source is released before returning.
    pub fn classify_stream_with<S: FrameSource>(
        &self,
        source: S,
        config: &DecisionConfig,
        cancel: &CancellationToken,
    ) -> DecisionResult {
        let mut source = BoundedSource::new(source, config.frame_limit, config.time_budget, cancel.clone());
        let mut session = Session::new(config, &self.labels);

        let result = loop {
            let index = session.next_index();
            let outcome = source.next_frame().map(|frame| {
                frame.and_then(|frame| {
                    METER.tick_decoded();
                    self.detect(&frame)
                })
            });
            let detections = match outcome {
                Some(Ok(detections)) => detections,
                Some(Err(err)) => {
                    log::warn!("Frame {}: {}", index, err);
                    vec![]
                }
                None => break session.exhaust(source.end_cause().unwrap_or(EndCause::Exhausted)),
            };

            session = match session.step(&detections) {
                Step::Streaming(session) => session,
                Step::Finished(result) => break result,
            };
        };
        source.release();

        METER.tick_decision();
        log::info!(
            "Decision after {} frames ({:?}): {:?}",
            result.frames_processed,
            result.reason,
            result.labels
        );

        result
    }

    fn detect(&self, frame: &RgbImage) -> std::result::Result<Vec<Detection>, FrameError> {
        let detections = self
            .classifier
            .classify(frame)
            .map_err(|err| FrameError::Classify(format!("{err:#}")))?;
        METER.tick_classified();
        Ok(detections)
    }
}
