//! Per-frame observations produced by a classifier.
//!
use serde::Serialize;

/// 0-based position of a consumed frame within one request.
pub type FrameIndex = usize;

/// Bounding box as `[x_top_left, y_top_left, x_bottom_right, y_bottom_right]`, normalized to
/// the frame size.
pub type Bbox = [f32; 4];

/// One classifier observation.
///
/// Confidence and region are informational unless the decision config filters or weights on
/// confidence.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Detection {
    pub label: String,
    pub confidence: f32,
    pub region: Option<Bbox>,
}

impl Detection {
    pub fn new(label: impl Into<String>, confidence: f32) -> Self {
        Self {
            label: label.into(),
            confidence,
            region: None,
        }
    }

    pub fn with_region(mut self, region: Bbox) -> Self {
        self.region = Some(region);
        self
    }
}
