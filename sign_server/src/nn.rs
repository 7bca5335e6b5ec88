//! Sign classifier backed by an ONNX model.
//!
use std::path::Path;

use anyhow::{Context, Result};
use image::RgbImage;
use itertools::Itertools;
use ndarray::{s, ArrayView2, Ix2};
use tract_onnx::prelude::*;

use crate::{
    config::ModelConfig,
    detection::{Bbox, Detection},
};

type NnModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Positive additive constant to avoid divide-by-zero.
const EPS: f32 = 1.0e-7;

/// Rows preceding the class scores in the model output: cx, cy, w, h.
const BOX_ROWS: usize = 4;

/// Opaque per-frame classifier.
///
/// Shared read-only between concurrent requests.
pub trait SignClassifier: Send + Sync {
    fn classify(&self, frame: &RgbImage) -> Result<Vec<Detection>>;

    /// Class index to display label.
    fn labels(&self) -> &[String];
}

pub struct OnnxSignClassifier {
    model: NnModel,
    labels: Vec<String>,
    width: u32,
    height: u32,
    max_iou: f32,
    min_confidence: f32,
}

impl OnnxSignClassifier {
    pub fn new(model_path: impl AsRef<Path>, config: &ModelConfig) -> Result<Self> {
        let model = load_model(model_path.as_ref(), config.input_width, config.input_height)?;
        Ok(Self {
            model,
            labels: config.labels.clone(),
            width: config.input_width,
            height: config.input_height,
            max_iou: config.max_iou,
            min_confidence: config.min_confidence,
        })
    }

    fn preproc(&self, input: &RgbImage) -> Tensor {
        let resized: RgbImage = image::imageops::resize(
            input,
            self.width,
            self.height,
            image::imageops::FilterType::Triangle,
        );

        tract_ndarray::Array4::from_shape_fn(
            (1, 3, self.height as usize, self.width as usize),
            |(_, c, y, x)| resized[(x as _, y as _)][c] as f32 / 255.0,
        )
        .into()
    }

    fn postproc(&self, raw_nn_out: &Tensor) -> Result<Vec<Detection>> {
        let view = raw_nn_out.to_array_view::<f32>()?;
        if view.ndim() != 3 || view.shape()[1] <= BOX_ROWS {
            anyhow::bail!("unexpected model output shape {:?}", view.shape());
        }
        let predictions = view.slice(s![0, .., ..]).into_dimensionality::<Ix2>()?;

        Ok(decode_predictions(
            predictions,
            &self.labels,
            (self.width as f32, self.height as f32),
            self.min_confidence,
            self.max_iou,
        ))
    }
}

impl SignClassifier for OnnxSignClassifier {
    fn classify(&self, frame: &RgbImage) -> Result<Vec<Detection>> {
        let valid_input = tvec!(self.preproc(frame).into());
        let raw_nn_out = self.model.run(valid_input)?;
        self.postproc(&raw_nn_out[0])
    }

    fn labels(&self) -> &[String] {
        &self.labels
    }
}

fn load_model(path: &Path, width: u32, height: u32) -> Result<NnModel> {
    let input_fact = InferenceFact::dt_shape(
        f32::datum_type(),
        tvec!(1, 3, height as usize, width as usize),
    );
    let model = tract_onnx::onnx()
        .model_for_path(path)
        .with_context(|| format!("failed to load model {}", path.display()))?
        .with_input_fact(0, input_fact)?
        .into_optimized()?
        .into_runnable()?;

    Ok(model)
}

/// Decode a `[4 + num_classes, anchors]` prediction matrix.
///
/// Each column holds the box center, width and height in input pixels followed by one score
/// per class. Every anchor keeps its best class if that score exceeds `min_confidence`; the
/// survivors are reduced per class with non-maximum suppression. Output is ordered by class
/// index, then descending confidence.
pub fn decode_predictions(
    predictions: ArrayView2<f32>,
    labels: &[String],
    (input_width, input_height): (f32, f32),
    min_confidence: f32,
    max_iou: f32,
) -> Vec<Detection> {
    let num_classes = predictions.nrows().saturating_sub(BOX_ROWS);

    let candidates = predictions.columns().into_iter().filter_map(|column| {
        let (class, confidence) = (0..num_classes)
            .map(|c| (c, column[BOX_ROWS + c]))
            .max_by(|a, b| a.1.total_cmp(&b.1))?;
        if confidence <= min_confidence {
            return None;
        }

        let (cx, cy, w, h) = (column[0], column[1], column[2], column[3]);
        let bbox: Bbox = [
            ((cx - w / 2.0) / input_width).clamp(0.0, 1.0),
            ((cy - h / 2.0) / input_height).clamp(0.0, 1.0),
            ((cx + w / 2.0) / input_width).clamp(0.0, 1.0),
            ((cy + h / 2.0) / input_height).clamp(0.0, 1.0),
        ];
        Some((class, confidence, bbox))
    });

    candidates
        .into_group_map_by(|(class, _, _)| *class)
        .into_iter()
        .sorted_by_key(|(class, _)| *class)
        .flat_map(|(class, group)| {
            let mut sorted: Vec<(f32, Bbox)> = group
                .into_iter()
                .map(|(_, confidence, bbox)| (confidence, bbox))
                .collect();
            sorted.sort_by(|a, b| a.0.total_cmp(&b.0));

            let label = labels
                .get(class)
                .cloned()
                .unwrap_or_else(|| format!("class_{class}"));

            non_maximum_suppression(sorted, max_iou)
                .into_iter()
                .map(move |(confidence, bbox)| {
                    Detection::new(label.clone(), confidence).with_region(bbox)
                })
        })
        .collect()
}

/// Run non-maximum-suppression on candidate bounding boxes.
///
/// Takes candidates sorted by ascending confidence and walks them from the most confident
/// one. A candidate is kept only if its IoU with every box kept so far is at most `max_iou`.
fn non_maximum_suppression(
    mut sorted_bboxes_with_confidences: Vec<(f32, Bbox)>,
    max_iou: f32,
) -> Vec<(f32, Bbox)> {
    let mut selected: Vec<(f32, Bbox)> = vec![];
    'candidates: while let Some((confidence, bbox)) = sorted_bboxes_with_confidences.pop() {
        for (_, selected_bbox) in selected.iter() {
            if iou(&bbox, selected_bbox) > max_iou {
                continue 'candidates;
            }
        }

        selected.push((confidence, bbox))
    }

    selected
}

/// Calculate the intersection-over-union metric for two bounding boxes.
fn iou(bbox_a: &Bbox, bbox_b: &Bbox) -> f32 {
    // Non-overlapping boxes give an ill-defined overlap box, whose area is zero
    let overlap_box: Bbox = [
        f32::max(bbox_a[0], bbox_b[0]),
        f32::max(bbox_a[1], bbox_b[1]),
        f32::min(bbox_a[2], bbox_b[2]),
        f32::min(bbox_a[3], bbox_b[3]),
    ];

    let overlap_area = bbox_area(&overlap_box);

    // Avoid division-by-zero with `EPS`
    overlap_area / (bbox_area(bbox_a) + bbox_area(bbox_b) - overlap_area + EPS)
}

/// Area enclosed by `[x_top_left, y_top_left, x_bottom_right, y_bottom_right]`, zero if the
/// corners are inverted.
fn bbox_area(bbox: &Bbox) -> f32 {
    let width = bbox[2] - bbox[0];
    let height = bbox[3] - bbox[1];
    if width < 0.0 || height < 0.0 {
        return 0.0;
    }

    width * height
}
