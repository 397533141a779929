//! Scripted vision backends for tests.
//!
//! The session machinery treats providers as opaque, so exercising the
//! state machine and pipeline only needs deterministic stand-ins: a
//! detector that replays a box script and a trainer whose predictor
//! cycles through canned answers.

use crate::provider::{FaceDetector, FacePredictor, FaceTrainer, VisionError};
use crate::types::{BoundingBox, GrayImage, Prediction};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Replays a per-frame script of detections.
pub struct ScriptedDetector {
    script: Vec<Vec<BoundingBox>>,
    cursor: usize,
    repeat_last: bool,
}

impl ScriptedDetector {
    /// The same boxes on every frame, forever.
    pub fn always(boxes: Vec<BoundingBox>) -> Self {
        Self { script: vec![boxes], cursor: 0, repeat_last: true }
    }

    /// No faces, ever.
    pub fn never() -> Self {
        Self::always(Vec::new())
    }

    /// One script entry per frame; frames past the end see no faces.
    pub fn sequence(script: Vec<Vec<BoundingBox>>) -> Self {
        Self { script, cursor: 0, repeat_last: false }
    }
}

impl FaceDetector for ScriptedDetector {
    fn detect(&mut self, _frame: &GrayImage) -> Result<Vec<BoundingBox>, VisionError> {
        match self.script.get(self.cursor) {
            Some(boxes) => {
                if !self.repeat_last || self.cursor + 1 < self.script.len() {
                    self.cursor += 1;
                }
                Ok(boxes.clone())
            }
            None => Ok(Vec::new()),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct CannedModel {
    answers: Vec<(usize, f64)>,
    trained_on: usize,
}

/// Trainer whose artifact embeds a fixed answer script.
pub struct CannedTrainer {
    pub answers: Vec<(usize, f64)>,
}

impl CannedTrainer {
    /// Every prediction resolves to `label` at `distance`.
    pub fn constant(label: usize, distance: f64) -> Self {
        Self { answers: vec![(label, distance)] }
    }
}

impl FaceTrainer for CannedTrainer {
    fn train(
        &self,
        samples: &[GrayImage],
        labels: &[usize],
    ) -> Result<serde_json::Value, VisionError> {
        if samples.is_empty() {
            return Err(VisionError::EmptyTrainingSet);
        }
        if samples.len() != labels.len() {
            return Err(VisionError::Train("samples/labels length mismatch".into()));
        }
        let model = CannedModel { answers: self.answers.clone(), trained_on: samples.len() };
        serde_json::to_value(&model).map_err(|e| VisionError::Train(e.to_string()))
    }

    fn load(&self, artifact: &serde_json::Value) -> Result<Box<dyn FacePredictor>, VisionError> {
        let model: CannedModel = serde_json::from_value(artifact.clone())
            .map_err(|e| VisionError::ModelDecode(e.to_string()))?;
        Ok(Box::new(CannedPredictor { answers: model.answers, next: AtomicUsize::new(0) }))
    }
}

/// Cycles through the canned answers, one per call.
#[derive(Debug)]
pub struct CannedPredictor {
    answers: Vec<(usize, f64)>,
    next: AtomicUsize,
}

impl FacePredictor for CannedPredictor {
    fn predict(&self, _face: &GrayImage) -> Result<Prediction, VisionError> {
        if self.answers.is_empty() {
            return Err(VisionError::Predict("no canned answers".into()));
        }
        let i = self.next.fetch_add(1, Ordering::Relaxed) % self.answers.len();
        let (label, distance) = self.answers[i];
        Ok(Prediction { label, distance })
    }
}
