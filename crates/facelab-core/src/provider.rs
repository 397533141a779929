//! Capability traits for the vision providers.
//!
//! The session pipeline only sees these traits; concrete backends
//! ([`crate::onnx`], [`crate::eigen`], [`crate::mock`]) are wired in by
//! the application at startup.

use crate::types::{BoundingBox, GrayImage, Prediction};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VisionError {
    #[error("detection failed: {0}")]
    Detect(String),
    #[error("training set is empty")]
    EmptyTrainingSet,
    #[error("training failed: {0}")]
    Train(String),
    #[error("prediction failed: {0}")]
    Predict(String),
    #[error("model artifact unreadable: {0}")]
    ModelDecode(String),
}

/// Tuning knobs handed to a detector backend at construction time.
///
/// `scale_factor` and `min_neighbors` carry cascade-style semantics;
/// backends with a different parameter space are free to ignore them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectParams {
    pub scale_factor: f32,
    pub min_neighbors: u32,
}

impl Default for DetectParams {
    fn default() -> Self {
        Self { scale_factor: 1.3, min_neighbors: 5 }
    }
}

/// Finds face boxes in an intensity frame. Box coordinates are in the
/// coordinate space of the frame passed in; iteration order is whatever
/// the backend produces.
pub trait FaceDetector: Send {
    fn detect(&mut self, frame: &GrayImage) -> Result<Vec<BoundingBox>, VisionError>;
}

/// Classifies a face crop against a trained model.
pub trait FacePredictor: Send + std::fmt::Debug {
    fn predict(&self, face: &GrayImage) -> Result<Prediction, VisionError>;
}

/// Fits a model over labeled sample crops and revives predictors from
/// persisted artifacts. The artifact is opaque JSON owned by the backend.
pub trait FaceTrainer: Send + Sync {
    fn train(
        &self,
        samples: &[GrayImage],
        labels: &[usize],
    ) -> Result<serde_json::Value, VisionError>;

    fn load(&self, artifact: &serde_json::Value) -> Result<Box<dyn FacePredictor>, VisionError>;
}
