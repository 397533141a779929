//! facelab-core — Face detection and recognition capabilities.
//!
//! Detection runs an SCRFD model via ONNX Runtime; recognition uses an
//! eigen-subspace (PCA + nearest-neighbour) classifier trained on
//! enrolled sample crops. Both sit behind capability traits so the
//! session pipeline never depends on a concrete backend.

pub mod eigen;
pub mod mock;
pub mod onnx;
pub mod provider;
pub mod types;

pub use provider::{DetectParams, FaceDetector, FacePredictor, FaceTrainer, VisionError};
pub use types::{BoundingBox, GrayImage, Prediction};
