use facelab_core::DetectParams;
use std::path::PathBuf;

/// Application configuration, loaded from `FACELAB_*` environment
/// variables with defaults matching the stock workstation setup.
#[derive(Debug, Clone)]
pub struct Config {
    /// V4L2 device index (default 0, the first camera).
    pub camera_index: u32,
    /// Root directory holding one subdirectory per enrolled subject.
    pub data_dir: PathBuf,
    /// Well-known path of the trained model artifact.
    pub model_path: PathBuf,
    /// Path of the ONNX face detection model.
    pub detector_model_path: PathBuf,
    /// Maximum samples persisted per enrollment session.
    pub capture_ceiling: usize,
    /// Frames are scaled to this width before detection.
    pub working_width: u32,
    /// Side length of the square sample crops.
    pub sample_size: u32,
    /// Acceptance threshold on the predictor distance; at or above it a
    /// face is annotated as unknown. Scale is provider-defined.
    pub distance_threshold: f64,
    /// Mirror the preview horizontally (cosmetic).
    pub mirror_preview: bool,
    /// Detector tuning, for backends that honor cascade-style knobs.
    pub detect_params: DetectParams,
}

impl Config {
    /// Load configuration from the environment.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("FACELAB_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_data_root().join("subjects"));

        let model_path = std::env::var("FACELAB_MODEL_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_data_root().join("model.json"));

        let detector_model_path = std::env::var("FACELAB_DETECTOR_MODEL")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_data_root().join("models/det_10g.onnx"));

        Self {
            camera_index: env_u32("FACELAB_CAMERA_INDEX", 0),
            data_dir,
            model_path,
            detector_model_path,
            capture_ceiling: env_usize("FACELAB_CAPTURE_CEILING", 351),
            working_width: env_u32("FACELAB_WORKING_WIDTH", 640),
            sample_size: env_u32("FACELAB_SAMPLE_SIZE", 160),
            distance_threshold: env_f64("FACELAB_DISTANCE_THRESHOLD", 8000.0),
            mirror_preview: std::env::var("FACELAB_MIRROR")
                .map(|v| v != "0")
                .unwrap_or(false),
            detect_params: DetectParams {
                scale_factor: env_f64("FACELAB_SCALE_FACTOR", 1.3) as f32,
                min_neighbors: env_u32("FACELAB_MIN_NEIGHBORS", 5),
            },
        }
    }
}

/// `$XDG_DATA_HOME/facelab`, falling back through `$HOME/.local/share`.
fn default_data_root() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facelab")
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
