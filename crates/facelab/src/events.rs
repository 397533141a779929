//! Events crossing from the background worker to the presentation loop.

use facelab_core::BoundingBox;
use facelab_hw::Frame;
use serde::Serialize;

/// Operating mode. Exactly one is active; `Idle` is both the initial
/// state and the only state new workflows can start from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Mode {
    Idle,
    Capturing,
    Training,
    Detecting,
    Recognizing,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Mode::Idle => "idle",
            Mode::Capturing => "capturing",
            Mode::Training => "training",
            Mode::Detecting => "detecting",
            Mode::Recognizing => "recognizing",
        };
        f.write_str(name)
    }
}

/// Failure taxonomy surfaced to the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    Validation,
    Device,
    Precondition,
    ModelLoad,
    Io,
}

/// How an annotation should be rendered by the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnotationTag {
    /// A detected face, no identity attached.
    Face,
    /// A recognized subject; `label` carries the name.
    Match,
    /// A face whose best match fell outside the acceptance threshold.
    Unknown,
}

/// One overlay element on a frame, in frame coordinates.
#[derive(Debug, Clone)]
pub struct Annotation {
    pub rect: BoundingBox,
    pub label: Option<String>,
    pub tag: AnnotationTag,
    /// Raw predictor distance, when recognition ran on this box.
    pub distance: Option<f64>,
}

impl Annotation {
    pub fn face(rect: BoundingBox) -> Self {
        Self { rect, label: None, tag: AnnotationTag::Face, distance: None }
    }
}

/// A frame ready for display, with its overlay list. The sink draws the
/// overlays; the pipeline never rasterizes text.
#[derive(Debug, Clone)]
pub struct AnnotatedFrame {
    pub frame: Frame,
    pub annotations: Vec<Annotation>,
}

/// Terminal summary of a finished workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Summary {
    /// Enrollment capture finished (ceiling reached, stream ended, or
    /// user stop); `samples` is the number of crops persisted.
    Capture { subject: String, samples: usize },
    /// Training finished. `trained` is false when the job was cancelled
    /// before a model was written.
    Training { trained: bool, subjects: usize, samples: usize, skipped: usize },
    /// A live detect/recognize session ended after `frames` ticks.
    Watch { frames: u64 },
}

/// Events produced by the session core, in order, over one channel.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    ModeChanged(Mode),
    /// Fraction in 0..=1. Synthetic for training.
    Progress(f32),
    FrameReady(AnnotatedFrame),
    Completed(Summary),
    Failed { kind: ErrorKind, message: String },
}

impl SessionEvent {
    /// Terminal events end the session; the controller must be told to
    /// finish before another workflow can start.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionEvent::Completed(_) | SessionEvent::Failed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_classification() {
        assert!(SessionEvent::Completed(Summary::Watch { frames: 1 }).is_terminal());
        assert!(SessionEvent::Failed { kind: ErrorKind::Device, message: String::new() }
            .is_terminal());
        assert!(!SessionEvent::ModeChanged(Mode::Idle).is_terminal());
        assert!(!SessionEvent::Progress(0.5).is_terminal());
    }

    #[test]
    fn test_mode_display() {
        assert_eq!(Mode::Capturing.to_string(), "capturing");
        assert_eq!(Mode::Idle.to_string(), "idle");
    }
}
