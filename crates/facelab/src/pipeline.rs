//! Per-tick frame pipeline and the background jobs built on it.
//!
//! All three live workflows share one tick shape: read a frame,
//! normalize it, detect faces, handle each box for the active mode,
//! emit the annotated frame. The worker owns the camera and the
//! detector for the whole session and drops the camera before sending
//! its terminal event, so the device is free by the time the
//! controller joins the thread.

use crate::events::{
    AnnotatedFrame, Annotation, AnnotationTag, ErrorKind, SessionEvent, Summary,
};
use crate::Config;
use facelab_core::{FaceDetector, FacePredictor, FaceTrainer, GrayImage, VisionError};
use facelab_hw::{camera::ReadError, Frame, FrameSource};
use facelab_store::{save_model, Gallery, ModelFile};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Share of the progress bar covered by sample loading during
/// training; the fit itself exposes no sub-progress.
const TRAINING_LOAD_SHARE: f32 = 0.9;

/// Worker-side handle: the event channel plus the cancellation flag the
/// interactive thread raises on `stop()`.
pub struct WorkerCtx {
    events: mpsc::UnboundedSender<SessionEvent>,
    cancel: Arc<AtomicBool>,
}

impl WorkerCtx {
    pub(crate) fn new(events: mpsc::UnboundedSender<SessionEvent>, cancel: Arc<AtomicBool>) -> Self {
        Self { events, cancel }
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    fn send(&self, event: SessionEvent) {
        // A dropped receiver means the presentation loop is gone; the
        // cancellation flag will end the session shortly.
        let _ = self.events.send(event);
    }

    fn fail(&self, kind: ErrorKind, message: String) {
        tracing::error!(?kind, message, "session failed");
        self.send(SessionEvent::Failed { kind, message });
    }
}

/// Frame normalization knobs, copied out of [`Config`] per session.
#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    pub working_width: u32,
    pub sample_size: u32,
    pub mirror: bool,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            working_width: config.working_width,
            sample_size: config.sample_size,
            mirror: config.mirror_preview,
        }
    }
}

/// Mirror (cosmetic), scale to the working width, convert to intensity.
fn normalize(mut frame: Frame, settings: &PipelineSettings) -> (Frame, GrayImage) {
    if settings.mirror {
        frame.mirror_horizontal();
    }
    let frame = frame.resize_to_width(settings.working_width);
    let gray = GrayImage::from_rgb(&frame.data, frame.width, frame.height)
        .expect("frame pixel buffer always matches its dimensions");
    (frame, gray)
}

enum LoopEnd {
    Finished,
    Fault { kind: ErrorKind, message: String },
}

/// Enrollment capture: persist a crop per detected face until the
/// ceiling is reached or the stream ends.
pub fn run_capture(
    mut camera: Box<dyn FrameSource>,
    mut detector: Box<dyn FaceDetector>,
    gallery: Gallery,
    subject: String,
    ceiling: usize,
    settings: PipelineSettings,
    ctx: WorkerCtx,
) {
    let mut saved = 0usize;

    let end = 'session: loop {
        if ctx.cancelled() {
            break LoopEnd::Finished;
        }
        let frame = match camera.read_frame() {
            Ok(frame) => frame,
            Err(ReadError::EndOfStream) => break LoopEnd::Finished,
            Err(ReadError::Device(e)) => {
                break LoopEnd::Fault { kind: ErrorKind::Device, message: e };
            }
        };

        let (frame, gray) = normalize(frame, &settings);
        let boxes = match detector.detect(&gray) {
            Ok(boxes) => boxes,
            Err(e) => break LoopEnd::Fault { kind: ErrorKind::Io, message: e.to_string() },
        };

        let mut annotations = Vec::new();
        for rect in boxes {
            // Ceiling reached mid-tick: remaining boxes are ignored,
            // never partially written.
            if saved >= ceiling {
                break;
            }
            let crop = gray.crop(rect).resize(settings.sample_size, settings.sample_size);
            if let Err(e) = gallery.save_sample(&subject, saved, &crop) {
                ctx.send(SessionEvent::FrameReady(AnnotatedFrame { frame, annotations }));
                break 'session LoopEnd::Fault { kind: ErrorKind::Io, message: e.to_string() };
            }
            saved += 1;
            annotations.push(Annotation::face(rect));
            ctx.send(SessionEvent::Progress(saved as f32 / ceiling.max(1) as f32));
        }
        ctx.send(SessionEvent::FrameReady(AnnotatedFrame { frame, annotations }));

        if saved >= ceiling {
            break LoopEnd::Finished;
        }
    };

    // Release the device before the terminal event so the controller
    // can reopen it for the next session as soon as it joins us.
    drop(camera);

    match end {
        LoopEnd::Finished => {
            tracing::info!(subject = %subject, samples = saved, "capture finished");
            ctx.send(SessionEvent::Completed(Summary::Capture { subject, samples: saved }));
        }
        LoopEnd::Fault { kind, message } => ctx.fail(kind, message),
    }
}

/// What a live watch session does with each detected box.
pub enum WatchKind {
    Detect,
    Recognize {
        predictor: Box<dyn FacePredictor>,
        labels: Vec<String>,
        threshold: f64,
    },
}

/// Live detection or recognition until stop or stream end.
pub fn run_watch(
    mut camera: Box<dyn FrameSource>,
    mut detector: Box<dyn FaceDetector>,
    kind: WatchKind,
    settings: PipelineSettings,
    ctx: WorkerCtx,
) {
    let mut frames = 0u64;

    let end = 'session: loop {
        if ctx.cancelled() {
            break LoopEnd::Finished;
        }
        let frame = match camera.read_frame() {
            Ok(frame) => frame,
            Err(ReadError::EndOfStream) => break LoopEnd::Finished,
            Err(ReadError::Device(e)) => {
                break LoopEnd::Fault { kind: ErrorKind::Device, message: e };
            }
        };

        let (frame, gray) = normalize(frame, &settings);
        let boxes = match detector.detect(&gray) {
            Ok(boxes) => boxes,
            Err(e) => break LoopEnd::Fault { kind: ErrorKind::Io, message: e.to_string() },
        };

        let mut annotations = Vec::with_capacity(boxes.len());
        match &kind {
            WatchKind::Detect => {
                annotations.extend(boxes.into_iter().map(Annotation::face));
            }
            WatchKind::Recognize { predictor, labels, threshold } => {
                for rect in boxes {
                    // Crop and resize exactly as capture does, so the
                    // probe matches the training distribution.
                    let probe =
                        gray.crop(rect).resize(settings.sample_size, settings.sample_size);
                    let prediction = match predictor.predict(&probe) {
                        Ok(p) => p,
                        Err(e) => {
                            break 'session LoopEnd::Fault {
                                kind: ErrorKind::Io,
                                message: e.to_string(),
                            };
                        }
                    };
                    let annotation = if prediction.distance < *threshold {
                        Annotation {
                            rect,
                            // A label the model file cannot resolve is
                            // rendered as "?", matching an out-of-date
                            // artifact rather than crashing.
                            label: Some(
                                labels
                                    .get(prediction.label)
                                    .cloned()
                                    .unwrap_or_else(|| "?".to_string()),
                            ),
                            tag: AnnotationTag::Match,
                            distance: Some(prediction.distance),
                        }
                    } else {
                        Annotation {
                            rect,
                            label: Some("unknown".to_string()),
                            tag: AnnotationTag::Unknown,
                            distance: Some(prediction.distance),
                        }
                    };
                    annotations.push(annotation);
                }
            }
        }

        ctx.send(SessionEvent::FrameReady(AnnotatedFrame { frame, annotations }));
        frames += 1;
    };

    drop(camera);

    match end {
        LoopEnd::Finished => {
            tracing::info!(frames, "watch session finished");
            ctx.send(SessionEvent::Completed(Summary::Watch { frames }));
        }
        LoopEnd::Fault { kind, message } => ctx.fail(kind, message),
    }
}

/// Inputs for a one-shot training job.
pub struct TrainingJob {
    pub gallery: Gallery,
    pub trainer: Arc<dyn FaceTrainer>,
    pub model_path: PathBuf,
}

/// Train over every enrolled subject, in lexicographic label order, and
/// persist the artifact. Unreadable samples are skipped; only an empty
/// accumulated set is fatal.
pub fn run_training(job: TrainingJob, ctx: WorkerCtx) {
    let subjects = match job.gallery.list_subjects() {
        Ok(subjects) => subjects,
        Err(e) => return ctx.fail(ErrorKind::Io, e.to_string()),
    };

    let mut files = Vec::new();
    for (label, subject) in subjects.iter().enumerate() {
        match job.gallery.list_sample_paths(subject) {
            Ok(paths) => files.extend(paths.into_iter().map(|p| (label, p))),
            Err(e) => return ctx.fail(ErrorKind::Io, e.to_string()),
        }
    }

    let total = files.len().max(1);
    let mut samples = Vec::new();
    let mut labels = Vec::new();
    let mut skipped = 0usize;

    for (i, (label, path)) in files.iter().enumerate() {
        if ctx.cancelled() {
            ctx.send(SessionEvent::Completed(Summary::Training {
                trained: false,
                subjects: subjects.len(),
                samples: samples.len(),
                skipped,
            }));
            return;
        }
        match job.gallery.load_sample(path) {
            Ok(image) => {
                samples.push(image);
                labels.push(*label);
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping unreadable sample");
                skipped += 1;
            }
        }
        ctx.send(SessionEvent::Progress(
            (i + 1) as f32 / total as f32 * TRAINING_LOAD_SHARE,
        ));
    }

    if samples.is_empty() {
        return ctx.fail(
            ErrorKind::Precondition,
            "no readable samples across enrolled subjects".to_string(),
        );
    }

    tracing::info!(
        subjects = subjects.len(),
        samples = samples.len(),
        skipped,
        "fitting model"
    );
    let artifact = match job.trainer.train(&samples, &labels) {
        Ok(artifact) => artifact,
        Err(VisionError::EmptyTrainingSet) => {
            return ctx.fail(ErrorKind::Precondition, "training set is empty".to_string());
        }
        Err(e) => return ctx.fail(ErrorKind::Io, e.to_string()),
    };

    // Stop raised while fitting: honor it by not replacing the
    // previous artifact.
    if ctx.cancelled() {
        ctx.send(SessionEvent::Completed(Summary::Training {
            trained: false,
            subjects: subjects.len(),
            samples: samples.len(),
            skipped,
        }));
        return;
    }

    let file = ModelFile { labels: subjects.clone(), model: artifact };
    if let Err(e) = save_model(&job.model_path, &file) {
        return ctx.fail(ErrorKind::Io, e.to_string());
    }

    ctx.send(SessionEvent::Progress(1.0));
    tracing::info!(path = %job.model_path.display(), "model persisted");
    ctx.send(SessionEvent::Completed(Summary::Training {
        trained: true,
        subjects: subjects.len(),
        samples: samples.len(),
        skipped,
    }));
}
