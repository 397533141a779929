//! The five-mode session state machine.
//!
//! `SessionController` lives on the presentation loop's thread and is
//! the single source of truth for which workflow is active. Starting a
//! workflow opens the camera (when one is needed), spawns one worker
//! thread, and hands it the camera plus a cancellation flag; the worker
//! streams [`SessionEvent`]s back over the controller's channel and
//! sends exactly one terminal event before exiting.
//!
//! Teardown is cooperative: `stop()` raises the flag and returns
//! immediately, and the mode stays non-Idle — rejecting further
//! `start_*` calls — until the terminal event is processed and
//! `finish()` joins the worker. That join is what makes camera release
//! race-free: the handle is dropped by the worker itself, strictly
//! before the next session can open the device again.

use crate::config::Config;
use crate::events::{Mode, SessionEvent};
use crate::pipeline::{self, PipelineSettings, TrainingJob, WatchKind, WorkerCtx};
use facelab_core::{FaceDetector, FaceTrainer, VisionError};
use facelab_hw::{CameraError, FrameSource};
use facelab_store::{gallery::is_valid_subject_name, load_model, Gallery, StoreError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use thiserror::Error;
use tokio::sync::mpsc;

/// Synchronous rejection of a presentation-surface command. These never
/// change the mode and never leave a camera open.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("invalid subject name: {0}")]
    Validation(String),
    #[error("another workflow is active")]
    Busy,
    #[error("camera error: {0}")]
    Device(#[from] CameraError),
    #[error("{0}")]
    Precondition(String),
    #[error("model load failed: {0}")]
    ModelLoad(String),
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

/// Opens a camera by device index. Injected so tests can script frames.
pub type CameraFactory =
    Arc<dyn Fn(u32) -> Result<Box<dyn FrameSource>, CameraError> + Send + Sync>;

/// Builds a fresh detector for each session.
pub type DetectorFactory =
    Arc<dyn Fn() -> Result<Box<dyn FaceDetector>, VisionError> + Send + Sync>;

/// The pluggable capability providers behind the session core.
#[derive(Clone)]
pub struct Backends {
    pub cameras: CameraFactory,
    pub detectors: DetectorFactory,
    pub trainer: Arc<dyn FaceTrainer>,
}

struct ActiveSession {
    cancel: Arc<AtomicBool>,
    worker: thread::JoinHandle<()>,
}

pub struct SessionController {
    config: Config,
    gallery: Gallery,
    backends: Backends,
    events: mpsc::UnboundedSender<SessionEvent>,
    mode: Mode,
    active: Option<ActiveSession>,
}

impl SessionController {
    /// Build a controller and the event stream its workers feed.
    pub fn new(
        config: Config,
        backends: Backends,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let gallery = Gallery::new(config.data_dir.clone());
        (
            Self { config, gallery, backends, events: tx, mode: Mode::Idle, active: None },
            rx,
        )
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn gallery(&self) -> &Gallery {
        &self.gallery
    }

    /// Begin enrollment capture for `name`.
    pub fn start_capture(&mut self, name: &str) -> Result<(), SessionError> {
        self.ensure_idle()?;

        let subject = name.trim().to_string();
        if !is_valid_subject_name(&subject) {
            return Err(SessionError::Validation(subject));
        }
        self.gallery.create_subject(&subject)?;

        let camera = self.open_camera()?;
        let detector = self.build_detector()?;
        let gallery = self.gallery.clone();
        let settings = PipelineSettings::from_config(&self.config);
        let ceiling = self.config.capture_ceiling;

        tracing::info!(subject = %subject, ceiling, "starting capture");
        self.spawn(Mode::Capturing, move |ctx| {
            pipeline::run_capture(camera, detector, gallery, subject, ceiling, settings, ctx);
        });
        Ok(())
    }

    /// Begin a training job over all enrolled subjects.
    pub fn start_training(&mut self) -> Result<(), SessionError> {
        self.ensure_idle()?;

        let subjects = self.gallery.list_subjects()?;
        if subjects.is_empty() {
            return Err(SessionError::Precondition(
                "no enrolled subjects; capture samples first".into(),
            ));
        }

        let job = TrainingJob {
            gallery: self.gallery.clone(),
            trainer: self.backends.trainer.clone(),
            model_path: self.config.model_path.clone(),
        };

        tracing::info!(subjects = subjects.len(), "starting training");
        self.spawn(Mode::Training, move |ctx| pipeline::run_training(job, ctx));
        Ok(())
    }

    /// Begin live face detection.
    pub fn start_detect(&mut self) -> Result<(), SessionError> {
        self.ensure_idle()?;

        let camera = self.open_camera()?;
        let detector = self.build_detector()?;
        let settings = PipelineSettings::from_config(&self.config);

        tracing::info!("starting detection");
        self.spawn(Mode::Detecting, move |ctx| {
            pipeline::run_watch(camera, detector, WatchKind::Detect, settings, ctx);
        });
        Ok(())
    }

    /// Begin live recognition against the persisted model.
    ///
    /// The artifact is validated before the camera is touched, so a
    /// missing or corrupt model leaves no device open.
    pub fn start_recognize(&mut self) -> Result<(), SessionError> {
        self.ensure_idle()?;

        let file = match load_model(&self.config.model_path) {
            Ok(file) => file,
            Err(StoreError::ModelMissing(path)) => {
                return Err(SessionError::Precondition(format!(
                    "no trained model at {}; train first",
                    path.display()
                )));
            }
            Err(e) => return Err(SessionError::ModelLoad(e.to_string())),
        };
        let predictor = self
            .backends
            .trainer
            .load(&file.model)
            .map_err(|e| SessionError::ModelLoad(e.to_string()))?;

        let camera = self.open_camera()?;
        let detector = self.build_detector()?;
        let settings = PipelineSettings::from_config(&self.config);
        let kind = WatchKind::Recognize {
            predictor,
            labels: file.labels,
            threshold: self.config.distance_threshold,
        };

        tracing::info!("starting recognition");
        self.spawn(Mode::Recognizing, move |ctx| {
            pipeline::run_watch(camera, detector, kind, settings, ctx);
        });
        Ok(())
    }

    /// Request cooperative cancellation of the active workflow. Returns
    /// immediately; the worker observes the flag within one tick and
    /// sends its terminal event.
    pub fn stop(&self) {
        if let Some(active) = &self.active {
            active.cancel.store(true, Ordering::Release);
            tracing::info!(mode = %self.mode, "stop requested");
        }
    }

    /// Acknowledge a terminal event: join the worker and return to
    /// Idle. Must be called by the presentation loop when it sees
    /// `Completed` or `Failed`; until then, all `start_*` calls are
    /// rejected as busy.
    pub fn finish(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        active.cancel.store(true, Ordering::Release);
        if active.worker.join().is_err() {
            tracing::error!("session worker panicked");
        }
        self.enter(Mode::Idle);
    }

    fn ensure_idle(&self) -> Result<(), SessionError> {
        if self.mode != Mode::Idle || self.active.is_some() {
            return Err(SessionError::Busy);
        }
        Ok(())
    }

    fn open_camera(&self) -> Result<Box<dyn FrameSource>, SessionError> {
        Ok((self.backends.cameras)(self.config.camera_index)?)
    }

    fn build_detector(&self) -> Result<Box<dyn FaceDetector>, SessionError> {
        (self.backends.detectors)().map_err(|e| SessionError::ModelLoad(e.to_string()))
    }

    fn spawn<F>(&mut self, mode: Mode, job: F)
    where
        F: FnOnce(WorkerCtx) + Send + 'static,
    {
        let cancel = Arc::new(AtomicBool::new(false));
        let ctx = WorkerCtx::new(self.events.clone(), cancel.clone());
        let worker = thread::Builder::new()
            .name("facelab-session".into())
            .spawn(move || job(ctx))
            .expect("failed to spawn session worker");
        self.active = Some(ActiveSession { cancel, worker });
        self.enter(mode);
    }

    /// The one place the mode mutates. Emits the indicator update
    /// synchronously with the transition.
    fn enter(&mut self, mode: Mode) {
        self.mode = mode;
        tracing::info!(mode = %mode, "mode changed");
        let _ = self.events.send(SessionEvent::ModeChanged(mode));
    }
}
