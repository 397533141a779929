//! facelab — webcam enrollment, training, detection and recognition.
//!
//! The heart of the crate is [`session::SessionController`]: a
//! five-mode state machine that owns the camera lifecycle, runs one
//! background worker at a time, and streams per-frame results to the
//! presentation loop over an ordered event channel.

pub mod config;
pub mod events;
pub mod pipeline;
pub mod session;

pub use config::Config;
pub use events::{AnnotatedFrame, Annotation, AnnotationTag, ErrorKind, Mode, SessionEvent, Summary};
pub use session::{Backends, CameraFactory, DetectorFactory, SessionController, SessionError};
