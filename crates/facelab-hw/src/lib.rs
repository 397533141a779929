//! facelab-hw — webcam capture and frame operations.

pub mod camera;
pub mod frame;

pub use camera::{CameraError, FrameSource, ReadError, V4lCamera};
pub use frame::Frame;
