//! facelab-store — on-disk subject galleries and the trained-model
//! artifact.
//!
//! Layout: one subdirectory per enrolled subject under the data root,
//! holding sequentially numbered sample crops; one well-known JSON file
//! for the trained model plus the label ordering it was fitted with.

pub mod artifact;
pub mod gallery;

pub use artifact::{load_model, save_model, ModelFile};
pub use gallery::Gallery;

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("invalid subject name: {0:?}")]
    InvalidSubjectName(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("image codec error: {0}")]
    Image(#[from] image::ImageError),
    #[error("no trained model at {0}")]
    ModelMissing(PathBuf),
    #[error("trained model unreadable: {0}")]
    ModelCorrupt(String),
}
