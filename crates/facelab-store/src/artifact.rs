use crate::StoreError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// The persisted trained model: the provider's opaque payload plus the
/// subject names in the label order used at training time.
///
/// Recording the ordering here, instead of re-listing the gallery at
/// recognition time, pins label resolution to the exact listing the
/// model was fitted with even if subjects are enrolled afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelFile {
    /// Subject name per dense label index, lexicographic at train time.
    pub labels: Vec<String>,
    /// Provider-owned model payload.
    pub model: serde_json::Value,
}

impl ModelFile {
    /// Resolve a predictor label index to a subject name.
    pub fn subject_for_label(&self, label: usize) -> Option<&str> {
        self.labels.get(label).map(String::as_str)
    }
}

/// Write the artifact atomically (temp file, then rename), replacing
/// any previous model.
pub fn save_model(path: &Path, model: &ModelFile) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_vec_pretty(model)
        .map_err(|e| StoreError::ModelCorrupt(e.to_string()))?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)?;
    tracing::debug!(path = %path.display(), labels = model.labels.len(), "model artifact written");
    Ok(())
}

/// Read the artifact back. Distinguishes a missing file (the caller has
/// simply never trained) from an unreadable one.
pub fn load_model(path: &Path) -> Result<ModelFile, StoreError> {
    if !path.is_file() {
        return Err(StoreError::ModelMissing(path.to_path_buf()));
    }
    let bytes = fs::read(path)?;
    serde_json::from_slice(&bytes).map_err(|e| StoreError::ModelCorrupt(e.to_string()))
}
