use crate::StoreError;
use facelab_core::GrayImage;
use std::fs;
use std::path::{Path, PathBuf};

/// The enrollment gallery: a root directory with one subdirectory per
/// subject. Subject names double as directory names, so they must be
/// plain path components.
#[derive(Debug, Clone)]
pub struct Gallery {
    root: PathBuf,
}

/// A name is usable as a directory key: non-empty, no separators, no
/// traversal, not hidden.
pub fn is_valid_subject_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.starts_with('.')
        && !name.contains(['/', '\\', '\0'])
}

impl Gallery {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn subject_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Create the subject's directory (and the root) if missing.
    pub fn create_subject(&self, name: &str) -> Result<(), StoreError> {
        if !is_valid_subject_name(name) {
            return Err(StoreError::InvalidSubjectName(name.to_string()));
        }
        fs::create_dir_all(self.subject_dir(name))?;
        Ok(())
    }

    /// Enrolled subjects in lexicographic order. This ordering defines
    /// the dense training labels, so it must be deterministic.
    pub fn list_subjects(&self) -> Result<Vec<String>, StoreError> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }
        let mut subjects = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) if is_valid_subject_name(&name) => subjects.push(name),
                Ok(_) => {}
                Err(raw) => {
                    tracing::warn!(
                        name = %raw.to_string_lossy(),
                        "skipping non-UTF-8 gallery entry"
                    );
                }
            }
        }
        subjects.sort();
        Ok(subjects)
    }

    /// Persist one sample crop as `sample_NNNN.png`. Samples are
    /// write-once; an existing file at the same index is replaced only
    /// by a fresh capture session for the same subject.
    pub fn save_sample(
        &self,
        subject: &str,
        index: usize,
        sample: &GrayImage,
    ) -> Result<PathBuf, StoreError> {
        let path = self.subject_dir(subject).join(format!("sample_{index:04}.png"));
        let buf: image::ImageBuffer<image::Luma<u8>, Vec<u8>> =
            image::ImageBuffer::from_raw(sample.width, sample.height, sample.data.clone())
                .expect("GrayImage dimensions are always consistent");
        buf.save(&path)?;
        Ok(path)
    }

    /// Sample files for a subject, in index order.
    pub fn list_sample_paths(&self, subject: &str) -> Result<Vec<PathBuf>, StoreError> {
        let dir = self.subject_dir(subject);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut paths: Vec<PathBuf> = fs::read_dir(&dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .collect();
        paths.sort();
        Ok(paths)
    }

    /// Decode one sample as intensity pixels. Fails on unreadable or
    /// corrupt files; the training job decides whether to skip.
    pub fn load_sample(&self, path: &Path) -> Result<GrayImage, StoreError> {
        let decoded = image::open(path)?.into_luma8();
        let (width, height) = decoded.dimensions();
        Ok(GrayImage::from_raw(decoded.into_raw(), width, height)
            .expect("decoded buffer matches its dimensions"))
    }

    pub fn sample_count(&self, subject: &str) -> Result<usize, StoreError> {
        Ok(self.list_sample_paths(subject)?.len())
    }
}
