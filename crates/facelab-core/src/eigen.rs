//! Eigen-subspace face recognizer.
//!
//! Classic eigenfaces: center the training crops, build the sample Gram
//! matrix, eigen-decompose it (cyclic Jacobi), lift the eigenvectors
//! back to pixel space, and classify probes by nearest neighbour among
//! the projected training samples. Distances are Euclidean in the
//! subspace, which puts them on the same scale the stock acceptance
//! threshold (~8000) was tuned for.

use crate::provider::{FacePredictor, FaceTrainer, VisionError};
use crate::types::{GrayImage, Prediction};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

/// Eigenvalues below this are treated as numerical noise.
const EIGENVALUE_FLOOR: f64 = 1e-6;
const JACOBI_MAX_SWEEPS: usize = 64;
const JACOBI_TOLERANCE: f64 = 1e-10;

/// Trainer configuration. `num_components` caps the retained subspace
/// dimension; `None` keeps every non-degenerate component.
#[derive(Debug, Clone)]
pub struct EigenTrainer {
    pub num_components: Option<usize>,
}

impl Default for EigenTrainer {
    fn default() -> Self {
        Self { num_components: Some(64) }
    }
}

/// Persisted model state. Serialized as the opaque artifact payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EigenModel {
    pub width: u32,
    pub height: u32,
    /// Mean training image, length `width * height`.
    mean: Vec<f32>,
    /// Orthonormal basis, one `width * height` row per component.
    components: Vec<Vec<f32>>,
    /// Each training sample projected into the subspace.
    projections: Vec<Vec<f32>>,
    /// Dense label per training sample, parallel to `projections`.
    labels: Vec<usize>,
}

impl FaceTrainer for EigenTrainer {
    fn train(
        &self,
        samples: &[GrayImage],
        labels: &[usize],
    ) -> Result<serde_json::Value, VisionError> {
        let model = self.fit(samples, labels)?;
        serde_json::to_value(&model).map_err(|e| VisionError::Train(e.to_string()))
    }

    fn load(&self, artifact: &serde_json::Value) -> Result<Box<dyn FacePredictor>, VisionError> {
        let model: EigenModel = serde_json::from_value(artifact.clone())
            .map_err(|e| VisionError::ModelDecode(e.to_string()))?;
        if model.components.len() != model.projections.first().map_or(0, Vec::len)
            || model.projections.len() != model.labels.len()
        {
            return Err(VisionError::ModelDecode(
                "inconsistent component/projection shapes".into(),
            ));
        }
        Ok(Box::new(EigenPredictor { model }))
    }
}

impl EigenTrainer {
    fn fit(&self, samples: &[GrayImage], labels: &[usize]) -> Result<EigenModel, VisionError> {
        if samples.is_empty() {
            return Err(VisionError::EmptyTrainingSet);
        }
        if samples.len() != labels.len() {
            return Err(VisionError::Train(format!(
                "{} samples but {} labels",
                samples.len(),
                labels.len()
            )));
        }
        let (width, height) = (samples[0].width, samples[0].height);
        let dim = (width * height) as usize;
        if samples.iter().any(|s| s.width != width || s.height != height) {
            return Err(VisionError::Train("samples have mixed dimensions".into()));
        }

        let n = samples.len();
        tracing::info!(samples = n, width, height, "fitting eigen subspace");

        // Mean image, then the centered sample matrix X (n x dim).
        let mut mean = vec![0.0f64; dim];
        for s in samples {
            for (m, &p) in mean.iter_mut().zip(&s.data) {
                *m += p as f64;
            }
        }
        let mean: Vec<f32> = mean.into_iter().map(|m| (m / n as f64) as f32).collect();

        let mut centered = Array2::<f32>::zeros((n, dim));
        for (i, s) in samples.iter().enumerate() {
            for (j, &p) in s.data.iter().enumerate() {
                centered[[i, j]] = p as f32 - mean[j];
            }
        }

        // Gram trick: eigen-decompose the n x n matrix X·Xᵀ instead of
        // the dim x dim covariance.
        let gram = centered.dot(&centered.t()).mapv(f64::from);
        let (eigenvalues, eigenvectors) = jacobi_eigen(gram);

        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&a, &b| eigenvalues[b].total_cmp(&eigenvalues[a]));

        let cap = self.num_components.unwrap_or(n).min(n);
        let mut components: Vec<Vec<f32>> = Vec::new();
        let mut basis_rows: Vec<Array1<f32>> = Vec::new();
        for &idx in order.iter().take(cap) {
            if eigenvalues[idx] <= EIGENVALUE_FLOOR {
                break;
            }
            let v: Array1<f32> = eigenvectors.column(idx).mapv(|x| x as f32);
            let mut u: Array1<f32> = centered.t().dot(&v);
            let norm = u.dot(&u).sqrt();
            if norm <= f32::EPSILON {
                continue;
            }
            u.mapv_inplace(|x| x / norm);
            components.push(u.to_vec());
            basis_rows.push(u);
        }
        if components.is_empty() {
            return Err(VisionError::Train(
                "training set has no variance to decompose".into(),
            ));
        }

        let projections: Vec<Vec<f32>> = (0..n)
            .map(|i| {
                let row = centered.row(i);
                basis_rows.iter().map(|u| row.dot(u)).collect()
            })
            .collect();

        tracing::info!(components = components.len(), "eigen subspace fitted");

        Ok(EigenModel {
            width,
            height,
            mean,
            components,
            projections,
            labels: labels.to_vec(),
        })
    }
}

/// Nearest-neighbour classifier over the trained subspace.
#[derive(Debug)]
pub struct EigenPredictor {
    model: EigenModel,
}

impl FacePredictor for EigenPredictor {
    fn predict(&self, face: &GrayImage) -> Result<Prediction, VisionError> {
        let m = &self.model;
        if face.width != m.width || face.height != m.height {
            return Err(VisionError::Predict(format!(
                "probe is {}x{}, model expects {}x{}",
                face.width, face.height, m.width, m.height
            )));
        }

        let centered: Vec<f32> = face
            .data
            .iter()
            .zip(&m.mean)
            .map(|(&p, &mu)| p as f32 - mu)
            .collect();

        let query: Vec<f32> = m
            .components
            .iter()
            .map(|u| u.iter().zip(&centered).map(|(a, b)| a * b).sum())
            .collect();

        let mut best: Option<(usize, f64)> = None;
        for (proj, &label) in m.projections.iter().zip(&m.labels) {
            let dist = proj
                .iter()
                .zip(&query)
                .map(|(a, b)| {
                    let d = (a - b) as f64;
                    d * d
                })
                .sum::<f64>()
                .sqrt();
            if best.map_or(true, |(_, d)| dist < d) {
                best = Some((label, dist));
            }
        }

        let (label, distance) =
            best.ok_or_else(|| VisionError::Predict("model has no training projections".into()))?;
        Ok(Prediction { label, distance })
    }
}

/// Cyclic Jacobi eigen-decomposition of a symmetric matrix.
///
/// Returns the eigenvalues and a matrix whose columns are the matching
/// eigenvectors. Unordered; callers sort.
fn jacobi_eigen(mut a: Array2<f64>) -> (Vec<f64>, Array2<f64>) {
    let n = a.nrows();
    debug_assert_eq!(n, a.ncols());
    let mut v = Array2::<f64>::eye(n);
    if n < 2 {
        return ((0..n).map(|i| a[[i, i]]).collect(), v);
    }

    for _ in 0..JACOBI_MAX_SWEEPS {
        let off: f64 = (0..n)
            .flat_map(|p| ((p + 1)..n).map(move |q| (p, q)))
            .map(|(p, q)| a[[p, q]] * a[[p, q]])
            .sum();
        if off.sqrt() < JACOBI_TOLERANCE {
            break;
        }

        for p in 0..n - 1 {
            for q in (p + 1)..n {
                let apq = a[[p, q]];
                if apq.abs() < f64::MIN_POSITIVE {
                    continue;
                }
                let theta = (a[[q, q]] - a[[p, p]]) / (2.0 * apq);
                let sign = if theta >= 0.0 { 1.0 } else { -1.0 };
                let t = sign / (theta.abs() + (theta * theta + 1.0).sqrt());
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;

                for k in 0..n {
                    let akp = a[[k, p]];
                    let akq = a[[k, q]];
                    a[[k, p]] = c * akp - s * akq;
                    a[[k, q]] = s * akp + c * akq;
                }
                for k in 0..n {
                    let apk = a[[p, k]];
                    let aqk = a[[q, k]];
                    a[[p, k]] = c * apk - s * aqk;
                    a[[q, k]] = s * apk + c * aqk;
                }
                for k in 0..n {
                    let vkp = v[[k, p]];
                    let vkq = v[[k, q]];
                    v[[k, p]] = c * vkp - s * vkq;
                    v[[k, q]] = s * vkp + c * vkq;
                }
            }
        }
    }

    ((0..n).map(|i| a[[i, i]]).collect(), v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GrayImage;
    use ndarray::array;

    fn flat(value: u8, size: u32) -> GrayImage {
        GrayImage::from_raw(vec![value; (size * size) as usize], size, size).unwrap()
    }

    fn noisy(value: u8, size: u32, seed: u8) -> GrayImage {
        let data = (0..size * size)
            .map(|i| value.wrapping_add(((i as u8).wrapping_mul(seed)) % 7))
            .collect();
        GrayImage::from_raw(data, size, size).unwrap()
    }

    #[test]
    fn test_jacobi_known_2x2() {
        // [[2, 1], [1, 2]] has eigenvalues 3 and 1.
        let (mut vals, vecs) = jacobi_eigen(array![[2.0, 1.0], [1.0, 2.0]]);
        vals.sort_by(f64::total_cmp);
        assert!((vals[0] - 1.0).abs() < 1e-9);
        assert!((vals[1] - 3.0).abs() < 1e-9);
        // Columns stay orthonormal.
        let dot = vecs[[0, 0]] * vecs[[0, 1]] + vecs[[1, 0]] * vecs[[1, 1]];
        assert!(dot.abs() < 1e-9);
    }

    #[test]
    fn test_jacobi_diagonal_is_identity() {
        let (vals, vecs) = jacobi_eigen(array![[4.0, 0.0], [0.0, 9.0]]);
        assert!((vals[0] - 4.0).abs() < 1e-12);
        assert!((vals[1] - 9.0).abs() < 1e-12);
        assert!((vecs[[0, 0]].abs() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_train_empty_set() {
        let err = EigenTrainer::default().train(&[], &[]).unwrap_err();
        assert!(matches!(err, VisionError::EmptyTrainingSet));
    }

    #[test]
    fn test_train_mixed_dimensions_rejected() {
        let samples = vec![flat(10, 8), flat(10, 4)];
        let err = EigenTrainer::default().train(&samples, &[0, 0]).unwrap_err();
        assert!(matches!(err, VisionError::Train(_)));
    }

    #[test]
    fn test_predict_separates_two_subjects() {
        let trainer = EigenTrainer::default();
        let samples = vec![
            noisy(40, 8, 1),
            noisy(40, 8, 3),
            noisy(200, 8, 1),
            noisy(200, 8, 3),
        ];
        let artifact = trainer.train(&samples, &[0, 0, 1, 1]).unwrap();
        let predictor = trainer.load(&artifact).unwrap();

        let dark = predictor.predict(&noisy(40, 8, 5)).unwrap();
        assert_eq!(dark.label, 0);
        let bright = predictor.predict(&noisy(200, 8, 5)).unwrap();
        assert_eq!(bright.label, 1);
        assert!(dark.distance < 2000.0, "in-class distance {}", dark.distance);
    }

    #[test]
    fn test_training_sample_has_near_zero_distance() {
        let trainer = EigenTrainer::default();
        let samples = vec![noisy(60, 8, 1), noisy(180, 8, 1)];
        let artifact = trainer.train(&samples, &[0, 1]).unwrap();
        let predictor = trainer.load(&artifact).unwrap();

        let p = predictor.predict(&samples[1]).unwrap();
        assert_eq!(p.label, 1);
        assert!(p.distance < 1.0, "training sample distance {}", p.distance);
    }

    #[test]
    fn test_predict_wrong_size_rejected() {
        let trainer = EigenTrainer::default();
        let samples = vec![noisy(60, 8, 1), noisy(180, 8, 1)];
        let artifact = trainer.train(&samples, &[0, 1]).unwrap();
        let predictor = trainer.load(&artifact).unwrap();
        assert!(predictor.predict(&flat(10, 4)).is_err());
    }

    #[test]
    fn test_load_rejects_garbage_artifact() {
        let err = EigenTrainer::default()
            .load(&serde_json::json!({"not": "a model"}))
            .unwrap_err();
        assert!(matches!(err, VisionError::ModelDecode(_)));
    }

    #[test]
    fn test_component_cap_respected() {
        let trainer = EigenTrainer { num_components: Some(1) };
        let samples: Vec<GrayImage> = (0..6).map(|i| noisy(40 * (i + 1), 8, i)).collect();
        let labels: Vec<usize> = (0..6).map(|i| i as usize).collect();
        let artifact = trainer.train(&samples, &labels).unwrap();
        let model: EigenModel = serde_json::from_value(artifact).unwrap();
        assert_eq!(model.components.len(), 1);
    }
}
