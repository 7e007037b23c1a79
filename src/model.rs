//! Model scoring
//!
//! The engine scores completed flows through a [`ModelScorer`]. The
//! bundled implementation is a linear softmax classifier loaded from a
//! JSON artifact exported at training time: standard-scaler parameters,
//! a weight matrix, intercepts, and the class label list.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("feature vector has {got} values, model expects {expected}")]
    DimensionMismatch { got: usize, expected: usize },
    #[error("model artifact is internally inconsistent: {0}")]
    BadArtifact(String),
}

/// Classification outcome for one flow
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub label: String,
    /// Percent, 0.0 to 100.0
    pub confidence: f64,
}

impl Prediction {
    pub fn benign() -> Self {
        Self {
            label: "BENIGN".to_string(),
            confidence: 0.0,
        }
    }
}

/// Scores a feature vector into a labeled prediction
pub trait ModelScorer: Send + Sync {
    fn score(&self, features: &[f64]) -> Result<Prediction, ModelError>;
    /// Expected feature vector length
    fn input_dim(&self) -> usize;
}

/// On-disk artifact layout
#[derive(Debug, Serialize, Deserialize)]
struct LinearArtifact {
    labels: Vec<String>,
    /// Standard-scaler per-feature means
    scaler_mean: Vec<f64>,
    /// Standard-scaler per-feature scales
    scaler_scale: Vec<f64>,
    /// Row per class, column per feature
    weights: Vec<Vec<f64>>,
    intercepts: Vec<f64>,
}

/// Linear softmax classifier with a built-in standard scaler
pub struct LinearScorer {
    artifact: LinearArtifact,
}

impl LinearScorer {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading model artifact {}", path.display()))?;
        let artifact: LinearArtifact = serde_json::from_str(&raw)
            .with_context(|| format!("parsing model artifact {}", path.display()))?;
        Self::from_artifact(artifact)
    }

    fn from_artifact(artifact: LinearArtifact) -> Result<Self> {
        let dim = artifact.scaler_mean.len();
        let classes = artifact.labels.len();
        if artifact.scaler_scale.len() != dim {
            anyhow::bail!(ModelError::BadArtifact(format!(
                "scaler mean/scale length mismatch ({} vs {})",
                dim,
                artifact.scaler_scale.len()
            )));
        }
        if artifact.weights.len() != classes || artifact.intercepts.len() != classes {
            anyhow::bail!(ModelError::BadArtifact(format!(
                "{} labels but {} weight rows and {} intercepts",
                classes,
                artifact.weights.len(),
                artifact.intercepts.len()
            )));
        }
        if let Some(row) = artifact.weights.iter().find(|r| r.len() != dim) {
            anyhow::bail!(ModelError::BadArtifact(format!(
                "weight row of length {} does not match {} features",
                row.len(),
                dim
            )));
        }
        if classes == 0 {
            anyhow::bail!(ModelError::BadArtifact("no class labels".to_string()));
        }
        Ok(Self { artifact })
    }

    fn scale(&self, features: &[f64]) -> Vec<f64> {
        features
            .iter()
            .zip(&self.artifact.scaler_mean)
            .zip(&self.artifact.scaler_scale)
            .map(|((x, mean), scale)| {
                if *scale != 0.0 {
                    (x - mean) / scale
                } else {
                    x - mean
                }
            })
            .collect()
    }
}

impl ModelScorer for LinearScorer {
    fn score(&self, features: &[f64]) -> Result<Prediction, ModelError> {
        let expected = self.input_dim();
        if features.len() != expected {
            return Err(ModelError::DimensionMismatch {
                got: features.len(),
                expected,
            });
        }

        let scaled = self.scale(features);
        let logits: Vec<f64> = self
            .artifact
            .weights
            .iter()
            .zip(&self.artifact.intercepts)
            .map(|(row, b)| row.iter().zip(&scaled).map(|(w, x)| w * x).sum::<f64>() + b)
            .collect();

        // Softmax with max-shift for numeric stability
        let max_logit = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let exps: Vec<f64> = logits.iter().map(|l| (l - max_logit).exp()).collect();
        let sum: f64 = exps.iter().sum();

        let (best, prob) = exps
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, e)| (i, e / sum))
            .ok_or_else(|| ModelError::BadArtifact("no class labels".to_string()))?;

        Ok(Prediction {
            label: self.artifact.labels[best].clone(),
            confidence: (prob * 100.0 * 100.0).round() / 100.0,
        })
    }

    fn input_dim(&self) -> usize {
        self.artifact.scaler_mean.len()
    }
}
