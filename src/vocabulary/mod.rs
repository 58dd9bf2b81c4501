//! Visual vocabularies
//!
//! A [`Vocabulary`] is an ordered set of K centroids in descriptor space with a
//! distance metric fixed at training time. Assignment is generic over the
//! descriptor element type through [`Element`], so byte-valued and
//! float-valued descriptors share one implementation.

pub mod io;
pub mod kmeans;

pub use self::io::*;
pub use self::kmeans::*;

use crate::core::{fingerprint_bytes, PhowError, Result};
use serde::{Deserialize, Serialize};

/// Numeric descriptor element
pub trait Element: Copy + Send + Sync + 'static {
    fn to_f32(self) -> f32;
}

impl Element for u8 {
    #[inline]
    fn to_f32(self) -> f32 {
        self as f32
    }
}

impl Element for f32 {
    #[inline]
    fn to_f32(self) -> f32 {
        self
    }
}

impl Element for f64 {
    #[inline]
    fn to_f32(self) -> f32 {
        self as f32
    }
}

/// Distance between a descriptor and a centroid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// Sum of squared differences; centroids are cluster means
    #[default]
    SquaredEuclidean,
    /// Sum of absolute differences; centroids are per-dimension medians
    Manhattan,
}

impl DistanceMetric {
    #[inline]
    pub fn distance<T: Element>(&self, a: &[T], b: &[f32]) -> f32 {
        match self {
            DistanceMetric::SquaredEuclidean => a
                .iter()
                .zip(b)
                .map(|(&x, &y)| {
                    let d = x.to_f32() - y;
                    d * d
                })
                .sum(),
            DistanceMetric::Manhattan => a
                .iter()
                .zip(b)
                .map(|(&x, &y)| (x.to_f32() - y).abs())
                .sum(),
        }
    }
}

/// Trained set of codewords
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vocabulary {
    k: usize,
    dim: usize,
    metric: DistanceMetric,
    /// Row-major `k x dim` centroid matrix
    centroids: Vec<f32>,
    /// Fingerprint of the training parameters that produced this vocabulary
    training_fingerprint: Option<String>,
}

impl Vocabulary {
    /// Build a vocabulary from explicit centroids
    pub fn new(centroids: Vec<Vec<f32>>, metric: DistanceMetric) -> Result<Self> {
        let k = centroids.len();
        if k == 0 {
            return Err(PhowError::InvalidParameter(
                "A vocabulary needs at least one centroid".to_string(),
            ));
        }
        let dim = centroids[0].len();
        if dim == 0 {
            return Err(PhowError::InvalidParameter(
                "Centroids must have at least one dimension".to_string(),
            ));
        }

        let mut flat = Vec::with_capacity(k * dim);
        for c in &centroids {
            if c.len() != dim {
                return Err(PhowError::DimensionMismatch {
                    expected: dim,
                    actual: c.len(),
                });
            }
            flat.extend_from_slice(c);
        }

        Self::from_flat(k, dim, flat, metric)
    }

    pub(crate) fn from_flat(
        k: usize,
        dim: usize,
        centroids: Vec<f32>,
        metric: DistanceMetric,
    ) -> Result<Self> {
        if k == 0 || dim == 0 || centroids.len() != k * dim {
            return Err(PhowError::InvalidParameter(format!(
                "Centroid matrix of length {} does not match {k} x {dim}",
                centroids.len()
            )));
        }
        if centroids.iter().any(|v| !v.is_finite()) {
            return Err(PhowError::InvalidParameter(
                "Centroids must be finite".to_string(),
            ));
        }
        Ok(Self {
            k,
            dim,
            metric,
            centroids,
            training_fingerprint: None,
        })
    }

    /// Number of codewords
    pub fn k(&self) -> usize {
        self.k
    }

    /// Descriptor dimensionality
    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    /// Centroid of codeword `i`
    pub fn centroid(&self, i: usize) -> &[f32] {
        &self.centroids[i * self.dim..(i + 1) * self.dim]
    }

    pub fn training_fingerprint(&self) -> Option<&str> {
        self.training_fingerprint.as_deref()
    }

    pub fn with_training_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.training_fingerprint = Some(fingerprint.into());
        self
    }

    /// Nearest codeword and its distance.
    ///
    /// Fails with `DimensionMismatch` when the descriptor length differs from
    /// the vocabulary's dimensionality. The returned index is always in `[0, k)`.
    pub fn assign<T: Element>(&self, descriptor: &[T]) -> Result<(usize, f32)> {
        if descriptor.len() != self.dim {
            return Err(PhowError::DimensionMismatch {
                expected: self.dim,
                actual: descriptor.len(),
            });
        }
        Ok(self.nearest(descriptor))
    }

    /// Nearest codeword without the dimensionality check. Ties go to the lowest index.
    pub(crate) fn nearest<T: Element>(&self, descriptor: &[T]) -> (usize, f32) {
        let mut best = (0, f32::INFINITY);
        for (i, centroid) in self.centroids.chunks_exact(self.dim).enumerate() {
            let d = self.metric.distance(descriptor, centroid);
            if d < best.1 {
                best = (i, d);
            }
        }
        best
    }

    /// Content identity: changes whenever any centroid, the metric or the
    /// shape changes
    pub fn identity(&self) -> String {
        let mut bytes = Vec::with_capacity(self.centroids.len() * 4 + 24);
        bytes.extend_from_slice(&(self.k as u64).to_le_bytes());
        bytes.extend_from_slice(&(self.dim as u64).to_le_bytes());
        bytes.push(self.metric as u8);
        for v in &self.centroids {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        fingerprint_bytes(&bytes)
    }
}
