//! Spatial pyramid aggregation of visual words
//!
//! Level `l` with `d` divisions splits the image bounds into a `d x d` grid.
//! Every descriptor votes for its codeword in one cell per level. The
//! resulting K-bin histograms are concatenated level-major, then row-major
//! over cells, giving `K * sum(d^2)` values that are normalized at the end.

use crate::core::{FeatureVector, Norm, PhowError, Result};
use crate::descriptor::Descriptor;
use crate::vocabulary::{Element, Vocabulary};
use serde::{Deserialize, Serialize};

/// Pyramid layout and normalization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PyramidConfig {
    /// Grid divisions per side for each level, e.g. `[1, 2]` for 1 + 4 cells
    pub divisions: Vec<usize>,
    /// Norm applied to the concatenated histogram
    pub norm: Norm,
}

impl Default for PyramidConfig {
    fn default() -> Self {
        Self {
            divisions: vec![1, 2],
            norm: Norm::L2,
        }
    }
}

impl PyramidConfig {
    pub fn validate(&self) -> Result<()> {
        if self.divisions.is_empty() || self.divisions.contains(&0) {
            return Err(PhowError::InvalidParameter(
                "Pyramid levels must be a non-empty list of positive divisions".to_string(),
            ));
        }
        Ok(())
    }

    /// Total number of cells across all levels
    pub fn cells(&self) -> usize {
        self.divisions.iter().map(|d| d * d).sum()
    }

    /// Length of the aggregated vector for a vocabulary of size `k`
    pub fn feature_len(&self, k: usize) -> usize {
        k * self.cells()
    }
}

/// Spatial pyramid aggregator
#[derive(Debug, Clone)]
pub struct SpatialPyramid {
    config: PyramidConfig,
}

impl SpatialPyramid {
    pub fn new(config: PyramidConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PyramidConfig {
        &self.config
    }

    /// Aggregate one image's descriptors inside `width x height` bounds.
    ///
    /// Descriptors outside the bounds are ignored. With no descriptors the
    /// result is the all-zero vector.
    pub fn aggregate<T: Element>(
        &self,
        descriptors: &[Descriptor<T>],
        width: f32,
        height: f32,
        vocabulary: &Vocabulary,
    ) -> Result<FeatureVector> {
        if !(width > 0.0 && height > 0.0) {
            return Err(PhowError::InvalidParameter(format!(
                "Image bounds must be positive, got {width} x {height}"
            )));
        }

        let k = vocabulary.k();
        let mut histogram = vec![0.0f64; self.config.feature_len(k)];

        for d in descriptors {
            if d.vector.len() != vocabulary.dim() {
                return Err(PhowError::DimensionMismatch {
                    expected: vocabulary.dim(),
                    actual: d.vector.len(),
                });
            }
            if d.x < 0.0 || d.y < 0.0 || d.x >= width || d.y >= height {
                continue;
            }

            let (word, _) = vocabulary.nearest(&d.vector);
            let mut offset = 0;
            for &div in &self.config.divisions {
                let col = ((d.x / width * div as f32) as usize).min(div - 1);
                let row = ((d.y / height * div as f32) as usize).min(div - 1);
                histogram[offset + (row * div + col) * k + word] += 1.0;
                offset += div * div * k;
            }
        }

        self.config.norm.normalize(&mut histogram);
        Ok(histogram)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vocabulary::DistanceMetric;
    use approx::assert_relative_eq;

    fn vocab(k: usize) -> Vocabulary {
        let centroids = (0..k).map(|i| vec![i as f32 * 10.0]).collect();
        Vocabulary::new(centroids, DistanceMetric::SquaredEuclidean).unwrap()
    }

    fn desc(x: f32, y: f32, value: f32) -> Descriptor<f32> {
        Descriptor {
            x,
            y,
            scale: 0,
            bin_size: 4,
            contrast: 1.0,
            vector: vec![value],
        }
    }

    #[test]
    fn test_dimensionality_law() {
        let pyramid = SpatialPyramid::new(PyramidConfig::default()).unwrap();
        let v = vocab(50);
        let features = pyramid.aggregate(&[desc(1.0, 1.0, 0.0)], 10.0, 10.0, &v).unwrap();
        assert_eq!(features.len(), 250);
        assert_eq!(PyramidConfig::default().feature_len(50), 250);

        let three_levels = PyramidConfig {
            divisions: vec![1, 2, 4],
            norm: Norm::L1,
        };
        assert_eq!(three_levels.feature_len(50), 50 * 21);
    }

    #[test]
    fn test_cell_placement() {
        let config = PyramidConfig {
            divisions: vec![1, 2],
            norm: Norm::L1,
        };
        let pyramid = SpatialPyramid::new(config).unwrap();
        let v = vocab(3);

        // Word 2 in the bottom-right quadrant, word 0 in the top-left
        let descriptors = vec![desc(8.0, 9.0, 20.0), desc(1.0, 1.0, 0.0)];
        let h = pyramid.aggregate(&descriptors, 10.0, 10.0, &v).unwrap();

        let mut expected = vec![0.0; 15];
        // Level 0 (one cell)
        expected[2] = 0.25;
        expected[0] = 0.25;
        // Level 1: cell 0 (top-left) at offset 3, cell 3 (bottom-right) at offset 3 + 9
        expected[3] = 0.25;
        expected[3 + 9 + 2] = 0.25;
        assert_eq!(h, expected);
    }

    #[test]
    fn test_normalization_law() {
        let pyramid = SpatialPyramid::new(PyramidConfig::default()).unwrap();
        let v = vocab(4);
        let descriptors: Vec<_> = (0..17)
            .map(|i| desc((i % 5) as f32 * 2.0, (i % 3) as f32 * 3.0, (i % 4) as f32 * 10.0))
            .collect();
        let h = pyramid.aggregate(&descriptors, 10.0, 10.0, &v).unwrap();
        assert_relative_eq!(Norm::L2.of(&h), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_no_descriptors_gives_zero_vector() {
        let pyramid = SpatialPyramid::new(PyramidConfig::default()).unwrap();
        let v = vocab(4);
        let h = pyramid.aggregate::<f32>(&[], 10.0, 10.0, &v).unwrap();
        assert_eq!(h, vec![0.0; 20]);
    }

    #[test]
    fn test_out_of_bounds_descriptor_is_ignored() {
        let pyramid = SpatialPyramid::new(PyramidConfig::default()).unwrap();
        let v = vocab(2);
        let h = pyramid.aggregate(&[desc(12.0, 1.0, 0.0)], 10.0, 10.0, &v).unwrap();
        assert!(h.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_dimension_mismatch() {
        let pyramid = SpatialPyramid::new(PyramidConfig::default()).unwrap();
        let v = vocab(2);
        let mut d = desc(1.0, 1.0, 0.0);
        d.vector = vec![0.0, 1.0];
        assert!(matches!(
            pyramid.aggregate(&[d], 10.0, 10.0, &v),
            Err(PhowError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_invalid_config() {
        assert!(SpatialPyramid::new(PyramidConfig {
            divisions: vec![],
            norm: Norm::L2
        })
        .is_err());
        assert!(SpatialPyramid::new(PyramidConfig {
            divisions: vec![1, 0],
            norm: Norm::L2
        })
        .is_err());
    }
}
