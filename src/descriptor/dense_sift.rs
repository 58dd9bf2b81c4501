//! Multi-scale dense SIFT
//!
//! Descriptors are sampled on a regular grid at every configured bin size.
//! Each descriptor is a `num_spatial_bins x num_spatial_bins` grid of
//! orientation histograms with `num_orientation_bins` bins each (4x4x8 = 128
//! by default). Before sampling a scale the image is smoothed with
//! `sigma = bin_size / magnification`.

use super::filter::{gaussian_blur, gradient, Gradient, Plane};
use super::{Descriptor, FloatImage};
use crate::core::{PhowError, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;

/// Configuration for dense SIFT extraction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DenseSiftConfig {
    /// Grid step in pixels
    pub step: usize,
    /// Spatial bin size in pixels, one pyramid scale per entry
    pub bin_sizes: Vec<usize>,
    /// Spatial bins per side of the descriptor window
    pub num_spatial_bins: usize,
    /// Orientation bins per spatial bin
    pub num_orientation_bins: usize,
    /// Ratio between bin size and smoothing scale
    pub magnification: f32,
}

impl Default for DenseSiftConfig {
    fn default() -> Self {
        Self {
            step: 3,
            bin_sizes: vec![4, 6, 8, 10],
            num_spatial_bins: 4,
            num_orientation_bins: 8,
            magnification: 6.0,
        }
    }
}

impl DenseSiftConfig {
    /// Validate parameter ranges
    pub fn validate(&self) -> Result<()> {
        if self.step == 0 {
            return Err(PhowError::InvalidParameter(
                "Grid step must be positive".to_string(),
            ));
        }
        if self.bin_sizes.is_empty() || self.bin_sizes.contains(&0) {
            return Err(PhowError::InvalidParameter(
                "Bin sizes must be a non-empty list of positive values".to_string(),
            ));
        }
        if self.num_spatial_bins == 0 || self.num_orientation_bins == 0 {
            return Err(PhowError::InvalidParameter(
                "Descriptor geometry must have at least one spatial and one orientation bin"
                    .to_string(),
            ));
        }
        if !(self.magnification > 0.0) {
            return Err(PhowError::InvalidParameter(format!(
                "Magnification must be positive, got: {}",
                self.magnification
            )));
        }
        Ok(())
    }

    /// Length of every descriptor vector
    pub fn descriptor_len(&self) -> usize {
        self.num_spatial_bins * self.num_spatial_bins * self.num_orientation_bins
    }

    /// Side length of the smallest descriptor window
    pub fn min_window(&self) -> usize {
        self.bin_sizes.iter().min().copied().unwrap_or(0) * self.num_spatial_bins
    }
}

/// Dense SIFT extractor over a pyramid of bin sizes
#[derive(Debug, Clone)]
pub struct DenseSift {
    config: DenseSiftConfig,
}

impl DenseSift {
    /// Create an extractor after validating the configuration
    pub fn new(config: DenseSiftConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &DenseSiftConfig {
        &self.config
    }

    pub fn descriptor_len(&self) -> usize {
        self.config.descriptor_len()
    }

    /// Extract float descriptors whose contrast is at least `contrast_threshold`.
    ///
    /// Order is scale-major, then row-major over grid positions. Images smaller
    /// than the smallest window produce an empty list.
    pub fn extract(&self, image: &FloatImage, contrast_threshold: f32) -> Vec<Descriptor<f32>> {
        let base = Plane::from_image(image);
        let mut descriptors = Vec::new();

        for (scale, &bin_size) in self.config.bin_sizes.iter().enumerate() {
            let window = bin_size * self.config.num_spatial_bins;
            if window > base.width || window > base.height {
                continue;
            }

            let sigma = bin_size as f32 / self.config.magnification;
            // The source image is assumed to carry a blur of 0.5 already
            let smoothing = (sigma * sigma - 0.25).max(0.0).sqrt();
            let smoothed = gaussian_blur(&base, smoothing);
            let grad = gradient(&smoothed);

            let before = descriptors.len();
            for y0 in (0..=base.height - window).step_by(self.config.step) {
                for x0 in (0..=base.width - window).step_by(self.config.step) {
                    let (raw, contrast) = self.describe(&grad, x0, y0, bin_size);
                    if contrast < contrast_threshold {
                        continue;
                    }
                    let centre = (window as f32 - 1.0) / 2.0;
                    descriptors.push(Descriptor {
                        x: x0 as f32 + centre,
                        y: y0 as f32 + centre,
                        scale,
                        bin_size,
                        contrast,
                        vector: normalize_sift(raw),
                    });
                }
            }
            debug!(
                "Dense SIFT scale {} (bin size {}): {} descriptors",
                scale,
                bin_size,
                descriptors.len() - before
            );
        }

        descriptors
    }

    /// Extract descriptors quantized to bytes
    pub fn extract_bytes(&self, image: &FloatImage, contrast_threshold: f32) -> Vec<Descriptor<u8>> {
        self.extract(image, contrast_threshold)
            .into_iter()
            .map(|d| d.to_bytes())
            .collect()
    }

    /// Raw orientation histograms for the window at (x0, y0) and its mean
    /// gradient magnitude
    fn describe(&self, grad: &Gradient, x0: usize, y0: usize, bin_size: usize) -> (Vec<f32>, f32) {
        let nsb = self.config.num_spatial_bins;
        let nob = self.config.num_orientation_bins;
        let window = nsb * bin_size;
        let mut hist = vec![0.0f32; nsb * nsb * nob];
        let mut total = 0.0f32;

        for dy in 0..window {
            let row = (y0 + dy) * grad.width;
            let cell_y = dy / bin_size;
            for dx in 0..window {
                let idx = row + x0 + dx;
                let m = grad.magnitude[idx];
                if m <= 0.0 {
                    continue;
                }
                let cell_x = dx / bin_size;
                let o = grad.orientation[idx] * nob as f32 / (2.0 * PI);
                let o_floor = o.floor();
                let frac = o - o_floor;
                let b0 = (o_floor as usize) % nob;
                let b1 = (b0 + 1) % nob;

                let base = (cell_y * nsb + cell_x) * nob;
                hist[base + b0] += m * (1.0 - frac);
                hist[base + b1] += m * frac;
                total += m;
            }
        }

        (hist, total / (window * window) as f32)
    }
}

/// L2 normalize, clamp large components at 0.2, renormalize
fn normalize_sift(mut v: Vec<f32>) -> Vec<f32> {
    fn l2(v: &mut [f32]) {
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for x in v.iter_mut() {
                *x /= norm;
            }
        }
    }
    l2(&mut v);
    for x in v.iter_mut() {
        *x = x.min(0.2);
    }
    l2(&mut v);
    v
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::image_from_fn;
    use approx::assert_relative_eq;

    fn stripes(w: u32, h: u32, period: u32, vertical: bool) -> FloatImage {
        image_from_fn(w, h, |x, y| {
            let t = if vertical { x } else { y };
            if (t / period) % 2 == 0 {
                0.9
            } else {
                0.1
            }
        })
    }

    fn small_config() -> DenseSiftConfig {
        DenseSiftConfig {
            step: 4,
            bin_sizes: vec![4, 6],
            ..DenseSiftConfig::default()
        }
    }

    #[test]
    fn test_default_config() {
        let config = DenseSiftConfig::default();
        assert_eq!(config.step, 3);
        assert_eq!(config.bin_sizes, vec![4, 6, 8, 10]);
        assert_eq!(config.descriptor_len(), 128);
        assert_eq!(config.min_window(), 16);
    }

    #[test]
    fn test_invalid_config() {
        let config = DenseSiftConfig {
            step: 0,
            ..DenseSiftConfig::default()
        };
        assert!(DenseSift::new(config).is_err());

        let config = DenseSiftConfig {
            bin_sizes: vec![],
            ..DenseSiftConfig::default()
        };
        assert!(DenseSift::new(config).is_err());
    }

    #[test]
    fn test_descriptor_count_and_order() {
        let sift = DenseSift::new(small_config()).unwrap();
        let image = stripes(40, 40, 3, true);
        let descriptors = sift.extract(&image, 0.0);

        // bin 4 -> window 16 -> positions 0,4,..,24 = 7 per axis
        // bin 6 -> window 24 -> positions 0,4,..,16 = 5 per axis
        assert_eq!(descriptors.len(), 7 * 7 + 5 * 5);

        // Scale-major ordering
        let first_large = descriptors.iter().position(|d| d.scale == 1).unwrap();
        assert_eq!(first_large, 49);
        assert!(descriptors[..49].iter().all(|d| d.scale == 0));

        for d in &descriptors {
            assert_eq!(d.vector.len(), 128);
        }
    }

    #[test]
    fn test_small_image_yields_no_descriptors() {
        let sift = DenseSift::new(small_config()).unwrap();
        let image = stripes(10, 30, 2, true);
        assert!(sift.extract(&image, 0.0).is_empty());
    }

    #[test]
    fn test_flat_image_is_dropped_by_contrast() {
        let sift = DenseSift::new(small_config()).unwrap();
        let image = image_from_fn(32, 32, |_, _| 0.5);
        assert!(sift.extract(&image, 0.005).is_empty());
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let sift = DenseSift::new(small_config()).unwrap();
        let image = image_from_fn(36, 36, |x, y| ((x * 7 + y * 13) % 17) as f32 / 17.0);
        let a = sift.extract(&image, 0.001);
        let b = sift.extract(&image, 0.001);
        assert_eq!(a, b);
    }

    #[test]
    fn test_descriptors_are_unit_norm_and_clamped() {
        let sift = DenseSift::new(small_config()).unwrap();
        let image = stripes(32, 32, 4, false);
        for d in sift.extract(&image, 0.005) {
            let norm = d.vector.iter().map(|v| v * v).sum::<f32>().sqrt();
            assert_relative_eq!(norm, 1.0, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_orientation_distinguishes_stripes() {
        let sift = DenseSift::new(small_config()).unwrap();
        let vertical = sift.extract(&stripes(32, 32, 4, true), 0.005);
        let horizontal = sift.extract(&stripes(32, 32, 4, false), 0.005);
        assert!(!vertical.is_empty() && !horizontal.is_empty());

        // Vertical stripes have horizontal gradients: energy in bins 0 and 4.
        // Horizontal stripes have vertical gradients: bins 2 and 6.
        let energy = |d: &Descriptor<f32>, bins: [usize; 2]| -> f32 {
            d.vector
                .chunks(8)
                .map(|cell| cell[bins[0]] + cell[bins[1]])
                .sum()
        };
        assert!(energy(&vertical[0], [0, 4]) > energy(&vertical[0], [2, 6]));
        assert!(energy(&horizontal[0], [2, 6]) > energy(&horizontal[0], [0, 4]));
    }

    #[test]
    fn test_byte_descriptors() {
        let sift = DenseSift::new(small_config()).unwrap();
        let image = stripes(32, 32, 4, true);
        let bytes = sift.extract_bytes(&image, 0.005);
        let floats = sift.extract(&image, 0.005);
        assert_eq!(bytes.len(), floats.len());
        assert!(bytes[0].vector.iter().any(|&b| b > 0));
    }
}
