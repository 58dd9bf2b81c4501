//! Local descriptor extraction
//!
//! Images enter the pipeline as single-channel float buffers with intensities
//! in [0, 1]. Decoding is left to the `image` crate; multi-channel inputs are
//! converted to luminance before extraction.

pub mod dense_sift;
pub mod filter;

pub use self::dense_sift::*;

use image::{DynamicImage, GrayImage, ImageBuffer, Luma};
use serde::{Deserialize, Serialize};

/// Single-channel float image
pub type FloatImage = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Convert any decoded image to a luminance float image in [0, 1]
pub fn from_dynamic(image: &DynamicImage) -> FloatImage {
    image.to_luma32f()
}

/// Convert an 8-bit grayscale image to a float image in [0, 1]
pub fn from_gray(image: &GrayImage) -> FloatImage {
    ImageBuffer::from_fn(image.width(), image.height(), |x, y| {
        Luma([image.get_pixel(x, y).0[0] as f32 / 255.0])
    })
}

/// Build a float image from a pixel function
pub fn image_from_fn(width: u32, height: u32, f: impl Fn(u32, u32) -> f32) -> FloatImage {
    ImageBuffer::from_fn(width, height, |x, y| Luma([f(x, y)]))
}

/// Local descriptor sampled at one grid point of one pyramid scale
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor<T> {
    /// Window centre, x coordinate in pixels
    pub x: f32,
    /// Window centre, y coordinate in pixels
    pub y: f32,
    /// Index of the pyramid scale that produced it
    pub scale: usize,
    /// Spatial bin size of that scale
    pub bin_size: usize,
    /// Mean gradient magnitude inside the window
    pub contrast: f32,
    /// Descriptor values
    pub vector: Vec<T>,
}

impl Descriptor<f32> {
    /// Quantize a unit-norm float descriptor to bytes (`min(255, 512 v)`)
    pub fn to_bytes(&self) -> Descriptor<u8> {
        Descriptor {
            x: self.x,
            y: self.y,
            scale: self.scale,
            bin_size: self.bin_size,
            contrast: self.contrast,
            vector: self
                .vector
                .iter()
                .map(|&v| (512.0 * v).clamp(0.0, 255.0) as u8)
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_gray() {
        let gray = GrayImage::from_fn(3, 2, |x, _| Luma([(x * 255 / 2) as u8]));
        let float = from_gray(&gray);
        assert_eq!(float.dimensions(), (3, 2));
        assert_eq!(float.get_pixel(0, 0).0[0], 0.0);
        assert_eq!(float.get_pixel(2, 1).0[0], 1.0);
    }

    #[test]
    fn test_byte_quantization() {
        let d = Descriptor {
            x: 1.0,
            y: 2.0,
            scale: 0,
            bin_size: 4,
            contrast: 0.1,
            vector: vec![0.0, 0.1, 0.2, 0.9],
        };
        let b = d.to_bytes();
        assert_eq!(b.vector, vec![0, 51, 102, 255]);
        assert_eq!((b.x, b.y, b.scale), (1.0, 2.0, 0));
    }
}
