//! Smoothing and gradient filters on single-channel float planes

use super::FloatImage;
use std::f32::consts::PI;

/// Row-major single-channel float plane
#[derive(Debug, Clone, PartialEq)]
pub struct Plane {
    pub width: usize,
    pub height: usize,
    pub data: Vec<f32>,
}

impl Plane {
    pub fn from_image(image: &FloatImage) -> Self {
        Self {
            width: image.width() as usize,
            height: image.height() as usize,
            data: image.as_raw().clone(),
        }
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.data[y * self.width + x]
    }

    /// Sample with coordinates clamped to the border
    #[inline]
    fn get_clamped(&self, x: isize, y: isize) -> f32 {
        let x = x.clamp(0, self.width as isize - 1) as usize;
        let y = y.clamp(0, self.height as isize - 1) as usize;
        self.get(x, y)
    }
}

/// Gradient magnitude and orientation (radians in [0, 2π)) per pixel
#[derive(Debug, Clone)]
pub struct Gradient {
    pub width: usize,
    pub height: usize,
    pub magnitude: Vec<f32>,
    pub orientation: Vec<f32>,
}

fn gaussian_kernel_1d(sigma: f32) -> Vec<f32> {
    let radius = (3.0 * sigma).ceil().max(1.0) as isize;
    let mut kernel: Vec<f32> = (-radius..=radius)
        .map(|x| (-0.5 * (x as f32 / sigma).powi(2)).exp())
        .collect();
    let sum: f32 = kernel.iter().sum();
    for k in kernel.iter_mut() {
        *k /= sum;
    }
    kernel
}

/// Separable Gaussian blur with clamp-to-edge borders.
///
/// Sigmas below 0.01 return an unmodified copy.
pub fn gaussian_blur(plane: &Plane, sigma: f32) -> Plane {
    if sigma < 0.01 || plane.data.is_empty() {
        return plane.clone();
    }

    let kernel = gaussian_kernel_1d(sigma);
    let radius = (kernel.len() / 2) as isize;
    let (w, h) = (plane.width, plane.height);

    let mut horizontal = vec![0.0f32; w * h];
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0.0;
            for (k, weight) in kernel.iter().enumerate() {
                acc += weight * plane.get_clamped(x as isize + k as isize - radius, y as isize);
            }
            horizontal[y * w + x] = acc;
        }
    }

    let horizontal = Plane {
        width: w,
        height: h,
        data: horizontal,
    };
    let mut out = vec![0.0f32; w * h];
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0.0;
            for (k, weight) in kernel.iter().enumerate() {
                acc += weight * horizontal.get_clamped(x as isize, y as isize + k as isize - radius);
            }
            out[y * w + x] = acc;
        }
    }

    Plane {
        width: w,
        height: h,
        data: out,
    }
}

/// Central-difference gradients, one-sided at the border
pub fn gradient(plane: &Plane) -> Gradient {
    let (w, h) = (plane.width, plane.height);
    let mut magnitude = vec![0.0f32; w * h];
    let mut orientation = vec![0.0f32; w * h];

    for y in 0..h {
        for x in 0..w {
            let (xi, yi) = (x as isize, y as isize);
            let gx = 0.5 * (plane.get_clamped(xi + 1, yi) - plane.get_clamped(xi - 1, yi));
            let gy = 0.5 * (plane.get_clamped(xi, yi + 1) - plane.get_clamped(xi, yi - 1));
            let idx = y * w + x;
            magnitude[idx] = (gx * gx + gy * gy).sqrt();
            let mut angle = gy.atan2(gx);
            if angle < 0.0 {
                angle += 2.0 * PI;
            }
            // Rounding can lift tiny negative angles to exactly 2π
            if angle >= 2.0 * PI {
                angle -= 2.0 * PI;
            }
            orientation[idx] = angle;
        }
    }

    Gradient {
        width: w,
        height: h,
        magnitude,
        orientation,
    }
}
