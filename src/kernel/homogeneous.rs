//! Homogeneous kernel map
//!
//! Explicit feature map for additive homogeneous kernels (Vedaldi and
//! Zisserman, "Efficient Additive Kernels via Explicit Feature Maps").
//!
//! A homogeneous kernel of degree γ factors as
//! k(x, y) = (xy)^{γ/2} K(ln y - ln x), and K has a spectrum κ(ω).
//! Sampling κ at `order` frequencies spaced L = 2π / period apart gives,
//! per scalar input x, the `2 * order + 1` coordinates
//!
//! Ψ(x) = x^{γ/2} [ √(Lκ̂(0)), √(2Lκ̂(jL)) cos(jL ln x), √(2Lκ̂(jL)) sin(jL ln x) ]  for j = 1..order
//!
//! so that Ψ(x)·Ψ(y) ≈ k(x, y). With a rectangular window, κ̂ is κ convolved
//! with the window's sinc spectrum.

use super::traits::AdditiveKernel;
use crate::core::{FeatureVector, PhowError, Result};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Inputs with magnitude below this map to zeros
pub const ZERO_GUARD: f64 = 1e-12;

/// Supported homogeneous kernels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KernelType {
    /// k(x, y) = 2xy / (x + y)
    Chi2,
    /// k(x, y) = min(x, y)
    Intersection,
    /// k(x, y) = x/2 log2((x + y)/x) + y/2 log2((x + y)/y)
    JensenShannon,
}

impl KernelType {
    /// Spectrum κ(ω) of the degree-1 kernel signature
    pub fn spectrum(&self, omega: f64) -> f64 {
        match self {
            KernelType::Chi2 => 2.0 / ((PI * omega).exp() + (-PI * omega).exp()),
            KernelType::Intersection => (2.0 / PI) / (1.0 + 4.0 * omega * omega),
            KernelType::JensenShannon => {
                (2.0 / 4f64.ln()) * 2.0
                    / ((PI * omega).exp() + (-PI * omega).exp())
                    / (1.0 + 4.0 * omega * omega)
            }
        }
    }
}

impl AdditiveKernel for KernelType {
    /// Degree-1 kernel value for non-negative inputs
    fn value(&self, x: f64, y: f64) -> f64 {
        if x <= 0.0 || y <= 0.0 {
            return 0.0;
        }
        match self {
            KernelType::Chi2 => 2.0 * x * y / (x + y),
            KernelType::Intersection => x.min(y),
            KernelType::JensenShannon => {
                let s = x + y;
                0.5 * x * (s / x).log2() + 0.5 * y * (s / y).log2()
            }
        }
    }
}

/// Window applied to the kernel signature before sampling its spectrum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowType {
    Uniform,
    Rectangular,
}

/// Kernel map parameters; persisted with models so prediction reproduces
/// the training-time map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelMapConfig {
    pub kernel: KernelType,
    /// Homogeneity degree
    pub gamma: f64,
    /// Number of sampled frequencies besides zero
    pub order: usize,
    /// Signature period; `None` picks a kernel- and window-specific default
    pub period: Option<f64>,
    pub window: WindowType,
}

impl Default for KernelMapConfig {
    fn default() -> Self {
        Self {
            kernel: KernelType::Chi2,
            gamma: 1.0,
            order: 1,
            period: None,
            window: WindowType::Rectangular,
        }
    }
}

impl KernelMapConfig {
    /// Period actually used, resolving the automatic default
    pub fn resolved_period(&self) -> f64 {
        if let Some(p) = self.period {
            return p;
        }
        let n = self.order as f64;
        let period = match (self.window, self.kernel) {
            (WindowType::Uniform, KernelType::Chi2) => 5.86 * n.sqrt() + 3.65,
            (WindowType::Uniform, KernelType::JensenShannon) => 6.64 * n.sqrt() + 7.24,
            (WindowType::Uniform, KernelType::Intersection) => 2.38 * (n + 0.8).ln() + 5.6,
            (WindowType::Rectangular, KernelType::Chi2) => 8.80 * (n + 4.44).sqrt() - 12.6,
            (WindowType::Rectangular, KernelType::JensenShannon) => 9.63 * (n + 1.00).sqrt() - 2.93,
            (WindowType::Rectangular, KernelType::Intersection) => 2.00 * (n + 0.99).ln() + 3.52,
        };
        period.max(1.0)
    }

    /// Output coordinates per input coordinate
    pub fn expansion(&self) -> usize {
        2 * self.order + 1
    }
}

/// Precomputed homogeneous kernel map
#[derive(Debug, Clone)]
pub struct HomogeneousKernelMap {
    config: KernelMapConfig,
    step: f64,
    /// √(Lκ̂(0)) followed by √(2Lκ̂(jL)) for j = 1..=order
    coefficients: Vec<f64>,
}

impl HomogeneousKernelMap {
    pub fn new(config: KernelMapConfig) -> Result<Self> {
        if !(config.gamma > 0.0) {
            return Err(PhowError::InvalidParameter(format!(
                "Kernel map gamma must be positive, got: {}",
                config.gamma
            )));
        }
        if let Some(p) = config.period {
            if !(p > 0.0) {
                return Err(PhowError::InvalidParameter(format!(
                    "Kernel map period must be positive, got: {p}"
                )));
            }
        }

        let period = config.resolved_period();
        let step = 2.0 * PI / period;
        let coefficients = (0..=config.order)
            .map(|j| {
                let kappa = smoothed_spectrum(&config, period, j as f64 * step);
                let weight = if j == 0 { step } else { 2.0 * step };
                (weight * kappa).sqrt()
            })
            .collect();

        Ok(Self {
            config,
            step,
            coefficients,
        })
    }

    pub fn config(&self) -> &KernelMapConfig {
        &self.config
    }

    /// Output length for an input of length `input_dim`
    pub fn output_dim(&self, input_dim: usize) -> usize {
        input_dim * self.config.expansion()
    }

    /// Map one scalar into `out`, which must hold `2 * order + 1` values
    pub fn map_value(&self, x: f64, out: &mut [f64]) {
        let magnitude = x.abs();
        if magnitude < ZERO_GUARD || !magnitude.is_finite() {
            out.iter_mut().for_each(|v| *v = 0.0);
            return;
        }

        let sign = x.signum();
        let scale = sign * magnitude.powf(self.config.gamma / 2.0);
        let log_x = magnitude.ln();

        out[0] = scale * self.coefficients[0];
        for j in 1..=self.config.order {
            let phase = j as f64 * self.step * log_x;
            let c = scale * self.coefficients[j];
            out[2 * j - 1] = c * phase.cos();
            out[2 * j] = c * phase.sin();
        }
    }

    /// Map a vector coordinate by coordinate, concatenating in input order
    pub fn apply(&self, input: &[f64]) -> FeatureVector {
        let width = self.config.expansion();
        let mut output = vec![0.0; self.output_dim(input.len())];
        for (x, out) in input.iter().zip(output.chunks_exact_mut(width)) {
            self.map_value(*x, out);
        }
        output
    }

    /// Exact kernel value of degree `gamma` that the map approximates
    pub fn exact(&self, x: f64, y: f64) -> f64 {
        if x <= 0.0 || y <= 0.0 {
            return 0.0;
        }
        let xy = x * y;
        self.config.kernel.value(x, y) / xy.sqrt() * xy.powf(self.config.gamma / 2.0)
    }
}

/// Spectrum with the window applied
fn smoothed_spectrum(config: &KernelMapConfig, period: f64, omega: f64) -> f64 {
    match config.window {
        WindowType::Uniform => config.kernel.spectrum(omega),
        WindowType::Rectangular => {
            const EPSILON: f64 = 1e-2;
            const HALF_SAMPLES: usize = 1024;
            let range = 2.0 / (period * EPSILON);
            let d_omega = 2.0 * range / (2 * HALF_SAMPLES + 1) as f64;

            let mut kappa = 0.0;
            for i in 0..=(2 * HALF_SAMPLES + 1) {
                let offset = -range + i as f64 * d_omega;
                let window = sinc(period / 2.0 * offset) * period / (2.0 * PI);
                kappa += window * config.kernel.spectrum(offset + omega);
            }
            (kappa * d_omega).max(0.0)
        }
    }
}

fn sinc(x: f64) -> f64 {
    if x.abs() < 1e-12 {
        1.0
    } else {
        x.sin() / x
    }
}
