//! Additive kernel trait definition

/// Additive kernel K(x, y) = Σᵢ k(xᵢ, yᵢ)
///
/// Additive kernels decompose over coordinates, which is what makes an
/// explicit per-coordinate feature map possible.
pub trait AdditiveKernel: Send + Sync {
    /// Kernel value on one pair of scalar coordinates
    fn value(&self, x: f64, y: f64) -> f64;

    /// Kernel value on two vectors of equal length
    fn compute(&self, x: &[f64], y: &[f64]) -> f64 {
        x.iter().zip(y).map(|(&a, &b)| self.value(a, b)).sum()
    }
}
