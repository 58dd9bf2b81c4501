//! Dual coordinate descent for L2-regularized L2-loss linear SVM
//!
//! Solves the dual of
//!
//! min_w ½‖w‖² + C Σᵢ max(0, 1 - yᵢ w·xᵢ)²
//!
//! one coordinate at a time (Hsieh et al., "A Dual Coordinate Descent Method
//! for Large-scale Linear SVM"). The squared hinge adds 1/(2C) to every
//! diagonal entry of the dual Hessian, so each coordinate update is well
//! defined even for all-zero or duplicated inputs. The bias is learned as
//! the weight of an extra constant feature.

use crate::core::{dot, FeatureVector, PhowError, Result};
use log::debug;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Solver parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Regularization parameter C
    pub c: f64,
    /// Stopping tolerance on the projected-gradient spread
    pub epsilon: f64,
    /// Maximum number of outer passes over the data
    pub max_iterations: usize,
    /// Value of the constant feature carrying the bias; 0 disables the bias
    pub bias: f64,
    /// Temporarily drop coordinates that sit at the lower bound
    pub shrinking: bool,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            c: 1.0,
            epsilon: 1e-3,
            max_iterations: 10_000,
            bias: 1.0,
            shrinking: true,
        }
    }
}

impl SolverConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.c > 0.0) {
            return Err(PhowError::InvalidParameter(format!(
                "C must be positive, got: {}",
                self.c
            )));
        }
        if !(self.epsilon > 0.0) {
            return Err(PhowError::InvalidParameter(format!(
                "Solver tolerance must be positive, got: {}",
                self.epsilon
            )));
        }
        if self.max_iterations == 0 {
            return Err(PhowError::InvalidParameter(
                "Solver iteration cap must be at least 1".to_string(),
            ));
        }
        if !(self.bias >= 0.0) {
            return Err(PhowError::InvalidParameter(format!(
                "Bias feature must be non-negative, got: {}",
                self.bias
            )));
        }
        Ok(())
    }
}

/// Trained binary discriminant f(x) = w·x + b
#[derive(Debug, Clone, PartialEq)]
pub struct BinarySolution {
    pub weights: Vec<f64>,
    pub bias: f64,
    pub iterations: usize,
    /// Dual variables, one per training example
    pub alpha: Vec<f64>,
}

impl BinarySolution {
    pub fn decision(&self, x: &[f64]) -> f64 {
        dot(&self.weights, x) + self.bias
    }
}

/// Dual coordinate descent solver
#[derive(Debug, Clone)]
pub struct DcdSolver {
    config: SolverConfig,
}

impl DcdSolver {
    pub fn new(config: SolverConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// Solve a binary problem with labels in {-1, +1}
    ///
    /// Returns a `Training` error if the tolerance is not reached within
    /// `max_iterations` passes.
    pub fn solve<R: Rng + ?Sized>(
        &self,
        x: &[FeatureVector],
        y: &[f64],
        rng: &mut R,
    ) -> Result<BinarySolution> {
        if x.is_empty() {
            return Err(PhowError::Training("No training examples".to_string()));
        }
        if x.len() != y.len() {
            return Err(PhowError::InvalidParameter(format!(
                "{} examples but {} labels",
                x.len(),
                y.len()
            )));
        }
        if let Some(&bad) = y.iter().find(|&&v| v != 1.0 && v != -1.0) {
            return Err(PhowError::InvalidParameter(format!(
                "Binary labels must be -1 or +1, got: {bad}"
            )));
        }
        let dim = x[0].len();
        if let Some(row) = x.iter().find(|row| row.len() != dim) {
            return Err(PhowError::DimensionMismatch {
                expected: dim,
                actual: row.len(),
            });
        }

        let l = x.len();
        let bias_feature = self.config.bias;
        let diag = 0.5 / self.config.c;

        let qd: Vec<f64> = x
            .iter()
            .map(|xi| diag + dot(xi, xi) + bias_feature * bias_feature)
            .collect();

        let mut w = vec![0.0; dim];
        let mut w_bias = 0.0;
        let mut alpha = vec![0.0; l];
        let mut index: Vec<usize> = (0..l).collect();
        let mut active_size = l;

        let mut pg_max_old = f64::INFINITY;
        let mut iterations = 0;

        while iterations < self.config.max_iterations {
            let mut pg_max_new = f64::NEG_INFINITY;
            let mut pg_min_new = f64::INFINITY;

            index[..active_size].shuffle(rng);

            let mut s = 0;
            while s < active_size {
                let i = index[s];
                let yi = y[i];
                let g = yi * (dot(&w, &x[i]) + w_bias * bias_feature) - 1.0 + alpha[i] * diag;

                let pg = if alpha[i] == 0.0 {
                    if self.config.shrinking && g > pg_max_old {
                        active_size -= 1;
                        index.swap(s, active_size);
                        continue;
                    }
                    g.min(0.0)
                } else {
                    g
                };

                pg_max_new = pg_max_new.max(pg);
                pg_min_new = pg_min_new.min(pg);

                if pg.abs() > 1e-12 {
                    let old = alpha[i];
                    alpha[i] = (old - g / qd[i]).max(0.0);
                    let delta = (alpha[i] - old) * yi;
                    for (wj, xj) in w.iter_mut().zip(&x[i]) {
                        *wj += delta * xj;
                    }
                    w_bias += delta * bias_feature;
                }
                s += 1;
            }

            iterations += 1;

            if pg_max_new - pg_min_new <= self.config.epsilon {
                if active_size == l {
                    debug!("DCD converged after {iterations} passes");
                    return Ok(BinarySolution {
                        weights: w,
                        bias: w_bias * bias_feature,
                        iterations,
                        alpha,
                    });
                }
                // Verify on the full set before stopping
                active_size = l;
                pg_max_old = f64::INFINITY;
                continue;
            }

            pg_max_old = if pg_max_new <= 0.0 { f64::INFINITY } else { pg_max_new };
            if iterations % 100 == 0 {
                debug!(
                    "DCD pass {iterations}: gradient spread {:.3e}, active {active_size}/{l}",
                    pg_max_new - pg_min_new
                );
            }
        }

        Err(PhowError::Training(format!(
            "Linear SVM did not reach tolerance {} within {} iterations",
            self.config.epsilon, self.config.max_iterations
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    #[test]
    fn test_separable_problem() {
        let solver = DcdSolver::new(SolverConfig::default()).unwrap();
        let x = vec![
            vec![2.0, 1.0],
            vec![1.5, 2.0],
            vec![-1.0, -2.0],
            vec![-2.0, -0.5],
        ];
        let y = vec![1.0, 1.0, -1.0, -1.0];

        let solution = solver.solve(&x, &y, &mut rng()).unwrap();
        for (xi, yi) in x.iter().zip(&y) {
            assert!(solution.decision(xi) * yi > 0.0);
        }
        assert!(solution.alpha.iter().all(|&a| a >= 0.0));
    }

    #[test]
    fn test_optimality_conditions() {
        // At the optimum w = Σ αᵢ yᵢ xᵢ
        let solver = DcdSolver::new(SolverConfig {
            epsilon: 1e-6,
            ..SolverConfig::default()
        })
        .unwrap();
        let x = vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![-1.0, 0.5], vec![0.2, -1.0]];
        let y = vec![1.0, 1.0, -1.0, -1.0];
        let solution = solver.solve(&x, &y, &mut rng()).unwrap();

        for j in 0..2 {
            let expected: f64 = (0..4).map(|i| solution.alpha[i] * y[i] * x[i][j]).sum();
            approx::assert_abs_diff_eq!(solution.weights[j], expected, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_identical_vectors_terminate() {
        let solver = DcdSolver::new(SolverConfig::default()).unwrap();
        let x = vec![vec![0.5, 0.5]; 6];
        let y = vec![1.0, -1.0, 1.0, -1.0, 1.0, -1.0];
        let solution = solver.solve(&x, &y, &mut rng()).unwrap();
        assert!(solution.decision(&x[0]).abs() < 1e-2);
    }

    #[test]
    fn test_single_dimension_and_zero_vectors() {
        let solver = DcdSolver::new(SolverConfig::default()).unwrap();
        let x = vec![vec![0.0], vec![0.0], vec![1.0]];
        let y = vec![-1.0, -1.0, 1.0];
        assert!(solver.solve(&x, &y, &mut rng()).is_ok());
    }

    #[test]
    fn test_iteration_cap() {
        let solver = DcdSolver::new(SolverConfig {
            epsilon: 1e-12,
            max_iterations: 1,
            shrinking: false,
            ..SolverConfig::default()
        })
        .unwrap();
        let x = vec![vec![1.0, 1.0], vec![-1.0, -1.0], vec![1.0, -1.0], vec![-1.0, 1.0]];
        let y = vec![1.0, -1.0, 1.0, -1.0];
        assert!(matches!(
            solver.solve(&x, &y, &mut rng()),
            Err(PhowError::Training(_))
        ));
    }

    #[test]
    fn test_invalid_input() {
        let solver = DcdSolver::new(SolverConfig::default()).unwrap();
        assert!(solver.solve(&[], &[], &mut rng()).is_err());
        assert!(solver.solve(&[vec![1.0]], &[0.5], &mut rng()).is_err());
        assert!(matches!(
            solver.solve(&[vec![1.0], vec![1.0, 2.0]], &[1.0, -1.0], &mut rng()),
            Err(PhowError::DimensionMismatch { .. })
        ));
        assert!(DcdSolver::new(SolverConfig {
            c: 0.0,
            ..SolverConfig::default()
        })
        .is_err());
    }

    #[test]
    fn test_deterministic_for_seed() {
        let solver = DcdSolver::new(SolverConfig::default()).unwrap();
        let x = vec![vec![1.0, 0.3], vec![0.2, 1.0], vec![-0.7, -0.1], vec![-0.3, -0.9]];
        let y = vec![1.0, 1.0, -1.0, -1.0];
        let a = solver.solve(&x, &y, &mut rng()).unwrap();
        let b = solver.solve(&x, &y, &mut rng()).unwrap();
        assert_eq!(a, b);
    }
}
