//! Multiclass linear classifier
//!
//! One-vs-rest over the labels present in the training set. Every class
//! gets its own binary L2-loss SVM solved by dual coordinate descent; the
//! binary problems are independent and are trained in parallel.
//!
//! # Example
//!
//! ```rust
//! use phow::classifier::LinearClassifier;
//!
//! # fn main() -> phow::Result<()> {
//! let features = vec![vec![1.0, 0.0], vec![0.9, 0.1], vec![0.0, 1.0], vec![0.1, 0.9]];
//! let labels: Vec<String> = ["a", "a", "b", "b"].iter().map(|s| s.to_string()).collect();
//!
//! let model = LinearClassifier::new().with_c(1.0).train(&features, &labels)?;
//! assert_eq!(model.predict(&[1.0, 0.0])?.label, "a");
//! # Ok(())
//! # }
//! ```

use crate::core::{dot, FeatureVector, Label, PhowError, Prediction, Result};
use crate::solver::{DcdSolver, SolverConfig};
use log::{debug, info};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Classifier parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    #[serde(flatten)]
    pub solver: SolverConfig,
    /// Seed for the coordinate permutation in each binary problem
    pub seed: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            solver: SolverConfig::default(),
            seed: 1,
        }
    }
}

/// One-vs-rest linear SVM trainer with builder-style configuration
#[derive(Debug, Clone, Default)]
pub struct LinearClassifier {
    config: ClassifierConfig,
}

impl LinearClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ClassifierConfig) -> Self {
        Self { config }
    }

    /// Set regularization parameter C
    pub fn with_c(mut self, c: f64) -> Self {
        self.config.solver.c = c;
        self
    }

    /// Set convergence tolerance
    pub fn with_epsilon(mut self, epsilon: f64) -> Self {
        self.config.solver.epsilon = epsilon;
        self
    }

    /// Set maximum number of solver passes per class
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.config.solver.max_iterations = max_iterations;
        self
    }

    /// Set the constant bias feature (0 disables the bias)
    pub fn with_bias(mut self, bias: f64) -> Self {
        self.config.solver.bias = bias;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.config.seed = seed;
        self
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// Fit one discriminant per label present in `labels`
    ///
    /// Labels with no examples simply do not appear in the model. Fails with
    /// `Training` when there is nothing to learn from or a binary problem
    /// hits the iteration cap.
    pub fn train(&self, features: &[FeatureVector], labels: &[Label]) -> Result<Model> {
        if features.len() != labels.len() {
            return Err(PhowError::InvalidParameter(format!(
                "{} feature vectors but {} labels",
                features.len(),
                labels.len()
            )));
        }
        let classes: Vec<Label> = labels.iter().cloned().collect::<BTreeSet<_>>().into_iter().collect();
        if classes.is_empty() {
            return Err(PhowError::Training(
                "No usable classes in the training set".to_string(),
            ));
        }

        let dimension = features[0].len();
        if let Some(bad) = features.iter().find(|f| f.len() != dimension) {
            return Err(PhowError::DimensionMismatch {
                expected: dimension,
                actual: bad.len(),
            });
        }

        let solver = DcdSolver::new(self.config.solver.clone())?;

        if classes.len() == 1 {
            info!("Only class {:?} present; it is always predicted", classes[0]);
            return Ok(Model {
                labels: classes,
                weights: vec![vec![0.0; dimension]],
                biases: vec![0.0],
            });
        }

        info!(
            "Training {} one-vs-rest classifiers on {} examples of dimension {}",
            classes.len(),
            features.len(),
            dimension
        );

        let seed = self.config.seed;
        let solutions = classes
            .par_iter()
            .enumerate()
            .map(|(index, class)| {
                let y: Vec<f64> = labels
                    .iter()
                    .map(|l| if l == class { 1.0 } else { -1.0 })
                    .collect();
                let mut rng = StdRng::seed_from_u64(seed.wrapping_add(index as u64));
                let solution = solver.solve(features, &y, &mut rng).map_err(|e| match e {
                    PhowError::Training(msg) => PhowError::Training(format!("class {class:?}: {msg}")),
                    other => other,
                })?;
                debug!("Class {class:?} trained in {} passes", solution.iterations);
                Ok(solution)
            })
            .collect::<Result<Vec<_>>>()?;

        let (weights, biases) = solutions.into_iter().map(|s| (s.weights, s.bias)).unzip();
        Ok(Model {
            labels: classes,
            weights,
            biases,
        })
    }
}

/// Trained multiclass model: one weight vector and bias per label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    labels: Vec<Label>,
    weights: Vec<Vec<f64>>,
    biases: Vec<f64>,
}

impl Model {
    /// Assemble a model from its parts, checking shapes
    pub fn from_parts(labels: Vec<Label>, weights: Vec<Vec<f64>>, biases: Vec<f64>) -> Result<Self> {
        if labels.is_empty() || labels.len() != weights.len() || labels.len() != biases.len() {
            return Err(PhowError::InvalidParameter(format!(
                "Model needs one weight vector and bias per label: {} labels, {} weights, {} biases",
                labels.len(),
                weights.len(),
                biases.len()
            )));
        }
        let dimension = weights[0].len();
        if let Some(w) = weights.iter().find(|w| w.len() != dimension) {
            return Err(PhowError::DimensionMismatch {
                expected: dimension,
                actual: w.len(),
            });
        }
        Ok(Self {
            labels,
            weights,
            biases,
        })
    }

    /// Labels the model can predict, in score order
    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    /// Expected feature dimensionality
    pub fn dimension(&self) -> usize {
        self.weights.first().map_or(0, Vec::len)
    }

    pub fn weights(&self) -> &[Vec<f64>] {
        &self.weights
    }

    pub fn biases(&self) -> &[f64] {
        &self.biases
    }

    /// Decision value of every class
    pub fn scores(&self, feature: &[f64]) -> Result<Vec<f64>> {
        if feature.len() != self.dimension() {
            return Err(PhowError::DimensionMismatch {
                expected: self.dimension(),
                actual: feature.len(),
            });
        }
        Ok(self
            .weights
            .iter()
            .zip(&self.biases)
            .map(|(w, b)| dot(w, feature) + b)
            .collect())
    }

    /// Arg-max class; ties go to the label that sorts first
    pub fn predict(&self, feature: &[f64]) -> Result<Prediction> {
        let scores = self.scores(feature)?;
        let mut best = 0;
        for (i, &s) in scores.iter().enumerate().skip(1) {
            if s > scores[best] {
                best = i;
            }
        }
        Ok(Prediction::new(
            self.labels[best].clone(),
            scores[best],
            self.labels.iter().cloned().zip(scores).collect(),
        ))
    }

    pub fn predict_batch(&self, features: &[FeatureVector]) -> Result<Vec<Prediction>> {
        features.iter().map(|f| self.predict(f)).collect()
    }
}
