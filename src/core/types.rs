//! Core type definitions shared across pipeline stages

use serde::{Deserialize, Serialize};

/// Class/group identifier attached to every image
pub type Label = String;

/// Dense feature vector produced by the aggregation and kernel-map stages
pub type FeatureVector = Vec<f64>;

/// Prediction result containing the winning label and every class score
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    /// Arg-max scoring class label
    pub label: Label,
    /// Decision value of the winning class
    pub decision_value: f64,
    /// Decision value per class, in the model's label order
    pub scores: Vec<(Label, f64)>,
}

impl Prediction {
    /// Create a new prediction
    pub fn new(label: Label, decision_value: f64, scores: Vec<(Label, f64)>) -> Self {
        Self {
            label,
            decision_value,
            scores,
        }
    }

    /// Margin between the best and the runner-up score (infinite with one class)
    pub fn margin(&self) -> f64 {
        let mut runner_up = f64::NEG_INFINITY;
        for (label, score) in &self.scores {
            if *label != self.label && *score > runner_up {
                runner_up = *score;
            }
        }
        self.decision_value - runner_up
    }
}

/// Vector norm used for feature normalization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Norm {
    L1,
    #[default]
    L2,
}

impl Norm {
    /// Compute the norm of a vector
    pub fn of(&self, values: &[f64]) -> f64 {
        match self {
            Norm::L1 => values.iter().map(|v| v.abs()).sum(),
            Norm::L2 => values.iter().map(|v| v * v).sum::<f64>().sqrt(),
        }
    }

    /// Scale a vector to unit norm in place. All-zero vectors are left untouched.
    pub fn normalize(&self, values: &mut [f64]) {
        let norm = self.of(values);
        if norm > 0.0 {
            let inv = 1.0 / norm;
            for v in values.iter_mut() {
                *v *= inv;
            }
        }
    }
}

/// Dot product between two dense vectors of equal length
pub fn dot(x: &[f64], y: &[f64]) -> f64 {
    x.iter().zip(y).map(|(a, b)| a * b).sum()
}
