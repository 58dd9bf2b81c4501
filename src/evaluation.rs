//! Classification evaluation
//!
//! A [`ConfusionMatrix`] accumulates (true, predicted) pairs. The label space
//! is the union of every true and predicted label seen, so a class that is
//! only ever predicted (or only ever present) still gets a row and a column.
//! Low accuracy is a result, never an error.

use crate::classifier::Model;
use crate::core::{FeatureVector, Label, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Counts of (true label, predicted label) pairs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfusionMatrix {
    labels: BTreeSet<Label>,
    counts: BTreeMap<(Label, Label), usize>,
    total: usize,
}

impl ConfusionMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from parallel slices of true and predicted labels
    pub fn from_pairs<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a Label, &'a Label)>,
    {
        let mut matrix = Self::new();
        for (actual, predicted) in pairs {
            matrix.record(actual, predicted);
        }
        matrix
    }

    pub fn record(&mut self, actual: &Label, predicted: &Label) {
        self.labels.insert(actual.clone());
        self.labels.insert(predicted.clone());
        *self
            .counts
            .entry((actual.clone(), predicted.clone()))
            .or_insert(0) += 1;
        self.total += 1;
    }

    /// Sorted label space
    pub fn labels(&self) -> Vec<&Label> {
        self.labels.iter().collect()
    }

    pub fn count(&self, actual: &str, predicted: &str) -> usize {
        self.counts
            .iter()
            .find(|((a, p), _)| a == actual && p == predicted)
            .map_or(0, |(_, &c)| c)
    }

    /// Number of recorded pairs
    pub fn total(&self) -> usize {
        self.total
    }

    /// Sum of the diagonal
    pub fn correct(&self) -> usize {
        self.counts
            .iter()
            .filter(|((a, p), _)| a == p)
            .map(|(_, &c)| c)
            .sum()
    }

    /// Fraction of correct predictions; 0 for an empty matrix
    pub fn accuracy(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.correct() as f64 / self.total as f64
        }
    }

    /// Dense rows in label order: `rows[i][j]` counts true `i` predicted `j`
    pub fn rows(&self) -> Vec<Vec<usize>> {
        let index: BTreeMap<&Label, usize> =
            self.labels.iter().enumerate().map(|(i, l)| (l, i)).collect();
        let mut rows = vec![vec![0; self.labels.len()]; self.labels.len()];
        for ((a, p), &c) in &self.counts {
            rows[index[a]][index[p]] = c;
        }
        rows
    }

    /// Precision, recall and F1 per label
    pub fn class_metrics(&self) -> Vec<ClassMetrics> {
        self.labels
            .iter()
            .map(|label| {
                let mut tp = 0;
                let mut predicted = 0;
                let mut actual = 0;
                for ((a, p), &c) in &self.counts {
                    if p == label {
                        predicted += c;
                    }
                    if a == label {
                        actual += c;
                        if p == label {
                            tp += c;
                        }
                    }
                }
                ClassMetrics::from_counts(label.clone(), tp, predicted, actual)
            })
            .collect()
    }
}

/// Per-class precision, recall and F1
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub label: Label,
    pub true_positives: usize,
    /// Items predicted as this label
    pub predicted: usize,
    /// Items whose true label is this label
    pub support: usize,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

impl ClassMetrics {
    fn from_counts(label: Label, true_positives: usize, predicted: usize, support: usize) -> Self {
        let ratio = |num: usize, den: usize| if den == 0 { 0.0 } else { num as f64 / den as f64 };
        let precision = ratio(true_positives, predicted);
        let recall = ratio(true_positives, support);
        let f1 = if precision + recall == 0.0 {
            0.0
        } else {
            2.0 * precision * recall / (precision + recall)
        };
        Self {
            label,
            true_positives,
            predicted,
            support,
            precision,
            recall,
            f1,
        }
    }
}

/// Summary of one evaluation pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub total: usize,
    pub correct: usize,
    pub accuracy: f64,
    pub error_rate: f64,
    pub classes: Vec<ClassMetrics>,
    /// Label order of `confusion`
    pub labels: Vec<Label>,
    pub confusion: Vec<Vec<usize>>,
}

impl EvaluationReport {
    pub fn from_matrix(matrix: &ConfusionMatrix) -> Self {
        let accuracy = matrix.accuracy();
        Self {
            total: matrix.total(),
            correct: matrix.correct(),
            accuracy,
            error_rate: if matrix.total() == 0 { 0.0 } else { 1.0 - accuracy },
            classes: matrix.class_metrics(),
            labels: matrix.labels().into_iter().cloned().collect(),
            confusion: matrix.rows(),
        }
    }

    /// Unweighted mean of per-class F1
    pub fn macro_f1(&self) -> f64 {
        if self.classes.is_empty() {
            0.0
        } else {
            self.classes.iter().map(|c| c.f1).sum::<f64>() / self.classes.len() as f64
        }
    }
}

impl fmt::Display for EvaluationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Evaluated items: {}", self.total)?;
        writeln!(f, "Correct:         {}", self.correct)?;
        writeln!(f, "Accuracy:        {:.3}", self.accuracy)?;
        writeln!(f, "Error rate:      {:.3}", self.error_rate)?;
        writeln!(f)?;

        let width = self.labels.iter().map(|l| l.len()).max().unwrap_or(0).max(5);
        writeln!(
            f,
            "{:<width$}  {:>9}  {:>9}  {:>9}  {:>7}",
            "Class", "Precision", "Recall", "F1", "Support"
        )?;
        for c in &self.classes {
            writeln!(
                f,
                "{:<width$}  {:>9.3}  {:>9.3}  {:>9.3}  {:>7}",
                c.label, c.precision, c.recall, c.f1, c.support
            )?;
        }
        writeln!(f)?;

        writeln!(f, "Confusion matrix (rows: actual, columns: predicted)")?;
        write!(f, "{:<width$}", "")?;
        for l in &self.labels {
            write!(f, "  {l:>width$}")?;
        }
        writeln!(f)?;
        for (label, row) in self.labels.iter().zip(&self.confusion) {
            write!(f, "{label:<width$}")?;
            for c in row {
                write!(f, "  {c:>width$}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Runs a model over labelled features and collects the confusion matrix
pub struct Evaluator<'a> {
    model: &'a Model,
}

impl<'a> Evaluator<'a> {
    pub fn new(model: &'a Model) -> Self {
        Self { model }
    }

    /// Predict every item and tabulate the results
    ///
    /// A dimensionality mismatch aborts the pass.
    pub fn evaluate<'b, I>(&self, items: I) -> Result<ConfusionMatrix>
    where
        I: IntoIterator<Item = (&'b Label, &'b FeatureVector)>,
    {
        let mut matrix = ConfusionMatrix::new();
        for (actual, feature) in items {
            let prediction = self.model.predict(feature)?;
            matrix.record(actual, &prediction.label);
        }
        Ok(matrix)
    }

    pub fn report<'b, I>(&self, items: I) -> Result<EvaluationReport>
    where
        I: IntoIterator<Item = (&'b Label, &'b FeatureVector)>,
    {
        Ok(EvaluationReport::from_matrix(&self.evaluate(items)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn l(s: &str) -> Label {
        s.to_string()
    }

    fn sample() -> ConfusionMatrix {
        let actual = [l("a"), l("a"), l("a"), l("b"), l("b"), l("c")];
        let predicted = [l("a"), l("a"), l("b"), l("b"), l("a"), l("c")];
        ConfusionMatrix::from_pairs(actual.iter().zip(&predicted))
    }

    #[test]
    fn test_conservation_and_accuracy() {
        let m = sample();
        let sum: usize = m.rows().iter().flatten().sum();
        assert_eq!(sum, 6);
        assert_eq!(m.total(), 6);
        assert_eq!(m.correct(), 4);
        assert_relative_eq!(m.accuracy(), 4.0 / 6.0);
    }

    #[test]
    fn test_rows_layout() {
        let m = sample();
        assert_eq!(m.rows(), vec![vec![2, 1, 0], vec![1, 1, 0], vec![0, 0, 1]]);
        assert_eq!(m.count("a", "b"), 1);
        assert_eq!(m.count("c", "a"), 0);
    }

    #[test]
    fn test_class_metrics() {
        let metrics = sample().class_metrics();
        let a = &metrics[0];
        assert_eq!(a.label, "a");
        assert_relative_eq!(a.precision, 2.0 / 3.0);
        assert_relative_eq!(a.recall, 2.0 / 3.0);
        assert_relative_eq!(a.f1, 2.0 / 3.0);
        assert_eq!(a.support, 3);
    }

    #[test]
    fn test_predicted_only_label_has_zero_recall_and_precision() {
        let actual = [l("a"), l("a")];
        let predicted = [l("a"), l("ghost")];
        let m = ConfusionMatrix::from_pairs(actual.iter().zip(&predicted));

        assert_eq!(m.labels(), vec![&l("a"), &l("ghost")]);
        let ghost = &m.class_metrics()[1];
        assert_eq!(ghost.support, 0);
        assert_eq!(ghost.recall, 0.0);
        assert_eq!(ghost.precision, 0.0);
        assert_eq!(ghost.f1, 0.0);
    }

    #[test]
    fn test_empty_matrix() {
        let report = EvaluationReport::from_matrix(&ConfusionMatrix::new());
        assert_eq!(report.total, 0);
        assert_eq!(report.accuracy, 0.0);
        assert_eq!(report.error_rate, 0.0);
        assert_eq!(report.macro_f1(), 0.0);
    }

    #[test]
    fn test_report_display_lists_counts() {
        let report = EvaluationReport::from_matrix(&sample());
        let text = report.to_string();
        assert!(text.contains("Accuracy:        0.667"));
        assert!(text.contains("Confusion matrix"));
        assert_relative_eq!(report.error_rate, 2.0 / 6.0, epsilon = 1e-12);
    }

    #[test]
    fn test_report_serializes() {
        let report = EvaluationReport::from_matrix(&sample());
        let json = serde_json::to_string(&report).unwrap();
        let back: EvaluationReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back.confusion, report.confusion);
        assert_eq!(back.labels, report.labels);
        assert_relative_eq!(back.accuracy, report.accuracy, epsilon = 1e-12);
    }

    #[test]
    fn test_evaluator_with_model() {
        let model = Model::from_parts(
            vec![l("neg"), l("pos")],
            vec![vec![-1.0], vec![1.0]],
            vec![0.0, 0.0],
        )
        .unwrap();
        let labels = vec![l("pos"), l("neg"), l("pos")];
        let features = vec![vec![2.0], vec![-1.0], vec![-0.5]];

        let report = Evaluator::new(&model)
            .report(labels.iter().zip(&features))
            .unwrap();
        assert_eq!(report.total, 3);
        assert_eq!(report.correct, 2);

        let bad = vec![vec![1.0, 2.0]];
        assert!(Evaluator::new(&model).evaluate(labels.iter().zip(&bad)).is_err());
    }
}
