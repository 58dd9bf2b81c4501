//! Model serialization and persistence
//!
//! A saved model carries its label set, one weight vector and bias per
//! label, the kernel map configuration and the fingerprint of the feature
//! configuration it was trained on. Loading it into a pipeline whose
//! features would differ is refused.

use crate::cache::write_atomic;
use crate::classifier::Model;
use crate::core::{Label, PhowError, Result};
use crate::kernel::KernelMapConfig;
use crate::solver::SolverConfig;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Serializable representation of a trained classifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelFile {
    /// Class labels in score order
    pub labels: Vec<Label>,
    /// One weight vector per label
    pub weights: Vec<Vec<f64>>,
    /// One bias per label
    pub biases: Vec<f64>,
    /// Kernel map applied to histograms before classification
    pub kernel_map: Option<KernelMapConfig>,
    /// Fingerprint of the feature configuration used in training
    pub feature_fingerprint: String,
    /// Model metadata
    pub metadata: ModelMetadata,
}

/// Model metadata for tracking and validation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// Library version used to create the model
    pub library_version: String,
    pub n_classes: usize,
    pub dimension: usize,
    /// Training parameters used
    pub training_params: SolverConfig,
    /// Creation timestamp
    pub created_at: String,
}

impl ModelFile {
    pub fn new(
        model: &Model,
        kernel_map: Option<KernelMapConfig>,
        feature_fingerprint: &str,
        training_params: &SolverConfig,
    ) -> Self {
        Self {
            labels: model.labels().to_vec(),
            weights: model.weights().to_vec(),
            biases: model.biases().to_vec(),
            kernel_map,
            feature_fingerprint: feature_fingerprint.to_string(),
            metadata: ModelMetadata {
                library_version: crate::VERSION.to_string(),
                n_classes: model.labels().len(),
                dimension: model.dimension(),
                training_params: training_params.clone(),
                created_at: chrono::Utc::now().to_rfc3339(),
            },
        }
    }

    /// Rebuild the classifier
    pub fn model(&self) -> Result<Model> {
        Model::from_parts(self.labels.clone(), self.weights.clone(), self.biases.clone())
    }

    /// Refuse features computed under another configuration
    pub fn check_fingerprint(&self, active: &str) -> Result<()> {
        if self.feature_fingerprint != active {
            return Err(PhowError::ConfigurationMismatch {
                expected: self.feature_fingerprint.clone(),
                found: active.to_string(),
            });
        }
        Ok(())
    }

    /// Save model to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        write_atomic(path.as_ref(), &[json.as_slice()])?;
        Ok(())
    }

    /// Load model from file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let model = serde_json::from_reader(BufReader::new(file))?;
        Ok(model)
    }

    /// Print model summary
    pub fn print_summary(&self) {
        println!("=== PHOW Model Summary ===");
        println!("Classes: {}", self.labels.join(", "));
        println!("Feature Dimension: {}", self.metadata.dimension);
        match &self.kernel_map {
            Some(map) => println!(
                "Kernel Map: {:?}, order {}, gamma {}",
                map.kernel, map.order, map.gamma
            ),
            None => println!("Kernel Map: none"),
        }
        println!("Feature Fingerprint: {}", self.feature_fingerprint);
        println!("Library Version: {}", self.metadata.library_version);
        println!("Created: {}", self.metadata.created_at);
        println!("Training Parameters:");
        println!("  C: {}", self.metadata.training_params.c);
        println!("  Epsilon: {}", self.metadata.training_params.epsilon);
        println!(
            "  Max Iterations: {}",
            self.metadata.training_params.max_iterations
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::LinearClassifier;
    use tempfile::NamedTempFile;

    fn trained() -> Model {
        let features = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        let labels = vec!["left".to_string(), "right".to_string()];
        LinearClassifier::new().train(&features, &labels).unwrap()
    }

    #[test]
    fn test_model_serialization() -> Result<()> {
        let model = trained();
        let file = ModelFile::new(&model, Some(KernelMapConfig::default()), "abc", &SolverConfig::default());

        let temp_file = NamedTempFile::new().expect("Failed to create temp file");
        file.save_to_file(temp_file.path())?;
        let loaded = ModelFile::load_from_file(temp_file.path())?;

        assert_eq!(loaded.labels, vec!["left", "right"]);
        assert_eq!(loaded.metadata.n_classes, 2);
        assert_eq!(loaded.kernel_map, Some(KernelMapConfig::default()));
        assert_eq!(loaded.model()?.predict(&[1.0, 0.0])?.label, "left");
        Ok(())
    }

    #[test]
    fn test_fingerprint_check() {
        let file = ModelFile::new(&trained(), None, "abc", &SolverConfig::default());
        assert!(file.check_fingerprint("abc").is_ok());
        assert!(matches!(
            file.check_fingerprint("def"),
            Err(PhowError::ConfigurationMismatch { .. })
        ));
    }

    #[test]
    fn test_tampered_shape_is_rejected() {
        let mut file = ModelFile::new(&trained(), None, "abc", &SolverConfig::default());
        file.biases.pop();
        assert!(file.model().is_err());
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            ModelFile::load_from_file("/nonexistent/model.json"),
            Err(PhowError::Io(_))
        ));
    }
}
