//! Pipeline configuration
//!
//! Every stage's parameters in one serde structure. Missing fields in a
//! JSON file take their default values, so a file only needs to list what
//! it changes:
//!
//! ```json
//! { "vocabulary": { "k": 600 }, "split": { "groups": 10 } }
//! ```

use crate::classifier::ClassifierConfig;
use crate::core::{PhowError, Result};
use crate::data::SplitConfig;
use crate::descriptor::DenseSiftConfig;
use crate::kernel::{HomogeneousKernelMap, KernelMapConfig};
use crate::pyramid::PyramidConfig;
use crate::solver::SolverConfig;
use crate::vocabulary::VocabularyConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub sift: DenseSiftConfig,
    pub vocabulary: VocabularyConfig,
    /// Contrast threshold for descriptors that go into image features
    pub feature_contrast_threshold: f32,
    /// Quantize descriptors to bytes before vocabulary training and assignment
    pub byte_descriptors: bool,
    pub pyramid: PyramidConfig,
    /// Explicit kernel map applied after aggregation; `None` keeps the
    /// histogram as is
    pub kernel_map: Option<KernelMapConfig>,
    pub classifier: ClassifierConfig,
    pub split: SplitConfig,
    /// Worker threads for feature computation; `None` uses all cores
    pub workers: Option<usize>,
    /// Root for the vocabulary and feature cache; `None` caches in memory
    pub cache_dir: Option<PathBuf>,
    /// Capacity of the in-memory feature cache
    pub memory_cache_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sift: DenseSiftConfig::default(),
            vocabulary: VocabularyConfig::default(),
            feature_contrast_threshold: 0.015,
            byte_descriptors: true,
            pyramid: PyramidConfig::default(),
            kernel_map: Some(KernelMapConfig::default()),
            classifier: ClassifierConfig::default(),
            split: SplitConfig::default(),
            workers: None,
            cache_dir: None,
            memory_cache_capacity: 10_000,
        }
    }
}

impl PipelineConfig {
    /// Load from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text).map_err(|e| {
            PhowError::InvalidParameter(format!("invalid config {}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write as pretty-printed JSON
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Check every stage's parameters
    pub fn validate(&self) -> Result<()> {
        self.sift.validate()?;
        if self.vocabulary.k == 0 {
            return Err(PhowError::InvalidParameter(
                "Vocabulary size must be at least 1".to_string(),
            ));
        }
        if !(self.feature_contrast_threshold >= 0.0) {
            return Err(PhowError::InvalidParameter(format!(
                "Contrast threshold must be non-negative, got: {}",
                self.feature_contrast_threshold
            )));
        }
        self.pyramid.validate()?;
        if let Some(map) = &self.kernel_map {
            HomogeneousKernelMap::new(map.clone())?;
        }
        self.classifier.solver.validate()?;
        if self.split.train == 0 {
            return Err(PhowError::InvalidParameter(
                "At least one training image per group is required".to_string(),
            ));
        }
        if self.workers == Some(0) {
            return Err(PhowError::InvalidParameter(
                "Worker count must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Length of the final feature vectors
    pub fn feature_dimension(&self) -> usize {
        let histogram = self.pyramid.feature_len(self.vocabulary.k);
        match &self.kernel_map {
            Some(map) => histogram * map.expansion(),
            None => histogram,
        }
    }

    pub fn solver(&self) -> &SolverConfig {
        &self.classifier.solver
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.sift.step, 3);
        assert_eq!(config.sift.bin_sizes, vec![4, 6, 8, 10]);
        assert_eq!(config.vocabulary.k, 300);
        assert_eq!(config.split.groups, Some(5));
        assert_eq!(config.solver().c, 1.0);
        assert_eq!(config.solver().epsilon, 1e-3);
        // 300 words x 5 cells x 3 kernel map coordinates
        assert_eq!(config.feature_dimension(), 4500);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json() {
        let file = NamedTempFile::new().unwrap();
        fs::write(file.path(), r#"{"vocabulary": {"k": 60}, "kernel_map": null, "classifier": {"c": 10.0}}"#).unwrap();

        let config = PipelineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.vocabulary.k, 60);
        assert_eq!(config.vocabulary.sample_images, 30);
        assert_eq!(config.kernel_map, None);
        assert_eq!(config.solver().c, 10.0);
        assert_eq!(config.feature_dimension(), 300);
    }

    #[test]
    fn test_save_and_load() {
        let file = NamedTempFile::new().unwrap();
        let mut config = PipelineConfig::default();
        config.workers = Some(2);
        config.save_to_file(file.path()).unwrap();
        assert_eq!(PipelineConfig::from_file(file.path()).unwrap(), config);
    }

    #[test]
    fn test_invalid_values() {
        let mut config = PipelineConfig::default();
        config.workers = Some(0);
        assert!(config.validate().is_err());

        let file = NamedTempFile::new().unwrap();
        fs::write(file.path(), r#"{"pyramid": {"divisions": []}}"#).unwrap();
        assert!(PipelineConfig::from_file(file.path()).is_err());
    }
}
