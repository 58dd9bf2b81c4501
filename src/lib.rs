//! Image classification with pyramid histograms of visual words (PHOW)
//!
//! Dense SIFT descriptors are quantized against a k-means vocabulary, pooled
//! over a spatial pyramid, lifted by a homogeneous kernel map and classified
//! by one-vs-rest linear SVMs. Feature vectors are cached under a
//! fingerprint of every parameter that produced them.

pub mod api;
pub mod cache;
pub mod classifier;
pub mod config;
pub mod core;
pub mod data;
pub mod descriptor;
pub mod evaluation;
pub mod kernel;
pub mod persistence;
pub mod pyramid;
pub mod solver;
pub mod vocabulary;

// Re-export main types for convenience
pub use crate::api::{Pipeline, PhowExtractor, RunOutcome, TrainedPipeline};
pub use crate::cache::{CacheStats, CachingFeatureStore, DiskBackend, MemoryBackend, StorageBackend};
pub use crate::classifier::{LinearClassifier, Model};
pub use crate::config::PipelineConfig;
pub use crate::core::error::*;
pub use crate::core::traits::*;
pub use crate::core::types::*;
pub use crate::data::{GroupedDataset, Record};
pub use crate::evaluation::{ConfusionMatrix, EvaluationReport, Evaluator};
pub use crate::kernel::{HomogeneousKernelMap, KernelMapConfig};
pub use crate::persistence::ModelFile;
pub use crate::vocabulary::Vocabulary;

// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
