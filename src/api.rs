//! High-level pipeline API
//!
//! Ties descriptor extraction, vocabulary learning, spatial pyramid
//! aggregation, the kernel map, feature caching, classification and
//! evaluation together.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use phow::api::Pipeline;
//! use phow::config::PipelineConfig;
//! use phow::data::GroupedDataset;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let dataset = GroupedDataset::from_directory("101_ObjectCategories")?;
//!
//! let outcome = Pipeline::new(PipelineConfig::default())?
//!     .with_cache_dir("phow-cache")
//!     .with_workers(8)
//!     .run(&dataset)?;
//!
//! println!("{}", outcome.report);
//! # Ok(())
//! # }
//! ```

use crate::cache::{CacheStats, CachingFeatureStore, DiskBackend, MemoryBackend, StorageBackend};
use crate::classifier::{LinearClassifier, Model};
use crate::config::PipelineConfig;
use crate::core::{
    canonical_json, fingerprint_str, FeatureExtractor, FeatureVector, Label, PhowError, Prediction,
    Result,
};
use crate::data::{DatasetSplit, GroupedDataset, Record};
use crate::descriptor::{DenseSift, DenseSiftConfig, Descriptor, FloatImage};
use crate::evaluation::{EvaluationReport, Evaluator};
use crate::kernel::{HomogeneousKernelMap, KernelMapConfig};
use crate::persistence::ModelFile;
use crate::pyramid::{PyramidConfig, SpatialPyramid};
use crate::solver::SolverConfig;
use crate::vocabulary::{read_vocabulary, write_vocabulary, Element, Vocabulary, VocabularyConfig, VocabularyTrainer};
use log::{info, warn};
use parking_lot::Mutex;
use rayon::prelude::*;
use rayon::ThreadPool;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// File name of the cached vocabulary under the cache root
pub const VOCABULARY_FILE: &str = "vocabulary.bin";
/// Sub-directory of the cache root holding feature records
pub const FEATURES_DIR: &str = "features";

/// Feature store used by the pipeline, with an injected backend
pub type FeatureStore = CachingFeatureStore<PhowExtractor, Arc<dyn StorageBackend>>;

/// Pyramid histogram of visual words extractor
///
/// Dense SIFT descriptors are assigned to the vocabulary, pooled over the
/// spatial pyramid and optionally lifted by the homogeneous kernel map.
pub struct PhowExtractor {
    sift: DenseSift,
    vocabulary: Arc<Vocabulary>,
    pyramid: SpatialPyramid,
    kernel_map: Option<HomogeneousKernelMap>,
    contrast_threshold: f32,
    byte_descriptors: bool,
    configuration: String,
}

/// Every parameter that affects a feature vector
#[derive(Serialize)]
struct FeatureConfiguration<'a> {
    format: u32,
    sift: &'a DenseSiftConfig,
    contrast_threshold: f32,
    byte_descriptors: bool,
    vocabulary: String,
    pyramid: &'a PyramidConfig,
    kernel_map: Option<&'a KernelMapConfig>,
}

impl PhowExtractor {
    pub fn new(config: &PipelineConfig, vocabulary: Arc<Vocabulary>) -> Result<Self> {
        let sift = DenseSift::new(config.sift.clone())?;
        if vocabulary.dim() != sift.descriptor_len() {
            return Err(PhowError::DimensionMismatch {
                expected: sift.descriptor_len(),
                actual: vocabulary.dim(),
            });
        }
        let pyramid = SpatialPyramid::new(config.pyramid.clone())?;
        let kernel_map = config
            .kernel_map
            .clone()
            .map(HomogeneousKernelMap::new)
            .transpose()?;

        let configuration = canonical_json(&FeatureConfiguration {
            format: 1,
            sift: &config.sift,
            contrast_threshold: config.feature_contrast_threshold,
            byte_descriptors: config.byte_descriptors,
            vocabulary: vocabulary.identity(),
            pyramid: &config.pyramid,
            kernel_map: config.kernel_map.as_ref(),
        })?;

        Ok(Self {
            sift,
            vocabulary,
            pyramid,
            kernel_map,
            contrast_threshold: config.feature_contrast_threshold,
            byte_descriptors: config.byte_descriptors,
            configuration,
        })
    }

    pub fn vocabulary(&self) -> &Arc<Vocabulary> {
        &self.vocabulary
    }

    pub fn kernel_map(&self) -> Option<&HomogeneousKernelMap> {
        self.kernel_map.as_ref()
    }

    /// Fingerprint of the feature configuration
    pub fn fingerprint(&self) -> String {
        fingerprint_str(&self.configuration)
    }

    /// Feature vector of a decoded image
    pub fn extract_image(&self, image: &FloatImage) -> Result<FeatureVector> {
        let (width, height) = (image.width() as f32, image.height() as f32);
        let histogram = if self.byte_descriptors {
            let descriptors = self.sift.extract_bytes(image, self.contrast_threshold);
            self.pyramid.aggregate(&descriptors, width, height, &self.vocabulary)?
        } else {
            let descriptors = self.sift.extract(image, self.contrast_threshold);
            self.pyramid.aggregate(&descriptors, width, height, &self.vocabulary)?
        };

        Ok(match &self.kernel_map {
            Some(map) => map.apply(&histogram),
            None => histogram,
        })
    }
}

impl FeatureExtractor for PhowExtractor {
    type Item = Record;

    fn extract(&self, item: &Record) -> Result<FeatureVector> {
        self.extract_image(&*item.load()?)
    }

    fn configuration(&self) -> String {
        self.configuration.clone()
    }

    fn dimension(&self) -> Option<usize> {
        let histogram = self.pyramid.config().feature_len(self.vocabulary.k());
        Some(match &self.kernel_map {
            Some(map) => map.output_dim(histogram),
            None => histogram,
        })
    }
}

/// Feature vectors with their labels and item ids, label-major then by id
#[derive(Debug, Clone, Default)]
pub struct LabelledFeatures {
    pub labels: Vec<Label>,
    pub ids: Vec<String>,
    pub features: Vec<FeatureVector>,
}

impl LabelledFeatures {
    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Label, &FeatureVector)> {
        self.labels.iter().zip(&self.features)
    }
}

/// Worker pool with `workers` threads, or one per core
pub fn thread_pool(workers: Option<usize>) -> Result<ThreadPool> {
    let mut builder = rayon::ThreadPoolBuilder::new();
    if let Some(n) = workers {
        builder = builder.num_threads(n);
    }
    builder
        .build()
        .map_err(|e| PhowError::InvalidParameter(format!("cannot build worker pool: {e}")))
}

/// Features for every record of `dataset`, computed on `pool`
///
/// Results are merged under a lock and sorted by item id afterwards, so the
/// output does not depend on scheduling. The first error aborts the pass;
/// records cached before it stay cached.
pub fn compute_features<E, B>(
    store: &CachingFeatureStore<E, B>,
    dataset: &GroupedDataset,
    pool: &ThreadPool,
) -> Result<LabelledFeatures>
where
    E: FeatureExtractor<Item = Record>,
    B: StorageBackend,
{
    let items: Vec<(&Label, &Record)> = dataset.iter().collect();
    let merged: Mutex<BTreeMap<Label, Vec<(String, FeatureVector)>>> = Mutex::new(BTreeMap::new());

    pool.install(|| {
        items.par_iter().try_for_each(|(label, record)| -> Result<()> {
            let vector = store.get(record)?;
            merged
                .lock()
                .entry((*label).clone())
                .or_default()
                .push((record.id().to_string(), vector));
            Ok(())
        })
    })?;

    let mut out = LabelledFeatures::default();
    for (label, mut group) in merged.into_inner() {
        group.sort_by(|a, b| a.0.cmp(&b.0));
        for (id, vector) in group {
            out.labels.push(label.clone());
            out.ids.push(id);
            out.features.push(vector);
        }
    }
    Ok(out)
}

/// Descriptors of the sampled images, flattened into one pool
fn harvest<T, F>(records: &[&Record], pool: &ThreadPool, extract: F) -> Result<Vec<Vec<T>>>
where
    T: Element,
    F: Fn(&FloatImage) -> Vec<Descriptor<T>> + Sync,
{
    let per_image = pool.install(|| {
        records
            .par_iter()
            .map(|record| Ok(extract(&*record.load()?)))
            .collect::<Result<Vec<_>>>()
    })?;
    Ok(per_image
        .into_iter()
        .flatten()
        .map(|d| d.vector)
        .collect())
}

/// Everything that determines a trained vocabulary
#[derive(Serialize)]
struct VocabularyTraining<'a> {
    sift: &'a DenseSiftConfig,
    vocabulary: &'a VocabularyConfig,
    byte_descriptors: bool,
    images: Vec<&'a str>,
}

/// End-to-end pipeline with builder-style configuration
pub struct Pipeline {
    config: PipelineConfig,
    backend: Option<Arc<dyn StorageBackend>>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            backend: None,
        })
    }

    /// Persist the vocabulary and features under `dir`
    pub fn with_cache_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.config.cache_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Set the worker pool size for feature computation
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.config.workers = Some(workers.max(1));
        self
    }

    /// Store features in `backend` instead of the default one
    pub fn with_backend(mut self, backend: Arc<dyn StorageBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Worker pool sized from the configuration
    ///
    /// Descriptor harvesting, k-means, feature computation and classifier
    /// training all run on it.
    pub fn thread_pool(&self) -> Result<ThreadPool> {
        thread_pool(self.config.workers)
    }

    fn vocabulary_path(&self) -> Option<PathBuf> {
        self.config.cache_dir.as_ref().map(|d| d.join(VOCABULARY_FILE))
    }

    fn backend(&self) -> Arc<dyn StorageBackend> {
        match (&self.backend, &self.config.cache_dir) {
            (Some(backend), _) => Arc::clone(backend),
            (None, Some(dir)) => Arc::new(DiskBackend::new(dir.join(FEATURES_DIR))),
            (None, None) => Arc::new(MemoryBackend::new(self.config.memory_cache_capacity)),
        }
    }

    /// Sample groups and split them into train, validation and test sets
    pub fn prepare(&self, dataset: &GroupedDataset) -> Result<DatasetSplit> {
        if dataset.is_empty() {
            return Err(PhowError::Dataset("dataset is empty".to_string()));
        }
        let split = &self.config.split;
        let selected = match split.groups {
            Some(n) => dataset.sample_groups(n, split.seed),
            None => dataset.clone(),
        };
        let parts = selected.split(split);
        info!(
            "Split {} groups into {} training, {} validation and {} test images",
            selected.num_groups(),
            parts.train.len(),
            parts.validation.len(),
            parts.test.len()
        );
        if parts.train.is_empty() {
            return Err(PhowError::Dataset("no training images after splitting".to_string()));
        }
        Ok(parts)
    }

    /// Train a vocabulary from a uniform sample of `training`
    ///
    /// The returned vocabulary carries a fingerprint of everything that
    /// determined it, including the sampled image ids.
    pub fn train_vocabulary(&self, training: &GroupedDataset) -> Result<Vocabulary> {
        self.train_vocabulary_in(training, &self.thread_pool()?)
    }

    fn train_vocabulary_in(&self, training: &GroupedDataset, pool: &ThreadPool) -> Result<Vocabulary> {
        let vc = &self.config.vocabulary;
        let sample = training.uniform_sample(vc.sample_images, vc.seed);
        let records: Vec<&Record> = sample.iter().map(|(_, r)| *r).collect();
        let fingerprint = self.vocabulary_fingerprint(&records)?;

        let sift = DenseSift::new(self.config.sift.clone())?;
        let trainer = VocabularyTrainer::new(vc.clone())?;
        let threshold = vc.contrast_threshold;

        info!(
            "Training {} codewords from {} sampled images",
            vc.k,
            records.len()
        );
        let vocabulary = if self.config.byte_descriptors {
            let descriptors = harvest(&records, pool, |img| sift.extract_bytes(img, threshold))?;
            info!("Harvested {} descriptors", descriptors.len());
            pool.install(|| trainer.train(descriptors))?
        } else {
            let descriptors = harvest(&records, pool, |img| sift.extract(img, threshold))?;
            info!("Harvested {} descriptors", descriptors.len());
            pool.install(|| trainer.train(descriptors))?
        };
        Ok(vocabulary.with_training_fingerprint(fingerprint))
    }

    fn vocabulary_fingerprint(&self, records: &[&Record]) -> Result<String> {
        let canonical = canonical_json(&VocabularyTraining {
            sift: &self.config.sift,
            vocabulary: &self.config.vocabulary,
            byte_descriptors: self.config.byte_descriptors,
            images: records.iter().map(|r| r.id()).collect(),
        })?;
        Ok(fingerprint_str(&canonical))
    }

    /// Reuse the cached vocabulary when its fingerprint matches, otherwise
    /// train and cache a new one
    pub fn load_or_train_vocabulary(&self, training: &GroupedDataset) -> Result<Vocabulary> {
        self.load_or_train_vocabulary_in(training, &self.thread_pool()?)
    }

    fn load_or_train_vocabulary_in(
        &self,
        training: &GroupedDataset,
        pool: &ThreadPool,
    ) -> Result<Vocabulary> {
        let Some(path) = self.vocabulary_path() else {
            return self.train_vocabulary_in(training, pool);
        };

        let vc = &self.config.vocabulary;
        let sample = training.uniform_sample(vc.sample_images, vc.seed);
        let records: Vec<&Record> = sample.iter().map(|(_, r)| *r).collect();
        let expected = self.vocabulary_fingerprint(&records)?;

        if path.exists() {
            match read_vocabulary(&path) {
                Ok(cached) if cached.training_fingerprint() == Some(expected.as_str()) => {
                    info!("Reusing vocabulary from {}", path.display());
                    return Ok(cached);
                }
                Ok(cached) => warn!(
                    "{}",
                    PhowError::ConfigurationMismatch {
                        expected,
                        found: cached.training_fingerprint().unwrap_or("none").to_string(),
                    }
                ),
                Err(e) => warn!("Ignoring cached vocabulary: {e}"),
            }
        }

        let vocabulary = self.train_vocabulary_in(training, pool)?;
        if let Err(e) = write_vocabulary(&path, &vocabulary) {
            warn!("Could not cache vocabulary: {e}");
        }
        Ok(vocabulary)
    }

    /// Feature store for a vocabulary, backed by this pipeline's storage
    pub fn feature_store(&self, vocabulary: Arc<Vocabulary>) -> Result<FeatureStore> {
        let extractor = PhowExtractor::new(&self.config, vocabulary)?;
        Ok(CachingFeatureStore::new(extractor, self.backend()))
    }

    /// Learn the vocabulary and the classifier from `training`
    pub fn fit(&self, training: &GroupedDataset) -> Result<TrainedPipeline> {
        self.fit_in(training, Arc::new(self.thread_pool()?))
    }

    fn fit_in(&self, training: &GroupedDataset, pool: Arc<ThreadPool>) -> Result<TrainedPipeline> {
        let vocabulary = Arc::new(self.load_or_train_vocabulary_in(training, &pool)?);
        let store = self.feature_store(vocabulary)?;

        let train = compute_features(&store, training, &pool)?;
        info!("Computed {} training feature vectors", train.len());

        let classifier = LinearClassifier::with_config(self.config.classifier.clone());
        let model = pool.install(|| classifier.train(&train.features, &train.labels))?;
        info!("Trained classifier over {} classes", model.labels().len());

        Ok(TrainedPipeline {
            store,
            model,
            solver: self.config.classifier.solver.clone(),
            pool,
        })
    }

    /// Restore a trained pipeline from a saved model and its vocabulary
    ///
    /// Fails with `ConfigurationMismatch` if the features this pipeline would
    /// compute differ from those the model was trained on.
    pub fn restore(&self, model_file: &ModelFile, vocabulary: Vocabulary) -> Result<TrainedPipeline> {
        let store = self.feature_store(Arc::new(vocabulary))?;
        let fingerprint = store.fingerprint().to_string();
        model_file.check_fingerprint(&fingerprint)?;
        Ok(TrainedPipeline {
            store,
            model: model_file.model()?,
            solver: model_file.metadata.training_params.clone(),
            pool: Arc::new(self.thread_pool()?),
        })
    }

    /// Vocabulary cached under the cache root
    pub fn cached_vocabulary(&self) -> Result<Vocabulary> {
        let path = self
            .vocabulary_path()
            .ok_or_else(|| PhowError::CacheIo("no cache directory configured".to_string()))?;
        read_vocabulary(path)
    }

    /// Split, train on the training part and evaluate on the test part
    pub fn run(&self, dataset: &GroupedDataset) -> Result<RunOutcome> {
        let split = self.prepare(dataset)?;
        let trained = self.fit_in(&split.train, Arc::new(self.thread_pool()?))?;
        let report = trained.evaluate(&split.test)?;
        info!("Accuracy {:.3} over {} test images", report.accuracy, report.total);
        Ok(RunOutcome {
            cache_stats: trained.cache_stats(),
            trained,
            report,
            split,
        })
    }
}

/// Vocabulary, feature store and classifier ready for prediction
pub struct TrainedPipeline {
    store: FeatureStore,
    model: Model,
    solver: SolverConfig,
    pool: Arc<ThreadPool>,
}

impl TrainedPipeline {
    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn extractor(&self) -> &PhowExtractor {
        self.store.extractor()
    }

    /// Fingerprint of the feature configuration the model was trained with
    pub fn fingerprint(&self) -> &str {
        self.store.fingerprint()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.store.stats()
    }

    pub fn predict(&self, record: &Record) -> Result<Prediction> {
        self.model.predict(&self.store.get(record)?)
    }

    pub fn evaluate(&self, dataset: &GroupedDataset) -> Result<EvaluationReport> {
        let test = compute_features(&self.store, dataset, &self.pool)?;
        Evaluator::new(&self.model).report(test.iter())
    }

    /// Serializable form of the model with its feature fingerprint
    pub fn to_model_file(&self) -> ModelFile {
        ModelFile::new(
            &self.model,
            self.extractor().kernel_map().map(|m| m.config().clone()),
            self.fingerprint(),
            &self.solver,
        )
    }
}

/// Result of [`Pipeline::run`]
pub struct RunOutcome {
    pub trained: TrainedPipeline,
    pub report: EvaluationReport,
    pub split: DatasetSplit,
    pub cache_stats: CacheStats,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::image_from_fn;
    use crate::vocabulary::DistanceMetric;

    fn small_config() -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.sift.step = 4;
        config.sift.bin_sizes = vec![4];
        config.vocabulary.k = 4;
        config
    }

    fn vocab(dim: usize) -> Arc<Vocabulary> {
        let centroids = (0..4).map(|i| vec![i as f32 * 20.0; dim]).collect();
        Arc::new(Vocabulary::new(centroids, DistanceMetric::SquaredEuclidean).unwrap())
    }

    fn stripes(vertical: bool) -> FloatImage {
        image_from_fn(32, 32, move |x, y| {
            let c = if vertical { x } else { y };
            if (c / 4) % 2 == 0 { 0.9 } else { 0.1 }
        })
    }

    #[test]
    fn test_extractor_dimension() {
        let config = small_config();
        let extractor = PhowExtractor::new(&config, vocab(128)).unwrap();
        let v = extractor.extract_image(&stripes(true)).unwrap();
        assert_eq!(Some(v.len()), extractor.dimension());
        assert_eq!(v.len(), 4 * 5 * 3);
    }

    #[test]
    fn test_vocabulary_dimension_checked() {
        assert!(matches!(
            PhowExtractor::new(&small_config(), vocab(64)),
            Err(PhowError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_configuration_tracks_parameters() {
        let config = small_config();
        let a = PhowExtractor::new(&config, vocab(128)).unwrap();

        let mut other = config.clone();
        other.pyramid.divisions = vec![1, 2, 4];
        let b = PhowExtractor::new(&other, vocab(128)).unwrap();

        let mut unmapped = config.clone();
        unmapped.kernel_map = None;
        let c = PhowExtractor::new(&unmapped, vocab(128)).unwrap();

        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert_eq!(
            a.fingerprint(),
            PhowExtractor::new(&config, vocab(128)).unwrap().fingerprint()
        );
    }

    #[test]
    fn test_compute_features_is_sorted() {
        let mut dataset = GroupedDataset::new();
        for i in (0..6).rev() {
            dataset.insert("h", Record::new(format!("h/{i}"), stripes(false)));
            dataset.insert("v", Record::new(format!("v/{i}"), stripes(true)));
        }
        let pipeline = Pipeline::new(small_config()).unwrap().with_workers(3);
        let store = pipeline.feature_store(vocab(128)).unwrap();

        let features = compute_features(&store, &dataset, &pipeline.thread_pool().unwrap()).unwrap();
        assert_eq!(features.len(), 12);
        assert_eq!(features.ids[0], "h/0");
        assert_eq!(features.ids[6], "v/0");
        assert_eq!(features.labels[11], "v");
        assert_eq!(store.stats().extractions, 12);
    }

    #[test]
    fn test_worker_pool_follows_configuration() {
        let pipeline = Pipeline::new(small_config()).unwrap().with_workers(3);
        assert_eq!(pipeline.thread_pool().unwrap().current_num_threads(), 3);
        let pool = pipeline.thread_pool().unwrap();
        let threads = pool.install(rayon::current_num_threads);
        assert_eq!(threads, 3);
    }

    #[test]
    fn test_prepare_requires_data() {
        let pipeline = Pipeline::new(small_config()).unwrap();
        assert!(matches!(
            pipeline.prepare(&GroupedDataset::new()),
            Err(PhowError::Dataset(_))
        ));
    }
}
