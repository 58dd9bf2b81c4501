//! Grouped image datasets
//!
//! A dataset maps each label to the records (images) carrying it. Records
//! are identified by a stable string id and decode their image lazily, so
//! items whose features are already cached are never decoded. Sampling and
//! splitting are seeded and therefore reproducible.

pub mod directory;

use crate::core::{Identified, Label, PhowError, Result};
use crate::descriptor::{from_dynamic, FloatImage};
use log::warn;
use rand::rngs::StdRng;
use rand::seq::{index, SliceRandom};
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Where a record's pixels come from
#[derive(Clone)]
pub enum ImageSource {
    Memory(Arc<FloatImage>),
    File(PathBuf),
}

impl fmt::Debug for ImageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageSource::Memory(img) => write!(f, "Memory({}x{})", img.width(), img.height()),
            ImageSource::File(path) => write!(f, "File({})", path.display()),
        }
    }
}

/// One image with a stable identity
#[derive(Debug, Clone)]
pub struct Record {
    id: String,
    source: ImageSource,
}

impl Record {
    pub fn new(id: impl Into<String>, image: FloatImage) -> Self {
        Self {
            id: id.into(),
            source: ImageSource::Memory(Arc::new(image)),
        }
    }

    pub fn from_file(id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            source: ImageSource::File(path.into()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn source(&self) -> &ImageSource {
        &self.source
    }

    /// Grayscale image in [0, 1]; file-backed records are decoded on each call
    pub fn load(&self) -> Result<Arc<FloatImage>> {
        match &self.source {
            ImageSource::Memory(img) => Ok(Arc::clone(img)),
            ImageSource::File(path) => {
                let decoded = image::open(path).map_err(|e| {
                    PhowError::Dataset(format!("cannot decode {}: {e}", path.display()))
                })?;
                Ok(Arc::new(from_dynamic(&decoded)))
            }
        }
    }
}

impl Identified for Record {
    fn identity(&self) -> String {
        self.id.clone()
    }
}

/// Records grouped by label, both in sorted order
#[derive(Debug, Clone, Default)]
pub struct GroupedDataset {
    groups: BTreeMap<Label, Vec<Record>>,
}

impl GroupedDataset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, label: impl Into<Label>, record: Record) {
        let group = self.groups.entry(label.into()).or_default();
        let pos = group.partition_point(|r| r.id < record.id);
        group.insert(pos, record);
    }

    /// Number of records over all groups
    pub fn len(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn labels(&self) -> impl Iterator<Item = &Label> {
        self.groups.keys()
    }

    pub fn num_groups(&self) -> usize {
        self.groups.len()
    }

    pub fn group(&self, label: &str) -> Option<&[Record]> {
        self.groups.get(label).map(Vec::as_slice)
    }

    /// Every (label, record) pair, label-major then by id
    pub fn iter(&self) -> impl Iterator<Item = (&Label, &Record)> {
        self.groups
            .iter()
            .flat_map(|(label, records)| records.iter().map(move |r| (label, r)))
    }

    /// Keep `count` randomly chosen groups; all of them if there are fewer
    pub fn sample_groups(&self, count: usize, seed: u64) -> GroupedDataset {
        if count >= self.groups.len() {
            return self.clone();
        }
        let mut rng = StdRng::seed_from_u64(seed);
        let labels: Vec<&Label> = self.groups.keys().collect();
        let groups = index::sample(&mut rng, labels.len(), count)
            .into_iter()
            .map(|i| (labels[i].clone(), self.groups[labels[i]].clone()))
            .collect();
        GroupedDataset { groups }
    }

    /// Up to `count` records drawn uniformly without replacement from all
    /// groups, in dataset order
    pub fn uniform_sample(&self, count: usize, seed: u64) -> Vec<(&Label, &Record)> {
        let all: Vec<(&Label, &Record)> = self.iter().collect();
        if count >= all.len() {
            return all;
        }
        let mut rng = StdRng::seed_from_u64(seed);
        let mut picked = index::sample(&mut rng, all.len(), count).into_vec();
        picked.sort_unstable();
        picked.into_iter().map(|i| all[i]).collect()
    }

    /// Partition every group into disjoint train, validation and test sets
    ///
    /// Each group is shuffled with the seed, then the first `train` records
    /// go to training, the next `validation` to validation and the next
    /// `test` to testing. A group that is too small fills the partitions in
    /// that order and logs a warning.
    pub fn split(&self, config: &SplitConfig) -> DatasetSplit {
        let mut rng = StdRng::seed_from_u64(config.seed);
        let mut split = DatasetSplit::default();
        let wanted = config.train + config.validation + config.test;

        for (label, records) in &self.groups {
            if records.len() < wanted {
                warn!(
                    "Group {label:?} has {} images, {} requested for splitting",
                    records.len(),
                    wanted
                );
            }
            let mut shuffled = records.clone();
            shuffled.shuffle(&mut rng);

            let mut rest = shuffled.into_iter();
            for (target, n) in [
                (&mut split.train, config.train),
                (&mut split.validation, config.validation),
                (&mut split.test, config.test),
            ] {
                for record in rest.by_ref().take(n) {
                    target.insert(label.clone(), record);
                }
            }
        }
        split
    }
}

impl FromIterator<(Label, Record)> for GroupedDataset {
    fn from_iter<I: IntoIterator<Item = (Label, Record)>>(iter: I) -> Self {
        let mut dataset = GroupedDataset::new();
        for (label, record) in iter {
            dataset.insert(label, record);
        }
        dataset
    }
}

/// Group sampling and per-group split sizes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitConfig {
    /// Number of groups to keep before splitting; `None` keeps all
    pub groups: Option<usize>,
    pub train: usize,
    pub validation: usize,
    pub test: usize,
    pub seed: u64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            groups: Some(5),
            train: 15,
            validation: 0,
            test: 15,
            seed: 0,
        }
    }
}

/// Disjoint train, validation and test partitions
#[derive(Debug, Clone, Default)]
pub struct DatasetSplit {
    pub train: GroupedDataset,
    pub validation: GroupedDataset,
    pub test: GroupedDataset,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::image_from_fn;
    use std::collections::HashSet;

    fn dataset(groups: usize, per_group: usize) -> GroupedDataset {
        let mut ds = GroupedDataset::new();
        for g in 0..groups {
            for i in 0..per_group {
                ds.insert(
                    format!("class{g}"),
                    Record::new(format!("class{g}/{i:03}"), image_from_fn(4, 4, |_, _| 0.5)),
                );
            }
        }
        ds
    }

    #[test]
    fn test_insert_keeps_ids_sorted() {
        let mut ds = GroupedDataset::new();
        for id in ["b", "c", "a"] {
            ds.insert("g", Record::new(id, image_from_fn(1, 1, |_, _| 0.0)));
        }
        let ids: Vec<&str> = ds.group("g").unwrap().iter().map(Record::id).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_collect_from_pairs() {
        let ds: GroupedDataset = ["b/2", "a/1", "b/1"]
            .iter()
            .map(|id| {
                let label = id[..1].to_string();
                (label, Record::new(*id, image_from_fn(1, 1, |_, _| 0.0)))
            })
            .collect();
        assert_eq!(ds.num_groups(), 2);
        let ids: Vec<&str> = ds.group("b").unwrap().iter().map(Record::id).collect();
        assert_eq!(ids, vec!["b/1", "b/2"]);
    }

    #[test]
    fn test_split_is_disjoint_and_sized() {
        let ds = dataset(3, 35);
        let split = ds.split(&SplitConfig::default());

        assert_eq!(split.train.len(), 45);
        assert_eq!(split.validation.len(), 0);
        assert_eq!(split.test.len(), 45);

        let train: HashSet<&str> = split.train.iter().map(|(_, r)| r.id()).collect();
        let test: HashSet<&str> = split.test.iter().map(|(_, r)| r.id()).collect();
        assert!(train.is_disjoint(&test));
        for label in ds.labels() {
            assert_eq!(split.train.group(label).unwrap().len(), 15);
        }
    }

    #[test]
    fn test_split_is_reproducible() {
        let ds = dataset(2, 40);
        let config = SplitConfig {
            seed: 99,
            ..SplitConfig::default()
        };
        let ids = |s: &DatasetSplit| -> Vec<String> {
            s.test.iter().map(|(_, r)| r.id().to_string()).collect()
        };
        assert_eq!(ids(&ds.split(&config)), ids(&ds.split(&config)));
    }

    #[test]
    fn test_short_group_fills_train_first() {
        let ds = dataset(1, 20);
        let split = ds.split(&SplitConfig::default());
        assert_eq!(split.train.len(), 15);
        assert_eq!(split.test.len(), 5);
    }

    #[test]
    fn test_sample_groups() {
        let ds = dataset(8, 2);
        let sampled = ds.sample_groups(5, 3);
        assert_eq!(sampled.num_groups(), 5);
        assert_eq!(sampled.len(), 10);
        assert_eq!(ds.sample_groups(20, 3).num_groups(), 8);

        let first: Vec<Label> = sampled.labels().cloned().collect();
        let second: Vec<Label> = ds.sample_groups(5, 3).labels().cloned().collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_uniform_sample() {
        let ds = dataset(4, 10);
        let sample = ds.uniform_sample(30, 11);
        assert_eq!(sample.len(), 30);
        let unique: HashSet<&str> = sample.iter().map(|(_, r)| r.id()).collect();
        assert_eq!(unique.len(), 30);
        assert_eq!(ds.uniform_sample(100, 11).len(), 40);
    }

    #[test]
    fn test_memory_record_loads() {
        let record = Record::new("x", image_from_fn(3, 2, |x, _| x as f32 / 2.0));
        let img = record.load().unwrap();
        assert_eq!(img.dimensions(), (3, 2));
        assert_eq!(record.identity(), "x");
    }

    #[test]
    fn test_missing_file_is_dataset_error() {
        let record = Record::from_file("gone", "/nonexistent/image.png");
        assert!(matches!(record.load(), Err(PhowError::Dataset(_))));
    }
}
