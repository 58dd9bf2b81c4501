//! Core traits for pluggable pipeline stages

use crate::core::{FeatureVector, Result};

/// Anything with a stable identity that survives process restarts
pub trait Identified {
    /// Stable identifier, e.g. a dataset-relative path
    fn identity(&self) -> String;
}

/// Deterministic feature extractor
///
/// Implementations must be pure: the same item and the same configuration
/// always yield the same vector.
pub trait FeatureExtractor: Send + Sync {
    /// Item type the extractor consumes
    type Item: Identified + Sync;

    /// Compute the feature vector for one item
    fn extract(&self, item: &Self::Item) -> Result<FeatureVector>;

    /// Canonical description of every parameter that affects the output
    fn configuration(&self) -> String;

    /// Length of the produced vectors, when known in advance
    fn dimension(&self) -> Option<usize> {
        None
    }
}

impl<E: FeatureExtractor + ?Sized> FeatureExtractor for &E {
    type Item = E::Item;

    fn extract(&self, item: &Self::Item) -> Result<FeatureVector> {
        (**self).extract(item)
    }

    fn configuration(&self) -> String {
        (**self).configuration()
    }

    fn dimension(&self) -> Option<usize> {
        (**self).dimension()
    }
}
