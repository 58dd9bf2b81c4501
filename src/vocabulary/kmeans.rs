//! Vocabulary training by k-means clustering
//!
//! Seeding uses k-means++ driven by a caller-supplied RNG, so a fixed seed
//! reproduces the exact clustering. Lloyd iterations stop when no assignment
//! changes, when the largest centroid shift drops to `tolerance`, or after
//! `max_iterations`.
//!
//! Empty clusters are re-seeded with the point farthest from its current
//! centroid. Ties go to the lowest point index, a point is used at most once
//! per iteration, and points are never taken from singleton clusters.

use super::{DistanceMetric, Element, Vocabulary};
use crate::core::{PhowError, Result};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Vocabulary training parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VocabularyConfig {
    /// Number of codewords
    pub k: usize,
    /// Training items sampled uniformly to harvest descriptors from
    pub sample_images: usize,
    /// Cap on the pooled descriptor count
    pub max_descriptors: usize,
    /// Contrast threshold used when harvesting descriptors
    pub contrast_threshold: f32,
    /// Maximum number of Lloyd iterations
    pub max_iterations: usize,
    /// Convergence threshold on the largest centroid shift
    pub tolerance: f32,
    pub metric: DistanceMetric,
    /// Fail instead of warning when `max_iterations` is reached
    pub require_convergence: bool,
    /// Seed for sampling, truncation and k-means++ seeding
    pub seed: u64,
}

impl Default for VocabularyConfig {
    fn default() -> Self {
        Self {
            k: 300,
            sample_images: 30,
            max_descriptors: 10_000,
            contrast_threshold: 0.005,
            max_iterations: 50,
            tolerance: 1e-4,
            metric: DistanceMetric::SquaredEuclidean,
            require_convergence: false,
            seed: 42,
        }
    }
}

/// Summary of a clustering run
#[derive(Debug, Clone, PartialEq)]
pub struct ClusteringSummary {
    pub iterations: usize,
    pub converged: bool,
    pub reseeded: usize,
    pub inertia: f64,
}

/// k-means vocabulary trainer
#[derive(Debug, Clone)]
pub struct VocabularyTrainer {
    config: VocabularyConfig,
}

impl VocabularyTrainer {
    pub fn new(config: VocabularyConfig) -> Result<Self> {
        if config.k == 0 {
            return Err(PhowError::InvalidParameter(
                "Codeword count must be positive".to_string(),
            ));
        }
        if config.max_descriptors == 0 {
            return Err(PhowError::InvalidParameter(
                "Descriptor cap must be positive".to_string(),
            ));
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &VocabularyConfig {
        &self.config
    }

    /// Train with an RNG seeded from the configuration
    pub fn train<T: Element>(&self, pool: Vec<Vec<T>>) -> Result<Vocabulary> {
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        self.train_with_rng(pool, &mut rng).map(|(vocab, _)| vocab)
    }

    /// Train with an explicit random source
    pub fn train_with_rng<T: Element, R: Rng>(
        &self,
        mut pool: Vec<Vec<T>>,
        rng: &mut R,
    ) -> Result<(Vocabulary, ClusteringSummary)> {
        let k = self.config.k;

        if pool.len() > self.config.max_descriptors {
            debug!(
                "Truncating descriptor pool from {} to {}",
                pool.len(),
                self.config.max_descriptors
            );
            pool.shuffle(rng);
            pool.truncate(self.config.max_descriptors);
        }

        let n = pool.len();
        if n < k {
            return Err(PhowError::Training(format!(
                "Cannot train {k} codewords from {n} descriptors"
            )));
        }

        let dim = pool[0].len();
        if dim == 0 {
            return Err(PhowError::Training(
                "Descriptors must have at least one dimension".to_string(),
            ));
        }
        let mut data = Vec::with_capacity(n * dim);
        for d in &pool {
            if d.len() != dim {
                return Err(PhowError::DimensionMismatch {
                    expected: dim,
                    actual: d.len(),
                });
            }
            data.extend(d.iter().map(|v| v.to_f32()));
        }
        drop(pool);

        if data.iter().any(|v| !v.is_finite()) {
            return Err(PhowError::Training(
                "Descriptor pool contains non-finite values".to_string(),
            ));
        }

        info!("Clustering {n} descriptors of dimension {dim} into {k} codewords");

        let points = Points { data: &data, dim };
        let mut centroids = kmeans_plus_plus(&points, k, self.config.metric, rng);
        let summary = self.lloyd(&points, &mut centroids, k)?;

        info!(
            "k-means finished after {} iterations (converged: {}, reseeded: {}, inertia: {:.4})",
            summary.iterations, summary.converged, summary.reseeded, summary.inertia
        );

        let vocabulary = Vocabulary::from_flat(k, dim, centroids, self.config.metric)?;
        Ok((vocabulary, summary))
    }

    fn lloyd(&self, points: &Points, centroids: &mut [f32], k: usize) -> Result<ClusteringSummary> {
        let metric = self.config.metric;
        let dim = points.dim;
        let n = points.len();

        let mut assignment: Vec<usize> = vec![usize::MAX; n];
        let mut iterations = 0;
        let mut converged = false;
        let mut reseeded = 0;

        while iterations < self.config.max_iterations {
            iterations += 1;

            let nearest: Vec<(usize, f32)> = (0..n)
                .into_par_iter()
                .map(|i| nearest_centroid(points.get(i), centroids, dim, metric))
                .collect();

            let mut changed = 0;
            for (slot, &(c, _)) in assignment.iter_mut().zip(&nearest) {
                if *slot != c {
                    *slot = c;
                    changed += 1;
                }
            }

            reseeded += reseed_empty_clusters(&mut assignment, &nearest, k);

            let updated = update_centroids(points, &assignment, k, metric);
            let shift = centroids
                .chunks_exact(dim)
                .zip(updated.chunks_exact(dim))
                .map(|(old, new)| DistanceMetric::SquaredEuclidean.distance(old, new).sqrt())
                .fold(0.0f32, f32::max);
            centroids.copy_from_slice(&updated);

            debug!("k-means iteration {iterations}: {changed} reassigned, max shift {shift:.6}");

            if changed == 0 || shift <= self.config.tolerance {
                converged = true;
                break;
            }
        }

        if !converged {
            if self.config.require_convergence {
                return Err(PhowError::Training(format!(
                    "k-means did not converge within {} iterations",
                    self.config.max_iterations
                )));
            }
            warn!(
                "k-means reached the iteration cap ({}) before converging",
                self.config.max_iterations
            );
        }

        let inertia = (0..n)
            .into_par_iter()
            .map(|i| nearest_centroid(points.get(i), centroids, dim, metric).1 as f64)
            .sum();

        Ok(ClusteringSummary {
            iterations,
            converged,
            reseeded,
            inertia,
        })
    }
}

struct Points<'a> {
    data: &'a [f32],
    dim: usize,
}

impl<'a> Points<'a> {
    fn len(&self) -> usize {
        self.data.len() / self.dim
    }

    #[inline]
    fn get(&self, i: usize) -> &'a [f32] {
        &self.data[i * self.dim..(i + 1) * self.dim]
    }
}

#[inline]
fn nearest_centroid(point: &[f32], centroids: &[f32], dim: usize, metric: DistanceMetric) -> (usize, f32) {
    let mut best = (0, f32::INFINITY);
    for (j, c) in centroids.chunks_exact(dim).enumerate() {
        let d = metric.distance(point, c);
        if d < best.1 {
            best = (j, d);
        }
    }
    best
}

/// k-means++ seeding: each new centroid is drawn with probability
/// proportional to its distance from the nearest chosen centroid
fn kmeans_plus_plus<R: Rng>(points: &Points, k: usize, metric: DistanceMetric, rng: &mut R) -> Vec<f32> {
    let n = points.len();
    let mut chosen = Vec::with_capacity(k);
    let mut centroids = Vec::with_capacity(k * points.dim);

    let first = rng.gen_range(0..n);
    chosen.push(first);
    centroids.extend_from_slice(points.get(first));

    let mut closest: Vec<f32> = (0..n)
        .into_par_iter()
        .map(|i| metric.distance(points.get(i), points.get(first)))
        .collect();

    while chosen.len() < k {
        let total: f64 = closest.iter().map(|&d| d as f64).sum();
        let next = if total > 0.0 {
            let target = rng.gen::<f64>() * total;
            let mut acc = 0.0;
            let mut pick = n - 1;
            for (i, &d) in closest.iter().enumerate() {
                acc += d as f64;
                if acc > target && d > 0.0 {
                    pick = i;
                    break;
                }
            }
            pick
        } else {
            // Every remaining point coincides with a centroid
            (0..n).find(|i| !chosen.contains(i)).unwrap_or(0)
        };

        chosen.push(next);
        let c = points.get(next);
        centroids.extend_from_slice(c);
        closest.par_iter_mut().enumerate().for_each(|(i, d)| {
            let nd = metric.distance(points.get(i), c);
            if nd < *d {
                *d = nd;
            }
        });
    }

    centroids
}

/// Move the farthest points into empty clusters; returns how many were re-seeded
fn reseed_empty_clusters(assignment: &mut [usize], nearest: &[(usize, f32)], k: usize) -> usize {
    let mut counts = vec![0usize; k];
    for &c in assignment.iter() {
        counts[c] += 1;
    }
    let empty: Vec<usize> = (0..k).filter(|&c| counts[c] == 0).collect();
    if empty.is_empty() {
        return 0;
    }

    let mut candidates: Vec<usize> = (0..assignment.len()).collect();
    candidates.sort_by(|&a, &b| {
        nearest[b]
            .1
            .partial_cmp(&nearest[a].1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.cmp(&b))
    });

    let mut reseeded = 0;
    let mut cursor = candidates.into_iter();
    for cluster in empty {
        for p in cursor.by_ref() {
            let donor = assignment[p];
            if counts[donor] > 1 {
                counts[donor] -= 1;
                counts[cluster] += 1;
                assignment[p] = cluster;
                reseeded += 1;
                break;
            }
        }
    }
    reseeded
}

fn update_centroids(points: &Points, assignment: &[usize], k: usize, metric: DistanceMetric) -> Vec<f32> {
    let dim = points.dim;
    let mut members: Vec<Vec<usize>> = vec![Vec::new(); k];
    for (i, &c) in assignment.iter().enumerate() {
        members[c].push(i);
    }

    members
        .par_iter()
        .flat_map_iter(|idx| {
            let mut centroid = vec![0.0f32; dim];
            if idx.is_empty() {
                return centroid;
            }
            match metric {
                DistanceMetric::SquaredEuclidean => {
                    let mut sums = vec![0.0f64; dim];
                    for &i in idx {
                        for (s, &v) in sums.iter_mut().zip(points.get(i)) {
                            *s += v as f64;
                        }
                    }
                    for (c, s) in centroid.iter_mut().zip(sums) {
                        *c = (s / idx.len() as f64) as f32;
                    }
                }
                DistanceMetric::Manhattan => {
                    let mut column = Vec::with_capacity(idx.len());
                    for (d, c) in centroid.iter_mut().enumerate() {
                        column.clear();
                        column.extend(idx.iter().map(|&i| points.get(i)[d]));
                        let mid = column.len() / 2;
                        let (_, median, _) = column.select_nth_unstable_by(mid, |a, b| a.total_cmp(b));
                        *c = *median;
                    }
                }
            }
            centroid
        })
        .collect()
}
