//! K-Nearest Neighbors implementation
//!
//! KNN classifier and regressor; prediction is parallelized over query rows.

use ndarray::{Array1, Array2, ArrayView1};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::error::{KolosalError, Result};
use crate::training::models::Estimator;

/// Distance metric for KNN
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    /// Euclidean distance (L2)
    #[default]
    Euclidean,
    /// Manhattan distance (L1)
    Manhattan,
}

/// Weighting scheme for neighbors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeightScheme {
    /// All neighbors have equal weight
    #[default]
    Uniform,
    /// Closer neighbors have more weight (inverse distance)
    Distance,
}

/// KNN configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KNNConfig {
    pub n_neighbors: usize,
    pub metric: DistanceMetric,
    pub weights: WeightScheme,
}

impl Default for KNNConfig {
    fn default() -> Self {
        Self {
            n_neighbors: 5,
            metric: DistanceMetric::Euclidean,
            weights: WeightScheme::Uniform,
        }
    }
}

/// Stored training data shared by both estimators
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Memory {
    x: Array2<f64>,
    y: Array1<f64>,
}

impl Memory {
    fn store(config: &KNNConfig, x: &Array2<f64>, y: &Array1<f64>) -> Result<Self> {
        if x.nrows() != y.len() {
            return Err(KolosalError::ShapeError {
                expected: format!("y length = {}", x.nrows()),
                actual: format!("y length = {}", y.len()),
            });
        }
        if config.n_neighbors == 0 {
            return Err(KolosalError::InvalidParameter {
                name: "n_neighbors".into(),
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }
        if x.nrows() == 0 {
            return Err(KolosalError::TrainingError("Empty dataset".into()));
        }
        Ok(Self {
            x: x.clone(),
            y: y.clone(),
        })
    }

    fn check_query(&self, x: &Array2<f64>) -> Result<()> {
        if x.ncols() != self.x.ncols() {
            return Err(KolosalError::ShapeError {
                expected: format!("{} features", self.x.ncols()),
                actual: format!("{} features", x.ncols()),
            });
        }
        Ok(())
    }

    /// Map every query row to a value computed from its neighbours, in parallel
    fn map_rows<T, F>(&self, x: &Array2<f64>, config: &KNNConfig, f: F) -> Vec<T>
    where
        T: Send,
        F: Fn(&[Neighbor]) -> T + Sync,
    {
        (0..x.nrows())
            .into_par_iter()
            .map(|i| f(&self.nearest(x.row(i), config.n_neighbors, config.metric)))
            .collect()
    }

    /// k nearest rows, closest first; ties go to the earlier training row
    fn nearest(&self, point: ArrayView1<'_, f64>, k: usize, metric: DistanceMetric) -> Vec<Neighbor> {
        let mut heap = BinaryHeap::with_capacity(k + 1);
        for (index, row) in self.x.rows().into_iter().enumerate() {
            let candidate = Neighbor {
                distance: distance(point, row, metric),
                index,
                label: self.y[index],
            };
            if heap.len() < k {
                heap.push(candidate);
            } else if heap.peek().is_some_and(|worst| candidate < *worst) {
                heap.pop();
                heap.push(candidate);
            }
        }
        heap.into_sorted_vec()
    }
}

/// Max-heap entry ordered by distance, then training row
#[derive(Debug, Clone, Copy)]
struct Neighbor {
    distance: f64,
    index: usize,
    label: f64,
}

impl PartialEq for Neighbor {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Neighbor {}

impl PartialOrd for Neighbor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Neighbor {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then_with(|| self.index.cmp(&other.index))
    }
}

fn distance(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>, metric: DistanceMetric) -> f64 {
    match metric {
        DistanceMetric::Euclidean => a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum::<f64>().sqrt(),
        DistanceMetric::Manhattan => a.iter().zip(b.iter()).map(|(x, y)| (x - y).abs()).sum(),
    }
}

fn weight(neighbor: &Neighbor, scheme: WeightScheme) -> f64 {
    match scheme {
        WeightScheme::Uniform => 1.0,
        WeightScheme::Distance => 1.0 / (neighbor.distance + 1e-10),
    }
}

/// Weighted class shares over `classes` (sorted)
fn class_shares(neighbors: &[Neighbor], classes: &[f64], scheme: WeightScheme) -> Vec<f64> {
    let mut shares = vec![0.0; classes.len()];
    let mut total = 0.0;
    for n in neighbors {
        let w = weight(n, scheme);
        if let Some(pos) = classes.iter().position(|&c| c == n.label) {
            shares[pos] += w;
        }
        total += w;
    }
    if total > 0.0 {
        shares.iter_mut().for_each(|s| *s /= total);
    }
    shares
}

/// K-Nearest Neighbors Classifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KNNClassifier {
    config: KNNConfig,
    memory: Option<Memory>,
    classes: Vec<f64>,
}

impl KNNClassifier {
    pub fn new(config: KNNConfig) -> Self {
        Self {
            config,
            memory: None,
            classes: Vec::new(),
        }
    }

    /// Create with default config and specified k
    pub fn with_k(k: usize) -> Self {
        Self::new(KNNConfig {
            n_neighbors: k,
            ..Default::default()
        })
    }

    /// Sorted distinct training labels
    pub fn classes(&self) -> &[f64] {
        &self.classes
    }

    /// Labels of the `predict_proba` columns.
    ///
    /// Labels within {0, 1} always map to the two columns `[P(0), P(1)]`, so a
    /// fit that saw a single class still reports the other with probability 0.
    pub fn proba_labels(&self) -> Vec<f64> {
        if self.classes.iter().all(|&c| c == 0.0 || c == 1.0) {
            vec![0.0, 1.0]
        } else {
            self.classes.clone()
        }
    }

    fn memory(&self) -> Result<&Memory> {
        self.memory.as_ref().ok_or(KolosalError::ModelNotFitted)
    }
}

impl Estimator for KNNClassifier {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        let memory = Memory::store(&self.config, x, y)?;
        let mut classes: Vec<f64> = y.to_vec();
        classes.sort_by(f64::total_cmp);
        classes.dedup();
        self.classes = classes;
        self.memory = Some(memory);
        Ok(())
    }

    /// Weighted majority label; ties go to the smaller label
    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let memory = self.memory()?;
        memory.check_query(x)?;
        let classes = &self.classes;
        let labels = memory.map_rows(x, &self.config, |neighbors| {
            let shares = class_shares(neighbors, classes, self.config.weights);
            let best = shares
                .iter()
                .enumerate()
                .fold(0, |best, (i, &s)| if s > shares[best] { i } else { best });
            classes[best]
        });
        Ok(Array1::from_vec(labels))
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let memory = self.memory()?;
        memory.check_query(x)?;
        let labels = self.proba_labels();
        let n_classes = labels.len();
        let rows = memory.map_rows(x, &self.config, |neighbors| {
            class_shares(neighbors, &labels, self.config.weights)
        });
        let flat: Vec<f64> = rows.into_iter().flatten().collect();
        Ok(Array2::from_shape_vec((x.nrows(), n_classes), flat)?)
    }

    fn name(&self) -> &str {
        "knn_classifier"
    }
}

/// K-Nearest Neighbors Regressor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KNNRegressor {
    config: KNNConfig,
    memory: Option<Memory>,
}

impl KNNRegressor {
    pub fn new(config: KNNConfig) -> Self {
        Self { config, memory: None }
    }

    /// Create with default config and specified k
    pub fn with_k(k: usize) -> Self {
        Self::new(KNNConfig {
            n_neighbors: k,
            ..Default::default()
        })
    }
}

impl Estimator for KNNRegressor {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        self.memory = Some(Memory::store(&self.config, x, y)?);
        Ok(())
    }

    /// Weighted mean of the neighbours' targets
    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let memory = self.memory.as_ref().ok_or(KolosalError::ModelNotFitted)?;
        memory.check_query(x)?;
        let scheme = self.config.weights;
        let values = memory.map_rows(x, &self.config, |neighbors| {
            let (sum, total) = neighbors.iter().fold((0.0, 0.0), |(s, t), n| {
                let w = weight(n, scheme);
                (s + w * n.label, t + w)
            });
            if total > 0.0 {
                sum / total
            } else {
                0.0
            }
        });
        Ok(Array1::from_vec(values))
    }

    fn name(&self) -> &str {
        "knn_regressor"
    }
}
