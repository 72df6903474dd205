//! Fold plans for out-of-fold stacking
//!
//! Every strategy here partitions the sample indices: each row lands in
//! exactly one validation set, which is what makes the stacked training
//! signal leak-free.

use crate::error::{KolosalError, Result};
use ndarray::Array1;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Cross-validation strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CVStrategy {
    /// K-Fold cross-validation
    KFold { n_splits: usize, shuffle: bool },
    /// Stratified K-Fold (maintains class distribution)
    StratifiedKFold { n_splits: usize, shuffle: bool },
    /// Group K-Fold (keeps groups together)
    GroupKFold { n_splits: usize },
}

impl Default for CVStrategy {
    fn default() -> Self {
        CVStrategy::KFold { n_splits: 5, shuffle: true }
    }
}

impl CVStrategy {
    pub fn n_splits(&self) -> usize {
        match *self {
            CVStrategy::KFold { n_splits, .. }
            | CVStrategy::StratifiedKFold { n_splits, .. }
            | CVStrategy::GroupKFold { n_splits } => n_splits,
        }
    }

    /// Same strategy with a different fold count
    pub fn with_n_splits(&self, n_splits: usize) -> Self {
        match *self {
            CVStrategy::KFold { shuffle, .. } => CVStrategy::KFold { n_splits, shuffle },
            CVStrategy::StratifiedKFold { shuffle, .. } => CVStrategy::StratifiedKFold { n_splits, shuffle },
            CVStrategy::GroupKFold { .. } => CVStrategy::GroupKFold { n_splits },
        }
    }
}

/// A single train/validation split
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CVSplit {
    pub train_indices: Vec<usize>,
    pub test_indices: Vec<usize>,
    pub fold_idx: usize,
}

/// Ordered sequence of splits consumed by the stacking component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoldPlan {
    splits: Vec<CVSplit>,
}

impl FoldPlan {
    /// Wrap caller-built splits. Fold indices are renumbered to plan order.
    pub fn from_splits(splits: Vec<CVSplit>) -> Self {
        let splits = splits
            .into_iter()
            .enumerate()
            .map(|(fold_idx, split)| CVSplit { fold_idx, ..split })
            .collect();
        Self { splits }
    }

    /// Build a plan from per-fold validation index sets; each fold trains on
    /// every row of `0..n_samples` outside its validation set.
    pub fn from_validation_sets(n_samples: usize, validation_sets: Vec<Vec<usize>>) -> Self {
        let splits = validation_sets
            .into_iter()
            .enumerate()
            .map(|(fold_idx, test_indices)| {
                let mut in_val = vec![false; n_samples];
                for &i in &test_indices {
                    if i < n_samples {
                        in_val[i] = true;
                    }
                }
                let train_indices = (0..n_samples).filter(|&i| !in_val[i]).collect();
                CVSplit {
                    train_indices,
                    test_indices,
                    fold_idx,
                }
            })
            .collect();
        Self { splits }
    }

    pub fn n_folds(&self) -> usize {
        self.splits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.splits.is_empty()
    }

    pub fn splits(&self) -> &[CVSplit] {
        &self.splits
    }

    pub fn iter(&self) -> std::slice::Iter<'_, CVSplit> {
        self.splits.iter()
    }

    /// Check that the validation sets partition `0..n_samples` and never
    /// overlap their own training sets.
    pub fn validate(&self, n_samples: usize) -> Result<()> {
        let mut seen = vec![false; n_samples];
        for split in &self.splits {
            for &i in &split.test_indices {
                if i >= n_samples {
                    return Err(KolosalError::ValidationError(format!(
                        "fold {} validation index {} out of range for {} samples",
                        split.fold_idx, i, n_samples
                    )));
                }
                if seen[i] {
                    return Err(KolosalError::ValidationError(format!(
                        "row {} appears in more than one validation set",
                        i
                    )));
                }
                seen[i] = true;
            }
            if split.train_indices.iter().any(|t| split.test_indices.contains(t)) {
                return Err(KolosalError::ValidationError(format!(
                    "fold {} trains on its own validation rows",
                    split.fold_idx
                )));
            }
        }
        if let Some(missing) = seen.iter().position(|&s| !s) {
            return Err(KolosalError::ValidationError(format!(
                "row {} is not covered by any validation set",
                missing
            )));
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a FoldPlan {
    type Item = &'a CVSplit;
    type IntoIter = std::slice::Iter<'a, CVSplit>;

    fn into_iter(self) -> Self::IntoIter {
        self.splits.iter()
    }
}

/// Cross-validation splitter
#[derive(Debug, Clone)]
pub struct CrossValidator {
    strategy: CVStrategy,
    random_state: Option<u64>,
}

impl CrossValidator {
    /// Create a new cross-validator
    pub fn new(strategy: CVStrategy) -> Self {
        Self {
            strategy,
            random_state: None,
        }
    }

    /// Set random state for reproducibility
    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = Some(seed);
        self
    }

    /// Generate a fold plan
    pub fn split(&self, n_samples: usize, y: Option<&Array1<f64>>, groups: Option<&Array1<i64>>) -> Result<FoldPlan> {
        let splits = match &self.strategy {
            CVStrategy::KFold { n_splits, shuffle } => self.k_fold_split(n_samples, *n_splits, *shuffle)?,
            CVStrategy::StratifiedKFold { n_splits, shuffle } => {
                let y = y.ok_or_else(|| {
                    KolosalError::ValidationError("StratifiedKFold requires target array".to_string())
                })?;
                self.stratified_k_fold_split(y, *n_splits, *shuffle)?
            }
            CVStrategy::GroupKFold { n_splits } => {
                let groups = groups.ok_or_else(|| {
                    KolosalError::ValidationError("GroupKFold requires groups array".to_string())
                })?;
                self.group_k_fold_split(groups, *n_splits)?
            }
        };
        Ok(FoldPlan { splits })
    }

    fn rng(&self) -> ChaCha8Rng {
        match self.random_state {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        }
    }

    fn check_n_splits(n_splits: usize, n_items: usize, what: &str) -> Result<()> {
        if n_splits < 2 {
            return Err(KolosalError::ValidationError("n_splits must be at least 2".to_string()));
        }
        if n_items < n_splits {
            return Err(KolosalError::ValidationError(format!(
                "number of {} ({}) must be >= n_splits ({})",
                what, n_items, n_splits
            )));
        }
        Ok(())
    }

    fn k_fold_split(&self, n_samples: usize, n_splits: usize, shuffle: bool) -> Result<Vec<CVSplit>> {
        Self::check_n_splits(n_splits, n_samples, "samples")?;

        let mut indices: Vec<usize> = (0..n_samples).collect();
        if shuffle {
            indices.shuffle(&mut self.rng());
        }

        // The first n_samples % n_splits folds take one extra row
        let base = n_samples / n_splits;
        let remainder = n_samples % n_splits;

        let mut splits = Vec::with_capacity(n_splits);
        let mut current = 0;
        for fold_idx in 0..n_splits {
            let fold_size = if fold_idx < remainder { base + 1 } else { base };
            let test_indices = indices[current..current + fold_size].to_vec();
            let train_indices = indices[..current]
                .iter()
                .chain(indices[current + fold_size..].iter())
                .copied()
                .collect();

            splits.push(CVSplit {
                train_indices,
                test_indices,
                fold_idx,
            });
            current += fold_size;
        }

        Ok(splits)
    }

    fn stratified_k_fold_split(&self, y: &Array1<f64>, n_splits: usize, shuffle: bool) -> Result<Vec<CVSplit>> {
        Self::check_n_splits(n_splits, y.len(), "samples")?;

        // Ordered map keeps fold assignment reproducible for a given seed
        let mut class_indices: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
        for (idx, &val) in y.iter().enumerate() {
            class_indices.entry(val.round() as i64).or_default().push(idx);
        }

        let mut rng = self.rng();
        if shuffle {
            for indices in class_indices.values_mut() {
                indices.shuffle(&mut rng);
            }
        }

        // Deal rows round-robin, continuing the rotation across classes so
        // fold sizes stay balanced
        let mut folds: Vec<Vec<usize>> = vec![Vec::new(); n_splits];
        let mut next = 0;
        for indices in class_indices.values() {
            for &idx in indices {
                folds[next % n_splits].push(idx);
                next += 1;
            }
        }

        Ok(Self::splits_from_folds(&folds))
    }

    fn group_k_fold_split(&self, groups: &Array1<i64>, n_splits: usize) -> Result<Vec<CVSplit>> {
        let mut unique_groups: Vec<i64> = groups.iter().copied().collect();
        unique_groups.sort_unstable();
        unique_groups.dedup();
        Self::check_n_splits(n_splits, unique_groups.len(), "groups")?;

        let group_to_fold: BTreeMap<i64, usize> = unique_groups
            .iter()
            .enumerate()
            .map(|(i, &group)| (group, i % n_splits))
            .collect();

        let mut folds: Vec<Vec<usize>> = vec![Vec::new(); n_splits];
        for (idx, group) in groups.iter().enumerate() {
            if let Some(&fold) = group_to_fold.get(group) {
                folds[fold].push(idx);
            }
        }

        Ok(Self::splits_from_folds(&folds))
    }

    fn splits_from_folds(folds: &[Vec<usize>]) -> Vec<CVSplit> {
        (0..folds.len())
            .map(|fold_idx| CVSplit {
                test_indices: folds[fold_idx].clone(),
                train_indices: folds
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| *i != fold_idx)
                    .flat_map(|(_, f)| f.iter().copied())
                    .collect(),
                fold_idx,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_k_fold() {
        let cv = CrossValidator::new(CVStrategy::KFold { n_splits: 5, shuffle: false });
        let plan = cv.split(100, None, None).unwrap();

        assert_eq!(plan.n_folds(), 5);
        for split in &plan {
            assert_eq!(split.test_indices.len(), 20);
            assert_eq!(split.train_indices.len(), 80);
        }

        // All indices should be covered exactly once in validation sets
        let mut all_test: Vec<usize> = plan.iter().flat_map(|s| s.test_indices.clone()).collect();
        all_test.sort();
        assert_eq!(all_test, (0..100).collect::<Vec<_>>());
        plan.validate(100).unwrap();
    }

    #[test]
    fn test_k_fold_uneven() {
        let cv = CrossValidator::new(CVStrategy::KFold { n_splits: 3, shuffle: true }).with_random_state(1024);
        let plan = cv.split(100, None, None).unwrap();
        let sizes: Vec<usize> = plan.iter().map(|s| s.test_indices.len()).collect();
        assert_eq!(sizes, vec![34, 33, 33]);
        plan.validate(100).unwrap();
    }

    #[test]
    fn test_k_fold_seeded_is_reproducible() {
        let cv = CrossValidator::new(CVStrategy::KFold { n_splits: 4, shuffle: true }).with_random_state(7);
        assert_eq!(cv.split(40, None, None).unwrap(), cv.split(40, None, None).unwrap());
    }

    #[test]
    fn test_k_fold_too_few_samples() {
        let cv = CrossValidator::new(CVStrategy::KFold { n_splits: 5, shuffle: false });
        assert!(cv.split(3, None, None).is_err());
    }

    #[test]
    fn test_stratified_k_fold() {
        let y = Array1::from_vec(vec![
            0.0, 0.0, 0.0, 0.0, 0.0, // 5 samples of class 0
            1.0, 1.0, 1.0, 1.0, 1.0, // 5 samples of class 1
        ]);

        let cv = CrossValidator::new(CVStrategy::StratifiedKFold { n_splits: 5, shuffle: false });
        let plan = cv.split(10, Some(&y), None).unwrap();

        assert_eq!(plan.n_folds(), 5);
        for split in &plan {
            assert_eq!(split.test_indices.len(), 2);
            let positives = split.test_indices.iter().filter(|&&i| y[i] > 0.5).count();
            assert_eq!(positives, 1);
        }
        plan.validate(10).unwrap();
    }

    #[test]
    fn test_group_k_fold_keeps_groups_together() {
        let groups = Array1::from_vec(vec![1, 1, 2, 2, 3, 3, 4, 4]);
        let cv = CrossValidator::new(CVStrategy::GroupKFold { n_splits: 2 });
        let plan = cv.split(8, None, Some(&groups)).unwrap();
        plan.validate(8).unwrap();
        for split in &plan {
            for &i in &split.test_indices {
                for &j in &split.train_indices {
                    assert_ne!(groups[i], groups[j]);
                }
            }
        }
    }

    #[test]
    fn test_validate_detects_overlap_and_gaps() {
        let overlapping = FoldPlan::from_validation_sets(4, vec![vec![0, 1], vec![1, 2, 3]]);
        assert!(overlapping.validate(4).is_err());

        let gap = FoldPlan::from_validation_sets(4, vec![vec![0], vec![1, 2]]);
        assert!(gap.validate(4).is_err());

        let ok = FoldPlan::from_validation_sets(4, vec![vec![0, 3], vec![1, 2]]);
        ok.validate(4).unwrap();
        assert_eq!(ok.splits()[1].train_indices, vec![0, 3]);
    }

    #[test]
    fn test_strategy_serde() {
        let strategy = CVStrategy::KFold { n_splits: 3, shuffle: true };
        let json = serde_json::to_string(&strategy).unwrap();
        assert!(json.contains("\"type\":\"k_fold\""));
        let back: CVStrategy = serde_json::from_str(&json).unwrap();
        assert_eq!(back, strategy);
    }
}
