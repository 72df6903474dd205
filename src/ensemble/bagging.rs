//! Seed bagging: refit on reshuffled copies of the training set and
//! average the test predictions
//!
//! The working copy of the training data is reshuffled cumulatively: round
//! `n` permutes the already-shuffled copy from round `n - 1` with seed
//! `seed + n`.

use indicatif::{ProgressBar, ProgressStyle};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{KolosalError, Result};
use crate::training::boosting::BoostOptions;
use crate::training::lightgbm::{self, LightGBMConfig};
use crate::training::{positive_class_probability, Estimator};
use crate::utils::shuffle_rows;

/// What a bagged estimator predicts on the test set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BagTask {
    /// Class-1 probability of a binary classifier
    #[default]
    Classification,
    /// Raw predicted value
    Regression,
}

/// Presentation settings for a bagging call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BagOptions {
    /// Draw a progress bar over bag rounds on stderr
    pub progress: bool,
}

fn check_rounds(bag_rounds: usize) -> Result<()> {
    if bag_rounds == 0 {
        return Err(KolosalError::InvalidParameter {
            name: "bag_rounds".into(),
            value: "0".into(),
            reason: "must be at least 1".into(),
        });
    }
    Ok(())
}

fn check_shapes(x_train: &Array2<f64>, y_train: &Array1<f64>, x_test: &Array2<f64>) -> Result<()> {
    if x_train.nrows() != y_train.len() {
        return Err(KolosalError::ShapeError {
            expected: format!("{} targets", x_train.nrows()),
            actual: format!("{} targets", y_train.len()),
        });
    }
    if x_train.ncols() != x_test.ncols() {
        return Err(KolosalError::ShapeError {
            expected: format!("{} test features", x_train.ncols()),
            actual: format!("{} test features", x_test.ncols()),
        });
    }
    Ok(())
}

fn progress_bar(bag_rounds: usize, options: BagOptions) -> Result<ProgressBar> {
    if !options.progress {
        return Ok(ProgressBar::hidden());
    }
    let pb = ProgressBar::new(bag_rounds as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos:>4}/{len:4} {msg}")
            .map_err(|e| KolosalError::ConfigError(e.to_string()))?
            .progress_chars("#>-"),
    );
    Ok(pb)
}

/// Shared round loop; `fit_predict(round_seed, x, y)` returns the round's test predictions
fn bag_rounds_with<F>(
    x_train: &Array2<f64>,
    y_train: &Array1<f64>,
    seed: u64,
    bag_rounds: usize,
    n_test: usize,
    options: BagOptions,
    mut fit_predict: F,
) -> Result<Array1<f64>>
where
    F: FnMut(u64, &Array2<f64>, &Array1<f64>) -> Result<Array1<f64>>,
{
    check_rounds(bag_rounds)?;
    let pb = progress_bar(bag_rounds, options)?;

    let mut x = x_train.clone();
    let mut y = y_train.clone();
    let mut bagged = Array1::zeros(n_test);

    for n in 0..bag_rounds {
        let round_seed = seed.wrapping_add(n as u64);
        (x, y) = shuffle_rows(&x, &y, round_seed)?;

        let pred = fit_predict(round_seed, &x, &y)?;
        if pred.len() != n_test {
            return Err(KolosalError::ShapeError {
                expected: format!("{} test predictions", n_test),
                actual: format!("{} test predictions", pred.len()),
            });
        }
        bagged.scaled_add(1.0 / bag_rounds as f64, &pred);

        debug!(round = n, seed = round_seed, "bag round finished");
        pb.inc(1);
    }
    pb.finish_and_clear();

    Ok(bagged)
}

/// Bag any estimator over `bag_rounds` reshuffles of the training set.
///
/// With `update_seed` the model is reseeded with `seed + n` before round `n`.
/// Classification averages class-1 probabilities; regression averages
/// `predict`.
#[allow(clippy::too_many_arguments)]
pub fn bag_predict<E: Estimator + ?Sized>(
    x_train: &Array2<f64>,
    y_train: &Array1<f64>,
    model: &mut E,
    seed: u64,
    bag_rounds: usize,
    x_test: &Array2<f64>,
    update_seed: bool,
    task: BagTask,
) -> Result<Array1<f64>> {
    bag_predict_with(x_train, y_train, model, seed, bag_rounds, x_test, update_seed, task, BagOptions::default())
}

/// [`bag_predict`] with explicit presentation options
#[allow(clippy::too_many_arguments)]
pub fn bag_predict_with<E: Estimator + ?Sized>(
    x_train: &Array2<f64>,
    y_train: &Array1<f64>,
    model: &mut E,
    seed: u64,
    bag_rounds: usize,
    x_test: &Array2<f64>,
    update_seed: bool,
    task: BagTask,
    options: BagOptions,
) -> Result<Array1<f64>> {
    check_shapes(x_train, y_train, x_test)?;
    bag_rounds_with(x_train, y_train, seed, bag_rounds, x_test.nrows(), options, |round_seed, x, y| {
        if update_seed {
            model.set_random_state(round_seed);
        }
        model.fit(x, y)?;
        match task {
            BagTask::Classification => positive_class_probability(model, x_test),
            BagTask::Regression => model.predict(x_test),
        }
    })
}

/// Bag the leaf-wise booster. `params` is never modified; round `n` trains
/// with seed override `seed + n`.
pub fn bag_boosted(
    x_train: &Array2<f64>,
    y_train: &Array1<f64>,
    seed: u64,
    bag_rounds: usize,
    params: &LightGBMConfig,
    x_test: &Array2<f64>,
    num_boost_round: usize,
) -> Result<Array1<f64>> {
    bag_boosted_with(x_train, y_train, seed, bag_rounds, params, x_test, num_boost_round, BagOptions::default())
}

/// [`bag_boosted`] with explicit presentation options
#[allow(clippy::too_many_arguments)]
pub fn bag_boosted_with(
    x_train: &Array2<f64>,
    y_train: &Array1<f64>,
    seed: u64,
    bag_rounds: usize,
    params: &LightGBMConfig,
    x_test: &Array2<f64>,
    num_boost_round: usize,
    options: BagOptions,
) -> Result<Array1<f64>> {
    check_shapes(x_train, y_train, x_test)?;
    let boost_options = BoostOptions::new(num_boost_round);
    bag_rounds_with(x_train, y_train, seed, bag_rounds, x_test.nrows(), options, |round_seed, x, y| {
        let booster = lightgbm::train(params, x, y, None, &boost_options, Some(round_seed))?;
        booster.predict(x_test)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::linear_models::RidgeRegression;
    use ndarray::array;

    /// Predicts a constant and records the seeds it was given
    struct Recorder {
        value: f64,
        seeds: Vec<u64>,
        fits: usize,
    }

    impl Estimator for Recorder {
        fn fit(&mut self, _x: &Array2<f64>, _y: &Array1<f64>) -> Result<()> {
            self.fits += 1;
            Ok(())
        }

        fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
            Ok(Array1::from_elem(x.nrows(), self.value))
        }

        fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
            let mut p = Array2::zeros((x.nrows(), 2));
            p.column_mut(1).fill(self.value);
            p.column_mut(0).fill(1.0 - self.value);
            Ok(p)
        }

        fn set_random_state(&mut self, seed: u64) {
            self.seeds.push(seed);
        }
    }

    fn recorder(value: f64) -> Recorder {
        Recorder {
            value,
            seeds: Vec::new(),
            fits: 0,
        }
    }

    fn data() -> (Array2<f64>, Array1<f64>, Array2<f64>) {
        let x = Array2::from_shape_fn((12, 2), |(i, j)| (i * 2 + j) as f64);
        let y = Array1::from_shape_fn(12, |i| (i % 2) as f64);
        let x_test = Array2::from_shape_fn((4, 2), |(i, j)| (i + j) as f64);
        (x, y, x_test)
    }

    #[test]
    fn test_constant_model_reproduces_constant() {
        let (x, y, x_test) = data();
        let mut model = recorder(0.3);
        let pred = bag_predict(&x, &y, &mut model, 7, 5, &x_test, false, BagTask::Classification).unwrap();
        assert!(pred.iter().all(|&p| (p - 0.3).abs() < 1e-12));
        assert_eq!(model.fits, 5);
        assert!(model.seeds.is_empty());
    }

    #[test]
    fn test_update_seed_uses_seed_plus_round() {
        let (x, y, x_test) = data();
        let mut model = recorder(2.0);
        let pred = bag_predict(&x, &y, &mut model, 100, 3, &x_test, true, BagTask::Regression).unwrap();
        assert_eq!(model.seeds, vec![100, 101, 102]);
        assert!(pred.iter().all(|&p| (p - 2.0).abs() < 1e-12));
    }

    #[test]
    fn test_single_round_equals_one_fit_on_seeded_shuffle() {
        let (x, y, x_test) = data();
        let mut bagged_model = RidgeRegression::new(0.5);
        let bagged = bag_predict(&x, &y, &mut bagged_model, 3, 1, &x_test, false, BagTask::Regression).unwrap();

        let (xs, ys) = shuffle_rows(&x, &y, 3).unwrap();
        let mut direct = RidgeRegression::new(0.5);
        direct.fit(&xs, &ys).unwrap();
        let expected = direct.predict(&x_test).unwrap();

        for (a, b) in bagged.iter().zip(expected.iter()) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn test_zero_rounds_rejected() {
        let (x, y, x_test) = data();
        let mut model = recorder(1.0);
        let err = bag_predict(&x, &y, &mut model, 0, 0, &x_test, true, BagTask::Regression).unwrap_err();
        assert!(matches!(err, KolosalError::InvalidParameter { .. }));
        assert!(bag_boosted(&x, &y, 0, 0, &LightGBMConfig::default(), &x_test, 5).is_err());
    }

    #[test]
    fn test_multiclass_probabilities_rejected() {
        struct ThreeClass;
        impl Estimator for ThreeClass {
            fn fit(&mut self, _x: &Array2<f64>, _y: &Array1<f64>) -> Result<()> {
                Ok(())
            }
            fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
                Ok(Array1::zeros(x.nrows()))
            }
            fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
                Ok(Array2::from_elem((x.nrows(), 3), 1.0 / 3.0))
            }
        }
        let (x, y, x_test) = data();
        let err = bag_predict(&x, &y, &mut ThreeClass, 0, 2, &x_test, false, BagTask::Classification).unwrap_err();
        assert!(matches!(err, KolosalError::UnsupportedClassCount { n_classes: 3 }));
    }

    #[test]
    fn test_bag_boosted_leaves_params_untouched() {
        let x = Array2::from_shape_fn((60, 2), |(i, j)| ((i * 3 + j * 5) % 17) as f64);
        let y = x.column(0).to_owned();
        let x_test = array![[1.0, 2.0], [10.0, 3.0]];
        let params = LightGBMConfig {
            min_data_in_leaf: 5,
            bagging_fraction: 0.8,
            bagging_freq: 1,
            seed: 99,
            ..Default::default()
        };
        let snapshot = params.clone();
        let pred = bag_boosted_with(&x, &y, 1, 3, &params, &x_test, 20, BagOptions { progress: true }).unwrap();
        assert_eq!(pred.len(), 2);
        assert!(pred[1] > pred[0]);
        assert_eq!(params, snapshot);
    }

    #[test]
    fn test_shape_mismatch() {
        let (x, y, _) = data();
        let mut model = recorder(1.0);
        let bad_test = Array2::zeros((2, 5));
        assert!(bag_predict(&x, &y, &mut model, 0, 1, &bad_test, false, BagTask::Regression).is_err());
    }
}
