//! Trainer interfaces shared by the stacking and bagging routines

use crate::error::{KolosalError, Result};
use ndarray::{Array1, Array2};

/// A mutable model instance with scikit-style fit/predict methods.
///
/// Used by `run_other_stackers` and `bag_predict`, which refit the same
/// instance repeatedly.
pub trait Estimator {
    /// Fit the model to training data, replacing any previous fit
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()>;

    /// Make predictions
    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>>;

    /// Class probabilities, one column per class.
    ///
    /// Binary models report `[P(0), P(1)]` even when a fit saw a single class.
    fn predict_proba(&self, _x: &Array2<f64>) -> Result<Array2<f64>> {
        Err(KolosalError::InvalidInput(format!(
            "{} does not provide class probabilities",
            self.name()
        )))
    }

    /// Reseed the model's internal randomness. Deterministic models ignore it.
    fn set_random_state(&mut self, _seed: u64) {}

    /// Short human-readable name used in log lines
    fn name(&self) -> &str {
        "estimator"
    }
}

impl<E: Estimator + ?Sized> Estimator for Box<E> {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        (**self).fit(x, y)
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        (**self).predict(x)
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        (**self).predict_proba(x)
    }

    fn set_random_state(&mut self, seed: u64) {
        (**self).set_random_state(seed)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// A stateless trainer that produces a fresh model per call.
///
/// The stacking component calls `train` once per fold, so no state leaks
/// between folds.
pub trait Trainer {
    type Model;

    /// Train on `(x, y)`, optionally monitoring a validation set.
    fn train(
        &self,
        x: &Array2<f64>,
        y: &Array1<f64>,
        validation: Option<(&Array2<f64>, &Array1<f64>)>,
    ) -> Result<Self::Model>;

    /// Predict with a model produced by `train`
    fn predict(&self, model: &Self::Model, x: &Array2<f64>) -> Result<Array1<f64>>;
}

/// Select the positive-class probability from a probability matrix.
///
/// A single column is taken as-is and must already hold P(class 1). Two
/// columns are `[P(0), P(1)]` and yield column 1. Anything wider is a
/// multi-class output and is rejected.
pub fn positive_class_column(proba: &Array2<f64>) -> Result<Array1<f64>> {
    match proba.ncols() {
        1 => Ok(proba.column(0).to_owned()),
        2 => Ok(proba.column(1).to_owned()),
        n_classes => Err(KolosalError::UnsupportedClassCount { n_classes }),
    }
}

/// Positive-class probabilities of `x` under `model`
pub fn positive_class_probability<E: Estimator + ?Sized>(model: &E, x: &Array2<f64>) -> Result<Array1<f64>> {
    let proba = model.predict_proba(x)?;
    if proba.nrows() != x.nrows() {
        return Err(KolosalError::ShapeError {
            expected: format!("{} probability rows", x.nrows()),
            actual: format!("{} probability rows", proba.nrows()),
        });
    }
    positive_class_column(&proba)
}
