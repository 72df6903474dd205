//! Stacked generalization over a fixed fold plan
//!
//! Every run trains one model per fold, writes its validation predictions
//! into the out-of-fold column `S_train` and averages its test predictions
//! over folds into `S_test`. The runs differ only in how a fold is trained.

use std::path::PathBuf;

use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{KolosalError, Result};
use crate::training::boosting::BoostOptions;
use crate::training::callbacks::{checkpoint_callbacks, Callback};
use crate::training::cross_validation::FoldPlan;
use crate::training::lightgbm::{LightGBMConfig, LightGBMTrainer};
use crate::training::{positive_class_probability, Estimator, Trainer};
use crate::training::neural_network::{fit_network, FitOptions, Network};
use crate::training::xgboost::{XGBoostConfig, XGBoostTrainer};
use crate::utils::{take_elems, take_rows, TickTock};

/// Out-of-fold training predictions and fold-averaged test predictions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackedPredictions {
    pub s_train: Array1<f64>,
    pub s_test: Array1<f64>,
}

/// Rows of one fold, gathered from the full matrices
pub struct FoldData<'a> {
    pub x_train: Array2<f64>,
    pub y_train: Array1<f64>,
    pub x_valid: Array2<f64>,
    pub y_valid: Array1<f64>,
    pub x_test: &'a Array2<f64>,
}

/// Settings of the neural network stacking run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NnStackOptions {
    pub epochs: usize,
    pub batch_size: usize,
    /// Prefix of the checkpoint path, used verbatim (include a trailing separator for a directory)
    pub saved_path: String,
    pub saved_file_name: String,
    /// Epochs without validation improvement before a fold stops
    pub patience: usize,
    /// 0 silent, 1 per-epoch summary, 2 adds per-epoch detail
    pub verbose_nn: u8,
    /// Seed for the per-epoch row shuffling
    pub seed: u64,
}

impl Default for NnStackOptions {
    fn default() -> Self {
        Self {
            epochs: 20,
            batch_size: 32,
            saved_path: String::new(),
            saved_file_name: "nn_stacker".to_string(),
            patience: 5,
            verbose_nn: 0,
            seed: 42,
        }
    }
}

impl NnStackOptions {
    /// Checkpoint file of fold `fold_idx`: `<saved_path><saved_file_name>_v<fold_idx>`
    pub fn checkpoint_path(&self, fold_idx: usize) -> PathBuf {
        PathBuf::from(format!("{}{}_v{}", self.saved_path, self.saved_file_name, fold_idx))
    }
}

/// k-fold stacking over fixed training and test matrices
#[derive(Debug, Clone)]
pub struct StackingGeneralizer {
    x_train: Array2<f64>,
    x_test: Array2<f64>,
    y: Array1<f64>,
    folds: FoldPlan,
    verbose: bool,
}

impl StackingGeneralizer {
    pub fn new(x_train: Array2<f64>, x_test: Array2<f64>, y: Array1<f64>, folds: FoldPlan, verbose: bool) -> Result<Self> {
        if x_train.nrows() != y.len() {
            return Err(KolosalError::ShapeError {
                expected: format!("{} targets", x_train.nrows()),
                actual: format!("{} targets", y.len()),
            });
        }
        if x_train.ncols() != x_test.ncols() {
            return Err(KolosalError::ShapeError {
                expected: format!("{} test features", x_train.ncols()),
                actual: format!("{} test features", x_test.ncols()),
            });
        }
        if folds.is_empty() {
            return Err(KolosalError::InvalidParameter {
                name: "folds".into(),
                value: "0".into(),
                reason: "fold plan must contain at least one fold".into(),
            });
        }
        Ok(Self {
            x_train,
            x_test,
            y,
            folds,
            verbose,
        })
    }

    pub fn n_train(&self) -> usize {
        self.x_train.nrows()
    }

    pub fn n_test(&self) -> usize {
        self.x_test.nrows()
    }

    pub fn folds(&self) -> &FoldPlan {
        &self.folds
    }

    /// Run the fold loop with `train_fold` producing `(validation, test)`
    /// predictions for each fold.
    pub fn stack_folds<F>(&self, family: &str, mut train_fold: F) -> Result<StackedPredictions>
    where
        F: FnMut(usize, FoldData<'_>) -> Result<(Array1<f64>, Array1<f64>)>,
    {
        let n_folds = self.folds.n_folds();
        let mut s_train = Array1::zeros(self.n_train());
        let mut s_test_i = Array2::zeros((self.n_test(), n_folds));

        let _timer = TickTock::start("stacking", self.verbose);

        for (i, split) in self.folds.iter().enumerate() {
            if self.verbose {
                info!("{} is stacking fold {} ....", family, i + 1);
            }

            let fold = FoldData {
                x_train: take_rows(self.x_train.view(), &split.train_indices)?,
                y_train: take_elems(self.y.view(), &split.train_indices)?,
                x_valid: take_rows(self.x_train.view(), &split.test_indices)?,
                y_valid: take_elems(self.y.view(), &split.test_indices)?,
                x_test: &self.x_test,
            };

            let (valid_pred, test_pred) = train_fold(i, fold)?;
            check_len("validation", split.test_indices.len(), valid_pred.len())?;
            check_len("test", self.n_test(), test_pred.len())?;

            for (&row, &p) in split.test_indices.iter().zip(valid_pred.iter()) {
                s_train[row] = p;
            }
            s_test_i.column_mut(i).assign(&test_pred);
        }

        let s_test = s_test_i.sum_axis(Axis(1)) / n_folds as f64;
        Ok(StackedPredictions { s_train, s_test })
    }

    /// Stack any [`Trainer`]: a fresh model per fold, monitored on the fold's
    /// validation rows.
    pub fn run_stacker<T: Trainer>(&self, family: &str, trainer: &T) -> Result<StackedPredictions> {
        self.stack_folds(family, |_, fold| {
            let model = trainer.train(&fold.x_train, &fold.y_train, Some((&fold.x_valid, &fold.y_valid)))?;
            Ok((trainer.predict(&model, &fold.x_valid)?, trainer.predict(&model, fold.x_test)?))
        })
    }

    /// Stack the leaf-wise booster. Predictions use each fold's best iteration
    /// when early stopping recorded one.
    pub fn run_lgbm_stacker(&self, params: &LightGBMConfig, options: &BoostOptions) -> Result<StackedPredictions> {
        let trainer = LightGBMTrainer::new(params.clone(), options.clone());
        self.run_stacker("lightgbm", &trainer)
    }

    /// Stack the depth-wise booster. Predictions use each fold's best iteration
    /// when early stopping recorded one.
    pub fn run_xgboost_stacker(&self, params: &XGBoostConfig, options: &BoostOptions) -> Result<StackedPredictions> {
        let trainer = XGBoostTrainer::new(params.clone(), options.clone());
        self.run_stacker("xgboost", &trainer)
    }

    /// Stack a neural network built fresh for each fold by `factory`.
    ///
    /// Each fold checkpoints its best validation-loss epoch to
    /// [`NnStackOptions::checkpoint_path`] and predicts with that state.
    pub fn run_nn_stacker<N, F>(&self, mut factory: F, options: &NnStackOptions) -> Result<StackedPredictions>
    where
        N: Network,
        F: FnMut() -> N,
    {
        let fit_options = FitOptions {
            epochs: options.epochs,
            batch_size: options.batch_size,
            shuffle: true,
            seed: options.seed,
            verbose: options.verbose_nn,
        };

        self.stack_folds("neural network", |i, fold| {
            let mut model = factory();
            let (mut checkpoint, mut early_stopping) = checkpoint_callbacks(options.checkpoint_path(i), options.patience);
            {
                let mut callbacks: [&mut dyn Callback; 2] = [&mut checkpoint, &mut early_stopping];
                fit_network(
                    &mut model,
                    &fold.x_train,
                    &fold.y_train,
                    Some((&fold.x_valid, &fold.y_valid)),
                    &fit_options,
                    &mut callbacks,
                )?;
            }
            checkpoint.restore_best(&mut model)?;
            Ok((model.predict(&fold.x_valid)?, model.predict(fold.x_test)?))
        })
    }

    /// Stack every estimator in `models`, one output column per model.
    ///
    /// Each model is refitted on every fold; its columns hold class-1
    /// probabilities of the validation rows and the fold mean of the test
    /// class-1 probabilities.
    pub fn run_other_stackers<E: Estimator>(&self, models: &mut [E]) -> Result<(Array2<f64>, Array2<f64>)> {
        let mut s_train = Array2::zeros((self.n_train(), models.len()));
        let mut s_test = Array2::zeros((self.n_test(), models.len()));

        let _timer = TickTock::start("fitting stacking", self.verbose);
        if self.verbose {
            info!(n_models = models.len(), "fitting base models");
        }

        for (j, model) in models.iter_mut().enumerate() {
            if self.verbose {
                info!(model = model.name(), "fitting base model {}", j);
            }
            let family = model.name().to_string();
            let stacked = self.stack_folds(&family, |_, fold| {
                model.fit(&fold.x_train, &fold.y_train)?;
                Ok((
                    positive_class_probability(&*model, &fold.x_valid)?,
                    positive_class_probability(&*model, fold.x_test)?,
                ))
            })?;
            s_train.column_mut(j).assign(&stacked.s_train);
            s_test.column_mut(j).assign(&stacked.s_test);
        }

        Ok((s_train, s_test))
    }
}

fn check_len(what: &str, expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(KolosalError::ShapeError {
            expected: format!("{} {} predictions", expected, what),
            actual: format!("{} {} predictions", actual, what),
        });
    }
    Ok(())
}
