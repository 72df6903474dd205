//! LightGBM-style gradient boosting with leaf-wise tree growth
//!
//! Differences from the depth-wise booster:
//! - Leaf-wise (best-first) growth bounded by `num_leaves`
//! - Row bagging refreshed every `bagging_freq` rounds
//! - Optional Gradient-based One-Side Sampling (GOSS): keeps the largest
//!   gradients, samples the rest and re-weights them

use crate::error::{KolosalError, Result};
use crate::training::boosting::{
    self, check_fraction, check_positive, sample_indices, tree, BoostOptions, BoostSetup, Booster,
    EvalMetric, Objective, SplitParams,
};
use crate::training::models::{Estimator, Trainer};
use ndarray::{Array1, Array2};
use rand::seq::SliceRandom;
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};

/// Row sampling strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoostingType {
    /// Plain gradient boosting, optionally with row bagging
    #[default]
    Gbdt,
    /// Gradient-based One-Side Sampling
    Goss,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LightGBMConfig {
    pub objective: Objective,
    #[serde(alias = "metric")]
    pub eval_metric: Option<EvalMetric>,
    #[serde(alias = "boosting_type")]
    pub boosting: BoostingType,
    pub learning_rate: f64,
    pub num_leaves: usize,
    /// Depth limit; `None` leaves depth unbounded
    pub max_depth: Option<usize>,
    #[serde(alias = "min_child_samples")]
    pub min_data_in_leaf: usize,
    #[serde(alias = "min_child_weight")]
    pub min_sum_hessian_in_leaf: f64,
    #[serde(alias = "reg_alpha")]
    pub lambda_l1: f64,
    #[serde(alias = "reg_lambda")]
    pub lambda_l2: f64,
    #[serde(alias = "min_split_gain")]
    pub min_gain_to_split: f64,
    /// Share of features considered by each tree
    #[serde(alias = "colsample_bytree")]
    pub feature_fraction: f64,
    /// Share of rows used while bagging is active
    #[serde(alias = "subsample")]
    pub bagging_fraction: f64,
    /// Re-draw the bag every `bagging_freq` rounds; 0 disables bagging
    #[serde(alias = "subsample_freq")]
    pub bagging_freq: usize,
    /// GOSS: share of rows with the largest gradients always kept
    pub top_rate: f64,
    /// GOSS: share of rows sampled from the remainder
    pub other_rate: f64,
    #[serde(alias = "random_state")]
    pub seed: u64,
}

impl Default for LightGBMConfig {
    fn default() -> Self {
        Self {
            objective: Objective::Regression,
            eval_metric: None,
            boosting: BoostingType::Gbdt,
            learning_rate: 0.1,
            num_leaves: 31,
            max_depth: None,
            min_data_in_leaf: 20,
            min_sum_hessian_in_leaf: 1e-3,
            lambda_l1: 0.0,
            lambda_l2: 0.0,
            min_gain_to_split: 0.0,
            feature_fraction: 1.0,
            bagging_fraction: 1.0,
            bagging_freq: 0,
            top_rate: 0.2,
            other_rate: 0.1,
            seed: 0,
        }
    }
}

impl LightGBMConfig {
    pub fn binary() -> Self {
        Self {
            objective: Objective::Binary,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        check_positive("learning_rate", self.learning_rate)?;
        check_fraction("feature_fraction", self.feature_fraction)?;
        check_fraction("bagging_fraction", self.bagging_fraction)?;
        if self.num_leaves < 2 {
            return Err(KolosalError::InvalidParameter {
                name: "num_leaves".into(),
                value: self.num_leaves.to_string(),
                reason: "must be at least 2".into(),
            });
        }
        if self.boosting == BoostingType::Goss {
            check_fraction("top_rate", self.top_rate)?;
            check_fraction("other_rate", self.other_rate)?;
            if self.top_rate + self.other_rate > 1.0 {
                return Err(KolosalError::InvalidParameter {
                    name: "top_rate + other_rate".into(),
                    value: (self.top_rate + self.other_rate).to_string(),
                    reason: "must not exceed 1".into(),
                });
            }
        }
        if self.lambda_l1 < 0.0 || self.lambda_l2 < 0.0 || self.min_sum_hessian_in_leaf < 0.0 {
            return Err(KolosalError::InvalidParameter {
                name: "regularization".into(),
                value: format!(
                    "lambda_l1={}, lambda_l2={}, min_sum_hessian_in_leaf={}",
                    self.lambda_l1, self.lambda_l2, self.min_sum_hessian_in_leaf
                ),
                reason: "must be non-negative".into(),
            });
        }
        Ok(())
    }

    fn split_params(&self) -> SplitParams {
        SplitParams {
            reg_lambda: self.lambda_l2,
            reg_alpha: self.lambda_l1,
            min_child_weight: self.min_sum_hessian_in_leaf,
            min_samples_leaf: self.min_data_in_leaf.max(1),
            min_split_gain: self.min_gain_to_split,
        }
    }

    fn bagging_enabled(&self) -> bool {
        self.bagging_freq > 0 && self.bagging_fraction < 1.0
    }
}

/// GOSS row selection.
///
/// Returns the selected rows (sorted) and the weight applied to the
/// gradients of the sampled small-gradient rows.
fn goss_sample(rng: &mut Xoshiro256PlusPlus, grad: &[f64], top_rate: f64, other_rate: f64) -> (Vec<usize>, Vec<usize>, f64) {
    let n = grad.len();
    let n_top = ((n as f64 * top_rate).ceil() as usize).min(n);
    let n_other = ((n as f64 * other_rate).ceil() as usize).min(n - n_top);

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| grad[b].abs().total_cmp(&grad[a].abs()).then_with(|| a.cmp(&b)));

    let top = order[..n_top].to_vec();
    let mut rest = order[n_top..].to_vec();
    rest.shuffle(rng);
    rest.truncate(n_other);

    let amplify = if other_rate > 0.0 { (1.0 - top_rate) / other_rate } else { 1.0 };
    (top, rest, amplify)
}

/// Train a leaf-wise booster, monitoring `valid` when given.
///
/// `seed_override` replaces `params.seed` for this call without touching
/// `params`, so a shared configuration can be reused across repetitions.
pub fn train(
    params: &LightGBMConfig,
    x: &Array2<f64>,
    y: &Array1<f64>,
    valid: Option<(&Array2<f64>, &Array1<f64>)>,
    options: &BoostOptions,
    seed_override: Option<u64>,
) -> Result<Booster> {
    params.validate()?;
    let split_params = params.split_params();
    let n_samples = x.nrows();
    let n_features = x.ncols();

    let setup = BoostSetup {
        flavour: "lightgbm",
        objective: params.objective,
        metric: params.eval_metric,
        learning_rate: params.learning_rate,
        base_score: None,
        seed: seed_override.unwrap_or(params.seed),
        options,
    };

    let mut bag: Vec<usize> = (0..n_samples).collect();

    boosting::boost(setup, x, y, valid, |x, ctx| {
        let cols = sample_indices(&mut *ctx.rng, n_features, params.feature_fraction);

        match params.boosting {
            BoostingType::Goss => {
                let (mut rows, sampled, amplify) = goss_sample(&mut *ctx.rng, ctx.grad, params.top_rate, params.other_rate);
                let mut grad = ctx.grad.to_vec();
                let mut hess = ctx.hess.to_vec();
                for &i in &sampled {
                    grad[i] *= amplify;
                    hess[i] *= amplify;
                }
                rows.extend(sampled);
                rows.sort_unstable();
                tree::grow_leafwise(x, &grad, &hess, &rows, &cols, params.num_leaves, params.max_depth, &split_params)
            }
            BoostingType::Gbdt => {
                if params.bagging_enabled() && ctx.round % params.bagging_freq == 0 {
                    bag = sample_indices(&mut *ctx.rng, n_samples, params.bagging_fraction);
                }
                tree::grow_leafwise(x, ctx.grad, ctx.hess, &bag, &cols, params.num_leaves, params.max_depth, &split_params)
            }
        }
    })
}

/// [`Trainer`] over [`train`], used by the stacking runs
#[derive(Debug, Clone, Default)]
pub struct LightGBMTrainer {
    pub params: LightGBMConfig,
    pub options: BoostOptions,
}

impl LightGBMTrainer {
    pub fn new(params: LightGBMConfig, options: BoostOptions) -> Self {
        Self { params, options }
    }
}

impl Trainer for LightGBMTrainer {
    type Model = Booster;

    fn train(
        &self,
        x: &Array2<f64>,
        y: &Array1<f64>,
        validation: Option<(&Array2<f64>, &Array1<f64>)>,
    ) -> Result<Booster> {
        train(&self.params, x, y, validation, &self.options, None)
    }

    fn predict(&self, model: &Booster, x: &Array2<f64>) -> Result<Array1<f64>> {
        model.predict(x)
    }
}

/// Fit/predict wrapper around the leaf-wise booster
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LightGBMModel {
    config: LightGBMConfig,
    num_boost_round: usize,
    booster: Option<Booster>,
}

impl LightGBMModel {
    pub fn new(config: LightGBMConfig, num_boost_round: usize) -> Self {
        Self {
            config,
            num_boost_round,
            booster: None,
        }
    }

    pub fn config(&self) -> &LightGBMConfig {
        &self.config
    }

    pub fn booster(&self) -> Option<&Booster> {
        self.booster.as_ref()
    }

    fn fitted(&self) -> Result<&Booster> {
        self.booster.as_ref().ok_or(KolosalError::ModelNotFitted)
    }
}

impl Estimator for LightGBMModel {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        let options = BoostOptions::new(self.num_boost_round);
        self.booster = Some(train(&self.config, x, y, None, &options, None)?);
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        self.fitted()?.predict(x)
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        self.fitted()?.predict_proba(x)
    }

    fn set_random_state(&mut self, seed: u64) {
        self.config.seed = seed;
    }

    fn name(&self) -> &str {
        "lightgbm"
    }
}
