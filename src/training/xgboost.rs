//! XGBoost-style gradient boosting with second-order approximation
//!
//! Key properties:
//! - Uses both gradient and hessian of the loss
//! - Regularized leaf weights: w* = -T(G) / (H + lambda)
//! - Gain = 0.5 * [GL²/(HL+λ) + GR²/(HR+λ) - (GL+GR)²/(HL+HR+λ)], split kept when gain > γ
//! - Depth-wise exact greedy growth
//! - Row subsampling and per-tree column subsampling

use crate::error::{KolosalError, Result};
use crate::training::boosting::{
    self, check_fraction, check_positive, sample_indices, tree, BoostOptions, BoostSetup, Booster,
    EvalMetric, Objective, SplitParams,
};
use crate::training::models::{Estimator, Trainer};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

/// XGBoost configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct XGBoostConfig {
    pub objective: Objective,
    /// Monitored metric; defaults to the objective's metric
    pub eval_metric: Option<EvalMetric>,
    #[serde(alias = "eta")]
    pub learning_rate: f64,
    pub max_depth: usize,
    pub min_child_weight: f64,
    /// L2 regularization on leaf weights
    #[serde(alias = "lambda")]
    pub reg_lambda: f64,
    /// L1 regularization on leaf weights
    #[serde(alias = "alpha")]
    pub reg_alpha: f64,
    /// Minimum loss reduction to make a split
    pub gamma: f64,
    pub subsample: f64,
    pub colsample_bytree: f64,
    /// Initial raw score; mean target (or its log-odds) when unset
    pub base_score: Option<f64>,
    pub seed: u64,
}

impl Default for XGBoostConfig {
    fn default() -> Self {
        Self {
            objective: Objective::Regression,
            eval_metric: None,
            learning_rate: 0.3,
            max_depth: 6,
            min_child_weight: 1.0,
            reg_lambda: 1.0,
            reg_alpha: 0.0,
            gamma: 0.0,
            subsample: 1.0,
            colsample_bytree: 1.0,
            base_score: None,
            seed: 0,
        }
    }
}

impl XGBoostConfig {
    pub fn binary() -> Self {
        Self {
            objective: Objective::Binary,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        check_positive("learning_rate", self.learning_rate)?;
        check_fraction("subsample", self.subsample)?;
        check_fraction("colsample_bytree", self.colsample_bytree)?;
        if self.max_depth == 0 {
            return Err(KolosalError::InvalidParameter {
                name: "max_depth".into(),
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }
        if self.reg_lambda < 0.0 || self.reg_alpha < 0.0 || self.gamma < 0.0 || self.min_child_weight < 0.0 {
            return Err(KolosalError::InvalidParameter {
                name: "regularization".into(),
                value: format!(
                    "lambda={}, alpha={}, gamma={}, min_child_weight={}",
                    self.reg_lambda, self.reg_alpha, self.gamma, self.min_child_weight
                ),
                reason: "must be non-negative".into(),
            });
        }
        Ok(())
    }

    fn split_params(&self) -> SplitParams {
        SplitParams {
            reg_lambda: self.reg_lambda,
            reg_alpha: self.reg_alpha,
            min_child_weight: self.min_child_weight,
            min_samples_leaf: 1,
            min_split_gain: self.gamma,
        }
    }
}

/// Train a depth-wise booster, monitoring `valid` when given.
pub fn train(
    params: &XGBoostConfig,
    x: &Array2<f64>,
    y: &Array1<f64>,
    valid: Option<(&Array2<f64>, &Array1<f64>)>,
    options: &BoostOptions,
) -> Result<Booster> {
    params.validate()?;
    let split_params = params.split_params();
    let n_samples = x.nrows();
    let n_features = x.ncols();

    let setup = BoostSetup {
        flavour: "xgboost",
        objective: params.objective,
        metric: params.eval_metric,
        learning_rate: params.learning_rate,
        base_score: params.base_score,
        seed: params.seed,
        options,
    };

    boosting::boost(setup, x, y, valid, |x, ctx| {
        let rows = sample_indices(&mut *ctx.rng, n_samples, params.subsample);
        let cols = sample_indices(&mut *ctx.rng, n_features, params.colsample_bytree);
        tree::grow_depthwise(x, ctx.grad, ctx.hess, &rows, &cols, params.max_depth, &split_params)
    })
}

/// [`Trainer`] over [`train`], used by the stacking runs
#[derive(Debug, Clone, Default)]
pub struct XGBoostTrainer {
    pub params: XGBoostConfig,
    pub options: BoostOptions,
}

impl XGBoostTrainer {
    pub fn new(params: XGBoostConfig, options: BoostOptions) -> Self {
        Self { params, options }
    }
}

impl Trainer for XGBoostTrainer {
    type Model = Booster;

    fn train(
        &self,
        x: &Array2<f64>,
        y: &Array1<f64>,
        validation: Option<(&Array2<f64>, &Array1<f64>)>,
    ) -> Result<Booster> {
        train(&self.params, x, y, validation, &self.options)
    }

    fn predict(&self, model: &Booster, x: &Array2<f64>) -> Result<Array1<f64>> {
        model.predict(x)
    }
}

/// Fit/predict wrapper around the depth-wise booster
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct XGBoostModel {
    config: XGBoostConfig,
    num_boost_round: usize,
    booster: Option<Booster>,
}

impl XGBoostModel {
    pub fn new(config: XGBoostConfig, num_boost_round: usize) -> Self {
        Self {
            config,
            num_boost_round,
            booster: None,
        }
    }

    pub fn config(&self) -> &XGBoostConfig {
        &self.config
    }

    pub fn booster(&self) -> Option<&Booster> {
        self.booster.as_ref()
    }

    fn fitted(&self) -> Result<&Booster> {
        self.booster.as_ref().ok_or(KolosalError::ModelNotFitted)
    }
}

impl Estimator for XGBoostModel {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        let options = BoostOptions::new(self.num_boost_round);
        self.booster = Some(train(&self.config, x, y, None, &options)?);
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
        "xgboost"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::boosting::VerboseEval;

    fn regression_data() -> (Array2<f64>, Array1<f64>) {
        let x = Array2::from_shape_vec((50, 2), (0..100).map(|i| i as f64 * 0.1).collect()).unwrap();
        let y: Array1<f64> = x.rows().into_iter().map(|r| r[0] * 2.0 + r[1] * 0.5 + 1.0).collect();
        (x, y)
    }

    fn classification_data() -> (Array2<f64>, Array1<f64>) {
        let x = Array2::from_shape_vec((50, 2), (0..100).map(|i| i as f64 * 0.1).collect()).unwrap();
        let y: Array1<f64> = x
            .rows()
            .into_iter()
            .map(|r| if r[0] + r[1] > 5.0 { 1.0 } else { 0.0 })
            .collect();
        (x, y)
    }

    fn r2(pred: &Array1<f64>, y: &Array1<f64>) -> f64 {
        let ym = y.mean().unwrap();
        let ss_res = (pred - y).mapv(|v| v * v).sum();
        let ss_tot = y.mapv(|v| (v - ym).powi(2)).sum();
        1.0 - ss_res / ss_tot
    }

    #[test]
    fn test_regression_fits() {
        let (x, y) = regression_data();
        let params = XGBoostConfig {
            max_depth: 4,
            ..Default::default()
        };
        let booster = train(&params, &x, &y, None, &BoostOptions::new(50)).unwrap();
        let score = r2(&booster.predict(&x).unwrap(), &y);
        assert!(score > 0.9, "R² = {}", score);
        assert_eq!(booster.num_trees(), 50);
    }

    #[test]
    fn test_binary_probabilities() {
        let (x, y) = classification_data();
        let params = XGBoostConfig {
            max_depth: 3,
            ..XGBoostConfig::binary()
        };
        let booster = train(&params, &x, &y, None, &BoostOptions::new(30)).unwrap();
        let p = booster.predict(&x).unwrap();
        assert!(p.iter().all(|&v| (0.0..=1.0).contains(&v)));
        let correct = p
            .iter()
            .zip(y.iter())
            .filter(|(&p, &t)| (p > 0.5) == (t > 0.5))
            .count();
        assert!(correct as f64 / 50.0 >= 0.8);
    }

    #[test]
    fn test_early_stopping_bounds_best_iteration() {
        let (x, y) = regression_data();
        let options = BoostOptions::new(200)
            .with_early_stopping(5)
            .with_verbose_eval(VerboseEval::Every(50));
        let booster = train(&XGBoostConfig::default(), &x, &y, Some((&x, &y)), &options).unwrap();
        let best = booster.best_iteration().unwrap();
        assert!(best < booster.num_trees());
        assert!(booster.num_trees() <= 200);
    }

    #[test]
    fn test_seeded_subsampling_is_reproducible() {
        let (x, y) = regression_data();
        let params = XGBoostConfig {
            subsample: 0.7,
            colsample_bytree: 0.5,
            seed: 11,
            ..Default::default()
        };
        let a = train(&params, &x, &y, None, &BoostOptions::new(10)).unwrap();
        let b = train(&params, &x, &y, None, &BoostOptions::new(10)).unwrap();
        assert_eq!(a.predict(&x).unwrap(), b.predict(&x).unwrap());
    }

    #[test]
    fn test_invalid_params_rejected() {
        let (x, y) = regression_data();
        let params = XGBoostConfig {
            subsample: 0.0,
            ..Default::default()
        };
        assert!(matches!(
            train(&params, &x, &y, None, &BoostOptions::new(1)),
            Err(KolosalError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_config_aliases() {
        let params: XGBoostConfig =
            serde_json::from_str(r#"{"eta": 0.1, "lambda": 2.0, "objective": "binary:logistic"}"#).unwrap();
        assert_eq!(params.learning_rate, 0.1);
        assert_eq!(params.reg_lambda, 2.0);
        assert_eq!(params.objective, Objective::Binary);
        assert_eq!(params.max_depth, 6);
    }

    #[test]
    fn test_model_adapter() {
        let (x, y) = classification_data();
        let mut model = XGBoostModel::new(XGBoostConfig::binary(), 10);
        assert!(matches!(model.predict(&x), Err(KolosalError::ModelNotFitted)));
        model.set_random_state(3);
        assert_eq!(model.config().seed, 3);
        model.fit(&x, &y).unwrap();
        let proba = model.predict_proba(&x).unwrap();
        assert_eq!(proba.dim(), (50, 2));
        assert!((proba[[0, 0]] + proba[[0, 1]] - 1.0).abs() < 1e-12);
    }
}
