//! Shared gradient boosting machinery
//!
//! The XGBoost-style and LightGBM-style flavours differ only in how a tree
//! is grown each round and which rows and features it sees. Everything
//! else lives here:
//! - objectives (gradients, hessians, base score, output transform)
//! - the boosting loop with validation monitoring and early stopping
//! - the fitted [`Booster`] and its best-iteration aware prediction

mod early_stopping;
mod metric;
pub mod tree;

pub use early_stopping::EarlyStopping;
pub use metric::{roc_auc, EvalMetric};
pub use tree::{SplitParams, TreeNode};

use crate::error::{KolosalError, Result};
use ndarray::{Array1, Array2};
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Learning objective
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Objective {
    /// Squared error
    #[default]
    #[serde(alias = "reg:squarederror", alias = "reg:linear", alias = "regression_l2")]
    Regression,
    /// Logistic loss on {0, 1} labels; predictions are probabilities
    #[serde(alias = "binary:logistic")]
    Binary,
}

impl Objective {
    pub fn default_metric(self) -> EvalMetric {
        match self {
            Objective::Regression => EvalMetric::Rmse,
            Objective::Binary => EvalMetric::LogLoss,
        }
    }

    fn check_labels(self, y: &Array1<f64>) -> Result<()> {
        if self == Objective::Binary && y.iter().any(|&v| v != 0.0 && v != 1.0) {
            return Err(KolosalError::InvalidInput(
                "binary objective requires labels in {0, 1}".to_string(),
            ));
        }
        Ok(())
    }

    /// Initial raw score
    fn base_score(self, y: &Array1<f64>) -> f64 {
        match self {
            Objective::Regression => y.mean().unwrap_or(0.0),
            Objective::Binary => {
                let p = y.mean().unwrap_or(0.5).clamp(1e-7, 1.0 - 1e-7);
                (p / (1.0 - p)).ln()
            }
        }
    }

    /// Map raw scores to the output scale
    pub fn transform(self, raw: f64) -> f64 {
        match self {
            Objective::Regression => raw,
            Objective::Binary => sigmoid(raw),
        }
    }

    fn gradients(self, raw: &[f64], y: &Array1<f64>, grad: &mut [f64], hess: &mut [f64]) {
        for (i, (&r, &t)) in raw.iter().zip(y.iter()).enumerate() {
            match self {
                Objective::Regression => {
                    grad[i] = r - t;
                    hess[i] = 1.0;
                }
                Objective::Binary => {
                    let p = sigmoid(r);
                    grad[i] = p - t;
                    hess[i] = (p * (1.0 - p)).max(1e-16);
                }
            }
        }
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// How often evaluation results are logged during training
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerboseEval {
    #[default]
    Off,
    /// Log every `n` rounds (and the last one)
    Every(usize),
}

impl VerboseEval {
    fn should_log(self, round: usize, last: bool) -> bool {
        match self {
            VerboseEval::Off => false,
            VerboseEval::Every(n) => last || round % n.max(1) == 0,
        }
    }
}

/// Round count, early stopping and logging controls for one training call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoostOptions {
    /// Maximum number of boosting rounds
    pub num_boost_round: usize,
    /// Stop after this many rounds without validation improvement.
    /// Needs a validation set; `None` disables early stopping.
    pub early_stopping_rounds: Option<usize>,
    pub verbose_eval: VerboseEval,
}

impl Default for BoostOptions {
    fn default() -> Self {
        Self {
            num_boost_round: 100,
            early_stopping_rounds: None,
            verbose_eval: VerboseEval::Off,
        }
    }
}

impl BoostOptions {
    pub fn new(num_boost_round: usize) -> Self {
        Self {
            num_boost_round,
            ..Default::default()
        }
    }

    pub fn with_early_stopping(mut self, rounds: usize) -> Self {
        self.early_stopping_rounds = Some(rounds);
        self
    }

    pub fn with_verbose_eval(mut self, verbose_eval: VerboseEval) -> Self {
        self.verbose_eval = verbose_eval;
        self
    }
}

/// Metric values recorded after one round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalRecord {
    pub round: usize,
    pub train: f64,
    pub valid: Option<f64>,
}

/// A fitted gradient boosted tree ensemble
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booster {
    objective: Objective,
    metric: EvalMetric,
    base_score: f64,
    learning_rate: f64,
    n_features: usize,
    trees: Vec<TreeNode>,
    best_iteration: Option<usize>,
    best_score: Option<f64>,
    history: Vec<EvalRecord>,
}

impl Booster {
    pub fn objective(&self) -> Objective {
        self.objective
    }

    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn trees(&self) -> &[TreeNode] {
        &self.trees
    }

    /// Zero-based best round, set when early stopping was active
    pub fn best_iteration(&self) -> Option<usize> {
        self.best_iteration
    }

    pub fn best_score(&self) -> Option<f64> {
        self.best_score
    }

    pub fn eval_history(&self) -> &[EvalRecord] {
        &self.history
    }

    /// Number of trees used for prediction
    pub fn effective_trees(&self) -> usize {
        match self.best_iteration {
            Some(best) => (best + 1).min(self.trees.len()),
            None => self.trees.len(),
        }
    }

    /// Raw scores (log-odds for binary objectives)
    pub fn predict_raw(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        self.predict_raw_with(x, self.effective_trees())
    }

    /// Raw scores using only the first `n_trees` trees
    pub fn predict_raw_with(&self, x: &Array2<f64>, n_trees: usize) -> Result<Array1<f64>> {
        if x.ncols() != self.n_features {
            return Err(KolosalError::ShapeError {
                expected: format!("{} features", self.n_features),
                actual: format!("{} features", x.ncols()),
            });
        }
        let trees = &self.trees[..n_trees.min(self.trees.len())];
        Ok(x
            .rows()
            .into_iter()
            .map(|row| self.base_score + self.learning_rate * trees.iter().map(|t| t.predict(row)).sum::<f64>())
            .collect())
    }

    /// Predictions on the output scale, using the best iteration when known
    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let objective = self.objective;
        Ok(self.predict_raw(x)?.mapv(|r| objective.transform(r)))
    }

    /// Two-column class probabilities for binary objectives
    pub fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        if self.objective != Objective::Binary {
            return Err(KolosalError::InvalidInput(
                "predict_proba requires a binary objective".to_string(),
            ));
        }
        let p = self.predict(x)?;
        let mut proba = Array2::zeros((p.len(), 2));
        for (i, &pi) in p.iter().enumerate() {
            proba[[i, 0]] = 1.0 - pi;
            proba[[i, 1]] = pi;
        }
        Ok(proba)
    }

    /// Split-count importances normalized to sum to one
    pub fn feature_importances(&self) -> Array1<f64> {
        let mut counts = vec![0.0; self.n_features];
        for tree in &self.trees[..self.effective_trees()] {
            tree.count_splits(&mut counts);
        }
        let total: f64 = counts.iter().sum();
        if total > 0.0 {
            counts.iter_mut().for_each(|c| *c /= total);
        }
        Array1::from_vec(counts)
    }
}

/// Everything the boosting loop needs besides the tree grower
pub(crate) struct BoostSetup<'a> {
    pub flavour: &'static str,
    pub objective: Objective,
    pub metric: Option<EvalMetric>,
    pub learning_rate: f64,
    pub base_score: Option<f64>,
    pub seed: u64,
    pub options: &'a BoostOptions,
}

/// Per-round inputs handed to the tree grower
pub(crate) struct RoundContext<'a> {
    pub round: usize,
    pub grad: &'a [f64],
    pub hess: &'a [f64],
    pub rng: &'a mut Xoshiro256PlusPlus,
}

/// Run the boosting loop, growing one tree per round with `grow`.
pub(crate) fn boost<G>(
    setup: BoostSetup<'_>,
    x: &Array2<f64>,
    y: &Array1<f64>,
    valid: Option<(&Array2<f64>, &Array1<f64>)>,
    mut grow: G,
) -> Result<Booster>
where
    G: FnMut(&Array2<f64>, RoundContext<'_>) -> TreeNode,
{
    let n_samples = x.nrows();
    if n_samples == 0 {
        return Err(KolosalError::TrainingError("Empty dataset".into()));
    }
    if y.len() != n_samples {
        return Err(KolosalError::ShapeError {
            expected: format!("{} targets", n_samples),
            actual: format!("{} targets", y.len()),
        });
    }
    setup.objective.check_labels(y)?;
    if let Some((xv, yv)) = valid {
        if xv.ncols() != x.ncols() || xv.nrows() != yv.len() {
            return Err(KolosalError::ShapeError {
                expected: format!("validation set with {} features and matching targets", x.ncols()),
                actual: format!("{} features, {} rows, {} targets", xv.ncols(), xv.nrows(), yv.len()),
            });
        }
    }

    let objective = setup.objective;
    let metric = setup.metric.unwrap_or_else(|| objective.default_metric());
    let options = setup.options;
    let base_score = setup.base_score.unwrap_or_else(|| objective.base_score(y));
    let y_slice = y.to_vec();
    let y_valid: Option<Vec<f64>> = valid.map(|(_, yv)| yv.to_vec());

    let mut rng = Xoshiro256PlusPlus::seed_from_u64(setup.seed);
    let mut raw_train = vec![base_score; n_samples];
    let mut raw_valid: Option<Vec<f64>> = valid.map(|(xv, _)| vec![base_score; xv.nrows()]);
    let mut grad = vec![0.0; n_samples];
    let mut hess = vec![0.0; n_samples];

    let mut stopper = match (options.early_stopping_rounds, valid) {
        (Some(patience), Some(_)) => Some(EarlyStopping::new(patience, metric.higher_is_better())),
        _ => None,
    };

    let mut trees = Vec::with_capacity(options.num_boost_round);
    let mut history = Vec::with_capacity(options.num_boost_round);

    for round in 0..options.num_boost_round {
        objective.gradients(&raw_train, y, &mut grad, &mut hess);

        let tree = grow(
            x,
            RoundContext {
                round,
                grad: &grad,
                hess: &hess,
                rng: &mut rng,
            },
        );

        for (i, row) in x.rows().into_iter().enumerate() {
            raw_train[i] += setup.learning_rate * tree.predict(row);
        }
        let train_pred: Vec<f64> = raw_train.iter().map(|&r| objective.transform(r)).collect();
        let train_score = metric.evaluate(&y_slice, &train_pred);

        let valid_score = match (valid, raw_valid.as_mut(), y_valid.as_deref()) {
            (Some((xv, _)), Some(raw), Some(yv)) => {
                for (i, row) in xv.rows().into_iter().enumerate() {
                    raw[i] += setup.learning_rate * tree.predict(row);
                }
                let pred: Vec<f64> = raw.iter().map(|&r| objective.transform(r)).collect();
                Some(metric.evaluate(yv, &pred))
            }
            _ => None,
        };

        trees.push(tree);
        history.push(EvalRecord {
            round,
            train: train_score,
            valid: valid_score,
        });

        let last = round + 1 == options.num_boost_round;
        if options.verbose_eval.should_log(round, last) {
            match valid_score {
                Some(v) => info!(flavour = setup.flavour, round, metric = %metric, train = train_score, valid = v, "eval"),
                None => info!(flavour = setup.flavour, round, metric = %metric, train = train_score, "eval"),
            }
        }

        if let (Some(es), Some(v)) = (stopper.as_mut(), valid_score) {
            if es.should_stop(v) {
                info!(
                    flavour = setup.flavour,
                    round,
                    best_iteration = es.best_round(),
                    best_score = es.best_value().unwrap_or(f64::NAN),
                    "early stopping"
                );
                break;
            }
        }
    }

    let (best_iteration, best_score) = match &stopper {
        Some(es) => (Some(es.best_round()), es.best_value()),
        None => (None, None),
    };
    debug!(
        flavour = setup.flavour,
        trees = trees.len(),
        best_iteration = ?best_iteration,
        "boosting finished"
    );

    Ok(Booster {
        objective,
        metric,
        base_score,
        learning_rate: setup.learning_rate,
        n_features: x.ncols(),
        trees,
        best_iteration,
        best_score,
        history,
    })
}

/// Seeded sample of `ceil(n * ratio)` indices out of `0..n`, sorted.
pub(crate) fn sample_indices(rng: &mut Xoshiro256PlusPlus, n: usize, ratio: f64) -> Vec<usize> {
    use rand::seq::SliceRandom;

    if ratio >= 1.0 {
        return (0..n).collect();
    }
    let k = ((n as f64 * ratio).ceil() as usize).clamp(1, n.max(1));
    let mut indices: Vec<usize> = (0..n).collect();
    indices.shuffle(rng);
    indices.truncate(k);
    indices.sort_unstable();
    indices
}

pub(crate) fn check_fraction(name: &str, value: f64) -> Result<()> {
    if !(value > 0.0 && value <= 1.0) {
        return Err(KolosalError::InvalidParameter {
            name: name.to_string(),
            value: value.to_string(),
            reason: "must be in (0, 1]".to_string(),
        });
    }
    Ok(())
}

pub(crate) fn check_positive(name: &str, value: f64) -> Result<()> {
    if !(value > 0.0) {
        return Err(KolosalError::InvalidParameter {
            name: name.to_string(),
            value: value.to_string(),
            reason: "must be positive".to_string(),
        });
    }
    Ok(())
}
