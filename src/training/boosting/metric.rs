//! Evaluation metrics monitored on the validation set during boosting

use serde::{Deserialize, Serialize};
use std::fmt;

const EPS: f64 = 1e-15;

/// Metric evaluated each boosting round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvalMetric {
    /// Root mean squared error
    Rmse,
    /// Mean absolute error
    Mae,
    /// Binary cross-entropy on probabilities
    #[serde(alias = "binary_logloss")]
    LogLoss,
    /// Binary classification error rate at threshold 0.5
    #[serde(alias = "binary_error")]
    Error,
    /// Area under the ROC curve
    Auc,
}

impl EvalMetric {
    pub fn higher_is_better(self) -> bool {
        matches!(self, EvalMetric::Auc)
    }

    /// Evaluate on targets and transformed predictions (probabilities for
    /// binary objectives).
    pub fn evaluate(self, y_true: &[f64], y_pred: &[f64]) -> f64 {
        let n = y_true.len().max(1) as f64;
        match self {
            EvalMetric::Rmse => {
                let sse: f64 = y_true.iter().zip(y_pred).map(|(t, p)| (t - p).powi(2)).sum();
                (sse / n).sqrt()
            }
            EvalMetric::Mae => y_true.iter().zip(y_pred).map(|(t, p)| (t - p).abs()).sum::<f64>() / n,
            EvalMetric::LogLoss => {
                -y_true
                    .iter()
                    .zip(y_pred)
                    .map(|(&t, &p)| {
                        let p = p.clamp(EPS, 1.0 - EPS);
                        t * p.ln() + (1.0 - t) * (1.0 - p).ln()
                    })
                    .sum::<f64>()
                    / n
            }
            EvalMetric::Error => {
                y_true
                    .iter()
                    .zip(y_pred)
                    .filter(|(&t, &p)| (p > 0.5) != (t > 0.5))
                    .count() as f64
                    / n
            }
            EvalMetric::Auc => roc_auc(y_true, y_pred),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            EvalMetric::Rmse => "rmse",
            EvalMetric::Mae => "mae",
            EvalMetric::LogLoss => "logloss",
            EvalMetric::Error => "error",
            EvalMetric::Auc => "auc",
        }
    }
}

impl fmt::Display for EvalMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Rank-based AUC (Mann-Whitney U) with tied scores sharing their mean rank.
///
/// Returns 0.5 when only one class is present.
pub fn roc_auc(y_true: &[f64], scores: &[f64]) -> f64 {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut ranks = vec![0.0; scores.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        let mean_rank = (i + j) as f64 / 2.0 + 1.0;
        for &k in &order[i..=j] {
            ranks[k] = mean_rank;
        }
        i = j + 1;
    }

    let n_pos = y_true.iter().filter(|&&t| t > 0.5).count() as f64;
    let n_neg = y_true.len() as f64 - n_pos;
    if n_pos == 0.0 || n_neg == 0.0 {
        return 0.5;
    }

    let pos_rank_sum: f64 = y_true
        .iter()
        .zip(&ranks)
        .filter(|(&t, _)| t > 0.5)
        .map(|(_, &r)| r)
        .sum();

    (pos_rank_sum - n_pos * (n_pos + 1.0) / 2.0) / (n_pos * n_neg)
}
