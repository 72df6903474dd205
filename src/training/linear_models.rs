//! Linear model implementations

use crate::error::{KolosalError, Result};
use crate::training::models::Estimator;
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

/// Solve `a x = b` by Gaussian elimination with partial pivoting.
///
/// Returns `None` when `a` is singular.
fn gaussian_solve(a: &Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {
    let n = a.nrows();
    if n != a.ncols() || n != b.len() {
        return None;
    }
    let mut m = a.clone();
    let mut rhs = b.clone();

    for col in 0..n {
        let pivot_row = (col..n).max_by(|&i, &j| m[[i, col]].abs().total_cmp(&m[[j, col]].abs()))?;
        if m[[pivot_row, col]].abs() < 1e-12 {
            return None;
        }
        if pivot_row != col {
            for j in 0..n {
                m.swap([col, j], [pivot_row, j]);
            }
            rhs.swap(col, pivot_row);
        }
        for row in col + 1..n {
            let factor = m[[row, col]] / m[[col, col]];
            if factor == 0.0 {
                continue;
            }
            for j in col..n {
                m[[row, j]] -= factor * m[[col, j]];
            }
            rhs[row] -= factor * rhs[col];
        }
    }

    let mut x = Array1::zeros(n);
    for i in (0..n).rev() {
        let tail: f64 = (i + 1..n).map(|j| m[[i, j]] * x[j]).sum();
        x[i] = (rhs[i] - tail) / m[[i, i]];
    }
    Some(x)
}

fn check_xy(x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
    if x.nrows() != y.len() {
        return Err(KolosalError::ShapeError {
            expected: format!("y length = {}", x.nrows()),
            actual: format!("y length = {}", y.len()),
        });
    }
    if x.nrows() == 0 {
        return Err(KolosalError::TrainingError("Empty dataset".into()));
    }
    Ok(())
}

fn check_features(coefficients: &Array1<f64>, x: &Array2<f64>) -> Result<()> {
    if coefficients.len() != x.ncols() {
        return Err(KolosalError::ShapeError {
            expected: format!("{} features", coefficients.len()),
            actual: format!("{} features", x.ncols()),
        });
    }
    Ok(())
}

/// Binary logistic regression fitted by L2-regularized gradient descent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticRegression {
    /// Fitted coefficients
    pub coefficients: Option<Array1<f64>>,
    /// Fitted intercept
    pub intercept: f64,
    /// Regularization strength (L2)
    pub alpha: f64,
    pub max_iter: usize,
    /// Stop when the gradient norm falls below this
    pub tol: f64,
    pub learning_rate: f64,
}

impl Default for LogisticRegression {
    fn default() -> Self {
        Self::new()
    }
}

impl LogisticRegression {
    pub fn new() -> Self {
        Self {
            coefficients: None,
            intercept: 0.0,
            alpha: 0.01,
            max_iter: 1000,
            tol: 1e-6,
            learning_rate: 0.1,
        }
    }

    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    pub fn with_learning_rate(mut self, lr: f64) -> Self {
        self.learning_rate = lr;
        self
    }

    fn sigmoid(z: &Array1<f64>) -> Array1<f64> {
        z.mapv(|v| 1.0 / (1.0 + (-v).exp()))
    }

    /// Probability of class 1 for each row
    pub fn decision_proba(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let coefficients = self.coefficients.as_ref().ok_or(KolosalError::ModelNotFitted)?;
        check_features(coefficients, x)?;
        Ok(Self::sigmoid(&(x.dot(coefficients) + self.intercept)))
    }
}

impl Estimator for LogisticRegression {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        check_xy(x, y)?;
        if y.iter().any(|&v| v != 0.0 && v != 1.0) {
            return Err(KolosalError::InvalidInput(
                "logistic regression requires labels in {0, 1}".to_string(),
            ));
        }

        let n_samples = x.nrows() as f64;
        let mut weights = Array1::<f64>::zeros(x.ncols());
        let mut bias = 0.0;

        for _ in 0..self.max_iter {
            let predictions = Self::sigmoid(&(x.dot(&weights) + bias));
            let errors = &predictions - y;
            let dw = x.t().dot(&errors) / n_samples + &weights * self.alpha;
            let db = errors.mean().unwrap_or(0.0);

            let grad_norm = (dw.mapv(|v| v * v).sum() + db * db).sqrt();
            if grad_norm < self.tol {
                break;
            }

            weights.scaled_add(-self.learning_rate, &dw);
            bias -= self.learning_rate * db;
        }

        self.coefficients = Some(weights);
        self.intercept = bias;
        Ok(())
    }

    /// Hard 0/1 labels
    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        Ok(self.decision_proba(x)?.mapv(|p| if p >= 0.5 { 1.0 } else { 0.0 }))
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let p = self.decision_proba(x)?;
        let mut proba = Array2::zeros((p.len(), 2));
        proba.column_mut(0).assign(&p.mapv(|v| 1.0 - v));
        proba.column_mut(1).assign(&p);
        Ok(proba)
    }

    fn name(&self) -> &str {
        "logistic_regression"
    }
}

/// Ridge Regression (L2-regularized linear regression)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RidgeRegression {
    pub coefficients: Option<Array1<f64>>,
    pub intercept: f64,
    pub fit_intercept: bool,
    /// L2 regularization strength
    pub alpha: f64,
}

impl Default for RidgeRegression {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl RidgeRegression {
    pub fn new(alpha: f64) -> Self {
        Self {
            coefficients: None,
            intercept: 0.0,
            fit_intercept: true,
            alpha,
        }
    }

    pub fn with_fit_intercept(mut self, fit_intercept: bool) -> Self {
        self.fit_intercept = fit_intercept;
        self
    }
}

impl Estimator for RidgeRegression {
    /// Closed form `(XᵀX + αI) w = Xᵀy` on centered data
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        check_xy(x, y)?;
        let (x_c, y_c, x_mean, y_mean) = if self.fit_intercept {
            let xm = x.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(x.ncols()));
            let ym = y.mean().unwrap_or(0.0);
            (x - &xm.view().insert_axis(Axis(0)), y - ym, xm, ym)
        } else {
            (x.clone(), y.clone(), Array1::zeros(x.ncols()), 0.0)
        };

        let mut xtx = x_c.t().dot(&x_c);
        for i in 0..x.ncols() {
            xtx[[i, i]] += self.alpha;
        }
        let xty = x_c.t().dot(&y_c);

        let coefficients = gaussian_solve(&xtx, &xty)
            .ok_or_else(|| KolosalError::TrainingError("Singular normal equations; increase alpha".to_string()))?;

        self.intercept = y_mean - coefficients.dot(&x_mean);
        self.coefficients = Some(coefficients);
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let coefficients = self.coefficients.as_ref().ok_or(KolosalError::ModelNotFitted)?;
        check_features(coefficients, x)?;
        Ok(x.dot(coefficients) + self.intercept)
    }

    fn name(&self) -> &str {
        "ridge"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_gaussian_solve() {
        let a = array![[0.0, 2.0], [3.0, 1.0]];
        let b = array![4.0, 5.0];
        let x = gaussian_solve(&a, &b).unwrap();
        assert!((x[0] - 1.0).abs() < 1e-12);
        assert!((x[1] - 2.0).abs() < 1e-12);
        assert!(gaussian_solve(&array![[1.0, 2.0], [2.0, 4.0]], &b).is_none());
    }

    #[test]
    fn test_ridge_recovers_line() {
        let x = Array2::from_shape_fn((20, 2), |(i, j)| (i * (j + 1)) as f64 + if j == 1 { (i % 3) as f64 } else { 0.0 });
        let y: Array1<f64> = x.rows().into_iter().map(|r| 3.0 * r[0] - r[1] + 2.0).collect();
        let mut model = RidgeRegression::new(1e-8);
        model.fit(&x, &y).unwrap();
        let pred = model.predict(&x).unwrap();
        for (p, t) in pred.iter().zip(y.iter()) {
            assert!((p - t).abs() < 1e-4);
        }
    }

    #[test]
    fn test_ridge_shrinks_with_alpha() {
        let x = Array2::from_shape_fn((10, 1), |(i, _)| i as f64);
        let y = x.column(0).to_owned();
        let mut weak = RidgeRegression::new(0.0);
        let mut strong = RidgeRegression::new(1000.0);
        weak.fit(&x, &y).unwrap();
        strong.fit(&x, &y).unwrap();
        assert!(strong.coefficients.as_ref().unwrap()[0] < weak.coefficients.as_ref().unwrap()[0]);
    }

    #[test]
    fn test_logistic_separates() {
        let x = Array2::from_shape_fn((40, 1), |(i, _)| i as f64 / 10.0 - 2.0);
        let y = Array1::from_shape_fn(40, |i| if i >= 20 { 1.0 } else { 0.0 });
        let mut model = LogisticRegression::new();
        model.fit(&x, &y).unwrap();

        let labels = model.predict(&x).unwrap();
        let correct = labels.iter().zip(y.iter()).filter(|(a, b)| a == b).count();
        assert!(correct >= 36);

        let proba = model.predict_proba(&x).unwrap();
        assert_eq!(proba.dim(), (40, 2));
        assert!(proba[[39, 1]] > proba[[0, 1]]);
        assert!((proba[[5, 0]] + proba[[5, 1]] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_logistic_rejects_non_binary_labels() {
        let x = Array2::zeros((3, 1));
        let y = array![0.0, 1.0, 2.0];
        assert!(LogisticRegression::new().fit(&x, &y).is_err());
    }

    #[test]
    fn test_not_fitted() {
        let x = Array2::zeros((2, 1));
        assert!(matches!(RidgeRegression::default().predict(&x), Err(KolosalError::ModelNotFitted)));
        assert!(matches!(LogisticRegression::new().predict_proba(&x), Err(KolosalError::ModelNotFitted)));
    }
}
