//! Feed-forward neural network trained epoch by epoch
//!
//! [`Network`] is the epoch-level contract the stacking run drives;
//! [`Mlp`] is the built-in multi-layer perceptron implementing it, and
//! [`fit_network`] is the epoch loop with validation monitoring and
//! callbacks.

use ndarray::{Array1, Array2, Axis};
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info};

use crate::error::{KolosalError, Result};
use crate::training::callbacks::{Callback, CallbackAction};
use crate::training::models::Estimator;

/// Hidden layer activation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    #[default]
    Relu,
    Sigmoid,
    Tanh,
    Linear,
}

impl Activation {
    fn apply(self, z: &Array2<f64>) -> Array2<f64> {
        match self {
            Activation::Relu => z.mapv(|v| v.max(0.0)),
            Activation::Sigmoid => z.mapv(sigmoid),
            Activation::Tanh => z.mapv(f64::tanh),
            Activation::Linear => z.clone(),
        }
    }

    fn derivative(self, z: &Array2<f64>) -> Array2<f64> {
        match self {
            Activation::Relu => z.mapv(|v| if v > 0.0 { 1.0 } else { 0.0 }),
            Activation::Sigmoid => z.mapv(|v| {
                let s = sigmoid(v);
                s * (1.0 - s)
            }),
            Activation::Tanh => z.mapv(|v| 1.0 - v.tanh().powi(2)),
            Activation::Linear => Array2::ones(z.raw_dim()),
        }
    }
}

/// Output unit and the loss paired with it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Output {
    /// Identity output, mean squared error
    Linear,
    /// Sigmoid output, binary cross-entropy
    #[default]
    Sigmoid,
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Weights and biases of every layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkState {
    pub weights: Vec<Array2<f64>>,
    pub biases: Vec<Array1<f64>>,
}

/// Epoch-level training contract
pub trait Network {
    /// Run one pass over `x` in the row order given by `order`, updating the
    /// parameters after every mini-batch. Returns the mean training loss.
    fn train_epoch(&mut self, x: &Array2<f64>, y: &Array1<f64>, order: &[usize], batch_size: usize) -> Result<f64>;

    fn loss(&self, x: &Array2<f64>, y: &Array1<f64>) -> Result<f64>;

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>>;

    /// Snapshot of the trainable parameters
    fn state(&self) -> NetworkState;

    fn restore(&mut self, state: NetworkState) -> Result<()>;
}

/// Multi-layer perceptron configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MlpConfig {
    pub hidden_layers: Vec<usize>,
    pub activation: Activation,
    pub output: Output,
    pub learning_rate: f64,
    pub momentum: f64,
    /// L2 weight decay
    pub l2: f64,
    pub seed: u64,
    /// Epochs used by [`Estimator::fit`]
    pub epochs: usize,
    /// Mini-batch size used by [`Estimator::fit`]
    pub batch_size: usize,
}

impl Default for MlpConfig {
    fn default() -> Self {
        Self {
            hidden_layers: vec![32],
            activation: Activation::Relu,
            output: Output::Sigmoid,
            learning_rate: 0.01,
            momentum: 0.9,
            l2: 1e-4,
            seed: 42,
            epochs: 50,
            batch_size: 32,
        }
    }
}

/// Multi-layer perceptron with a single output unit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mlp {
    config: MlpConfig,
    weights: Vec<Array2<f64>>,
    biases: Vec<Array1<f64>>,
    #[serde(skip)]
    velocity_w: Vec<Array2<f64>>,
    #[serde(skip)]
    velocity_b: Vec<Array1<f64>>,
}

impl Mlp {
    /// Create an unbuilt network; layers are sized on the first training call.
    pub fn new(config: MlpConfig) -> Self {
        Self {
            config,
            weights: Vec::new(),
            biases: Vec::new(),
            velocity_w: Vec::new(),
            velocity_b: Vec::new(),
        }
    }

    /// Create a network with layers sized for `n_features` inputs.
    pub fn with_inputs(config: MlpConfig, n_features: usize) -> Self {
        let mut mlp = Self::new(config);
        mlp.build(n_features);
        mlp
    }

    pub fn config(&self) -> &MlpConfig {
        &self.config
    }

    pub fn is_built(&self) -> bool {
        !self.weights.is_empty()
    }

    pub fn n_features(&self) -> Option<usize> {
        self.weights.first().map(|w| w.nrows())
    }

    /// Xavier/Glorot uniform initialization
    fn build(&mut self, n_features: usize) {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(self.config.seed);

        let mut sizes = vec![n_features];
        sizes.extend(&self.config.hidden_layers);
        sizes.push(1);

        self.weights.clear();
        self.biases.clear();
        for pair in sizes.windows(2) {
            let (n_in, n_out) = (pair[0], pair[1]);
            let limit = (6.0 / (n_in + n_out) as f64).sqrt();
            self.weights
                .push(Array2::from_shape_fn((n_in, n_out), |_| rng.gen_range(-limit..=limit)));
            self.biases.push(Array1::zeros(n_out));
        }
        self.reset_velocity();
    }

    fn reset_velocity(&mut self) {
        self.velocity_w = self.weights.iter().map(|w| Array2::zeros(w.raw_dim())).collect();
        self.velocity_b = self.biases.iter().map(|b| Array1::zeros(b.len())).collect();
    }

    fn check_input(&self, x: &Array2<f64>) -> Result<()> {
        match self.n_features() {
            Some(n) if n != x.ncols() => Err(KolosalError::ShapeError {
                expected: format!("{} features", n),
                actual: format!("{} features", x.ncols()),
            }),
            Some(_) => Ok(()),
            None => Err(KolosalError::ModelNotFitted),
        }
    }

    /// Forward pass returning pre-activations and activations of every layer
    fn forward(&self, x: &Array2<f64>) -> (Vec<Array2<f64>>, Vec<Array2<f64>>) {
        let last = self.weights.len() - 1;
        let mut activations = vec![x.clone()];
        let mut z_values = Vec::with_capacity(self.weights.len());

        for (i, (w, b)) in self.weights.iter().zip(&self.biases).enumerate() {
            let z = activations[i].dot(w) + b;
            let a = if i < last {
                self.config.activation.apply(&z)
            } else {
                match self.config.output {
                    Output::Linear => z.clone(),
                    Output::Sigmoid => z.mapv(sigmoid),
                }
            };
            z_values.push(z);
            activations.push(a);
        }
        (z_values, activations)
    }

    fn output_loss(&self, y: &Array1<f64>, out: &Array1<f64>) -> f64 {
        let n = y.len().max(1) as f64;
        match self.config.output {
            Output::Linear => y.iter().zip(out).map(|(t, p)| (t - p).powi(2)).sum::<f64>() / n,
            Output::Sigmoid => {
                -y.iter()
                    .zip(out)
                    .map(|(&t, &p)| {
                        let p = p.clamp(1e-7, 1.0 - 1e-7);
                        t * p.ln() + (1.0 - t) * (1.0 - p).ln()
                    })
                    .sum::<f64>()
                    / n
            }
        }
    }

    fn train_batch(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> f64 {
        let (z_values, activations) = self.forward(x);
        let n = y.len() as f64;
        let out = activations[activations.len() - 1].column(0).to_owned();
        let loss = self.output_loss(y, &out);

        // Both output/loss pairs share the gradient (p - y) with respect to z
        let mut delta = (&out - y).insert_axis(Axis(1)) / n;

        for i in (0..self.weights.len()).rev() {
            let grad_w = activations[i].t().dot(&delta) + &self.weights[i] * self.config.l2;
            let grad_b = delta.sum_axis(Axis(0));

            if i > 0 {
                delta = delta.dot(&self.weights[i].t()) * self.config.activation.derivative(&z_values[i - 1]);
            }

            let lr = self.config.learning_rate;
            let momentum = self.config.momentum;
            self.velocity_w[i] = &self.velocity_w[i] * momentum - &grad_w * lr;
            self.velocity_b[i] = &self.velocity_b[i] * momentum - &grad_b * lr;
            self.weights[i] += &self.velocity_w[i];
            self.biases[i] += &self.velocity_b[i];
        }
        loss
    }
}

impl Network for Mlp {
    fn train_epoch(&mut self, x: &Array2<f64>, y: &Array1<f64>, order: &[usize], batch_size: usize) -> Result<f64> {
        if x.nrows() != y.len() {
            return Err(KolosalError::ShapeError {
                expected: format!("{} targets", x.nrows()),
                actual: format!("{} targets", y.len()),
            });
        }
        if self.config.output == Output::Sigmoid && y.iter().any(|&v| v != 0.0 && v != 1.0) {
            return Err(KolosalError::InvalidInput(
                "sigmoid output requires labels in {0, 1}, use a linear output for regression".to_string(),
            ));
        }
        if !self.is_built() {
            self.build(x.ncols());
        }
        self.check_input(x)?;
        // Velocities are not serialized
        if self.velocity_w.len() != self.weights.len() {
            self.reset_velocity();
        }
        if let Some(&bad) = order.iter().find(|&&i| i >= x.nrows()) {
            return Err(KolosalError::InvalidInput(format!(
                "row index {} out of bounds for {} rows",
                bad,
                x.nrows()
            )));
        }

        let mut total = 0.0;
        for batch in order.chunks(batch_size.max(1)) {
            let xb = x.select(Axis(0), batch);
            let yb = y.select(Axis(0), batch);
            total += self.train_batch(&xb, &yb) * batch.len() as f64;
        }
        Ok(total / order.len().max(1) as f64)
    }

    fn loss(&self, x: &Array2<f64>, y: &Array1<f64>) -> Result<f64> {
        let out = Network::predict(self, x)?;
        if out.len() != y.len() {
            return Err(KolosalError::ShapeError {
                expected: format!("{} targets", out.len()),
                actual: format!("{} targets", y.len()),
            });
        }
        Ok(self.output_loss(y, &out))
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        self.check_input(x)?;
        let (_, activations) = self.forward(x);
        Ok(activations[activations.len() - 1].column(0).to_owned())
    }

    fn state(&self) -> NetworkState {
        NetworkState {
            weights: self.weights.clone(),
            biases: self.biases.clone(),
        }
    }

    fn restore(&mut self, state: NetworkState) -> Result<()> {
        if state.weights.len() != state.biases.len() || state.weights.is_empty() {
            return Err(KolosalError::InvalidInput("network state has inconsistent layers".into()));
        }
        if self.is_built() {
            let same_shape = self.weights.len() == state.weights.len()
                && self.weights.iter().zip(&state.weights).all(|(a, b)| a.dim() == b.dim());
            if !same_shape {
                return Err(KolosalError::ShapeError {
                    expected: format!("{:?}", self.weights.iter().map(|w| w.dim()).collect::<Vec<_>>()),
                    actual: format!("{:?}", state.weights.iter().map(|w| w.dim()).collect::<Vec<_>>()),
                });
            }
        }
        self.weights = state.weights;
        self.biases = state.biases;
        self.reset_velocity();
        Ok(())
    }
}

impl Estimator for Mlp {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        self.build(x.ncols());
        let options = FitOptions {
            epochs: self.config.epochs,
            batch_size: self.config.batch_size,
            seed: self.config.seed,
            ..Default::default()
        };
        fit_network(self, x, y, None, &options, &mut [])?;
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        Network::predict(self, x)
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        if self.config.output != Output::Sigmoid {
            return Err(KolosalError::InvalidInput(
                "predict_proba requires a sigmoid output".to_string(),
            ));
        }
        let p = Network::predict(self, x)?;
        let mut proba = Array2::zeros((p.len(), 2));
        proba.column_mut(0).assign(&p.mapv(|v| 1.0 - v));
        proba.column_mut(1).assign(&p);
        Ok(proba)
    }

    fn set_random_state(&mut self, seed: u64) {
        self.config.seed = seed;
    }

    fn name(&self) -> &str {
        "mlp"
    }
}

/// Epoch loop settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitOptions {
    pub epochs: usize,
    pub batch_size: usize,
    /// Shuffle row order every epoch
    pub shuffle: bool,
    pub seed: u64,
    /// 0 silent, 1 one info line per epoch, 2 adds debug detail
    pub verbose: u8,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            epochs: 10,
            batch_size: 32,
            shuffle: true,
            seed: 42,
            verbose: 0,
        }
    }
}

/// Losses recorded at the end of an epoch
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochLogs {
    /// Zero-based epoch
    pub epoch: usize,
    pub loss: f64,
    pub val_loss: Option<f64>,
}

/// Train `model` for up to `options.epochs` epochs.
///
/// Callbacks see every epoch's logs; any of them may stop training early.
/// Returns the logs of the epochs that ran.
pub fn fit_network<N: Network>(
    model: &mut N,
    x: &Array2<f64>,
    y: &Array1<f64>,
    validation: Option<(&Array2<f64>, &Array1<f64>)>,
    options: &FitOptions,
    callbacks: &mut [&mut dyn Callback],
) -> Result<Vec<EpochLogs>> {
    if x.nrows() == 0 {
        return Err(KolosalError::TrainingError("Empty dataset".into()));
    }
    if options.batch_size == 0 {
        return Err(KolosalError::InvalidParameter {
            name: "batch_size".into(),
            value: "0".into(),
            reason: "must be at least 1".into(),
        });
    }

    let mut rng = Xoshiro256PlusPlus::seed_from_u64(options.seed);
    let mut order: Vec<usize> = (0..x.nrows()).collect();
    let mut history = Vec::with_capacity(options.epochs);

    for epoch in 0..options.epochs {
        let started = Instant::now();
        if options.shuffle {
            order.shuffle(&mut rng);
        }

        let loss = model.train_epoch(x, y, &order, options.batch_size)?;
        let val_loss = match validation {
            Some((xv, yv)) => Some(model.loss(xv, yv)?),
            None => None,
        };
        let logs = EpochLogs { epoch, loss, val_loss };

        match options.verbose {
            0 => {}
            1 => info!(epoch = epoch + 1, epochs = options.epochs, loss, val_loss = ?val_loss, "epoch"),
            _ => {
                info!(epoch = epoch + 1, epochs = options.epochs, loss, val_loss = ?val_loss, "epoch");
                debug!(
                    epoch = epoch + 1,
                    batches = order.len().div_ceil(options.batch_size),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "epoch detail"
                );
            }
        }
        history.push(logs);

        let mut stop = false;
        for callback in callbacks.iter_mut() {
            if callback.on_epoch_end(&logs, &*model)? == CallbackAction::Stop {
                stop = true;
            }
        }
        if stop {
            if options.verbose > 0 {
                info!(epoch = epoch + 1, "training stopped by callback");
            }
            break;
        }
    }

    Ok(history)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn separable_data() -> (Array2<f64>, Array1<f64>) {
        let x = Array2::from_shape_fn((80, 2), |(i, j)| {
            let t = i as f64 / 80.0;
            if j == 0 { t } else { 1.0 - t }
        });
        let y = Array1::from_shape_fn(80, |i| if i >= 40 { 1.0 } else { 0.0 });
        (x, y)
    }

    #[test]
    fn test_training_reduces_loss() {
        let (x, y) = separable_data();
        let mut mlp = Mlp::new(MlpConfig {
            hidden_layers: vec![8],
            learning_rate: 0.1,
            ..Default::default()
        });
        let options = FitOptions {
            epochs: 60,
            batch_size: 16,
            ..Default::default()
        };
        let history = fit_network(&mut mlp, &x, &y, Some((&x, &y)), &options, &mut []).unwrap();
        assert_eq!(history.len(), 60);
        assert!(history[59].loss < history[0].loss);
        assert!(history[59].val_loss.unwrap() < 0.5);
    }

    #[test]
    fn test_state_restore_roundtrip() {
        let (x, y) = separable_data();
        let mut mlp = Mlp::with_inputs(MlpConfig::default(), 2);
        let before = mlp.state();
        let p_before = Network::predict(&mlp, &x).unwrap();

        let order: Vec<usize> = (0..80).collect();
        mlp.train_epoch(&x, &y, &order, 10).unwrap();
        assert_ne!(Network::predict(&mlp, &x).unwrap(), p_before);

        mlp.restore(before).unwrap();
        assert_eq!(Network::predict(&mlp, &x).unwrap(), p_before);
    }

    #[test]
    fn test_restore_rejects_other_shapes() {
        let mut a = Mlp::with_inputs(MlpConfig::default(), 2);
        let b = Mlp::with_inputs(MlpConfig::default(), 3);
        assert!(a.restore(b.state()).is_err());
    }

    #[test]
    fn test_seeded_init_is_deterministic() {
        let a = Mlp::with_inputs(MlpConfig::default(), 4);
        let b = Mlp::with_inputs(MlpConfig::default(), 4);
        assert_eq!(a.state(), b.state());
        let c = Mlp::with_inputs(MlpConfig { seed: 7, ..Default::default() }, 4);
        assert_ne!(a.state(), c.state());
    }

    #[test]
    fn test_unbuilt_predict_fails() {
        let mlp = Mlp::new(MlpConfig::default());
        assert!(matches!(
            Network::predict(&mlp, &Array2::zeros((1, 2))),
            Err(KolosalError::ModelNotFitted)
        ));
    }

    #[test]
    fn test_linear_output_regression() {
        let x = Array2::from_shape_fn((50, 1), |(i, _)| i as f64 / 50.0);
        let y = x.column(0).mapv(|v| 2.0 * v + 1.0);
        let mut mlp = Mlp::new(MlpConfig {
            hidden_layers: vec![],
            output: Output::Linear,
            activation: Activation::Linear,
            learning_rate: 0.1,
            l2: 0.0,
            ..Default::default()
        });
        let options = FitOptions {
            epochs: 200,
            batch_size: 10,
            ..Default::default()
        };
        fit_network(&mut mlp, &x, &y, None, &options, &mut []).unwrap();
        assert!(mlp.loss(&x, &y).unwrap() < 1e-3);
        assert!(mlp.predict_proba(&x).is_err());
    }

    fn wide_range_targets() -> (Array2<f64>, Array1<f64>) {
        let x = Array2::from_shape_fn((60, 1), |(i, _)| i as f64 / 60.0);
        let y = x.column(0).mapv(|v| 10.0 * v + 5.0);
        (x, y)
    }

    #[test]
    fn test_sigmoid_output_rejects_continuous_targets() {
        let (x, y) = wide_range_targets();
        let mut mlp = Mlp::new(MlpConfig {
            epochs: 2,
            ..Default::default()
        });
        let err = Estimator::fit(&mut mlp, &x, &y).unwrap_err();
        assert!(matches!(err, KolosalError::InvalidInput(_)));
    }

    #[test]
    fn test_linear_output_keeps_target_scale() {
        let (x, y) = wide_range_targets();
        let mut mlp = Mlp::new(MlpConfig {
            hidden_layers: vec![8],
            output: Output::Linear,
            epochs: 100,
            batch_size: 16,
            ..Default::default()
        });
        Estimator::fit(&mut mlp, &x, &y).unwrap();
        let pred = Estimator::predict(&mlp, &x).unwrap();
        let mean = pred.mean().unwrap();
        assert!(mean > 7.0 && mean < 13.0, "mean prediction {}", mean);
        assert!(pred.iter().any(|&p| p > 1.0));
    }

    #[test]
    fn test_estimator_fit_and_proba() {
        let (x, y) = separable_data();
        let mut mlp = Mlp::new(MlpConfig {
            epochs: 5,
            ..Default::default()
        });
        Estimator::fit(&mut mlp, &x, &y).unwrap();
        let proba = mlp.predict_proba(&x).unwrap();
        assert_eq!(proba.dim(), (80, 2));
        assert!(proba.iter().all(|p| (0.0..=1.0).contains(p)));
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let (x, y) = separable_data();
        let mut mlp = Mlp::new(MlpConfig::default());
        let options = FitOptions {
            batch_size: 0,
            ..Default::default()
        };
        assert!(fit_network(&mut mlp, &x, &y, None, &options, &mut []).is_err());
    }
}
