//! Epoch callbacks for [`fit_network`](crate::training::neural_network::fit_network)
//!
//! `ModelCheckpoint` keeps the parameters of the epoch with the lowest
//! validation loss, both in memory and as a JSON file on disk.
//! `EarlyStopping` ends training once the validation loss stops improving.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{KolosalError, Result};
use crate::training::neural_network::{EpochLogs, Network, NetworkState};

/// What the epoch loop should do after a callback ran
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackAction {
    Continue,
    Stop,
}

/// Hook invoked at the end of every epoch
pub trait Callback {
    fn on_epoch_end(&mut self, logs: &EpochLogs, network: &dyn Network) -> Result<CallbackAction>;
}

/// Monitored quantity: validation loss, or training loss without validation data
fn monitored(logs: &EpochLogs) -> f64 {
    logs.val_loss.unwrap_or(logs.loss)
}

/// Saves the best-so-far network state whenever the monitored loss improves
#[derive(Debug, Clone)]
pub struct ModelCheckpoint {
    path: PathBuf,
    best: Option<f64>,
    best_epoch: Option<usize>,
    best_state: Option<NetworkState>,
}

impl ModelCheckpoint {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            best: None,
            best_epoch: None,
            best_state: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn best_loss(&self) -> Option<f64> {
        self.best
    }

    pub fn best_epoch(&self) -> Option<usize> {
        self.best_epoch
    }

    pub fn best_state(&self) -> Option<&NetworkState> {
        self.best_state.as_ref()
    }

    /// Load the best recorded state into `network`.
    ///
    /// Fails with `CheckpointError` if no epoch was ever recorded.
    pub fn restore_best(&self, network: &mut dyn Network) -> Result<()> {
        let state = self.best_state.clone().ok_or_else(|| KolosalError::CheckpointError {
            path: self.path.display().to_string(),
            reason: "no epoch recorded".to_string(),
        })?;
        network.restore(state)
    }

    fn write(&self, state: &NetworkState) -> Result<()> {
        let to_err = |reason: String| KolosalError::CheckpointError {
            path: self.path.display().to_string(),
            reason,
        };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| to_err(e.to_string()))?;
        }
        let json = serde_json::to_vec(state).map_err(|e| to_err(e.to_string()))?;
        fs::write(&self.path, json).map_err(|e| to_err(e.to_string()))
    }
}

impl Callback for ModelCheckpoint {
    fn on_epoch_end(&mut self, logs: &EpochLogs, network: &dyn Network) -> Result<CallbackAction> {
        let value = monitored(logs);
        if value.is_nan() {
            warn!(epoch = logs.epoch, "monitored loss is NaN, checkpoint skipped");
            return Ok(CallbackAction::Continue);
        }
        if self.best.map_or(true, |best| value < best) {
            let state = network.state();
            self.write(&state)?;
            debug!(epoch = logs.epoch, loss = value, path = %self.path.display(), "checkpoint saved");
            self.best = Some(value);
            self.best_epoch = Some(logs.epoch);
            self.best_state = Some(state);
        }
        Ok(CallbackAction::Continue)
    }
}

/// Stops training after `patience` epochs without improvement
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    patience: usize,
    best: Option<f64>,
    wait: usize,
    stopped_epoch: Option<usize>,
}

impl EarlyStopping {
    pub fn new(patience: usize) -> Self {
        Self {
            patience,
            best: None,
            wait: 0,
            stopped_epoch: None,
        }
    }

    pub fn stopped_epoch(&self) -> Option<usize> {
        self.stopped_epoch
    }
}

impl Callback for EarlyStopping {
    fn on_epoch_end(&mut self, logs: &EpochLogs, _network: &dyn Network) -> Result<CallbackAction> {
        let value = monitored(logs);
        if self.best.map_or(!value.is_nan(), |best| value < best) {
            self.best = Some(value);
            self.wait = 0;
            return Ok(CallbackAction::Continue);
        }
        self.wait += 1;
        if self.wait >= self.patience {
            self.stopped_epoch = Some(logs.epoch);
            return Ok(CallbackAction::Stop);
        }
        Ok(CallbackAction::Continue)
    }
}

/// Checkpoint to `path` paired with early stopping after `patience` stale epochs
pub fn checkpoint_callbacks(path: impl Into<PathBuf>, patience: usize) -> (ModelCheckpoint, EarlyStopping) {
    (ModelCheckpoint::new(path), EarlyStopping::new(patience))
}

/// Read a network state written by [`ModelCheckpoint`].
pub fn load_checkpoint(path: impl AsRef<Path>) -> Result<NetworkState> {
    let path = path.as_ref();
    let to_err = |reason: String| KolosalError::CheckpointError {
        path: path.display().to_string(),
        reason,
    };
    let bytes = fs::read(path).map_err(|e| to_err(e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| to_err(e.to_string()))
}
