//! Run configuration
//!
//! An [`EnsembleConfig`] describes one stacking or bagging run: how the
//! training set is folded, which model family is stacked or bagged, and that
//! family's parameters. Every field has a default, so a JSON file only needs
//! the values it changes.

use std::path::Path;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::ensemble::{BagTask, NnStackOptions};
use crate::error::{KolosalError, Result};
use crate::training::{
    BoostOptions, CVStrategy, KNNConfig, LightGBMConfig, MlpConfig, Objective, Output, XGBoostConfig,
};

/// Model family a run stacks or bags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ModelFamily {
    Xgboost,
    #[default]
    Lightgbm,
    /// Multi-layer perceptron
    Nn,
    Logistic,
    Knn,
}

impl ModelFamily {
    /// Family label used in fold log lines
    pub fn label(&self) -> &'static str {
        match self {
            ModelFamily::Xgboost => "xgboost",
            ModelFamily::Lightgbm => "lightgbm",
            ModelFamily::Nn => "neural network",
            ModelFamily::Logistic => "logistic regression",
            ModelFamily::Knn => "knn",
        }
    }
}

/// Bagging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BagConfig {
    pub rounds: usize,
    /// Reseed the model with `seed + n` before round `n`
    pub update_seed: bool,
    pub task: BagTask,
    pub progress: bool,
}

impl Default for BagConfig {
    fn default() -> Self {
        Self {
            rounds: 5,
            update_seed: true,
            task: BagTask::Classification,
            progress: true,
        }
    }
}

/// Description of a complete ensemble run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnsembleConfig {
    pub family: ModelFamily,
    /// Fold strategy for stacking
    pub folds: CVStrategy,
    /// Seed for fold assignment and bagging
    pub seed: u64,
    /// Log fold progress at info level
    pub verbose: bool,
    pub boost: BoostOptions,
    pub xgboost: XGBoostConfig,
    pub lightgbm: LightGBMConfig,
    pub mlp: MlpConfig,
    pub nn: NnStackOptions,
    pub knn: KNNConfig,
    pub bag: BagConfig,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            family: ModelFamily::default(),
            folds: CVStrategy::default(),
            seed: 42,
            verbose: true,
            boost: BoostOptions::default(),
            xgboost: XGBoostConfig::default(),
            lightgbm: LightGBMConfig::default(),
            mlp: MlpConfig::default(),
            nn: NnStackOptions::default(),
            knn: KNNConfig::default(),
            bag: BagConfig::default(),
        }
    }
}

impl EnsembleConfig {
    /// Load and validate a JSON configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration as pretty-printed JSON
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), json)?;
        Ok(())
    }

    /// Point the booster objectives and the MLP output at `task`
    pub fn set_task(&mut self, task: BagTask) {
        let (objective, output) = match task {
            BagTask::Classification => (Objective::Binary, Output::Sigmoid),
            BagTask::Regression => (Objective::Regression, Output::Linear),
        };
        self.xgboost.objective = objective;
        self.lightgbm.objective = objective;
        self.mlp.output = output;
    }

    pub fn validate(&self) -> Result<()> {
        let n_splits = self.folds.n_splits();
        if n_splits < 2 {
            return Err(KolosalError::ConfigError(format!(
                "at least 2 folds are required, got {}",
                n_splits
            )));
        }
        if self.bag.rounds == 0 {
            return Err(KolosalError::ConfigError("bag.rounds must be at least 1".to_string()));
        }
        if self.knn.n_neighbors == 0 {
            return Err(KolosalError::ConfigError("knn.n_neighbors must be at least 1".to_string()));
        }
        if self.mlp.hidden_layers.iter().any(|&units| units == 0) {
            return Err(KolosalError::ConfigError("mlp.hidden_layers entries must be non-zero".to_string()));
        }
        self.xgboost.validate()?;
        self.lightgbm.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: EnsembleConfig = serde_json::from_str(
            r#"{
                "family": "xgboost",
                "folds": {"type": "stratified_k_fold", "n_splits": 4, "shuffle": true},
                "boost": {"num_boost_round": 30},
                "xgboost": {"eta": 0.05, "max_depth": 3}
            }"#,
        )
        .unwrap();

        assert_eq!(config.family, ModelFamily::Xgboost);
        assert_eq!(config.folds, CVStrategy::StratifiedKFold { n_splits: 4, shuffle: true });
        assert_eq!(config.boost.num_boost_round, 30);
        assert_eq!(config.boost.early_stopping_rounds, None);
        assert!((config.xgboost.learning_rate - 0.05).abs() < 1e-12);
        assert_eq!(config.xgboost.max_depth, 3);
        assert_eq!(config.lightgbm, LightGBMConfig::default());
        assert_eq!(config.seed, 42);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.json");
        let mut config = EnsembleConfig::default();
        config.family = ModelFamily::Nn;
        config.nn.saved_file_name = "fold_net".to_string();
        config.bag.task = BagTask::Regression;
        config.save(&path).unwrap();

        let loaded = EnsembleConfig::from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_set_task_switches_every_family() {
        let mut config = EnsembleConfig::default();
        config.set_task(BagTask::Regression);
        assert_eq!(config.xgboost.objective, Objective::Regression);
        assert_eq!(config.lightgbm.objective, Objective::Regression);
        assert_eq!(config.mlp.output, Output::Linear);

        config.set_task(BagTask::Classification);
        assert_eq!(config.lightgbm.objective, Objective::Binary);
        assert_eq!(config.mlp.output, Output::Sigmoid);
    }

    #[test]
    fn test_rejects_single_fold() {
        let config = EnsembleConfig {
            folds: CVStrategy::KFold { n_splits: 1, shuffle: false },
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(KolosalError::ConfigError(_))));
    }

    #[test]
    fn test_rejects_zero_bag_rounds() {
        let mut config = EnsembleConfig::default();
        config.bag.rounds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file() {
        let dir = tempdir().unwrap();
        let err = EnsembleConfig::from_file(dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, KolosalError::IoError(_)));
    }

    #[test]
    fn test_bad_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{\"family\": \"forest\"}").unwrap();
        assert!(matches!(
            EnsembleConfig::from_file(&path),
            Err(KolosalError::SerializationError(_))
        ));
    }
}
