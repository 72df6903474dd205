//! Kolosal Ensemble - out-of-fold stacking and seed bagging
//!
//! This crate turns a set of base learners into ensemble features:
//! - K-fold stacking: out-of-fold predictions for the training set and
//!   fold-averaged predictions for the test set
//! - Bagging: test predictions averaged over refits on reshuffled training data
//! - Built-in base learners: two gradient boosting flavours, an MLP with
//!   checkpointing callbacks, linear models and KNN
//!
//! # Modules
//!
//! - [`ensemble`] - Stacking generalizer and bagging functions
//! - [`training`] - Trainer contracts, built-in trainers, fold plans
//! - [`config`] - JSON run configuration
//! - [`utils`] - Row selection, shuffling, timing, data loading
//! - [`cli`] - Command-line interface

// Core error handling
pub mod error;

// Ensembles and the learners they combine
pub mod ensemble;
pub mod training;

// Configuration and helpers
pub mod config;
pub mod utils;

// Services
pub mod cli;

pub use error::{KolosalError, Result};

/// Re-export commonly used types
pub mod prelude {
    // Error handling
    pub use crate::error::{KolosalError, Result};

    // Ensembles
    pub use crate::ensemble::{
        bag_boosted, bag_predict, BagOptions, BagTask, FoldData, NnStackOptions, StackedPredictions,
        StackingGeneralizer,
    };

    // Training contracts and fold plans
    pub use crate::training::{
        positive_class_probability, CVSplit, CVStrategy, CrossValidator, Estimator, FoldPlan, Network, Trainer,
    };

    // Built-in learners
    pub use crate::training::{
        BoostOptions, Booster, KNNClassifier, KNNRegressor, LightGBMConfig, LightGBMModel, LogisticRegression, Mlp,
        MlpConfig, RidgeRegression, XGBoostConfig, XGBoostModel,
    };

    // Configuration
    pub use crate::config::{EnsembleConfig, ModelFamily};
}
