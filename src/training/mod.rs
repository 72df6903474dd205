//! Model training module
//!
//! Trainer contracts used by the ensemble routines and the built-in
//! trainers that implement them:
//! - Gradient boosting: XGBoost-style (depth-wise) and LightGBM-style (leaf-wise)
//! - Neural network (MLP) with epoch callbacks
//! - Logistic and ridge regression
//! - K-Nearest Neighbors
//! - Fold generation for cross-validated stacking

mod models;
pub mod boosting;
pub mod callbacks;
pub mod cross_validation;
pub mod knn;
pub mod lightgbm;
pub mod linear_models;
pub mod neural_network;
pub mod xgboost;

pub use models::{positive_class_column, positive_class_probability, Estimator, Trainer};
pub use boosting::{BoostOptions, Booster, EvalMetric, Objective, VerboseEval};
pub use callbacks::{checkpoint_callbacks, load_checkpoint, Callback, CallbackAction, ModelCheckpoint};
pub use cross_validation::{CVSplit, CVStrategy, CrossValidator, FoldPlan};
pub use knn::{DistanceMetric, KNNClassifier, KNNConfig, KNNRegressor, WeightScheme};
pub use lightgbm::{BoostingType, LightGBMConfig, LightGBMModel, LightGBMTrainer};
pub use linear_models::{LogisticRegression, RidgeRegression};
pub use neural_network::{fit_network, Activation, EpochLogs, FitOptions, Mlp, MlpConfig, Network, NetworkState, Output};
pub use xgboost::{XGBoostConfig, XGBoostModel, XGBoostTrainer};
