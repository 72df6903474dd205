//! Ensemble methods module
//!
//! - Out-of-fold stacking over a fixed fold plan ([`StackingGeneralizer`])
//! - Seed bagging over reshuffled training sets ([`bag_predict`], [`bag_boosted`])

pub mod bagging;
mod stacking;

pub use bagging::{bag_boosted, bag_boosted_with, bag_predict, bag_predict_with, BagOptions, BagTask};
pub use stacking::{FoldData, NnStackOptions, StackedPredictions, StackingGeneralizer};
