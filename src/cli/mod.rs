//! Kolosal Ensemble CLI Module
//!
//! Command-line interface for building stacking features and bagged
//! predictions from tabular files.

use clap::{Args, Parser, Subcommand};
use colored::*;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::config::{EnsembleConfig, ModelFamily};
use crate::ensemble::{bag_boosted_with, bag_predict_with, BagOptions, BagTask, StackedPredictions, StackingGeneralizer};
use crate::training::{
    CrossValidator, KNNClassifier, KNNRegressor, LightGBMModel, LogisticRegression, Mlp, XGBoostModel,
};
use crate::utils::{frame_to_arrays, load_frame};

// ─── Styling helpers ───────────────────────────────────────────────────────────

fn dim(s: &str) -> ColoredString { s.truecolor(100, 100, 100) }
fn accent(s: &str) -> ColoredString { s.truecolor(120, 170, 255) }
fn muted(s: &str) -> ColoredString { s.truecolor(140, 140, 140) }
fn ok(s: &str) -> ColoredString { s.truecolor(100, 210, 120) }

fn step_run(msg: &str) {
    print!("  {} {}... ", accent("›"), msg);
}

fn step_done(detail: &str) {
    println!("{} {}", ok("done"), dim(detail));
}

fn section(title: &str) {
    println!();
    println!("  {}", title.white().bold());
    println!("  {}", dim(&"─".repeat(56)));
}

fn kv(key: &str, val: &str) {
    println!("  {:<16} {}", muted(key), val.white());
}

// ─── CLI definition ────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "kolosal-ensemble")]
#[command(author = "KolosalAI")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "K-fold stacking and seed bagging for tabular models")]
#[command(long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Input files shared by both commands
#[derive(Args, Debug, Clone)]
pub struct DataArgs {
    /// Training data file (CSV, JSON, or Parquet)
    #[arg(long)]
    pub train: PathBuf,

    /// Test data file; the target column is ignored when present
    #[arg(long)]
    pub test: PathBuf,

    /// Target column name
    #[arg(short, long)]
    pub target: String,

    /// JSON run configuration
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Seed override
    #[arg(long)]
    pub seed: Option<u64>,

    /// Output JSON file
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Build out-of-fold training predictions and fold-averaged test predictions
    Stack {
        #[command(flatten)]
        data: DataArgs,

        /// Model family to stack
        #[arg(short, long, value_enum)]
        family: Option<ModelFamily>,

        /// Number of folds
        #[arg(long)]
        folds: Option<usize>,

        /// Integer group column for group k-fold
        #[arg(long)]
        groups: Option<String>,

        /// Continuous target: regression boosters and a linear MLP output
        #[arg(long)]
        regression: bool,
    },

    /// Average test predictions over refits on reshuffled training data
    Bag {
        #[command(flatten)]
        data: DataArgs,

        /// Model family to bag
        #[arg(short, long, value_enum)]
        family: Option<ModelFamily>,

        /// Number of bag rounds
        #[arg(long)]
        rounds: Option<usize>,

        /// Average raw predictions instead of class-1 probabilities
        #[arg(long)]
        regression: bool,

        /// Keep the model's own seed in every round
        #[arg(long)]
        no_update_seed: bool,
    },
}

/// JSON result of `stack`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackOutput {
    pub family: ModelFamily,
    pub n_folds: usize,
    pub s_train: Vec<f64>,
    pub s_test: Vec<f64>,
}

/// JSON result of `bag`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BagOutput {
    pub family: ModelFamily,
    pub rounds: usize,
    pub seed: u64,
    pub task: BagTask,
    pub predictions: Vec<f64>,
}

// ─── Data loading ──────────────────────────────────────────────────────────────

struct Dataset {
    x_train: Array2<f64>,
    y_train: Array1<f64>,
    x_test: Array2<f64>,
    groups: Option<Array1<i64>>,
}

fn load_dataset(args: &DataArgs, group_column: Option<&str>) -> anyhow::Result<Dataset> {
    step_run("Loading data");
    let start = Instant::now();
    let train_df = load_frame(&args.train)?;
    let test_df = load_frame(&args.test)?;

    let mut feature_names: Vec<String> = train_df
        .get_column_names()
        .into_iter()
        .map(|s| s.to_string())
        .filter(|name| name != &args.target)
        .collect();
    if let Some(group) = group_column {
        feature_names.retain(|name| name != group);
    }

    let train = frame_to_arrays(&train_df, Some(args.target.as_str()), Some(feature_names.as_slice()))?;
    let test = frame_to_arrays(&test_df, None, Some(feature_names.as_slice()))?;
    let y_train = train
        .target
        .ok_or_else(|| anyhow::anyhow!("target column '{}' missing from training data", args.target))?;

    let groups = match group_column {
        Some(group) => {
            let no_features: Vec<String> = Vec::new();
            let values = frame_to_arrays(&train_df, Some(group), Some(no_features.as_slice()))?
                .target
                .ok_or_else(|| anyhow::anyhow!("group column '{}' missing", group))?;
            Some(values.mapv(|v| v as i64))
        }
        None => None,
    };

    step_done(&format!(
        "{} train × {} test rows, {} features in {:?}",
        train.features.nrows(),
        test.features.nrows(),
        feature_names.len(),
        start.elapsed()
    ));

    Ok(Dataset {
        x_train: train.features,
        y_train,
        x_test: test.features,
        groups,
    })
}

fn load_config(path: Option<&Path>) -> anyhow::Result<EnsembleConfig> {
    Ok(match path {
        Some(path) => EnsembleConfig::from_file(path)?,
        None => EnsembleConfig::default(),
    })
}

fn write_json<T: Serialize>(value: &T, path: Option<&Path>) -> anyhow::Result<()> {
    if let Some(path) = path {
        let json = serde_json::to_string_pretty(value)?;
        std::fs::write(path, json)?;
        kv("Output", &path.display().to_string());
    }
    Ok(())
}

fn summarize(label: &str, values: &Array1<f64>) {
    let n = values.len().max(1) as f64;
    let mean = values.iter().sum::<f64>() / n;
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    kv(label, &format!("mean {:.4}  min {:.4}  max {:.4}", mean, min, max));
}

// ─── Commands ──────────────────────────────────────────────────────────────────

pub fn cmd_stack(
    data: &DataArgs,
    family: Option<ModelFamily>,
    folds: Option<usize>,
    groups: Option<&str>,
    regression: bool,
) -> anyhow::Result<()> {
    section("Stack");

    let mut config = load_config(data.config.as_deref())?;
    if let Some(family) = family {
        config.family = family;
    }
    if let Some(seed) = data.seed {
        config.seed = seed;
    }
    if let Some(n) = folds {
        config.folds = config.folds.with_n_splits(n);
    }
    if regression {
        config.set_task(BagTask::Regression);
    }
    config.validate()?;

    let dataset = load_dataset(data, groups)?;
    let plan = CrossValidator::new(config.folds.clone())
        .with_random_state(config.seed)
        .split(dataset.x_train.nrows(), Some(&dataset.y_train), dataset.groups.as_ref())?;
    let n_folds = plan.n_folds();

    let generalizer =
        StackingGeneralizer::new(dataset.x_train, dataset.x_test, dataset.y_train, plan, config.verbose)?;

    step_run(&format!("Stacking {} over {} folds", config.family.label().cyan(), n_folds));
    let start = Instant::now();
    let stacked = match config.family {
        ModelFamily::Xgboost => generalizer.run_xgboost_stacker(&config.xgboost, &config.boost)?,
        ModelFamily::Lightgbm => generalizer.run_lgbm_stacker(&config.lightgbm, &config.boost)?,
        ModelFamily::Nn => {
            let mlp = config.mlp.clone();
            generalizer.run_nn_stacker(|| Mlp::new(mlp.clone()), &config.nn)?
        }
        ModelFamily::Logistic => {
            let (s_train, s_test) = generalizer.run_other_stackers(&mut [LogisticRegression::new()])?;
            StackedPredictions {
                s_train: s_train.column(0).to_owned(),
                s_test: s_test.column(0).to_owned(),
            }
        }
        ModelFamily::Knn => {
            let (s_train, s_test) = generalizer.run_other_stackers(&mut [KNNClassifier::new(config.knn.clone())])?;
            StackedPredictions {
                s_train: s_train.column(0).to_owned(),
                s_test: s_test.column(0).to_owned(),
            }
        }
    };
    step_done(&format!("{:?}", start.elapsed()));

    println!();
    summarize("S_train", &stacked.s_train);
    summarize("S_test", &stacked.s_test);

    let output = StackOutput {
        family: config.family,
        n_folds,
        s_train: stacked.s_train.to_vec(),
        s_test: stacked.s_test.to_vec(),
    };
    write_json(&output, data.output.as_deref())?;
    println!();
    Ok(())
}

pub fn cmd_bag(
    data: &DataArgs,
    family: Option<ModelFamily>,
    rounds: Option<usize>,
    regression: bool,
    no_update_seed: bool,
) -> anyhow::Result<()> {
    section("Bag");

    let mut config = load_config(data.config.as_deref())?;
    if let Some(family) = family {
        config.family = family;
    }
    if let Some(seed) = data.seed {
        config.seed = seed;
    }
    if let Some(rounds) = rounds {
        config.bag.rounds = rounds;
    }
    if regression {
        config.bag.task = BagTask::Regression;
    }
    if no_update_seed {
        config.bag.update_seed = false;
    }
    config.validate()?;

    let task = config.bag.task;
    config.set_task(task);

    let dataset = load_dataset(data, None)?;
    let options = BagOptions {
        progress: config.bag.progress,
    };
    let (x, y, x_test) = (&dataset.x_train, &dataset.y_train, &dataset.x_test);
    let (seed, n_rounds, update_seed) = (config.seed, config.bag.rounds, config.bag.update_seed);
    let num_boost_round = config.boost.num_boost_round;

    println!("  {} Bagging {} over {} rounds", accent("›"), config.family.label().cyan(), n_rounds);
    let start = Instant::now();
    let predictions = match (config.family, task) {
        (ModelFamily::Lightgbm, _) if !update_seed => {
            let mut model = LightGBMModel::new(config.lightgbm.clone(), num_boost_round);
            bag_predict_with(x, y, &mut model, seed, n_rounds, x_test, false, task, options)?
        }
        (ModelFamily::Lightgbm, _) => {
            bag_boosted_with(x, y, seed, n_rounds, &config.lightgbm, x_test, num_boost_round, options)?
        }
        (ModelFamily::Xgboost, _) => {
            let mut model = XGBoostModel::new(config.xgboost.clone(), num_boost_round);
            bag_predict_with(x, y, &mut model, seed, n_rounds, x_test, update_seed, task, options)?
        }
        (ModelFamily::Nn, _) => {
            let mut model = Mlp::new(config.mlp.clone());
            bag_predict_with(x, y, &mut model, seed, n_rounds, x_test, update_seed, task, options)?
        }
        (ModelFamily::Logistic, _) => {
            let mut model = LogisticRegression::new();
            bag_predict_with(x, y, &mut model, seed, n_rounds, x_test, update_seed, task, options)?
        }
        (ModelFamily::Knn, BagTask::Classification) => {
            let mut model = KNNClassifier::new(config.knn.clone());
            bag_predict_with(x, y, &mut model, seed, n_rounds, x_test, update_seed, task, options)?
        }
        (ModelFamily::Knn, BagTask::Regression) => {
            let mut model = KNNRegressor::new(config.knn.clone());
            bag_predict_with(x, y, &mut model, seed, n_rounds, x_test, update_seed, task, options)?
        }
    };
    println!("  {} {}", ok("done"), dim(&format!("{:?}", start.elapsed())));

    println!();
    summarize("Predictions", &predictions);

    let output = BagOutput {
        family: config.family,
        rounds: n_rounds,
        seed,
        task,
        predictions: predictions.to_vec(),
    };
    write_json(&output, data.output.as_deref())?;
    println!();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    fn write_csv(path: &Path, rows: usize, offset: usize) {
        let mut file = std::fs::File::create(path).unwrap();
        writeln!(file, "a,b,y").unwrap();
        for i in 0..rows {
            let a = (i + offset) as f64 / 10.0;
            let b = ((i * 7 + offset) % 11) as f64;
            let y = if a > rows as f64 / 20.0 { 1.0 } else { 0.0 };
            writeln!(file, "{},{},{}", a, b, y).unwrap();
        }
    }

    fn data_args(dir: &Path, output: &str) -> DataArgs {
        write_csv(&dir.join("train.csv"), 60, 0);
        write_csv(&dir.join("test.csv"), 10, 3);
        DataArgs {
            train: dir.join("train.csv"),
            test: dir.join("test.csv"),
            target: "y".to_string(),
            config: None,
            seed: Some(7),
            output: Some(dir.join(output)),
        }
    }

    #[test]
    fn test_cli_parses_stack() {
        let cli = Cli::try_parse_from([
            "kolosal-ensemble",
            "stack",
            "--train",
            "tr.csv",
            "--test",
            "te.csv",
            "--target",
            "y",
            "--family",
            "xgboost",
            "--folds",
            "3",
        ])
        .unwrap();
        match cli.command {
            Commands::Stack { data, family, folds, .. } => {
                assert_eq!(data.target, "y");
                assert_eq!(family, Some(ModelFamily::Xgboost));
                assert_eq!(folds, Some(3));
            }
            _ => panic!("expected stack"),
        }
    }

    #[test]
    fn test_cli_parses_bag_flags() {
        let cli = Cli::try_parse_from([
            "kolosal-ensemble",
            "bag",
            "--train",
            "tr.csv",
            "--test",
            "te.csv",
            "-t",
            "y",
            "--family",
            "knn",
            "--rounds",
            "4",
            "--regression",
            "--no-update-seed",
        ])
        .unwrap();
        match cli.command {
            Commands::Bag { family, rounds, regression, no_update_seed, .. } => {
                assert_eq!(family, Some(ModelFamily::Knn));
                assert_eq!(rounds, Some(4));
                assert!(regression);
                assert!(no_update_seed);
            }
            _ => panic!("expected bag"),
        }
    }

    #[test]
    fn test_cmd_stack_writes_output() {
        let dir = tempdir().unwrap();
        let args = data_args(dir.path(), "stack.json");
        cmd_stack(&args, Some(ModelFamily::Logistic), Some(3), None, false).unwrap();

        let json = std::fs::read_to_string(dir.path().join("stack.json")).unwrap();
        let output: StackOutput = serde_json::from_str(&json).unwrap();
        assert_eq!(output.n_folds, 3);
        assert_eq!(output.s_train.len(), 60);
        assert_eq!(output.s_test.len(), 10);
        assert!(output.s_train.iter().all(|p| (0.0..=1.0).contains(p)));
    }

    /// Features in [0, 1), target 10a + 5
    fn regression_args(dir: &Path, output: &str) -> DataArgs {
        for (name, rows, offset) in [("train.csv", 60, 0), ("test.csv", 10, 3)] {
            let mut file = std::fs::File::create(dir.join(name)).unwrap();
            writeln!(file, "a,b,y").unwrap();
            for i in 0..rows {
                let a = ((i + offset) % 60) as f64 / 60.0;
                let b = ((i * 7 + offset) % 11) as f64 / 11.0;
                writeln!(file, "{},{},{}", a, b, 10.0 * a + 5.0).unwrap();
            }
        }
        // Keep fold checkpoints inside the temp dir
        let mut config = EnsembleConfig::default();
        config.nn.saved_path = format!("{}/", dir.display());
        config.nn.epochs = 40;
        config.save(dir.join("run.json")).unwrap();
        DataArgs {
            train: dir.join("train.csv"),
            test: dir.join("test.csv"),
            target: "y".to_string(),
            config: Some(dir.join("run.json")),
            seed: Some(7),
            output: Some(dir.join(output)),
        }
    }

    #[test]
    fn test_cmd_stack_nn_regression_keeps_target_scale() {
        let dir = tempdir().unwrap();
        let args = regression_args(dir.path(), "stack.json");
        cmd_stack(&args, Some(ModelFamily::Nn), Some(3), None, true).unwrap();

        let json = std::fs::read_to_string(dir.path().join("stack.json")).unwrap();
        let output: StackOutput = serde_json::from_str(&json).unwrap();
        assert_eq!(output.s_train.len(), 60);
        assert!(output.s_train.iter().any(|&p| p > 1.0), "{:?}", output.s_train);
    }

    #[test]
    fn test_cmd_stack_nn_rejects_continuous_target_without_regression() {
        let dir = tempdir().unwrap();
        let args = regression_args(dir.path(), "stack.json");
        assert!(cmd_stack(&args, Some(ModelFamily::Nn), Some(3), None, false).is_err());
    }

    #[test]
    fn test_cmd_bag_nn_regression_keeps_target_scale() {
        let dir = tempdir().unwrap();
        let args = regression_args(dir.path(), "bag.json");
        cmd_bag(&args, Some(ModelFamily::Nn), Some(2), true, false).unwrap();

        let json = std::fs::read_to_string(dir.path().join("bag.json")).unwrap();
        let output: BagOutput = serde_json::from_str(&json).unwrap();
        let mean = output.predictions.iter().sum::<f64>() / output.predictions.len() as f64;
        assert!(mean > 5.0 && mean < 15.0, "mean prediction {}", mean);
    }

    #[test]
    fn test_cmd_bag_writes_output() {
        let dir = tempdir().unwrap();
        let args = data_args(dir.path(), "bag.json");
        cmd_bag(&args, Some(ModelFamily::Knn), Some(2), true, false).unwrap();

        let json = std::fs::read_to_string(dir.path().join("bag.json")).unwrap();
        let output: BagOutput = serde_json::from_str(&json).unwrap();
        assert_eq!(output.rounds, 2);
        assert_eq!(output.seed, 7);
        assert_eq!(output.task, BagTask::Regression);
        assert_eq!(output.predictions.len(), 10);
    }
}
