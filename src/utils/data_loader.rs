//! Data loading utilities
//!
//! Reads tabular files into polars frames and converts them into the dense
//! `ndarray` matrices the stacking and bagging routines consume.

use crate::error::{KolosalError, Result};
use ndarray::{Array1, Array2};
use polars::prelude::*;
use std::fs::File;
use std::path::Path;

/// Load a CSV, JSON or Parquet file, dispatching on the file extension.
pub fn load_frame(path: &Path) -> Result<DataFrame> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    let df = match ext.as_str() {
        "csv" | "tsv" => {
            let separator = if ext == "tsv" { b'\t' } else { b',' };
            CsvReadOptions::default()
                .with_has_header(true)
                .with_infer_schema_length(Some(1000))
                .with_parse_options(CsvParseOptions::default().with_separator(separator))
                .try_into_reader_with_file_path(Some(path.to_path_buf()))?
                .finish()?
        }
        "json" => JsonReader::new(File::open(path)?).finish()?,
        "parquet" | "pq" => ParquetReader::new(File::open(path)?).finish()?,
        other => {
            return Err(KolosalError::DataError(format!(
                "unsupported file format: '{}' ({})",
                other,
                path.display()
            )))
        }
    };

    Ok(df)
}

/// Dense arrays extracted from a frame.
#[derive(Debug, Clone)]
pub struct FrameArrays {
    pub features: Array2<f64>,
    pub target: Option<Array1<f64>>,
    pub feature_names: Vec<String>,
}

/// Split a frame into a feature matrix and an optional target vector.
///
/// When `feature_names` is `None` every column except `target` becomes a
/// feature. Missing values are read as 0.0.
pub fn frame_to_arrays(
    df: &DataFrame,
    target: Option<&str>,
    feature_names: Option<&[String]>,
) -> Result<FrameArrays> {
    let feature_names: Vec<String> = match feature_names {
        Some(cols) => cols.to_vec(),
        None => df
            .get_column_names()
            .into_iter()
            .filter(|name| Some(name.as_str()) != target)
            .map(|s| s.to_string())
            .collect(),
    };

    let target = match target {
        Some(name) => Some(Array1::from_vec(column_values(df, name)?)),
        None => None,
    };

    let col_data: Vec<Vec<f64>> = feature_names
        .iter()
        .map(|name| column_values(df, name))
        .collect::<Result<_>>()?;

    // Row-major construction from column-major polars storage
    let features = Array2::from_shape_fn((df.height(), col_data.len()), |(r, c)| col_data[c][r]);

    Ok(FrameArrays {
        features,
        target,
        feature_names,
    })
}

fn column_values(df: &DataFrame, name: &str) -> Result<Vec<f64>> {
    let column = df
        .column(name)
        .map_err(|_| KolosalError::DataError(format!("column not found: {}", name)))?;
    let column = column.cast(&DataType::Float64)?;
    Ok(column.f64()?.into_iter().map(|v| v.unwrap_or(0.0)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_frame_to_arrays_splits_target() {
        let df = df!(
            "a" => &[1.0, 2.0, 3.0],
            "b" => &[4, 5, 6],
            "y" => &[0.0, 1.0, 0.0]
        )
        .unwrap();

        let arrays = frame_to_arrays(&df, Some("y"), None).unwrap();
        assert_eq!(arrays.feature_names, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(arrays.features.dim(), (3, 2));
        assert_eq!(arrays.features[[2, 1]], 6.0);
        assert_eq!(arrays.target.unwrap().to_vec(), vec![0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_frame_to_arrays_missing_column() {
        let df = df!("a" => &[1.0]).unwrap();
        assert!(frame_to_arrays(&df, Some("target"), None).is_err());
    }

    #[test]
    fn test_load_csv() {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(file, "x1,x2,target").unwrap();
        writeln!(file, "1.0,2.0,0").unwrap();
        writeln!(file, "3.0,4.0,1").unwrap();
        file.flush().unwrap();

        let df = load_frame(file.path()).unwrap();
        assert_eq!(df.height(), 2);
        let arrays = frame_to_arrays(&df, Some("target"), None).unwrap();
        assert_eq!(arrays.features[[1, 0]], 3.0);
    }

    #[test]
    fn test_unsupported_extension() {
        let err = load_frame(Path::new("data.xlsx")).unwrap_err();
        assert!(matches!(err, KolosalError::DataError(_)));
    }
}
