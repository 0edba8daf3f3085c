//! Z-score normalization of the feature table.
//!
//! `fit` learns per-column mean and population standard deviation from a
//! reference matrix; `transform` applies `(x - mean) / std` column-wise. A
//! column whose standard deviation is zero maps to 0 rather than NaN/Inf.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::db::Database;

#[derive(Error, Debug)]
pub enum NormalizeError {
    #[error("cannot fit scaler on an empty table")]
    EmptyInput,
    #[error("row {row} has {found} values, expected {expected}")]
    Shape { row: usize, found: usize, expected: usize },
    #[error("scaler state is inconsistent: {0}")]
    InvalidState(String),
    #[error("no feature columns left after exclusions")]
    NoFeatureColumns,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Database error: {0}")]
    Db(#[from] crate::db::DbError),
}

/// Fitted per-column parameters. Fit once, applied read-only afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalerState {
    pub columns: Vec<String>,
    pub mean: Vec<f64>,
    /// Population standard deviation (ddof = 0) per column.
    pub scale: Vec<f64>,
}

impl ScalerState {
    /// Fit on `rows` (rows × columns). Non-finite inputs count as 0.
    pub fn fit(rows: &[Vec<f64>], columns: &[String]) -> Result<Self, NormalizeError> {
        if rows.is_empty() {
            return Err(NormalizeError::EmptyInput);
        }
        let dim = columns.len();
        check_shape(rows, dim)?;

        let n = rows.len() as f64;
        let mut mean = vec![0.0_f64; dim];
        for row in rows {
            for (d, &val) in row.iter().enumerate() {
                mean[d] += finite_or_zero(val);
            }
        }
        for m in &mut mean {
            *m /= n;
        }

        let mut var = vec![0.0_f64; dim];
        for row in rows {
            for (d, &val) in row.iter().enumerate() {
                let diff = finite_or_zero(val) - mean[d];
                var[d] += diff * diff;
            }
        }
        let scale = var.iter().map(|v| (v / n).sqrt()).collect();

        Ok(Self {
            columns: columns.to_vec(),
            mean,
            scale,
        })
    }

    /// Standardize `rows` with the fitted parameters.
    pub fn transform(&self, rows: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, NormalizeError> {
        self.validate()?;
        check_shape(rows, self.columns.len())?;
        Ok(rows.iter().map(|row| self.transform_row(row)).collect())
    }

    /// Standardize a single row; the caller guarantees its length.
    pub fn transform_row(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .zip(self.mean.iter().zip(&self.scale))
            .map(|(&x, (&m, &s))| {
                if s > 0.0 {
                    (finite_or_zero(x) - m) / s
                } else {
                    0.0
                }
            })
            .collect()
    }

    pub fn validate(&self) -> Result<(), NormalizeError> {
        let dim = self.columns.len();
        if self.mean.len() != dim || self.scale.len() != dim {
            return Err(NormalizeError::InvalidState(format!(
                "{} columns, {} means, {} scales",
                dim,
                self.mean.len(),
                self.scale.len()
            )));
        }
        if self.mean.iter().chain(&self.scale).any(|v| !v.is_finite()) {
            return Err(NormalizeError::InvalidState("non-finite parameter".into()));
        }
        if self.scale.iter().any(|&s| s < 0.0) {
            return Err(NormalizeError::InvalidState("negative scale".into()));
        }
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, NormalizeError> {
        let contents = std::fs::read_to_string(path)?;
        let state: ScalerState = serde_json::from_str(&contents)?;
        state.validate()?;
        Ok(state)
    }

    pub fn save(&self, path: &Path) -> Result<(), NormalizeError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Feature columns of a table: every column not on the denylist, in table order.
pub fn detect_feature_columns(table_columns: &[String], exclude: &[String]) -> Vec<String> {
    table_columns
        .iter()
        .filter(|c| !exclude.contains(c))
        .cloned()
        .collect()
}

/// Fit a scaler on the persisted table.
///
/// Uses `columns` when given, otherwise every column outside `exclude`.
pub fn fit_from_db(
    db: &Database,
    columns: Option<&[String]>,
    exclude: &[String],
) -> Result<ScalerState, NormalizeError> {
    let columns = match columns {
        Some(cols) => cols.to_vec(),
        None => detect_feature_columns(&db.column_names()?, exclude),
    };
    if columns.is_empty() {
        return Err(NormalizeError::NoFeatureColumns);
    }
    log::info!("Selected {} feature columns: {}", columns.len(), columns.join(", "));

    let rows = db.read_numeric_columns(&columns)?;
    let state = ScalerState::fit(&rows, &columns)?;
    log::info!("Fitted scaler on {} rows", rows.len());
    Ok(state)
}

fn check_shape(rows: &[Vec<f64>], expected: usize) -> Result<(), NormalizeError> {
    match rows.iter().position(|r| r.len() != expected) {
        Some(row) => Err(NormalizeError::Shape {
            row,
            found: rows[row].len(),
            expected,
        }),
        None => Ok(()),
    }
}

fn finite_or_zero(x: f64) -> f64 {
    if x.is_finite() { x } else { 0.0 }
}
