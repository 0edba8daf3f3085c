use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{check_finite, read_json, ModelError};

/// One fitted linear reduction (PCA): `y = (x - mean) · componentsᵀ`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearProjection {
    pub mean: Vec<f64>,
    /// One axis per output dimension, each spanning every input feature.
    pub components: Vec<Vec<f64>>,
    /// Fraction of variance captured by each axis, if the exporter provided it.
    #[serde(default)]
    pub explained_variance_ratio: Option<Vec<f64>>,
}

impl LinearProjection {
    pub fn output_dim(&self) -> usize {
        self.components.len()
    }

    pub fn input_dim(&self) -> usize {
        self.mean.len()
    }

    fn validate(&self) -> Result<(), ModelError> {
        let d = self.output_dim();
        let what = format!("{d}-dimensional projection");
        check_finite(&what, &self.mean)?;
        for axis in &self.components {
            if axis.len() != self.input_dim() {
                return Err(ModelError::Dimension {
                    what: format!("axis of the {what}"),
                    found: axis.len(),
                    expected: self.input_dim(),
                });
            }
            check_finite(&what, axis)?;
        }
        if let Some(ratio) = &self.explained_variance_ratio {
            if ratio.len() != d {
                return Err(ModelError::Dimension {
                    what: format!("explained variance of the {what}"),
                    found: ratio.len(),
                    expected: d,
                });
            }
        }
        Ok(())
    }

    pub fn project_row(&self, row: &[f64]) -> Vec<f64> {
        self.components
            .iter()
            .map(|axis| {
                row.iter()
                    .zip(&self.mean)
                    .zip(axis)
                    .map(|((x, m), w)| (x - m) * w)
                    .sum()
            })
            .collect()
    }
}

/// Set of independently fitted projections, keyed by output dimensionality.
///
/// The 2D and 3D views come from separate fits, so the 2D coordinates are not
/// the first two columns of the 3D ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionModel {
    pub projections: Vec<LinearProjection>,
}

impl ProjectionModel {
    pub fn new(projections: Vec<LinearProjection>) -> Result<Self, ModelError> {
        let model = Self { projections };
        model.validate()?;
        Ok(model)
    }

    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let model: ProjectionModel = read_json(path)?;
        model.validate()?;
        Ok(model)
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        for p in &self.projections {
            p.validate()?;
        }
        Ok(())
    }

    /// Output dimensionalities on offer, in file order.
    pub fn dimensions(&self) -> Vec<usize> {
        self.projections.iter().map(|p| p.output_dim()).collect()
    }

    /// The fit associated with `dims` output axes.
    pub fn get(&self, dims: usize) -> Result<&LinearProjection, ModelError> {
        self.projections
            .iter()
            .find(|p| p.output_dim() == dims)
            .ok_or(ModelError::MissingProjection(dims))
    }

    /// Project `rows × features` to `rows × dims`.
    pub fn transform(&self, rows: &[Vec<f64>], dims: usize) -> Result<Vec<Vec<f64>>, ModelError> {
        let p = self.get(dims)?;
        if let Some(bad) = rows.iter().find(|r| r.len() != p.input_dim()) {
            return Err(ModelError::Dimension {
                what: "projection input row".into(),
                found: bad.len(),
                expected: p.input_dim(),
            });
        }
        Ok(rows.iter().map(|r| p.project_row(r)).collect())
    }
}
