//! Fitted model artifacts consumed by the analytics engine.
//!
//! Models are trained elsewhere and exported as JSON; this module only loads,
//! validates and applies them.

pub mod clustering;
pub mod projection;

pub use clustering::ClusteringModel;
pub use projection::{LinearProjection, ProjectionModel};

use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::db::models::Feature;
use crate::normalize::{NormalizeError, ScalerState};

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("IO error reading {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid model file {}: {source}", path.display())]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("clustering model declares {declared} clusters but has {found} centroids")]
    ClusterCount { declared: usize, found: usize },
    #[error("clustering model has no clusters")]
    NoClusters,
    #[error("{what} has dimension {found}, expected {expected}")]
    Dimension {
        what: String,
        found: usize,
        expected: usize,
    },
    #[error("projection model has no {0}-dimensional projection")]
    MissingProjection(usize),
    #[error("non-finite value in {0}")]
    NonFinite(String),
    #[error("scaler columns [{}] do not match the feature columns", found.join(", "))]
    ScalerColumns { found: Vec<String> },
    #[error("scaler error: {0}")]
    Scaler(#[from] NormalizeError),
}

pub const SCALER_FILE: &str = "scaler.json";
pub const CLUSTERING_FILE: &str = "kmeans.json";
pub const PROJECTION_FILE: &str = "pca.json";

/// The three fitted artifacts, loaded together from one directory.
pub struct Artifacts {
    pub scaler: ScalerState,
    pub clustering: ClusteringModel,
    pub projection: ProjectionModel,
}

impl Artifacts {
    pub fn load(dir: &Path) -> Result<Self, ModelError> {
        let scaler = ScalerState::load(&dir.join(SCALER_FILE))?;
        let clustering = ClusteringModel::load(&dir.join(CLUSTERING_FILE))?;
        let projection = ProjectionModel::load(&dir.join(PROJECTION_FILE))?;
        log::info!(
            "Loaded models from {}: {} clusters, projections {:?}",
            dir.display(),
            clustering.n_clusters,
            projection.dimensions()
        );
        Ok(Self {
            scaler,
            clustering,
            projection,
        })
    }

    /// Check that the three artifacts agree with each other and with the
    /// five feature columns, in order.
    pub fn check_compatible(&self) -> Result<(), ModelError> {
        let expected: Vec<&str> = Feature::ALL.iter().map(|f| f.column()).collect();
        if self.scaler.columns != expected {
            return Err(ModelError::ScalerColumns {
                found: self.scaler.columns.clone(),
            });
        }
        if self.clustering.dimension() != Feature::COUNT {
            return Err(ModelError::Dimension {
                what: "clustering centroids".into(),
                found: self.clustering.dimension(),
                expected: Feature::COUNT,
            });
        }
        for dims in [2, 3] {
            let p = self.projection.get(dims)?;
            if p.input_dim() != Feature::COUNT {
                return Err(ModelError::Dimension {
                    what: format!("{dims}-dimensional projection input"),
                    found: p.input_dim(),
                    expected: Feature::COUNT,
                });
            }
        }
        Ok(())
    }
}

pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, ModelError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ModelError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&contents).map_err(|source| ModelError::Json {
        path: path.to_path_buf(),
        source,
    })
}

pub(crate) fn check_finite(what: &str, values: &[f64]) -> Result<(), ModelError> {
    if values.iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(ModelError::NonFinite(what.to_string()))
    }
}

/// Euclidean distance between two equal-length vectors.
pub fn euclidean(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

/// Identity scaler, two centroids and axis-aligned projections.
#[cfg(test)]
pub(crate) fn test_artifacts() -> Artifacts {
    let columns: Vec<String> = Feature::ALL.iter().map(|f| f.column().to_string()).collect();
    let axis = |i: usize| {
        let mut v = vec![0.0; Feature::COUNT];
        v[i] = 1.0;
        v
    };
    Artifacts {
        scaler: ScalerState {
            columns,
            mean: vec![0.0; Feature::COUNT],
            scale: vec![1.0; Feature::COUNT],
        },
        clustering: ClusteringModel::new(vec![vec![0.0; Feature::COUNT], vec![1.0; Feature::COUNT]]).unwrap(),
        projection: ProjectionModel::new(vec![
            LinearProjection {
                mean: vec![0.0; Feature::COUNT],
                components: vec![axis(0), axis(1)],
                explained_variance_ratio: Some(vec![0.6, 0.3]),
            },
            LinearProjection {
                mean: vec![0.0; Feature::COUNT],
                components: vec![axis(2), axis(3), axis(4)],
                explained_variance_ratio: None,
            },
        ])
        .unwrap(),
    }
}
