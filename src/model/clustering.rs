use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{check_finite, euclidean, read_json, ModelError};

/// Centroid-based clustering model (e.g. k-means) in normalized feature space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusteringModel {
    pub n_clusters: usize,
    /// One centroid per cluster id, each with one value per feature.
    pub centroids: Vec<Vec<f64>>,
}

impl ClusteringModel {
    pub fn new(centroids: Vec<Vec<f64>>) -> Result<Self, ModelError> {
        let model = Self {
            n_clusters: centroids.len(),
            centroids,
        };
        model.validate()?;
        Ok(model)
    }

    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let model: ClusteringModel = read_json(path)?;
        model.validate()?;
        Ok(model)
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        if self.n_clusters != self.centroids.len() {
            return Err(ModelError::ClusterCount {
                declared: self.n_clusters,
                found: self.centroids.len(),
            });
        }
        if self.n_clusters == 0 {
            return Err(ModelError::NoClusters);
        }
        let dim = self.centroids[0].len();
        for (id, c) in self.centroids.iter().enumerate() {
            if c.len() != dim {
                return Err(ModelError::Dimension {
                    what: format!("centroid {id}"),
                    found: c.len(),
                    expected: dim,
                });
            }
            check_finite(&format!("centroid {id}"), c)?;
        }
        Ok(())
    }

    /// Number of features each centroid spans.
    pub fn dimension(&self) -> usize {
        self.centroids.first().map_or(0, |c| c.len())
    }

    pub fn centroid(&self, id: usize) -> Option<&[f64]> {
        self.centroids.get(id).map(|c| c.as_slice())
    }

    /// Nearest centroid to a normalized row; the lowest id wins ties.
    pub fn predict(&self, row: &[f64]) -> usize {
        let mut best = 0;
        let mut best_dist = f64::INFINITY;
        for (id, c) in self.centroids.iter().enumerate() {
            let d = euclidean(row, c);
            if d < best_dist {
                best = id;
                best_dist = d;
            }
        }
        best
    }
}
