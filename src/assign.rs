//! Apply the fitted clustering and projection models to the persisted table.

use thiserror::Error;

use crate::db::models::Assignment;
use crate::db::{Database, DbError};
use crate::model::{Artifacts, ModelError};
use crate::normalize::NormalizeError;

#[derive(Error, Debug)]
pub enum AssignError {
    #[error("Database error: {0}")]
    Db(#[from] DbError),
    #[error("Model error: {0}")]
    Model(#[from] ModelError),
    #[error("Normalize error: {0}")]
    Normalize(#[from] NormalizeError),
    #[error("feature table is empty (run `genrescope extract` first)")]
    EmptyTable,
}

pub struct AssignResult {
    pub assigned: usize,
    /// Member count per cluster id.
    pub cluster_sizes: Vec<usize>,
    /// Missing feature cells that were read as 0.
    pub filled_cells: usize,
}

/// Assign every row to its nearest centroid and store its 2D/3D coordinates.
pub fn assign_clusters(db: &Database, artifacts: &Artifacts) -> Result<AssignResult, AssignError> {
    artifacts.check_compatible()?;

    let loaded = db.load_feature_table()?;
    if loaded.table.is_empty() {
        return Err(AssignError::EmptyTable);
    }

    let normalized = artifacts.scaler.transform(&loaded.table.matrix())?;
    let coords_2d = artifacts.projection.transform(&normalized, 2)?;
    let coords_3d = artifacts.projection.transform(&normalized, 3)?;

    let mut cluster_sizes = vec![0; artifacts.clustering.n_clusters];
    let assignments: Vec<Assignment> = loaded
        .ids
        .iter()
        .zip(&normalized)
        .zip(coords_2d.iter().zip(&coords_3d))
        .map(|((&row_id, row), (p2, p3))| {
            let cluster = artifacts.clustering.predict(row);
            cluster_sizes[cluster] += 1;
            Assignment {
                row_id,
                cluster,
                pca_2d: [p2[0], p2[1]],
                pca_3d: [p3[0], p3[1], p3[2]],
            }
        })
        .collect();

    db.store_assignments(&assignments)?;
    log::info!(
        "Assigned {} rows to {} clusters",
        assignments.len(),
        cluster_sizes.len()
    );

    Ok(AssignResult {
        assigned: assignments.len(),
        cluster_sizes,
        filled_cells: loaded.filled_cells,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{FeatureRecord, FeatureTable, FeatureValues};
    use crate::model::test_artifacts;

    fn row(filename: &str, genre: &str, v: f64) -> FeatureRecord {
        FeatureRecord {
            filename: filename.to_string(),
            genre: genre.to_string(),
            features: FeatureValues::from_array([v, v, v, v, v]),
        }
    }

    #[test]
    fn test_assign_writes_clusters_and_coordinates() {
        let db = Database::open_in_memory().unwrap();
        db.replace_feature_table(&FeatureTable {
            rows: vec![
                row("a.wav", "rock", 0.1),
                row("b.wav", "jazz", 0.9),
                row("c.wav", "rock", 0.2),
            ],
        })
        .unwrap();

        let result = assign_clusters(&db, &test_artifacts()).unwrap();
        assert_eq!(result.assigned, 3);
        assert_eq!(result.cluster_sizes, vec![2, 1]);
        assert_eq!(result.filled_cells, 0);

        let corpus = db.load_corpus().unwrap();
        let clusters: Vec<i64> = corpus.iter().map(|r| r.cluster).collect();
        assert_eq!(clusters, vec![0, 1, 0]);
        // Identity scaler and axis-aligned projections pass values through
        assert_eq!(corpus[1].pca_2d, [0.9, 0.9]);
        assert_eq!(corpus[1].pca_3d, [0.9, 0.9, 0.9]);
    }

    #[test]
    fn test_assign_is_repeatable() {
        let db = Database::open_in_memory().unwrap();
        db.replace_feature_table(&FeatureTable {
            rows: vec![row("a.wav", "rock", 0.1), row("b.wav", "jazz", 0.9)],
        })
        .unwrap();

        assign_clusters(&db, &test_artifacts()).unwrap();
        let first = db.load_corpus().unwrap();
        assign_clusters(&db, &test_artifacts()).unwrap();
        assert_eq!(db.load_corpus().unwrap(), first);
    }

    #[test]
    fn test_empty_table_rejected() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(
            assign_clusters(&db, &test_artifacts()),
            Err(AssignError::EmptyTable)
        ));
    }

    #[test]
    fn test_incompatible_scaler_rejected() {
        let db = Database::open_in_memory().unwrap();
        let mut artifacts = test_artifacts();
        artifacts.scaler.columns[4] = "length".into();
        assert!(matches!(
            assign_clusters(&db, &artifacts),
            Err(AssignError::Model(ModelError::ScalerColumns { .. }))
        ));
    }
}
