//! Cluster analytics over an assigned corpus.
//!
//! The engine is built once from the persisted corpus and the fitted
//! artifacts, validates them against each other, and then answers read-only
//! queries. Distances are measured in normalized feature space; summaries
//! and ranges are reported over the raw feature values.

pub mod stats;
pub mod views;

pub use views::*;

use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

use crate::db::models::{CorpusRow, Feature};
use crate::db::{Database, DbError};
use crate::model::{euclidean, Artifacts, ModelError};
use crate::normalize::NormalizeError;

/// Representative songs returned with a cluster detail.
pub const MOST_SIMILAR_COUNT: usize = 10;

/// Upper bound on search results.
pub const SEARCH_LIMIT: usize = 50;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid cluster id {id} (valid ids are 0..{clusters})")]
    InvalidClusterId { id: i64, clusters: usize },
    #[error("row {row} is assigned to cluster {cluster}, but the model has {clusters} clusters")]
    AssignmentOutOfRange { row: usize, cluster: i64, clusters: usize },
    #[error("Model error: {0}")]
    Model(#[from] ModelError),
    #[error("Normalize error: {0}")]
    Normalize(#[from] NormalizeError),
    #[error("Database error: {0}")]
    Db(#[from] DbError),
}

pub type Result<T> = std::result::Result<T, EngineError>;

pub struct ClusterEngine {
    rows: Vec<CorpusRow>,
    /// Cluster id per row, range-checked.
    assignments: Vec<usize>,
    normalized: Vec<Vec<f64>>,
    /// Row indices per cluster id, in row order.
    members: Vec<Vec<usize>>,
    artifacts: Artifacts,
}

impl ClusterEngine {
    pub fn new(rows: Vec<CorpusRow>, artifacts: Artifacts) -> Result<Self> {
        artifacts.check_compatible()?;
        let k = artifacts.clustering.n_clusters;

        let mut assignments = Vec::with_capacity(rows.len());
        let mut members = vec![Vec::new(); k];
        for (i, row) in rows.iter().enumerate() {
            let cluster = usize::try_from(row.cluster)
                .ok()
                .filter(|&c| c < k)
                .ok_or(EngineError::AssignmentOutOfRange {
                    row: i,
                    cluster: row.cluster,
                    clusters: k,
                })?;
            assignments.push(cluster);
            members[cluster].push(i);
        }

        let raw: Vec<Vec<f64>> = rows
            .iter()
            .map(|r| r.record.features.to_array().to_vec())
            .collect();
        let normalized = artifacts.scaler.transform(&raw)?;

        log::debug!("Engine ready: {} songs in {} clusters", rows.len(), k);
        Ok(Self {
            rows,
            assignments,
            normalized,
            members,
            artifacts,
        })
    }

    /// Load the corpus from `db` and the artifacts from `models_dir`.
    pub fn open(db: &Database, models_dir: &Path) -> Result<Self> {
        let artifacts = Artifacts::load(models_dir)?;
        let rows = db.load_corpus()?;
        Self::new(rows, artifacts)
    }

    pub fn n_clusters(&self) -> usize {
        self.members.len()
    }

    pub fn total_songs(&self) -> usize {
        self.rows.len()
    }

    fn check_id(&self, id: i64) -> Result<usize> {
        usize::try_from(id)
            .ok()
            .filter(|&c| c < self.n_clusters())
            .ok_or(EngineError::InvalidClusterId {
                id,
                clusters: self.n_clusters(),
            })
    }

    pub fn cluster_summary(&self, id: i64) -> Result<ClusterSummary> {
        let cluster = self.check_id(id)?;
        Ok(self.summarize(cluster))
    }

    fn summarize(&self, cluster: usize) -> ClusterSummary {
        let members = &self.members[cluster];
        let total = self.total_songs();
        let percentage = if total == 0 {
            0.0
        } else {
            members.len() as f64 / total as f64 * 100.0
        };

        let features = Feature::ALL
            .iter()
            .map(|&feature| {
                let values: Vec<f64> = members
                    .iter()
                    .map(|&i| self.rows[i].record.features.get(feature))
                    .collect();
                FeatureStat {
                    feature,
                    mean: stats::mean(&values),
                    std: stats::sample_std(&values),
                }
            })
            .collect();

        let mut counts: HashMap<&str, usize> = HashMap::new();
        for &i in members {
            *counts.entry(self.rows[i].record.genre.as_str()).or_default() += 1;
        }
        let mut genres: Vec<GenreCount> = counts
            .into_iter()
            .map(|(genre, count)| GenreCount {
                genre: genre.to_string(),
                count,
            })
            .collect();
        genres.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.genre.cmp(&b.genre)));

        ClusterSummary {
            cluster_id: cluster,
            song_count: members.len(),
            percentage,
            features,
            genres,
        }
    }

    /// Summaries of every cluster, in id order.
    pub fn clusters(&self) -> ClusterOverview {
        ClusterOverview {
            total_songs: self.total_songs(),
            total_clusters: self.n_clusters(),
            clusters: (0..self.n_clusters()).map(|c| self.summarize(c)).collect(),
        }
    }

    /// Summary plus every member ranked by distance to the centroid.
    pub fn cluster_detail(&self, id: i64) -> Result<ClusterDetail> {
        let cluster = self.check_id(id)?;
        let centroid = self
            .artifacts
            .clustering
            .centroid(cluster)
            .ok_or(EngineError::InvalidClusterId {
                id,
                clusters: self.n_clusters(),
            })?;

        let mut songs: Vec<SongDistance> = self.members[cluster]
            .iter()
            .map(|&i| {
                let record = &self.rows[i].record;
                SongDistance {
                    filename: record.filename.clone(),
                    genre: record.genre.clone(),
                    distance_from_centroid: euclidean(&self.normalized[i], centroid),
                    features: record.features,
                }
            })
            .collect();
        // Stable, so equal distances keep row order
        songs.sort_by(|a, b| a.distance_from_centroid.total_cmp(&b.distance_from_centroid));

        let most_similar_songs = songs.iter().take(MOST_SIMILAR_COUNT).cloned().collect();
        Ok(ClusterDetail {
            summary: self.summarize(cluster),
            songs,
            most_similar_songs,
        })
    }

    /// Every member in row order, with its stored projection coordinates.
    pub fn cluster_songs(&self, id: i64) -> Result<Vec<ClusterSong>> {
        let cluster = self.check_id(id)?;
        Ok(self.members[cluster]
            .iter()
            .map(|&i| {
                let row = &self.rows[i];
                ClusterSong {
                    filename: row.record.filename.clone(),
                    genre: row.record.genre.clone(),
                    cluster,
                    features: row.record.features,
                    pca_2d: row.pca_2d,
                    pca_3d: row.pca_3d,
                }
            })
            .collect())
    }

    /// Songs and centroids on the 2D axes and, separately, the 3D axes.
    pub fn projection(&self) -> Result<Projection> {
        Ok(Projection {
            pca_2d: self.project(2)?,
            pca_3d: self.project(3)?,
        })
    }

    fn project(&self, dims: usize) -> Result<ProjectionView> {
        let model = &self.artifacts.projection;
        let coords = model.transform(&self.normalized, dims)?;
        let centroid_coords = model.transform(&self.artifacts.clustering.centroids, dims)?;

        let points = self
            .rows
            .iter()
            .zip(&self.assignments)
            .zip(coords)
            .map(|((row, &cluster), coords)| ProjectedPoint {
                filename: row.record.filename.clone(),
                genre: row.record.genre.clone(),
                cluster,
                coords,
            })
            .collect();
        let centroids = centroid_coords
            .into_iter()
            .enumerate()
            .map(|(cluster, coords)| ProjectedCentroid { cluster, coords })
            .collect();

        Ok(ProjectionView {
            dims,
            points,
            centroids,
            explained_variance_ratio: model.get(dims)?.explained_variance_ratio.clone(),
        })
    }

    pub fn overall_statistics(&self) -> OverallStatistics {
        let feature_ranges = Feature::ALL
            .iter()
            .map(|&feature| {
                let values: Vec<f64> = self
                    .rows
                    .iter()
                    .map(|r| r.record.features.get(feature))
                    .collect();
                FeatureRange {
                    feature,
                    min: stats::min(&values),
                    max: stats::max(&values),
                    mean: stats::mean(&values),
                    std: stats::sample_std(&values),
                }
            })
            .collect();

        OverallStatistics {
            total_songs: self.total_songs(),
            total_clusters: self.n_clusters(),
            feature_ranges,
            cluster_sizes: self.members.iter().map(|m| m.len()).collect(),
        }
    }

    /// Case-insensitive substring match on filename or genre, in row order.
    pub fn search(&self, query: &str) -> Vec<SearchResult> {
        if query.is_empty() {
            return Vec::new();
        }
        let needle = query.to_lowercase();
        self.rows
            .iter()
            .zip(&self.assignments)
            .filter(|(row, _)| {
                row.record.filename.to_lowercase().contains(&needle)
                    || row.record.genre.to_lowercase().contains(&needle)
            })
            .take(SEARCH_LIMIT)
            .map(|(row, &cluster)| SearchResult {
                filename: row.record.filename.clone(),
                genre: row.record.genre.clone(),
                cluster,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{FeatureRecord, FeatureTable, FeatureValues};
    use crate::model::test_artifacts;

    fn corpus_row(filename: &str, genre: &str, cluster: i64, v: [f64; 5]) -> CorpusRow {
        CorpusRow {
            record: FeatureRecord {
                filename: filename.to_string(),
                genre: genre.to_string(),
                features: FeatureValues::from_array(v),
            },
            cluster,
            pca_2d: [v[0], v[1]],
            pca_3d: [v[2], v[3], v[4]],
        }
    }

    fn two_clip_engine() -> ClusterEngine {
        ClusterEngine::new(
            vec![
                corpus_row("blues.00000.wav", "blues", 0, [120.0, 0.1, 0.1, 0.3, 0.32]),
                corpus_row("metal.00000.wav", "metal", 1, [140.0, 0.2, 0.2, 0.4, 0.40]),
            ],
            test_artifacts(),
        )
        .unwrap()
    }

    /// `n` songs in cluster 0 at increasing distance from the origin centroid,
    /// shuffled so row order differs from distance order.
    fn spread_engine(n: usize) -> ClusterEngine {
        let rows = (0..n)
            .map(|i| {
                let v = ((i * 7) % n) as f64 * 0.01;
                corpus_row(&format!("rock.{:05}.wav", i), "rock", 0, [v, v, v, v, v])
            })
            .collect();
        ClusterEngine::new(rows, test_artifacts()).unwrap()
    }

    #[test]
    fn test_two_clip_example() {
        let engine = two_clip_engine();
        let stats = engine.overall_statistics();
        assert_eq!(stats.cluster_sizes, vec![1, 1]);
        assert_eq!(stats.total_songs, 2);
        assert_eq!(stats.total_clusters, 2);

        let summary = engine.cluster_summary(0).unwrap();
        assert_eq!(summary.song_count, 1);
        assert_eq!(summary.mean(Feature::Tempo), Some(120.0));
        assert_eq!(summary.std(Feature::Tempo), None);
        assert_eq!(summary.percentage, 50.0);
        assert_eq!(
            summary.genres,
            vec![GenreCount {
                genre: "blues".into(),
                count: 1
            }]
        );
    }

    #[test]
    fn test_summary_counts_match_statistics() {
        let engine = ClusterEngine::new(
            vec![
                corpus_row("a.wav", "rock", 0, [100.0, 0.1, 0.1, 0.2, 0.3]),
                corpus_row("b.wav", "jazz", 0, [110.0, 0.1, 0.1, 0.2, 0.3]),
                corpus_row("c.wav", "rock", 0, [90.0, 0.1, 0.1, 0.2, 0.3]),
            ],
            test_artifacts(),
        )
        .unwrap();

        let stats = engine.overall_statistics();
        for id in 0..engine.n_clusters() {
            let summary = engine.cluster_summary(id as i64).unwrap();
            assert_eq!(summary.song_count, stats.cluster_sizes[id]);
        }

        let full = engine.cluster_summary(0).unwrap();
        assert_eq!(full.mean(Feature::Tempo), Some(100.0));
        assert_eq!(full.std(Feature::Tempo), Some(10.0));
        assert_eq!(full.dominant_genre().unwrap().genre, "rock");
        assert_eq!(full.genres[1].genre, "jazz");

        let empty = engine.cluster_summary(1).unwrap();
        assert_eq!(empty.song_count, 0);
        assert_eq!(empty.percentage, 0.0);
        assert_eq!(empty.mean(Feature::Energy), None);
        assert!(empty.genres.is_empty());
    }

    #[test]
    fn test_invalid_cluster_ids() {
        let engine = two_clip_engine();
        for id in [-1, 2, 99] {
            assert!(matches!(
                engine.cluster_detail(id),
                Err(EngineError::InvalidClusterId { clusters: 2, .. })
            ));
            assert!(engine.cluster_summary(id).is_err());
            assert!(engine.cluster_songs(id).is_err());
        }
    }

    #[test]
    fn test_detail_sorted_by_distance() {
        let engine = spread_engine(15);
        let detail = engine.cluster_detail(0).unwrap();

        assert_eq!(detail.songs.len(), 15);
        assert!(detail
            .songs
            .windows(2)
            .all(|w| w[0].distance_from_centroid <= w[1].distance_from_centroid));
        assert_eq!(detail.most_similar_songs.len(), MOST_SIMILAR_COUNT);
        assert_eq!(detail.most_similar_songs[..], detail.songs[..MOST_SIMILAR_COUNT]);
        assert_eq!(detail.songs[0].filename, "rock.00000.wav");
        assert_eq!(detail.songs[0].distance_from_centroid, 0.0);
    }

    #[test]
    fn test_detail_small_cluster_and_ties() {
        let engine = ClusterEngine::new(
            vec![
                corpus_row("x.wav", "pop", 1, [1.0; 5]),
                corpus_row("y.wav", "pop", 1, [1.0; 5]),
            ],
            test_artifacts(),
        )
        .unwrap();
        let detail = engine.cluster_detail(1).unwrap();
        assert_eq!(detail.most_similar_songs.len(), 2);
        let names: Vec<&str> = detail.songs.iter().map(|s| s.filename.as_str()).collect();
        assert_eq!(names, vec!["x.wav", "y.wav"]);

        assert!(engine.cluster_detail(0).unwrap().songs.is_empty());
    }

    #[test]
    fn test_cluster_songs_use_stored_coordinates() {
        let engine = two_clip_engine();
        let songs = engine.cluster_songs(1).unwrap();
        assert_eq!(songs.len(), 1);
        assert_eq!(songs[0].filename, "metal.00000.wav");
        assert_eq!(songs[0].pca_2d, [140.0, 0.2]);
        assert_eq!(songs[0].pca_3d, [0.2, 0.4, 0.40]);
    }

    #[test]
    fn test_projection_views() {
        let engine = two_clip_engine();
        let p = engine.projection().unwrap();

        assert_eq!(p.pca_2d.dims, 2);
        assert_eq!(p.pca_2d.points.len(), 2);
        assert_eq!(p.pca_2d.points[0].coords, vec![120.0, 0.1]);
        assert_eq!(p.pca_2d.centroids.len(), 2);
        assert_eq!(p.pca_2d.centroids[1].coords, vec![1.0, 1.0]);
        assert_eq!(p.pca_2d.explained_variance_ratio, Some(vec![0.6, 0.3]));

        // Independent axes: 3D uses the last three features
        assert_eq!(p.pca_3d.points[1].coords, vec![0.2, 0.4, 0.40]);
        assert_eq!(p.pca_3d.points[1].cluster, 1);
        assert_eq!(p.pca_3d.explained_variance_ratio, None);
    }

    #[test]
    fn test_overall_statistics_ranges() {
        let stats = two_clip_engine().overall_statistics();
        let tempo = &stats.feature_ranges[Feature::Tempo.index()];
        assert_eq!(tempo.min, Some(120.0));
        assert_eq!(tempo.max, Some(140.0));
        assert_eq!(tempo.mean, Some(130.0));
        assert!((tempo.std.unwrap() - 200.0_f64.sqrt()).abs() < 1e-9);
    }

    #[test]
    fn test_search() {
        let engine = two_clip_engine();
        assert!(engine.search("").is_empty());
        // Whitespace is part of the query, and no name contains it
        assert!(engine.search("   ").is_empty());
        assert!(engine.search("zydeco").is_empty());

        let hits = engine.search("METAL");
        assert_eq!(
            hits,
            vec![SearchResult {
                filename: "metal.00000.wav".into(),
                genre: "metal".into(),
                cluster: 1
            }]
        );
        assert_eq!(engine.search(".00000").len(), 2);
    }

    #[test]
    fn test_search_keeps_surrounding_whitespace() {
        let engine = ClusterEngine::new(
            vec![
                corpus_row("blues.00000.wav", "blues", 0, [1.0; 5]),
                corpus_row("delta blues.00001.wav", "blues", 1, [1.0; 5]),
            ],
            test_artifacts(),
        )
        .unwrap();

        let hits = engine.search(" Blues");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].filename, "delta blues.00001.wav");
        for hit in &hits {
            assert!(
                hit.filename.to_lowercase().contains(" blues")
                    || hit.genre.to_lowercase().contains(" blues")
            );
        }
    }

    #[test]
    fn test_search_is_capped() {
        let engine = spread_engine(60);
        let hits = engine.search("rock");
        assert_eq!(hits.len(), SEARCH_LIMIT);
        assert_eq!(hits[0].filename, "rock.00000.wav");
        assert!(hits.iter().all(|h| h.genre.contains("rock")));
    }

    #[test]
    fn test_out_of_range_assignment_rejected() {
        let result = ClusterEngine::new(
            vec![corpus_row("a.wav", "rock", 5, [1.0; 5])],
            test_artifacts(),
        );
        assert!(matches!(
            result,
            Err(EngineError::AssignmentOutOfRange { cluster: 5, clusters: 2, .. })
        ));
        let negative = ClusterEngine::new(
            vec![corpus_row("a.wav", "rock", -1, [1.0; 5])],
            test_artifacts(),
        );
        assert!(matches!(negative, Err(EngineError::AssignmentOutOfRange { .. })));
    }

    #[test]
    fn test_empty_corpus() {
        let engine = ClusterEngine::new(Vec::new(), test_artifacts()).unwrap();
        let stats = engine.overall_statistics();
        assert_eq!(stats.cluster_sizes, vec![0, 0]);
        assert_eq!(stats.feature_ranges[0].min, None);
        assert_eq!(engine.clusters().clusters.len(), 2);
    }

    #[test]
    fn test_open_from_database() {
        let db = Database::open_in_memory().unwrap();
        db.replace_feature_table(&FeatureTable {
            rows: vec![
                FeatureRecord {
                    filename: "a.wav".into(),
                    genre: "rock".into(),
                    features: FeatureValues::from_array([0.1; 5]),
                },
                FeatureRecord {
                    filename: "b.wav".into(),
                    genre: "jazz".into(),
                    features: FeatureValues::from_array([0.9; 5]),
                },
            ],
        })
        .unwrap();
        let artifacts = test_artifacts();
        crate::assign::assign_clusters(&db, &artifacts).unwrap();

        let engine = ClusterEngine::new(db.load_corpus().unwrap(), artifacts).unwrap();
        assert_eq!(engine.overall_statistics().cluster_sizes, vec![1, 1]);
        assert_eq!(engine.search("jazz")[0].cluster, 1);
    }

    #[test]
    fn test_open_empty_database() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.counts().unwrap().fully_assigned());
        let engine = ClusterEngine::new(db.load_corpus().unwrap(), test_artifacts()).unwrap();
        let stats = engine.overall_statistics();
        assert_eq!(stats.total_songs, 0);
        assert_eq!(stats.cluster_sizes, vec![0, 0]);
    }

    #[test]
    fn test_engine_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ClusterEngine>();
    }
}
