//! Serializable results of engine queries.

use serde::Serialize;

use crate::db::models::{Feature, FeatureValues};

/// Mean and spread of one feature over a set of songs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureStat {
    pub feature: Feature,
    /// `None` for an empty set.
    pub mean: Option<f64>,
    /// Sample standard deviation; `None` below two songs.
    pub std: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenreCount {
    pub genre: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterSummary {
    pub cluster_id: usize,
    pub song_count: usize,
    /// Share of the whole corpus, 0-100.
    pub percentage: f64,
    /// One entry per feature, in column order, over raw values.
    pub features: Vec<FeatureStat>,
    /// Sorted by count descending, then genre name.
    pub genres: Vec<GenreCount>,
}

impl ClusterSummary {
    pub fn mean(&self, feature: Feature) -> Option<f64> {
        self.features[feature.index()].mean
    }

    pub fn std(&self, feature: Feature) -> Option<f64> {
        self.features[feature.index()].std
    }

    pub fn dominant_genre(&self) -> Option<&GenreCount> {
        self.genres.first()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterOverview {
    pub total_songs: usize,
    pub total_clusters: usize,
    pub clusters: Vec<ClusterSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SongDistance {
    pub filename: String,
    pub genre: String,
    /// Euclidean distance to the cluster centroid in normalized space.
    pub distance_from_centroid: f64,
    pub features: FeatureValues,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterDetail {
    pub summary: ClusterSummary,
    /// Every member, closest to the centroid first.
    pub songs: Vec<SongDistance>,
    pub most_similar_songs: Vec<SongDistance>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterSong {
    pub filename: String,
    pub genre: String,
    pub cluster: usize,
    pub features: FeatureValues,
    pub pca_2d: [f64; 2],
    pub pca_3d: [f64; 3],
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectedPoint {
    pub filename: String,
    pub genre: String,
    pub cluster: usize,
    pub coords: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectedCentroid {
    pub cluster: usize,
    pub coords: Vec<f64>,
}

/// All songs and centroids on one set of axes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectionView {
    pub dims: usize,
    pub points: Vec<ProjectedPoint>,
    pub centroids: Vec<ProjectedCentroid>,
    pub explained_variance_ratio: Option<Vec<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Projection {
    pub pca_2d: ProjectionView,
    pub pca_3d: ProjectionView,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureRange {
    pub feature: Feature,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mean: Option<f64>,
    pub std: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverallStatistics {
    pub total_songs: usize,
    pub total_clusters: usize,
    pub feature_ranges: Vec<FeatureRange>,
    /// Member count for every cluster id, 0 for empty clusters.
    pub cluster_sizes: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchResult {
    pub filename: String,
    pub genre: String,
    pub cluster: usize,
}
