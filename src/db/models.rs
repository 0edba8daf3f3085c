use serde::Serialize;

/// The five clip descriptors, in persisted column order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Feature {
    Tempo,
    Energy,
    Loudness,
    Valence,
    Danceability,
}

impl Feature {
    pub const ALL: [Feature; 5] = [
        Feature::Tempo,
        Feature::Energy,
        Feature::Loudness,
        Feature::Valence,
        Feature::Danceability,
    ];

    pub const COUNT: usize = 5;

    /// Column name in the `songs` table (also the scaler column name).
    pub fn column(&self) -> &'static str {
        match self {
            Self::Tempo => "tempo",
            Self::Energy => "energy",
            Self::Loudness => "loudness",
            Self::Valence => "valence",
            Self::Danceability => "danceability",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Tempo => "Tempo",
            Self::Energy => "Energy",
            Self::Loudness => "Loudness",
            Self::Valence => "Valence",
            Self::Danceability => "Danceability",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            Self::Tempo => "BPM",
            Self::Energy | Self::Loudness => "RMS",
            Self::Valence | Self::Danceability => "Normalized",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Tempo => "Speed of music (beats per minute)",
            Self::Energy => "Intensity and loudness level",
            Self::Loudness => "Overall amplitude",
            Self::Valence => "Musical positiveness",
            Self::Danceability => "Dance suitability",
        }
    }

    /// How the value is derived from the waveform.
    pub fn extraction(&self) -> &'static str {
        match self {
            Self::Tempo => "Autocorrelation of the onset strength envelope",
            Self::Energy => "Mean frame RMS amplitude",
            // Same computation as energy; kept equal for comparability with stored tables.
            Self::Loudness => "Mean frame RMS amplitude (equal to energy)",
            Self::Valence => "Spectral centroid / 4000 averaged with mean |harmonic|",
            Self::Danceability => "Tempo / 200 averaged with mean zero crossing rate",
        }
    }

    pub fn index(&self) -> usize {
        *self as usize
    }
}

/// One value per feature.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Default)]
pub struct FeatureValues {
    pub tempo: f64,
    pub energy: f64,
    pub loudness: f64,
    pub valence: f64,
    pub danceability: f64,
}

impl FeatureValues {
    pub fn from_array(v: [f64; Feature::COUNT]) -> Self {
        Self {
            tempo: v[0],
            energy: v[1],
            loudness: v[2],
            valence: v[3],
            danceability: v[4],
        }
    }

    pub fn to_array(&self) -> [f64; Feature::COUNT] {
        [self.tempo, self.energy, self.loudness, self.valence, self.danceability]
    }

    pub fn get(&self, feature: Feature) -> f64 {
        self.to_array()[feature.index()]
    }
}

/// Extracted descriptors for one clip.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureRecord {
    pub filename: String,
    pub genre: String,
    #[serde(flatten)]
    pub features: FeatureValues,
}

/// Ordered rows, one per successfully extracted clip.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FeatureTable {
    pub rows: Vec<FeatureRecord>,
}

impl FeatureTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Raw feature matrix (rows × 5) in column order.
    pub fn matrix(&self) -> Vec<Vec<f64>> {
        self.rows
            .iter()
            .map(|r| r.features.to_array().to_vec())
            .collect()
    }
}

/// Feature table as read back from the database, with row ids.
pub struct LoadedTable {
    pub ids: Vec<i64>,
    pub table: FeatureTable,
    /// Number of NULL feature cells replaced by 0.
    pub filled_cells: usize,
}

/// Cluster id and projection coordinates for one persisted row.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub row_id: i64,
    pub cluster: usize,
    pub pca_2d: [f64; 2],
    pub pca_3d: [f64; 3],
}

/// A fully assigned row of the persisted corpus.
#[derive(Debug, Clone, PartialEq)]
pub struct CorpusRow {
    pub record: FeatureRecord,
    /// Stored assignment; range-checked when the engine is built.
    pub cluster: i64,
    pub pca_2d: [f64; 2],
    pub pca_3d: [f64; 3],
}

/// Per-genre row counts for the `stats` overview.
pub struct CorpusCounts {
    pub total_songs: usize,
    pub assigned_songs: usize,
    pub genres: Vec<(String, usize)>,
}

impl CorpusCounts {
    /// Every row has a cluster id. Trivially true for an empty corpus.
    pub fn fully_assigned(&self) -> bool {
        self.assigned_songs == self.total_songs
    }
}
