use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::Deserialize;

/// Application configuration loaded from TOML config file.
/// All fields have sensible defaults; the config file is optional.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Corpus root (`<root>/<genre>/<clip>`) used when `extract` has no CLI arg.
    pub corpus_dir: Option<PathBuf>,
    /// Custom database path (overrides XDG default).
    pub db_path: Option<PathBuf>,
    /// Directory holding scaler.json, kmeans.json and pca.json.
    pub models_dir: Option<PathBuf>,
    /// Number of parallel workers. 0 = auto-detect (cores / 2, min 1).
    pub workers: usize,
    /// Signal feature extraction parameters.
    pub extractor: ExtractorConfig,
    /// Feature column detection for the normalizer.
    pub normalizer: NormalizerConfig,
}

/// Extraction parameters. Frame and hop lengths must stay fixed for a corpus,
/// otherwise features from different runs are not comparable.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    /// Only this many seconds of each clip are decoded.
    pub max_duration_secs: f64,
    /// Every clip is resampled to this rate before analysis.
    pub target_sample_rate: u32,
    /// Analysis frame (and FFT) length in samples.
    pub frame_length: usize,
    /// Hop between consecutive frames in samples.
    pub hop_length: usize,
    /// Median filter length for harmonic/percussive separation.
    pub hpss_kernel: usize,
    /// Per-clip timeout; a clip that takes longer is skipped.
    pub timeout_secs: u64,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            max_duration_secs: 30.0,
            target_sample_rate: 22_050,
            frame_length: 2048,
            hop_length: 512,
            hpss_kernel: 31,
            timeout_secs: 60,
        }
    }
}

impl ExtractorConfig {
    /// Reject parameters the frame analysis cannot run with.
    pub fn validate(&self) -> Result<(), String> {
        if self.frame_length < 4 {
            return Err(format!("frame_length {} is too small", self.frame_length));
        }
        if self.hop_length == 0 || self.hop_length > self.frame_length {
            return Err(format!(
                "hop_length {} must be in 1..={}",
                self.hop_length, self.frame_length
            ));
        }
        if self.hpss_kernel == 0 {
            return Err("hpss_kernel must be at least 1".into());
        }
        if self.target_sample_rate == 0 {
            return Err("target_sample_rate must be positive".into());
        }
        if !(self.max_duration_secs > 0.0 && self.max_duration_secs <= MAX_DURATION_SECS) {
            return Err(format!(
                "max_duration_secs must be in (0, {}], got {}",
                MAX_DURATION_SECS, self.max_duration_secs
            ));
        }
        Ok(())
    }
}

/// Longest analysis window accepted in `[extractor]`.
pub const MAX_DURATION_SECS: f64 = 600.0;

/// Columns of the persisted table that are never treated as features.
pub const DEFAULT_EXCLUDE_COLUMNS: &[&str] = &[
    "id",
    "filename",
    "genre",
    "label",
    "length",
    "kmeans_cluster",
    "pca_1",
    "pca_2",
    "pca_3d_1",
    "pca_3d_2",
    "pca_3d_3",
    "Unnamed: 0",
];

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NormalizerConfig {
    /// Denylist used when feature columns are auto-detected.
    pub exclude_columns: Vec<String>,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            exclude_columns: DEFAULT_EXCLUDE_COLUMNS.iter().map(|c| c.to_string()).collect(),
        }
    }
}

impl AppConfig {
    /// Load config from `~/.config/genrescope/config.toml`.
    /// Returns default config if file doesn't exist.
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => {
                log::debug!("No config file found, using defaults");
                Self::default()
            }
        }
    }

    /// Load config from an explicit path.
    /// Logs a warning and falls back to defaults if the file can't be read or parsed.
    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match Self::parse(&contents) {
                Ok(config) => {
                    log::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    log::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                log::warn!("Failed to read {}: {}. Using defaults.", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str::<AppConfig>(contents)
    }

    /// Resolve worker count: 0 → auto-detect (cores / 2, min 1).
    pub fn resolve_workers(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            let cores = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2);
            (cores / 2).max(1)
        }
    }

    /// Get the config file path.
    fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", crate::APP_NAME)
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

/// Resolve the default database path using XDG data directory.
pub fn default_db_path() -> PathBuf {
    if let Some(dirs) = ProjectDirs::from("", "", crate::APP_NAME) {
        let data_dir = dirs.data_dir();
        std::fs::create_dir_all(data_dir).ok();
        data_dir.join("genrescope.db")
    } else {
        // Fallback: current directory
        PathBuf::from("genrescope.db")
    }
}

/// Resolve the default model artifact directory (XDG data dir / models).
pub fn default_models_dir() -> PathBuf {
    if let Some(dirs) = ProjectDirs::from("", "", crate::APP_NAME) {
        dirs.data_dir().join("models")
    } else {
        PathBuf::from("models")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = AppConfig::parse("").unwrap();
        assert_eq!(config.workers, 0);
        assert_eq!(config.extractor.frame_length, 2048);
        assert_eq!(config.extractor.hop_length, 512);
        assert_eq!(config.extractor.target_sample_rate, 22_050);
        assert!(config.normalizer.exclude_columns.contains(&"filename".to_string()));
    }

    #[test]
    fn test_partial_sections_keep_other_defaults() {
        let config = AppConfig::parse(
            r#"
            corpus_dir = "/data/gtzan/genres_original"
            workers = 3

            [extractor]
            timeout_secs = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.corpus_dir, Some(PathBuf::from("/data/gtzan/genres_original")));
        assert_eq!(config.resolve_workers(), 3);
        assert_eq!(config.extractor.timeout_secs, 5);
        assert_eq!(config.extractor.hpss_kernel, 31);
        assert_eq!(config.extractor.max_duration_secs, 30.0);
    }

    #[test]
    fn test_custom_exclude_columns() {
        let config = AppConfig::parse(
            r#"
            [normalizer]
            exclude_columns = ["filename", "genre"]
            "#,
        )
        .unwrap();
        assert_eq!(config.normalizer.exclude_columns, vec!["filename", "genre"]);
    }

    #[test]
    fn test_invalid_file_falls_back_to_defaults() {
        let dir = std::env::temp_dir().join(format!("genrescope_cfg_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "workers = \"many\"").unwrap();

        let config = AppConfig::load_from(&path);
        assert_eq!(config.workers, 0);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_extractor_validation() {
        assert!(ExtractorConfig::default().validate().is_ok());
        let bad_hop = ExtractorConfig {
            hop_length: 4096,
            ..ExtractorConfig::default()
        };
        assert!(bad_hop.validate().is_err());
        let bad_duration = ExtractorConfig {
            max_duration_secs: 0.0,
            ..ExtractorConfig::default()
        };
        assert!(bad_duration.validate().is_err());
        let huge_duration = ExtractorConfig {
            max_duration_secs: 1e300,
            ..ExtractorConfig::default()
        };
        assert!(huge_duration.validate().is_err());
        let nan_duration = ExtractorConfig {
            max_duration_secs: f64::NAN,
            ..ExtractorConfig::default()
        };
        assert!(nan_duration.validate().is_err());
    }

    #[test]
    fn test_resolve_workers_auto_is_at_least_one() {
        let config = AppConfig::default();
        assert!(config.resolve_workers() >= 1);
    }
}
