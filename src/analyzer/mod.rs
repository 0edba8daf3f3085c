pub mod decode;
pub mod dsp;
pub mod features;

use crate::config::ExtractorConfig;
use crate::db::models::{FeatureRecord, FeatureTable};
use crate::db::Database;
use crate::scanner::{self, ClipRef};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;
use thiserror::Error;

/// Why a single clip produced no feature record.
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("Decode error: {0}")]
    Decode(#[from] decode::DecodeError),
    #[error("signal is empty")]
    Empty,
    #[error("signal is silent")]
    Silent,
    #[error("no tempo could be estimated")]
    NoTempo,
    #[error("{0} is not a finite number")]
    NonFinite(&'static str),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("extraction worker panicked")]
    WorkerPanicked,
    #[error("could not start extraction worker: {0}")]
    Spawn(String),
    #[error("unreadable corpus entry: {0}")]
    Unreadable(String),
}

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("Scan error: {0}")]
    Scan(#[from] scanner::ScanError),
    #[error("Invalid extractor config: {0}")]
    Config(String),
    #[error("Thread pool error: {0}")]
    ThreadPool(String),
    #[error("Database error: {0}")]
    Db(#[from] crate::db::DbError),
}

/// A clip that was skipped, with the reason.
#[derive(Debug)]
pub struct ClipFailure {
    pub genre: String,
    pub filename: String,
    pub error: ExtractionError,
}

/// Result of processing one clip.
#[derive(Debug)]
pub enum ClipOutcome {
    Extracted(FeatureRecord),
    Failed(ClipFailure),
}

pub struct BuildReport {
    pub table: FeatureTable,
    pub extracted: u64,
    pub failed: u64,
    pub failures: Vec<ClipFailure>,
}

/// Scan `root`, extract every clip, and replace the persisted table.
pub fn extract_corpus(
    db: &Database,
    root: &Path,
    params: &ExtractorConfig,
    jobs: usize,
) -> Result<BuildReport, BuildError> {
    let report = build_from_dir(root, params, jobs)?;
    db.replace_feature_table(&report.table)?;
    log::info!("Stored {} rows", report.table.len());
    Ok(report)
}

/// Scan `root` and extract every clip, without touching the database.
///
/// Entries the scan could not read are reported as failures next to the
/// clips that failed extraction.
pub fn build_from_dir(root: &Path, params: &ExtractorConfig, jobs: usize) -> Result<BuildReport, BuildError> {
    params.validate().map_err(BuildError::Config)?;
    let scan = scanner::scan_corpus(root)?;
    let mut report = build_feature_table(&scan.clips, params, jobs)?;

    for entry in scan.skipped {
        report.failures.push(ClipFailure {
            genre: entry.genre,
            filename: entry.filename,
            error: ExtractionError::Unreadable(entry.reason),
        });
        report.failed += 1;
    }
    Ok(report)
}

/// Extract clips in parallel and assemble the table in input order.
///
/// Every clip runs on its own worker with a timeout, so a file that hangs the
/// decoder is skipped instead of stalling the pass. Failures are counted and
/// returned, never written.
pub fn build_feature_table(
    clips: &[ClipRef],
    params: &ExtractorConfig,
    jobs: usize,
) -> Result<BuildReport, BuildError> {
    params.validate().map_err(BuildError::Config)?;

    if clips.is_empty() {
        log::info!("No clips to extract");
        return Ok(BuildReport {
            table: FeatureTable::default(),
            extracted: 0,
            failed: 0,
            failures: Vec::new(),
        });
    }

    log::info!("Extracting {} clips with {} workers", clips.len(), jobs);

    let pb = ProgressBar::new(clips.len() as u64);
    pb.set_style(
        ProgressStyle::with_template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(jobs.max(1))
        .build()
        .map_err(|e| BuildError::ThreadPool(e.to_string()))?;

    // Parallel map, collected in clip order
    let outcomes: Vec<ClipOutcome> = pool.install(|| {
        use rayon::prelude::*;
        clips
            .par_iter()
            .map(|clip| {
                let outcome = process_clip(clip, params);
                pb.inc(1);
                outcome
            })
            .collect()
    });

    let mut rows = Vec::with_capacity(outcomes.len());
    let mut failures = Vec::new();
    for outcome in outcomes {
        match outcome {
            ClipOutcome::Extracted(record) => rows.push(record),
            ClipOutcome::Failed(failure) => {
                log::warn!(
                    "Skipping {}/{}: {}",
                    failure.genre,
                    failure.filename,
                    failure.error
                );
                failures.push(failure);
            }
        }
    }

    let extracted = rows.len() as u64;
    let failed = failures.len() as u64;
    pb.finish_with_message(format!("Done: {} extracted, {} failed", extracted, failed));

    Ok(BuildReport {
        table: FeatureTable { rows },
        extracted,
        failed,
        failures,
    })
}

/// Extract one clip on an isolated worker.
pub fn process_clip(clip: &ClipRef, params: &ExtractorConfig) -> ClipOutcome {
    let timeout = match params.timeout_secs {
        0 => None,
        secs => Some(Duration::from_secs(secs)),
    };
    let owned_clip = clip.clone();
    let owned_params = params.clone();
    let result = run_isolated(timeout, move || features::extract_clip(&owned_clip, &owned_params));

    match result {
        Ok(record) => ClipOutcome::Extracted(record),
        Err(error) => ClipOutcome::Failed(ClipFailure {
            genre: clip.genre.clone(),
            filename: clip.filename.clone(),
            error,
        }),
    }
}

/// Run `job` on a dedicated thread and wait at most `timeout` for it.
///
/// A job that overruns is abandoned; its thread is left to finish on its own
/// and its result is discarded.
pub fn run_isolated<T, F>(timeout: Option<Duration>, job: F) -> Result<T, ExtractionError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ExtractionError> + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    std::thread::Builder::new()
        .name("clip-extract".into())
        .spawn(move || {
            // Receiver may be gone after a timeout
            let _ = tx.send(job());
        })
        .map_err(|e| ExtractionError::Spawn(e.to_string()))?;

    let received = match timeout {
        Some(limit) => rx.recv_timeout(limit),
        None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
    };
    match received {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => {
            let limit = timeout.unwrap_or_default();
            log::warn!("Abandoning extraction worker after {:?}; it keeps running detached", limit);
            Err(ExtractionError::Timeout(limit))
        }
        Err(RecvTimeoutError::Disconnected) => Err(ExtractionError::WorkerPanicked),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const SR: u32 = 22_050;

    /// Click train at `period` samples over a soft tone, as a 16-bit WAV.
    fn write_clip(path: &Path, period: usize, secs: f32) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: SR,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut w = hound::WavWriter::create(path, spec).unwrap();
        let n = (secs * SR as f32) as usize;
        for i in 0..n {
            let t = i as f32 / SR as f32;
            let k = i % period;
            let click = if k < 256 {
                0.6 * (-(k as f32) / 40.0).exp() * (2.0 * std::f32::consts::PI * 2500.0 * t).sin()
            } else {
                0.0
            };
            let tone = 0.15 * (2.0 * std::f32::consts::PI * 330.0 * t).sin();
            w.write_sample(((tone + click) * 32_000.0) as i16).unwrap();
        }
        w.finalize().unwrap();
    }

    fn make_corpus(tag: &str) -> PathBuf {
        let root = std::env::temp_dir().join(format!("genrescope_build_{}_{}", tag, std::process::id()));
        std::fs::remove_dir_all(&root).ok();
        std::fs::create_dir_all(root.join("disco")).unwrap();
        std::fs::create_dir_all(root.join("reggae")).unwrap();
        write_clip(&root.join("disco/disco.00000.wav"), 21 * 512, 3.0);
        write_clip(&root.join("reggae/reggae.00000.wav"), 26 * 512, 3.0);
        // Not audio despite the extension
        std::fs::write(root.join("reggae/reggae.00001.wav"), b"garbage").unwrap();
        root
    }

    fn quick_params() -> ExtractorConfig {
        ExtractorConfig {
            hpss_kernel: 9,
            ..ExtractorConfig::default()
        }
    }

    #[test]
    fn test_build_counts_failures_and_keeps_order() {
        let root = make_corpus("order");
        let report = build_from_dir(&root, &quick_params(), 2).unwrap();

        assert_eq!(report.extracted, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.failures[0].filename, "reggae.00001.wav");
        assert!(matches!(report.failures[0].error, ExtractionError::Decode(_)));

        let names: Vec<&str> = report.table.rows.iter().map(|r| r.filename.as_str()).collect();
        assert_eq!(names, vec!["disco.00000.wav", "reggae.00000.wav"]);
        assert_eq!(report.table.rows[0].genre, "disco");
        for row in &report.table.rows {
            assert!(row.features.tempo > 0.0);
            assert_eq!(row.features.energy, row.features.loudness);
        }

        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn test_build_is_idempotent() {
        let root = make_corpus("idem");
        let db = Database::open_in_memory().unwrap();

        let first = extract_corpus(&db, &root, &quick_params(), 2).unwrap();
        let stored_first = db.load_feature_table().unwrap();
        let second = extract_corpus(&db, &root, &quick_params(), 1).unwrap();
        let stored_second = db.load_feature_table().unwrap();

        assert_eq!(first.table, second.table);
        assert_eq!(stored_first.table, stored_second.table);
        assert_eq!(stored_first.ids, stored_second.ids);
        assert_eq!(stored_second.table, second.table);

        std::fs::remove_dir_all(&root).ok();
    }

    #[cfg(unix)]
    #[test]
    fn test_dangling_link_counts_as_failure() {
        let root = std::env::temp_dir().join(format!("genrescope_build_link_{}", std::process::id()));
        std::fs::remove_dir_all(&root).ok();
        std::fs::create_dir_all(root.join("rock")).unwrap();
        std::os::unix::fs::symlink("/nonexistent/clip.wav", root.join("rock/rock.00000.wav")).unwrap();

        let report = build_from_dir(&root, &quick_params(), 1).unwrap();
        assert_eq!(report.extracted, 0);
        assert_eq!(report.failed, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].genre, "rock");
        assert_eq!(report.failures[0].filename, "rock.00000.wav");
        assert!(matches!(report.failures[0].error, ExtractionError::Unreadable(_)));

        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn test_empty_corpus() {
        let report = build_feature_table(&[], &quick_params(), 1).unwrap();
        assert_eq!(report.extracted, 0);
        assert!(report.table.is_empty());
    }

    #[test]
    fn test_invalid_params_rejected() {
        let params = ExtractorConfig {
            hop_length: 0,
            ..ExtractorConfig::default()
        };
        assert!(matches!(
            build_feature_table(&[], &params, 1),
            Err(BuildError::Config(_))
        ));
    }

    #[test]
    fn test_run_isolated_times_out() {
        let result: Result<(), _> = run_isolated(Some(Duration::from_millis(50)), || {
            std::thread::sleep(Duration::from_secs(5));
            Ok(())
        });
        assert!(matches!(result, Err(ExtractionError::Timeout(_))));
    }

    #[test]
    fn test_run_isolated_reports_panic() {
        let result: Result<(), _> = run_isolated(Some(Duration::from_secs(5)), || panic!("decoder bug"));
        assert!(matches!(result, Err(ExtractionError::WorkerPanicked)));
    }

    #[test]
    fn test_run_isolated_passes_result_through() {
        assert_eq!(run_isolated(None, || Ok(7)).unwrap(), 7);
        assert!(matches!(
            run_isolated::<(), _>(None, || Err(ExtractionError::Silent)),
            Err(ExtractionError::Silent)
        ));
    }
}
