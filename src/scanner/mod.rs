use crate::SUPPORTED_EXTENSIONS;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("corpus root {} is not a directory", .0.display())]
    NotADirectory(PathBuf),
}

/// One clip in the corpus: `<root>/<genre>/<filename>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipRef {
    pub path: PathBuf,
    pub filename: String,
    pub genre: String,
}

/// Corpus entry that could not be read, kept so it can be reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedEntry {
    pub path: PathBuf,
    /// Genre directory name; the directory itself when it is unreadable.
    pub genre: String,
    /// Empty when a whole genre directory was unreadable.
    pub filename: String,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct ScanResult {
    pub clips: Vec<ClipRef>,
    pub skipped: Vec<SkippedEntry>,
}

/// Enumerate every supported audio file one level below a genre directory.
///
/// Order is deterministic: genre directory name, then file name. Entries
/// that cannot be read (dangling links, unreadable genre directories) are
/// returned in `skipped` instead of clips.
pub fn scan_corpus(root: &Path) -> Result<ScanResult, ScanError> {
    if !root.is_dir() {
        return Err(ScanError::NotADirectory(root.to_path_buf()));
    }

    let mut result = ScanResult::default();
    for entry in WalkDir::new(root)
        .min_depth(2)
        .max_depth(2)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
    {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                if let Some(skipped) = skipped_entry(&e) {
                    log::warn!("Skipping unreadable corpus entry: {}", e);
                    result.skipped.push(skipped);
                }
                continue;
            }
        };
        if !entry.file_type().is_file() || !is_supported(entry.path()) {
            continue;
        }

        let path = entry.path();
        let filename = entry.file_name().to_string_lossy().to_string();
        let genre = path
            .parent()
            .and_then(|p| p.file_name())
            .map(|g| g.to_string_lossy().to_string())
            .unwrap_or_default();

        result.clips.push(ClipRef {
            path: path.to_path_buf(),
            filename,
            genre,
        });
    }

    log::info!(
        "Found {} clips under {} ({} unreadable)",
        result.clips.len(),
        root.display(),
        result.skipped.len()
    );
    Ok(result)
}

/// Describe a walk error, or `None` for entries that would not have been
/// clips anyway (the root itself, files with other extensions).
fn skipped_entry(err: &walkdir::Error) -> Option<SkippedEntry> {
    let path = err.path()?;
    let name = |p: &Path| {
        p.file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    };
    let (genre, filename) = match err.depth() {
        0 => return None,
        1 => (name(path), String::new()),
        _ => {
            if !is_supported(path) {
                return None;
            }
            (path.parent().map(name).unwrap_or_default(), name(path))
        }
    };
    let reason = err
        .io_error()
        .map(|e| e.to_string())
        .unwrap_or_else(|| err.to_string());
    Some(SkippedEntry {
        path: path.to_path_buf(),
        genre,
        filename,
        reason,
    })
}

pub fn is_supported(path: &Path) -> bool {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();
    SUPPORTED_EXTENSIONS.contains(&ext.as_str())
}
