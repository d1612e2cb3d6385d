use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use walkdir::{DirEntry, WalkDir};

/// Directories that never hold deployable sources.
const NOISE_DIRS: &[&str] = &["node_modules", "__pycache__"];

/// Aggregate statistics of a checked-out tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileStats {
    pub total_files: u64,
    pub size_bytes: u64,
    pub size_mb: f64,
    /// Lower-cased extension with its leading dot; `""` when absent.
    pub file_extensions: BTreeMap<String, u64>,
    pub has_dockerfile: bool,
    pub has_readme: bool,
}

/// Walk `root`, skipping hidden entries and dependency caches.
/// Unreadable entries are skipped rather than reported.
#[must_use]
pub fn scan(root: &Path) -> FileStats {
    let mut stats = FileStats::default();

    let walker = WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_skipped(e));

    for entry in walker.flatten() {
        if !entry.file_type().is_file() {
            continue;
        }

        let name = entry.file_name().to_string_lossy().to_lowercase();
        stats.total_files += 1;
        *stats.file_extensions.entry(extension_of(&entry)).or_default() += 1;

        if name == "dockerfile" {
            stats.has_dockerfile = true;
        } else if name.starts_with("readme") {
            stats.has_readme = true;
        }

        if let Ok(meta) = entry.metadata() {
            stats.size_bytes += meta.len();
        }
    }

    stats.size_mb = megabytes(stats.size_bytes);
    stats
}

fn is_skipped(entry: &DirEntry) -> bool {
    let name = entry.file_name().to_string_lossy();
    name.starts_with('.') || (entry.file_type().is_dir() && NOISE_DIRS.contains(&name.as_ref()))
}

fn extension_of(entry: &DirEntry) -> String {
    entry
        .path()
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
        .unwrap_or_default()
}

#[allow(clippy::cast_precision_loss)]
fn megabytes(bytes: u64) -> f64 {
    (bytes as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn megabytes_rounds_to_two_places() {
        assert!((megabytes(1024 * 1024) - 1.0).abs() < f64::EPSILON);
        assert!((megabytes(1_572_864) - 1.5).abs() < f64::EPSILON);
        assert!(megabytes(0).abs() < f64::EPSILON);
    }
}
