//! File operations, shared-file bookkeeping and chunk slicing.

use std::collections::HashMap;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Metadata advertised for one shared file.
///
/// `name` is the key within an owner's shared set. The owner id is not
/// stored here; the registry attaches it when broadcasting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    /// File name (no directory components)
    pub name: String,
    /// File size in bytes
    pub size: u64,
    /// When the file was shared, in milliseconds since the Unix epoch
    pub timestamp: i64,
}

impl FileMetadata {
    /// Create metadata stamped with the current time.
    #[must_use]
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Whether this entry is older than `retention` at time `now_ms`.
    #[must_use]
    pub fn is_expired(&self, now_ms: i64, retention: Duration) -> bool {
        let retention_ms = i64::try_from(retention.as_millis()).unwrap_or(i64::MAX);
        now_ms.saturating_sub(self.timestamp) > retention_ms
    }
}

/// Files this client currently shares, keyed by advertised name.
#[derive(Debug, Default)]
pub struct SharedFiles {
    entries: Vec<FileMetadata>,
    paths: HashMap<String, PathBuf>,
}

impl SharedFiles {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add files and directories to the shared set.
    ///
    /// Directories are walked recursively. A name that is already shared is
    /// replaced by the new entry. Returns the metadata of every added entry.
    ///
    /// # Errors
    ///
    /// Returns an error if a path cannot be read or nothing shareable was found.
    pub fn add_paths(&mut self, paths: &[PathBuf]) -> Result<Vec<FileMetadata>> {
        let found = enumerate_files(paths)?;
        if found.is_empty() {
            return Err(Error::NothingToShare);
        }

        let mut added = Vec::with_capacity(found.len());
        for (meta, path) in found {
            self.entries.retain(|e| e.name != meta.name);
            self.paths.insert(meta.name.clone(), path);
            self.entries.push(meta.clone());
            added.push(meta);
        }
        Ok(added)
    }

    /// Path backing a shared name.
    #[must_use]
    pub fn path_of(&self, name: &str) -> Option<&Path> {
        self.paths.get(name).map(PathBuf::as_path)
    }

    /// Advertised metadata in share order.
    #[must_use]
    pub fn metadata(&self) -> &[FileMetadata] {
        &self.entries
    }

    /// Whether nothing is shared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of shared files.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Stop sharing everything.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.paths.clear();
    }
}

/// Enumerate shareable files under `paths`.
///
/// Hidden entries inside directories are skipped. When two files carry the
/// same name the first one found wins.
///
/// # Errors
///
/// Returns an error if a given path does not exist.
pub fn enumerate_files(paths: &[PathBuf]) -> Result<Vec<(FileMetadata, PathBuf)>> {
    let mut files: Vec<(FileMetadata, PathBuf)> = Vec::new();

    let push = |path: &Path, files: &mut Vec<(FileMetadata, PathBuf)>| -> Result<()> {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return Ok(());
        };
        if files.iter().any(|(m, _)| m.name == name) {
            tracing::warn!("Skipping duplicate file name: {}", path.display());
            return Ok(());
        }
        let size = std::fs::metadata(path)?.len();
        files.push((FileMetadata::new(name, size), path.to_path_buf()));
        Ok(())
    };

    for path in paths {
        if path.is_file() {
            push(path, &mut files)?;
        } else if path.is_dir() {
            let walker = walkdir::WalkDir::new(path)
                .follow_links(true)
                .sort_by_file_name()
                .into_iter()
                .filter_entry(|e| e.depth() == 0 || !is_hidden(e.file_name()));

            for entry in walker.filter_map(std::result::Result::ok) {
                if entry.file_type().is_file() {
                    push(entry.path(), &mut files)?;
                }
            }
        } else {
            return Err(Error::FileNotFound(path.display().to_string()));
        }
    }

    Ok(files)
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_str().is_some_and(|n| n.starts_with('.'))
}

/// Slices a byte length into contiguous chunk ranges.
#[derive(Debug, Clone, Copy)]
pub struct FileChunker {
    /// Chunk size in bytes
    pub chunk_size: usize,
}

impl FileChunker {
    /// Create a new chunker with the given chunk size.
    ///
    /// # Panics
    ///
    /// Panics if `chunk_size` is zero.
    #[must_use]
    pub fn new(chunk_size: usize) -> Self {
        assert!(chunk_size > 0, "chunk size must be non-zero");
        Self { chunk_size }
    }

    /// Ranges covering `0..len` in order, each at most `chunk_size` long.
    ///
    /// An empty input yields no ranges.
    pub fn ranges(&self, len: usize) -> impl Iterator<Item = Range<usize>> {
        let chunk_size = self.chunk_size;
        (0..len)
            .step_by(chunk_size)
            .map(move |start| start..(start + chunk_size).min(len))
    }

    /// Number of chunks needed for `len` bytes.
    #[must_use]
    pub const fn chunk_count(&self, len: usize) -> usize {
        len.div_ceil(self.chunk_size)
    }
}

/// Reduce a remote-supplied name to a safe single path component.
#[must_use]
pub fn sanitize_file_name(name: &str) -> Option<String> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base.chars().filter(|c| !c.is_control()).collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        return None;
    }
    Some(cleaned.to_string())
}

/// First path in `dir` for `name` that does not exist yet.
///
/// `report.pdf` becomes `report (1).pdf`, `report (2).pdf`, and so on.
#[must_use]
pub fn unique_output_path(dir: &Path, name: &str) -> PathBuf {
    let candidate = dir.join(name);
    if !candidate.exists() {
        return candidate;
    }

    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (name, None),
    };

    (1..)
        .map(|n| match ext {
            Some(ext) => dir.join(format!("{stem} ({n}).{ext}")),
            None => dir.join(format!("{stem} ({n})")),
        })
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}

/// Format a file size for display.
#[must_use]
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}
