use glob::Pattern;
use std::collections::VecDeque;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, warn};
use walkdir::{DirEntry, WalkDir};

use crate::candidate::FileCandidate;
use crate::config::{self, LibraryConfig};

type EntryIter = Box<dyn Iterator<Item = walkdir::Result<DirEntry>>>;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScanCounters {
    pub files: usize,
    pub broken_links: usize,
    pub unreadable: usize,
    pub ignored: usize,
}

/// Lazy walk over the configured source roots, one `FileCandidate` per regular file.
///
/// Broken symlinks and unreadable directories are logged and skipped; the walk
/// carries on over siblings. Directory symlinks are never followed. Entries are
/// visited in file-name order so candidate sequence numbers are reproducible.
pub struct Scanner {
    roots: VecDeque<PathBuf>,
    filter: Arc<EntryFilter>,
    current: Option<EntryIter>,
    next_seq: u64,
    counters: ScanCounters,
}

struct EntryFilter {
    ignore_patterns: Vec<Pattern>,
    excluded_dirs: Vec<PathBuf>,
    skip_resource_forks: bool,
}

impl EntryFilter {
    fn is_ignored(&self, path: &Path) -> bool {
        self.ignore_patterns
            .iter()
            .any(|pattern| pattern.matches_path(path))
    }

    fn is_excluded_dir(&self, path: &Path) -> bool {
        self.excluded_dirs.iter().any(|dir| path == dir)
    }

    fn is_resource_fork(&self, path: &Path) -> bool {
        self.skip_resource_forks
            && path
                .file_name()
                .map(|name| name.to_string_lossy().starts_with("._"))
                .unwrap_or(false)
    }
}

impl Scanner {
    pub fn new(
        roots: &[PathBuf],
        ignore_globs: &[String],
        excluded_dirs: Vec<PathBuf>,
        skip_resource_forks: bool,
    ) -> Self {
        let ignore_patterns = ignore_globs
            .iter()
            .filter_map(|glob| match Pattern::new(glob) {
                Ok(p) => Some(p),
                Err(e) => {
                    error!("Invalid glob pattern '{}': {}", glob, e);
                    None
                }
            })
            .collect();

        Self {
            roots: config::non_overlapping_directories(roots).into(),
            filter: Arc::new(EntryFilter {
                ignore_patterns,
                excluded_dirs,
                skip_resource_forks,
            }),
            current: None,
            next_seq: 0,
            counters: ScanCounters::default(),
        }
    }

    /// Scanner over the configured roots that never descends into the library itself.
    pub fn from_config(config: &LibraryConfig) -> Self {
        let mut excluded = vec![config.library_root.clone()];
        if let Ok(canonical) = fs::canonicalize(&config.library_root) {
            excluded.push(canonical);
        }
        Self::new(
            &config.source_roots,
            &config.ignore_patterns,
            excluded,
            config.skip_resource_forks,
        )
    }

    pub fn counters(&self) -> &ScanCounters {
        &self.counters
    }

    fn open_next_root(&mut self) -> bool {
        let Some(root) = self.roots.pop_front() else {
            return false;
        };
        debug!("Walking source root {}", root.display());
        let filter = Arc::clone(&self.filter);
        let walker = WalkDir::new(&root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(move |entry| {
                if entry.depth() == 0 || !entry.file_type().is_dir() {
                    return true;
                }
                !(filter.is_excluded_dir(entry.path()) || filter.is_ignored(entry.path()))
            });
        self.current = Some(Box::new(walker));
        true
    }

    fn candidate_from_entry(&mut self, entry: DirEntry) -> Option<FileCandidate> {
        let path = entry.path();

        if entry.file_type().is_dir() {
            return None;
        }
        if self.filter.is_ignored(path) || self.filter.is_resource_fork(path) {
            self.counters.ignored += 1;
            return None;
        }

        // fs::metadata follows the link, so a dangling target surfaces here.
        let metadata = match fs::metadata(path) {
            Ok(metadata) => metadata,
            Err(err) if entry.path_is_symlink() && err.kind() == io::ErrorKind::NotFound => {
                warn!("Skipping broken symlink {}", path.display());
                self.counters.broken_links += 1;
                return None;
            }
            Err(err) => {
                warn!("Error getting metadata for {}: {}", path.display(), err);
                self.counters.unreadable += 1;
                return None;
            }
        };

        if !metadata.is_file() {
            if entry.path_is_symlink() {
                debug!("Not following directory symlink {}", path.display());
            }
            return None;
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.counters.files += 1;
        Some(FileCandidate::discovered(
            seq,
            path.to_path_buf(),
            metadata.len(),
            metadata.modified().ok(),
        ))
    }
}

impl Iterator for Scanner {
    type Item = FileCandidate;

    fn next(&mut self) -> Option<FileCandidate> {
        loop {
            if self.current.is_none() && !self.open_next_root() {
                return None;
            }
            let next = self.current.as_mut().and_then(|walker| walker.next());
            match next {
                None => self.current = None,
                Some(Ok(entry)) => {
                    if let Some(candidate) = self.candidate_from_entry(entry) {
                        return Some(candidate);
                    }
                }
                Some(Err(err)) => {
                    let location = err
                        .path()
                        .map(|p| p.display().to_string())
                        .unwrap_or_default();
                    match err.io_error().map(|e| e.kind()) {
                        Some(io::ErrorKind::PermissionDenied) => {
                            warn!("Access denied reading {}: {}", location, err);
                        }
                        _ => warn!("Error walking {}: {}", location, err),
                    }
                    self.counters.unreadable += 1;
                }
            }
        }
    }
}
