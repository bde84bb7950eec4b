use ahash::AHashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::candidate::ContentHash;
use crate::error::Error;
use crate::hasher;

const DEFAULT_MAX_SUFFIX: u32 = 9_999;

/// Assigns collision-free destination paths inside the library.
///
/// A name is free when nobody has reserved it for other content and no
/// distinct-content file already sits at that path. Reservations are keyed by
/// library-relative path, so identical content always maps back to its own name.
pub struct CollisionNamer {
    library_root: PathBuf,
    reserved: AHashMap<PathBuf, ContentHash>,
    max_suffix: u32,
}

impl CollisionNamer {
    pub fn new(library_root: impl Into<PathBuf>) -> Self {
        Self {
            library_root: library_root.into(),
            reserved: AHashMap::new(),
            max_suffix: DEFAULT_MAX_SUFFIX,
        }
    }

    pub fn with_max_suffix(mut self, max_suffix: u32) -> Self {
        self.max_suffix = max_suffix.max(1);
        self
    }

    /// Record a name already owned by `hash` (from the catalog or a checkpoint).
    pub fn reserve(&mut self, relative: PathBuf, hash: ContentHash) {
        self.reserved.insert(relative, hash);
    }

    pub fn owner_of(&self, relative: &Path) -> Option<ContentHash> {
        self.reserved.get(relative).copied()
    }

    pub fn reserved_count(&self) -> usize {
        self.reserved.len()
    }

    fn is_taken(&self, relative: &Path, hash: &ContentHash, size: u64) -> bool {
        match self.reserved.get(relative) {
            Some(owner) => owner != hash,
            None => self.holds_other_content(relative, hash, size),
        }
    }

    /// A file already on disk counts as a collision unless it is byte-identical.
    fn holds_other_content(&self, relative: &Path, hash: &ContentHash, size: u64) -> bool {
        let absolute = self.library_root.join(relative);
        let metadata = match fs::symlink_metadata(&absolute) {
            Ok(m) => m,
            Err(_) => return false,
        };
        if !metadata.is_file() || metadata.len() != size {
            return true;
        }
        match hasher::hash_file(&absolute) {
            Ok(existing) => existing != *hash,
            Err(e) => {
                warn!("Cannot verify existing library file: {}", e);
                true
            }
        }
    }

    /// Suffix search only: `name.ext`, `name-2.ext`, `name-3.ext`, ...
    pub fn try_assign(
        &self,
        proposed: &Path,
        hash: &ContentHash,
        size: u64,
    ) -> Result<PathBuf, Error> {
        if !self.is_taken(proposed, hash, size) {
            return Ok(proposed.to_path_buf());
        }
        for counter in 2..=self.max_suffix {
            let candidate = with_name_suffix(proposed, &format!("-{}", counter));
            if !self.is_taken(&candidate, hash, size) {
                return Ok(candidate);
            }
        }
        Err(Error::NameCollisionExhausted {
            proposed: proposed.to_path_buf(),
        })
    }

    /// Assign and reserve a final name, escalating to hash-based names when the
    /// suffix space is exhausted.
    pub fn assign_name(
        &mut self,
        proposed: &Path,
        hash: ContentHash,
        size: u64,
    ) -> Result<PathBuf, Error> {
        let name = match self.try_assign(proposed, &hash, size) {
            Ok(name) => name,
            Err(exhausted) => {
                warn!("{}; falling back to a hash-derived name", exhausted);
                let short = with_name_suffix(proposed, &format!("-{}", hash.short()));
                let full = with_file_stem(proposed, &hash.to_hex());
                if !self.is_taken(&short, &hash, size) {
                    short
                } else if !self.is_taken(&full, &hash, size) {
                    full
                } else {
                    return Err(exhausted);
                }
            }
        };
        if name != proposed {
            debug!("Renamed {} -> {}", proposed.display(), name.display());
        }
        self.reserved.insert(name.clone(), hash);
        Ok(name)
    }
}

/// `dir/stem.ext` -> `dir/stem{suffix}.ext`
pub fn with_name_suffix(path: &Path, suffix: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    with_file_stem(path, &format!("{}{}", stem, suffix))
}

fn with_file_stem(path: &Path, stem: &str) -> PathBuf {
    let file_name = match path.extension() {
        Some(ext) => format!("{}.{}", stem, ext.to_string_lossy()),
        None => stem.to_string(),
    };
    path.with_file_name(file_name)
}
