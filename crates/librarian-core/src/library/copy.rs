use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};

use crate::candidate::ContentHash;
use crate::error::Error;
use crate::hasher;

const COPY_BUFFER_SIZE: usize = 64 * 1024;
const PART_SUFFIX: &str = ".librarian-part";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyOutcome {
    /// Library-relative destination.
    pub library_path: PathBuf,
    pub bytes: u64,
    /// Destination already held this content; nothing was written.
    pub adopted: bool,
}

/// Copies one selected source into the library without touching the source.
pub struct Copier {
    library_root: PathBuf,
    verify: bool,
}

impl Copier {
    pub fn new(library_root: impl Into<PathBuf>, verify: bool) -> Self {
        Self {
            library_root: library_root.into(),
            verify,
        }
    }

    pub fn destination(&self, relative: &Path) -> PathBuf {
        self.library_root.join(relative)
    }

    /// True when the destination holds a complete copy of this content.
    pub fn is_intact(&self, relative: &Path, hash: &ContentHash, size: u64) -> bool {
        let dest = self.destination(relative);
        match fs::metadata(&dest) {
            Ok(m) if m.is_file() && m.len() == size => {
                !self.verify || hasher::hash_file(&dest).map(|h| h == *hash).unwrap_or(false)
            }
            _ => false,
        }
    }

    /// Copy `source` to `relative` under the library root.
    ///
    /// Bytes go to a `.librarian-part` sibling, are hashed on the way and
    /// checked against the fingerprint and size before the rename into place,
    /// so a destination path never holds a partial file. Source read failures
    /// are `Read` errors (per-file); destination failures are `DestinationWrite`.
    pub fn copy(
        &self,
        source: &Path,
        relative: &Path,
        hash: &ContentHash,
        size: u64,
    ) -> Result<CopyOutcome, Error> {
        if self.is_intact(relative, hash, size) {
            debug!("Adopting existing library file {}", relative.display());
            return Ok(CopyOutcome {
                library_path: relative.to_path_buf(),
                bytes: size,
                adopted: true,
            });
        }

        let dest = self.destination(relative);
        let write_err = |path: &Path, source: io::Error| Error::DestinationWrite {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|e| write_err(parent, e))?;
        }

        let part = part_path(&dest);
        let result = self
            .copy_to_part(source, &part, hash, size)
            .and_then(|()| self.verify_part(&part, hash));
        if let Err(err) = result {
            if part.exists() {
                if let Err(e) = fs::remove_file(&part) {
                    warn!("Cannot remove partial copy {}: {}", part.display(), e);
                }
            }
            return Err(err);
        }

        fs::rename(&part, &dest).map_err(|e| write_err(&dest, e))?;

        trace!("Copied {} -> {}", source.display(), dest.display());
        Ok(CopyOutcome {
            library_path: relative.to_path_buf(),
            bytes: size,
            adopted: false,
        })
    }

    /// Re-read the staged copy when verification is on. Runs before the rename.
    fn verify_part(&self, part: &Path, hash: &ContentHash) -> Result<(), Error> {
        if !self.verify {
            return Ok(());
        }
        let staged = hasher::hash_file(part).map_err(|e| Error::DestinationWrite {
            path: part.to_path_buf(),
            source: io::Error::new(io::ErrorKind::Other, e.to_string()),
        })?;
        if staged != *hash {
            return Err(Error::DestinationWrite {
                path: part.to_path_buf(),
                source: io::Error::new(io::ErrorKind::InvalidData, "copy does not match source hash"),
            });
        }
        Ok(())
    }

    fn copy_to_part(
        &self,
        source: &Path,
        part: &Path,
        hash: &ContentHash,
        size: u64,
    ) -> Result<(), Error> {
        let read_err = |e: io::Error| Error::Read {
            path: source.to_path_buf(),
            source: e,
        };
        let write_err = |e: io::Error| Error::DestinationWrite {
            path: part.to_path_buf(),
            source: e,
        };

        let mut input = File::open(source).map_err(read_err)?;
        let modified = input.metadata().and_then(|m| m.modified()).ok();
        let mut output = File::create(part).map_err(write_err)?;

        let mut hasher = blake3::Hasher::new();
        let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
        let mut written = 0u64;
        loop {
            let n = match input.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(read_err(e)),
            };
            hasher.update(&buffer[..n]);
            output.write_all(&buffer[..n]).map_err(write_err)?;
            written += n as u64;
        }
        output.sync_all().map_err(write_err)?;

        let copied_hash = ContentHash::from(hasher.finalize());
        if copied_hash != *hash || written != size {
            return Err(read_err(io::Error::new(
                io::ErrorKind::InvalidData,
                "source changed since it was fingerprinted",
            )));
        }
        let on_disk = output.metadata().map_err(write_err)?.len();
        if on_disk != size {
            return Err(write_err(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("wrote {} of {} bytes", on_disk, size),
            )));
        }

        if let Some(modified) = modified {
            if let Err(e) = output.set_modified(modified) {
                debug!("Cannot preserve mtime on {}: {}", part.display(), e);
            }
        }
        Ok(())
    }
}

fn part_path(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    dest.with_file_name(format!("{}{}", name, PART_SUFFIX))
}
