use ahash::{AHashMap, AHashSet};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, error, warn};

use crate::candidate::{ContentHash, FileCandidate, FormatFlags, QualityScore};
use crate::error::Error;

/// One line of the checkpoint log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum CheckpointRecord {
    RunStarted {
        run_id: String,
        started_at: String,
    },
    Fingerprinted {
        path: PathBuf,
        size: u64,
        modified_ns: u64,
        hash: ContentHash,
        score: QualityScore,
        flags: FormatFlags,
    },
    Failed {
        path: PathBuf,
        reason: String,
    },
    Copied {
        hash: ContentHash,
        source: PathBuf,
        library_path: PathBuf,
        size: u64,
    },
    Indexed {
        hash: ContentHash,
        library_path: PathBuf,
    },
    RunCompleted {
        run_id: String,
        completed_at: String,
    },
}

impl CheckpointRecord {
    pub fn fingerprinted(candidate: &FileCandidate, hash: ContentHash) -> Self {
        CheckpointRecord::Fingerprinted {
            path: candidate.path.clone(),
            size: candidate.size,
            modified_ns: candidate.modified_ns,
            hash,
            score: candidate.quality_score,
            flags: candidate.format_flags,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FingerprintEntry {
    pub size: u64,
    pub modified_ns: u64,
    pub hash: ContentHash,
    pub score: QualityScore,
    pub flags: FormatFlags,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CopiedEntry {
    pub source: PathBuf,
    pub library_path: PathBuf,
    pub size: u64,
}

/// "Already done" view derived once from the log at startup.
#[derive(Debug, Default)]
pub struct ResumeState {
    pub run_id: Option<String>,
    pub completed: bool,
    pub fingerprints: AHashMap<PathBuf, FingerprintEntry>,
    pub copied: AHashMap<ContentHash, CopiedEntry>,
    pub indexed: AHashSet<ContentHash>,
    pub failed: usize,
}

impl ResumeState {
    pub fn from_records(records: &[CheckpointRecord]) -> Self {
        let mut state = ResumeState::default();
        for record in records {
            state.apply(record);
        }
        state
    }

    fn apply(&mut self, record: &CheckpointRecord) {
        match record {
            CheckpointRecord::RunStarted { run_id, .. } => {
                self.run_id = Some(run_id.clone());
                self.completed = false;
            }
            CheckpointRecord::Fingerprinted {
                path,
                size,
                modified_ns,
                hash,
                score,
                flags,
            } => {
                self.fingerprints.insert(
                    path.clone(),
                    FingerprintEntry {
                        size: *size,
                        modified_ns: *modified_ns,
                        hash: *hash,
                        score: *score,
                        flags: *flags,
                    },
                );
            }
            CheckpointRecord::Failed { path, .. } => {
                self.fingerprints.remove(path);
                self.failed += 1;
            }
            CheckpointRecord::Copied {
                hash,
                source,
                library_path,
                size,
            } => {
                self.copied.insert(
                    *hash,
                    CopiedEntry {
                        source: source.clone(),
                        library_path: library_path.clone(),
                        size: *size,
                    },
                );
            }
            CheckpointRecord::Indexed { hash, .. } => {
                self.indexed.insert(*hash);
            }
            CheckpointRecord::RunCompleted { .. } => self.completed = true,
        }
    }

    /// Fingerprint recorded for this file, if the file is unchanged since.
    pub fn fingerprint_for(&self, candidate: &FileCandidate) -> Option<&FingerprintEntry> {
        self.fingerprints
            .get(&candidate.path)
            .filter(|fp| fp.size == candidate.size && fp.modified_ns == candidate.modified_ns)
    }

    pub fn is_empty(&self) -> bool {
        self.run_id.is_none() && self.fingerprints.is_empty() && self.copied.is_empty()
    }
}

/// Read every record from a checkpoint file. A missing file is an empty log.
///
/// An unparsable final line is a write cut short by an interruption and is
/// dropped. An unparsable line anywhere else is `CheckpointCorruption`.
pub fn read_records(path: &Path) -> Result<Vec<CheckpointRecord>, Error> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let lines: Vec<String> = BufReader::new(file)
        .split(b'\n')
        .map(|line| line.map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
        .collect::<Result<_, _>>()?;

    let last_content_line = lines.iter().rposition(|l| !l.trim().is_empty());
    let mut records = Vec::with_capacity(lines.len());
    for (index, line) in lines.iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<CheckpointRecord>(line) {
            Ok(record) => records.push(record),
            Err(e) if Some(index) == last_content_line => {
                warn!(
                    "Ignoring truncated final checkpoint line {} in {}: {}",
                    index + 1,
                    path.display(),
                    e
                );
            }
            Err(e) => {
                return Err(Error::CheckpointCorruption {
                    path: path.to_path_buf(),
                    line: index + 1,
                    message: e.to_string(),
                })
            }
        }
    }
    debug!("Loaded {} checkpoint records from {}", records.len(), path.display());
    Ok(records)
}

/// Like `read_records`, but corruption degrades to an empty log (full rescan).
pub fn read_records_or_reset(path: &Path) -> Result<Vec<CheckpointRecord>, Error> {
    match read_records(path) {
        Err(err @ Error::CheckpointCorruption { .. }) => {
            error!(
                "{}. Discarding checkpoint; every file will be processed again",
                err
            );
            Ok(Vec::new())
        }
        other => other,
    }
}

/// Append-only writer. Shared by the fingerprint workers behind one lock.
pub struct CheckpointLog {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl CheckpointLog {
    /// Start a new, empty log, replacing any existing file.
    pub fn create(path: &Path) -> Result<Self, Error> {
        Self::rewrite(path, &[])
    }

    /// Replace the log with `records` (dropping any truncated tail), then keep appending.
    pub fn rewrite(path: &Path, records: &[CheckpointRecord]) -> Result<Self, Error> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let staging = path.with_extension("jsonl.tmp");
        {
            let mut out = BufWriter::new(File::create(&staging)?);
            for record in records {
                serde_json::to_writer(&mut out, record)?;
                out.write_all(b"\n")?;
            }
            out.flush()?;
            out.get_ref().sync_data()?;
        }
        fs::rename(&staging, path)?;

        let file = OpenOptions::new().append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, record: &CheckpointRecord) -> Result<(), Error> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        let mut writer = self
            .writer
            .lock()
            .map_err(|e| Error::Other(format!("Failed to lock checkpoint: {}", e)))?;
        writer.write_all(&line)?;
        Ok(())
    }

    /// Make everything appended so far durable.
    pub fn flush(&self) -> Result<(), Error> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|e| Error::Other(format!("Failed to lock checkpoint: {}", e)))?;
        writer.flush()?;
        writer.get_ref().sync_data()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hasher::hash_data;
    use tempfile::tempdir;

    fn fingerprinted(path: &str, content: &[u8]) -> CheckpointRecord {
        CheckpointRecord::Fingerprinted {
            path: PathBuf::from(path),
            size: content.len() as u64,
            modified_ns: 42,
            hash: hash_data(content),
            score: QualityScore(3),
            flags: FormatFlags::default(),
        }
    }

    #[test]
    fn test_append_and_reload() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("cp").join("checkpoint.jsonl");
        let log = CheckpointLog::create(&path).unwrap();
        log.append(&CheckpointRecord::RunStarted {
            run_id: "r1".into(),
            started_at: "now".into(),
        })
        .unwrap();
        log.append(&fingerprinted("/src/a.txt", b"a")).unwrap();
        log.append(&CheckpointRecord::Copied {
            hash: hash_data(b"a"),
            source: PathBuf::from("/src/a.txt"),
            library_path: PathBuf::from("Misc/a.txt"),
            size: 1,
        })
        .unwrap();
        log.flush().unwrap();

        let records = read_records(&path).unwrap();
        assert_eq!(records.len(), 3);
        let state = ResumeState::from_records(&records);
        assert_eq!(state.run_id.as_deref(), Some("r1"));
        assert!(!state.completed);
        assert_eq!(
            state.copied[&hash_data(b"a")].library_path,
            PathBuf::from("Misc/a.txt")
        );
    }

    #[test]
    fn test_truncated_final_line_is_ignored() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("checkpoint.jsonl");
        let good = serde_json::to_string(&fingerprinted("/src/a.txt", b"a")).unwrap();
        fs::write(&path, format!("{}\n{{\"stage\":\"copied\",\"ha", good)).unwrap();

        let records = read_records(&path).unwrap();
        assert_eq!(records, vec![fingerprinted("/src/a.txt", b"a")]);

        // Rewriting drops the torn tail so later appends stay parseable.
        let log = CheckpointLog::rewrite(&path, &records).unwrap();
        log.append(&fingerprinted("/src/b.txt", b"b")).unwrap();
        log.flush().unwrap();
        assert_eq!(read_records(&path).unwrap().len(), 2);
    }

    #[test]
    fn test_corrupt_middle_line_resets_to_empty() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("checkpoint.jsonl");
        let good = serde_json::to_string(&fingerprinted("/src/a.txt", b"a")).unwrap();
        fs::write(&path, format!("{}\nnot json at all\n{}\n", good, good)).unwrap();

        assert!(matches!(
            read_records(&path),
            Err(Error::CheckpointCorruption { line: 2, .. })
        ));
        assert!(read_records_or_reset(&path).unwrap().is_empty());
    }

    #[test]
    fn test_missing_checkpoint_is_empty() {
        let tmp = tempdir().unwrap();
        assert!(read_records(&tmp.path().join("none.jsonl")).unwrap().is_empty());
    }

    #[test]
    fn test_fingerprint_reused_only_for_unchanged_file() {
        let state = ResumeState::from_records(&[fingerprinted("/src/a.txt", b"abc")]);
        let mut candidate = FileCandidate::discovered(0, PathBuf::from("/src/a.txt"), 3, None);
        candidate.modified_ns = 42;
        assert!(state.fingerprint_for(&candidate).is_some());

        candidate.modified_ns = 43;
        assert!(state.fingerprint_for(&candidate).is_none());
    }
}
