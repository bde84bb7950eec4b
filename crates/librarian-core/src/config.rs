use config::{Config, ConfigError, Environment, File as ConfigFile};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::Error;

const DEFAULT_BATCH_SIZE: usize = 100;
const DEFAULT_MIN_DOCUMENT_SIZE: u64 = 10_240;
const DEFAULT_CLASSIFIER_TIMEOUT_MS: u64 = 2_000;

/// Immutable run configuration. Built once at startup and handed to every component.
#[derive(Debug, Clone, Deserialize)]
pub struct LibraryConfig {
    pub source_roots: Vec<PathBuf>,
    pub library_root: PathBuf,
    #[serde(default)]
    pub catalog_path: Option<PathBuf>,
    #[serde(default)]
    pub checkpoint_path: Option<PathBuf>,
    #[serde(default)]
    pub ignore_patterns: Vec<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub memory_threshold_mb: Option<u64>,
    #[serde(default)]
    pub max_workers: Option<usize>,
    #[serde(default = "default_min_document_size")]
    pub min_document_size_bytes: u64,
    #[serde(default = "default_true")]
    pub skip_resource_forks: bool,
    #[serde(default)]
    pub verify_copies: bool,
    #[serde(default)]
    pub classifier: ClassifierConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClassifierConfig {
    /// Read-only knowledge database used for category hints.
    #[serde(default)]
    pub knowledge_db: Option<PathBuf>,
    #[serde(default = "default_classifier_timeout")]
    pub timeout_ms: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            knowledge_db: None,
            timeout_ms: DEFAULT_CLASSIFIER_TIMEOUT_MS,
        }
    }
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_min_document_size() -> u64 {
    DEFAULT_MIN_DOCUMENT_SIZE
}

fn default_classifier_timeout() -> u64 {
    DEFAULT_CLASSIFIER_TIMEOUT_MS
}

fn default_true() -> bool {
    true
}

impl LibraryConfig {
    /// Configuration with defaults for everything but the roots.
    pub fn new(source_roots: Vec<PathBuf>, library_root: impl Into<PathBuf>) -> Self {
        Self {
            source_roots,
            library_root: library_root.into(),
            catalog_path: None,
            checkpoint_path: None,
            ignore_patterns: Vec::new(),
            batch_size: DEFAULT_BATCH_SIZE,
            memory_threshold_mb: None,
            max_workers: None,
            min_document_size_bytes: DEFAULT_MIN_DOCUMENT_SIZE,
            skip_resource_forks: true,
            verify_copies: false,
            classifier: ClassifierConfig::default(),
        }
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.catalog_path
            .clone()
            .unwrap_or_else(|| self.library_root.join("library_index.sqlite"))
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.checkpoint_path
            .clone()
            .unwrap_or_else(|| self.library_root.join(".librarian").join("checkpoint.jsonl"))
    }

    /// Startup preflight. Any failure here is fatal before file work begins.
    pub fn validate(&self) -> Result<(), Error> {
        if self.source_roots.is_empty() {
            return Err(Error::Config("no source roots configured".into()));
        }
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be at least 1".into()));
        }

        for root in &self.source_roots {
            let metadata = fs::metadata(root).map_err(|e| {
                Error::Config(format!("source root {} is not accessible: {}", root.display(), e))
            })?;
            if !metadata.is_dir() {
                return Err(Error::Config(format!(
                    "source root {} is not a directory",
                    root.display()
                )));
            }
            fs::read_dir(root).map_err(|e| {
                Error::Config(format!("source root {} is not readable: {}", root.display(), e))
            })?;
        }

        if self.library_root.as_os_str().is_empty() {
            return Err(Error::Config("library_root is not set".into()));
        }
        fs::create_dir_all(&self.library_root).map_err(|e| {
            Error::Config(format!(
                "cannot create library root {}: {}",
                self.library_root.display(),
                e
            ))
        })?;
        let probe = self.library_root.join(".librarian-write-probe");
        fs::write(&probe, b"probe").map_err(|e| {
            Error::Config(format!(
                "library root {} is not writable: {}",
                self.library_root.display(),
                e
            ))
        })?;
        if let Err(e) = fs::remove_file(&probe) {
            debug!("Cannot remove write probe {}: {}", probe.display(), e);
        }

        if let Some(root) = self
            .source_roots
            .iter()
            .find(|root| is_within(root, &self.library_root))
        {
            return Err(Error::Config(format!(
                "source root {} lies inside the library root {}",
                root.display(),
                self.library_root.display()
            )));
        }

        debug!("Configuration preflight passed");
        Ok(())
    }
}

pub fn load_configuration() -> Result<LibraryConfig, ConfigError> {
    let builder = Config::builder()
        .add_source(ConfigFile::with_name("Librarian").required(false))
        .add_source(environment_source())
        .build()?;
    builder.try_deserialize::<LibraryConfig>()
}

/// `LIBRARIAN__*` variables; `LIBRARIAN__SOURCE_ROOTS` takes a comma-separated list.
fn environment_source() -> Environment {
    Environment::with_prefix("LIBRARIAN")
        .separator("__")
        .list_separator(",")
        .with_list_parse_key("source_roots")
        .try_parsing(true)
}

/// Remove directories that are subdirectories of other directories in the list.
pub fn non_overlapping_directories(dirs: &[PathBuf]) -> Vec<PathBuf> {
    let mut result: Vec<PathBuf> = Vec::new();

    for dir in dirs {
        if result.iter().any(|kept| dir.starts_with(kept)) {
            continue;
        }
        result.retain(|kept| !kept.starts_with(dir));
        result.push(dir.clone());
    }

    result
}

/// True when `path` lies at or below `root`, comparing canonical forms when available.
pub fn is_within(path: &Path, root: &Path) -> bool {
    let path = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    let root = fs::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
    path.starts_with(root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_non_overlapping_no_overlap() {
        let dirs = vec![
            PathBuf::from("/home/user/photos"),
            PathBuf::from("/home/user/docs"),
            PathBuf::from("/var/data"),
        ];
        let result = non_overlapping_directories(&dirs);
        assert_eq!(result, dirs);
    }

    #[test]
    fn test_non_overlapping_with_subdirectory() {
        let dirs = vec![
            PathBuf::from("/home/user/docs"),
            PathBuf::from("/home/user"),
            PathBuf::from("/var/data"),
            PathBuf::from("/home/user/docs/old"),
        ];
        let result = non_overlapping_directories(&dirs);
        assert_eq!(
            result,
            vec![PathBuf::from("/home/user"), PathBuf::from("/var/data")]
        );
    }

    #[test]
    fn test_defaults_derive_store_paths() {
        let config = LibraryConfig::new(vec![PathBuf::from("/src")], "/lib");
        assert_eq!(config.catalog_path(), PathBuf::from("/lib/library_index.sqlite"));
        assert_eq!(
            config.checkpoint_path(),
            PathBuf::from("/lib/.librarian/checkpoint.jsonl")
        );
        assert_eq!(config.batch_size, 100);
        assert!(config.skip_resource_forks);
    }

    #[test]
    fn test_validate_rejects_missing_source_root() {
        let tmp = tempdir().unwrap();
        let config = LibraryConfig::new(
            vec![tmp.path().join("does-not-exist")],
            tmp.path().join("library"),
        );
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_file_as_source_root() {
        let tmp = tempdir().unwrap();
        let file = tmp.path().join("plain.txt");
        fs::write(&file, "x").unwrap();
        let config = LibraryConfig::new(vec![file], tmp.path().join("library"));
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_creates_library_root() {
        let tmp = tempdir().unwrap();
        let source = tmp.path().join("src");
        fs::create_dir_all(&source).unwrap();
        let library = tmp.path().join("nested").join("library");
        let config = LibraryConfig::new(vec![source], &library);
        config.validate().unwrap();
        assert!(library.is_dir());
        assert!(!library.join(".librarian-write-probe").exists());
    }

    #[test]
    fn test_validate_rejects_source_inside_library() {
        let tmp = tempdir().unwrap();
        let library = tmp.path().join("library");
        let source = library.join("incoming");
        fs::create_dir_all(&source).unwrap();
        let config = LibraryConfig::new(vec![source], &library);
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_environment_accepts_comma_separated_source_roots() {
        let vars: config::Map<String, String> = [
            ("LIBRARIAN__SOURCE_ROOTS", "/mnt/a,/mnt/b"),
            ("LIBRARIAN__LIBRARY_ROOT", "/lib"),
            ("LIBRARIAN__BATCH_SIZE", "25"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        let cfg: LibraryConfig = Config::builder()
            .add_source(environment_source().source(Some(vars)))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(
            cfg.source_roots,
            vec![PathBuf::from("/mnt/a"), PathBuf::from("/mnt/b")]
        );
        assert_eq!(cfg.batch_size, 25);
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let cfg: LibraryConfig = Config::builder()
            .set_override("source_roots", vec!["/a", "/b"])
            .unwrap()
            .set_override("library_root", "/lib")
            .unwrap()
            .set_override("batch_size", 7)
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(cfg.source_roots.len(), 2);
        assert_eq!(cfg.batch_size, 7);
        assert_eq!(cfg.min_document_size_bytes, DEFAULT_MIN_DOCUMENT_SIZE);
        assert_eq!(cfg.classifier.timeout_ms, DEFAULT_CLASSIFIER_TIMEOUT_MS);
    }
}
