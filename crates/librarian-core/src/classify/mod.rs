//! Category assignment for selected files.
//!
//! A category only chooses the destination sub-directory and the catalog
//! label. It never feeds scoring or hashing.

pub mod knowledge;
pub mod timed;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::config::LibraryConfig;
pub use knowledge::KnowledgeBaseClassifier;
pub use timed::TimedClassifier;

/// Slash-separated category label, e.g. `Documents/PDF`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Category(String);

impl Category {
    /// Build from label segments. Empty segments are dropped and each
    /// segment is made safe to use as a directory name.
    pub fn from_segments<S: AsRef<str>>(segments: &[S]) -> Option<Self> {
        let parts: Vec<String> = segments
            .iter()
            .map(|s| sanitize_segment(s.as_ref()))
            .filter(|s| !s.is_empty())
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(Category(parts.join("/")))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn to_relative_dir(&self) -> PathBuf {
        self.0.split('/').collect()
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn sanitize_segment(segment: &str) -> String {
    let cleaned: String = segment
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    cleaned.trim_matches(|c: char| c == '.' || c.is_whitespace()).to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifyRequest {
    pub path: PathBuf,
    pub file_name: String,
}

impl ClassifyRequest {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            file_name: path
                .file_name()
                .map(|f| f.to_string_lossy().into_owned())
                .unwrap_or_default(),
        }
    }

    pub fn extension(&self) -> Option<String> {
        self.path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
    }
}

/// Category hint source. `None` means "no opinion".
pub trait Classifier: Send + Sync {
    fn classify(&self, request: &ClassifyRequest) -> Option<Category>;
}

/// Always abstains. Used when no knowledge base is configured.
pub struct NoopClassifier;

impl Classifier for NoopClassifier {
    fn classify(&self, _request: &ClassifyRequest) -> Option<Category> {
        None
    }
}

/// Extension-keyed fallback. Always answers.
pub struct TypeClassifier;

impl TypeClassifier {
    pub fn category_for(&self, request: &ClassifyRequest) -> Category {
        let segments: &[&str] = match request.extension().as_deref() {
            Some("pdf") => &["Documents", "PDF"],
            Some("doc" | "docx" | "odt" | "rtf" | "xls" | "xlsx" | "ods" | "ppt" | "pptx"
            | "odp") => &["Documents", "Office"],
            Some("txt" | "md" | "csv" | "json" | "xml" | "html" | "htm" | "log") => {
                &["Documents", "Text"]
            }
            Some("mp3" | "wav" | "ogg" | "flac" | "m4a" | "aac" | "wma") => &["Media", "Audio"],
            Some("mp4" | "avi" | "mkv" | "mov" | "wmv" | "webm" | "m4v") => &["Media", "Video"],
            Some("jpg" | "jpeg" | "png" | "gif" | "bmp" | "tif" | "tiff" | "webp" | "svg") => {
                &["Media", "Images"]
            }
            Some("zip" | "rar" | "7z" | "tar" | "gz" | "bz2" | "xz" | "tgz") => &["Archives"],
            _ => &["Miscellaneous"],
        };
        Category(segments.join("/"))
    }
}

impl Classifier for TypeClassifier {
    fn classify(&self, request: &ClassifyRequest) -> Option<Category> {
        Some(self.category_for(request))
    }
}

/// Asks the hint source first and falls back to the file type.
pub struct CategoryResolver {
    hint: Arc<dyn Classifier>,
    fallback: TypeClassifier,
}

impl CategoryResolver {
    pub fn new(hint: Arc<dyn Classifier>) -> Self {
        Self {
            hint,
            fallback: TypeClassifier,
        }
    }

    /// Resolver for the configured knowledge base. A missing or unreadable
    /// database degrades to type-only classification.
    pub fn from_config(config: &LibraryConfig) -> Self {
        let Some(db_path) = &config.classifier.knowledge_db else {
            return Self::new(Arc::new(NoopClassifier));
        };
        match KnowledgeBaseClassifier::open(db_path) {
            Ok(kb) => {
                let timeout = Duration::from_millis(config.classifier.timeout_ms);
                Self::new(Arc::new(TimedClassifier::new(Arc::new(kb), timeout)))
            }
            Err(e) => {
                warn!(
                    "Knowledge base {} unavailable, classifying by file type only: {}",
                    db_path.display(),
                    e
                );
                Self::new(Arc::new(NoopClassifier))
            }
        }
    }

    pub fn resolve(&self, path: &Path) -> Category {
        let request = ClassifyRequest::new(path);
        self.hint
            .classify(&request)
            .unwrap_or_else(|| self.fallback.category_for(&request))
    }
}

impl Default for CategoryResolver {
    fn default() -> Self {
        Self::new(Arc::new(NoopClassifier))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(&'static str);

    impl Classifier for Fixed {
        fn classify(&self, _request: &ClassifyRequest) -> Option<Category> {
            Category::from_segments(&[self.0])
        }
    }

    #[test]
    fn test_type_classifier_uses_extension_case_insensitively() {
        let tc = TypeClassifier;
        let cat = |p: &str| tc.category_for(&ClassifyRequest::new(Path::new(p))).to_string();
        assert_eq!(cat("/a/Report.PDF"), "Documents/PDF");
        assert_eq!(cat("/a/song.flac"), "Media/Audio");
        assert_eq!(cat("/a/photo.jpeg"), "Media/Images");
        assert_eq!(cat("/a/bundle.tar"), "Archives");
        assert_eq!(cat("/a/README"), "Miscellaneous");
    }

    #[test]
    fn test_resolver_prefers_hint_then_falls_back() {
        let resolver = CategoryResolver::new(Arc::new(Fixed("Rulebooks")));
        assert_eq!(resolver.resolve(Path::new("/x/a.pdf")).as_str(), "Rulebooks");

        let resolver = CategoryResolver::default();
        assert_eq!(resolver.resolve(Path::new("/x/a.pdf")).as_str(), "Documents/PDF");
    }

    #[test]
    fn test_category_segments_are_sanitized() {
        let cat = Category::from_segments(&["D&D", "1e/2e", "", " Module: Adventure "]).unwrap();
        assert_eq!(cat.as_str(), "D&D/1e_2e/Module_ Adventure");
        assert_eq!(
            cat.to_relative_dir(),
            PathBuf::from("D&D").join("1e_2e").join("Module_ Adventure")
        );
        assert!(Category::from_segments(&["..", " "]).is_none());
    }
}
