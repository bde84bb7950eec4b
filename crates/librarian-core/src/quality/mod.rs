//! Format-aware quality scoring.
//!
//! The format is sniffed from the leading bytes of the file, never from its
//! name, so byte-identical files always receive identical scores.

pub mod pdf;

use std::path::Path;

use crate::candidate::{FormatFlags, QualityScore};
pub use pdf::PdfProbe;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Pdf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Document(DocumentFormat),
    Generic,
}

pub fn detect_format(head: &[u8]) -> FileFormat {
    if head.starts_with(b"%PDF-") {
        FileFormat::Document(DocumentFormat::Pdf)
    } else {
        FileFormat::Generic
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub score: QualityScore,
    pub flags: FormatFlags,
    /// Format version string when the probe found one (e.g. "1.4").
    pub version: Option<String>,
}

impl Evaluation {
    pub fn neutral() -> Self {
        Self {
            score: QualityScore::NEUTRAL,
            flags: FormatFlags::default(),
            version: None,
        }
    }
}

/// Scoring capability for one format.
pub trait QualityProbe: Send + Sync {
    fn evaluate(&self, path: &Path, size: u64) -> Evaluation;
}

/// Baseline for formats without a content model: every file weighs the same.
pub struct GenericProbe;

impl QualityProbe for GenericProbe {
    fn evaluate(&self, _path: &Path, _size: u64) -> Evaluation {
        Evaluation::neutral()
    }
}

pub struct QualityEvaluator {
    pdf: PdfProbe,
    generic: GenericProbe,
}

impl QualityEvaluator {
    pub fn new(min_document_size: u64) -> Self {
        Self {
            pdf: PdfProbe::new(min_document_size),
            generic: GenericProbe,
        }
    }

    pub fn probe_for(&self, format: FileFormat) -> &dyn QualityProbe {
        match format {
            FileFormat::Document(DocumentFormat::Pdf) => &self.pdf,
            FileFormat::Generic => &self.generic,
        }
    }

    /// Score a fingerprinted file. `head` is the leading bytes captured while hashing.
    pub fn score(&self, path: &Path, size: u64, head: &[u8]) -> Evaluation {
        self.probe_for(detect_format(head)).evaluate(path, size)
    }
}
