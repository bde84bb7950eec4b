use lopdf::content::Content;
use lopdf::{Document, Object};
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use tracing::{debug, warn};

use super::{Evaluation, QualityProbe};
use crate::candidate::{FormatFlags, QualityScore};
use crate::error::Error;

const VALID_BONUS: i32 = 2;
const TEXT_LAYER_BONUS: i32 = 4;
const SIZE_BONUS: i32 = 1;
const EMPTY_PENALTY: i32 = 1;
/// Pages inspected for a text layer before giving up.
const MAX_PAGES_TO_CHECK: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PdfInspection {
    pub page_count: usize,
    pub has_text_layer: bool,
    pub version: String,
}

pub struct PdfProbe {
    min_document_size: u64,
}

impl PdfProbe {
    pub fn new(min_document_size: u64) -> Self {
        Self { min_document_size }
    }

    /// Parse the document and look for a machine-readable text layer.
    pub fn inspect(path: &Path) -> Result<PdfInspection, Error> {
        let format_err = |message: String| Error::Format {
            path: path.to_path_buf(),
            message,
        };

        // lopdf can panic on hostile input; treat that as a malformed file.
        let loaded = panic::catch_unwind(AssertUnwindSafe(|| Document::load(path)))
            .map_err(|_| format_err("parser panicked".into()))?;
        let doc = loaded.map_err(|e| format_err(e.to_string()))?;

        let root = doc
            .trailer
            .get(b"Root")
            .and_then(Object::as_reference)
            .and_then(|id| doc.get_dictionary(id))
            .map_err(|e| format_err(format!("missing catalog: {}", e)))?;
        root.get(b"Pages")
            .map_err(|e| format_err(format!("missing page tree: {}", e)))?;

        let pages = doc.get_pages();
        let mut has_text_layer = false;
        for (number, page_id) in pages.iter().take(MAX_PAGES_TO_CHECK) {
            let raw = match doc.get_page_content(*page_id) {
                Ok(raw) => raw,
                Err(e) => {
                    debug!("Unreadable content on page {} of {}: {}", number, path.display(), e);
                    continue;
                }
            };
            let Ok(content) = Content::decode(&raw) else {
                continue;
            };
            if content
                .operations
                .iter()
                .any(|op| shows_text(&op.operator, &op.operands))
            {
                has_text_layer = true;
                break;
            }
        }

        Ok(PdfInspection {
            page_count: pages.len(),
            has_text_layer,
            version: doc.version.clone(),
        })
    }

    fn score_inspection(&self, inspection: &PdfInspection, size: u64) -> (QualityScore, FormatFlags) {
        let mut flags = FormatFlags {
            is_document: true,
            is_valid_document: true,
            ..FormatFlags::default()
        };
        if inspection.page_count == 0 {
            flags.is_empty = true;
            return (QualityScore(VALID_BONUS - EMPTY_PENALTY), flags);
        }

        let mut score = VALID_BONUS;
        if inspection.has_text_layer {
            flags.has_text_layer = true;
            score += TEXT_LAYER_BONUS;
        }
        if size > self.min_document_size {
            score += SIZE_BONUS;
        }
        (QualityScore(score), flags)
    }
}

impl QualityProbe for PdfProbe {
    fn evaluate(&self, path: &Path, size: u64) -> Evaluation {
        match Self::inspect(path) {
            Ok(inspection) => {
                let (score, flags) = self.score_inspection(&inspection, size);
                Evaluation {
                    score,
                    flags,
                    version: Some(inspection.version),
                }
            }
            Err(err) => {
                warn!("{}", err);
                Evaluation {
                    score: QualityScore::MIN,
                    flags: FormatFlags {
                        is_document: true,
                        ..FormatFlags::default()
                    },
                    version: None,
                }
            }
        }
    }
}

fn shows_text(operator: &str, operands: &[Object]) -> bool {
    matches!(operator, "Tj" | "TJ" | "'" | "\"") && operands.iter().any(has_visible_text)
}

fn has_visible_text(object: &Object) -> bool {
    match object {
        Object::String(bytes, _) => bytes.iter().any(|b| !b.is_ascii_whitespace()),
        Object::Array(items) => items.iter().any(has_visible_text),
        _ => false,
    }
}
