use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};

use crate::candidate::ContentHash;

/// A file physically present in the library. Unique by hash and by path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryEntry {
    pub content_hash: ContentHash,
    /// Library-relative path with `/` separators.
    pub library_path: String,
    pub file_name: String,
    pub original_path: String,
    pub size: i64,
    pub category: String,
    pub quality_score: i64,
    pub indexed_at: String,
}

/// Audit row for a source file skipped as a duplicate of a selected one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedundantSource {
    pub source_path: String,
    pub content_hash: ContentHash,
    pub selected_path: String,
}

/// One invocation of the build or resume pipeline.
#[derive(Debug, Clone)]
pub struct LibraryRun {
    pub id: i64,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub status: String,
    pub source_roots: String,
    pub files_scanned: i64,
    pub files_copied: i64,
    pub files_redundant: i64,
    pub files_failed: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunCounts {
    pub files_scanned: i64,
    pub files_copied: i64,
    pub files_redundant: i64,
    pub files_failed: i64,
}

/// Search request from the browse side. Empty fields do not filter.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    pub file_name: Option<String>,
    pub category: Option<String>,
    /// Exact match instead of substring.
    pub exact: bool,
    pub limit: i64,
    pub offset: i64,
}

impl Default for SearchQuery {
    fn default() -> Self {
        Self {
            file_name: None,
            category: None,
            exact: false,
            limit: 100,
            offset: 0,
        }
    }
}

impl ToSql for ContentHash {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.to_hex()))
    }
}

impl FromSql for ContentHash {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let text = value.as_str()?;
        text.parse()
            .map_err(|e: String| FromSqlError::Other(e.into()))
    }
}
