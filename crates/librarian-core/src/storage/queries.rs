use rusqlite::{params, params_from_iter, OptionalExtension, Result, Row};
use tracing::debug;

use super::models::*;
use super::sqlite::Catalog;
use crate::candidate::ContentHash;
use crate::error::Error;

const ENTRY_COLUMNS: &str = "content_hash, library_path, file_name, original_path, size, \
                             category, quality_score, indexed_at";

fn entry_from_row(row: &Row<'_>) -> Result<LibraryEntry> {
    Ok(LibraryEntry {
        content_hash: row.get(0)?,
        library_path: row.get(1)?,
        file_name: row.get(2)?,
        original_path: row.get(3)?,
        size: row.get(4)?,
        category: row.get(5)?,
        quality_score: row.get(6)?,
        indexed_at: row.get(7)?,
    })
}

/// Escape `%`, `_` and `\` so user text matches literally inside LIKE.
fn like_pattern(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len() + 2);
    escaped.push('%');
    for c in text.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

impl Catalog {
    // ── Indexing ─────────────────────────────────────────────────

    /// Apply one batch atomically: upsert entries keyed by content hash and
    /// record redundant sources. Any failure rolls the whole batch back.
    pub fn commit_batch(
        &self,
        entries: &[LibraryEntry],
        redundant: &[RedundantSource],
    ) -> std::result::Result<usize, Error> {
        self.commit_batch_inner(entries, redundant)
            .map_err(|source| Error::IndexCommit { source })
    }

    fn commit_batch_inner(
        &self,
        entries: &[LibraryEntry],
        redundant: &[RedundantSource],
    ) -> Result<usize> {
        // Dropping an uncommitted transaction rolls it back.
        let tx = self.connection().unchecked_transaction()?;
        let mut count = 0;
        {
            let mut entry_stmt = tx.prepare_cached(
                "INSERT INTO library_entry \
                 (content_hash, library_path, file_name, original_path, size, \
                  category, quality_score, indexed_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8) \
                 ON CONFLICT(content_hash) DO UPDATE SET \
                     library_path = excluded.library_path, \
                     file_name = excluded.file_name, \
                     original_path = excluded.original_path, \
                     size = excluded.size, \
                     category = excluded.category, \
                     quality_score = excluded.quality_score, \
                     indexed_at = excluded.indexed_at \
                 WHERE library_entry.library_path <> excluded.library_path \
                    OR library_entry.original_path <> excluded.original_path \
                    OR library_entry.category <> excluded.category \
                    OR library_entry.size <> excluded.size \
                    OR library_entry.quality_score <> excluded.quality_score",
            )?;
            for entry in entries {
                count += entry_stmt.execute(params![
                    entry.content_hash,
                    entry.library_path,
                    entry.file_name,
                    entry.original_path,
                    entry.size,
                    entry.category,
                    entry.quality_score,
                    entry.indexed_at,
                ])?;
            }

            let mut redundant_stmt = tx.prepare_cached(
                "INSERT INTO redundant_source (source_path, content_hash, selected_path) \
                 VALUES (?1, ?2, ?3) \
                 ON CONFLICT(source_path) DO UPDATE SET \
                     content_hash = excluded.content_hash, \
                     selected_path = excluded.selected_path",
            )?;
            for r in redundant {
                redundant_stmt.execute(params![r.source_path, r.content_hash, r.selected_path])?;
            }
        }
        tx.commit()?;
        debug!(
            "Committed catalog batch: {} entries changed, {} redundant sources",
            count,
            redundant.len()
        );
        Ok(count)
    }

    // ── Runs ─────────────────────────────────────────────────────

    pub fn create_run(&self, source_roots: &[String]) -> Result<i64> {
        let roots_json = serde_json::to_string(source_roots).unwrap_or_default();
        let now = chrono::Utc::now().to_rfc3339();
        self.connection().execute(
            "INSERT INTO library_run (started_at, status, source_roots) VALUES (?1, 'running', ?2)",
            params![now, roots_json],
        )?;
        Ok(self.connection().last_insert_rowid())
    }

    pub fn finish_run(&self, run_id: i64, status: &str, counts: &RunCounts) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        self.connection().execute(
            "UPDATE library_run SET completed_at = ?1, status = ?2, files_scanned = ?3, \
             files_copied = ?4, files_redundant = ?5, files_failed = ?6 WHERE id = ?7",
            params![
                now,
                status,
                counts.files_scanned,
                counts.files_copied,
                counts.files_redundant,
                counts.files_failed,
                run_id
            ],
        )?;
        Ok(())
    }

    pub fn list_runs(&self, limit: i64) -> Result<Vec<LibraryRun>> {
        let mut stmt = self.connection().prepare(
            "SELECT id, started_at, completed_at, status, source_roots, files_scanned, \
                    files_copied, files_redundant, files_failed \
             FROM library_run ORDER BY id DESC LIMIT ?1",
        )?;
        let runs = stmt
            .query_map(params![limit], |row| {
                Ok(LibraryRun {
                    id: row.get(0)?,
                    started_at: row.get(1)?,
                    completed_at: row.get(2)?,
                    status: row.get(3)?,
                    source_roots: row.get(4)?,
                    files_scanned: row.get(5)?,
                    files_copied: row.get(6)?,
                    files_redundant: row.get(7)?,
                    files_failed: row.get(8)?,
                })
            })?
            .collect::<Result<Vec<_>>>()?;
        Ok(runs)
    }

    // ── Lookups ──────────────────────────────────────────────────

    pub fn get_by_hash(&self, hash: &ContentHash) -> Result<Option<LibraryEntry>> {
        self.connection()
            .query_row(
                &format!("SELECT {} FROM library_entry WHERE content_hash = ?1", ENTRY_COLUMNS),
                params![hash],
                entry_from_row,
            )
            .optional()
    }

    pub fn get_by_library_path(&self, library_path: &str) -> Result<Option<LibraryEntry>> {
        self.connection()
            .query_row(
                &format!("SELECT {} FROM library_entry WHERE library_path = ?1", ENTRY_COLUMNS),
                params![library_path],
                entry_from_row,
            )
            .optional()
    }

    pub fn all_entries(&self) -> Result<Vec<LibraryEntry>> {
        let mut stmt = self.connection().prepare(&format!(
            "SELECT {} FROM library_entry ORDER BY library_path",
            ENTRY_COLUMNS
        ))?;
        let entries = stmt
            .query_map([], entry_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(entries)
    }

    pub fn entry_count(&self) -> Result<i64> {
        self.connection()
            .query_row("SELECT COUNT(*) FROM library_entry", [], |row| row.get(0))
    }

    pub fn total_bytes(&self) -> Result<i64> {
        self.connection().query_row(
            "SELECT COALESCE(SUM(size), 0) FROM library_entry",
            [],
            |row| row.get(0),
        )
    }

    pub fn find_by_file_name(&self, name: &str, exact: bool) -> Result<Vec<LibraryEntry>> {
        self.search(&SearchQuery {
            file_name: Some(name.to_string()),
            exact,
            limit: i64::MAX,
            ..SearchQuery::default()
        })
    }

    pub fn find_by_category(&self, category: &str, exact: bool) -> Result<Vec<LibraryEntry>> {
        self.search(&SearchQuery {
            category: Some(category.to_string()),
            exact,
            limit: i64::MAX,
            ..SearchQuery::default()
        })
    }

    /// Exact or substring (case-insensitive) match on file name and/or category.
    pub fn search(&self, query: &SearchQuery) -> Result<Vec<LibraryEntry>> {
        let mut sql = format!("SELECT {} FROM library_entry WHERE 1=1", ENTRY_COLUMNS);
        let mut values: Vec<String> = Vec::new();

        for (column, value) in [("file_name", &query.file_name), ("category", &query.category)] {
            let Some(value) = value.as_deref().filter(|v| !v.is_empty()) else {
                continue;
            };
            if query.exact {
                sql.push_str(&format!(" AND {} = ?{}", column, values.len() + 1));
                values.push(value.to_string());
            } else {
                sql.push_str(&format!(
                    " AND {} LIKE ?{} ESCAPE '\\'",
                    column,
                    values.len() + 1
                ));
                values.push(like_pattern(value));
            }
        }
        sql.push_str(&format!(
            " ORDER BY file_name, library_path LIMIT {} OFFSET {}",
            query.limit.max(0),
            query.offset.max(0)
        ));

        let mut stmt = self.connection().prepare(&sql)?;
        let entries = stmt
            .query_map(params_from_iter(values.iter()), entry_from_row)?
            .collect::<Result<Vec<_>>>()?;
        Ok(entries)
    }

    /// Distinct categories with their entry counts.
    pub fn list_categories(&self) -> Result<Vec<(String, i64)>> {
        let mut stmt = self.connection().prepare(
            "SELECT category, COUNT(*) FROM library_entry GROUP BY category ORDER BY category",
        )?;
        let categories = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>>>()?;
        Ok(categories)
    }

    pub fn redundant_sources_for(&self, hash: &ContentHash) -> Result<Vec<RedundantSource>> {
        let mut stmt = self.connection().prepare(
            "SELECT source_path, content_hash, selected_path FROM redundant_source \
             WHERE content_hash = ?1 ORDER BY source_path",
        )?;
        let sources = stmt
            .query_map(params![hash], |row| {
                Ok(RedundantSource {
                    source_path: row.get(0)?,
                    content_hash: row.get(1)?,
                    selected_path: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>>>()?;
        Ok(sources)
    }

    pub fn redundant_count(&self) -> Result<i64> {
        self.connection()
            .query_row("SELECT COUNT(*) FROM redundant_source", [], |row| row.get(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("50%_off\\"), "%50\\%\\_off\\\\%");
        assert_eq!(like_pattern("plain"), "%plain%");
    }
}
