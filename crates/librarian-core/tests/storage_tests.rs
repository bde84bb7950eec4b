use librarian_core::hasher::hash_data;
use librarian_core::storage::models::*;
use librarian_core::storage::Catalog;
use librarian_core::Error;
use tempfile::tempdir;

fn make_entry(library_path: &str, content: &[u8], category: &str) -> LibraryEntry {
    LibraryEntry {
        content_hash: hash_data(content),
        library_path: library_path.to_string(),
        file_name: library_path.rsplit('/').next().unwrap_or(library_path).to_string(),
        original_path: format!("/sources/{}", library_path),
        size: content.len() as i64,
        category: category.to_string(),
        quality_score: 1,
        indexed_at: "2024-01-01T00:00:00+00:00".to_string(),
    }
}

fn seeded_catalog() -> Catalog {
    let catalog = Catalog::open_in_memory().unwrap();
    catalog
        .commit_batch(
            &[
                make_entry("Documents/PDF/Player_Handbook.pdf", b"phb", "Documents/PDF"),
                make_entry("Documents/PDF/handbook-2.pdf", b"phb2", "Documents/PDF"),
                make_entry("Documents/Text/100%_notes.txt", b"notes", "Documents/Text"),
                make_entry("Media/Audio/theme.mp3", b"theme", "Media/Audio"),
            ],
            &[],
        )
        .unwrap();
    catalog
}

#[test]
fn test_create_and_finish_run() {
    let catalog = Catalog::open_in_memory().unwrap();
    let run_id = catalog
        .create_run(&["/src/a".to_string(), "/src/b".to_string()])
        .unwrap();
    assert!(run_id > 0);

    let counts = RunCounts {
        files_scanned: 42,
        files_copied: 30,
        files_redundant: 10,
        files_failed: 2,
    };
    catalog.finish_run(run_id, "completed", &counts).unwrap();

    let runs = catalog.list_runs(5).unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, "completed");
    assert_eq!(runs[0].files_scanned, 42);
    assert_eq!(runs[0].files_failed, 2);
    assert!(runs[0].completed_at.is_some());
    assert_eq!(runs[0].source_roots, "[\"/src/a\",\"/src/b\"]");
}

#[test]
fn test_upsert_is_idempotent() {
    let catalog = Catalog::open_in_memory().unwrap();
    let entry = make_entry("Documents/Text/a.txt", b"aaa", "Documents/Text");

    assert_eq!(catalog.commit_batch(&[entry.clone()], &[]).unwrap(), 1);
    // Same content and placement: nothing changes, not even the timestamp.
    let mut again = entry.clone();
    again.indexed_at = "2030-01-01T00:00:00+00:00".to_string();
    assert_eq!(catalog.commit_batch(&[again], &[]).unwrap(), 0);

    let stored = catalog.get_by_hash(&entry.content_hash).unwrap().unwrap();
    assert_eq!(stored, entry);
    assert_eq!(catalog.entry_count().unwrap(), 1);
}

#[test]
fn test_upsert_updates_changed_placement() {
    let catalog = Catalog::open_in_memory().unwrap();
    let entry = make_entry("Miscellaneous/a.bin", b"aaa", "Miscellaneous");
    catalog.commit_batch(&[entry.clone()], &[]).unwrap();

    let mut moved = entry.clone();
    moved.library_path = "Archives/a.bin".to_string();
    moved.category = "Archives".to_string();
    assert_eq!(catalog.commit_batch(&[moved], &[]).unwrap(), 1);

    assert_eq!(catalog.entry_count().unwrap(), 1);
    let stored = catalog.get_by_hash(&entry.content_hash).unwrap().unwrap();
    assert_eq!(stored.library_path, "Archives/a.bin");
    assert!(catalog.get_by_library_path("Miscellaneous/a.bin").unwrap().is_none());
}

#[test]
fn test_failed_batch_is_rolled_back_entirely() {
    let catalog = Catalog::open_in_memory().unwrap();
    let first = make_entry("Documents/Text/same.txt", b"one", "Documents/Text");
    // Distinct content claiming the same library path violates uniqueness.
    let clash = make_entry("Documents/Text/same.txt", b"two", "Documents/Text");
    let redundant = RedundantSource {
        source_path: "/sources/dup.txt".to_string(),
        content_hash: first.content_hash,
        selected_path: first.library_path.clone(),
    };

    let err = catalog
        .commit_batch(&[first, clash], &[redundant])
        .unwrap_err();
    assert!(matches!(err, Error::IndexCommit { .. }));
    assert_eq!(catalog.entry_count().unwrap(), 0);
    assert_eq!(catalog.redundant_count().unwrap(), 0);
}

#[test]
fn test_redundant_sources_recorded_once() {
    let catalog = Catalog::open_in_memory().unwrap();
    let entry = make_entry("Documents/PDF/book.pdf", b"book", "Documents/PDF");
    let redundant = vec![
        RedundantSource {
            source_path: "/b/book copy.pdf".to_string(),
            content_hash: entry.content_hash,
            selected_path: entry.library_path.clone(),
        },
        RedundantSource {
            source_path: "/a/book (1).pdf".to_string(),
            content_hash: entry.content_hash,
            selected_path: entry.library_path.clone(),
        },
    ];
    catalog.commit_batch(&[entry.clone()], &redundant).unwrap();
    catalog.commit_batch(&[], &redundant).unwrap();

    let sources = catalog.redundant_sources_for(&entry.content_hash).unwrap();
    assert_eq!(sources.len(), 2);
    assert_eq!(sources[0].source_path, "/a/book (1).pdf");
    assert_eq!(catalog.redundant_count().unwrap(), 2);
}

#[test]
fn test_file_name_lookup_exact_and_substring() {
    let catalog = seeded_catalog();

    let exact = catalog.find_by_file_name("theme.mp3", true).unwrap();
    assert_eq!(exact.len(), 1);
    assert!(catalog.find_by_file_name("theme", true).unwrap().is_empty());

    let mut names: Vec<String> = catalog
        .find_by_file_name("HANDBOOK", false)
        .unwrap()
        .into_iter()
        .map(|e| e.file_name)
        .collect();
    names.sort();
    assert_eq!(names, vec!["Player_Handbook.pdf", "handbook-2.pdf"]);
}

#[test]
fn test_like_wildcards_match_literally() {
    let catalog = seeded_catalog();
    let hits = catalog.find_by_file_name("100%", false).unwrap();
    assert_eq!(hits.len(), 1);
    assert!(catalog.find_by_file_name("%", false).unwrap().len() == 1);
    // `_` must not match an arbitrary character such as the `-` in "handbook-2".
    assert!(catalog.find_by_file_name("k_2", false).unwrap().is_empty());
}

#[test]
fn test_category_lookup_and_listing() {
    let catalog = seeded_catalog();
    assert_eq!(catalog.find_by_category("Documents/PDF", true).unwrap().len(), 2);
    assert_eq!(catalog.find_by_category("documents", false).unwrap().len(), 3);
    assert!(catalog.find_by_category("Documents", true).unwrap().is_empty());

    let categories = catalog.list_categories().unwrap();
    assert_eq!(
        categories,
        vec![
            ("Documents/PDF".to_string(), 2),
            ("Documents/Text".to_string(), 1),
            ("Media/Audio".to_string(), 1),
        ]
    );
}

#[test]
fn test_combined_search_with_paging() {
    let catalog = seeded_catalog();
    let query = SearchQuery {
        file_name: Some("book".to_string()),
        category: Some("PDF".to_string()),
        ..SearchQuery::default()
    };
    assert_eq!(catalog.search(&query).unwrap().len(), 2);

    let first_page = catalog
        .search(&SearchQuery {
            limit: 1,
            ..query.clone()
        })
        .unwrap();
    let second_page = catalog
        .search(&SearchQuery {
            limit: 1,
            offset: 1,
            ..query
        })
        .unwrap();
    assert_eq!(first_page.len(), 1);
    assert_eq!(second_page.len(), 1);
    assert_ne!(first_page[0].library_path, second_page[0].library_path);

    let everything = catalog.search(&SearchQuery::default()).unwrap();
    assert_eq!(everything.len(), 4);
}

#[test]
fn test_read_only_handle_sees_commits_but_cannot_write() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("library_index.sqlite");
    let writer = Catalog::open(&path).unwrap();
    writer
        .commit_batch(&[make_entry("Misc/x.bin", b"x", "Misc")], &[])
        .unwrap();

    let reader = Catalog::open_read_only(&path).unwrap();
    assert_eq!(reader.entry_count().unwrap(), 1);
    assert_eq!(reader.total_bytes().unwrap(), 1);
    let write = reader
        .connection()
        .execute("DELETE FROM library_entry", []);
    assert!(write.is_err());
    assert_eq!(writer.entry_count().unwrap(), 1);
}

#[test]
fn test_reopen_keeps_entries_and_schema_version() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("library_index.sqlite");
    {
        let catalog = Catalog::open(&path).unwrap();
        catalog
            .commit_batch(&[make_entry("Misc/y.bin", b"y", "Misc")], &[])
            .unwrap();
    }
    let catalog = Catalog::open(&path).unwrap();
    assert_eq!(catalog.entry_count().unwrap(), 1);
    let version: i64 = catalog
        .connection()
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .unwrap();
    assert_eq!(version, 1);
}
