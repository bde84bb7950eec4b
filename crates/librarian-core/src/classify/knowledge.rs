use ahash::AHashMap;
use rusqlite::{Connection, OpenFlags};
use std::path::{Component, Path};
use tracing::{debug, info};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use super::{Category, Classifier, ClassifyRequest};
use crate::error::Error;

/// Matches file names against a product knowledge base.
///
/// The database is read once at open and then closed, so lookups never
/// touch SQLite and the classifier can be shared across threads.
pub struct KnowledgeBaseClassifier {
    /// Normalized title or product code → category, longest key first.
    products: Vec<(String, Category)>,
    /// Normalized system or edition name → system label.
    systems: AHashMap<String, String>,
}

type ProductRow = (Option<String>, Option<String>, Option<String>, Option<String>, Option<String>);

impl KnowledgeBaseClassifier {
    pub fn open(path: &Path) -> Result<Self, Error> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        let mut products: AHashMap<String, Category> = AHashMap::new();
        let mut systems: AHashMap<String, String> = AHashMap::new();

        let rows = load_rows(
            &conn,
            "SELECT product_code, title, game_system, edition, category FROM products",
        )?;
        for (code, title, system, edition, category) in rows {
            let Some(cat) = product_category(&system, &edition, &category) else {
                continue;
            };
            for key in [code, title].into_iter().flatten() {
                let key = normalize_key(&key);
                if !key.is_empty() {
                    products.insert(key, cat.clone());
                }
            }
            if let Some(system) = system.filter(|s| !normalize_key(s).is_empty()) {
                systems.insert(normalize_key(&system), system.clone());
                if let Some(edition) = edition.as_deref() {
                    let key = normalize_key(edition);
                    if !key.is_empty() {
                        systems.entry(key).or_insert(system);
                    }
                }
            }
        }

        // Older knowledge bases have no alternate_titles table.
        match load_rows(
            &conn,
            "SELECT alt_title, product_code, game_system, edition, category FROM alternate_titles",
        ) {
            Ok(rows) => {
                for (alt, _code, system, edition, category) in rows {
                    let (Some(alt), Some(cat)) = (alt, product_category(&system, &edition, &category))
                    else {
                        continue;
                    };
                    let key = normalize_key(&alt);
                    if key.is_empty() {
                        continue;
                    }
                    products.insert(key.clone(), cat);
                    if let Some(system) = system {
                        systems.insert(key, system);
                    }
                }
            }
            Err(e) => debug!("No alternate titles in knowledge base: {}", e),
        }

        Ok(Self::from_parts(products, systems))
    }

    fn from_parts(products: AHashMap<String, Category>, systems: AHashMap<String, String>) -> Self {
        let mut products: Vec<(String, Category)> = products.into_iter().collect();
        products.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));
        info!(
            "Knowledge base loaded: {} product keys, {} system keywords",
            products.len(),
            systems.len()
        );
        Self { products, systems }
    }

    fn by_file_name(&self, file_name: &str) -> Option<Category> {
        let name = normalize_key(file_name);
        if name.is_empty() {
            return None;
        }
        self.products
            .iter()
            .find(|(key, _)| name.contains(key.as_str()))
            .map(|(_, cat)| cat.clone())
    }

    fn by_folder(&self, path: &Path) -> Option<Category> {
        let parent = path.parent()?;
        parent
            .components()
            .rev()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(normalize_key(&part.to_string_lossy())),
                _ => None,
            })
            .filter(|part| !part.is_empty())
            .find_map(|part| self.systems.get(&part))
            .and_then(|system| Category::from_segments(&[system.as_str(), "From Folder"]))
    }
}

impl Classifier for KnowledgeBaseClassifier {
    fn classify(&self, request: &ClassifyRequest) -> Option<Category> {
        self.by_file_name(&request.file_name)
            .or_else(|| self.by_folder(&request.path))
    }
}

fn load_rows(conn: &Connection, sql: &str) -> rusqlite::Result<Vec<ProductRow>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map([], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

fn product_category(
    system: &Option<String>,
    edition: &Option<String>,
    category: &Option<String>,
) -> Option<Category> {
    let segments: Vec<&str> = [system, edition, category]
        .into_iter()
        .filter_map(|s| s.as_deref())
        .collect();
    Category::from_segments(&segments)
}

/// Lowercase ASCII alphanumerics after NFKD with combining marks removed.
pub fn normalize_key(text: &str) -> String {
    text.nfkd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .filter(|c| c.is_ascii_alphanumeric())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn knowledge_db(dir: &Path, with_alternates: bool) -> std::path::PathBuf {
        let path = dir.join("knowledge.sqlite");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE products (
                id INTEGER PRIMARY KEY, product_code TEXT, title TEXT NOT NULL,
                game_system TEXT NOT NULL, edition TEXT, category TEXT, source_url TEXT);
             INSERT INTO products (product_code, title, game_system, edition, category)
                VALUES ('TSR9037', 'Dungeon Masters Guide', 'D&D', '1e', 'Core Rules');
             INSERT INTO products (product_code, title, game_system, edition, category)
                VALUES (NULL, 'Guide', 'Generic', NULL, 'Misc');",
        )
        .unwrap();
        if with_alternates {
            conn.execute_batch(
                "CREATE TABLE alternate_titles (
                    alt_title TEXT, product_code TEXT, game_system TEXT, edition TEXT, category TEXT);
                 INSERT INTO alternate_titles VALUES ('Manuel du Maître', NULL, 'D&D', '1e', 'Core Rules (FR)');",
            )
            .unwrap();
        }
        path
    }

    #[test]
    fn test_normalize_key_strips_accents_and_punctuation() {
        assert_eq!(normalize_key("Manuel du Maître!"), "manueldumaitre");
        assert_eq!(normalize_key("TSR 9037"), "tsr9037");
        assert_eq!(normalize_key("  "), "");
    }

    #[test]
    fn test_longest_title_wins() {
        let tmp = tempdir().unwrap();
        let kb = KnowledgeBaseClassifier::open(&knowledge_db(tmp.path(), false)).unwrap();
        let request = ClassifyRequest::new(Path::new("/dl/Dungeon_Masters_Guide (scan).pdf"));
        assert_eq!(kb.classify(&request).unwrap().as_str(), "D&D/1e/Core Rules");
    }

    #[test]
    fn test_alternate_titles_and_folder_hints() {
        let tmp = tempdir().unwrap();
        let kb = KnowledgeBaseClassifier::open(&knowledge_db(tmp.path(), true)).unwrap();

        let request = ClassifyRequest::new(Path::new("/dl/manuel-du-maitre.pdf"));
        assert_eq!(kb.classify(&request).unwrap().as_str(), "D&D/1e/Core Rules (FR)");

        let request = ClassifyRequest::new(Path::new("/games/D&D/random.pdf"));
        assert_eq!(kb.classify(&request).unwrap().as_str(), "D&D/From Folder");

        let request = ClassifyRequest::new(Path::new("/other/random.pdf"));
        assert!(kb.classify(&request).is_none());
    }

    #[test]
    fn test_missing_database_is_an_error() {
        let tmp = tempdir().unwrap();
        assert!(KnowledgeBaseClassifier::open(&tmp.path().join("absent.sqlite")).is_err());
    }
}
