pub mod models;
pub mod queries;
pub mod sqlite;

pub use models::{LibraryEntry, LibraryRun, RedundantSource, RunCounts, SearchQuery};
pub use sqlite::Catalog;
