pub mod candidate;
pub mod classify;
pub mod config;
pub mod dedup;
pub mod engine;
pub mod error;
pub mod hasher;
pub mod library;
pub mod progress;
pub mod quality;
pub mod resources;
pub mod scanner;
pub mod storage;

pub use candidate::{ContentHash, FileCandidate, FormatFlags, QualityScore};
pub use config::LibraryConfig;
pub use engine::{LibraryEngine, RunReport};
pub use error::Error;
pub use progress::{ProgressReporter, SilentReporter};
pub use storage::Catalog;
