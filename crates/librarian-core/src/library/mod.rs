pub mod checkpoint;
pub mod copy;

use std::path::{Path, PathBuf};

pub use checkpoint::{CheckpointLog, CheckpointRecord, ResumeState};
pub use copy::{CopyOutcome, Copier};

const UNCATEGORIZED: &str = "Miscellaneous";

/// Catalog form of a library-relative path: components joined with `/`.
pub fn library_path_string(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

pub fn relative_from_catalog(library_path: &str) -> PathBuf {
    library_path.split('/').filter(|s| !s.is_empty()).collect()
}

/// The category a library file was filed under: its directory inside the library.
pub fn category_label(relative: &Path) -> String {
    relative
        .parent()
        .map(library_path_string)
        .filter(|label| !label.is_empty())
        .unwrap_or_else(|| UNCATEGORIZED.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_paths_use_forward_slashes() {
        let relative = Path::new("Documents").join("PDF").join("report.pdf");
        assert_eq!(library_path_string(&relative), "Documents/PDF/report.pdf");
        assert_eq!(relative_from_catalog("Documents/PDF/report.pdf"), relative);
        assert_eq!(category_label(&relative), "Documents/PDF");
        assert_eq!(category_label(Path::new("loose.bin")), "Miscellaneous");
    }
}
