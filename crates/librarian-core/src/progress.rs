/// Trait for reporting library build progress.
///
/// The CLI implements it with indicatif bars. All methods have default no-op
/// implementations. Fingerprint hooks are called from worker threads.
pub trait ProgressReporter: Send + Sync {
    fn on_scan_start(&self) {}
    fn on_scan_progress(&self, _files_found: usize, _current_path: &str) {}
    fn on_scan_complete(&self, _total_files: usize, _duration_secs: f64) {}
    fn on_fingerprint_start(&self, _total_files: usize) {}
    fn on_fingerprint_progress(&self, _files_done: usize, _total_files: usize) {}
    fn on_fingerprint_complete(&self, _hash_groups: usize, _duration_secs: f64) {}
    fn on_resolve_complete(&self, _selected: usize, _redundant: usize) {}
    fn on_copy_start(&self, _total_selected: usize) {}
    fn on_file_copied(&self, _library_path: &str, _bytes: u64) {}
    fn on_batch_indexed(&self, _entries: usize, _total_indexed: usize) {}
    fn on_copy_complete(&self, _copied: usize, _duration_secs: f64) {}
}

/// No-op progress reporter for silent operation.
pub struct SilentReporter;

impl ProgressReporter for SilentReporter {}
