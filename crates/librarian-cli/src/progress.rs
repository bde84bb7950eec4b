use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use librarian_core::ProgressReporter;
use std::sync::Mutex;
use std::time::Duration;

const TICK_CHARS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";

/// CLI progress reporter using indicatif progress bars.
///
/// - Scan phase: spinner (unknown total files upfront)
/// - Fingerprint phase: progress bar over scanned files
/// - Copy phase: progress bar over selected files
pub struct CliReporter {
    bar: Mutex<Option<ProgressBar>>,
}

impl CliReporter {
    pub fn new() -> Self {
        Self {
            bar: Mutex::new(None),
        }
    }

    fn set_bar(&self, pb: ProgressBar) {
        if let Ok(mut guard) = self.bar.lock() {
            if let Some(old) = guard.replace(pb) {
                old.finish_and_clear();
            }
        }
    }

    fn finish_bar(&self) {
        if let Ok(mut guard) = self.bar.lock() {
            if let Some(pb) = guard.take() {
                pb.finish_and_clear();
            }
        }
    }

    fn with_bar(&self, f: impl FnOnce(&ProgressBar)) {
        if let Ok(guard) = self.bar.lock() {
            if let Some(pb) = guard.as_ref() {
                f(pb);
            }
        }
    }

    fn counting_bar(total: usize, label: &str) -> ProgressBar {
        let pb = ProgressBar::new(total as u64);
        let template = format!(
            "  {{spinner:.cyan}} {} [{{bar:30.cyan/dim}}] {{pos}}/{{len}} files ({{eta}} remaining)",
            label
        );
        let style = ProgressStyle::with_template(&template)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("━╸─")
            .tick_chars(TICK_CHARS);
        pb.set_style(style);
        pb.enable_steady_tick(Duration::from_millis(80));
        pb
    }
}

fn done(message: String) {
    eprintln!("  {} {}", "✓".green(), message);
}

impl ProgressReporter for CliReporter {
    fn on_scan_start(&self) {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_chars(TICK_CHARS),
        );
        pb.set_message("Scanning source roots...");
        pb.enable_steady_tick(Duration::from_millis(80));
        self.set_bar(pb);
    }

    fn on_scan_progress(&self, files_found: usize, _current_path: &str) {
        self.with_bar(|pb| pb.set_message(format!("Scanning... {} files found", files_found)));
    }

    fn on_scan_complete(&self, total_files: usize, duration_secs: f64) {
        self.finish_bar();
        done(format!(
            "Scan complete: {} files in {:.2}s",
            total_files, duration_secs
        ));
    }

    fn on_fingerprint_start(&self, total_files: usize) {
        self.set_bar(Self::counting_bar(total_files, "Fingerprinting"));
    }

    fn on_fingerprint_progress(&self, files_done: usize, _total_files: usize) {
        self.with_bar(|pb| pb.set_position(files_done as u64));
    }

    fn on_fingerprint_complete(&self, hash_groups: usize, duration_secs: f64) {
        self.finish_bar();
        done(format!(
            "Fingerprinting complete: {} distinct contents in {:.2}s",
            hash_groups, duration_secs
        ));
    }

    fn on_resolve_complete(&self, selected: usize, redundant: usize) {
        done(format!(
            "Selected {} files, {} redundant copies skipped",
            selected, redundant
        ));
    }

    fn on_copy_start(&self, total_selected: usize) {
        self.set_bar(Self::counting_bar(total_selected, "Copying"));
    }

    fn on_file_copied(&self, library_path: &str, _bytes: u64) {
        self.with_bar(|pb| {
            pb.inc(1);
            pb.set_message(library_path.to_string());
        });
    }

    fn on_batch_indexed(&self, _entries: usize, total_indexed: usize) {
        self.with_bar(|pb| pb.println(format!("    indexed {} entries", total_indexed)));
    }

    fn on_copy_complete(&self, copied: usize, duration_secs: f64) {
        self.finish_bar();
        done(format!(
            "Library complete: {} files copied in {:.2}s",
            copied, duration_secs
        ));
    }
}
