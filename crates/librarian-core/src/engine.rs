use rayon::prelude::*;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

use crate::candidate::{CandidateState, FileCandidate};
use crate::classify::{CategoryResolver, Classifier};
use crate::config::LibraryConfig;
use crate::dedup::{collect_groups, resolve_all, CollisionNamer, GroupMap, HashGroup, Resolution};
use crate::error::Error;
use crate::hasher;
use crate::library::checkpoint::{self, CheckpointLog, CheckpointRecord, ResumeState};
use crate::library::{category_label, library_path_string, relative_from_catalog, Copier};
use crate::progress::ProgressReporter;
use crate::quality::QualityEvaluator;
use crate::resources::ResourcePlan;
use crate::scanner::Scanner;
use crate::storage::{Catalog, LibraryEntry, RedundantSource, RunCounts};

const SCAN_PROGRESS_INTERVAL: usize = 500;

/// Drives one library run: scan, fingerprint and score in parallel, then
/// select, name, copy and index on a single coordinating thread.
pub struct LibraryEngine {
    config: LibraryConfig,
    categories: CategoryResolver,
    cancel: Arc<AtomicBool>,
}

#[derive(Debug, Default, Clone)]
pub struct RunReport {
    /// Row id in the catalog's `library_run` table.
    pub run_id: i64,
    /// Run identifier written to the checkpoint; kept across resumes.
    pub run_label: String,
    pub files_scanned: usize,
    pub fingerprints_reused: usize,
    pub files_failed: usize,
    pub hash_groups: usize,
    pub files_redundant: usize,
    pub files_copied: usize,
    /// Destinations that already held the right bytes.
    pub files_adopted: usize,
    /// Content already catalogued and intact in the library.
    pub already_indexed: usize,
    pub entries_indexed: usize,
    pub bytes_copied: u64,
    pub cancelled: bool,
    pub scan_duration: Duration,
    pub fingerprint_duration: Duration,
    pub library_duration: Duration,
}

impl RunReport {
    pub fn counts(&self) -> RunCounts {
        RunCounts {
            files_scanned: self.files_scanned as i64,
            files_copied: (self.files_copied + self.files_adopted) as i64,
            files_redundant: self.files_redundant as i64,
            files_failed: self.files_failed as i64,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Fresh,
    Resume,
}

enum FingerprintOutcome {
    Computed(FileCandidate),
    Reused(FileCandidate),
    Failed,
}

/// Where a hash group landed in the library.
struct Placement {
    library_path: String,
    /// Index into the group's preference order of the member actually used.
    source_index: usize,
    /// Row to upsert; `None` when the catalog already has it.
    entry: Option<LibraryEntry>,
}

#[derive(Default)]
struct PendingBatch {
    entries: Vec<LibraryEntry>,
    redundant: Vec<RedundantSource>,
    /// Members whose bytes back `entries`, awaiting the catalog commit.
    sources: Vec<FileCandidate>,
}

impl PendingBatch {
    fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.redundant.is_empty()
    }

    /// Mark the copied members indexed once their rows are committed, emptying the batch.
    fn take_indexed(&mut self) -> Vec<FileCandidate> {
        self.entries.clear();
        self.redundant.clear();
        let mut sources = std::mem::take(&mut self.sources);
        for source in &mut sources {
            source.advance(CandidateState::Indexed);
        }
        sources
    }
}

impl LibraryEngine {
    pub fn new(config: LibraryConfig) -> Self {
        let categories = CategoryResolver::from_config(&config);
        Self {
            config,
            categories,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Replace the configured category hint source.
    pub fn with_classifier(mut self, hint: Arc<dyn Classifier>) -> Self {
        self.categories = CategoryResolver::new(hint);
        self
    }

    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn config(&self) -> &LibraryConfig {
        &self.config
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// Fresh run. Any previous checkpoint is discarded; the catalog is kept,
    /// so content already in the library is not copied again.
    pub fn build(&self, reporter: &dyn ProgressReporter) -> Result<RunReport, Error> {
        self.run(Mode::Fresh, reporter)
    }

    /// Continue an interrupted run from its checkpoint: unchanged files keep
    /// their fingerprints, finished copies are adopted and names are reused.
    pub fn resume(&self, reporter: &dyn ProgressReporter) -> Result<RunReport, Error> {
        self.run(Mode::Resume, reporter)
    }

    fn run(&self, mode: Mode, reporter: &dyn ProgressReporter) -> Result<RunReport, Error> {
        self.config.validate()?;
        let plan = ResourcePlan::from_config(&self.config);
        let (log, state, run_label) = self.open_checkpoint(mode)?;

        let catalog_path = self.config.catalog_path();
        if let Some(parent) = catalog_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let catalog = Catalog::open(&catalog_path)?;
        let roots: Vec<String> = self
            .config
            .source_roots
            .iter()
            .map(|r| r.to_string_lossy().into_owned())
            .collect();

        let mut report = RunReport {
            run_id: catalog.create_run(&roots)?,
            run_label,
            ..RunReport::default()
        };

        let result = self.run_phases(&plan, &log, &state, &catalog, reporter, &mut report);

        if let Err(e) = log.flush() {
            error!("Failed to flush checkpoint {}: {}", log.path().display(), e);
        }
        let status = match &result {
            Ok(()) if report.cancelled => "cancelled",
            Ok(()) => "completed",
            Err(_) => "failed",
        };
        if let Err(e) = catalog.finish_run(report.run_id, status, &report.counts()) {
            warn!("Cannot record run status: {}", e);
        }

        match result {
            Ok(()) => {
                info!(
                    "Run {} {}: {} scanned, {} copied, {} adopted, {} redundant, {} failed",
                    report.run_id,
                    status,
                    report.files_scanned,
                    report.files_copied,
                    report.files_adopted,
                    report.files_redundant,
                    report.files_failed
                );
                Ok(report)
            }
            Err(e) => {
                error!("Run {} halted: {}", report.run_id, e);
                Err(e)
            }
        }
    }

    fn open_checkpoint(&self, mode: Mode) -> Result<(CheckpointLog, ResumeState, String), Error> {
        let path = self.config.checkpoint_path();
        let records = checkpoint::read_records_or_reset(&path)?;
        let started_at = chrono::Utc::now().to_rfc3339();
        let fresh_id = chrono::Utc::now().format("%Y%m%dT%H%M%S%.3fZ").to_string();

        match mode {
            Mode::Fresh => {
                let previous = ResumeState::from_records(&records);
                if !previous.is_empty() && !previous.completed {
                    warn!(
                        "Discarding checkpoint of interrupted run {}; use `resume` to continue one",
                        previous.run_id.as_deref().unwrap_or("unknown")
                    );
                }
                let log = CheckpointLog::create(&path)?;
                log.append(&CheckpointRecord::RunStarted {
                    run_id: fresh_id.clone(),
                    started_at,
                })?;
                Ok((log, ResumeState::default(), fresh_id))
            }
            Mode::Resume => {
                let state = ResumeState::from_records(&records);
                if state.is_empty() {
                    info!("No checkpoint at {}; starting from scratch", path.display());
                } else {
                    info!(
                        "Resuming run {}: {} fingerprints, {} copies, {} indexed",
                        state.run_id.as_deref().unwrap_or("unknown"),
                        state.fingerprints.len(),
                        state.copied.len(),
                        state.indexed.len()
                    );
                }
                let run_label = state.run_id.clone().unwrap_or(fresh_id);
                let log = CheckpointLog::rewrite(&path, &records)?;
                log.append(&CheckpointRecord::RunStarted {
                    run_id: run_label.clone(),
                    started_at,
                })?;
                Ok((log, state, run_label))
            }
        }
    }

    fn run_phases(
        &self,
        plan: &ResourcePlan,
        log: &CheckpointLog,
        state: &ResumeState,
        catalog: &Catalog,
        reporter: &dyn ProgressReporter,
        report: &mut RunReport,
    ) -> Result<(), Error> {
        let Some(groups) = self.fingerprint_phase(plan, log, state, reporter, report)? else {
            info!("Cancelled before every file was fingerprinted; nothing selected");
            report.cancelled = true;
            return Ok(());
        };
        log.flush()?;
        self.library_phase(groups, plan, log, state, catalog, reporter, report)
    }

    // Phase 1: scan, fingerprint, score

    fn fingerprint_phase(
        &self,
        plan: &ResourcePlan,
        log: &CheckpointLog,
        state: &ResumeState,
        reporter: &dyn ProgressReporter,
        report: &mut RunReport,
    ) -> Result<Option<Vec<HashGroup>>, Error> {
        info!("Scanning {} source roots...", self.config.source_roots.len());
        reporter.on_scan_start();
        let scan_start = Instant::now();
        let mut scanner = Scanner::from_config(&self.config);
        let mut candidates: Vec<FileCandidate> = Vec::new();
        for candidate in scanner.by_ref() {
            if self.is_cancelled() {
                return Ok(None);
            }
            if candidates.len() % SCAN_PROGRESS_INTERVAL == 0 {
                reporter.on_scan_progress(candidates.len(), &candidate.path.to_string_lossy());
            }
            candidates.push(candidate);
        }
        report.scan_duration = scan_start.elapsed();
        report.files_scanned = candidates.len();
        let counters = scanner.counters();
        debug!(
            "Scan completed in {:.2}s: {} files, {} broken links, {} unreadable, {} ignored",
            report.scan_duration.as_secs_f64(),
            counters.files,
            counters.broken_links,
            counters.unreadable,
            counters.ignored
        );
        reporter.on_scan_complete(candidates.len(), report.scan_duration.as_secs_f64());

        info!("Fingerprinting {} files on {} workers...", candidates.len(), plan.workers);
        let hash_start = Instant::now();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(plan.workers)
            .thread_name(|i| format!("librarian-worker-{}", i))
            .build()
            .map_err(|e| Error::Other(format!("Cannot start worker pool: {}", e)))?;
        let evaluator = QualityEvaluator::new(self.config.min_document_size_bytes);
        let groups = GroupMap::new();
        let total = candidates.len();
        let done = AtomicUsize::new(0);
        let reused = AtomicUsize::new(0);
        let failed = AtomicUsize::new(0);

        reporter.on_fingerprint_start(total);
        pool.install(|| {
            candidates.into_par_iter().try_for_each(|candidate| {
                if self.is_cancelled() {
                    return Ok(());
                }
                match self.fingerprint_one(candidate, &evaluator, state, log)? {
                    FingerprintOutcome::Computed(c) => push_member(&groups, c),
                    FingerprintOutcome::Reused(c) => {
                        reused.fetch_add(1, Ordering::Relaxed);
                        push_member(&groups, c);
                    }
                    FingerprintOutcome::Failed => {
                        failed.fetch_add(1, Ordering::Relaxed);
                    }
                }
                let n = done.fetch_add(1, Ordering::Relaxed) + 1;
                reporter.on_fingerprint_progress(n, total);
                Ok::<(), Error>(())
            })
        })?;

        report.fingerprints_reused = reused.into_inner();
        report.files_failed += failed.into_inner();
        if self.is_cancelled() {
            return Ok(None);
        }

        let groups = collect_groups(groups);
        report.fingerprint_duration = hash_start.elapsed();
        report.hash_groups = groups.len();
        debug!(
            "Fingerprinting completed in {:.2}s: {} hash groups, {} reused from checkpoint",
            report.fingerprint_duration.as_secs_f64(),
            groups.len(),
            report.fingerprints_reused
        );
        reporter.on_fingerprint_complete(groups.len(), report.fingerprint_duration.as_secs_f64());
        Ok(Some(groups))
    }

    fn fingerprint_one(
        &self,
        mut candidate: FileCandidate,
        evaluator: &QualityEvaluator,
        state: &ResumeState,
        log: &CheckpointLog,
    ) -> Result<FingerprintOutcome, Error> {
        if let Some(known) = state.fingerprint_for(&candidate) {
            candidate.content_hash = Some(known.hash);
            candidate.quality_score = known.score;
            candidate.format_flags = known.flags;
            candidate.advance(CandidateState::Fingerprinted);
            candidate.advance(CandidateState::Scored);
            return Ok(FingerprintOutcome::Reused(candidate));
        }

        match hasher::fingerprint(&candidate.path, Some(candidate.size)) {
            Ok(fp) => {
                candidate.content_hash = Some(fp.hash);
                candidate.advance(CandidateState::Fingerprinted);
                let evaluation = evaluator.score(&candidate.path, fp.bytes_read, &fp.head);
                candidate.quality_score = evaluation.score;
                candidate.format_flags = evaluation.flags;
                candidate.advance(CandidateState::Scored);
                log.append(&CheckpointRecord::fingerprinted(&candidate, fp.hash))?;
                Ok(FingerprintOutcome::Computed(candidate))
            }
            Err(e) if e.is_per_file() => {
                candidate.advance(CandidateState::Failed);
                warn!("{}; excluded from the library", e);
                log.append(&CheckpointRecord::Failed {
                    path: candidate.path,
                    reason: e.to_string(),
                })?;
                Ok(FingerprintOutcome::Failed)
            }
            Err(e) => Err(e),
        }
    }

    // Phase 2: select, name, copy, index

    #[allow(clippy::too_many_arguments)]
    fn library_phase(
        &self,
        groups: Vec<HashGroup>,
        plan: &ResourcePlan,
        log: &CheckpointLog,
        state: &ResumeState,
        catalog: &Catalog,
        reporter: &dyn ProgressReporter,
        report: &mut RunReport,
    ) -> Result<(), Error> {
        let resolutions = resolve_all(groups);
        let redundant_total: usize = resolutions.iter().map(|r| r.redundant.len()).sum();
        info!(
            "{} distinct files selected, {} redundant copies will not be copied",
            resolutions.len(),
            redundant_total
        );
        reporter.on_resolve_complete(resolutions.len(), redundant_total);

        let library_start = Instant::now();
        let copier = Copier::new(&self.config.library_root, self.config.verify_copies);
        let mut namer = self.seeded_namer(catalog, state)?;
        let mut batch = PendingBatch::default();

        reporter.on_copy_start(resolutions.len());
        for mut resolution in resolutions {
            if self.is_cancelled() {
                info!("Cancellation requested; committing finished work and stopping");
                report.cancelled = true;
                break;
            }

            let placed = self.place(
                &mut resolution, &copier, &mut namer, catalog, state, log, reporter, report,
            );
            let placement = match placed {
                Ok(placement) => placement,
                Err(e) => {
                    // Keep what this batch already copied before halting.
                    if let Err(commit_err) = self.commit(catalog, log, &mut batch, reporter, report) {
                        error!("Could not commit pending batch: {}", commit_err);
                    }
                    return Err(e);
                }
            };
            let Some(placement) = placement else {
                continue;
            };

            // Members tried before the one used already count as failed.
            let members = std::iter::once(&resolution.selected).chain(resolution.redundant.iter());
            for member in members.skip(placement.source_index + 1) {
                report.files_redundant += 1;
                batch.redundant.push(RedundantSource {
                    source_path: member.path.to_string_lossy().into_owned(),
                    content_hash: resolution.hash,
                    selected_path: placement.library_path.clone(),
                });
            }
            if let Some(entry) = placement.entry {
                batch.entries.push(entry);
                if let Some(source) = resolution.member(placement.source_index) {
                    batch.sources.push(source.clone());
                }
            }
            if batch.entries.len() >= plan.batch_size {
                self.commit(catalog, log, &mut batch, reporter, report)?;
            }
        }
        self.commit(catalog, log, &mut batch, reporter, report)?;

        if !report.cancelled {
            log.append(&CheckpointRecord::RunCompleted {
                run_id: report.run_label.clone(),
                completed_at: chrono::Utc::now().to_rfc3339(),
            })?;
        }
        log.flush()?;

        report.library_duration = library_start.elapsed();
        reporter.on_copy_complete(report.files_copied, report.library_duration.as_secs_f64());
        Ok(())
    }

    /// Names already owned by catalogued or checkpointed content.
    fn seeded_namer(&self, catalog: &Catalog, state: &ResumeState) -> Result<CollisionNamer, Error> {
        let mut namer = CollisionNamer::new(&self.config.library_root);
        for entry in catalog.all_entries()? {
            namer.reserve(relative_from_catalog(&entry.library_path), entry.content_hash);
        }
        for (hash, copied) in &state.copied {
            namer.reserve(copied.library_path.clone(), *hash);
        }
        debug!("Reserved {} existing library names", namer.reserved_count());
        Ok(namer)
    }

    /// Put one hash group's content into the library.
    #[allow(clippy::too_many_arguments)]
    fn place(
        &self,
        resolution: &mut Resolution,
        copier: &Copier,
        namer: &mut CollisionNamer,
        catalog: &Catalog,
        state: &ResumeState,
        log: &CheckpointLog,
        reporter: &dyn ProgressReporter,
        report: &mut RunReport,
    ) -> Result<Option<Placement>, Error> {
        let hash = resolution.hash;
        let size = resolution.selected.size;

        if let Some(existing) = catalog.get_by_hash(&hash)? {
            let relative = relative_from_catalog(&existing.library_path);
            if copier.is_intact(&relative, &hash, size) {
                debug!(
                    "{} already in library as {}",
                    resolution.selected.path.display(),
                    existing.library_path
                );
                report.already_indexed += 1;
                return Ok(Some(Placement {
                    library_path: existing.library_path,
                    source_index: 0,
                    entry: None,
                }));
            }
            warn!(
                "Library file {} is missing or damaged; copying it again",
                existing.library_path
            );
            return self.copy_group(resolution, relative, copier, log, reporter, report);
        }

        let relative = match state.copied.get(&hash) {
            Some(copied) => copied.library_path.clone(),
            None => {
                let category = self.categories.resolve(&resolution.selected.path);
                let proposed = category.to_relative_dir().join(resolution.selected.file_name());
                match namer.assign_name(&proposed, hash, size) {
                    Ok(name) => name,
                    Err(e @ Error::NameCollisionExhausted { .. }) => {
                        error!(
                            "{}; {} is left out of the library",
                            e,
                            resolution.selected.path.display()
                        );
                        report.files_failed += 1;
                        resolution.selected.advance(CandidateState::Failed);
                        log.append(&CheckpointRecord::Failed {
                            path: resolution.selected.path.clone(),
                            reason: e.to_string(),
                        })?;
                        return Ok(None);
                    }
                    Err(e) => return Err(e),
                }
            }
        };
        self.copy_group(resolution, relative, copier, log, reporter, report)
    }

    /// Copy from the best readable member, falling back through the group in
    /// preference order when a source fails to read.
    fn copy_group(
        &self,
        resolution: &mut Resolution,
        relative: PathBuf,
        copier: &Copier,
        log: &CheckpointLog,
        reporter: &dyn ProgressReporter,
        report: &mut RunReport,
    ) -> Result<Option<Placement>, Error> {
        let hash = resolution.hash;
        let members =
            std::iter::once(&mut resolution.selected).chain(resolution.redundant.iter_mut());

        for (index, member) in members.enumerate() {
            if index > 0 {
                member.reselect();
            }
            let outcome = match copier.copy(&member.path, &relative, &hash, member.size) {
                Ok(outcome) => outcome,
                Err(e) if e.is_per_file() => {
                    warn!("{}; trying the next copy of this content", e);
                    member.advance(CandidateState::Failed);
                    report.files_failed += 1;
                    log.append(&CheckpointRecord::Failed {
                        path: member.path.clone(),
                        reason: e.to_string(),
                    })?;
                    continue;
                }
                Err(e) => return Err(e),
            };

            member.advance(CandidateState::Copied);
            if outcome.adopted {
                report.files_adopted += 1;
            } else {
                report.files_copied += 1;
                report.bytes_copied += outcome.bytes;
            }
            log.append(&CheckpointRecord::Copied {
                hash,
                source: member.path.clone(),
                library_path: relative.clone(),
                size: member.size,
            })?;

            let library_path = library_path_string(&relative);
            reporter.on_file_copied(&library_path, outcome.bytes);
            let entry = LibraryEntry {
                content_hash: hash,
                library_path: library_path.clone(),
                file_name: relative
                    .file_name()
                    .map(|f| f.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                original_path: member.path.to_string_lossy().into_owned(),
                size: member.size as i64,
                category: category_label(&relative),
                quality_score: i64::from(member.quality_score.0),
                indexed_at: chrono::Utc::now().to_rfc3339(),
            };
            return Ok(Some(Placement {
                library_path,
                source_index: index,
                entry: Some(entry),
            }));
        }

        error!(
            "No readable copy of {} ({}) is left; content not added to the library",
            resolution.selected.path.display(),
            hash.short()
        );
        Ok(None)
    }

    fn commit(
        &self,
        catalog: &Catalog,
        log: &CheckpointLog,
        batch: &mut PendingBatch,
        reporter: &dyn ProgressReporter,
        report: &mut RunReport,
    ) -> Result<(), Error> {
        if batch.is_empty() {
            return Ok(());
        }
        catalog.commit_batch(&batch.entries, &batch.redundant)?;
        for entry in &batch.entries {
            log.append(&CheckpointRecord::Indexed {
                hash: entry.content_hash,
                library_path: relative_from_catalog(&entry.library_path),
            })?;
        }
        log.flush()?;
        let committed = batch.entries.len();
        report.entries_indexed += committed;
        reporter.on_batch_indexed(committed, report.entries_indexed);
        let indexed = batch.take_indexed();
        trace!("{} library files indexed", indexed.len());
        Ok(())
    }
}

fn push_member(groups: &GroupMap, candidate: FileCandidate) {
    if let Some(hash) = candidate.content_hash {
        groups.entry(hash).or_default().push(candidate);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::group_by_hash;
    use crate::progress::SilentReporter;
    use tempfile::tempdir;

    fn scored(seq: u64, path: PathBuf) -> FileCandidate {
        let size = fs::metadata(&path).map(|m| m.len()).unwrap_or(6);
        let mut candidate = FileCandidate::discovered(seq, path, size, None);
        candidate.content_hash = Some(hasher::hash_data(b"shared"));
        candidate.advance(CandidateState::Fingerprinted);
        candidate.advance(CandidateState::Scored);
        candidate
    }

    #[test]
    fn test_copy_fallback_moves_members_through_their_states() {
        let tmp = tempdir().unwrap();
        let src = tmp.path().join("src");
        fs::create_dir_all(src.join("bb")).unwrap();
        fs::write(src.join("bb/a.txt"), b"shared").unwrap();
        let config = LibraryConfig::new(vec![src.clone()], tmp.path().join("lib"));
        let engine = LibraryEngine::new(config.clone());

        let groups = group_by_hash(vec![
            scored(0, src.join("a.txt")),
            scored(1, src.join("bb/a.txt")),
        ]);
        let mut resolution = resolve_all(groups).remove(0);
        assert_eq!(resolution.selected.state, CandidateState::Selected);

        let log = CheckpointLog::create(&tmp.path().join("checkpoint.jsonl")).unwrap();
        let copier = Copier::new(&config.library_root, false);
        let mut report = RunReport::default();
        let placement = engine
            .copy_group(
                &mut resolution,
                PathBuf::from("Documents/Text/a.txt"),
                &copier,
                &log,
                &SilentReporter,
                &mut report,
            )
            .unwrap()
            .unwrap();

        assert_eq!(placement.source_index, 1);
        assert_eq!(resolution.selected.state, CandidateState::Failed);
        assert_eq!(resolution.redundant[0].state, CandidateState::Copied);
        assert_eq!(report.files_failed, 1);

        let mut batch = PendingBatch::default();
        batch.entries.extend(placement.entry);
        batch.sources.push(resolution.redundant[0].clone());
        let indexed = batch.take_indexed();
        assert!(batch.is_empty());
        assert_eq!(indexed[0].state, CandidateState::Indexed);
    }
}
