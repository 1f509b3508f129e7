//! Indexing run orchestration.
//!
//! Coordinates one run end to end:
//!
//! ```text
//! lifecycle check → retire superseded → discover → detect changes
//!     → delete modified files' chunks → workers (read, hash, chunk)
//!     → accumulator → embed → upsert
//! ```
//!
//! Workers run on the blocking pool, bounded by a semaphore, and send each
//! file's chunks over a bounded channel. The receiving side is the only
//! owner of the pending batch, so appends and flushes are serialized and a
//! flush (embed + upsert) finishes before the next chunk is accepted.
//!
//! Per-file problems become [`FileOutcome`] values; lifecycle bookkeeping
//! failures become [`Cleanup`] values; only setup and batch-write failures
//! abort with an [`IndexError`]. After a batch-write abort the current
//! commit's entries are discarded, so re-running the same scope redoes it.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use anyhow::{anyhow, Result};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};

use crate::branch::{BranchLifecycle, BranchState};
use crate::changes::{self, ChangeSet, ScheduledFile};
use crate::chunk::{chunk_text, sha256_hex, ChunkSource};
use crate::config::Config;
use crate::discovery::{discover, DiscoveredFile, IgnoreRules};
use crate::embedding::{l2_normalize, Embedder};
use crate::error::{Cleanup, FileOutcome, IndexError};
use crate::models::{BranchScope, Chunk};
use crate::progress::{format_number, ProgressEvent, ProgressReporter};
use crate::store::{ChunkRecord, VectorStore};

const PROCESSING_REPORT_EVERY: u64 = 50;

/// Everything a run needs besides its collaborators.
#[derive(Debug, Clone)]
pub struct IndexOptions {
    pub root: PathBuf,
    pub scope: BranchScope,
    pub batch_size: usize,
    pub workers: usize,
    pub max_file_bytes: u64,
    pub incremental: bool,
    pub target_size: usize,
    pub overlap: usize,
    pub normalize: bool,
    pub ignore_file: String,
    pub exclude_globs: Vec<String>,
    /// Discover and detect changes only; nothing is written or deleted.
    pub dry_run: bool,
}

impl IndexOptions {
    pub fn from_config(root: PathBuf, scope: BranchScope, config: &Config) -> Self {
        Self {
            root,
            scope,
            batch_size: config.indexing.batch_size,
            workers: config.indexing.workers,
            max_file_bytes: config.indexing.max_file_bytes(),
            incremental: config.indexing.incremental,
            target_size: config.chunking.target_size,
            overlap: config.chunking.overlap,
            normalize: config.embedding.normalize,
            ignore_file: config.discovery.ignore_file.clone(),
            exclude_globs: config.discovery.exclude_globs.clone(),
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// The branch already has entries for this commit.
    AlreadyIndexed,
    NothingToIndex,
    Indexed,
    DryRun,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexReport {
    pub status: RunStatus,
    pub files_discovered: usize,
    pub files_new: usize,
    pub files_modified: usize,
    pub files_unchanged: usize,
    pub files_chunked: usize,
    pub files_skipped: usize,
    pub files_failed: usize,
    /// Chunks written, or chunks that would be written on a dry run.
    pub chunks: usize,
    pub batches: u64,
    pub stale_removed: usize,
    pub modified_removed: usize,
    pub cleanup_failures: usize,
}

impl IndexReport {
    fn new(status: RunStatus) -> Self {
        Self {
            status,
            files_discovered: 0,
            files_new: 0,
            files_modified: 0,
            files_unchanged: 0,
            files_chunked: 0,
            files_skipped: 0,
            files_failed: 0,
            chunks: 0,
            batches: 0,
            stale_removed: 0,
            modified_removed: 0,
            cleanup_failures: 0,
        }
    }

    fn record_cleanup(&mut self, cleanup: &Cleanup) -> usize {
        if cleanup.is_failed() {
            self.cleanup_failures += 1;
        }
        cleanup.removed()
    }

    fn record_outcome(&mut self, outcome: &FileOutcome) {
        match outcome {
            FileOutcome::Chunked(_) => self.files_chunked += 1,
            FileOutcome::Skipped(_) => self.files_skipped += 1,
            FileOutcome::Failed(_) => self.files_failed += 1,
        }
    }

    /// Human-readable summary on stdout.
    pub fn print(&self, opts: &IndexOptions) {
        let mode = if opts.dry_run { " (dry-run)" } else { "" };
        println!("index {}{}", opts.root.display(), mode);
        if opts.scope.has_branch() || opts.scope.has_commit() {
            println!(
                "  scope: {} @ {}",
                display_or_dash(&opts.scope.branch),
                display_or_dash(opts.scope.commit_prefix())
            );
        }

        if self.status == RunStatus::AlreadyIndexed {
            println!("  already indexed, nothing to do");
            println!("ok");
            return;
        }

        println!("  discovered: {} files", format_number(self.files_discovered as u64));
        println!(
            "  new: {}  modified: {}  unchanged: {}",
            format_number(self.files_new as u64),
            format_number(self.files_modified as u64),
            format_number(self.files_unchanged as u64)
        );
        if self.stale_removed > 0 || self.modified_removed > 0 {
            println!(
                "  removed: {} superseded, {} from modified files",
                format_number(self.stale_removed as u64),
                format_number(self.modified_removed as u64)
            );
        }
        match self.status {
            RunStatus::NothingToIndex => println!("  nothing to index"),
            RunStatus::DryRun => {
                println!("  estimated chunks: {}", format_number(self.chunks as u64));
            }
            _ => {
                println!(
                    "  files chunked: {}  skipped: {}  failed: {}",
                    format_number(self.files_chunked as u64),
                    format_number(self.files_skipped as u64),
                    format_number(self.files_failed as u64)
                );
                println!(
                    "  chunks written: {} in {} batches",
                    format_number(self.chunks as u64),
                    format_number(self.batches)
                );
            }
        }
        if self.cleanup_failures > 0 {
            println!("  cleanup warnings: {}", self.cleanup_failures);
        }
        println!("ok");
    }
}

fn display_or_dash(s: &str) -> &str {
    if s.is_empty() {
        "-"
    } else {
        s
    }
}

/// Pending chunks awaiting a flush.
///
/// `push` hands back the whole batch, leaving the accumulator empty, as soon
/// as the threshold is reached.
pub struct BatchAccumulator {
    pending: Vec<Chunk>,
    threshold: usize,
}

impl BatchAccumulator {
    pub fn new(threshold: usize) -> Self {
        let threshold = threshold.max(1);
        Self {
            pending: Vec::with_capacity(threshold),
            threshold,
        }
    }

    pub fn push(&mut self, chunk: Chunk) -> Option<Vec<Chunk>> {
        self.pending.push(chunk);
        if self.pending.len() >= self.threshold {
            Some(std::mem::take(&mut self.pending))
        } else {
            None
        }
    }

    /// Whatever is left at end of run.
    pub fn finish(self) -> Option<Vec<Chunk>> {
        if self.pending.is_empty() {
            None
        } else {
            Some(self.pending)
        }
    }
}

/// Per-file work shared by all workers.
struct FileJob {
    scope: BranchScope,
    max_file_bytes: u64,
    target_size: usize,
    overlap: usize,
    indexed_at: i64,
}

struct FileResult {
    relative: String,
    outcome: FileOutcome,
    chunks: Vec<Chunk>,
}

impl FileJob {
    fn process(&self, file: &DiscoveredFile) -> FileResult {
        match self.try_process(file) {
            Ok((outcome, chunks)) => FileResult {
                relative: file.relative.clone(),
                outcome,
                chunks,
            },
            Err(e) => FileResult {
                relative: file.relative.clone(),
                outcome: FileOutcome::Failed(format!("{:#}", e)),
                chunks: Vec::new(),
            },
        }
    }

    fn try_process(&self, file: &DiscoveredFile) -> Result<(FileOutcome, Vec<Chunk>)> {
        let meta = std::fs::metadata(&file.path)?;
        if meta.len() > self.max_file_bytes {
            return Ok((
                FileOutcome::Skipped(format!(
                    "{} bytes exceeds the {} byte limit",
                    meta.len(),
                    self.max_file_bytes
                )),
                Vec::new(),
            ));
        }

        let bytes = std::fs::read(&file.path)?;
        let text = String::from_utf8(bytes).map_err(|_| anyhow!("not valid UTF-8"))?;
        if text.is_empty() {
            return Ok((FileOutcome::Skipped("empty file".to_string()), Vec::new()));
        }

        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        let file_hash = sha256_hex(&text);
        let source = ChunkSource {
            path: &file.relative,
            file_hash: &file_hash,
            mtime,
            scope: &self.scope,
            indexed_at: self.indexed_at,
        };
        let chunks = chunk_text(&text, &source, self.target_size, self.overlap);
        Ok((FileOutcome::Chunked(chunks.len()), chunks))
    }
}

/// Run one indexing pass over `opts.root`.
pub async fn run_index(
    opts: &IndexOptions,
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    progress: Arc<dyn ProgressReporter>,
) -> Result<IndexReport, IndexError> {
    if !opts.root.is_dir() {
        return Err(IndexError::Setup(anyhow!(
            "{} is not a directory",
            opts.root.display()
        )));
    }

    let mut report = IndexReport::new(RunStatus::Indexed);
    let mut lifecycle = BranchLifecycle::new(store.as_ref(), &opts.scope);

    if opts.incremental && lifecycle.check().await == BranchState::UpToDate {
        tracing::info!(
            "{} @ {} is already indexed",
            opts.scope.branch,
            opts.scope.commit_prefix()
        );
        report.status = RunStatus::AlreadyIndexed;
        return Ok(report);
    }

    if !opts.dry_run {
        let cleanup = lifecycle.retire_superseded().await;
        report.stale_removed = report.record_cleanup(&cleanup);
    }

    let candidates = discover_candidates(opts, progress.clone()).await?;
    report.files_discovered = candidates.len();
    tracing::info!("Discovered {} candidate files", candidates.len());

    let change_set = if opts.incremental {
        let records = match changes::load_indexed_records(store.as_ref(), &opts.scope).await {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!("Could not load indexed files, treating all as new: {:#}", e);
                report.cleanup_failures += 1;
                Default::default()
            }
        };
        changes::partition(candidates, &records, &opts.scope)
    } else {
        ChangeSet::schedule_all(candidates)
    };

    report.files_new = change_set.new_count();
    report.files_modified = change_set.modified_count();
    report.files_unchanged = change_set.unchanged.len();
    tracing::info!(
        "{} new, {} modified, {} unchanged",
        report.files_new,
        report.files_modified,
        report.files_unchanged
    );

    if change_set.to_index.is_empty() {
        report.status = RunStatus::NothingToIndex;
        return Ok(report);
    }

    if opts.dry_run {
        report.status = RunStatus::DryRun;
    } else if report.files_modified > 0 {
        for scheduled in change_set
            .to_index
            .iter()
            .filter(|s| s.kind == changes::ChangeKind::Modified)
        {
            let cleanup = lifecycle.delete_file_chunks(&scheduled.file.relative).await;
            let removed = report.record_cleanup(&cleanup);
            report.modified_removed += removed;
        }
    }

    let written = process_files(
        opts,
        change_set.to_index,
        Arc::clone(&store),
        embedder,
        progress,
        &mut report,
    )
    .await;
    if let Err(e) = written {
        if !opts.dry_run {
            // Leave the scope stale so the next run redoes it.
            lifecycle.discard_current().await;
        }
        return Err(e);
    }
    Ok(report)
}

async fn discover_candidates(
    opts: &IndexOptions,
    progress: Arc<dyn ProgressReporter>,
) -> Result<Vec<DiscoveredFile>, IndexError> {
    let root = opts.root.clone();
    let ignore_file = opts.ignore_file.clone();
    let exclude_globs = opts.exclude_globs.clone();

    tokio::task::spawn_blocking(move || -> Result<Vec<DiscoveredFile>> {
        let rules = IgnoreRules::load(&root, &ignore_file, &exclude_globs)?;
        Ok(discover(&root, &rules, progress.as_ref()).collect())
    })
    .await
    .map_err(|e| IndexError::Setup(e.into()))?
    .map_err(IndexError::Setup)
}

fn spawn_workers(
    files: Vec<ScheduledFile>,
    job: Arc<FileJob>,
    workers: usize,
    tx: mpsc::Sender<FileResult>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let semaphore = Arc::new(Semaphore::new(workers.max(1)));
        let mut set = JoinSet::new();

        for scheduled in files {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let tx = tx.clone();
            let job = job.clone();
            set.spawn_blocking(move || {
                let result = job.process(&scheduled.file);
                // Receiver gone means the run is aborting.
                let _ = tx.blocking_send(result);
                drop(permit);
            });
        }
        drop(tx);

        while let Some(joined) = set.join_next().await {
            if let Err(e) = joined {
                tracing::warn!("Worker task failed: {}", e);
            }
        }
    })
}

async fn process_files(
    opts: &IndexOptions,
    files: Vec<ScheduledFile>,
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    progress: Arc<dyn ProgressReporter>,
    report: &mut IndexReport,
) -> Result<(), IndexError> {
    let total = files.len() as u64;
    let job = Arc::new(FileJob {
        scope: opts.scope.clone(),
        max_file_bytes: opts.max_file_bytes,
        target_size: opts.target_size,
        overlap: opts.overlap,
        indexed_at: chrono::Utc::now().timestamp(),
    });

    let workers = opts.workers.max(1);
    let (tx, mut rx) = mpsc::channel::<FileResult>(workers * 2);
    let producer = spawn_workers(files, job, workers, tx);

    let flusher = Flusher {
        store: store.as_ref(),
        embedder: embedder.as_ref(),
        progress: progress.as_ref(),
        normalize: opts.normalize,
    };
    let mut accumulator = BatchAccumulator::new(opts.batch_size);
    let mut processed = 0u64;

    while let Some(result) = rx.recv().await {
        processed += 1;
        report.record_outcome(&result.outcome);
        match &result.outcome {
            FileOutcome::Chunked(n) => tracing::debug!("{}: {} chunks", result.relative, n),
            FileOutcome::Skipped(reason) => tracing::warn!("Skipping {}: {}", result.relative, reason),
            FileOutcome::Failed(reason) => tracing::warn!("Failed to process {}: {}", result.relative, reason),
        }
        if processed % PROCESSING_REPORT_EVERY == 0 || processed == total {
            progress.report(ProgressEvent::Processing { n: processed, total });
        }

        if opts.dry_run {
            report.chunks += result.chunks.len();
            continue;
        }

        for chunk in result.chunks {
            if let Some(batch) = accumulator.push(chunk) {
                if let Err(e) = flusher.flush(batch, report).await {
                    producer.abort();
                    return Err(e);
                }
            }
        }
    }

    if let Some(batch) = accumulator.finish() {
        flusher.flush(batch, report).await?;
    }

    if let Err(e) = producer.await {
        tracing::warn!("Worker pool ended abnormally: {}", e);
    }
    Ok(())
}

struct Flusher<'a> {
    store: &'a dyn VectorStore,
    embedder: &'a dyn Embedder,
    progress: &'a dyn ProgressReporter,
    normalize: bool,
}

impl Flusher<'_> {
    /// Embed and upsert one batch. The batch is consumed either way.
    async fn flush(&self, batch: Vec<Chunk>, report: &mut IndexReport) -> Result<(), IndexError> {
        let batch_no = report.batches + 1;
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();

        let mut vectors = self
            .embedder
            .embed(&texts)
            .await
            .map_err(|source| IndexError::Embedding {
                batch: batch_no,
                source,
            })?;
        if vectors.len() != texts.len() {
            return Err(IndexError::EmbeddingMismatch {
                batch: batch_no,
                expected: texts.len(),
                got: vectors.len(),
            });
        }
        if self.normalize {
            vectors.iter_mut().for_each(|v| l2_normalize(v));
        }

        let records: Vec<ChunkRecord> = batch
            .into_iter()
            .zip(vectors)
            .map(|(chunk, embedding)| ChunkRecord {
                id: chunk.id(),
                document: chunk.text,
                metadata: chunk.metadata,
                embedding,
            })
            .collect();
        let count = records.len();

        self.store
            .upsert(&records)
            .await
            .map_err(|source| IndexError::Store {
                batch: batch_no,
                source,
            })?;

        report.batches = batch_no;
        report.chunks += count;
        tracing::debug!("Flushed batch {} ({} chunks)", batch_no, count);
        self.progress.report(ProgressEvent::Flushed {
            batch: batch_no,
            chunks: report.chunks as u64,
        });
        Ok(())
    }
}
