//! The batch orchestrator: enumerates work, drives the transfer engine,
//! and keeps the resume journal current.
//!
//! One batch = one journal, addressed by a pure function of
//! (operation, sorted sources, target), so re-invoking the same command
//! reopens the same journal. One task is in flight at a time; the
//! journal store is the single writer.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

use crate::error::{Error, ErrorKind, Result};
use crate::fs::node::{Node, NodeId};
use crate::fs::path::RemotePath;
use crate::fs::resolver::Resolver;

use super::journal::{batch_id, BatchJournal, JournalStore, Operation, SkipReason, Task, TaskStatus};
use super::{CancelFlag, DownloadOptions, Engine, ProgressFn, TransferOutcome};

/// What to do when the destination side already has a counterpart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    /// Leave the existing counterpart alone.
    #[default]
    Skip,
    /// Replace unconditionally (upload creates the new node, then
    /// trashes the displaced one).
    Overwrite,
    /// Replace only when the source is strictly newer; equal timestamps
    /// skip.
    Newer,
}

impl std::str::FromStr for ConflictPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "skip" => Ok(ConflictPolicy::Skip),
            "overwrite" => Ok(ConflictPolicy::Overwrite),
            "newer" => Ok(ConflictPolicy::Newer),
            other => Err(Error::Fatal(format!(
                "unknown conflict policy {other:?} (expected skip, overwrite, or newer)"
            ))),
        }
    }
}

impl std::fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ConflictPolicy::Skip => "skip",
            ConflictPolicy::Overwrite => "overwrite",
            ConflictPolicy::Newer => "newer",
        })
    }
}

/// Include/exclude glob filters, matched against the path relative to
/// the operation root. A file is included iff it matches at least one
/// include (or the include list is empty) and matches no exclude.
#[derive(Debug, Clone, Default)]
pub struct Filters {
    includes: Option<GlobSet>,
    excludes: Option<GlobSet>,
}

impl Filters {
    pub fn new(includes: &[String], excludes: &[String]) -> Result<Self> {
        Ok(Self {
            includes: build_glob_set(includes)?,
            excludes: build_glob_set(excludes)?,
        })
    }

    #[must_use]
    pub fn matches(&self, relative: &str) -> bool {
        if let Some(excludes) = &self.excludes {
            if excludes.is_match(relative) {
                return false;
            }
        }
        match &self.includes {
            Some(includes) => includes.is_match(relative),
            None => true,
        }
    }
}

fn build_glob_set(patterns: &[String]) -> Result<Option<GlobSet>> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(
            Glob::new(pattern)
                .map_err(|e| Error::Fatal(format!("invalid glob pattern {pattern:?}: {e}")))?,
        );
    }
    let set = builder
        .build()
        .map_err(|e| Error::Fatal(format!("invalid glob filter set: {e}")))?;
    Ok(Some(set))
}

/// Batch-level knobs, combined from CLI flags.
#[derive(Debug, Clone, Default)]
pub struct TransferOptions {
    pub filters: Filters,
    pub conflict: ConflictPolicy,
    pub preserve_mtime: bool,
    /// Verify the full-file hash after each download.
    pub verify: bool,
    /// Descend into directory sources.
    pub recursive: bool,
}

/// Per-task failure surfaced in the aggregate result.
#[derive(Debug, Clone)]
pub struct TaskFailure {
    pub remote_path: String,
    pub local_path: PathBuf,
    pub kind: ErrorKind,
    pub message: String,
}

/// Aggregate outcome of one batch invocation.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub batch_id: String,
    pub completed: usize,
    pub skipped: usize,
    pub failed: Vec<TaskFailure>,
    /// True when a cancel stopped the batch before its last task.
    pub interrupted: bool,
    /// True when an existing journal was continued.
    pub resumed: bool,
}

impl BatchReport {
    /// Every task completed or was skipped by policy.
    #[must_use]
    pub fn success(&self) -> bool {
        self.failed.is_empty() && !self.interrupted
    }
}

/// Callback fired when a task starts: `(index, total, task)`.
pub type TaskCallback = Arc<dyn Fn(usize, usize, &Task) + Send + Sync>;

/// Orchestrates one batch at a time over a resolver and journal store.
pub struct BatchRunner<'a> {
    resolver: &'a Resolver,
    store: &'a mut JournalStore,
    cancel: CancelFlag,
    progress: Option<ProgressFn>,
    on_task: Option<TaskCallback>,
}

impl<'a> BatchRunner<'a> {
    pub fn new(resolver: &'a Resolver, store: &'a mut JournalStore) -> Self {
        Self {
            resolver,
            store,
            cancel: CancelFlag::new(),
            progress: None,
            on_task: None,
        }
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub fn with_progress(mut self, progress: ProgressFn) -> Self {
        self.progress = Some(progress);
        self
    }

    #[must_use]
    pub fn with_task_callback(mut self, on_task: TaskCallback) -> Self {
        self.on_task = Some(on_task);
        self
    }

    /// Upload local sources into the remote `target` folder.
    #[instrument(level = "info", skip_all, fields(target = %target))]
    pub async fn run_upload(
        &mut self,
        sources: &[PathBuf],
        target: &RemotePath,
        options: &TransferOptions,
    ) -> Result<BatchReport> {
        let mut sources: Vec<PathBuf> = sources.to_vec();
        sources.sort();
        let source_strs: Vec<String> = sources
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect();

        let id = batch_id(Operation::Upload, &source_strs, target.as_str());
        let (mut journal, resumed) = match self.reopen(&id)? {
            Some(journal) => (journal, true),
            None => {
                let mut journal =
                    BatchJournal::new(Operation::Upload, source_strs, target.as_str().to_string());
                self.enumerate_upload(&mut journal, &sources, target, options)
                    .await?;
                (journal, false)
            }
        };
        self.store.save(&mut journal)?;

        let mut report = self.execute(&mut journal, options).await?;
        report.resumed = resumed;
        Ok(report)
    }

    /// Download remote sources into the local `target` directory.
    #[instrument(level = "info", skip_all, fields(target = %target.display()))]
    pub async fn run_download(
        &mut self,
        sources: &[RemotePath],
        target: &Path,
        options: &TransferOptions,
    ) -> Result<BatchReport> {
        let mut sources: Vec<RemotePath> = sources.to_vec();
        sources.sort();
        let source_strs: Vec<String> = sources
            .iter()
            .map(|p| p.as_str().to_string())
            .collect();
        let target_str = target.to_string_lossy().into_owned();

        let id = batch_id(Operation::Download, &source_strs, &target_str);
        let (mut journal, resumed) = match self.reopen(&id)? {
            Some(journal) => (journal, true),
            None => {
                let mut journal = BatchJournal::new(Operation::Download, source_strs, target_str);
                self.enumerate_download(&mut journal, &sources, target, options)
                    .await?;
                (journal, false)
            }
        };
        self.store.save(&mut journal)?;

        let mut report = self.execute(&mut journal, options).await?;
        report.resumed = resumed;
        Ok(report)
    }

    /// Load an existing journal for this batch id, deciding between
    /// RESUME (non-terminal tasks present) and a fresh enumeration.
    /// Re-invoking with the same id explicitly re-arms `error_*` tasks.
    fn reopen(&mut self, id: &str) -> Result<Option<BatchJournal>> {
        let Some(mut journal) = self.store.load(id)? else {
            return Ok(None);
        };

        if journal.has_non_terminal_tasks() {
            info!(batch_id = id, "resuming interrupted batch");
            return Ok(Some(journal));
        }

        if journal.has_errors() {
            info!(batch_id = id, "re-arming failed tasks of previous batch");
            for task in &mut journal.tasks {
                if task.status.error_kind().is_some() {
                    // Restart failed tasks from scratch; a stale lastChunk
                    // cannot be trusted after an arbitrary failure.
                    task.status = TaskStatus::Pending;
                    task.last_chunk = -1;
                    task.error = None;
                }
            }
            return Ok(Some(journal));
        }

        // Fully completed journal left behind; enumerate afresh.
        Ok(None)
    }

    /// Walk local sources, apply filters, create remote folders eagerly,
    /// and emit tasks in stable traversal order.
    async fn enumerate_upload(
        &mut self,
        journal: &mut BatchJournal,
        sources: &[PathBuf],
        target: &RemotePath,
        options: &TransferOptions,
    ) -> Result<()> {
        self.resolver.ensure_folder(target).await?;

        for source in sources {
            let meta = std::fs::metadata(source).map_err(|e| Error::io(e, source))?;
            if meta.is_file() {
                let name = local_name(source)?;
                if options.filters.matches(&name) {
                    journal.tasks.push(upload_task(
                        source.clone(),
                        target.join(&name)?,
                        &meta,
                    ));
                }
                continue;
            }

            if !options.recursive {
                return Err(Error::Fatal(format!(
                    "{} is a directory (use recursive mode)",
                    source.display()
                )));
            }

            let dir_name = local_name(source)?;
            let remote_base = target.join(&dir_name)?;
            self.resolver.ensure_folder(&remote_base).await?;
            for (local, relative, entry_meta) in walk_local(source)? {
                let remote = remote_base.join_relative(&relative)?;
                if entry_meta.is_dir() {
                    self.resolver.ensure_folder(&remote).await?;
                } else if options.filters.matches(&relative) {
                    journal
                        .tasks
                        .push(upload_task(local, remote, &entry_meta));
                }
            }
        }

        info!(tasks = journal.tasks.len(), "upload batch enumerated");
        Ok(())
    }

    /// Walk remote sources, apply filters, create local folders eagerly,
    /// and emit tasks in stable traversal order.
    async fn enumerate_download(
        &mut self,
        journal: &mut BatchJournal,
        sources: &[RemotePath],
        target: &Path,
        options: &TransferOptions,
    ) -> Result<()> {
        std::fs::create_dir_all(target).map_err(|e| Error::io(e, target))?;

        for source in sources {
            let resolved = self.resolver.resolve(source).await?;
            let node = resolved.node;

            if node.is_file() {
                let relative = node.name.clone();
                if options.filters.matches(&relative) {
                    journal
                        .tasks
                        .push(download_task(target.join(&node.name), source.clone(), &node));
                }
                continue;
            }

            if !options.recursive {
                return Err(Error::Fatal(format!(
                    "{source} is a folder (use recursive mode)"
                )));
            }

            let local_base = target.join(&node.name);
            std::fs::create_dir_all(&local_base).map_err(|e| Error::io(e, &local_base))?;

            // Depth-first, files before subfolders, both lexicographic.
            let mut stack: Vec<(NodeId, String)> = vec![(node.id, String::new())];
            while let Some((folder, prefix)) = stack.pop() {
                let listing = self.resolver.list(folder).await?;

                let mut files: Vec<&Node> =
                    listing.iter().filter(|n| n.is_file() && !n.trashed).collect();
                files.sort_by(|a, b| a.name.cmp(&b.name));
                for file in files {
                    let relative = join_relative(&prefix, &file.name);
                    if options.filters.matches(&relative) {
                        let remote = source.join_relative(&relative)?;
                        journal.tasks.push(download_task(
                            local_base.join(relative.split('/').collect::<PathBuf>()),
                            remote,
                            file,
                        ));
                    }
                }

                let mut folders: Vec<&Node> = listing
                    .iter()
                    .filter(|n| n.is_folder() && !n.trashed)
                    .collect();
                folders.sort_by(|a, b| a.name.cmp(&b.name));
                for subfolder in folders.iter().rev() {
                    let relative = join_relative(&prefix, &subfolder.name);
                    let local_dir = local_base.join(relative.split('/').collect::<PathBuf>());
                    std::fs::create_dir_all(&local_dir).map_err(|e| Error::io(e, &local_dir))?;
                    stack.push((subfolder.id, relative));
                }
            }
        }

        info!(tasks = journal.tasks.len(), "download batch enumerated");
        Ok(())
    }

    /// Drive every runnable task, persisting the journal after each
    /// committed chunk (throttled) and on every terminal transition.
    async fn execute(
        &mut self,
        journal: &mut BatchJournal,
        options: &TransferOptions,
    ) -> Result<BatchReport> {
        let mut report = BatchReport {
            batch_id: journal.batch_id.clone(),
            ..BatchReport::default()
        };
        let total = journal.tasks.len();

        for index in 0..total {
            match &journal.tasks[index].status {
                TaskStatus::Completed => {
                    report.completed += 1;
                    continue;
                }
                TaskStatus::Skipped(_) => {
                    report.skipped += 1;
                    continue;
                }
                status if status.error_kind().is_some() => {
                    report.failed.push(failure_of(&journal.tasks[index]));
                    continue;
                }
                // Pending, or Active/Interrupted from an earlier run.
                _ => {}
            }

            if self.cancel.is_canceled() {
                report.interrupted = true;
                break;
            }

            // Interrupted tasks already passed the conflict check and may
            // hold partial data; only pending tasks consult the policy.
            if journal.tasks[index].status == TaskStatus::Pending {
                match self
                    .conflict_outcome(journal.operation, &mut journal.tasks[index], options)
                    .await
                {
                    Ok(Some(reason)) => {
                        debug!(
                            remote = %journal.tasks[index].remote_path,
                            reason = reason.as_str(),
                            "task skipped by conflict policy"
                        );
                        journal.tasks[index].status = TaskStatus::Skipped(reason);
                        self.store.save(journal)?;
                        report.skipped += 1;
                        continue;
                    }
                    Ok(None) => {}
                    Err(err) if err.kind() == ErrorKind::Auth => {
                        journal.tasks[index].fail(&err);
                        self.store.save(journal)?;
                        return Err(err);
                    }
                    Err(err) => {
                        journal.tasks[index].fail(&err);
                        self.store.save(journal)?;
                        report.failed.push(failure_of(&journal.tasks[index]));
                        continue;
                    }
                }
            }

            if let Some(on_task) = &self.on_task {
                on_task(index, total, &journal.tasks[index]);
            }

            let mut task = journal.tasks[index].clone();
            let result = self.run_one(&mut task, journal, index, options).await;

            match result {
                Ok(TransferOutcome::Completed) => {
                    let displaced = task.displaced.take();
                    journal.tasks[index] = task;
                    self.store.save(journal)?;
                    if let Some(old) = displaced {
                        self.trash_displaced(journal.operation, &journal.tasks[index], old)
                            .await;
                        self.store.save(journal)?;
                    }
                    report.completed += 1;
                }
                Ok(TransferOutcome::Interrupted) => {
                    journal.tasks[index] = task;
                    self.store.save(journal)?;
                    report.interrupted = true;
                    break;
                }
                Err(err) if err.kind() == ErrorKind::Auth => {
                    task.fail(&err);
                    journal.tasks[index] = task;
                    self.store.save(journal)?;
                    return Err(err);
                }
                Err(Error::Canceled) => {
                    task.status = TaskStatus::Interrupted;
                    journal.tasks[index] = task;
                    self.store.save(journal)?;
                    report.interrupted = true;
                    break;
                }
                Err(err) => {
                    warn!(
                        remote = %task.remote_path,
                        kind = %err.kind(),
                        error = %err,
                        "task failed"
                    );
                    task.fail(&err);
                    journal.tasks[index] = task;
                    self.store.save(journal)?;
                    report.failed.push(failure_of(&journal.tasks[index]));
                }
            }
        }

        if journal.all_terminal() && !journal.has_errors() {
            self.store.delete(&journal.batch_id)?;
            debug!(batch_id = %journal.batch_id, "batch finished, journal deleted");
        } else {
            self.store.save(journal)?;
        }
        Ok(report)
    }

    /// Run one task through the engine, wiring the throttled checkpoint
    /// back into the journal.
    async fn run_one(
        &mut self,
        task: &mut Task,
        journal: &mut BatchJournal,
        index: usize,
        options: &TransferOptions,
    ) -> Result<TransferOutcome> {
        let resolver = self.resolver;
        let store = &mut *self.store;
        let operation = journal.operation;

        let engine = Engine::new(
            resolver.backend().as_ref(),
            resolver.master_key(),
            resolver.email(),
        )
        .with_cancel(self.cancel.clone());
        let engine = match &self.progress {
            Some(progress) => engine.with_progress(Arc::clone(progress)),
            None => engine,
        };

        match operation {
            Operation::Upload => {
                let remote = RemotePath::parse(&task.remote_path)?;
                let parent_path = remote.parent().unwrap_or_else(RemotePath::root);
                let parent = resolver.ensure_folder(&parent_path).await?;
                let parent_id = parent.id;

                let mut checkpoint = |t: &Task| -> Result<()> {
                    journal.tasks[index] = t.clone();
                    store.checkpoint(journal)
                };
                let outcome = engine.upload_file(task, parent_id, &mut checkpoint).await?;
                if outcome == TransferOutcome::Completed {
                    resolver.invalidate(parent_id);
                }
                Ok(outcome)
            }
            Operation::Download => {
                let node = match task.node {
                    Some(uuid) => {
                        let wire = resolver.backend().file_info(uuid).await?;
                        resolver.decode_file(&wire)?
                    }
                    None => {
                        let remote = RemotePath::parse(&task.remote_path)?;
                        resolver.resolve(&remote).await?.node
                    }
                };
                let download = DownloadOptions {
                    verify: options.verify,
                    preserve_mtime: options.preserve_mtime,
                };
                let mut checkpoint = |t: &Task| -> Result<()> {
                    journal.tasks[index] = t.clone();
                    store.checkpoint(journal)
                };
                engine
                    .download_file(task, &node, download, &mut checkpoint)
                    .await
            }
        }
    }

    /// Consult the conflict policy for a pending task. `Some(reason)`
    /// means skip; `None` means proceed (possibly noting a displaced
    /// node to trash after the replacement lands).
    async fn conflict_outcome(
        &self,
        operation: Operation,
        task: &mut Task,
        options: &TransferOptions,
    ) -> Result<Option<SkipReason>> {
        match operation {
            Operation::Upload => {
                let remote = RemotePath::parse(&task.remote_path)?;
                let existing = match self.resolver.resolve(&remote).await {
                    Ok(resolved) => resolved.node,
                    Err(Error::NotFound(_)) => return Ok(None),
                    Err(other) => return Err(other),
                };
                match options.conflict {
                    ConflictPolicy::Skip => Ok(Some(SkipReason::Exists)),
                    ConflictPolicy::Overwrite => {
                        task.displaced = Some(existing.id);
                        Ok(None)
                    }
                    ConflictPolicy::Newer => {
                        if task.modified_ms > existing.modified_ms {
                            task.displaced = Some(existing.id);
                            Ok(None)
                        } else {
                            Ok(Some(SkipReason::NotNewer))
                        }
                    }
                }
            }
            Operation::Download => {
                let local_meta = match std::fs::metadata(&task.local_path) {
                    Ok(meta) => meta,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
                    Err(e) => return Err(Error::io(e, &task.local_path)),
                };
                match options.conflict {
                    ConflictPolicy::Skip => Ok(Some(SkipReason::Exists)),
                    ConflictPolicy::Overwrite => Ok(None),
                    ConflictPolicy::Newer => {
                        let local_ms = local_meta
                            .modified()
                            .ok()
                            .map_or(0, super::system_time_ms);
                        if task.modified_ms > local_ms {
                            Ok(None)
                        } else {
                            Ok(Some(SkipReason::NotNewer))
                        }
                    }
                }
            }
        }
    }

    /// Trash the node displaced by an overwrite, atomically from the
    /// caller's point of view: the replacement is committed first.
    async fn trash_displaced(&self, operation: Operation, task: &Task, displaced: NodeId) {
        debug_assert_eq!(operation, Operation::Upload);
        if task.node == Some(displaced) {
            return;
        }
        match self.resolver.backend().trash_node(displaced).await {
            Ok(()) | Err(Error::NotFound(_)) => {}
            Err(e) => warn!(
                node = %displaced,
                error = %e,
                "failed to trash displaced node"
            ),
        }
    }
}

fn failure_of(task: &Task) -> TaskFailure {
    TaskFailure {
        remote_path: task.remote_path.clone(),
        local_path: task.local_path.clone(),
        kind: task.status.error_kind().unwrap_or(ErrorKind::Fatal),
        message: task
            .error
            .clone()
            .unwrap_or_else(|| task.status.as_journal_str()),
    }
}

fn upload_task(local: PathBuf, remote: RemotePath, meta: &std::fs::Metadata) -> Task {
    let modified_ms = meta
        .modified()
        .ok()
        .map_or(0, super::system_time_ms);
    Task::new(local, remote.as_str().to_string(), meta.len(), modified_ms)
}

fn download_task(local: PathBuf, remote: RemotePath, node: &Node) -> Task {
    let mut task = Task::new(
        local,
        remote.as_str().to_string(),
        node.size(),
        node.modified_ms,
    );
    task.chunk_count = node.file.as_ref().map_or(0, |f| f.chunks);
    task.node = Some(node.id);
    task
}

fn local_name(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(ToString::to_string)
        .ok_or_else(|| Error::InvalidPath {
            path: path.display().to_string(),
            reason: "no usable file name".into(),
        })
}

fn join_relative(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}/{name}")
    }
}

/// Enumerate a local tree in stable order: lexicographic per directory,
/// files before subdirectories. Yields `(path, relative, metadata)` for
/// every entry below `root` (directories included, for eager folder
/// creation). Symlinks are skipped.
fn walk_local(root: &Path) -> Result<Vec<(PathBuf, String, std::fs::Metadata)>> {
    let mut out = Vec::new();
    let walker = WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .sort_by(|a, b| {
            let ka = (a.file_type().is_dir(), a.file_name().to_owned());
            let kb = (b.file_type().is_dir(), b.file_name().to_owned());
            ka.cmp(&kb)
        });

    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().map(Path::to_path_buf).unwrap_or_default();
            match e.into_io_error() {
                Some(io_err) => Error::io(io_err, path),
                None => Error::InvalidPath {
                    path: path.display().to_string(),
                    reason: "filesystem loop".into(),
                },
            }
        })?;

        if entry.file_type().is_symlink() {
            warn!(path = %entry.path().display(), "skipping symlink");
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(root)
            .expect("walkdir yields children of root")
            .to_string_lossy()
            .replace(std::path::MAIN_SEPARATOR, "/");
        let meta = entry
            .metadata()
            .map_err(|e| match e.into_io_error() {
                Some(io_err) => Error::io(io_err, entry.path()),
                None => Error::Fatal("unreadable metadata".into()),
            })?;
        out.push((entry.path().to_path_buf(), relative, meta));
    }
    Ok(out)
}
