//! The persistent batch journal enabling per-chunk resume.
//!
//! One JSON file per batch under `batch_states/`, written with
//! write-to-temp-then-rename so readers never observe a torn journal.
//! Chunk-level checkpoints are throttled (every 10 chunks or 5 seconds);
//! terminal task transitions always persist immediately.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha1::{Digest, Sha1};
use tracing::{debug, warn};

use crate::error::{Error, ErrorKind, Result};
use crate::fs::node::NodeId;

/// Persist after this many committed chunks at the latest.
const CHECKPOINT_CHUNKS: u32 = 10;
/// ...or after this much time, whichever comes first.
const CHECKPOINT_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Upload,
    Download,
}

impl Operation {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Upload => "upload",
            Operation::Download => "download",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Conflict policy `skip`: the counterpart already exists.
    Exists,
    /// Conflict policy `newer`: the source is not strictly newer.
    NotNewer,
}

impl SkipReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SkipReason::Exists => "exists",
            SkipReason::NotNewer => "not_newer",
        }
    }
}

/// Per-task state machine:
/// `pending → active → {completed | interrupted | error_*}`;
/// `interrupted → active` on resume; `skipped_*` only from `pending`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Active,
    Interrupted,
    Completed,
    Skipped(SkipReason),
    Error(ErrorKind),
    /// A status string from a legacy journal this build does not know.
    /// Treated as `error_fatal` and surfaced for the user to clean up.
    Legacy(String),
}

impl TaskStatus {
    #[must_use]
    pub fn as_journal_str(&self) -> String {
        match self {
            TaskStatus::Pending => "pending".to_string(),
            TaskStatus::Active => "active".to_string(),
            TaskStatus::Interrupted => "interrupted".to_string(),
            TaskStatus::Completed => "completed".to_string(),
            TaskStatus::Skipped(reason) => format!("skipped_{}", reason.as_str()),
            TaskStatus::Error(kind) => format!("error_{}", kind.as_str()),
            TaskStatus::Legacy(raw) => raw.clone(),
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw {
            "pending" => TaskStatus::Pending,
            "active" => TaskStatus::Active,
            "interrupted" => TaskStatus::Interrupted,
            "completed" => TaskStatus::Completed,
            "skipped_exists" => TaskStatus::Skipped(SkipReason::Exists),
            "skipped_not_newer" => TaskStatus::Skipped(SkipReason::NotNewer),
            other => match other
                .strip_prefix("error_")
                .and_then(ErrorKind::from_str_opt)
            {
                Some(kind) => TaskStatus::Error(kind),
                None => {
                    warn!(status = other, "unknown journal status, treating as error_fatal");
                    TaskStatus::Legacy(other.to_string())
                }
            },
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed
                | TaskStatus::Skipped(_)
                | TaskStatus::Error(_)
                | TaskStatus::Legacy(_)
        )
    }

    /// The error kind a terminal failure counts as. `Legacy` statuses
    /// count as `fatal`.
    #[must_use]
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            TaskStatus::Error(kind) => Some(*kind),
            TaskStatus::Legacy(_) => Some(ErrorKind::Fatal),
            _ => None,
        }
    }
}

impl Serialize for TaskStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.as_journal_str())
    }
}

impl<'de> Deserialize<'de> for TaskStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        if raw.is_empty() {
            return Err(D::Error::custom("empty task status"));
        }
        Ok(TaskStatus::parse(&raw))
    }
}

/// One file's worth of work within a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub local_path: PathBuf,
    pub remote_path: String,
    pub status: TaskStatus,
    /// Server-assigned upload identifier, once `upload_begin` ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_uuid: Option<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_key: Option<String>,
    /// Hex of the per-file content key. Required to resume: chunks
    /// already accepted by the backend were encrypted under it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_key: Option<String>,
    /// Download source node, or the committed node after an upload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<NodeId>,
    /// Existing counterpart to trash once an overwriting upload lands.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub displaced: Option<NodeId>,
    pub size: u64,
    pub chunk_count: u64,
    /// Highest zero-based chunk index fully committed; −1 means none.
    pub last_chunk: i64,
    /// Source modification time, milliseconds since epoch.
    pub modified_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Task {
    #[must_use]
    pub fn new(local_path: PathBuf, remote_path: String, size: u64, modified_ms: i64) -> Self {
        Self {
            local_path,
            remote_path,
            status: TaskStatus::Pending,
            file_uuid: None,
            upload_key: None,
            content_key: None,
            node: None,
            displaced: None,
            size,
            chunk_count: size.div_ceil(super::CHUNK_SIZE),
            last_chunk: -1,
            modified_ms,
            error: None,
        }
    }

    /// Record chunk `index` as durably accepted. Refuses to downgrade:
    /// returns false and leaves the task untouched when `index` is not
    /// beyond the current watermark.
    pub fn commit_chunk(&mut self, index: u64) -> bool {
        let index = index as i64;
        if index <= self.last_chunk {
            warn!(
                index,
                last_chunk = self.last_chunk,
                "refusing lastChunk downgrade"
            );
            return false;
        }
        self.last_chunk = index;
        true
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn fail(&mut self, err: &Error) {
        self.status = TaskStatus::Error(err.kind());
        self.error = Some(err.to_string());
    }
}

/// Persistent record of one batch invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchJournal {
    pub batch_id: String,
    pub operation: Operation,
    pub sources: Vec<String>,
    pub target: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub tasks: Vec<Task>,
}

impl BatchJournal {
    #[must_use]
    pub fn new(operation: Operation, sources: Vec<String>, target: String) -> Self {
        let now = Utc::now();
        Self {
            batch_id: batch_id(operation, &sources, &target),
            operation,
            sources,
            target,
            created_at: now,
            updated_at: now,
            tasks: Vec::new(),
        }
    }

    #[must_use]
    pub fn has_non_terminal_tasks(&self) -> bool {
        self.tasks.iter().any(|t| !t.is_terminal())
    }

    #[must_use]
    pub fn all_terminal(&self) -> bool {
        !self.has_non_terminal_tasks()
    }

    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.tasks.iter().any(|t| t.status.error_kind().is_some())
    }
}

/// Derive the batch identifier: the first 16 hex characters of SHA-1
/// over `operation ∥ "\0" ∥ sort(sources).join("\0") ∥ "\0" ∥ target`.
/// A pure function, so re-invoking the same command reopens the same
/// journal.
#[must_use]
pub fn batch_id(operation: Operation, sources: &[String], target: &str) -> String {
    let mut sorted: Vec<&str> = sources.iter().map(String::as_str).collect();
    sorted.sort_unstable();

    let mut hasher = Sha1::new();
    hasher.update(operation.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(sorted.join("\0").as_bytes());
    hasher.update([0u8]);
    hasher.update(target.as_bytes());

    let digest = hex::encode(hasher.finalize());
    digest[..16].to_string()
}

/// The single writer for journals of one state directory.
pub struct JournalStore {
    dir: PathBuf,
    chunks_since_save: u32,
    last_save: Instant,
}

impl JournalStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| Error::io(e, &dir))?;
        Ok(Self {
            dir,
            chunks_since_save: 0,
            last_save: Instant::now(),
        })
    }

    #[must_use]
    pub fn path_for(&self, batch_id: &str) -> PathBuf {
        self.dir.join(format!("{batch_id}.json"))
    }

    pub fn load(&self, batch_id: &str) -> Result<Option<BatchJournal>> {
        let path = self.path_for(batch_id);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::io(e, &path)),
        };
        let journal: BatchJournal = serde_json::from_str(&raw)
            .map_err(|e| Error::Fatal(format!("corrupt journal {}: {e}", path.display())))?;
        Ok(Some(journal))
    }

    /// Persist unconditionally via write-to-temp-then-rename.
    pub fn save(&mut self, journal: &mut BatchJournal) -> Result<()> {
        journal.updated_at = Utc::now();
        let path = self.path_for(&journal.batch_id);
        let tmp = path.with_extension("json.tmp");

        let raw = serde_json::to_vec_pretty(journal)
            .map_err(|e| Error::Fatal(format!("journal serialization: {e}")))?;
        fs::write(&tmp, raw).map_err(|e| Error::io(e, &tmp))?;
        fs::rename(&tmp, &path).map_err(|e| Error::io(e, &path))?;

        self.chunks_since_save = 0;
        self.last_save = Instant::now();
        debug!(batch_id = %journal.batch_id, "journal persisted");
        Ok(())
    }

    /// Chunk-level checkpoint, throttled to every 10 chunks or 5 seconds.
    pub fn checkpoint(&mut self, journal: &mut BatchJournal) -> Result<()> {
        self.chunks_since_save += 1;
        if self.chunks_since_save >= CHECKPOINT_CHUNKS
            || self.last_save.elapsed() >= CHECKPOINT_INTERVAL
        {
            self.save(journal)?;
        }
        Ok(())
    }

    pub fn delete(&mut self, batch_id: &str) -> Result<()> {
        let path = self.path_for(batch_id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::io(e, &path)),
        }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sources(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn batch_id_is_pure_and_order_insensitive() {
        let a = batch_id(Operation::Upload, &sources(&["/a", "/b"]), "/dst");
        let b = batch_id(Operation::Upload, &sources(&["/b", "/a"]), "/dst");
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn batch_id_separates_inputs() {
        let base = batch_id(Operation::Upload, &sources(&["/a"]), "/dst");
        assert_ne!(
            base,
            batch_id(Operation::Download, &sources(&["/a"]), "/dst")
        );
        assert_ne!(base, batch_id(Operation::Upload, &sources(&["/a"]), "/dst2"));
        assert_ne!(
            base,
            batch_id(Operation::Upload, &sources(&["/a", "/b"]), "/dst")
        );
    }

    #[test]
    fn status_strings_round_trip() {
        let statuses = [
            TaskStatus::Pending,
            TaskStatus::Active,
            TaskStatus::Interrupted,
            TaskStatus::Completed,
            TaskStatus::Skipped(SkipReason::Exists),
            TaskStatus::Skipped(SkipReason::NotNewer),
            TaskStatus::Error(ErrorKind::CryptoAuth),
            TaskStatus::Error(ErrorKind::HashMismatch),
        ];
        for status in statuses {
            assert_eq!(TaskStatus::parse(&status.as_journal_str()), status);
        }
    }

    #[test]
    fn unknown_status_becomes_legacy_error_fatal() {
        let status = TaskStatus::parse("skipped_because_reasons");
        assert_eq!(
            status,
            TaskStatus::Legacy("skipped_because_reasons".to_string())
        );
        assert!(status.is_terminal());
        assert_eq!(status.error_kind(), Some(ErrorKind::Fatal));
        // The original string survives a save/load cycle.
        assert_eq!(status.as_journal_str(), "skipped_because_reasons");
    }

    #[test]
    fn commit_chunk_is_monotone() {
        let mut task = Task::new(PathBuf::from("/tmp/f"), "/f".into(), 3 * super::super::CHUNK_SIZE, 0);
        assert_eq!(task.last_chunk, -1);
        assert!(task.commit_chunk(0));
        assert!(task.commit_chunk(1));
        assert!(!task.commit_chunk(1));
        assert!(!task.commit_chunk(0));
        assert_eq!(task.last_chunk, 1);
    }

    #[test]
    fn chunk_count_rounds_up() {
        let mib = super::super::CHUNK_SIZE;
        assert_eq!(Task::new("/a".into(), "/a".into(), 0, 0).chunk_count, 0);
        assert_eq!(Task::new("/a".into(), "/a".into(), 1, 0).chunk_count, 1);
        assert_eq!(Task::new("/a".into(), "/a".into(), mib, 0).chunk_count, 1);
        assert_eq!(Task::new("/a".into(), "/a".into(), mib + 1, 0).chunk_count, 2);
        assert_eq!(
            Task::new("/a".into(), "/a".into(), 3 * mib + 512 * 1024, 0).chunk_count,
            4
        );
    }

    #[test]
    fn journal_save_load_delete() {
        let dir = TempDir::new().unwrap();
        let mut store = JournalStore::open(dir.path().join("batch_states")).unwrap();

        let mut journal =
            BatchJournal::new(Operation::Upload, sources(&["/src"]), "/dst".to_string());
        journal
            .tasks
            .push(Task::new("/src/a".into(), "/dst/a".into(), 42, 7));
        store.save(&mut journal).unwrap();

        let loaded = store.load(&journal.batch_id).unwrap().unwrap();
        assert_eq!(loaded.batch_id, journal.batch_id);
        assert_eq!(loaded.tasks.len(), 1);
        assert_eq!(loaded.tasks[0].status, TaskStatus::Pending);

        store.delete(&journal.batch_id).unwrap();
        assert!(store.load(&journal.batch_id).unwrap().is_none());
        // Deleting an absent journal is not an error.
        store.delete(&journal.batch_id).unwrap();
    }

    #[test]
    fn checkpoint_throttles_by_chunk_count() {
        let dir = TempDir::new().unwrap();
        let mut store = JournalStore::open(dir.path()).unwrap();
        let mut journal =
            BatchJournal::new(Operation::Upload, sources(&["/s"]), "/t".to_string());
        let path = store.path_for(&journal.batch_id);

        for _ in 0..CHECKPOINT_CHUNKS - 1 {
            store.checkpoint(&mut journal).unwrap();
        }
        assert!(!path.exists(), "checkpoint should be throttled");
        store.checkpoint(&mut journal).unwrap();
        assert!(path.exists(), "tenth chunk forces a save");
    }

    #[test]
    fn no_partial_journal_on_disk() {
        let dir = TempDir::new().unwrap();
        let mut store = JournalStore::open(dir.path()).unwrap();
        let mut journal =
            BatchJournal::new(Operation::Download, sources(&["/s"]), "/t".to_string());
        store.save(&mut journal).unwrap();
        // Only the final file remains; the temp file is gone.
        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec![format!("{}.json", journal.batch_id)]);
    }
}
