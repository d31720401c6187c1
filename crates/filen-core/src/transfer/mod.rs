//! The chunked transfer engine: encrypted upload and decrypting download
//! of one logical file over fixed 1 MiB chunks.
//!
//! Chunk `i + 1` is only submitted after chunk `i` is acknowledged, so a
//! task's `lastChunk` always corresponds to bytes durably accepted. Resume
//! re-reads the committed plaintext prefix from local disk to rebuild the
//! streaming SHA-512 state; hasher state is never persisted and committed
//! chunks are never retransmitted.

pub mod batch;
pub mod journal;

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, instrument, warn};

use crate::api::types::{FileMetadata, UploadFinishRequest, UploadHandle};
use crate::api::Backend;
use crate::crypto::{self, ContentKey, FileHasher, MasterKey};
use crate::error::{Error, Result};
use crate::fs::node::{Node, NodeId};

pub use batch::{
    BatchReport, BatchRunner, ConflictPolicy, Filters, TaskCallback, TaskFailure, TransferOptions,
};
pub use journal::{batch_id, BatchJournal, JournalStore, Operation, SkipReason, Task, TaskStatus};

/// The unit of encryption, transfer, and resume: exactly 1 MiB.
pub const CHUNK_SIZE: u64 = 1_048_576;

/// Cooperative cancellation. Polled at least once per chunk; a chunk
/// already submitted is allowed to settle so `lastChunk` reflects the
/// truth on disk.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Per-chunk progress callback: `(bytes_done, bytes_total)`. Callers must
/// not assume any frequency beyond "after each chunk".
pub type ProgressFn = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Journal notification invoked after every committed chunk and state
/// change; the receiving side throttles actual disk writes.
pub type Checkpoint<'c> = dyn FnMut(&Task) -> Result<()> + 'c;

/// How a transfer ended short of an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    Completed,
    /// Canceled cooperatively; the task holds an accurate `lastChunk`.
    Interrupted,
}

/// Options shared by download paths.
#[derive(Debug, Clone, Copy, Default)]
pub struct DownloadOptions {
    /// Compare the full-file SHA-512 against the stored metadata hash.
    pub verify: bool,
    /// Stamp the local file with the remote modification time.
    pub preserve_mtime: bool,
}

/// Drives single-file transfers against a backend.
pub struct Engine<'a> {
    backend: &'a dyn Backend,
    master_key: &'a MasterKey,
    email: &'a str,
    cancel: CancelFlag,
    progress: Option<ProgressFn>,
}

impl<'a> Engine<'a> {
    pub fn new(backend: &'a dyn Backend, master_key: &'a MasterKey, email: &'a str) -> Self {
        Self {
            backend,
            master_key,
            email,
            cancel: CancelFlag::new(),
            progress: None,
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

    fn report(&self, bytes_done: u64, bytes_total: u64) {
        if let Some(cb) = &self.progress {
            cb(bytes_done, bytes_total);
        }
    }

    /// Upload one file into `parent` under the name carried by
    /// `task.remote_path`. The task may arrive partially complete; the
    /// committed prefix is re-read and re-hashed, never re-sent.
    #[instrument(level = "info", skip(self, task, checkpoint), fields(local = %task.local_path.display(), remote = %task.remote_path))]
    pub async fn upload_file(
        &self,
        task: &mut Task,
        parent: NodeId,
        checkpoint: &mut Checkpoint<'_>,
    ) -> Result<TransferOutcome> {
        let local = task.local_path.clone();
        let meta = tokio::fs::metadata(&local)
            .await
            .map_err(|e| Error::io(e, &local))?;
        let size = meta.len();
        if size != task.size {
            if task.last_chunk >= 0 {
                return Err(Error::Conflict(format!(
                    "{} changed size during a resumable upload ({} -> {size} bytes)",
                    local.display(),
                    task.size
                )));
            }
            task.size = size;
            task.chunk_count = size.div_ceil(CHUNK_SIZE);
        }
        task.modified_ms = system_time_ms(meta.modified().map_err(|e| Error::io(e, &local))?);

        let content_key = match &task.content_key {
            Some(hex_key) => ContentKey::from_hex(hex_key)?,
            None => {
                let key = ContentKey::generate();
                task.content_key = Some(key.to_hex());
                key
            }
        };

        let handle = match (task.file_uuid, &task.upload_key) {
            (Some(file_uuid), Some(upload_key)) => UploadHandle {
                file_uuid,
                upload_key: upload_key.clone(),
            },
            _ => {
                let handle = self.backend.upload_begin(parent).await?;
                task.file_uuid = Some(handle.file_uuid);
                task.upload_key = Some(handle.upload_key.clone());
                handle
            }
        };
        task.status = TaskStatus::Active;
        checkpoint(task)?;

        let start_index = next_chunk(task);
        let mut hasher = FileHasher::new();
        let mut file = File::open(&local).await.map_err(|e| Error::io(e, &local))?;
        let mut buf = vec![0u8; CHUNK_SIZE as usize];

        if start_index > 0 {
            debug!(start_index, "rebuilding hash over committed prefix");
            for _ in 0..start_index {
                let n = read_chunk(&mut file, &mut buf, &local).await?;
                if n == 0 {
                    return Err(Error::Conflict(format!(
                        "{} is shorter than its committed prefix",
                        local.display()
                    )));
                }
                hasher.update(&buf[..n]);
            }
        }

        let mut bytes_done = prefix_bytes(start_index, size);
        for index in start_index..task.chunk_count {
            if self.cancel.is_canceled() {
                task.status = TaskStatus::Interrupted;
                return Ok(TransferOutcome::Interrupted);
            }

            let n = read_chunk(&mut file, &mut buf, &local).await?;
            hasher.update(&buf[..n]);
            let ciphertext = crypto::encrypt_chunk(content_key.as_bytes(), &buf[..n])?;
            self.backend
                .upload_chunk(&handle, index, Bytes::from(ciphertext))
                .await?;

            task.commit_chunk(index);
            bytes_done += n as u64;
            self.report(bytes_done, size);
            checkpoint(task)?;
        }

        let name = remote_name(&task.remote_path);
        let hash = hasher.finalize_hex();
        let metadata = FileMetadata {
            name: name.to_string(),
            size,
            mime: mime_guess::from_path(&local)
                .first_or_octet_stream()
                .essence_str()
                .to_string(),
            key: content_key.to_hex(),
            last_modified: task.modified_ms,
            hash: Some(hash.clone()),
        };
        let metadata_json = serde_json::to_string(&metadata)
            .map_err(|e| Error::Fatal(format!("file metadata serialization: {e}")))?;
        let envelope = crypto::wrap_metadata(self.master_key.as_bytes(), &metadata_json)?;

        let committed = self
            .backend
            .upload_finish(&UploadFinishRequest {
                file_uuid: handle.file_uuid,
                upload_key: handle.upload_key.clone(),
                name_hashed: crypto::hash_name(self.master_key, self.email, name),
                metadata: envelope,
                size,
                chunks: task.chunk_count,
                hash,
            })
            .await?;

        task.node = Some(committed.uuid);
        task.status = TaskStatus::Completed;
        debug!(uuid = %committed.uuid, size, "upload committed");
        Ok(TransferOutcome::Completed)
    }

    /// Download one file to `task.local_path`, resuming at the chunk
    /// after `lastChunk`.
    #[instrument(level = "info", skip(self, task, node, checkpoint), fields(remote = %task.remote_path, local = %task.local_path.display()))]
    pub async fn download_file(
        &self,
        task: &mut Task,
        node: &Node,
        options: DownloadOptions,
        checkpoint: &mut Checkpoint<'_>,
    ) -> Result<TransferOutcome> {
        let attrs = node
            .file
            .as_ref()
            .ok_or_else(|| Error::Fatal(format!("{} is not a file", task.remote_path)))?;
        let dest = task.local_path.clone();
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::io(e, parent))?;
        }

        task.size = attrs.size;
        task.chunk_count = attrs.chunks;
        task.node = Some(node.id);
        task.status = TaskStatus::Active;
        checkpoint(task)?;

        let start_index = next_chunk(task);
        let resumed_len = prefix_bytes(start_index, attrs.size);

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&dest)
            .await
            .map_err(|e| Error::io(e, &dest))?;
        let on_disk = file
            .metadata()
            .await
            .map_err(|e| Error::io(e, &dest))?
            .len();
        if on_disk < resumed_len {
            // The partial file no longer matches the journal; truncating
            // to the watermark would resume over a hole.
            return Err(Error::Conflict(format!(
                "{} is shorter than its resumed length ({on_disk} < {resumed_len} bytes)",
                dest.display()
            )));
        }
        file.set_len(resumed_len)
            .await
            .map_err(|e| Error::io(e, &dest))?;

        let mut hasher = options.verify.then(FileHasher::new);
        if start_index > 0 {
            if let Some(hasher) = hasher.as_mut() {
                debug!(resumed_len, "re-hashing already-written bytes");
                file.seek(SeekFrom::Start(0))
                    .await
                    .map_err(|e| Error::io(e, &dest))?;
                rehash_written(&mut file, resumed_len, hasher, &dest).await?;
            }
        }
        file.seek(SeekFrom::Start(resumed_len))
            .await
            .map_err(|e| Error::io(e, &dest))?;

        let mut bytes_done = resumed_len;
        for index in start_index..task.chunk_count {
            if self.cancel.is_canceled() {
                file.flush().await.map_err(|e| Error::io(e, &dest))?;
                task.status = TaskStatus::Interrupted;
                return Ok(TransferOutcome::Interrupted);
            }

            let blob = self
                .backend
                .download_chunk(node.id, &attrs.region, &attrs.bucket, index)
                .await?;
            let plaintext = match crypto::decrypt_chunk_at(attrs.content_key.as_bytes(), &blob, index)
            {
                Ok(plaintext) => plaintext,
                Err(err @ (Error::CryptoAuth { .. } | Error::CorruptChunk { .. })) => {
                    // Leave the partial file for inspection, clearly marked.
                    drop(file);
                    quarantine_corrupt(&dest).await;
                    return Err(err);
                }
                Err(other) => return Err(other),
            };

            file.write_all(&plaintext)
                .await
                .map_err(|e| Error::io(e, &dest))?;
            // lastChunk must never claim bytes that are not on disk.
            file.flush().await.map_err(|e| Error::io(e, &dest))?;
            if let Some(hasher) = hasher.as_mut() {
                hasher.update(&plaintext);
            }

            task.commit_chunk(index);
            bytes_done += plaintext.len() as u64;
            self.report(bytes_done, attrs.size);
            checkpoint(task)?;
        }

        file.flush().await.map_err(|e| Error::io(e, &dest))?;
        file.sync_all().await.map_err(|e| Error::io(e, &dest))?;
        drop(file);

        if let Some(hasher) = hasher {
            let computed = hasher.finalize_hex();
            match &attrs.hash {
                Some(expected) if !expected.eq_ignore_ascii_case(&computed) => {
                    return Err(Error::HashMismatch {
                        expected: expected.clone(),
                        computed,
                    });
                }
                Some(_) => debug!("full-file hash verified"),
                None => warn!(remote = %task.remote_path, "no stored hash; skipping verification"),
            }
        }

        if options.preserve_mtime {
            stamp_mtime(&dest, node.modified_ms)?;
        }

        task.status = TaskStatus::Completed;
        Ok(TransferOutcome::Completed)
    }

    /// Stream a remote file's chunks through the hasher without writing
    /// anything, returning the computed hex SHA-512.
    #[instrument(level = "info", skip(self, node), fields(uuid = %node.id))]
    pub async fn hash_remote(&self, node: &Node) -> Result<String> {
        let attrs = node
            .file
            .as_ref()
            .ok_or_else(|| Error::Fatal(format!("{} is not a file", node.name)))?;

        let mut hasher = FileHasher::new();
        let mut bytes_done = 0u64;
        for index in 0..attrs.chunks {
            if self.cancel.is_canceled() {
                return Err(Error::Canceled);
            }
            let blob = self
                .backend
                .download_chunk(node.id, &attrs.region, &attrs.bucket, index)
                .await?;
            let plaintext = crypto::decrypt_chunk_at(attrs.content_key.as_bytes(), &blob, index)?;
            bytes_done += plaintext.len() as u64;
            hasher.update(&plaintext);
            self.report(bytes_done, attrs.size);
        }
        Ok(hasher.finalize_hex())
    }
}

/// First chunk index still to transfer.
fn next_chunk(task: &Task) -> u64 {
    u64::try_from(task.last_chunk + 1).unwrap_or(0)
}

/// Bytes covered by the first `chunks` chunks of a `size`-byte file
/// (accounts for the short final chunk).
fn prefix_bytes(chunks: u64, size: u64) -> u64 {
    (chunks * CHUNK_SIZE).min(size)
}

/// Final name component of a canonical remote path.
fn remote_name(remote_path: &str) -> &str {
    remote_path.rsplit('/').next().unwrap_or(remote_path)
}

/// Fill `buf` with up to one chunk; short reads only at end of file.
async fn read_chunk(file: &mut File, buf: &mut [u8], path: &Path) -> Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        match file.read(&mut buf[total..]).await {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) => return Err(Error::io(e, path)),
        }
    }
    Ok(total)
}

/// Feed `len` already-written bytes back into the hasher.
async fn rehash_written(
    file: &mut File,
    len: u64,
    hasher: &mut FileHasher,
    path: &Path,
) -> Result<()> {
    let mut remaining = len;
    let mut buf = vec![0u8; CHUNK_SIZE as usize];
    while remaining > 0 {
        let want = remaining.min(CHUNK_SIZE) as usize;
        let n = read_chunk(file, &mut buf[..want], path).await?;
        if n == 0 {
            return Err(Error::Conflict(format!(
                "{} is shorter than its resumed length",
                path.display()
            )));
        }
        hasher.update(&buf[..n]);
        remaining -= n as u64;
    }
    Ok(())
}

/// Rename a tampered download to `<name>.corrupt`, best effort.
async fn quarantine_corrupt(dest: &Path) {
    let mut corrupt = dest.as_os_str().to_owned();
    corrupt.push(".corrupt");
    let corrupt = PathBuf::from(corrupt);
    if let Err(e) = tokio::fs::rename(dest, &corrupt).await {
        warn!(
            dest = %dest.display(),
            error = %e,
            "failed to quarantine corrupt download"
        );
    } else {
        warn!(quarantined = %corrupt.display(), "corrupt download kept for inspection");
    }
}

/// Stamp a local file's mtime, rounded to the platform's granularity.
fn stamp_mtime(path: &Path, modified_ms: i64) -> Result<()> {
    let mtime = UNIX_EPOCH + Duration::from_millis(modified_ms.max(0) as u64);
    let file = std::fs::OpenOptions::new()
        .write(true)
        .open(path)
        .map_err(|e| Error::io(e, path))?;
    file.set_modified(mtime).map_err(|e| Error::io(e, path))
}

fn system_time_ms(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
