//! End-to-end batch tests against the in-memory backend: enumeration,
//! filters, conflict policy, chunk-level resume, and tamper handling.

mod common;

use std::sync::{Arc, Mutex};

use common::{harness, patterned_bytes};
use filen_core::api::types::FileMetadata;
use filen_core::crypto::{self, ContentKey};
use filen_core::error::{Error, ErrorKind};
use filen_core::fs::RemotePath;
use filen_core::transfer::{
    BatchRunner, CancelFlag, ConflictPolicy, Filters, JournalStore, TaskStatus, TransferOptions,
    CHUNK_SIZE,
};

fn options() -> TransferOptions {
    TransferOptions {
        recursive: true,
        verify: true,
        ..TransferOptions::default()
    }
}

fn journal_files(h: &common::Harness) -> Vec<String> {
    match std::fs::read_dir(h.ctx.config().batch_states_dir()) {
        Ok(entries) => entries
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect(),
        Err(_) => Vec::new(),
    }
}

#[tokio::test]
async fn upload_round_trips_byte_for_byte() {
    let mut h = harness();
    let data = patterned_bytes(3 * CHUNK_SIZE as usize + 512 * 1024);
    let source = h.scratch.path().join("data.bin");
    std::fs::write(&source, &data).unwrap();

    let target = RemotePath::parse("/backup").unwrap();
    let (resolver, store) = h.ctx.batch_parts();
    let report = BatchRunner::new(resolver, store)
        .run_upload(&[source.clone()], &target, &options())
        .await
        .unwrap();

    assert_eq!(report.completed, 1);
    assert!(report.success());
    assert!(journal_files(&h).is_empty(), "journal deleted after success");

    // The stored file decrypts back to the original plaintext.
    let node = h
        .ctx
        .resolver()
        .resolve(&RemotePath::parse("/backup/data.bin").unwrap())
        .await
        .unwrap()
        .node;
    let attrs = node.file.as_ref().unwrap();
    assert_eq!(attrs.size, data.len() as u64);
    assert_eq!(attrs.chunks, 4);

    let chunks = h.mock.stored_chunks(node.id).unwrap();
    assert_eq!(chunks.len(), 4);
    let mut plaintext = Vec::new();
    for (index, chunk) in chunks.iter().enumerate() {
        plaintext.extend_from_slice(
            &crypto::decrypt_chunk_at(attrs.content_key.as_bytes(), chunk, index as u64).unwrap(),
        );
    }
    assert_eq!(plaintext, data);

    // Client-side hash equals the hash the server stores.
    assert_eq!(
        h.mock.stored_hash(node.id).unwrap(),
        crypto::hash_bytes(&data)
    );
    assert_eq!(attrs.hash.as_deref(), Some(crypto::hash_bytes(&data).as_str()));
}

#[tokio::test]
async fn download_round_trips_and_verifies() {
    let mut h = harness();
    let data = patterned_bytes(2 * CHUNK_SIZE as usize + 7);
    let source = h.scratch.path().join("payload.bin");
    std::fs::write(&source, &data).unwrap();

    let target = RemotePath::parse("/stash").unwrap();
    {
        let (resolver, store) = h.ctx.batch_parts();
        BatchRunner::new(resolver, store)
            .run_upload(&[source], &target, &options())
            .await
            .unwrap();
    }

    let out = h.scratch.path().join("out");
    let remote = RemotePath::parse("/stash/payload.bin").unwrap();
    let (resolver, store) = h.ctx.batch_parts();
    let report = BatchRunner::new(resolver, store)
        .run_download(&[remote], &out, &options())
        .await
        .unwrap();

    assert_eq!(report.completed, 1);
    let downloaded = std::fs::read(out.join("payload.bin")).unwrap();
    assert_eq!(downloaded, data);
    assert!(journal_files(&h).is_empty());
}

#[tokio::test]
async fn empty_file_transmits_only_metadata() {
    let mut h = harness();
    let source = h.scratch.path().join("empty.dat");
    std::fs::write(&source, b"").unwrap();

    let target = RemotePath::parse("/e").unwrap();
    {
        let (resolver, store) = h.ctx.batch_parts();
        let report = BatchRunner::new(resolver, store)
            .run_upload(&[source], &target, &options())
            .await
            .unwrap();
        assert_eq!(report.completed, 1);
    }
    assert_eq!(h.mock.puts(), 0, "zero chunks for an empty file");

    let node = h
        .ctx
        .resolver()
        .resolve(&RemotePath::parse("/e/empty.dat").unwrap())
        .await
        .unwrap()
        .node;
    assert_eq!(node.file.as_ref().unwrap().chunks, 0);
    assert_eq!(
        h.mock.stored_hash(node.id).unwrap(),
        crypto::hash_bytes(b"")
    );

    let out = h.scratch.path().join("empty-out");
    let (resolver, store) = h.ctx.batch_parts();
    let report = BatchRunner::new(resolver, store)
        .run_download(
            &[RemotePath::parse("/e/empty.dat").unwrap()],
            &out,
            &options(),
        )
        .await
        .unwrap();
    assert_eq!(report.completed, 1);
    assert_eq!(std::fs::read(out.join("empty.dat")).unwrap(), b"");
}

#[tokio::test]
async fn filters_select_and_order_tasks() {
    let mut h = harness();
    let dir = h.scratch.path().join("docs");
    std::fs::create_dir(&dir).unwrap();
    for name in [
        "z.pdf",
        "a.pdf",
        "draft_a.pdf",
        "draft_z.pdf",
        "notes.txt",
        "b.pdf",
        "readme.md",
        "draft_b.pdf",
        "c.pdf",
        "todo.txt",
    ] {
        std::fs::write(dir.join(name), b"x").unwrap();
    }

    let started: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&started);

    let mut opts = options();
    opts.filters = Filters::new(&["*.pdf".to_string()], &["draft_*".to_string()]).unwrap();

    let target = RemotePath::parse("/dst").unwrap();
    let (resolver, store) = h.ctx.batch_parts();
    let report = BatchRunner::new(resolver, store)
        .with_task_callback(Arc::new(move |_, _, task| {
            sink.lock().unwrap().push(task.remote_path.clone());
        }))
        .run_upload(&[dir], &target, &opts)
        .await
        .unwrap();

    assert_eq!(report.completed, 4);
    assert_eq!(
        *started.lock().unwrap(),
        vec![
            "/dst/docs/a.pdf",
            "/dst/docs/b.pdf",
            "/dst/docs/c.pdf",
            "/dst/docs/z.pdf",
        ]
    );
}

#[tokio::test]
async fn skip_policy_replays_with_zero_bytes() {
    let mut h = harness();
    let source = h.scratch.path().join("once.bin");
    std::fs::write(&source, patterned_bytes(CHUNK_SIZE as usize + 1)).unwrap();
    let target = RemotePath::parse("/dup").unwrap();

    {
        let (resolver, store) = h.ctx.batch_parts();
        let report = BatchRunner::new(resolver, store)
            .run_upload(&[source.clone()], &target, &options())
            .await
            .unwrap();
        assert_eq!(report.completed, 1);
    }
    let puts_after_first = h.mock.puts();

    let (resolver, store) = h.ctx.batch_parts();
    let report = BatchRunner::new(resolver, store)
        .run_upload(&[source], &target, &options())
        .await
        .unwrap();

    assert_eq!(report.completed, 0);
    assert_eq!(report.skipped, 1);
    assert_eq!(h.mock.puts(), puts_after_first, "no chunk re-sent under skip");
    assert_eq!(h.mock.file_count(), 1);
}

#[tokio::test]
async fn newer_policy_skips_unmodified_source() {
    let mut h = harness();
    let source = h.scratch.path().join("stable.bin");
    std::fs::write(&source, patterned_bytes(1024)).unwrap();
    let target = RemotePath::parse("/n").unwrap();

    let mut opts = options();
    opts.conflict = ConflictPolicy::Newer;

    {
        let (resolver, store) = h.ctx.batch_parts();
        BatchRunner::new(resolver, store)
            .run_upload(&[source.clone()], &target, &opts)
            .await
            .unwrap();
    }
    let puts_after_first = h.mock.puts();

    let (resolver, store) = h.ctx.batch_parts();
    let report = BatchRunner::new(resolver, store)
        .run_upload(&[source], &target, &opts)
        .await
        .unwrap();

    assert_eq!(report.skipped, 1, "equal timestamps skip");
    assert_eq!(h.mock.puts(), puts_after_first);
}

#[tokio::test]
async fn overwrite_policy_replaces_and_trashes_old_node() {
    let mut h = harness();
    let source = h.scratch.path().join("v.bin");
    std::fs::write(&source, patterned_bytes(100)).unwrap();
    let target = RemotePath::parse("/o").unwrap();

    let mut opts = options();
    opts.conflict = ConflictPolicy::Overwrite;

    let remote = RemotePath::parse("/o/v.bin").unwrap();
    let first_id = {
        let (resolver, store) = h.ctx.batch_parts();
        BatchRunner::new(resolver, store)
            .run_upload(&[source.clone()], &target, &opts)
            .await
            .unwrap();
        h.ctx.resolver().resolve(&remote).await.unwrap().node.id
    };

    std::fs::write(&source, patterned_bytes(200)).unwrap();
    let (resolver, store) = h.ctx.batch_parts();
    let report = BatchRunner::new(resolver, store)
        .run_upload(&[source], &target, &opts)
        .await
        .unwrap();
    assert_eq!(report.completed, 1);

    // Exactly one live node remains, and it is the replacement.
    assert_eq!(h.mock.file_count(), 1);
    let resolved = h.ctx.resolver().resolve(&remote).await.unwrap();
    assert_ne!(resolved.node.id, first_id);
    assert!(resolved.duplicates.is_empty());
    assert_eq!(resolved.node.size(), 200);
}

#[tokio::test]
async fn cancel_then_resume_sends_only_missing_chunks() {
    let mut h = harness();
    let data = patterned_bytes(10 * CHUNK_SIZE as usize);
    let source = h.scratch.path().join("big.bin");
    std::fs::write(&source, &data).unwrap();
    let target = RemotePath::parse("/big").unwrap();

    // Cancel as soon as the first chunk reports progress.
    let cancel = CancelFlag::new();
    let trip = cancel.clone();
    let batch_id;
    {
        let (resolver, store) = h.ctx.batch_parts();
        let report = BatchRunner::new(resolver, store)
            .with_cancel(cancel.clone())
            .with_progress(Arc::new(move |_, _| trip.cancel()))
            .run_upload(&[source.clone()], &target, &options())
            .await
            .unwrap();
        assert!(report.interrupted);
        batch_id = report.batch_id;
    }
    assert_eq!(h.mock.puts(), 1, "exactly one chunk before the cancel");

    // The journal records the truth on disk.
    let store = JournalStore::open(h.ctx.config().batch_states_dir()).unwrap();
    let journal = store.load(&batch_id).unwrap().unwrap();
    assert_eq!(journal.tasks.len(), 1);
    assert_eq!(journal.tasks[0].status, TaskStatus::Interrupted);
    assert_eq!(journal.tasks[0].last_chunk, 0);
    drop(store);

    // Resume: nine more PUTs, none repeated, hash over the whole file.
    let (resolver, store) = h.ctx.batch_parts();
    let report = BatchRunner::new(resolver, store)
        .run_upload(&[source], &target, &options())
        .await
        .unwrap();
    assert!(report.resumed);
    assert_eq!(report.completed, 1);
    assert_eq!(h.mock.puts(), 10);
    assert!(journal_files(&h).is_empty());

    let node = h
        .ctx
        .resolver()
        .resolve(&RemotePath::parse("/big/big.bin").unwrap())
        .await
        .unwrap()
        .node;
    assert_eq!(h.mock.stored_hash(node.id).unwrap(), crypto::hash_bytes(&data));
}

#[tokio::test]
async fn tampered_chunk_fails_task_and_quarantines_file() {
    let mut h = harness();
    let data = patterned_bytes(2 * CHUNK_SIZE as usize);
    let source = h.scratch.path().join("t.bin");
    std::fs::write(&source, &data).unwrap();
    let target = RemotePath::parse("/tam").unwrap();

    {
        let (resolver, store) = h.ctx.batch_parts();
        BatchRunner::new(resolver, store)
            .run_upload(&[source], &target, &options())
            .await
            .unwrap();
    }
    let remote = RemotePath::parse("/tam/t.bin").unwrap();
    let node = h.ctx.resolver().resolve(&remote).await.unwrap().node;
    h.mock.tamper_chunk(node.id, 1);

    let out = h.scratch.path().join("tam-out");
    let (resolver, store) = h.ctx.batch_parts();
    let report = BatchRunner::new(resolver, store)
        .run_download(&[remote], &out, &options())
        .await
        .unwrap();

    assert_eq!(report.completed, 0);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].kind, ErrorKind::CryptoAuth);

    // The partial file is kept for inspection under a .corrupt suffix.
    assert!(out.join("t.bin.corrupt").exists());
    assert!(!out.join("t.bin").exists());

    // The journal survives for a retry.
    let names = journal_files(&h);
    assert_eq!(names.len(), 1);
    assert_eq!(names[0], format!("{}.json", report.batch_id));
}

#[tokio::test]
async fn duplicate_names_are_ambiguous_for_strict_callers() {
    let h = harness();
    let folder = h
        .ctx
        .mkdir(&RemotePath::parse("/A/B").unwrap())
        .await
        .unwrap();

    let seal = |ts: i64| {
        let meta = FileMetadata {
            name: "c.txt".into(),
            size: 0,
            mime: "text/plain".into(),
            key: ContentKey::generate().to_hex(),
            last_modified: ts,
            hash: Some(crypto::hash_bytes(b"")),
        };
        crypto::wrap_metadata(
            h.master_key.as_bytes(),
            &serde_json::to_string(&meta).unwrap(),
        )
        .unwrap()
    };
    let older = h
        .mock
        .seed_file(folder.id, seal(1_000), 0, Vec::new(), String::new(), 1_000);
    h.mock
        .seed_file(folder.id, seal(2_000), 0, Vec::new(), String::new(), 2_000);

    let path = RemotePath::parse("/A/B/c.txt").unwrap();
    let resolved = h.ctx.resolver().resolve(&path).await.unwrap();
    assert_eq!(resolved.duplicates.len(), 1, "both candidates surfaced");
    assert_eq!(resolved.node.modified_ms, 2_000, "newest wins");
    assert_eq!(resolved.duplicates[0].id, older);

    let err = h.ctx.resolver().resolve_strict(&path).await.unwrap_err();
    assert!(matches!(err, Error::Ambiguous { candidates: 2, .. }));
}

#[tokio::test]
async fn mutations_invalidate_cached_listings() {
    let h = harness();

    // Prime the cache with the (empty) root listing.
    let root = h.ctx.resolver().root().await.unwrap();
    assert!(h.ctx.resolver().list(root).await.unwrap().is_empty());

    // A mkdir must be visible immediately, without waiting out the TTL.
    h.ctx
        .mkdir(&RemotePath::parse("/appeared").unwrap())
        .await
        .unwrap();
    let resolved = h
        .ctx
        .resolver()
        .resolve(&RemotePath::parse("/appeared").unwrap())
        .await
        .unwrap();
    assert!(resolved.node.is_folder());

    // Trash must empty the listing immediately as well.
    h.ctx
        .trash(&RemotePath::parse("/appeared").unwrap())
        .await
        .unwrap();
    let err = h
        .ctx
        .resolver()
        .resolve(&RemotePath::parse("/appeared").unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));

    // And restore brings it back, via the trash listing.
    let restored = h.ctx.restore_by_name("appeared").await.unwrap();
    assert!(h
        .ctx
        .resolver()
        .resolve(&RemotePath::parse("/appeared").unwrap())
        .await
        .is_ok());
    assert!(restored.is_folder());
}

#[tokio::test]
async fn preserve_timestamp_stamps_download() {
    let mut h = harness();
    let source = h.scratch.path().join("stamp.bin");
    std::fs::write(&source, patterned_bytes(64)).unwrap();
    let target = RemotePath::parse("/ts").unwrap();

    {
        let (resolver, store) = h.ctx.batch_parts();
        BatchRunner::new(resolver, store)
            .run_upload(&[source.clone()], &target, &options())
            .await
            .unwrap();
    }

    let remote = RemotePath::parse("/ts/stamp.bin").unwrap();
    let node = h.ctx.resolver().resolve(&remote).await.unwrap().node;

    let out = h.scratch.path().join("ts-out");
    let mut opts = options();
    opts.preserve_mtime = true;
    let (resolver, store) = h.ctx.batch_parts();
    BatchRunner::new(resolver, store)
        .run_download(&[remote], &out, &opts)
        .await
        .unwrap();

    let stamped = std::fs::metadata(out.join("stamp.bin"))
        .unwrap()
        .modified()
        .unwrap();
    let stamped_ms = stamped
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as i64;
    assert_eq!(stamped_ms, node.modified_ms);
}
