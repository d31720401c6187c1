//! Shared test harness: an in-memory backend plus a ready-made context.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tempfile::TempDir;

use filen_core::api::types::{
    AuthInfo, DirectoryListing, Session, UploadFinishRequest, UploadHandle, UserInfo, WireFile,
    WireFolder,
};
use filen_core::api::Backend;
use filen_core::config::{Config, Context, Credentials};
use filen_core::crypto::MasterKey;
use filen_core::error::{Error, Result};
use filen_core::fs::NodeId;

pub const TEST_EMAIL: &str = "tester@example.com";
pub const TEST_SALT: &str = "mock-salt";

#[derive(Clone)]
struct FolderRecord {
    parent: Option<NodeId>,
    metadata: String,
    timestamp: i64,
    trashed: bool,
}

#[derive(Clone)]
struct FileRecord {
    parent: Option<NodeId>,
    metadata: String,
    size: u64,
    chunks: Vec<Vec<u8>>,
    timestamp: i64,
    trashed: bool,
    hash: String,
}

struct UploadRecord {
    parent: NodeId,
    upload_key: String,
    chunks: HashMap<u64, Vec<u8>>,
}

#[derive(Default)]
struct State {
    folders: HashMap<NodeId, FolderRecord>,
    files: HashMap<NodeId, FileRecord>,
    uploads: HashMap<NodeId, UploadRecord>,
    /// Flip one ciphertext byte of this (file, chunk) on download.
    tamper: Option<(NodeId, u64)>,
}

/// Scripted in-memory store. Never decrypts anything: metadata stays
/// enveloped, chunks stay ciphertext, exactly like the real backend.
pub struct MockBackend {
    root: NodeId,
    state: Mutex<State>,
    next_id: AtomicU64,
    next_ts: AtomicU64,
    pub chunk_puts: AtomicU64,
    pub chunk_gets: AtomicU64,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            root: node_id(1),
            state: Mutex::new(State::default()),
            next_id: AtomicU64::new(2),
            next_ts: AtomicU64::new(1_700_000_000_000),
            chunk_puts: AtomicU64::new(0),
            chunk_gets: AtomicU64::new(0),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    fn fresh_id(&self) -> NodeId {
        node_id(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn fresh_ts(&self) -> i64 {
        self.next_ts.fetch_add(1, Ordering::SeqCst) as i64
    }

    pub fn puts(&self) -> u64 {
        self.chunk_puts.load(Ordering::SeqCst)
    }

    pub fn gets(&self) -> u64 {
        self.chunk_gets.load(Ordering::SeqCst)
    }

    /// Arrange for one downloaded chunk to arrive tampered.
    pub fn tamper_chunk(&self, file: NodeId, index: u64) {
        self.state.lock().unwrap().tamper = Some((file, index));
    }

    /// Seed a file record directly (for duplicate-name scenarios).
    pub fn seed_file(
        &self,
        parent: NodeId,
        metadata: String,
        size: u64,
        chunks: Vec<Vec<u8>>,
        hash: String,
        timestamp: i64,
    ) -> NodeId {
        let id = self.fresh_id();
        self.state.lock().unwrap().files.insert(
            id,
            FileRecord {
                parent: Some(parent),
                metadata,
                size,
                chunks,
                timestamp,
                trashed: false,
                hash,
            },
        );
        id
    }

    /// Raw ciphertext chunks of a stored file.
    pub fn stored_chunks(&self, file: NodeId) -> Option<Vec<Vec<u8>>> {
        self.state
            .lock()
            .unwrap()
            .files
            .get(&file)
            .map(|f| f.chunks.clone())
    }

    /// Hash recorded at upload-finish time.
    pub fn stored_hash(&self, file: NodeId) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .files
            .get(&file)
            .map(|f| f.hash.clone())
    }

    pub fn file_count(&self) -> usize {
        self.state
            .lock()
            .unwrap()
            .files
            .values()
            .filter(|f| !f.trashed)
            .count()
    }
}

fn node_id(n: u64) -> NodeId {
    NodeId::from_hex(&format!("{n:032x}")).unwrap()
}

fn wire_folder(id: NodeId, record: &FolderRecord) -> WireFolder {
    WireFolder {
        uuid: id,
        parent: record.parent,
        metadata: record.metadata.clone(),
        timestamp: record.timestamp,
        trashed: record.trashed,
    }
}

fn wire_file(id: NodeId, record: &FileRecord) -> WireFile {
    WireFile {
        uuid: id,
        parent: record.parent,
        metadata: record.metadata.clone(),
        size: record.size,
        chunks: record.chunks.len() as u64,
        version: 2,
        region: "eu-central".into(),
        bucket: "test-bucket".into(),
        timestamp: record.timestamp,
        trashed: record.trashed,
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn auth_info(&self, _email: &str) -> Result<AuthInfo> {
        Ok(AuthInfo {
            salt: TEST_SALT.into(),
        })
    }

    async fn login(&self, _email: &str, _auth_token: &str) -> Result<Session> {
        Ok(Session {
            api_key: "mock-api-key".into(),
        })
    }

    async fn user_info(&self) -> Result<UserInfo> {
        Ok(UserInfo {
            email: TEST_EMAIL.into(),
            root_folder: self.root,
            storage_used: 0,
            max_storage: 1 << 40,
        })
    }

    async fn list_directory(&self, folder: NodeId) -> Result<DirectoryListing> {
        let state = self.state.lock().unwrap();
        if folder != self.root && !state.folders.contains_key(&folder) {
            return Err(Error::NotFound(format!("folder {folder}")));
        }
        let mut listing = DirectoryListing::default();
        for (id, record) in &state.folders {
            if record.parent == Some(folder) && !record.trashed {
                listing.folders.push(wire_folder(*id, record));
            }
        }
        for (id, record) in &state.files {
            if record.parent == Some(folder) && !record.trashed {
                listing.files.push(wire_file(*id, record));
            }
        }
        Ok(listing)
    }

    async fn create_folder(
        &self,
        parent: NodeId,
        metadata: &str,
        _name_hashed: &str,
    ) -> Result<NodeId> {
        let id = self.fresh_id();
        let timestamp = self.fresh_ts();
        self.state.lock().unwrap().folders.insert(
            id,
            FolderRecord {
                parent: Some(parent),
                metadata: metadata.to_string(),
                timestamp,
                trashed: false,
            },
        );
        Ok(id)
    }

    async fn file_info(&self, file: NodeId) -> Result<WireFile> {
        let state = self.state.lock().unwrap();
        state
            .files
            .get(&file)
            .map(|record| wire_file(file, record))
            .ok_or_else(|| Error::NotFound(format!("file {file}")))
    }

    async fn upload_begin(&self, parent: NodeId) -> Result<UploadHandle> {
        let id = self.fresh_id();
        let upload_key = format!("upload-key-{id}");
        self.state.lock().unwrap().uploads.insert(
            id,
            UploadRecord {
                parent,
                upload_key: upload_key.clone(),
                chunks: HashMap::new(),
            },
        );
        Ok(UploadHandle {
            file_uuid: id,
            upload_key,
        })
    }

    async fn upload_chunk(
        &self,
        handle: &UploadHandle,
        index: u64,
        ciphertext: Bytes,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let upload = state
            .uploads
            .get_mut(&handle.file_uuid)
            .ok_or_else(|| Error::NotFound(format!("upload {}", handle.file_uuid)))?;
        if upload.upload_key != handle.upload_key {
            return Err(Error::Auth("bad upload key".into()));
        }
        upload.chunks.insert(index, ciphertext.to_vec());
        self.chunk_puts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn upload_finish(&self, request: &UploadFinishRequest) -> Result<WireFile> {
        let timestamp = self.fresh_ts();
        let mut state = self.state.lock().unwrap();
        let upload = state
            .uploads
            .remove(&request.file_uuid)
            .ok_or_else(|| Error::NotFound(format!("upload {}", request.file_uuid)))?;
        if upload.upload_key != request.upload_key {
            return Err(Error::Auth("bad upload key".into()));
        }

        let mut chunks = Vec::with_capacity(request.chunks as usize);
        for index in 0..request.chunks {
            let chunk = upload.chunks.get(&index).ok_or_else(|| {
                Error::Conflict(format!("upload finished with chunk {index} missing"))
            })?;
            chunks.push(chunk.clone());
        }

        let record = FileRecord {
            parent: Some(upload.parent),
            metadata: request.metadata.clone(),
            size: request.size,
            chunks,
            timestamp,
            trashed: false,
            hash: request.hash.clone(),
        };
        let wire = wire_file(request.file_uuid, &record);
        state.files.insert(request.file_uuid, record);
        Ok(wire)
    }

    async fn download_chunk(
        &self,
        file: NodeId,
        _region: &str,
        _bucket: &str,
        index: u64,
    ) -> Result<Bytes> {
        let state = self.state.lock().unwrap();
        let record = state
            .files
            .get(&file)
            .ok_or_else(|| Error::NotFound(format!("file {file}")))?;
        let mut chunk = record
            .chunks
            .get(index as usize)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("chunk {index} of {file}")))?;
        if state.tamper == Some((file, index)) {
            let last = chunk.len() - 1;
            chunk[last] ^= 0x01;
        }
        self.chunk_gets.fetch_add(1, Ordering::SeqCst);
        Ok(Bytes::from(chunk))
    }

    async fn move_node(&self, node: NodeId, new_parent: NodeId) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(folder) = state.folders.get_mut(&node) {
            folder.parent = Some(new_parent);
            return Ok(());
        }
        if let Some(file) = state.files.get_mut(&node) {
            file.parent = Some(new_parent);
            return Ok(());
        }
        Err(Error::NotFound(format!("node {node}")))
    }

    async fn rename_node(&self, node: NodeId, metadata: &str, _name_hashed: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(folder) = state.folders.get_mut(&node) {
            folder.metadata = metadata.to_string();
            return Ok(());
        }
        if let Some(file) = state.files.get_mut(&node) {
            file.metadata = metadata.to_string();
            return Ok(());
        }
        Err(Error::NotFound(format!("node {node}")))
    }

    async fn trash_node(&self, node: NodeId) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(folder) = state.folders.get_mut(&node) {
            folder.trashed = true;
            return Ok(());
        }
        if let Some(file) = state.files.get_mut(&node) {
            file.trashed = true;
            return Ok(());
        }
        Err(Error::NotFound(format!("node {node}")))
    }

    async fn restore_node(&self, node: NodeId) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(folder) = state.folders.get_mut(&node) {
            folder.trashed = false;
            return Ok(());
        }
        if let Some(file) = state.files.get_mut(&node) {
            file.trashed = false;
            return Ok(());
        }
        Err(Error::NotFound(format!("node {node}")))
    }

    async fn delete_node(&self, node: NodeId) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.folders.remove(&node).is_some() || state.files.remove(&node).is_some() {
            Ok(())
        } else {
            Err(Error::NotFound(format!("node {node}")))
        }
    }

    async fn list_trash(&self) -> Result<DirectoryListing> {
        let state = self.state.lock().unwrap();
        let mut listing = DirectoryListing::default();
        for (id, record) in &state.folders {
            if record.trashed {
                listing.folders.push(wire_folder(*id, record));
            }
        }
        for (id, record) in &state.files {
            if record.trashed {
                listing.files.push(wire_file(*id, record));
            }
        }
        Ok(listing)
    }
}

/// A context wired to a fresh mock backend and scratch state directory.
pub struct Harness {
    pub ctx: Context,
    pub mock: Arc<MockBackend>,
    pub master_key: MasterKey,
    #[allow(dead_code)]
    pub state_dir: TempDir,
    #[allow(dead_code)]
    pub scratch: TempDir,
}

pub fn harness() -> Harness {
    let mock = Arc::new(MockBackend::new());
    let state_dir = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();

    let master_key_hex = "3a".repeat(32);
    let credentials = Credentials {
        email: TEST_EMAIL.into(),
        master_key_hex: master_key_hex.clone(),
        auth_token: "5b".repeat(32),
        api_key: "mock-api-key".into(),
        base_url: "http://mock.invalid".into(),
    };
    let config = Config {
        state_dir: state_dir.path().join(".filen-cli"),
    };
    let ctx = Context::with_backend(config, credentials, mock.clone()).unwrap();

    Harness {
        ctx,
        mock,
        master_key: MasterKey::from_hex(&master_key_hex).unwrap(),
        state_dir,
        scratch,
    }
}

/// Deterministic pseudo-random file content.
pub fn patterned_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
