//! Path resolution over cached, decrypted directory listings.
//!
//! Listings come off the wire with enveloped names; the resolver decrypts
//! them under the master key and caches the decrypted nodes per folder.
//! Entries are valid for ten minutes but every mutation the client issues
//! invalidates the affected parents immediately, so a `resolve` after a
//! local mutation always observes the new state.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use lru::LruCache;
use tokio::sync::OnceCell;
use tracing::{debug, instrument, trace, warn};

use crate::api::types::{DirectoryListing, FileMetadata, FolderMetadata, WireFile, WireFolder};
use crate::api::Backend;
use crate::crypto::{self, ContentKey, MasterKey};
use crate::error::{Error, Result};

use super::node::{FileAttrs, Node, NodeId, NodeKind};
use super::path::RemotePath;

/// Absolute TTL of a cached directory listing.
pub const CACHE_TTL: Duration = Duration::from_secs(600);
/// Bound on the number of cached folders.
pub const CACHE_CAPACITY: usize = 1024;

/// A resolved node plus same-name siblings under the same parent.
///
/// `duplicates` is empty in the common case. Strict callers refuse to act
/// when it is not; `ls` prints every candidate.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub node: Node,
    pub duplicates: Vec<Node>,
}

struct CacheEntry {
    nodes: Arc<Vec<Node>>,
    fetched_at: Instant,
}

/// In-memory, process-scoped listing cache. Keyed by folder identifier;
/// canonical paths are memoized to identifiers alongside.
struct DirCache {
    entries: LruCache<NodeId, CacheEntry>,
    path_ids: HashMap<String, NodeId>,
    ttl: Duration,
}

impl DirCache {
    fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: LruCache::new(NonZeroUsize::new(capacity).expect("capacity must be nonzero")),
            path_ids: HashMap::new(),
            ttl,
        }
    }

    fn get(&mut self, folder: NodeId) -> Option<Arc<Vec<Node>>> {
        let expired = match self.entries.get(&folder) {
            Some(entry) if entry.fetched_at.elapsed() < self.ttl => {
                return Some(Arc::clone(&entry.nodes));
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            trace!(%folder, "cache entry expired");
            self.entries.pop(&folder);
        }
        None
    }

    fn put(&mut self, folder: NodeId, nodes: Arc<Vec<Node>>) {
        self.entries.put(
            folder,
            CacheEntry {
                nodes,
                fetched_at: Instant::now(),
            },
        );
    }

    fn invalidate(&mut self, folder: NodeId) {
        self.entries.pop(&folder);
    }

    fn remember_path(&mut self, path: &RemotePath, folder: NodeId) {
        self.path_ids.insert(path.as_str().to_string(), folder);
    }

    fn id_for_path(&self, path: &RemotePath) -> Option<NodeId> {
        self.path_ids.get(path.as_str()).copied()
    }
}

/// Maps human paths to backend identifiers via cached listings.
pub struct Resolver {
    backend: Arc<dyn Backend>,
    master_key: MasterKey,
    email: String,
    cache: Mutex<DirCache>,
    root: OnceCell<NodeId>,
}

impl Resolver {
    pub fn new(backend: Arc<dyn Backend>, master_key: MasterKey, email: impl Into<String>) -> Self {
        Self {
            backend,
            master_key,
            email: email.into(),
            cache: Mutex::new(DirCache::new(CACHE_CAPACITY, CACHE_TTL)),
            root: OnceCell::new(),
        }
    }

    /// The account's root folder identifier, fetched once per process.
    pub async fn root(&self) -> Result<NodeId> {
        self.root
            .get_or_try_init(|| async {
                let info = self.backend.user_info().await?;
                debug!(root = %info.root_folder, "fetched root folder id");
                Ok(info.root_folder)
            })
            .await
            .copied()
    }

    /// A synthetic node for the root folder.
    pub async fn root_node(&self) -> Result<Node> {
        Ok(Node {
            id: self.root().await?,
            parent: None,
            name: String::new(),
            kind: NodeKind::Folder,
            modified_ms: 0,
            trashed: false,
            file: None,
        })
    }

    /// Decrypted listing of a folder, from cache when fresh.
    pub async fn list(&self, folder: NodeId) -> Result<Arc<Vec<Node>>> {
        {
            let mut cache = self.cache.lock().expect("cache lock poisoned");
            if let Some(nodes) = cache.get(folder) {
                trace!(%folder, "listing served from cache");
                return Ok(nodes);
            }
        }

        let listing = self.backend.list_directory(folder).await?;
        let nodes = Arc::new(self.decrypt_listing(folder, &listing));
        self.cache
            .lock()
            .expect("cache lock poisoned")
            .put(folder, Arc::clone(&nodes));
        Ok(nodes)
    }

    /// Resolve a canonical path to its node.
    ///
    /// Walks segment by segment from the root. When duplicate names
    /// coexist under one parent, prefers the most recently modified
    /// non-trashed node, then the lexicographically smaller identifier,
    /// and reports the losers in [`Resolved::duplicates`].
    #[instrument(level = "debug", skip(self), fields(path = %path))]
    pub async fn resolve(&self, path: &RemotePath) -> Result<Resolved> {
        if path.is_root() {
            return Ok(Resolved {
                node: self.root_node().await?,
                duplicates: Vec::new(),
            });
        }

        let mut current = self.root().await?;
        let mut walked = RemotePath::root();
        let segments: Vec<&str> = path.segments().collect();

        for (depth, segment) in segments.iter().enumerate() {
            let is_last = depth == segments.len() - 1;
            let listing = self.list(current).await?;
            let (node, duplicates) = pick_by_name(&listing, segment).ok_or_else(|| {
                debug!(segment, depth, "path segment not found");
                Error::NotFound(format!("{path} (missing {segment:?})"))
            })?;

            walked = walked.join(segment)?;
            if is_last {
                return Ok(Resolved { node, duplicates });
            }
            if !node.is_folder() {
                return Err(Error::NotFound(format!("{walked} is not a folder")));
            }
            current = node.id;
            self.cache
                .lock()
                .expect("cache lock poisoned")
                .remember_path(&walked, current);
        }

        unreachable!("non-root path has at least one segment")
    }

    /// [`resolve`](Self::resolve), refusing ambiguous matches.
    pub async fn resolve_strict(&self, path: &RemotePath) -> Result<Node> {
        let resolved = self.resolve(path).await?;
        if resolved.duplicates.is_empty() {
            Ok(resolved.node)
        } else {
            Err(Error::Ambiguous {
                name: resolved.node.name.clone(),
                parent: path
                    .parent()
                    .map_or_else(|| "/".to_string(), |p| p.as_str().to_string()),
                candidates: resolved.duplicates.len() + 1,
            })
        }
    }

    /// Resolve a folder path, creating missing segments.
    #[instrument(level = "debug", skip(self), fields(path = %path))]
    pub async fn ensure_folder(&self, path: &RemotePath) -> Result<Node> {
        if path.is_root() {
            return self.root_node().await;
        }

        let mut current = self.root().await?;
        let mut current_node: Option<Node> = None;
        let mut walked = RemotePath::root();

        for segment in path.segments() {
            walked = walked.join(segment)?;
            let listing = self.list(current).await?;
            let node = match pick_by_name(&listing, segment) {
                Some((node, _)) => {
                    if !node.is_folder() {
                        return Err(Error::Conflict(format!(
                            "{walked} exists and is not a folder"
                        )));
                    }
                    node
                }
                None => self.create_folder(current, segment).await?,
            };
            current = node.id;
            current_node = Some(node);
            self.cache
                .lock()
                .expect("cache lock poisoned")
                .remember_path(&walked, current);
        }

        Ok(current_node.expect("non-root path has at least one segment"))
    }

    /// Create one folder under `parent` and invalidate its listing.
    pub async fn create_folder(&self, parent: NodeId, name: &str) -> Result<Node> {
        let metadata_json = serde_json::to_string(&FolderMetadata {
            name: name.to_string(),
        })
        .map_err(|e| Error::Fatal(format!("folder metadata serialization: {e}")))?;
        let envelope = crypto::wrap_metadata(self.master_key.as_bytes(), &metadata_json)?;
        let name_hashed = crypto::hash_name(&self.master_key, &self.email, name);

        let id = self
            .backend
            .create_folder(parent, &envelope, &name_hashed)
            .await?;
        debug!(%parent, %id, "created folder");
        self.invalidate(parent);

        Ok(Node {
            id,
            parent: Some(parent),
            name: name.to_string(),
            kind: NodeKind::Folder,
            modified_ms: chrono::Utc::now().timestamp_millis(),
            trashed: false,
            file: None,
        })
    }

    /// Drop the cached listing of one folder.
    pub fn invalidate(&self, folder: NodeId) {
        self.cache
            .lock()
            .expect("cache lock poisoned")
            .invalidate(folder);
    }

    /// Drop the cached listing of the folder at a canonical path, if its
    /// identifier has been seen.
    pub fn invalidate_path(&self, path: &RemotePath) {
        let mut cache = self.cache.lock().expect("cache lock poisoned");
        if let Some(id) = cache.id_for_path(path) {
            cache.invalidate(id);
        }
    }

    /// Decode and decrypt one wire file record.
    pub fn decode_file(&self, wire: &WireFile) -> Result<Node> {
        let json = crypto::unwrap_metadata(self.master_key.as_bytes(), &wire.metadata)?;
        let meta: FileMetadata = serde_json::from_str(&json).map_err(|e| Error::CryptoAuth {
            what: format!("file metadata for {} ({e})", wire.uuid),
        })?;
        let content_key = ContentKey::from_hex(&meta.key)?;
        Ok(Node {
            id: wire.uuid,
            parent: wire.parent,
            name: meta.name,
            kind: NodeKind::File,
            modified_ms: meta.last_modified,
            trashed: wire.trashed,
            file: Some(FileAttrs {
                size: wire.size,
                chunks: wire.chunks,
                content_key,
                mime: meta.mime,
                hash: meta.hash,
                version: wire.version,
                region: wire.region.clone(),
                bucket: wire.bucket.clone(),
            }),
        })
    }

    /// Decode and decrypt one wire folder record.
    pub fn decode_folder(&self, wire: &WireFolder) -> Result<Node> {
        let json = crypto::unwrap_metadata(self.master_key.as_bytes(), &wire.metadata)?;
        let meta: FolderMetadata = serde_json::from_str(&json).map_err(|e| Error::CryptoAuth {
            what: format!("folder metadata for {} ({e})", wire.uuid),
        })?;
        Ok(Node {
            id: wire.uuid,
            parent: wire.parent,
            name: meta.name,
            kind: NodeKind::Folder,
            modified_ms: wire.timestamp,
            trashed: wire.trashed,
            file: None,
        })
    }

    /// Decrypt a whole listing, skipping entries that fail to decode.
    fn decrypt_listing(&self, folder: NodeId, listing: &DirectoryListing) -> Vec<Node> {
        let mut nodes = Vec::with_capacity(listing.folders.len() + listing.files.len());
        for wire in &listing.folders {
            match self.decode_folder(wire) {
                Ok(node) => nodes.push(node),
                Err(e) => warn!(%folder, uuid = %wire.uuid, error = %e, "skipping undecodable folder entry"),
            }
        }
        for wire in &listing.files {
            match self.decode_file(wire) {
                Ok(node) => nodes.push(node),
                Err(e) => warn!(%folder, uuid = %wire.uuid, error = %e, "skipping undecodable file entry"),
            }
        }
        nodes
    }

    /// Wrap a name into an envelope + lookup hash pair for mutations.
    pub fn seal_folder_name(&self, name: &str) -> Result<(String, String)> {
        let json = serde_json::to_string(&FolderMetadata {
            name: name.to_string(),
        })
        .map_err(|e| Error::Fatal(format!("folder metadata serialization: {e}")))?;
        let envelope = crypto::wrap_metadata(self.master_key.as_bytes(), &json)?;
        Ok((
            envelope,
            crypto::hash_name(&self.master_key, &self.email, name),
        ))
    }

    /// Re-seal a file's metadata under a new name, preserving the rest.
    pub fn seal_file_rename(&self, node: &Node, new_name: &str) -> Result<(String, String)> {
        let attrs = node
            .file
            .as_ref()
            .ok_or_else(|| Error::Fatal("seal_file_rename on a folder".into()))?;
        let meta = FileMetadata {
            name: new_name.to_string(),
            size: attrs.size,
            mime: attrs.mime.clone(),
            key: attrs.content_key.to_hex(),
            last_modified: node.modified_ms,
            hash: attrs.hash.clone(),
        };
        let json = serde_json::to_string(&meta)
            .map_err(|e| Error::Fatal(format!("file metadata serialization: {e}")))?;
        let envelope = crypto::wrap_metadata(self.master_key.as_bytes(), &json)?;
        Ok((
            envelope,
            crypto::hash_name(&self.master_key, &self.email, new_name),
        ))
    }

    #[must_use]
    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    #[must_use]
    pub fn email(&self) -> &str {
        &self.email
    }

    #[must_use]
    pub fn master_key(&self) -> &MasterKey {
        &self.master_key
    }
}

/// Select the winning node for `name` and collect same-name losers.
///
/// Preference: non-trashed over trashed, then newest `modified_ms`, then
/// smaller identifier. Returns `None` when no non-trashed candidate
/// exists.
fn pick_by_name(nodes: &[Node], name: &str) -> Option<(Node, Vec<Node>)> {
    let mut candidates: Vec<&Node> = nodes.iter().filter(|n| n.name == name).collect();
    if candidates.is_empty() {
        return None;
    }
    candidates.sort_by(|a, b| {
        a.trashed
            .cmp(&b.trashed)
            .then(b.modified_ms.cmp(&a.modified_ms))
            .then(a.id.cmp(&b.id))
    });
    if candidates[0].trashed {
        return None;
    }
    let winner = candidates[0].clone();
    let duplicates = candidates[1..].iter().map(|n| (*n).clone()).collect();
    Some((winner, duplicates))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn folder(id: u8, name: &str, modified_ms: i64, trashed: bool) -> Node {
        let mut bytes = [0u8; 16];
        bytes[15] = id;
        Node {
            id: NodeId::from_hex(&hex::encode(bytes)).unwrap(),
            parent: None,
            name: name.to_string(),
            kind: NodeKind::Folder,
            modified_ms,
            trashed,
            file: None,
        }
    }

    #[test]
    fn pick_prefers_newest_non_trashed() {
        let nodes = vec![
            folder(1, "c.txt", 100, false),
            folder(2, "c.txt", 200, false),
            folder(3, "other", 999, false),
        ];
        let (winner, dups) = pick_by_name(&nodes, "c.txt").unwrap();
        assert_eq!(winner.modified_ms, 200);
        assert_eq!(dups.len(), 1);
        assert_eq!(dups[0].modified_ms, 100);
    }

    #[test]
    fn pick_breaks_mtime_ties_by_smaller_id() {
        let nodes = vec![folder(9, "x", 100, false), folder(2, "x", 100, false)];
        let (winner, dups) = pick_by_name(&nodes, "x").unwrap();
        assert_eq!(winner.id.to_hex().chars().last(), Some('2'));
        assert_eq!(dups.len(), 1);
    }

    #[test]
    fn pick_skips_trashed_winners() {
        let nodes = vec![folder(1, "x", 900, true), folder(2, "x", 100, false)];
        let (winner, _) = pick_by_name(&nodes, "x").unwrap();
        assert!(!winner.trashed);
        assert_eq!(winner.modified_ms, 100);
    }

    #[test]
    fn pick_returns_none_when_only_trashed() {
        let nodes = vec![folder(1, "x", 900, true)];
        assert!(pick_by_name(&nodes, "x").is_none());
        assert!(pick_by_name(&nodes, "y").is_none());
    }

    #[test]
    fn cache_expires_and_bounds() {
        let mut cache = DirCache::new(2, Duration::from_millis(0));
        let id = NodeId::from_hex(&"00".repeat(16)).unwrap();
        cache.put(id, Arc::new(Vec::new()));
        // TTL of zero: the entry is already expired on read.
        assert!(cache.get(id).is_none());

        let mut cache = DirCache::new(2, Duration::from_secs(60));
        cache.put(id, Arc::new(Vec::new()));
        assert!(cache.get(id).is_some());
        cache.invalidate(id);
        assert!(cache.get(id).is_none());
    }
}
