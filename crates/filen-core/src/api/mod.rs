//! The backend client: a thin, retrying, typed request layer.
//!
//! [`Backend`] is the seam between the core and the HTTP API. The
//! production implementation is [`HttpBackend`]; tests drive the engine
//! against an in-memory implementation instead.

pub mod http;
pub mod retry;
pub mod types;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;
use crate::fs::node::NodeId;

pub use http::HttpBackend;
pub use retry::RetryPolicy;
pub use types::{
    AuthInfo, DirectoryListing, FileMetadata, FolderMetadata, Session, UploadFinishRequest,
    UploadHandle, UserInfo, WireFile, WireFolder,
};

/// Typed operations the core requires from the store.
///
/// Implementations own authentication and retry; callers see only the
/// closed error-kind set. Chunk payloads travel as raw bytes, one chunk
/// buffered at a time per transfer.
#[async_trait]
pub trait Backend: Send + Sync {
    /// KDF parameters (salt) for an email, available before login.
    async fn auth_info(&self, email: &str) -> Result<AuthInfo>;

    /// Exchange email + derived auth token for an API key.
    async fn login(&self, email: &str, auth_token: &str) -> Result<Session>;

    async fn user_info(&self) -> Result<UserInfo>;

    async fn list_directory(&self, folder: NodeId) -> Result<DirectoryListing>;

    /// Create a folder; `metadata` is the name envelope, `name_hashed`
    /// the HMAC lookup hash. Returns the server-assigned identifier.
    async fn create_folder(&self, parent: NodeId, metadata: &str, name_hashed: &str)
        -> Result<NodeId>;

    async fn file_info(&self, file: NodeId) -> Result<WireFile>;

    /// Reserve an upload slot; the returned handle authorizes chunk PUTs.
    async fn upload_begin(&self, parent: NodeId) -> Result<UploadHandle>;

    /// PUT one encrypted chunk. Idempotent per `(handle, index)`.
    async fn upload_chunk(&self, handle: &UploadHandle, index: u64, ciphertext: Bytes)
        -> Result<()>;

    /// Commit an upload: metadata envelope plus the final plaintext hash.
    async fn upload_finish(&self, request: &UploadFinishRequest) -> Result<WireFile>;

    /// GET one encrypted chunk.
    async fn download_chunk(
        &self,
        file: NodeId,
        region: &str,
        bucket: &str,
        index: u64,
    ) -> Result<Bytes>;

    async fn move_node(&self, node: NodeId, new_parent: NodeId) -> Result<()>;

    /// Re-encrypt the name: `metadata` is the new envelope, `name_hashed`
    /// the new lookup hash.
    async fn rename_node(&self, node: NodeId, metadata: &str, name_hashed: &str) -> Result<()>;

    async fn trash_node(&self, node: NodeId) -> Result<()>;

    async fn restore_node(&self, node: NodeId) -> Result<()>;

    /// Permanent, unrecoverable delete.
    async fn delete_node(&self, node: NodeId) -> Result<()>;

    async fn list_trash(&self) -> Result<DirectoryListing>;
}
