//! The decrypted view of the remote tree: opaque identifiers and nodes.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::crypto::ContentKey;
use crate::error::{Error, Result};

/// Opaque 128-bit identifier assigned by the backend, for files and
/// folders alike. Rendered as 32 lowercase hex characters.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId([u8; 16]);

impl NodeId {
    pub fn from_hex(s: &str) -> Result<Self> {
        let raw = hex::decode(s).map_err(|_| Error::Fatal(format!("malformed identifier {s:?}")))?;
        let bytes: [u8; 16] = raw
            .try_into()
            .map_err(|_| Error::Fatal(format!("identifier {s:?} is not 128 bits")))?;
        Ok(Self(bytes))
    }

    #[must_use]
    pub fn to_hex(self) -> String {
        hex::encode(self.0)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl std::fmt::Debug for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NodeId({})", self.to_hex())
    }
}

impl Serialize for NodeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for NodeId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        NodeId::from_hex(&s).map_err(|e| D::Error::custom(e.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Folder,
}

/// File-specific attributes recovered from the decrypted metadata
/// envelope together with the server-side record.
#[derive(Debug, Clone)]
pub struct FileAttrs {
    pub size: u64,
    pub chunks: u64,
    pub content_key: ContentKey,
    pub mime: String,
    /// Hex SHA-512 of the plaintext, as stored in the metadata envelope.
    pub hash: Option<String>,
    pub version: u32,
    pub region: String,
    pub bucket: String,
}

/// A file or folder in the remote tree. Parents are referenced by
/// identifier only; traversal resolves them through the cache.
#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub parent: Option<NodeId>,
    pub name: String,
    pub kind: NodeKind,
    /// Milliseconds since epoch.
    pub modified_ms: i64,
    pub trashed: bool,
    /// Present iff `kind == NodeKind::File`.
    pub file: Option<FileAttrs>,
}

impl Node {
    #[must_use]
    pub fn is_folder(&self) -> bool {
        self.kind == NodeKind::Folder
    }

    #[must_use]
    pub fn is_file(&self) -> bool {
        self.kind == NodeKind::File
    }

    /// Size in bytes; zero for folders.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.file.as_ref().map_or(0, |f| f.size)
    }
}
