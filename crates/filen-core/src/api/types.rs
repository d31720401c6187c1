//! Wire-level request/response types.
//!
//! Everything here crosses the HTTP boundary as-is: metadata fields are
//! still envelopes, names are still hashed. Decryption happens in the
//! resolver and transfer engine, never in the transport.

use serde::{Deserialize, Serialize};

use crate::fs::node::NodeId;

/// Pre-login KDF parameters for an account.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthInfo {
    pub salt: String,
}

/// Result of a successful login.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub api_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub email: String,
    pub root_folder: NodeId,
    pub storage_used: u64,
    pub max_storage: u64,
}

/// A folder entry as the backend stores it: the name is inside the
/// metadata envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireFolder {
    pub uuid: NodeId,
    pub parent: Option<NodeId>,
    pub metadata: String,
    /// Milliseconds since epoch.
    pub timestamp: i64,
    #[serde(default)]
    pub trashed: bool,
}

/// A file entry as the backend stores it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireFile {
    pub uuid: NodeId,
    pub parent: Option<NodeId>,
    pub metadata: String,
    pub size: u64,
    pub chunks: u64,
    pub version: u32,
    pub region: String,
    pub bucket: String,
    /// Milliseconds since epoch.
    pub timestamp: i64,
    #[serde(default)]
    pub trashed: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirectoryListing {
    pub folders: Vec<WireFolder>,
    pub files: Vec<WireFile>,
}

/// Server-assigned identifiers for an in-progress upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadHandle {
    pub file_uuid: NodeId,
    pub upload_key: String,
}

/// Everything `upload_finish` needs to commit a file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadFinishRequest {
    pub file_uuid: NodeId,
    pub upload_key: String,
    pub name_hashed: String,
    /// Metadata envelope encrypted under the master key.
    pub metadata: String,
    pub size: u64,
    pub chunks: u64,
    /// Hex SHA-512 of the whole plaintext.
    pub hash: String,
}

/// Plaintext payload of a folder's metadata envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderMetadata {
    pub name: String,
}

/// Plaintext payload of a file's metadata envelope, before wrapping
/// under the master key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    pub name: String,
    pub size: u64,
    pub mime: String,
    /// Hex of the per-file content key.
    pub key: String,
    /// Milliseconds since epoch.
    pub last_modified: i64,
    /// Hex SHA-512 of the plaintext.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_metadata_uses_camel_case_wire_names() {
        let meta = FileMetadata {
            name: "report.pdf".into(),
            size: 1234,
            mime: "application/pdf".into(),
            key: "00".repeat(32),
            last_modified: 1_700_000_000_000,
            hash: Some("ab".repeat(64)),
        };
        let json = serde_json::to_string(&meta).unwrap();
        assert!(json.contains("\"lastModified\":1700000000000"));
        let back: FileMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back.name, meta.name);
        assert_eq!(back.last_modified, meta.last_modified);
    }

    #[test]
    fn file_metadata_hash_is_optional() {
        let json = r#"{"name":"a","size":0,"mime":"","key":"","lastModified":0}"#;
        let meta: FileMetadata = serde_json::from_str(json).unwrap();
        assert!(meta.hash.is_none());
    }
}
