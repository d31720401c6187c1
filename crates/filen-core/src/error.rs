//! Error types for the core crate.
//!
//! Every failure in the core maps onto a closed set of [`ErrorKind`]s. The
//! kind drives three consumers: the retry layer (only `transient` and
//! `rate_limited` are retried), the batch orchestrator (task statuses are
//! `error_<kind>`), and the CLI exit-code mapping.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Classification of a [`Error`]. Closed set; the string form is embedded
/// in journal task statuses and must stay stable across releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Auth,
    NotFound,
    Ambiguous,
    Conflict,
    RateLimited,
    Transient,
    Fatal,
    CryptoVersion,
    CryptoAuth,
    CorruptChunk,
    HashMismatch,
    InvalidPath,
    Io,
    Canceled,
}

impl ErrorKind {
    /// Stable string form, as embedded in `error_<kind>` task statuses.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Auth => "auth",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Ambiguous => "ambiguous",
            ErrorKind::Conflict => "conflict",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Transient => "transient",
            ErrorKind::Fatal => "fatal",
            ErrorKind::CryptoVersion => "crypto_version",
            ErrorKind::CryptoAuth => "crypto_auth",
            ErrorKind::CorruptChunk => "corrupt_chunk",
            ErrorKind::HashMismatch => "hash_mismatch",
            ErrorKind::InvalidPath => "invalid_path",
            ErrorKind::Io => "io",
            ErrorKind::Canceled => "canceled",
        }
    }

    /// Parse the stable string form back into a kind.
    #[must_use]
    pub fn from_str_opt(s: &str) -> Option<Self> {
        Some(match s {
            "auth" => ErrorKind::Auth,
            "not_found" => ErrorKind::NotFound,
            "ambiguous" => ErrorKind::Ambiguous,
            "conflict" => ErrorKind::Conflict,
            "rate_limited" => ErrorKind::RateLimited,
            "transient" => ErrorKind::Transient,
            "fatal" => ErrorKind::Fatal,
            "crypto_version" => ErrorKind::CryptoVersion,
            "crypto_auth" => ErrorKind::CryptoAuth,
            "corrupt_chunk" => ErrorKind::CorruptChunk,
            "hash_mismatch" => ErrorKind::HashMismatch,
            "invalid_path" => ErrorKind::InvalidPath,
            "io" => ErrorKind::Io,
            "canceled" => ErrorKind::Canceled,
            _ => return None,
        })
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced by the core.
#[derive(Error, Debug)]
pub enum Error {
    /// Credentials rejected by the backend, or no credentials at all.
    /// Aborts a whole batch immediately.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// A path segment, node, or journal the caller named does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Duplicate names under one parent and the caller required a strict
    /// match. The candidates are reported so the user can fall back to
    /// identifier-addressed commands.
    #[error("ambiguous name {name:?} under {parent:?}: {candidates} candidates")]
    Ambiguous {
        name: String,
        parent: String,
        candidates: usize,
    },

    /// The backend refused the operation because of existing state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// HTTP 429. `retry_after` carries the server hint when present.
    #[error("rate limited by backend")]
    RateLimited { retry_after: Option<Duration> },

    /// 5xx or a network-level failure. `connection` is true when no HTTP
    /// response was received at all; non-idempotent writes are only
    /// retried in that case.
    #[error("transient backend failure: {message}")]
    Transient { message: String, connection: bool },

    /// Unretryable 4xx or a protocol violation.
    #[error("backend error: {0}")]
    Fatal(String),

    /// Metadata envelope with an unrecognized version prefix.
    #[error("unsupported metadata envelope version {version:?}")]
    CryptoVersion { version: String },

    /// Authentication tag verification failed. The ciphertext is invalid
    /// or has been tampered with, or the wrong key was used.
    #[error("decryption failed for {what}: authentication tag mismatch")]
    CryptoAuth { what: String },

    /// A chunk blob too short to carry IV and tag.
    #[error("chunk {index} is structurally invalid ({len} bytes)")]
    CorruptChunk { index: u64, len: usize },

    /// Full-file SHA-512 did not match the server-stored hash.
    #[error("file hash mismatch: expected {expected}, computed {computed}")]
    HashMismatch { expected: String, computed: String },

    /// Empty segment, embedded NUL, or otherwise unusable path.
    #[error("invalid path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },

    /// Local filesystem failure.
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        #[source]
        source: io::Error,
        path: PathBuf,
    },

    /// Cooperative cancellation observed.
    #[error("operation canceled")]
    Canceled,
}

impl Error {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Auth(_) => ErrorKind::Auth,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Ambiguous { .. } => ErrorKind::Ambiguous,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::RateLimited { .. } => ErrorKind::RateLimited,
            Error::Transient { .. } => ErrorKind::Transient,
            Error::Fatal(_) => ErrorKind::Fatal,
            Error::CryptoVersion { .. } => ErrorKind::CryptoVersion,
            Error::CryptoAuth { .. } => ErrorKind::CryptoAuth,
            Error::CorruptChunk { .. } => ErrorKind::CorruptChunk,
            Error::HashMismatch { .. } => ErrorKind::HashMismatch,
            Error::InvalidPath { .. } => ErrorKind::InvalidPath,
            Error::Io { .. } => ErrorKind::Io,
            Error::Canceled => ErrorKind::Canceled,
        }
    }

    /// True for kinds the request layer may retry automatically.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transient | ErrorKind::RateLimited)
    }

    /// Attach a path to a bare I/O error.
    #[must_use]
    pub fn io(source: io::Error, path: impl Into<PathBuf>) -> Self {
        Error::Io {
            source,
            path: path.into(),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_strings_round_trip() {
        let kinds = [
            ErrorKind::Auth,
            ErrorKind::NotFound,
            ErrorKind::Ambiguous,
            ErrorKind::Conflict,
            ErrorKind::RateLimited,
            ErrorKind::Transient,
            ErrorKind::Fatal,
            ErrorKind::CryptoVersion,
            ErrorKind::CryptoAuth,
            ErrorKind::CorruptChunk,
            ErrorKind::HashMismatch,
            ErrorKind::InvalidPath,
            ErrorKind::Io,
            ErrorKind::Canceled,
        ];
        for kind in kinds {
            assert_eq!(ErrorKind::from_str_opt(kind.as_str()), Some(kind));
        }
        assert_eq!(ErrorKind::from_str_opt("no_such_kind"), None);
    }

    #[test]
    fn retryable_classification() {
        assert!(Error::Transient {
            message: "x".into(),
            connection: false
        }
        .is_retryable());
        assert!(Error::RateLimited { retry_after: None }.is_retryable());
        assert!(!Error::Auth("x".into()).is_retryable());
        assert!(!Error::Fatal("x".into()).is_retryable());
    }
}
