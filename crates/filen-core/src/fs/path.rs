//! Canonical slash-separated remote paths.
//!
//! A path is a sequence of name components rooted at `/`. Names are
//! case-sensitive, never contain `/` or NUL, and pass through the
//! metadata envelope unchanged.

use crate::error::{Error, Result};

/// A validated, canonical remote path. The root is `"/"`; every other
/// path is `/seg/seg/...` with no trailing slash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RemotePath(String);

impl RemotePath {
    /// The root folder path.
    #[must_use]
    pub fn root() -> Self {
        Self("/".to_string())
    }

    /// Parse and canonicalize a user-supplied path.
    ///
    /// Leading/trailing slashes are normalized; empty segments (`a//b`),
    /// NUL bytes, and bare `.`/`..` segments are rejected.
    pub fn parse(input: &str) -> Result<Self> {
        if input.contains('\0') {
            return Err(Error::InvalidPath {
                path: input.escape_debug().to_string(),
                reason: "contains NUL".into(),
            });
        }

        let trimmed = input.trim_matches('/');
        if trimmed.is_empty() {
            if input.is_empty() {
                return Err(Error::InvalidPath {
                    path: String::new(),
                    reason: "empty path".into(),
                });
            }
            return Ok(Self::root());
        }

        let mut canonical = String::with_capacity(input.len() + 1);
        for segment in trimmed.split('/') {
            if segment.is_empty() {
                return Err(Error::InvalidPath {
                    path: input.to_string(),
                    reason: "empty segment".into(),
                });
            }
            if segment == "." || segment == ".." {
                return Err(Error::InvalidPath {
                    path: input.to_string(),
                    reason: format!("relative segment {segment:?}"),
                });
            }
            canonical.push('/');
            canonical.push_str(segment);
        }

        Ok(Self(canonical))
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Path segments, outermost first. Empty for the root.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }

    /// Final name component; `None` for the root.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        if self.is_root() {
            None
        } else {
            self.0.rsplit('/').next()
        }
    }

    /// Parent path; `None` for the root.
    #[must_use]
    pub fn parent(&self) -> Option<RemotePath> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind('/') {
            Some(0) => Some(Self::root()),
            Some(idx) => Some(Self(self.0[..idx].to_string())),
            None => None,
        }
    }

    /// Append one name component.
    pub fn join(&self, name: &str) -> Result<RemotePath> {
        if name.is_empty() || name.contains('/') || name.contains('\0') {
            return Err(Error::InvalidPath {
                path: name.escape_debug().to_string(),
                reason: "invalid name component".into(),
            });
        }
        if self.is_root() {
            Ok(Self(format!("/{name}")))
        } else {
            Ok(Self(format!("{}/{name}", self.0)))
        }
    }

    /// Append a relative slash-separated suffix (already validated
    /// segment by segment).
    pub fn join_relative(&self, relative: &str) -> Result<RemotePath> {
        let mut out = self.clone();
        for segment in relative.split('/').filter(|s| !s.is_empty()) {
            out = out.join(segment)?;
        }
        Ok(out)
    }
}

impl std::fmt::Display for RemotePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for RemotePath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
