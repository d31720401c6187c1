//! Credentials, the on-disk state directory, and the process-wide
//! [`Context`] threaded through every operation.
//!
//! The state directory defaults to `<home>/.filen-cli/` and holds
//! `credentials.json` (owner-only) plus `batch_states/` with the resume
//! journals. All writes go through write-to-temp-then-rename.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::api::{Backend, HttpBackend, UserInfo};
use crate::crypto::{derive_keys, MasterKey};
use crate::error::{Error, Result};
use crate::fs::node::{Node, NodeId, NodeKind};
use crate::fs::path::RemotePath;
use crate::fs::resolver::Resolver;
use crate::transfer::JournalStore;

pub const DEFAULT_BASE_URL: &str = "https://gateway.filen.io";
/// Environment override for the state directory.
pub const STATE_DIR_ENV: &str = "FILEN_CLI_DIR";

const CREDENTIALS_FILE: &str = "credentials.json";
const BATCH_STATES_DIR: &str = "batch_states";

/// Stored account credentials.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub email: String,
    pub master_key_hex: String,
    pub auth_token: String,
    pub api_key: String,
    pub base_url: String,
}

impl Credentials {
    pub fn master_key(&self) -> Result<MasterKey> {
        MasterKey::from_hex(&self.master_key_hex)
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("base_url", &self.base_url)
            .field("master_key_hex", &"[REDACTED]")
            .field("auth_token", &"[REDACTED]")
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

/// Location of on-disk state.
#[derive(Debug, Clone)]
pub struct Config {
    pub state_dir: PathBuf,
}

impl Config {
    /// Resolve the state directory: explicit flag, then the environment
    /// override, then `<home>/.filen-cli/`.
    pub fn resolve(explicit: Option<PathBuf>) -> Result<Self> {
        let state_dir = match explicit {
            Some(dir) => dir,
            None => match std::env::var_os(STATE_DIR_ENV) {
                Some(dir) => PathBuf::from(dir),
                None => directories::BaseDirs::new()
                    .ok_or_else(|| Error::Fatal("cannot determine home directory".into()))?
                    .home_dir()
                    .join(".filen-cli"),
            },
        };
        Ok(Self { state_dir })
    }

    #[must_use]
    pub fn credentials_path(&self) -> PathBuf {
        self.state_dir.join(CREDENTIALS_FILE)
    }

    #[must_use]
    pub fn batch_states_dir(&self) -> PathBuf {
        self.state_dir.join(BATCH_STATES_DIR)
    }

    pub fn load_credentials(&self) -> Result<Credentials> {
        let path = self.credentials_path();
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::Auth("not logged in (run `filen login`)".into()));
            }
            Err(e) => return Err(Error::io(e, &path)),
        };
        serde_json::from_str(&raw)
            .map_err(|e| Error::Fatal(format!("corrupt credentials file {}: {e}", path.display())))
    }

    /// Persist credentials owner-only, via temp-then-rename.
    pub fn store_credentials(&self, credentials: &Credentials) -> Result<()> {
        fs::create_dir_all(&self.state_dir).map_err(|e| Error::io(e, &self.state_dir))?;
        let path = self.credentials_path();
        let tmp = path.with_extension("json.tmp");

        let raw = serde_json::to_vec_pretty(credentials)
            .map_err(|e| Error::Fatal(format!("credentials serialization: {e}")))?;
        fs::write(&tmp, raw).map_err(|e| Error::io(e, &tmp))?;
        restrict_permissions(&tmp)?;
        fs::rename(&tmp, &path).map_err(|e| Error::io(e, &path))?;
        debug!(path = %path.display(), "credentials stored");
        Ok(())
    }

    /// Remove stored credentials. Returns false when none existed.
    pub fn delete_credentials(&self) -> Result<bool> {
        let path = self.credentials_path();
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::io(e, &path)),
        }
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| Error::io(e, path))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

/// Derive keys and exchange them for an API key. The password never
/// reaches the backend; only the derived auth token does.
#[instrument(level = "info", skip(password))]
pub async fn login(base_url: &str, email: &str, password: &str) -> Result<Credentials> {
    let backend = HttpBackend::new(base_url)?;
    let auth = backend.auth_info(email).await?;
    let derived = derive_keys(password, &auth.salt);
    let session = backend.login(email, &derived.auth_token).await?;
    info!(email, "login succeeded");
    Ok(Credentials {
        email: email.to_string(),
        master_key_hex: derived.master_key.to_hex(),
        auth_token: derived.auth_token,
        api_key: session.api_key,
        base_url: base_url.to_string(),
    })
}

/// Explicit global state: credential handle, HTTP pool, resolver cache,
/// and the journal store. Dropping the context releases the pool; the
/// journal store persists on every transition, so there is nothing to
/// flush beyond what is already on disk.
pub struct Context {
    config: Config,
    credentials: Credentials,
    backend: Arc<dyn Backend>,
    resolver: Resolver,
    journals: JournalStore,
}

impl Context {
    /// Open the context from stored credentials.
    pub fn open(config: Config) -> Result<Self> {
        let credentials = config.load_credentials()?;
        let backend: Arc<dyn Backend> = Arc::new(
            HttpBackend::new(&credentials.base_url)?.with_api_key(&credentials.api_key),
        );
        Self::with_backend(config, credentials, backend)
    }

    /// Open over an explicit backend (tests use an in-memory one).
    pub fn with_backend(
        config: Config,
        credentials: Credentials,
        backend: Arc<dyn Backend>,
    ) -> Result<Self> {
        let master_key = credentials.master_key()?;
        let resolver = Resolver::new(
            Arc::clone(&backend),
            master_key,
            credentials.email.clone(),
        );
        let journals = JournalStore::open(config.batch_states_dir())?;
        Ok(Self {
            config,
            credentials,
            backend,
            resolver,
            journals,
        })
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    #[must_use]
    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    #[must_use]
    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    /// Split borrows for the batch runner: the resolver plus the single
    /// journal writer.
    pub fn batch_parts(&mut self) -> (&Resolver, &mut JournalStore) {
        (&self.resolver, &mut self.journals)
    }

    pub async fn user_info(&self) -> Result<UserInfo> {
        self.backend.user_info().await
    }

    /// Create a folder path, including missing parents.
    pub async fn mkdir(&self, path: &RemotePath) -> Result<Node> {
        self.resolver.ensure_folder(path).await
    }

    /// Move a node into another folder. Invalidate both parents.
    pub async fn move_node(&self, source: &RemotePath, dest_folder: &RemotePath) -> Result<Node> {
        let node = self.resolver.resolve(source).await?.node;
        let dest = self.resolver.resolve(dest_folder).await?.node;
        if !dest.is_folder() {
            return Err(Error::Conflict(format!("{dest_folder} is not a folder")));
        }
        self.backend.move_node(node.id, dest.id).await?;
        if let Some(parent) = node.parent {
            self.resolver.invalidate(parent);
        }
        self.resolver.invalidate(dest.id);
        Ok(node)
    }

    /// Rename a node in place, re-sealing its metadata envelope.
    pub async fn rename(&self, path: &RemotePath, new_name: &str) -> Result<Node> {
        if new_name.is_empty() || new_name.contains('/') || new_name.contains('\0') {
            return Err(Error::InvalidPath {
                path: new_name.escape_debug().to_string(),
                reason: "invalid name component".into(),
            });
        }
        let node = self.resolver.resolve(path).await?.node;
        let (metadata, name_hashed) = match node.kind {
            NodeKind::Folder => self.resolver.seal_folder_name(new_name)?,
            NodeKind::File => self.resolver.seal_file_rename(&node, new_name)?,
        };
        self.backend
            .rename_node(node.id, &metadata, &name_hashed)
            .await?;
        if let Some(parent) = node.parent {
            self.resolver.invalidate(parent);
        }
        Ok(node)
    }

    /// Move a node to the trash.
    pub async fn trash(&self, path: &RemotePath) -> Result<Node> {
        let node = self.resolver.resolve(path).await?.node;
        self.backend.trash_node(node.id).await?;
        if let Some(parent) = node.parent {
            self.resolver.invalidate(parent);
        }
        Ok(node)
    }

    /// Decrypted trash listing.
    pub async fn list_trash(&self) -> Result<Vec<Node>> {
        let listing = self.backend.list_trash().await?;
        let mut nodes = Vec::with_capacity(listing.folders.len() + listing.files.len());
        for wire in &listing.folders {
            if let Ok(node) = self.resolver.decode_folder(wire) {
                nodes.push(node);
            }
        }
        for wire in &listing.files {
            if let Ok(node) = self.resolver.decode_file(wire) {
                nodes.push(node);
            }
        }
        Ok(nodes)
    }

    /// Restore a trashed node by identifier.
    pub async fn restore_by_uuid(&self, id: NodeId) -> Result<()> {
        // Learn the destination parent before restoring so its listing
        // can be invalidated afterwards.
        let trash = self.backend.list_trash().await?;
        let parent = trash
            .folders
            .iter()
            .find(|f| f.uuid == id)
            .and_then(|f| f.parent)
            .or_else(|| {
                trash
                    .files
                    .iter()
                    .find(|f| f.uuid == id)
                    .and_then(|f| f.parent)
            });
        self.backend.restore_node(id).await?;
        if let Some(parent) = parent {
            self.resolver.invalidate(parent);
        }
        Ok(())
    }

    /// Restore a trashed node by its former name, refusing ambiguous
    /// matches.
    pub async fn restore_by_name(&self, name: &str) -> Result<Node> {
        let trash = self.list_trash().await?;
        let mut candidates: Vec<&Node> = trash.iter().filter(|n| n.name == name).collect();
        match candidates.len() {
            0 => Err(Error::NotFound(format!("{name:?} is not in the trash"))),
            1 => {
                let node = candidates.remove(0).clone();
                self.backend.restore_node(node.id).await?;
                if let Some(parent) = node.parent {
                    self.resolver.invalidate(parent);
                }
                Ok(node)
            }
            n => Err(Error::Ambiguous {
                name: name.to_string(),
                parent: "trash".to_string(),
                candidates: n,
            }),
        }
    }

    /// Permanently delete the node at a path. Strict resolution: refuses
    /// ambiguous names, since this is unrecoverable.
    pub async fn delete_path(&self, path: &RemotePath) -> Result<Node> {
        let node = self.resolver.resolve_strict(path).await?;
        self.backend.delete_node(node.id).await?;
        if let Some(parent) = node.parent {
            self.resolver.invalidate(parent);
        }
        Ok(node)
    }
}
