//! Credential/session management and the saved-credential file.
//!
//! The [`SessionManager`] owns the active [`Session`] and the store built from
//! it. Operations receive an `Arc` snapshot of the store when submitted, so a
//! credential or bucket change only affects work submitted afterwards.

use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::DEFAULT_PAGE_SIZE;
use crate::error::{StorageError, StorageResult};
use crate::storage::{ObjectStore, S3Store};

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: String,
    #[serde(default)]
    pub session_token: Option<String>,
    /// Custom endpoint for S3-compatible services.
    #[serde(default)]
    pub endpoint_url: Option<String>,
    #[serde(default)]
    pub force_path_style: bool,
}

impl Credentials {
    pub fn new(access_key_id: &str, secret_access_key: &str, region: &str) -> Self {
        Self {
            access_key_id: access_key_id.to_string(),
            secret_access_key: secret_access_key.to_string(),
            region: region.to_string(),
            session_token: None,
            endpoint_url: None,
            force_path_style: false,
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"***")
            .field("region", &self.region)
            .field("session_token", &self.session_token.as_ref().map(|_| "***"))
            .field("endpoint_url", &self.endpoint_url)
            .field("force_path_style", &self.force_path_style)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub credentials: Credentials,
    pub bucket: String,
}

/// Builds the store for a session. Swapped out in tests.
pub trait StoreFactory: Send + Sync {
    fn build(&self, session: &Session) -> StorageResult<Arc<dyn ObjectStore>>;
}

pub struct S3StoreFactory {
    pub page_size: i32,
}

impl Default for S3StoreFactory {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl StoreFactory for S3StoreFactory {
    fn build(&self, session: &Session) -> StorageResult<Arc<dyn ObjectStore>> {
        Ok(Arc::new(S3Store::new(session).with_page_size(self.page_size)))
    }
}

pub struct SessionManager {
    factory: Box<dyn StoreFactory>,
    session: Option<Session>,
    store: Option<Arc<dyn ObjectStore>>,
}

impl SessionManager {
    pub fn new(factory: Box<dyn StoreFactory>) -> Self {
        Self {
            factory,
            session: None,
            store: None,
        }
    }

    /// Replace credentials. The bucket may be chosen later with [`Self::set_bucket`].
    pub fn connect(&mut self, credentials: Credentials, bucket: Option<String>) -> StorageResult<()> {
        if credentials.access_key_id.trim().is_empty() || credentials.secret_access_key.is_empty() {
            return Err(StorageError::AccessDenied(
                "access key and secret key are required".to_string(),
            ));
        }
        let bucket = bucket.unwrap_or_default().trim().to_string();
        info!(
            "session_connect: key={} region={} bucket={}",
            credentials.access_key_id, credentials.region, bucket
        );
        self.rebuild(Session {
            credentials,
            bucket,
        })
    }

    pub fn set_bucket(&mut self, bucket: &str) -> StorageResult<()> {
        let mut session = self.session.clone().ok_or(StorageError::NotConnected)?;
        session.bucket = bucket.trim().to_string();
        info!("session_bucket: {}", session.bucket);
        self.rebuild(session)
    }

    fn rebuild(&mut self, session: Session) -> StorageResult<()> {
        match self.factory.build(&session) {
            Ok(store) => {
                self.store = Some(store);
                self.session = Some(session);
                Ok(())
            }
            Err(e) => {
                warn!("session_rebuild_failed: {}", e);
                Err(e)
            }
        }
    }

    pub fn disconnect(&mut self) {
        self.session = None;
        self.store = None;
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn bucket(&self) -> Option<&str> {
        self.session
            .as_ref()
            .map(|s| s.bucket.as_str())
            .filter(|b| !b.is_empty())
    }

    pub fn is_connected(&self) -> bool {
        self.store.is_some()
    }

    /// Snapshot of the current store for one operation.
    pub fn store(&self) -> StorageResult<Arc<dyn ObjectStore>> {
        self.store.clone().ok_or(StorageError::NotConnected)
    }
}

/// One remembered login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedCredentials {
    pub credentials: Credentials,
    #[serde(default)]
    pub bucket: Option<String>,
}

/// Load/save entry points for remembered credentials, keyed by profile.
pub trait CredentialStore {
    fn load(&self, profile: &str) -> Result<Option<SavedCredentials>, String>;
    fn save(&self, profile: &str, record: &SavedCredentials) -> Result<(), String>;
}

/// Plaintext JSON file holding `profile -> SavedCredentials`.
pub struct CredentialFile {
    path: PathBuf,
}

impl CredentialFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<BTreeMap<String, SavedCredentials>, String> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let raw = std::fs::read_to_string(&self.path)
            .map_err(|e| format!("Failed to read {}: {}", self.path.display(), e))?;
        if raw.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&raw).map_err(|e| format!("Failed to parse {}: {}", self.path.display(), e))
    }
}

impl CredentialStore for CredentialFile {
    fn load(&self, profile: &str) -> Result<Option<SavedCredentials>, String> {
        Ok(self.read_all()?.remove(profile))
    }

    fn save(&self, profile: &str, record: &SavedCredentials) -> Result<(), String> {
        let mut all = self.read_all()?;
        all.insert(profile.to_string(), record.clone());
        let json = serde_json::to_vec_pretty(&all)
            .map_err(|e| format!("Failed to encode credentials: {}", e))?;

        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&parent)
            .map_err(|e| format!("Failed to create directory: {}", e))?;

        // Write to a sibling temp file, then rename over the target.
        let mut tmp = tempfile::NamedTempFile::new_in(&parent)
            .map_err(|e| format!("Failed to create temp file: {}", e))?;
        tmp.write_all(&json)
            .map_err(|e| format!("Failed to write credentials: {}", e))?;
        tmp.persist(&self.path)
            .map_err(|e| format!("Failed to save {}: {}", self.path.display(), e))?;
        info!("credentials_saved: profile={}", profile);
        Ok(())
    }
}
