//! Core of an S3 bucket browser: listing, tree building, previews, and a
//! background worker for downloads and deletes.
//!
//! The front end owns a [`browser::Browser`], feeds it user commands and
//! renders whatever [`browser::BrowserUpdate`]s it drains.

pub mod browser;
pub mod config;
pub mod error;
pub mod format;
pub mod preview;
pub mod session;
pub mod storage;
pub mod tree;
pub mod worker;

pub use browser::{Browser, BrowserState, BrowserUpdate};
pub use config::{AppConfig, WorkerConfig};
pub use error::{StorageError, StorageResult};
pub use session::{CredentialFile, CredentialStore, Credentials, SessionManager};
