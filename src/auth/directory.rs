//! User directory boundary
//!
//! The control core never persists accounts. It reads and provisions them
//! through a `UserDirectory`, which owns the backing store.

use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;

use crate::error::DirectoryError;

/// Name reserved for anonymous logins
pub const ANONYMOUS: &str = "anonymous";

/// An account as stored by the user directory
#[derive(Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub name: String,
    pub password: String,
    pub enabled: bool,
    pub write_permission: bool,
    pub root_directory: PathBuf,
    /// Seconds of inactivity before the session is swept, 0 for never
    pub max_idle_secs: u64,
    /// Bytes per second, 0 for unlimited
    pub max_upload_rate: u32,
    pub max_download_rate: u32,
}

impl UserRecord {
    /// An enabled, read-only account with no rate limits
    pub fn new(name: impl Into<String>, password: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            password: password.into(),
            enabled: true,
            write_permission: false,
            root_directory: root.into(),
            max_idle_secs: 0,
            max_upload_rate: 0,
            max_download_rate: 0,
        }
    }
}

impl fmt::Debug for UserRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserRecord")
            .field("name", &self.name)
            .field("enabled", &self.enabled)
            .field("write_permission", &self.write_permission)
            .field("root_directory", &self.root_directory)
            .field("max_idle_secs", &self.max_idle_secs)
            .field("max_upload_rate", &self.max_upload_rate)
            .field("max_download_rate", &self.max_download_rate)
            .finish_non_exhaustive()
    }
}

/// Externally owned account storage
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Check a name/password pair
    async fn authenticate(&self, name: &str, password: &str) -> Result<bool, DirectoryError>;

    async fn does_exist(&self, name: &str) -> Result<bool, DirectoryError>;

    async fn get_user_by_name(&self, name: &str) -> Result<Option<UserRecord>, DirectoryError>;

    /// Insert or replace an account
    async fn save(&self, record: UserRecord) -> Result<(), DirectoryError>;

    /// Refresh from the backing store. Called on every idle sweep.
    async fn reload(&self) -> Result<(), DirectoryError>;
}
