//! Credential storage and management
//!
//! Holds the credentials a client presents and the in-memory account store
//! that ships with the server.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::directory::{ANONYMOUS, UserDirectory, UserRecord};
use crate::error::DirectoryError;

/// Credentials presented by a client for one login attempt.
///
/// Consumed by `ConnectionService::login`; the password is dropped as soon
/// as the directory has checked it.
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<String>,
    pub anonymous: bool,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        let username = username.into();
        let anonymous = is_anonymous_name(&username);
        Self {
            username: Some(username),
            password: Some(password.into()),
            anonymous,
        }
    }
}

/// Names treated as anonymous logins
pub fn is_anonymous_name(name: &str) -> bool {
    name.eq_ignore_ascii_case(ANONYMOUS) || name.eq_ignore_ascii_case("ftp")
}

/// Account store kept in process memory. `reload` has nothing to refresh.
#[derive(Default)]
pub struct InMemoryUserDirectory {
    users: RwLock<HashMap<String, UserRecord>>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_users(records: impl IntoIterator<Item = UserRecord>) -> Self {
        let users = records
            .into_iter()
            .map(|record| (record.name.clone(), record))
            .collect();
        Self {
            users: RwLock::new(users),
        }
    }

    pub async fn len(&self) -> usize {
        self.users.read().await.len()
    }

    pub async fn remove(&self, name: &str) -> Option<UserRecord> {
        self.users.write().await.remove(name)
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn authenticate(&self, name: &str, password: &str) -> Result<bool, DirectoryError> {
        let users = self.users.read().await;
        Ok(matches!(users.get(name), Some(record) if record.password == password))
    }

    async fn does_exist(&self, name: &str) -> Result<bool, DirectoryError> {
        Ok(self.users.read().await.contains_key(name))
    }

    async fn get_user_by_name(&self, name: &str) -> Result<Option<UserRecord>, DirectoryError> {
        Ok(self.users.read().await.get(name).cloned())
    }

    async fn save(&self, record: UserRecord) -> Result<(), DirectoryError> {
        if record.name.trim().is_empty() {
            return Err(DirectoryError::InvalidRecord("empty user name".into()));
        }
        self.users.write().await.insert(record.name.clone(), record);
        Ok(())
    }

    async fn reload(&self) -> Result<(), DirectoryError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn authenticates_only_matching_password() {
        let directory =
            InMemoryUserDirectory::with_users([UserRecord::new("alice", "alice123", "/tmp")]);

        assert!(directory.authenticate("alice", "alice123").await.unwrap());
        assert!(!directory.authenticate("alice", "wrong").await.unwrap());
        assert!(!directory.authenticate("bob", "alice123").await.unwrap());
    }

    #[tokio::test]
    async fn save_replaces_existing_record() {
        let directory = InMemoryUserDirectory::new();
        directory.save(UserRecord::new("bob", "one", "/a")).await.unwrap();
        directory.save(UserRecord::new("bob", "two", "/b")).await.unwrap();

        assert_eq!(directory.len().await, 1);
        let record = directory.get_user_by_name("bob").await.unwrap().unwrap();
        assert_eq!(record.password, "two");
    }

    #[tokio::test]
    async fn rejects_nameless_record() {
        let directory = InMemoryUserDirectory::new();
        assert!(directory.save(UserRecord::new(" ", "x", "/")).await.is_err());
    }

    #[test]
    fn anonymous_names_are_case_insensitive() {
        assert!(Credentials::new("Anonymous", "guest@").anonymous);
        assert!(Credentials::new("FTP", "").anonymous);
        assert!(!Credentials::new("alice", "pw").anonymous);
    }
}
