//! Contract of the secret store holding instance auth tokens

use std::collections::BTreeMap;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SecretStoreError {
    #[error("secret not found: {0}")]
    NotFound(String),

    #[error("secret already exists: {0}")]
    AlreadyExists(String),

    #[error("secret is scheduled for deletion: {0}")]
    MarkedForDeletion(String),

    #[error("secret store error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn create_secret(
        &self,
        path: &str,
        value: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<(), SecretStoreError>;

    /// Fails with [`SecretStoreError::MarkedForDeletion`] once deletion is scheduled
    async fn get_secret(&self, path: &str) -> Result<String, SecretStoreError>;

    /// Schedule deletion after `recovery_window_days`. Scheduling twice is a no-op.
    async fn delete_secret(
        &self,
        path: &str,
        recovery_window_days: u32,
    ) -> Result<(), SecretStoreError>;

    /// Permanently remove secrets whose recovery window has passed,
    /// returning how many were removed. Stores that expire secrets on their
    /// own keep the default.
    async fn purge_expired(&self) -> Result<usize, SecretStoreError> {
        Ok(0)
    }
}
