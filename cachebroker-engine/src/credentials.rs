//! Auth token lifecycle
//!
//! One token per instance, shared by every binding of that instance.

use std::collections::BTreeMap;
use std::sync::Arc;

use rand::Rng;

use crate::error::{Error, Result};
use crate::names::auth_token_path;
use crate::secrets::{SecretStore, SecretStoreError};

pub const TOKEN_LENGTH: usize = 32;

/// Generate a random alphanumeric auth token
pub fn generate_token() -> String {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::rng();
    (0..TOKEN_LENGTH)
        .map(|_| CHARSET[rng.random_range(0..CHARSET.len())] as char)
        .collect()
}

#[derive(Clone)]
pub struct CredentialLifecycle {
    store: Arc<dyn SecretStore>,
    base_path: String,
}

impl CredentialLifecycle {
    pub fn new(store: Arc<dyn SecretStore>, base_path: impl Into<String>) -> Self {
        Self {
            store,
            base_path: base_path.into(),
        }
    }

    pub fn secret_path(&self, instance_id: &str) -> String {
        auth_token_path(&self.base_path, instance_id)
    }

    /// Create and store the instance's token. If a token was already stored
    /// by an earlier attempt, that token is returned instead.
    pub async fn issue(
        &self,
        instance_id: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<String> {
        let path = self.secret_path(instance_id);
        let mut tags = tags.clone();
        tags.insert("instance-id".to_string(), instance_id.to_string());

        let token = generate_token();
        match self.store.create_secret(&path, &token, &tags).await {
            Ok(()) => {
                tracing::info!(instance_id, path = %path, "Stored auth token");
                Ok(token)
            }
            Err(SecretStoreError::AlreadyExists(_)) => {
                tracing::info!(instance_id, path = %path, "Auth token already stored, reusing it");
                self.retrieve(instance_id).await
            }
            Err(e) => Err(Error::secret_store(instance_id, e)),
        }
    }

    pub async fn retrieve(&self, instance_id: &str) -> Result<String> {
        let path = self.secret_path(instance_id);
        self.store
            .get_secret(&path)
            .await
            .map_err(|e| Error::secret_store(instance_id, e))
    }

    /// Schedule the token for deletion after the recovery window.
    /// A token that is already gone counts as revoked.
    pub async fn revoke(&self, instance_id: &str, recovery_window_days: u32) -> Result<()> {
        let path = self.secret_path(instance_id);
        match self.store.delete_secret(&path, recovery_window_days).await {
            Ok(()) => {
                tracing::info!(
                    instance_id,
                    path = %path,
                    recovery_window_days,
                    "Scheduled auth token deletion"
                );
                Ok(())
            }
            Err(SecretStoreError::NotFound(_)) => {
                tracing::info!(instance_id, path = %path, "No auth token to revoke");
                Ok(())
            }
            Err(e) => Err(Error::secret_store(instance_id, e)),
        }
    }

    /// Unbinding one application never touches the shared token
    pub async fn revoke_binding(&self, instance_id: &str, binding_id: &str) -> Result<()> {
        tracing::debug!(instance_id, binding_id, "Binding revoked, shared auth token kept");
        Ok(())
    }
}
