use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;

use crate::secrets::{SecretStore, SecretStoreError};

#[derive(Debug, Clone)]
struct StoredSecret {
    value: String,
    tags: BTreeMap<String, String>,
    deletion_date: Option<DateTime<Utc>>,
}

/// Secret store that keeps everything in process memory
#[derive(Default)]
pub struct InMemorySecretStore {
    secrets: Mutex<BTreeMap<String, StoredSecret>>,
}

impl InMemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn contains(&self, path: &str) -> bool {
        self.secrets.lock().await.contains_key(path)
    }

    pub async fn tags(&self, path: &str) -> Option<BTreeMap<String, String>> {
        self.secrets.lock().await.get(path).map(|s| s.tags.clone())
    }

    pub async fn deletion_date(&self, path: &str) -> Option<DateTime<Utc>> {
        self.secrets.lock().await.get(path).and_then(|s| s.deletion_date)
    }

    async fn purge_before(&self, now: DateTime<Utc>) -> usize {
        let mut secrets = self.secrets.lock().await;
        let before = secrets.len();
        secrets.retain(|_, secret| secret.deletion_date.map_or(true, |date| date > now));
        before - secrets.len()
    }
}

#[async_trait]
impl SecretStore for InMemorySecretStore {
    async fn create_secret(
        &self,
        path: &str,
        value: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<(), SecretStoreError> {
        let mut secrets = self.secrets.lock().await;
        if secrets.contains_key(path) {
            return Err(SecretStoreError::AlreadyExists(path.to_string()));
        }
        secrets.insert(
            path.to_string(),
            StoredSecret {
                value: value.to_string(),
                tags: tags.clone(),
                deletion_date: None,
            },
        );
        Ok(())
    }

    async fn get_secret(&self, path: &str) -> Result<String, SecretStoreError> {
        let secrets = self.secrets.lock().await;
        let secret = secrets
            .get(path)
            .ok_or_else(|| SecretStoreError::NotFound(path.to_string()))?;
        if secret.deletion_date.is_some() {
            return Err(SecretStoreError::MarkedForDeletion(path.to_string()));
        }
        Ok(secret.value.clone())
    }

    async fn delete_secret(
        &self,
        path: &str,
        recovery_window_days: u32,
    ) -> Result<(), SecretStoreError> {
        let mut secrets = self.secrets.lock().await;
        let secret = secrets
            .get_mut(path)
            .ok_or_else(|| SecretStoreError::NotFound(path.to_string()))?;
        if secret.deletion_date.is_none() {
            secret.deletion_date =
                Some(Utc::now() + Duration::days(i64::from(recovery_window_days)));
        }
        Ok(())
    }

    async fn purge_expired(&self) -> Result<usize, SecretStoreError> {
        Ok(self.purge_before(Utc::now()).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_and_get() {
        let store = InMemorySecretStore::new();
        store.create_secret("base/a/auth-token", "s3cret", &BTreeMap::new()).await.unwrap();
        assert_eq!(store.get_secret("base/a/auth-token").await.unwrap(), "s3cret");
    }

    #[tokio::test]
    async fn test_delete_schedules_instead_of_removing() {
        let store = InMemorySecretStore::new();
        store.create_secret("p", "v", &BTreeMap::new()).await.unwrap();

        store.delete_secret("p", 7).await.unwrap();
        assert!(store.contains("p").await);
        assert_eq!(
            store.get_secret("p").await.unwrap_err(),
            SecretStoreError::MarkedForDeletion("p".to_string())
        );

        let date = store.deletion_date("p").await.unwrap();
        let days = (date - Utc::now()).num_days();
        assert!((6..=7).contains(&days), "unexpected window: {} days", days);
    }

    #[tokio::test]
    async fn test_second_delete_keeps_first_date() {
        let store = InMemorySecretStore::new();
        store.create_secret("p", "v", &BTreeMap::new()).await.unwrap();
        store.delete_secret("p", 7).await.unwrap();
        let first = store.deletion_date("p").await;
        store.delete_secret("p", 30).await.unwrap();
        assert_eq!(store.deletion_date("p").await, first);
    }

    #[tokio::test]
    async fn test_purge_only_removes_expired() {
        let store = InMemorySecretStore::new();
        store.create_secret("keep", "v", &BTreeMap::new()).await.unwrap();
        store.create_secret("scheduled", "v", &BTreeMap::new()).await.unwrap();
        store.delete_secret("scheduled", 7).await.unwrap();

        assert_eq!(store.purge_expired().await.unwrap(), 0);
        assert_eq!(store.purge_before(Utc::now() + Duration::days(8)).await, 1);
        assert!(store.contains("keep").await);
        assert!(!store.contains("scheduled").await);
    }
}
