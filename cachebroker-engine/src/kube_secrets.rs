//! Secret store backed by Kubernetes Secrets
//!
//! Each auth token is one `Secret` in a fixed namespace. Scheduled deletion
//! is an annotation holding the purge date; [`SecretStore::purge_expired`]
//! removes the Secrets whose date has passed.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::Client;
use xxhash_rust::xxh3::xxh3_64;

use crate::names::AUTH_TOKEN_SECRET;
use crate::secrets::{SecretStore, SecretStoreError};

const PATH_ANNOTATION: &str = "cachebroker.io/secret-path";
const DELETION_ANNOTATION: &str = "cachebroker.io/deletion-date";
const TAG_ANNOTATION_PREFIX: &str = "tags.cachebroker.io/";
const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
const MANAGED_BY: &str = "cachebroker";

pub struct KubeSecretStore {
    client: Client,
    namespace: String,
}

impl KubeSecretStore {
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    /// Connect using the in-cluster or kubeconfig defaults
    pub async fn try_default(namespace: impl Into<String>) -> Result<Self, SecretStoreError> {
        let client = Client::try_default()
            .await
            .map_err(|e| {
                SecretStoreError::Backend(format!("Failed to create Kubernetes client: {}", e))
            })?;
        Ok(Self::new(client, namespace))
    }

    fn api(&self) -> Api<Secret> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }
}

/// Secret paths contain `/`, which object names may not. Hash the path into
/// a valid name and keep the path itself in an annotation.
pub fn secret_name(path: &str) -> String {
    format!("{}-{:016x}", AUTH_TOKEN_SECRET, xxh3_64(path.as_bytes()))
}

/// Annotation name segments allow at most 63 alphanumerics, `-`, `_` and `.`,
/// starting and ending alphanumeric.
fn is_annotation_name(key: &str) -> bool {
    let bytes = key.as_bytes();
    match (bytes.first(), bytes.last()) {
        (Some(first), Some(last)) => {
            bytes.len() <= 63
                && first.is_ascii_alphanumeric()
                && last.is_ascii_alphanumeric()
                && bytes
                    .iter()
                    .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
        }
        _ => false,
    }
}

/// Tags with keys Kubernetes would reject are stored under a hashed name
/// with the original `key=value` as the annotation value.
fn tag_annotation(key: &str, value: &str) -> (String, String) {
    if is_annotation_name(key) {
        (format!("{}{}", TAG_ANNOTATION_PREFIX, key), value.to_string())
    } else {
        (
            format!("{}tag-{:016x}", TAG_ANNOTATION_PREFIX, xxh3_64(key.as_bytes())),
            format!("{}={}", key, value),
        )
    }
}

fn deletion_date(secret: &Secret) -> Option<DateTime<Utc>> {
    secret
        .metadata
        .annotations
        .as_ref()?
        .get(DELETION_ANNOTATION)
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|date| date.with_timezone(&Utc))
}

fn is_expired(secret: &Secret, now: DateTime<Utc>) -> bool {
    deletion_date(secret).map_or(false, |date| date <= now)
}

fn translate(path: &str, err: kube::Error) -> SecretStoreError {
    match err {
        kube::Error::Api(response) if response.code == 404 => {
            SecretStoreError::NotFound(path.to_string())
        }
        kube::Error::Api(response) if response.code == 409 => {
            SecretStoreError::AlreadyExists(path.to_string())
        }
        e => SecretStoreError::Backend(format!("{}: {}", path, e)),
    }
}

fn build_secret(path: &str, value: &str, tags: &BTreeMap<String, String>) -> Secret {
    let mut annotations: BTreeMap<String, String> = tags
        .iter()
        .map(|(key, value)| tag_annotation(key, value))
        .collect();
    annotations.insert(PATH_ANNOTATION.to_string(), path.to_string());

    let mut labels = BTreeMap::new();
    labels.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string());

    let mut data = BTreeMap::new();
    data.insert(
        AUTH_TOKEN_SECRET.to_string(),
        ByteString(value.as_bytes().to_vec()),
    );

    Secret {
        metadata: ObjectMeta {
            name: Some(secret_name(path)),
            labels: Some(labels),
            annotations: Some(annotations),
            ..Default::default()
        },
        data: Some(data),
        type_: Some("Opaque".to_string()),
        ..Default::default()
    }
}

#[async_trait]
impl SecretStore for KubeSecretStore {
    async fn create_secret(
        &self,
        path: &str,
        value: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<(), SecretStoreError> {
        let secret = build_secret(path, value, tags);
        self.api()
            .create(&PostParams::default(), &secret)
            .await
            .map_err(|e| translate(path, e))?;
        tracing::debug!(namespace = %self.namespace, path = %path, "Created Secret");
        Ok(())
    }

    async fn get_secret(&self, path: &str) -> Result<String, SecretStoreError> {
        let secret = self
            .api()
            .get(&secret_name(path))
            .await
            .map_err(|e| translate(path, e))?;

        if deletion_date(&secret).is_some() {
            return Err(SecretStoreError::MarkedForDeletion(path.to_string()));
        }

        let bytes = secret
            .data
            .as_ref()
            .and_then(|data| data.get(AUTH_TOKEN_SECRET))
            .ok_or_else(|| {
                SecretStoreError::Backend(format!(
                    "{}: Secret has no {} key",
                    path, AUTH_TOKEN_SECRET
                ))
            })?;
        String::from_utf8(bytes.0.clone())
            .map_err(|e| SecretStoreError::Backend(format!("{}: {}", path, e)))
    }

    async fn delete_secret(
        &self,
        path: &str,
        recovery_window_days: u32,
    ) -> Result<(), SecretStoreError> {
        let api = self.api();
        let name = secret_name(path);
        let secret = api.get(&name).await.map_err(|e| translate(path, e))?;
        if deletion_date(&secret).is_some() {
            return Ok(());
        }

        let date = Utc::now() + Duration::days(i64::from(recovery_window_days));
        let patch = serde_json::json!({
            "metadata": {
                "annotations": {
                    DELETION_ANNOTATION: date.to_rfc3339(),
                }
            }
        });
        api.patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| translate(path, e))?;
        tracing::debug!(
            namespace = %self.namespace,
            path = %path,
            deletion_date = %date,
            "Scheduled Secret deletion"
        );
        Ok(())
    }

    async fn purge_expired(&self) -> Result<usize, SecretStoreError> {
        let api = self.api();
        let selector = format!("{}={}", MANAGED_BY_LABEL, MANAGED_BY);
        let secrets = api
            .list(&ListParams::default().labels(&selector))
            .await
            .map_err(|e| SecretStoreError::Backend(format!("Failed to list Secrets: {}", e)))?;

        let now = Utc::now();
        let mut purged = 0;
        for secret in secrets.items.iter().filter(|s| is_expired(s, now)) {
            let Some(name) = secret.metadata.name.as_deref() else {
                continue;
            };
            match api.delete(name, &DeleteParams::default()).await {
                Ok(_) => {
                    tracing::info!(
                        namespace = %self.namespace,
                        secret = %name,
                        "Purged expired Secret"
                    );
                    purged += 1;
                }
                Err(kube::Error::Api(response)) if response.code == 404 => {}
                Err(e) => return Err(translate(name, e)),
            }
        }
        Ok(purged)
    }
}
