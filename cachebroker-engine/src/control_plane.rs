//! Contract of the external cache control plane
//!
//! Implementations translate their provider's error taxonomy into
//! [`ControlPlaneError`] at the call site, so nothing past this trait ever
//! inspects provider-specific error shapes.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControlPlaneError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("control plane API error: {0}")]
    Api(String),
}

// ============================================================================
// Resources as reported by the control plane
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Endpoint {
    pub address: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemberNode {
    pub node_id: String,
    /// Raw role string ("primary", "replica"); absent while a node is being added
    pub current_role: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReplicationGroup {
    pub name: String,
    /// Raw status, in the control plane's own vocabulary
    pub status: String,
    pub automatic_failover_enabled: bool,
    pub multi_az_enabled: bool,
    pub member_clusters: Vec<String>,
    pub members: Vec<MemberNode>,
    pub primary_endpoint: Option<Endpoint>,
    pub snapshot_window: Option<String>,
    pub transit_encryption_enabled: bool,
}

/// A single member node of a replication group
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheCluster {
    pub node_id: String,
    pub preferred_maintenance_window: Option<String>,
}

// ============================================================================
// Mutations
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateReplicationGroup {
    pub name: String,
    pub description: String,
    pub node_type: String,
    pub engine_version: String,
    pub replicas_per_node_group: u32,
    pub automatic_failover_enabled: bool,
    pub multi_az_enabled: bool,
    pub parameter_group_name: String,
    pub auth_token: String,
    pub transit_encryption_enabled: bool,
    pub snapshot_retention_limit: u32,
    pub preferred_maintenance_window: Option<String>,
    pub snapshot_window: Option<String>,
    pub snapshot_name: Option<String>,
    pub tags: BTreeMap<String, String>,
}

/// Only the fields that are `Some` are changed
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModifyReplicationGroup {
    pub name: String,
    pub automatic_failover_enabled: Option<bool>,
    pub multi_az_enabled: Option<bool>,
    pub primary_cluster_id: Option<String>,
    pub apply_immediately: bool,
}

#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn create_replication_group(
        &self,
        request: CreateReplicationGroup,
    ) -> Result<(), ControlPlaneError>;

    async fn modify_replication_group(
        &self,
        request: ModifyReplicationGroup,
    ) -> Result<(), ControlPlaneError>;

    async fn delete_replication_group(
        &self,
        name: &str,
        final_snapshot_name: Option<&str>,
    ) -> Result<(), ControlPlaneError>;

    async fn describe_replication_group(
        &self,
        name: &str,
    ) -> Result<ReplicationGroup, ControlPlaneError>;

    async fn describe_cache_cluster(&self, node_id: &str)
        -> Result<CacheCluster, ControlPlaneError>;

    async fn create_parameter_group(
        &self,
        name: &str,
        family: &str,
        description: &str,
    ) -> Result<(), ControlPlaneError>;

    async fn modify_parameter_group(
        &self,
        name: &str,
        parameters: &BTreeMap<String, String>,
    ) -> Result<(), ControlPlaneError>;

    async fn delete_parameter_group(&self, name: &str) -> Result<(), ControlPlaneError>;

    /// Parameters that differ from the family defaults
    async fn describe_parameters(
        &self,
        name: &str,
    ) -> Result<BTreeMap<String, String>, ControlPlaneError>;

    async fn list_tags(&self, name: &str) -> Result<BTreeMap<String, String>, ControlPlaneError>;
}
