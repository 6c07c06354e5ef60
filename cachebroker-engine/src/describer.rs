//! Read-only queries against the control plane
//!
//! Every call produces a fresh snapshot; nothing is cached between calls.

use std::sync::Arc;

use cachebroker_models::{InstanceParameters, NodeRole, NodeRoleAssignment};

use crate::control_plane::{ControlPlane, ControlPlaneError, Endpoint, ReplicationGroup};
use crate::error::{Error, Result};
use crate::names::{derive_name, parameter_group_name};

/// Point-in-time read of a replication group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceSnapshot {
    pub replication_group: String,
    /// Raw external status
    pub status: String,
    pub automatic_failover_enabled: bool,
    pub multi_az_enabled: bool,
    /// In member order; nodes without a recognised role are left out
    pub node_roles: Vec<NodeRoleAssignment>,
    pub member_node_ids: Vec<String>,
    pub primary_endpoint: Option<Endpoint>,
    pub tls_enabled: bool,
}

impl ResourceSnapshot {
    fn from_group(group: ReplicationGroup) -> Self {
        let node_roles = group
            .members
            .iter()
            .filter_map(|member| {
                let role = match member.current_role.as_deref() {
                    Some("primary") => NodeRole::Primary,
                    Some("replica") => NodeRole::Replica,
                    other => {
                        tracing::debug!(
                            replication_group = %group.name,
                            node_id = %member.node_id,
                            role = ?other,
                            "Ignoring node without a primary/replica role"
                        );
                        return None;
                    }
                };
                Some(NodeRoleAssignment {
                    node_id: member.node_id.clone(),
                    role,
                })
            })
            .collect();

        Self {
            replication_group: group.name,
            status: group.status,
            automatic_failover_enabled: group.automatic_failover_enabled,
            multi_az_enabled: group.multi_az_enabled,
            node_roles,
            member_node_ids: group.member_clusters,
            primary_endpoint: group.primary_endpoint,
            tls_enabled: group.transit_encryption_enabled,
        }
    }

    pub fn nodes_with_role(&self, role: NodeRole) -> Vec<&str> {
        self.node_roles
            .iter()
            .filter(|assignment| assignment.role == role)
            .map(|assignment| assignment.node_id.as_str())
            .collect()
    }
}

/// Outcome of a describe. Absence is an expected answer, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    Found(ResourceSnapshot),
    NotFound { replication_group: String },
}

#[derive(Clone)]
pub struct Describer {
    control_plane: Arc<dyn ControlPlane>,
}

impl Describer {
    pub fn new(control_plane: Arc<dyn ControlPlane>) -> Self {
        Self { control_plane }
    }

    pub async fn describe(&self, instance_id: &str) -> Result<Observation> {
        let name = derive_name(instance_id);
        match self.control_plane.describe_replication_group(&name).await {
            Ok(group) => Ok(Observation::Found(ResourceSnapshot::from_group(group))),
            Err(ControlPlaneError::NotFound(_)) => Ok(Observation::NotFound {
                replication_group: name,
            }),
            Err(e) => Err(Error::control_plane(instance_id, e)),
        }
    }

    /// Current role assignment; empty when the group does not exist
    pub async fn node_roles(&self, instance_id: &str) -> Result<Vec<NodeRoleAssignment>> {
        match self.describe(instance_id).await? {
            Observation::Found(snapshot) => Ok(snapshot.node_roles),
            Observation::NotFound { .. } => Ok(Vec::new()),
        }
    }

    /// Facts worth surfacing to operators
    ///
    /// Only the replication group read itself can fail the call. Maintenance
    /// window, parameter overrides and tags are dropped from the answer when
    /// they cannot be read.
    pub async fn instance_parameters(&self, instance_id: &str) -> Result<InstanceParameters> {
        let name = derive_name(instance_id);
        let group = self
            .control_plane
            .describe_replication_group(&name)
            .await
            .map_err(|e| Error::control_plane(instance_id, e))?;

        let preferred_maintenance_window = match group.member_clusters.first() {
            Some(node_id) => match self.control_plane.describe_cache_cluster(node_id).await {
                Ok(cluster) => cluster.preferred_maintenance_window,
                Err(e) => {
                    tracing::warn!(
                        instance_id,
                        node_id = %node_id,
                        "Failed to read maintenance window: {}",
                        e
                    );
                    None
                }
            },
            None => None,
        };

        let parameters = match self
            .control_plane
            .describe_parameters(&parameter_group_name(instance_id))
            .await
        {
            Ok(parameters) => Some(parameters),
            Err(e) => {
                tracing::warn!(instance_id, "Failed to read parameter overrides: {}", e);
                None
            }
        };

        let tags = match self.control_plane.list_tags(&name).await {
            Ok(tags) => Some(tags),
            Err(e) => {
                tracing::warn!(instance_id, "Failed to read tags: {}", e);
                None
            }
        };

        let snapshot_window = group.snapshot_window.clone();
        let snapshot = ResourceSnapshot::from_group(group);

        Ok(InstanceParameters {
            replication_group: name,
            preferred_maintenance_window,
            snapshot_window,
            parameters,
            node_roles: Some(snapshot.node_roles),
            tags,
        })
    }
}
