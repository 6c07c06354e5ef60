//! Failover test choreography
//!
//! A failover test runs as: disable automatic failover and Multi-AZ (started
//! by the caller), promote the replica, re-enable automatic failover and
//! Multi-AZ. The engine keeps no record of where it is in that sequence.
//! Each poll infers the phase from the current snapshot and the caller's
//! previous-primary hint, and names the single mutation that moves it on.
//! A mutation that has not yet shown up in the snapshot is simply planned
//! again on the next poll.

use std::fmt;

use cachebroker_models::{NodeRole, ServiceState};

use crate::control_plane::ModifyReplicationGroup;
use crate::describer::ResourceSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailoverPhase {
    /// Group is not available; the normalizer decides what to report
    NotApplicable,
    /// Automatic failover is off and the previous primary still holds the role
    PreCutover,
    /// Automatic failover is off and a different node is primary
    PostCutover,
    /// Automatic failover is back on
    Converged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailoverMutation {
    PromoteReplica { node_id: String },
    EnableAutomaticFailover,
    DisableAutomaticFailover,
}

impl FailoverMutation {
    pub fn into_request(self, replication_group: &str) -> ModifyReplicationGroup {
        let base = ModifyReplicationGroup {
            name: replication_group.to_string(),
            apply_immediately: true,
            ..Default::default()
        };
        match self {
            FailoverMutation::PromoteReplica { node_id } => ModifyReplicationGroup {
                primary_cluster_id: Some(node_id),
                ..base
            },
            FailoverMutation::EnableAutomaticFailover => ModifyReplicationGroup {
                automatic_failover_enabled: Some(true),
                multi_az_enabled: Some(true),
                ..base
            },
            FailoverMutation::DisableAutomaticFailover => ModifyReplicationGroup {
                automatic_failover_enabled: Some(false),
                multi_az_enabled: Some(false),
                ..base
            },
        }
    }
}

impl fmt::Display for FailoverMutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailoverMutation::PromoteReplica { node_id } => {
                write!(f, "promote {} to primary", node_id)
            }
            FailoverMutation::EnableAutomaticFailover => {
                write!(f, "enable automatic failover and Multi-AZ")
            }
            FailoverMutation::DisableAutomaticFailover => {
                write!(f, "disable automatic failover and Multi-AZ")
            }
        }
    }
}

/// The single primary and the single replica of a group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub primary: String,
    pub replica: String,
}

/// Not exactly one primary and one replica
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AmbiguousTopology {
    pub primaries: usize,
    pub replicas: usize,
}

pub fn topology(snapshot: &ResourceSnapshot) -> Result<Topology, AmbiguousTopology> {
    let primaries = snapshot.nodes_with_role(NodeRole::Primary);
    let replicas = snapshot.nodes_with_role(NodeRole::Replica);
    match (primaries.as_slice(), replicas.as_slice()) {
        ([primary], [replica]) => Ok(Topology {
            primary: primary.to_string(),
            replica: replica.to_string(),
        }),
        _ => Err(AmbiguousTopology {
            primaries: primaries.len(),
            replicas: replicas.len(),
        }),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailoverStep {
    pub phase: FailoverPhase,
    pub mutation: Option<FailoverMutation>,
    /// `None` when the phase does not decide the reported state
    pub report: Option<ServiceState>,
}

/// Decide the next failover step from a snapshot and the previous-primary hint
pub fn plan(
    snapshot: &ResourceSnapshot,
    previous_primary: Option<&str>,
) -> Result<FailoverStep, AmbiguousTopology> {
    if snapshot.status != ServiceState::Available.as_str() {
        return Ok(FailoverStep {
            phase: FailoverPhase::NotApplicable,
            mutation: None,
            report: None,
        });
    }

    if snapshot.automatic_failover_enabled {
        return Ok(FailoverStep {
            phase: FailoverPhase::Converged,
            mutation: None,
            report: Some(ServiceState::Available),
        });
    }

    let topology = topology(snapshot)?;
    let cut_over = previous_primary.map_or(false, |hint| hint != topology.primary);

    let step = if cut_over {
        FailoverStep {
            phase: FailoverPhase::PostCutover,
            mutation: Some(FailoverMutation::EnableAutomaticFailover),
            report: Some(ServiceState::Modifying),
        }
    } else {
        FailoverStep {
            phase: FailoverPhase::PreCutover,
            mutation: Some(FailoverMutation::PromoteReplica {
                node_id: topology.replica,
            }),
            report: Some(ServiceState::Modifying),
        }
    };
    Ok(step)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cachebroker_models::NodeRoleAssignment;

    fn snapshot(
        status: &str,
        automatic_failover: bool,
        roles: &[(&str, NodeRole)],
    ) -> ResourceSnapshot {
        ResourceSnapshot {
            replication_group: "cf-test".to_string(),
            status: status.to_string(),
            automatic_failover_enabled: automatic_failover,
            multi_az_enabled: automatic_failover,
            node_roles: roles
                .iter()
                .map(|(id, role)| NodeRoleAssignment {
                    node_id: id.to_string(),
                    role: *role,
                })
                .collect(),
            member_node_ids: roles.iter().map(|(id, _)| id.to_string()).collect(),
            primary_endpoint: None,
            tls_enabled: true,
        }
    }

    const A_PRIMARY: &[(&str, NodeRole)] = &[("a", NodeRole::Primary), ("b", NodeRole::Replica)];
    const B_PRIMARY: &[(&str, NodeRole)] = &[("a", NodeRole::Replica), ("b", NodeRole::Primary)];

    #[test]
    fn test_not_available_is_not_applicable() {
        let step = plan(&snapshot("modifying", false, A_PRIMARY), Some("a")).unwrap();
        assert_eq!(step.phase, FailoverPhase::NotApplicable);
        assert_eq!(step.mutation, None);
        assert_eq!(step.report, None);
    }

    #[test]
    fn test_pre_cutover_promotes_replica() {
        let step = plan(&snapshot("available", false, A_PRIMARY), Some("a")).unwrap();
        assert_eq!(step.phase, FailoverPhase::PreCutover);
        assert_eq!(
            step.mutation,
            Some(FailoverMutation::PromoteReplica { node_id: "b".to_string() })
        );
        assert_eq!(step.report, Some(ServiceState::Modifying));
    }

    #[test]
    fn test_missing_hint_means_pre_cutover() {
        let step = plan(&snapshot("available", false, B_PRIMARY), None).unwrap();
        assert_eq!(step.phase, FailoverPhase::PreCutover);
        assert_eq!(
            step.mutation,
            Some(FailoverMutation::PromoteReplica { node_id: "a".to_string() })
        );
    }

    #[test]
    fn test_post_cutover_restores_failover() {
        let step = plan(&snapshot("available", false, B_PRIMARY), Some("a")).unwrap();
        assert_eq!(step.phase, FailoverPhase::PostCutover);
        assert_eq!(step.mutation, Some(FailoverMutation::EnableAutomaticFailover));
        assert_eq!(step.report, Some(ServiceState::Modifying));
    }

    #[test]
    fn test_converged_issues_nothing() {
        let step = plan(&snapshot("available", true, B_PRIMARY), Some("a")).unwrap();
        assert_eq!(step.phase, FailoverPhase::Converged);
        assert_eq!(step.mutation, None);
        assert_eq!(step.report, Some(ServiceState::Available));
    }

    #[test]
    fn test_unchanged_snapshot_plans_same_mutation() {
        let unchanged = snapshot("available", false, A_PRIMARY);
        let first = plan(&unchanged, Some("a")).unwrap();
        let second = plan(&unchanged, Some("a")).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.phase, FailoverPhase::PreCutover);
    }

    #[test]
    fn test_no_replica_is_ambiguous() {
        let lone = snapshot("available", false, &[("a", NodeRole::Primary)]);
        let err = plan(&lone, Some("a")).unwrap_err();
        assert_eq!(err, AmbiguousTopology { primaries: 1, replicas: 0 });
    }

    #[test]
    fn test_two_replicas_is_ambiguous() {
        let roles = &[
            ("a", NodeRole::Primary),
            ("b", NodeRole::Replica),
            ("c", NodeRole::Replica),
        ];
        let err = topology(&snapshot("available", false, roles)).unwrap_err();
        assert_eq!(err, AmbiguousTopology { primaries: 1, replicas: 2 });
    }

    #[test]
    fn test_mutation_requests() {
        let promote = FailoverMutation::PromoteReplica {
            node_id: "b".to_string(),
        }
        .into_request("cf-test");
        assert_eq!(promote.primary_cluster_id.as_deref(), Some("b"));
        assert_eq!(promote.automatic_failover_enabled, None);
        assert!(promote.apply_immediately);

        let enable = FailoverMutation::EnableAutomaticFailover.into_request("cf-test");
        assert_eq!(enable.automatic_failover_enabled, Some(true));
        assert_eq!(enable.multi_az_enabled, Some(true));
        assert_eq!(enable.primary_cluster_id, None);

        let disable = FailoverMutation::DisableAutomaticFailover.into_request("cf-test");
        assert_eq!(disable.automatic_failover_enabled, Some(false));
        assert_eq!(disable.multi_az_enabled, Some(false));
    }
}
