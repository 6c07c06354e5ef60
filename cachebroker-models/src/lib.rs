use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The closed vocabulary of replication group states the broker reasons about
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceState {
    Creating,
    Available,
    Modifying,
    Deleting,
    CreateFailed,
    Snapshotting,
    NonExisting,
}

impl ServiceState {
    pub const ALL: [ServiceState; 7] = [
        ServiceState::Creating,
        ServiceState::Available,
        ServiceState::Modifying,
        ServiceState::Deleting,
        ServiceState::CreateFailed,
        ServiceState::Snapshotting,
        ServiceState::NonExisting,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceState::Creating => "creating",
            ServiceState::Available => "available",
            ServiceState::Modifying => "modifying",
            ServiceState::Deleting => "deleting",
            ServiceState::CreateFailed => "create-failed",
            ServiceState::Snapshotting => "snapshotting",
            ServiceState::NonExisting => "non-existing",
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown service state: {0}")]
pub struct UnknownServiceState(pub String);

/// Case-sensitive: `"Available"` is not `available`.
impl FromStr for ServiceState {
    type Err = UnknownServiceState;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        ServiceState::ALL
            .into_iter()
            .find(|state| state.as_str() == raw)
            .ok_or_else(|| UnknownServiceState(raw.to_string()))
    }
}

/// A state as reported to callers: either a known [`ServiceState`] or the
/// literal external status the broker did not recognise.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ObservedState {
    Known(ServiceState),
    Unrecognized(String),
}

impl ObservedState {
    pub fn known(&self) -> Option<ServiceState> {
        match self {
            ObservedState::Known(state) => Some(*state),
            ObservedState::Unrecognized(_) => None,
        }
    }
}

impl fmt::Display for ObservedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObservedState::Known(state) => write!(f, "{}", state),
            ObservedState::Unrecognized(raw) => write!(f, "{}", raw),
        }
    }
}

/// Three-valued progress signal consumed by the caller-facing protocol
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum OperationProgress {
    Succeeded,
    InProgress,
    Failed,
}

impl OperationProgress {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OperationProgress::InProgress)
    }
}

/// The caller-visible operation a progress poll refers to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    #[default]
    Provision,
    Update,
    Deprovision,
    FailoverTest,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Provision => "provision",
            Operation::Update => "update",
            Operation::Deprovision => "deprovision",
            Operation::FailoverTest => "failover-test",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown operation: {0}")]
pub struct UnknownOperation(pub String);

impl FromStr for Operation {
    type Err = UnknownOperation;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "provision" => Ok(Operation::Provision),
            "update" => Ok(Operation::Update),
            "deprovision" => Ok(Operation::Deprovision),
            "failover-test" => Ok(Operation::FailoverTest),
            other => Err(UnknownOperation(other.to_string())),
        }
    }
}

// ============================================================================
// Topology
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Primary,
    Replica,
}

/// Which member node currently holds which role
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeRoleAssignment {
    pub node_id: String,
    pub role: NodeRole,
}

// ============================================================================
// Operation parameters
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProvisionParameters {
    /// Cache node type (e.g. "cache.t3.micro")
    pub node_type: String,
    /// Engine version (e.g. "7.1")
    pub engine_version: String,
    /// Replicas per node group (0 = primary only)
    pub replicas_per_node_group: u32,
    pub automatic_failover_enabled: bool,
    pub multi_az_enabled: bool,
    /// Days to keep automatic snapshots (0 = disabled)
    pub snapshot_retention_limit: u32,
    /// e.g. "sun:23:00-mon:01:30"
    pub preferred_maintenance_window: Option<String>,
    /// e.g. "04:00-05:00"
    pub snapshot_window: Option<String>,
    /// Transit encryption
    pub tls_enabled: bool,
    /// Snapshot to seed the new group from
    pub restore_from_snapshot: Option<String>,
    /// Parameter group family (default comes from broker configuration)
    pub parameter_group_family: Option<String>,
    /// Engine parameter overrides (e.g. "maxmemory-policy")
    pub parameters: BTreeMap<String, String>,
    /// Extra tags to put on the replication group
    pub tags: BTreeMap<String, String>,
}

impl Default for ProvisionParameters {
    fn default() -> Self {
        Self {
            node_type: "cache.t3.micro".to_string(),
            engine_version: "7.1".to_string(),
            replicas_per_node_group: 1,
            automatic_failover_enabled: true,
            multi_az_enabled: true,
            snapshot_retention_limit: 0,
            preferred_maintenance_window: None,
            snapshot_window: None,
            tls_enabled: true,
            restore_from_snapshot: None,
            parameter_group_family: None,
            parameters: BTreeMap::new(),
            tags: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UpdateParameters {
    /// Engine parameter overrides to apply to the instance's parameter group
    pub parameters: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeprovisionParameters {
    /// Take a final snapshot with this name before deleting
    pub final_snapshot_name: Option<String>,
}

// ============================================================================
// Results
// ============================================================================

/// Connection credentials handed to a bound application
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Credentials {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub password: String,
    pub uri: String,
    pub tls_enabled: bool,
}

/// Operator-facing facts about an instance. Every field except the group
/// name is best effort and omitted when it could not be read.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct InstanceParameters {
    pub replication_group: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_maintenance_window: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_window: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_roles: Option<Vec<NodeRoleAssignment>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<BTreeMap<String, String>>,
}

/// One answer to a progress poll
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgressReport {
    pub state: ObservedState,
    pub progress: OperationProgress,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FailoverTestStarted {
    /// Pass back as the previous-primary hint when polling
    pub previous_primary_node_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_state_parses_its_own_names() {
        for state in ServiceState::ALL {
            assert_eq!(state.as_str().parse::<ServiceState>(), Ok(state));
        }
    }

    #[test]
    fn test_service_state_parsing_is_case_sensitive() {
        assert!("Available".parse::<ServiceState>().is_err());
        assert!(" available".parse::<ServiceState>().is_err());
    }

    #[test]
    fn test_service_state_serializes_kebab_case() {
        let json = serde_json::to_string(&ServiceState::CreateFailed).unwrap();
        assert_eq!(json, "\"create-failed\"");
    }

    #[test]
    fn test_observed_state_untagged_json() {
        let known = ObservedState::Known(ServiceState::Available);
        assert_eq!(serde_json::to_string(&known).unwrap(), "\"available\"");

        let parsed: ObservedState = serde_json::from_str("\"frobnicating\"").unwrap();
        assert_eq!(parsed, ObservedState::Unrecognized("frobnicating".to_string()));

        let parsed: ObservedState = serde_json::from_str("\"snapshotting\"").unwrap();
        assert_eq!(parsed, ObservedState::Known(ServiceState::Snapshotting));
    }

    #[test]
    fn test_operation_from_str() {
        assert_eq!("failover-test".parse::<Operation>(), Ok(Operation::FailoverTest));
        assert!("failover".parse::<Operation>().is_err());
    }

    #[test]
    fn test_provision_parameters_fill_defaults() {
        let params: ProvisionParameters = serde_json::from_value(serde_json::json!({
            "node_type": "cache.m5.large",
            "parameters": { "maxmemory-policy": "allkeys-lru" }
        }))
        .unwrap();
        assert_eq!(params.node_type, "cache.m5.large");
        assert_eq!(params.replicas_per_node_group, 1);
        assert!(params.tls_enabled);
        assert_eq!(
            params.parameters.get("maxmemory-policy").map(String::as_str),
            Some("allkeys-lru")
        );
    }

    #[test]
    fn test_instance_parameters_omit_missing_fields() {
        let params = InstanceParameters {
            replication_group: "cf-abc".to_string(),
            snapshot_window: Some("04:00-05:00".to_string()),
            ..Default::default()
        };
        let json = serde_json::to_value(&params).unwrap();
        assert_eq!(json["snapshot_window"], "04:00-05:00");
        assert!(json.get("preferred_maintenance_window").is_none());
        assert!(json.get("tags").is_none());
    }
}
