//! In-memory cache control plane
//!
//! Mutations put a replication group into a transitional status
//! (`creating`, `modifying`, `deleting`) and take effect after a fixed number
//! of describe calls, mimicking a control plane that converges over minutes.
//! With `settle_polls == 0` every mutation takes effect immediately.

use std::collections::{BTreeMap, HashMap, VecDeque};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::control_plane::{
    CacheCluster, ControlPlane, ControlPlaneError, CreateReplicationGroup, Endpoint, MemberNode,
    ModifyReplicationGroup, ReplicationGroup,
};

const DEFAULT_PORT: u16 = 6379;

/// Control plane calls that can be made to fail on demand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlPlaneCall {
    CreateReplicationGroup,
    ModifyReplicationGroup,
    DeleteReplicationGroup,
    DescribeReplicationGroup,
    DescribeCacheCluster,
    CreateParameterGroup,
    ModifyParameterGroup,
    DeleteParameterGroup,
    DescribeParameters,
    ListTags,
}

/// A mutation as it was received, whether or not it took effect
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedMutation {
    CreateReplicationGroup(CreateReplicationGroup),
    ModifyReplicationGroup(ModifyReplicationGroup),
    DeleteReplicationGroup {
        name: String,
        final_snapshot_name: Option<String>,
    },
    CreateParameterGroup {
        name: String,
        family: String,
    },
    ModifyParameterGroup {
        name: String,
        parameters: BTreeMap<String, String>,
    },
    DeleteParameterGroup {
        name: String,
    },
}

#[derive(Debug, Clone)]
enum Pending {
    Create,
    Modify(ModifyReplicationGroup),
    Delete,
}

#[derive(Debug, Clone)]
struct SimulatedGroup {
    group: ReplicationGroup,
    tags: BTreeMap<String, String>,
    parameter_group: Option<String>,
    maintenance_window: Option<String>,
    pending: Option<(Pending, u32)>,
    /// Mutations are accepted but never take effect
    frozen: bool,
}

impl SimulatedGroup {
    fn new(group: ReplicationGroup) -> Self {
        Self {
            group,
            tags: BTreeMap::new(),
            parameter_group: None,
            maintenance_window: None,
            pending: None,
            frozen: false,
        }
    }

    /// Start a mutation. Returns true when the group is gone.
    fn begin(&mut self, pending: Pending, transitional: &str, settle_polls: u32) -> bool {
        if settle_polls == 0 {
            return self.settle(pending);
        }
        self.group.status = transitional.to_string();
        self.pending = Some((pending, settle_polls));
        false
    }

    /// Count one describe against the pending mutation. Returns true when the group is gone.
    fn advance(&mut self) -> bool {
        let Some((pending, remaining)) = self.pending.take() else {
            return false;
        };
        if remaining > 1 {
            self.pending = Some((pending, remaining - 1));
            return false;
        }
        self.settle(pending)
    }

    fn settle(&mut self, pending: Pending) -> bool {
        match pending {
            Pending::Create => {
                self.group.status = "available".to_string();
                false
            }
            Pending::Modify(request) => {
                apply_modification(&mut self.group, &request);
                self.group.status = "available".to_string();
                false
            }
            Pending::Delete => true,
        }
    }
}

fn apply_modification(group: &mut ReplicationGroup, request: &ModifyReplicationGroup) {
    if let Some(enabled) = request.automatic_failover_enabled {
        group.automatic_failover_enabled = enabled;
    }
    if let Some(enabled) = request.multi_az_enabled {
        group.multi_az_enabled = enabled;
    }
    if let Some(primary) = &request.primary_cluster_id {
        for member in &mut group.members {
            let role = if &member.node_id == primary { "primary" } else { "replica" };
            member.current_role = Some(role.to_string());
        }
    }
}

#[derive(Debug, Default)]
struct State {
    groups: BTreeMap<String, SimulatedGroup>,
    parameter_groups: BTreeMap<String, BTreeMap<String, String>>,
    mutations: Vec<RecordedMutation>,
    failures: HashMap<ControlPlaneCall, VecDeque<ControlPlaneError>>,
}

impl State {
    fn take_failure(&mut self, call: ControlPlaneCall) -> Result<(), ControlPlaneError> {
        match self.failures.get_mut(&call).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

pub struct InMemoryControlPlane {
    state: Mutex<State>,
    settle_polls: u32,
}

impl Default for InMemoryControlPlane {
    fn default() -> Self {
        Self::new(0)
    }
}

impl InMemoryControlPlane {
    pub fn new(settle_polls: u32) -> Self {
        Self {
            state: Mutex::new(State::default()),
            settle_polls,
        }
    }

    /// Seed a replication group as-is, bypassing the create path
    pub async fn insert_group(&self, group: ReplicationGroup) {
        let mut state = self.state.lock().await;
        state.groups.insert(group.name.clone(), SimulatedGroup::new(group));
    }

    /// Overwrite the raw status of a group
    pub async fn set_status(&self, name: &str, status: &str) {
        let mut state = self.state.lock().await;
        if let Some(sim) = state.groups.get_mut(name) {
            sim.group.status = status.to_string();
        }
    }

    pub async fn set_maintenance_window(&self, name: &str, window: &str) {
        let mut state = self.state.lock().await;
        if let Some(sim) = state.groups.get_mut(name) {
            sim.maintenance_window = Some(window.to_string());
        }
    }

    /// Accept but ignore every further mutation of a group
    pub async fn set_frozen(&self, name: &str, frozen: bool) {
        let mut state = self.state.lock().await;
        if let Some(sim) = state.groups.get_mut(name) {
            sim.frozen = frozen;
        }
    }

    /// Make the next `call` fail with `err`
    pub async fn fail_next(&self, call: ControlPlaneCall, err: ControlPlaneError) {
        let mut state = self.state.lock().await;
        state.failures.entry(call).or_default().push_back(err);
    }

    pub async fn mutations(&self) -> Vec<RecordedMutation> {
        self.state.lock().await.mutations.clone()
    }

    pub async fn modifications(&self, name: &str) -> Vec<ModifyReplicationGroup> {
        self.state
            .lock()
            .await
            .mutations
            .iter()
            .filter_map(|mutation| match mutation {
                RecordedMutation::ModifyReplicationGroup(request) if request.name == name => {
                    Some(request.clone())
                }
                _ => None,
            })
            .collect()
    }

    pub async fn has_parameter_group(&self, name: &str) -> bool {
        self.state.lock().await.parameter_groups.contains_key(name)
    }
}

#[async_trait]
impl ControlPlane for InMemoryControlPlane {
    async fn create_replication_group(
        &self,
        request: CreateReplicationGroup,
    ) -> Result<(), ControlPlaneError> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        state.take_failure(ControlPlaneCall::CreateReplicationGroup)?;

        if state.groups.contains_key(&request.name) {
            return Err(ControlPlaneError::AlreadyExists(request.name));
        }
        if !state.parameter_groups.contains_key(&request.parameter_group_name) {
            return Err(ControlPlaneError::NotFound(format!(
                "parameter group {}",
                request.parameter_group_name
            )));
        }
        state
            .mutations
            .push(RecordedMutation::CreateReplicationGroup(request.clone()));

        let members: Vec<MemberNode> = (0..=request.replicas_per_node_group)
            .map(|i| MemberNode {
                node_id: format!("{}-{:03}", request.name, i + 1),
                current_role: Some(if i == 0 { "primary" } else { "replica" }.to_string()),
            })
            .collect();

        let group = ReplicationGroup {
            name: request.name.clone(),
            status: "creating".to_string(),
            automatic_failover_enabled: request.automatic_failover_enabled,
            multi_az_enabled: request.multi_az_enabled,
            member_clusters: members.iter().map(|m| m.node_id.clone()).collect(),
            members,
            primary_endpoint: Some(Endpoint {
                address: format!("master.{}.cache.internal", request.name),
                port: DEFAULT_PORT,
            }),
            snapshot_window: request.snapshot_window.clone(),
            transit_encryption_enabled: request.transit_encryption_enabled,
        };

        let mut sim = SimulatedGroup::new(group);
        sim.tags = request.tags.clone();
        sim.parameter_group = Some(request.parameter_group_name.clone());
        sim.maintenance_window = request.preferred_maintenance_window.clone();
        sim.begin(Pending::Create, "creating", self.settle_polls);

        state.groups.insert(request.name, sim);
        Ok(())
    }

    async fn modify_replication_group(
        &self,
        request: ModifyReplicationGroup,
    ) -> Result<(), ControlPlaneError> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        state.take_failure(ControlPlaneCall::ModifyReplicationGroup)?;
        state
            .mutations
            .push(RecordedMutation::ModifyReplicationGroup(request.clone()));

        let sim = state
            .groups
            .get_mut(&request.name)
            .ok_or_else(|| ControlPlaneError::NotFound(request.name.clone()))?;
        if sim.frozen {
            return Ok(());
        }
        if sim.group.status != "available" {
            return Err(ControlPlaneError::InvalidState(format!(
                "replication group {} is {}",
                request.name, sim.group.status
            )));
        }
        if let Some(primary) = &request.primary_cluster_id {
            if !sim.group.member_clusters.contains(primary) {
                return Err(ControlPlaneError::InvalidState(format!(
                    "{} is not a member of {}",
                    primary, request.name
                )));
            }
            if sim.group.automatic_failover_enabled
                && request.automatic_failover_enabled != Some(false)
            {
                return Err(ControlPlaneError::InvalidState(
                    "automatic failover must be disabled before promoting a node".to_string(),
                ));
            }
        }
        if request.automatic_failover_enabled == Some(true) && sim.group.member_clusters.len() < 2 {
            return Err(ControlPlaneError::InvalidState(
                "automatic failover needs at least one replica".to_string(),
            ));
        }

        sim.begin(Pending::Modify(request), "modifying", self.settle_polls);
        Ok(())
    }

    async fn delete_replication_group(
        &self,
        name: &str,
        final_snapshot_name: Option<&str>,
    ) -> Result<(), ControlPlaneError> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        state.take_failure(ControlPlaneCall::DeleteReplicationGroup)?;

        let sim = state
            .groups
            .get_mut(name)
            .ok_or_else(|| ControlPlaneError::NotFound(name.to_string()))?;
        if sim.group.status == "deleting" {
            return Err(ControlPlaneError::InvalidState(format!(
                "replication group {} is already being deleted",
                name
            )));
        }
        state.mutations.push(RecordedMutation::DeleteReplicationGroup {
            name: name.to_string(),
            final_snapshot_name: final_snapshot_name.map(str::to_string),
        });
        if sim.frozen {
            return Ok(());
        }

        if sim.begin(Pending::Delete, "deleting", self.settle_polls) {
            state.groups.remove(name);
        }
        Ok(())
    }

    async fn describe_replication_group(
        &self,
        name: &str,
    ) -> Result<ReplicationGroup, ControlPlaneError> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        state.take_failure(ControlPlaneCall::DescribeReplicationGroup)?;

        let sim = state
            .groups
            .get_mut(name)
            .ok_or_else(|| ControlPlaneError::NotFound(name.to_string()))?;
        if sim.advance() {
            state.groups.remove(name);
            return Err(ControlPlaneError::NotFound(name.to_string()));
        }
        Ok(sim.group.clone())
    }

    async fn describe_cache_cluster(
        &self,
        node_id: &str,
    ) -> Result<CacheCluster, ControlPlaneError> {
        let mut state = self.state.lock().await;
        state.take_failure(ControlPlaneCall::DescribeCacheCluster)?;

        state
            .groups
            .values()
            .find(|sim| sim.group.member_clusters.iter().any(|id| id == node_id))
            .map(|sim| CacheCluster {
                node_id: node_id.to_string(),
                preferred_maintenance_window: sim.maintenance_window.clone(),
            })
            .ok_or_else(|| ControlPlaneError::NotFound(node_id.to_string()))
    }

    async fn create_parameter_group(
        &self,
        name: &str,
        family: &str,
        _description: &str,
    ) -> Result<(), ControlPlaneError> {
        let mut state = self.state.lock().await;
        state.take_failure(ControlPlaneCall::CreateParameterGroup)?;

        if state.parameter_groups.contains_key(name) {
            return Err(ControlPlaneError::AlreadyExists(name.to_string()));
        }
        state.mutations.push(RecordedMutation::CreateParameterGroup {
            name: name.to_string(),
            family: family.to_string(),
        });
        state.parameter_groups.insert(name.to_string(), BTreeMap::new());
        Ok(())
    }

    async fn modify_parameter_group(
        &self,
        name: &str,
        parameters: &BTreeMap<String, String>,
    ) -> Result<(), ControlPlaneError> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        state.take_failure(ControlPlaneCall::ModifyParameterGroup)?;

        let current = state
            .parameter_groups
            .get_mut(name)
            .ok_or_else(|| ControlPlaneError::NotFound(name.to_string()))?;
        current.extend(parameters.clone());
        state.mutations.push(RecordedMutation::ModifyParameterGroup {
            name: name.to_string(),
            parameters: parameters.clone(),
        });
        Ok(())
    }

    async fn delete_parameter_group(&self, name: &str) -> Result<(), ControlPlaneError> {
        let mut state = self.state.lock().await;
        state.take_failure(ControlPlaneCall::DeleteParameterGroup)?;

        if !state.parameter_groups.contains_key(name) {
            return Err(ControlPlaneError::NotFound(name.to_string()));
        }
        let in_use = state
            .groups
            .values()
            .any(|sim| sim.parameter_group.as_deref() == Some(name));
        if in_use {
            return Err(ControlPlaneError::InvalidState(format!(
                "parameter group {} is in use",
                name
            )));
        }
        state.mutations.push(RecordedMutation::DeleteParameterGroup {
            name: name.to_string(),
        });
        state.parameter_groups.remove(name);
        Ok(())
    }

    async fn describe_parameters(
        &self,
        name: &str,
    ) -> Result<BTreeMap<String, String>, ControlPlaneError> {
        let mut state = self.state.lock().await;
        state.take_failure(ControlPlaneCall::DescribeParameters)?;

        state
            .parameter_groups
            .get(name)
            .cloned()
            .ok_or_else(|| ControlPlaneError::NotFound(name.to_string()))
    }

    async fn list_tags(&self, name: &str) -> Result<BTreeMap<String, String>, ControlPlaneError> {
        let mut state = self.state.lock().await;
        state.take_failure(ControlPlaneCall::ListTags)?;

        state
            .groups
            .get(name)
            .map(|sim| sim.tags.clone())
            .ok_or_else(|| ControlPlaneError::NotFound(name.to_string()))
    }
}
