//! Reconciliation entry points
//!
//! Every method is one bounded round trip: describe, then at most one
//! mutation per resource. Nothing is remembered between calls, so callers
//! may re-invoke any of them after a crash or a timeout.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use cachebroker_models::{
    Credentials, DeprovisionParameters, InstanceParameters, ObservedState, Operation,
    ProgressReport, ProvisionParameters, ServiceState, UpdateParameters,
};

use crate::control_plane::{ControlPlane, ControlPlaneError, CreateReplicationGroup};
use crate::credentials::CredentialLifecycle;
use crate::describer::{Describer, Observation, ResourceSnapshot};
use crate::error::{Error, Result};
use crate::failover::{self, FailoverMutation, FailoverPhase};
use crate::names::{derive_name, parameter_group_name};
use crate::secrets::SecretStore;
use crate::state::{normalize_status, operation_progress};

/// Parameters the broker manages itself; callers may not override them
pub const RESERVED_PARAMETERS: &[&str] = &["cluster-enabled"];

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Value of the `created-by` tag
    pub broker_name: String,
    /// Secrets live under `<base>/<instance>/auth-token`
    pub secrets_base_path: String,
    pub recovery_window_days: u32,
    /// Deadline for each entry point invocation
    pub call_timeout: Duration,
    pub default_parameter_group_family: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            broker_name: "cachebroker".to_string(),
            secrets_base_path: "cachebroker".to_string(),
            recovery_window_days: 7,
            call_timeout: Duration::from_secs(30),
            default_parameter_group_family: "redis7".to_string(),
        }
    }
}

#[derive(Clone)]
pub struct CacheProvider {
    control_plane: Arc<dyn ControlPlane>,
    describer: Describer,
    credentials: CredentialLifecycle,
    config: ProviderConfig,
}

impl CacheProvider {
    pub fn new(
        control_plane: Arc<dyn ControlPlane>,
        secret_store: Arc<dyn SecretStore>,
        config: ProviderConfig,
    ) -> Self {
        Self {
            describer: Describer::new(control_plane.clone()),
            credentials: CredentialLifecycle::new(secret_store, config.secrets_base_path.clone()),
            control_plane,
            config,
        }
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    pub async fn provision(&self, instance_id: &str, params: ProvisionParameters) -> Result<()> {
        self.with_deadline(instance_id, self.provision_impl(instance_id, params))
            .await
    }

    pub async fn update(&self, instance_id: &str, params: UpdateParameters) -> Result<()> {
        self.with_deadline(instance_id, self.update_impl(instance_id, params))
            .await
    }

    pub async fn deprovision(
        &self,
        instance_id: &str,
        params: DeprovisionParameters,
    ) -> Result<()> {
        self.with_deadline(instance_id, self.deprovision_impl(instance_id, params))
            .await
    }

    /// Answer one progress poll for `operation`
    ///
    /// For [`Operation::FailoverTest`] this also issues the next failover
    /// mutation, using `previous_primary` (as returned by
    /// [`CacheProvider::start_failover_test`]) to tell whether the cutover
    /// has happened yet.
    pub async fn progress_state(
        &self,
        instance_id: &str,
        operation: Operation,
        previous_primary: Option<&str>,
    ) -> Result<ProgressReport> {
        self.with_deadline(
            instance_id,
            self.progress_state_impl(instance_id, operation, previous_primary),
        )
        .await
    }

    pub async fn generate_credentials(
        &self,
        instance_id: &str,
        binding_id: &str,
    ) -> Result<Credentials> {
        self.with_deadline(
            instance_id,
            self.generate_credentials_impl(instance_id, binding_id),
        )
        .await
    }

    /// No-op: the token is shared by every binding of the instance
    pub async fn revoke_credentials(&self, instance_id: &str, binding_id: &str) -> Result<()> {
        self.credentials.revoke_binding(instance_id, binding_id).await
    }

    /// Disable automatic failover and Multi-AZ, returning the node that is
    /// primary right now. Poll [`Operation::FailoverTest`] with that node as
    /// the hint to drive the rest of the test.
    pub async fn start_failover_test(&self, instance_id: &str) -> Result<String> {
        self.with_deadline(instance_id, self.start_failover_test_impl(instance_id))
            .await
    }

    pub async fn instance_parameters(&self, instance_id: &str) -> Result<InstanceParameters> {
        self.with_deadline(instance_id, self.describer.instance_parameters(instance_id))
            .await
    }

    async fn with_deadline<T>(
        &self,
        instance_id: &str,
        call: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.config.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    instance_id,
                    timeout = ?self.config.call_timeout,
                    "Call exceeded its deadline"
                );
                Err(Error::DeadlineExceeded {
                    instance_id: instance_id.to_string(),
                    timeout: self.config.call_timeout,
                })
            }
        }
    }

    // ========================================================================
    // Provision / update / deprovision
    // ========================================================================

    async fn provision_impl(&self, instance_id: &str, params: ProvisionParameters) -> Result<()> {
        validate_provision(instance_id, &params)?;

        let name = derive_name(instance_id);
        let family = params
            .parameter_group_family
            .clone()
            .unwrap_or_else(|| self.config.default_parameter_group_family.clone());
        tracing::info!(instance_id, replication_group = %name, "Provisioning replication group");

        let parameter_group = parameter_group_name(instance_id);
        match self
            .control_plane
            .create_parameter_group(
                &parameter_group,
                &family,
                &format!("{} {}", self.config.broker_name, instance_id),
            )
            .await
        {
            Ok(()) => tracing::info!(
                instance_id,
                parameter_group = %parameter_group,
                "Created parameter group"
            ),
            Err(ControlPlaneError::AlreadyExists(_)) => {
                tracing::info!(
                    instance_id,
                    parameter_group = %parameter_group,
                    "Parameter group already exists"
                )
            }
            Err(e) => return Err(Error::control_plane(instance_id, e)),
        }

        let mut overrides = params.parameters.clone();
        overrides.insert("cluster-enabled".to_string(), "no".to_string());
        self.control_plane
            .modify_parameter_group(&parameter_group, &overrides)
            .await
            .map_err(|e| Error::control_plane(instance_id, e))?;

        let tags = self.resource_tags(instance_id, &params.tags);
        let auth_token = self.credentials.issue(instance_id, &tags).await?;

        let request = CreateReplicationGroup {
            name: name.clone(),
            description: format!("{} instance {}", self.config.broker_name, instance_id),
            node_type: params.node_type,
            engine_version: params.engine_version,
            replicas_per_node_group: params.replicas_per_node_group,
            automatic_failover_enabled: params.automatic_failover_enabled,
            multi_az_enabled: params.multi_az_enabled,
            parameter_group_name: parameter_group,
            auth_token,
            transit_encryption_enabled: params.tls_enabled,
            snapshot_retention_limit: params.snapshot_retention_limit,
            preferred_maintenance_window: params.preferred_maintenance_window,
            snapshot_window: params.snapshot_window,
            snapshot_name: params.restore_from_snapshot,
            tags,
        };

        match self.control_plane.create_replication_group(request).await {
            Ok(()) => {
                tracing::info!(
                    instance_id,
                    replication_group = %name,
                    "Replication group creation started"
                );
                Ok(())
            }
            Err(ControlPlaneError::AlreadyExists(existing)) => {
                self.check_ownership(instance_id, &name, existing).await
            }
            Err(e) => Err(Error::control_plane(instance_id, e)),
        }
    }

    /// A group that already exists under our name is fine if it is ours
    /// (a retried provision). Otherwise two instance ids hashed to the same
    /// name and the provision fails.
    async fn check_ownership(&self, instance_id: &str, name: &str, existing: String) -> Result<()> {
        let tags = self
            .control_plane
            .list_tags(name)
            .await
            .map_err(|e| Error::control_plane(instance_id, e))?;

        if tags.get("instance-id").map(String::as_str) == Some(instance_id) {
            tracing::info!(
                instance_id,
                replication_group = %name,
                "Replication group already exists"
            );
            Ok(())
        } else {
            tracing::error!(
                instance_id,
                replication_group = %name,
                "Replication group name belongs to another instance"
            );
            Err(Error::control_plane(instance_id, ControlPlaneError::AlreadyExists(existing)))
        }
    }

    async fn update_impl(&self, instance_id: &str, params: UpdateParameters) -> Result<()> {
        reject_reserved(instance_id, &params.parameters)?;
        if params.parameters.is_empty() {
            return Ok(());
        }

        let parameter_group = parameter_group_name(instance_id);
        tracing::info!(
            instance_id,
            parameter_group = %parameter_group,
            "Updating parameter overrides"
        );
        self.control_plane
            .modify_parameter_group(&parameter_group, &params.parameters)
            .await
            .map_err(|e| Error::control_plane(instance_id, e))
    }

    async fn deprovision_impl(
        &self,
        instance_id: &str,
        params: DeprovisionParameters,
    ) -> Result<()> {
        let name = derive_name(instance_id);

        match self.describer.describe(instance_id).await? {
            Observation::NotFound { .. } => {
                tracing::info!(
                    instance_id,
                    replication_group = %name,
                    "Replication group already gone"
                );
            }
            Observation::Found(snapshot) if snapshot.status == ServiceState::Deleting.as_str() => {
                tracing::info!(
                    instance_id,
                    replication_group = %name,
                    "Replication group already deleting"
                );
            }
            Observation::Found(_) => {
                tracing::info!(
                    instance_id,
                    replication_group = %name,
                    final_snapshot = ?params.final_snapshot_name,
                    "Deleting replication group"
                );
                match self
                    .control_plane
                    .delete_replication_group(&name, params.final_snapshot_name.as_deref())
                    .await
                {
                    Ok(()) | Err(ControlPlaneError::NotFound(_)) => {}
                    Err(e) => return Err(Error::control_plane(instance_id, e)),
                }
            }
        }

        self.credentials
            .revoke(instance_id, self.config.recovery_window_days)
            .await
    }

    // ========================================================================
    // Progress
    // ========================================================================

    async fn progress_state_impl(
        &self,
        instance_id: &str,
        operation: Operation,
        previous_primary: Option<&str>,
    ) -> Result<ProgressReport> {
        let (state, message) = match self.describer.describe(instance_id).await? {
            Observation::NotFound { replication_group } => {
                if operation == Operation::Deprovision {
                    self.delete_parameter_group(instance_id).await?;
                }
                (
                    ObservedState::Known(ServiceState::NonExisting),
                    format!("Replication group does not exist: {}", replication_group),
                )
            }
            Observation::Found(snapshot) => {
                let failover_report = if operation == Operation::FailoverTest {
                    self.advance_failover(instance_id, &snapshot, previous_primary).await?
                } else {
                    None
                };
                match failover_report {
                    Some(report) => report,
                    None => self.report_status(instance_id, &snapshot),
                }
            }
        };

        let progress = operation_progress(operation, &state);
        tracing::debug!(instance_id, %operation, %state, ?progress, "Progress polled");
        Ok(ProgressReport {
            state,
            progress,
            message,
        })
    }

    fn report_status(
        &self,
        instance_id: &str,
        snapshot: &ResourceSnapshot,
    ) -> (ObservedState, String) {
        let state = normalize_status(&snapshot.status);
        if let ObservedState::Unrecognized(raw) = &state {
            tracing::warn!(
                instance_id,
                replication_group = %snapshot.replication_group,
                raw_status = %raw,
                "Unrecognized replication group status, reporting in progress"
            );
        }
        let message = format!(
            "Replication group {} is {}",
            snapshot.replication_group, snapshot.status
        );
        (state, message)
    }

    /// Issue the mutation for the current failover phase. `None` when the
    /// group is not available and the plain status should be reported.
    async fn advance_failover(
        &self,
        instance_id: &str,
        snapshot: &ResourceSnapshot,
        previous_primary: Option<&str>,
    ) -> Result<Option<(ObservedState, String)>> {
        let step = failover::plan(snapshot, previous_primary).map_err(|ambiguous| {
            Error::AmbiguousTopology {
                instance_id: instance_id.to_string(),
                primaries: ambiguous.primaries,
                replicas: ambiguous.replicas,
            }
        })?;
        tracing::info!(
            instance_id,
            phase = ?step.phase,
            previous_primary = ?previous_primary,
            "Failover phase"
        );

        let name = &snapshot.replication_group;
        let message = match (&step.phase, &step.mutation) {
            (FailoverPhase::NotApplicable, _) => return Ok(None),
            (FailoverPhase::Converged, _) => {
                format!("Failover test complete, {} has automatic failover enabled", name)
            }
            (_, Some(mutation)) => format!("Failover test in progress on {}: {}", name, mutation),
            (_, None) => format!("Failover test in progress on {}", name),
        };

        if let Some(mutation) = step.mutation {
            self.modify(instance_id, name, mutation).await?;
        }

        Ok(step
            .report
            .map(|state| (ObservedState::Known(state), message)))
    }

    async fn modify(
        &self,
        instance_id: &str,
        name: &str,
        mutation: FailoverMutation,
    ) -> Result<()> {
        tracing::info!(
            instance_id,
            replication_group = %name,
            "Issuing failover mutation: {}",
            mutation
        );
        self.control_plane
            .modify_replication_group(mutation.into_request(name))
            .await
            .map_err(|e| Error::control_plane(instance_id, e))
    }

    async fn delete_parameter_group(&self, instance_id: &str) -> Result<()> {
        let parameter_group = parameter_group_name(instance_id);
        match self.control_plane.delete_parameter_group(&parameter_group).await {
            Ok(()) => {
                tracing::info!(
                    instance_id,
                    parameter_group = %parameter_group,
                    "Deleted parameter group"
                );
                Ok(())
            }
            Err(ControlPlaneError::NotFound(_)) => Ok(()),
            Err(e) => Err(Error::control_plane(instance_id, e)),
        }
    }

    // ========================================================================
    // Bindings and failover test
    // ========================================================================

    async fn generate_credentials_impl(
        &self,
        instance_id: &str,
        binding_id: &str,
    ) -> Result<Credentials> {
        let snapshot = match self.describer.describe(instance_id).await? {
            Observation::Found(snapshot) => snapshot,
            Observation::NotFound { replication_group } => {
                return Err(Error::CredentialsUnavailable {
                    instance_id: instance_id.to_string(),
                    reason: format!("replication group {} does not exist", replication_group),
                })
            }
        };
        let endpoint = snapshot
            .primary_endpoint
            .clone()
            .ok_or_else(|| Error::CredentialsUnavailable {
                instance_id: instance_id.to_string(),
                reason: format!(
                    "replication group {} has no primary endpoint yet ({})",
                    snapshot.replication_group, snapshot.status
                ),
            })?;

        let password = self.credentials.retrieve(instance_id).await?;
        let scheme = if snapshot.tls_enabled { "rediss" } else { "redis" };
        let uri = format!("{}://:{}@{}:{}", scheme, password, endpoint.address, endpoint.port);

        tracing::info!(
            instance_id,
            binding_id,
            replication_group = %snapshot.replication_group,
            "Generated credentials"
        );
        Ok(Credentials {
            host: endpoint.address,
            port: endpoint.port,
            name: snapshot.replication_group,
            password,
            uri,
            tls_enabled: snapshot.tls_enabled,
        })
    }

    async fn start_failover_test_impl(&self, instance_id: &str) -> Result<String> {
        let snapshot = match self.describer.describe(instance_id).await? {
            Observation::Found(snapshot) => snapshot,
            Observation::NotFound { replication_group } => {
                return Err(Error::control_plane(
                    instance_id,
                    ControlPlaneError::NotFound(replication_group),
                ))
            }
        };
        let topology = failover::topology(&snapshot).map_err(|ambiguous| Error::AmbiguousTopology {
            instance_id: instance_id.to_string(),
            primaries: ambiguous.primaries,
            replicas: ambiguous.replicas,
        })?;

        tracing::info!(
            instance_id,
            replication_group = %snapshot.replication_group,
            primary = %topology.primary,
            replica = %topology.replica,
            "Starting failover test"
        );
        self.modify(
            instance_id,
            &snapshot.replication_group,
            FailoverMutation::DisableAutomaticFailover,
        )
        .await?;

        Ok(topology.primary)
    }

    fn resource_tags(
        &self,
        instance_id: &str,
        extra: &BTreeMap<String, String>,
    ) -> BTreeMap<String, String> {
        let mut tags = extra.clone();
        tags.insert("created-by".to_string(), self.config.broker_name.clone());
        tags.insert("instance-id".to_string(), instance_id.to_string());
        tags
    }
}

fn reject_reserved(instance_id: &str, parameters: &BTreeMap<String, String>) -> Result<()> {
    match parameters.keys().find(|key| RESERVED_PARAMETERS.contains(&key.as_str())) {
        Some(key) => Err(Error::invalid_parameters(
            instance_id,
            format!("parameter '{}' is managed by the broker", key),
        )),
        None => Ok(()),
    }
}

fn validate_provision(instance_id: &str, params: &ProvisionParameters) -> Result<()> {
    if params.node_type.trim().is_empty() {
        return Err(Error::invalid_parameters(instance_id, "node_type must not be empty"));
    }
    if params.automatic_failover_enabled && params.replicas_per_node_group == 0 {
        return Err(Error::invalid_parameters(
            instance_id,
            "automatic failover requires at least one replica",
        ));
    }
    if params.multi_az_enabled && !params.automatic_failover_enabled {
        return Err(Error::invalid_parameters(
            instance_id,
            "Multi-AZ requires automatic failover",
        ));
    }
    reject_reserved(instance_id, &params.parameters)
}
