//! End-to-end lifecycle against the simulated control plane

use std::sync::Arc;

use cachebroker_engine::memory::{InMemoryControlPlane, InMemorySecretStore};
use cachebroker_engine::names::derive_name;
use cachebroker_engine::{CacheProvider, Error, ProviderConfig};
use cachebroker_models::{
    DeprovisionParameters, NodeRole, ObservedState, Operation, OperationProgress, ProgressReport,
    ProvisionParameters, ServiceState,
};

const MAX_POLLS: usize = 20;

struct Broker {
    control_plane: Arc<InMemoryControlPlane>,
    secrets: Arc<InMemorySecretStore>,
    provider: CacheProvider,
}

fn broker() -> Broker {
    let control_plane = Arc::new(InMemoryControlPlane::new(2));
    let secrets = Arc::new(InMemorySecretStore::new());
    let provider = CacheProvider::new(
        control_plane.clone(),
        secrets.clone(),
        ProviderConfig::default(),
    );
    Broker {
        control_plane,
        secrets,
        provider,
    }
}

/// Poll until the operation reaches a terminal progress, returning every report
async fn poll_until_terminal(
    provider: &CacheProvider,
    instance_id: &str,
    operation: Operation,
    previous_primary: Option<&str>,
) -> Vec<ProgressReport> {
    let mut reports = Vec::new();
    for _ in 0..MAX_POLLS {
        let report = provider
            .progress_state(instance_id, operation, previous_primary)
            .await
            .unwrap();
        let done = report.progress.is_terminal();
        reports.push(report);
        if done {
            return reports;
        }
    }
    panic!("{} did not finish within {} polls: {:?}", operation, MAX_POLLS, reports.last());
}

#[tokio::test]
async fn test_full_lifecycle() {
    let b = broker();
    let instance_id = uuid::Uuid::new_v4().to_string();
    let name = derive_name(&instance_id);

    // Provision
    b.provider
        .provision(&instance_id, ProvisionParameters::default())
        .await
        .unwrap();
    let reports = poll_until_terminal(&b.provider, &instance_id, Operation::Provision, None).await;
    assert_eq!(reports[0].state, ObservedState::Known(ServiceState::Creating));
    let last = reports.last().unwrap();
    assert_eq!(last.state, ObservedState::Known(ServiceState::Available));
    assert_eq!(last.progress, OperationProgress::Succeeded);

    // Bind
    let credentials = b.provider.generate_credentials(&instance_id, "binding-1").await.unwrap();
    assert_eq!(credentials.name, name);
    assert_eq!(credentials.password.len(), 32);
    assert!(credentials.uri.starts_with("rediss://"));

    // Failover test
    let previous_primary = b.provider.start_failover_test(&instance_id).await.unwrap();
    let reports = poll_until_terminal(
        &b.provider,
        &instance_id,
        Operation::FailoverTest,
        Some(&previous_primary),
    )
    .await;
    assert!(reports[..reports.len() - 1]
        .iter()
        .all(|r| r.progress == OperationProgress::InProgress));
    assert_eq!(
        reports.last().unwrap().state,
        ObservedState::Known(ServiceState::Available)
    );

    let modifications = b.control_plane.modifications(&name).await;
    assert_eq!(modifications.len(), 3, "{:?}", modifications);
    assert_eq!(modifications[0].automatic_failover_enabled, Some(false));
    assert!(modifications[1].primary_cluster_id.is_some());
    assert_ne!(modifications[1].primary_cluster_id.as_deref(), Some(previous_primary.as_str()));
    assert_eq!(modifications[2].automatic_failover_enabled, Some(true));

    let details = b.provider.instance_parameters(&instance_id).await.unwrap();
    let roles = details.node_roles.unwrap();
    let primary = roles.iter().find(|r| r.role == NodeRole::Primary).unwrap();
    assert_ne!(primary.node_id, previous_primary);

    // Binding survives the failover with the same token
    let after = b.provider.generate_credentials(&instance_id, "binding-2").await.unwrap();
    assert_eq!(after.password, credentials.password);

    // Deprovision
    b.provider
        .deprovision(&instance_id, DeprovisionParameters::default())
        .await
        .unwrap();
    let reports =
        poll_until_terminal(&b.provider, &instance_id, Operation::Deprovision, None).await;
    assert_eq!(reports[0].state, ObservedState::Known(ServiceState::Deleting));
    let last = reports.last().unwrap();
    assert_eq!(last.state, ObservedState::Known(ServiceState::NonExisting));
    assert_eq!(last.progress, OperationProgress::Succeeded);

    assert!(!b.control_plane.has_parameter_group(&name).await);
    let path = format!("cachebroker/{}/auth-token", instance_id);
    assert!(b.secrets.deletion_date(&path).await.is_some());

    let err = b.provider.generate_credentials(&instance_id, "binding-3").await.unwrap_err();
    assert!(matches!(err, Error::CredentialsUnavailable { .. }));
}

#[tokio::test]
async fn test_instances_are_independent() {
    let b = broker();
    b.provider.provision("first", ProvisionParameters::default()).await.unwrap();
    b.provider.provision("second", ProvisionParameters::default()).await.unwrap();

    poll_until_terminal(&b.provider, "first", Operation::Provision, None).await;
    poll_until_terminal(&b.provider, "second", Operation::Provision, None).await;
    b.provider
        .deprovision("first", DeprovisionParameters::default())
        .await
        .unwrap();
    poll_until_terminal(&b.provider, "first", Operation::Deprovision, None).await;

    let report = b
        .provider
        .progress_state("second", Operation::Provision, None)
        .await
        .unwrap();
    assert_eq!(report.state, ObservedState::Known(ServiceState::Available));
    assert!(b.control_plane.has_parameter_group(&derive_name("second")).await);
}

#[tokio::test]
async fn test_polling_provision_of_unknown_instance_never_finishes() {
    let b = broker();
    for _ in 0..3 {
        let report = b
            .provider
            .progress_state("never-provisioned", Operation::Provision, None)
            .await
            .unwrap();
        assert_eq!(report.state, ObservedState::Known(ServiceState::NonExisting));
        assert_eq!(report.progress, OperationProgress::InProgress);
    }
}
