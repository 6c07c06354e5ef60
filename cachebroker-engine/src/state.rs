//! Normalization of external status into [`ServiceState`] and operation progress

use cachebroker_models::{ObservedState, Operation, OperationProgress, ServiceState};

use crate::describer::Observation;

pub fn normalize(observation: &Observation) -> ObservedState {
    match observation {
        Observation::NotFound { .. } => ObservedState::Known(ServiceState::NonExisting),
        Observation::Found(snapshot) => normalize_status(&snapshot.status),
    }
}

/// Exact, case-sensitive match against the closed vocabulary. Anything else
/// is carried through verbatim as [`ObservedState::Unrecognized`].
pub fn normalize_status(raw: &str) -> ObservedState {
    match raw.parse::<ServiceState>() {
        Ok(state) => ObservedState::Known(state),
        Err(_) => ObservedState::Unrecognized(raw.to_string()),
    }
}

pub fn to_operation_progress(state: ServiceState) -> OperationProgress {
    match state {
        ServiceState::Available => OperationProgress::Succeeded,
        ServiceState::CreateFailed => OperationProgress::Failed,
        ServiceState::Creating
        | ServiceState::Modifying
        | ServiceState::Deleting
        | ServiceState::Snapshotting => OperationProgress::InProgress,
        // No explicit entry: ask the caller to poll again.
        _ => OperationProgress::InProgress,
    }
}

/// Unrecognized states are never terminal
pub fn observed_progress(observed: &ObservedState) -> OperationProgress {
    match observed {
        ObservedState::Known(state) => to_operation_progress(*state),
        ObservedState::Unrecognized(_) => OperationProgress::InProgress,
    }
}

/// Progress of a caller operation. Only a deprovision can finish on an
/// absent replication group.
pub fn operation_progress(operation: Operation, observed: &ObservedState) -> OperationProgress {
    match (operation, observed) {
        (Operation::Deprovision, ObservedState::Known(ServiceState::NonExisting)) => {
            OperationProgress::Succeeded
        }
        _ => observed_progress(observed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_known_vocabulary_round_trips() {
        for state in ServiceState::ALL {
            assert_eq!(normalize_status(state.as_str()), ObservedState::Known(state));
        }
    }

    #[test]
    fn test_not_found_is_non_existing() {
        let observation = Observation::NotFound {
            replication_group: "cf-abc".to_string(),
        };
        assert_eq!(normalize(&observation), ObservedState::Known(ServiceState::NonExisting));
    }

    #[test]
    fn test_unknown_status_is_kept_verbatim() {
        assert_eq!(
            normalize_status("frobnicating"),
            ObservedState::Unrecognized("frobnicating".to_string())
        );
        assert_eq!(
            normalize_status("Available"),
            ObservedState::Unrecognized("Available".to_string())
        );
    }

    #[test]
    fn test_explicit_progress_entries() {
        assert_eq!(to_operation_progress(ServiceState::Available), OperationProgress::Succeeded);
        assert_eq!(to_operation_progress(ServiceState::CreateFailed), OperationProgress::Failed);
        for state in [
            ServiceState::Creating,
            ServiceState::Modifying,
            ServiceState::Deleting,
            ServiceState::Snapshotting,
        ] {
            assert_eq!(to_operation_progress(state), OperationProgress::InProgress);
        }
    }

    #[test]
    fn test_non_existing_defaults_to_in_progress() {
        assert_eq!(to_operation_progress(ServiceState::NonExisting), OperationProgress::InProgress);
        let gone = ObservedState::Known(ServiceState::NonExisting);
        assert_eq!(operation_progress(Operation::Provision, &gone), OperationProgress::InProgress);
        assert_eq!(operation_progress(Operation::Deprovision, &gone), OperationProgress::Succeeded);
    }

    #[test]
    fn test_deprovision_of_existing_group_follows_state() {
        let deleting = ObservedState::Known(ServiceState::Deleting);
        assert_eq!(
            operation_progress(Operation::Deprovision, &deleting),
            OperationProgress::InProgress
        );
    }

    proptest! {
        #[test]
        fn arbitrary_status_is_terminal_only_for_known_terminal_states(raw in ".*") {
            let observed = normalize_status(&raw);
            let progress = observed_progress(&observed);
            match raw.as_str() {
                "available" => prop_assert_eq!(progress, OperationProgress::Succeeded),
                "create-failed" => prop_assert_eq!(progress, OperationProgress::Failed),
                _ => prop_assert_eq!(progress, OperationProgress::InProgress),
            }
        }

        #[test]
        fn unknown_status_never_terminal_for_any_operation(raw in "[a-zA-Z -]{1,24}") {
            prop_assume!(raw.parse::<ServiceState>().is_err());
            let observed = normalize_status(&raw);
            prop_assert_eq!(&observed, &ObservedState::Unrecognized(raw.clone()));
            for operation in [
                Operation::Provision,
                Operation::Update,
                Operation::Deprovision,
                Operation::FailoverTest,
            ] {
                prop_assert_eq!(
                    operation_progress(operation, &observed),
                    OperationProgress::InProgress
                );
            }
        }
    }
}
