//! Error types for the reconciliation engine

use std::time::Duration;

use thiserror::Error;

use crate::control_plane::ControlPlaneError;
use crate::secrets::SecretStoreError;

/// Errors returned to callers of [`crate::CacheProvider`]
///
/// None of these are retried inside the engine. Retrying is always the
/// caller's job, by polling again.
#[derive(Error, Debug)]
pub enum Error {
    #[error("control plane call failed for instance {instance_id}: {source}")]
    ControlPlane {
        instance_id: String,
        #[source]
        source: ControlPlaneError,
    },

    #[error("secret store call failed for instance {instance_id}: {source}")]
    SecretStore {
        instance_id: String,
        #[source]
        source: SecretStoreError,
    },

    #[error(
        "ambiguous topology for instance {instance_id}: need exactly one primary and one replica, \
         found {primaries} primary and {replicas} replica nodes"
    )]
    AmbiguousTopology {
        instance_id: String,
        primaries: usize,
        replicas: usize,
    },

    #[error("deadline of {timeout:?} exceeded for instance {instance_id}")]
    DeadlineExceeded {
        instance_id: String,
        timeout: Duration,
    },

    #[error("credentials unavailable for instance {instance_id}: {reason}")]
    CredentialsUnavailable { instance_id: String, reason: String },

    #[error("invalid parameters for instance {instance_id}: {reason}")]
    InvalidParameters { instance_id: String, reason: String },
}

impl Error {
    pub(crate) fn control_plane(instance_id: &str, source: ControlPlaneError) -> Self {
        Error::ControlPlane {
            instance_id: instance_id.to_string(),
            source,
        }
    }

    pub(crate) fn invalid_parameters(instance_id: &str, reason: impl Into<String>) -> Self {
        Error::InvalidParameters {
            instance_id: instance_id.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn secret_store(instance_id: &str, source: SecretStoreError) -> Self {
        Error::SecretStore {
            instance_id: instance_id.to_string(),
            source,
        }
    }

    /// Whether polling again can make progress without operator action
    pub fn is_transient(&self) -> bool {
        match self {
            Error::ControlPlane { .. } => true,
            Error::SecretStore { .. } => true,
            Error::DeadlineExceeded { .. } => true,
            Error::CredentialsUnavailable { .. } => true,
            Error::AmbiguousTopology { .. } => false,
            Error::InvalidParameters { .. } => false,
        }
    }

    /// The external resource or secret is not there
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::ControlPlane { source, .. } => matches!(source, ControlPlaneError::NotFound(_)),
            Error::SecretStore { source, .. } => matches!(source, SecretStoreError::NotFound(_)),
            _ => false,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ambiguous_topology_is_not_transient() {
        let err = Error::AmbiguousTopology {
            instance_id: "abc".to_string(),
            primaries: 1,
            replicas: 0,
        };
        assert!(!err.is_transient());
        assert!(err.to_string().contains("abc"));
        assert!(err.to_string().contains("0 replica"));
    }

    #[test]
    fn test_external_failures_are_transient() {
        let err = Error::control_plane("abc", ControlPlaneError::Api("throttled".to_string()));
        assert!(err.is_transient());
        assert!(!err.is_not_found());

        let err = Error::DeadlineExceeded {
            instance_id: "abc".to_string(),
            timeout: Duration::from_secs(30),
        };
        assert!(err.is_transient());
    }

    #[test]
    fn test_invalid_parameters_name_the_instance() {
        let err = Error::invalid_parameters("abc", "node_type must not be empty");
        assert!(!err.is_transient());
        assert_eq!(
            err.to_string(),
            "invalid parameters for instance abc: node_type must not be empty"
        );
    }

    #[test]
    fn test_not_found_detection() {
        let err = Error::control_plane("abc", ControlPlaneError::NotFound("cf-x".to_string()));
        assert!(err.is_not_found());

        let err = Error::secret_store("abc", SecretStoreError::NotFound("p".to_string()));
        assert!(err.is_not_found());
    }
}
