//! Cachebroker Engine - stateless reconciliation for managed cache replication groups
//!
//! Every entry point on [`CacheProvider`] describes the replication group,
//! decides from that snapshot alone, issues at most one mutation and
//! returns. Nothing survives between calls, so any call can be retried.
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use cachebroker_engine::{CacheProvider, ProviderConfig};
//! use cachebroker_engine::memory::{InMemoryControlPlane, InMemorySecretStore};
//! use cachebroker_models::{Operation, ProvisionParameters};
//!
//! # async fn example() -> cachebroker_engine::Result<()> {
//! let provider = CacheProvider::new(
//!     Arc::new(InMemoryControlPlane::new(2)),
//!     Arc::new(InMemorySecretStore::new()),
//!     ProviderConfig::default(),
//! );
//!
//! provider.provision("instance-1", ProvisionParameters::default()).await?;
//! let report = provider.progress_state("instance-1", Operation::Provision, None).await?;
//! println!("{}: {}", report.state, report.message);
//! # Ok(())
//! # }
//! ```

// Contracts with the outside world
pub mod control_plane;
pub mod secrets;

// Reconciliation
pub mod credentials;
pub mod describer;
pub mod error;
pub mod failover;
pub mod names;
pub mod provider;
pub mod state;

// Backends
pub mod kube_secrets;
pub mod memory;

pub use control_plane::{ControlPlane, ControlPlaneError};
pub use error::{Error, Result};
pub use provider::{CacheProvider, ProviderConfig};
pub use secrets::{SecretStore, SecretStoreError};
