//! In-memory backends for local runs and tests

mod control_plane;
mod secrets;

pub use control_plane::{ControlPlaneCall, InMemoryControlPlane, RecordedMutation};
pub use secrets::InMemorySecretStore;
