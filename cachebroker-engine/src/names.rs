//! Name derivation for external resources and secrets
//!
//! Every name is recomputed from the caller's instance identifier on each
//! call; nothing here is stored. Derived names are collision tolerant, not
//! collision free: a clash surfaces as a failed create call.

use data_encoding::BASE32_NOPAD;
use xxhash_rust::xxh3::xxh3_64;

/// Prefix that makes every derived name start with a letter
pub const NAME_PREFIX: &str = "cf-";

/// Upper bound imposed by the control plane on replication group names
pub const MAX_NAME_LEN: usize = 20;

/// Last path segment of every auth token secret
pub const AUTH_TOKEN_SECRET: &str = "auth-token";

/// Derive the replication group name for an instance
///
/// 64-bit xxh3 digest, unpadded base32, lowercased, prefixed with `cf-`.
/// The result is 16 characters of `[a-z2-7-]` and only ever contains the
/// prefix hyphen.
pub fn derive_name(instance_id: &str) -> String {
    let digest = xxh3_64(instance_id.as_bytes()).to_be_bytes();
    let encoded = BASE32_NOPAD.encode(&digest).to_ascii_lowercase();
    format!("{}{}", NAME_PREFIX, encoded)
}

/// Each instance gets its own parameter group, named like its replication group
pub fn parameter_group_name(instance_id: &str) -> String {
    derive_name(instance_id)
}

/// Secret store path of an instance's auth token: `<base>/<instance>/auth-token`
pub fn auth_token_path(base_path: &str, instance_id: &str) -> String {
    format!(
        "{}/{}/{}",
        base_path.trim_end_matches('/'),
        instance_id,
        AUTH_TOKEN_SECRET
    )
}
