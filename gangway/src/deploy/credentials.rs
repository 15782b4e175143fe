//! Credential validation

use std::collections::HashMap;

use gangway_api::models::EnvVarSpec;
use tracing::{debug, warn};

use crate::errors::GatewayError;
use crate::models::deployment::CredentialSet;

const ENV_PREFIX: &str = "env_";

/// Replace anything outside `[A-Za-z0-9_]` with `_`
pub fn sanitize_env_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// Normalize submitted credentials and check every required variable is set.
///
/// Keys may carry an `env_` prefix. Blank values count as missing. On failure
/// the error lists every missing name, not just the first.
pub fn validate_credentials(
    provided: HashMap<String, String>,
    env_vars: &[EnvVarSpec],
) -> Result<CredentialSet, GatewayError> {
    let mut normalized: HashMap<String, String> = HashMap::with_capacity(provided.len());
    for (key, value) in provided {
        let bare = key
            .strip_prefix(ENV_PREFIX)
            .filter(|rest| !rest.is_empty())
            .unwrap_or(&key);
        let name = sanitize_env_name(bare);
        if name.is_empty() || value.trim().is_empty() {
            continue;
        }
        normalized.insert(name, value);
    }

    let missing: Vec<String> = env_vars
        .iter()
        .filter(|spec| spec.required && !spec.name.trim().is_empty())
        .filter(|spec| !normalized.contains_key(&sanitize_env_name(&spec.name)))
        .map(|spec| spec.name.clone())
        .collect();

    if !missing.is_empty() {
        warn!("Credential validation failed: missing {}", missing.join(", "));
        return Err(GatewayError::MissingCredentials(missing));
    }

    debug!("Credential validation passed ({} values)", normalized.len());
    Ok(CredentialSet::from(normalized))
}
