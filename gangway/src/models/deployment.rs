//! Deployment models

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use gangway_api::models::{DeploymentResponse, EnvVarSpec, MaskedCredential, RuntimeKind};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::deploy::fsm::{DeploymentEvent, DeploymentState, Lifecycle};
use crate::errors::GatewayError;
use crate::utils::{generate_token, sha256_hash};

/// A deployed MCP server record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    /// Unique deployment ID
    pub id: Uuid,

    /// Display name
    pub name: String,

    /// Registry name or repository reference
    pub package: String,

    pub runtime: RuntimeKind,

    /// Declared environment variables
    #[serde(default)]
    pub env_vars: Vec<EnvVarSpec>,

    /// Backend machine, once provisioned
    pub machine_id: Option<String>,

    /// SHA-256 hex of the current access token
    pub access_token_hash: String,

    pub lifecycle: Lifecycle,

    /// Bumped by the store on every write
    pub version: u64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_health_check_at: Option<DateTime<Utc>>,
}

impl Deployment {
    /// Create a new pending deployment
    pub fn new(
        name: String,
        package: String,
        runtime: RuntimeKind,
        env_vars: Vec<EnvVarSpec>,
        access_token_hash: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name,
            package,
            runtime,
            env_vars,
            machine_id: None,
            access_token_hash,
            lifecycle: Lifecycle::new(),
            version: 0,
            created_at: now,
            updated_at: now,
            last_health_check_at: None,
        }
    }

    pub fn state(&self) -> DeploymentState {
        self.lifecycle.state()
    }

    /// Run an event through the lifecycle and update the fields it owns
    pub fn apply(&mut self, event: &DeploymentEvent) -> Result<DeploymentState, GatewayError> {
        let state = self
            .lifecycle
            .process(event)
            .map_err(GatewayError::InvalidTransition)?;

        let now = Utc::now();
        match event {
            DeploymentEvent::MachineCreated(machine_id)
            | DeploymentEvent::Restart { machine_id } => {
                self.machine_id = Some(machine_id.clone());
            }
            DeploymentEvent::ProbeSucceeded | DeploymentEvent::ProbeFailed { .. } => {
                self.last_health_check_at = Some(now);
            }
            _ => {}
        }
        self.updated_at = now;

        Ok(state)
    }

    /// Internal address of the backend machine
    pub fn private_url(&self, app_name: &str, port: u16) -> Option<String> {
        self.machine_id
            .as_ref()
            .map(|machine_id| format!("http://{}.vm.{}.internal:{}", machine_id, app_name, port))
    }

    /// Public bridge endpoint for this deployment
    pub fn connection_url(&self, public_base_url: &str) -> String {
        format!("{}/mcp/{}", public_base_url.trim_end_matches('/'), self.id)
    }

    pub fn to_response(&self, public_base_url: &str, credentials: &CredentialSet) -> DeploymentResponse {
        DeploymentResponse {
            id: self.id,
            name: self.name.clone(),
            package: self.package.clone(),
            runtime: self.runtime.clone(),
            env_vars: self.env_vars.clone(),
            credentials: credentials.masked(),
            state: self.state().to_string(),
            message: self.lifecycle.message().map(str::to_string),
            error_message: self.lifecycle.error().map(str::to_string),
            machine_id: self.machine_id.clone(),
            connection_url: self.connection_url(public_base_url),
            created_at: self.created_at,
            updated_at: self.updated_at,
            last_health_check_at: self.last_health_check_at,
        }
    }
}

/// Plaintext bearer token. Only its hash is ever persisted.
#[derive(Clone)]
pub struct AccessToken(SecretString);

impl AccessToken {
    pub fn generate() -> Self {
        Self(SecretString::from(generate_token()))
    }

    pub fn hash(&self) -> String {
        sha256_hash(self.0.expose_secret().as_bytes())
    }

    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AccessToken([REDACTED])")
    }
}

/// Environment variable values for one deployment
#[derive(Clone, Default)]
pub struct CredentialSet {
    values: BTreeMap<String, SecretString>,
}

impl CredentialSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values
            .insert(name.into(), SecretString::from(value.into()));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Names only, for responses
    pub fn masked(&self) -> Vec<MaskedCredential> {
        self.values
            .keys()
            .map(|name| MaskedCredential {
                name: name.clone(),
                present: true,
            })
            .collect()
    }

    /// Plain values for the create-machine request and the credentials file
    pub fn expose(&self) -> HashMap<String, String> {
        self.values
            .iter()
            .map(|(name, value)| (name.clone(), value.expose_secret().to_string()))
            .collect()
    }
}

impl From<HashMap<String, String>> for CredentialSet {
    fn from(values: HashMap<String, String>) -> Self {
        let mut set = CredentialSet::new();
        for (name, value) in values {
            set.insert(name, value);
        }
        set
    }
}

impl std::fmt::Debug for CredentialSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialSet")
            .field("names", &self.values.keys().collect::<Vec<_>>())
            .finish()
    }
}
