//! Machine launch command and create request

use std::collections::HashMap;

use gangway_api::models::RuntimeKind;
use machines_api::models::GuestConfig;
use uuid::Uuid;

use crate::compute::MachineSpec;
use crate::models::deployment::CredentialSet;
use crate::validator::ValidatedPackage;

/// Machine launch options
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub image: String,
    pub guest: GuestConfig,
    /// Port the MCP server listens on inside the machine
    pub backend_port: u16,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            image: "ghcr.io/gangway/mcp-runner:latest".to_string(),
            guest: GuestConfig::default(),
            backend_port: 8080,
        }
    }
}

/// argv that starts the server inside the machine
pub fn launch_command(package: &ValidatedPackage) -> Vec<String> {
    match (package.runtime(), package.repository()) {
        (RuntimeKind::Custom { command }, _) => command.clone(),
        (RuntimeKind::Npm, Some(repo)) => vec![
            "npx".to_string(),
            "-y".to_string(),
            format!("github:{}/{}", repo.owner, repo.repo),
        ],
        (RuntimeKind::Npm, None) => vec![
            "npx".to_string(),
            "-y".to_string(),
            package.identifier().to_string(),
        ],
        (RuntimeKind::Python, Some(repo)) => vec![
            "uvx".to_string(),
            "--from".to_string(),
            format!("git+{}", repo.clone_url()),
            repo.repo.clone(),
        ],
        (RuntimeKind::Python, None) => vec!["uvx".to_string(), package.identifier().to_string()],
    }
}

/// Build the create-machine spec. Credentials are the only secret material
/// and travel nowhere else.
pub fn machine_spec(
    deployment_id: Uuid,
    package: &ValidatedPackage,
    credentials: &CredentialSet,
    options: &LaunchOptions,
) -> MachineSpec {
    let mut env = credentials.expose();
    env.insert("MCP_PACKAGE".to_string(), package.identifier().to_string());
    env.insert("MCP_RUNTIME".to_string(), package.runtime().as_str().to_string());
    env.insert("DEPLOYMENT_ID".to_string(), deployment_id.to_string());
    env.insert("PORT".to_string(), options.backend_port.to_string());
    if let Some(repo) = package.repository() {
        env.insert("MCP_REPOSITORY".to_string(), repo.clone_url());
    }

    let metadata = HashMap::from([
        ("deployment_id".to_string(), deployment_id.to_string()),
        ("runtime".to_string(), package.runtime().as_str().to_string()),
    ]);

    MachineSpec {
        name: format!("mcp-{}", deployment_id),
        image: options.image.clone(),
        cmd: launch_command(package),
        env,
        guest: options.guest.clone(),
        metadata,
    }
}
