//! File-backed deployment store

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::deploy::fsm::DeploymentEvent;
use crate::errors::GatewayError;
use crate::filesys::file::File;
use crate::models::deployment::{CredentialSet, Deployment};
use crate::store::memory::MemoryStore;
use crate::store::DeploymentStore;

#[derive(Debug, Default, Serialize, Deserialize)]
struct DeploymentsSnapshot {
    deployments: Vec<Deployment>,
}

#[derive(Default, Serialize, Deserialize)]
struct CredentialsSnapshot {
    credentials: HashMap<Uuid, HashMap<String, String>>,
}

/// Memory store that rewrites a JSON snapshot after every mutation.
///
/// Records and credentials go to separate files; both are replaced atomically
/// and the credentials file is owner-readable only.
pub struct FileStore {
    records: MemoryStore,
    deployments_file: File,
    credentials_file: File,
    // serializes mutate-then-snapshot so files never go backwards
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Open the store, loading any existing snapshot
    pub async fn open(
        deployments_file: File,
        credentials_file: File,
    ) -> Result<Self, GatewayError> {
        let records = MemoryStore::new();

        if deployments_file.exists().await {
            let snapshot: DeploymentsSnapshot = deployments_file.read_json().await?;
            let mut credentials = if credentials_file.exists().await {
                credentials_file.read_json::<CredentialsSnapshot>().await?.credentials
            } else {
                HashMap::new()
            };

            let count = snapshot.deployments.len();
            for deployment in snapshot.deployments {
                let creds = credentials
                    .remove(&deployment.id)
                    .map(CredentialSet::from)
                    .unwrap_or_default();
                records.insert_sync(deployment, creds)?;
            }
            info!(
                "Loaded {} deployments from {}",
                count,
                deployments_file.path().display()
            );
        }

        Ok(Self {
            records,
            deployments_file,
            credentials_file,
            write_lock: Mutex::new(()),
        })
    }

    async fn persist(&self) -> Result<(), GatewayError> {
        let exported = self.records.export();

        let mut deployments = Vec::with_capacity(exported.len());
        let mut credentials = HashMap::with_capacity(exported.len());
        for (deployment, creds) in exported {
            if !creds.is_empty() {
                credentials.insert(deployment.id, creds.expose());
            }
            deployments.push(deployment);
        }
        deployments.sort_by_key(|d| d.created_at);

        self.deployments_file
            .write_json_atomic(&DeploymentsSnapshot { deployments })
            .await?;
        self.credentials_file
            .write_json_atomic(&CredentialsSnapshot { credentials })
            .await?;

        debug!("Persisted deployment snapshot");
        Ok(())
    }

    /// Apply one change to the records of `id` and persist it. If the
    /// snapshot cannot be written the change is undone in memory too.
    async fn commit<T>(
        &self,
        id: Uuid,
        change: impl FnOnce(&MemoryStore) -> Result<T, GatewayError>,
    ) -> Result<T, GatewayError> {
        let _guard = self.write_lock.lock().await;
        let checkpoint = self.records.checkpoint(id);
        let result = change(&self.records)?;

        if let Err(e) = self.persist().await {
            warn!("Failed to persist deployment {}, rolling back: {}", id, e);
            self.records.restore(id, checkpoint);
            return Err(e);
        }
        Ok(result)
    }
}

#[async_trait]
impl DeploymentStore for FileStore {
    async fn insert(
        &self,
        deployment: Deployment,
        credentials: CredentialSet,
    ) -> Result<Deployment, GatewayError> {
        let id = deployment.id;
        self.commit(id, |records| records.insert_sync(deployment, credentials))
            .await
    }

    async fn get(&self, id: Uuid) -> Result<Option<Deployment>, GatewayError> {
        Ok(self.records.get_sync(id))
    }

    async fn list(&self) -> Result<Vec<Deployment>, GatewayError> {
        Ok(self.records.list_sync())
    }

    async fn credentials(&self, id: Uuid) -> Result<Option<CredentialSet>, GatewayError> {
        Ok(self.records.credentials_sync(id))
    }

    async fn compare_and_transition(
        &self,
        id: Uuid,
        expected_version: u64,
        event: &DeploymentEvent,
    ) -> Result<Deployment, GatewayError> {
        self.commit(id, |records| {
            records.transition_sync(id, Some(expected_version), event)
        })
        .await
    }

    async fn transition(
        &self,
        id: Uuid,
        event: &DeploymentEvent,
    ) -> Result<Deployment, GatewayError> {
        self.commit(id, |records| records.transition_sync(id, None, event))
            .await
    }

    async fn replace_token_hash(
        &self,
        id: Uuid,
        new_hash: String,
    ) -> Result<Deployment, GatewayError> {
        self.commit(id, |records| records.replace_token_hash_sync(id, new_hash))
            .await
    }

    async fn remove(&self, id: Uuid) -> Result<Option<Deployment>, GatewayError> {
        if self.records.get_sync(id).is_none() {
            return Ok(None);
        }
        self.commit(id, |records| Ok(records.remove_sync(id))).await
    }
}
