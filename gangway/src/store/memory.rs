//! In-memory deployment store

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use uuid::Uuid;

use crate::deploy::fsm::DeploymentEvent;
use crate::errors::GatewayError;
use crate::models::deployment::{CredentialSet, Deployment};
use crate::store::DeploymentStore;

struct Entry {
    deployment: Deployment,
    credentials: CredentialSet,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<Uuid, Entry>,
    // access token hash -> deployment
    token_index: HashMap<String, Uuid>,
}

/// Deployment store backed by a single lock over all records
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert_sync(
        &self,
        mut deployment: Deployment,
        credentials: CredentialSet,
    ) -> Result<Deployment, GatewayError> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());

        if inner.entries.contains_key(&deployment.id) {
            return Err(GatewayError::Conflict(format!(
                "deployment {} already exists",
                deployment.id
            )));
        }
        if inner.token_index.contains_key(&deployment.access_token_hash) {
            return Err(GatewayError::Conflict(
                "access token already issued to another deployment".to_string(),
            ));
        }

        deployment.version = deployment.version.max(1);
        inner
            .token_index
            .insert(deployment.access_token_hash.clone(), deployment.id);
        inner.entries.insert(
            deployment.id,
            Entry {
                deployment: deployment.clone(),
                credentials,
            },
        );
        Ok(deployment)
    }

    pub(crate) fn get_sync(&self, id: Uuid) -> Option<Deployment> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.entries.get(&id).map(|entry| entry.deployment.clone())
    }

    pub(crate) fn list_sync(&self) -> Vec<Deployment> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let mut deployments: Vec<Deployment> = inner
            .entries
            .values()
            .map(|entry| entry.deployment.clone())
            .collect();
        deployments.sort_by_key(|d| d.created_at);
        deployments
    }

    pub(crate) fn credentials_sync(&self, id: Uuid) -> Option<CredentialSet> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.entries.get(&id).map(|entry| entry.credentials.clone())
    }

    pub(crate) fn transition_sync(
        &self,
        id: Uuid,
        expected_version: Option<u64>,
        event: &DeploymentEvent,
    ) -> Result<Deployment, GatewayError> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let entry = inner
            .entries
            .get_mut(&id)
            .ok_or_else(|| GatewayError::NotFound(id.to_string()))?;

        if let Some(expected) = expected_version {
            if entry.deployment.version != expected {
                return Err(GatewayError::Conflict(format!(
                    "deployment {} changed (expected version {}, found {})",
                    id, expected, entry.deployment.version
                )));
            }
        }

        // Apply on a copy so a rejected event leaves the record untouched
        let mut updated = entry.deployment.clone();
        updated.apply(event)?;
        updated.version += 1;
        entry.deployment = updated.clone();
        Ok(updated)
    }

    pub(crate) fn replace_token_hash_sync(
        &self,
        id: Uuid,
        new_hash: String,
    ) -> Result<Deployment, GatewayError> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());

        if let Some(owner) = inner.token_index.get(&new_hash) {
            if *owner != id {
                return Err(GatewayError::Conflict(
                    "access token already issued to another deployment".to_string(),
                ));
            }
        }

        let entry = inner
            .entries
            .get_mut(&id)
            .ok_or_else(|| GatewayError::NotFound(id.to_string()))?;
        let old_hash = std::mem::replace(&mut entry.deployment.access_token_hash, new_hash.clone());
        entry.deployment.version += 1;
        entry.deployment.updated_at = chrono::Utc::now();
        let updated = entry.deployment.clone();

        inner.token_index.remove(&old_hash);
        inner.token_index.insert(new_hash, id);
        Ok(updated)
    }

    pub(crate) fn remove_sync(&self, id: Uuid) -> Option<Deployment> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let entry = inner.entries.remove(&id)?;
        inner.token_index.remove(&entry.deployment.access_token_hash);
        Some(entry.deployment)
    }

    /// Copy of one entry, so a failed persist can put it back
    pub(crate) fn checkpoint(&self, id: Uuid) -> Option<(Deployment, CredentialSet)> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner
            .entries
            .get(&id)
            .map(|entry| (entry.deployment.clone(), entry.credentials.clone()))
    }

    /// Put an entry back as it was at [`MemoryStore::checkpoint`]; `None` removes it
    pub(crate) fn restore(&self, id: Uuid, checkpoint: Option<(Deployment, CredentialSet)>) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if let Some(current) = inner.entries.remove(&id) {
            inner.token_index.remove(&current.deployment.access_token_hash);
        }
        if let Some((deployment, credentials)) = checkpoint {
            inner
                .token_index
                .insert(deployment.access_token_hash.clone(), id);
            inner.entries.insert(
                id,
                Entry {
                    deployment,
                    credentials,
                },
            );
        }
    }

    /// Every record with its credentials, for snapshots
    pub(crate) fn export(&self) -> Vec<(Deployment, CredentialSet)> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner
            .entries
            .values()
            .map(|entry| (entry.deployment.clone(), entry.credentials.clone()))
            .collect()
    }
}

#[async_trait]
impl DeploymentStore for MemoryStore {
    async fn insert(
        &self,
        deployment: Deployment,
        credentials: CredentialSet,
    ) -> Result<Deployment, GatewayError> {
        self.insert_sync(deployment, credentials)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Deployment>, GatewayError> {
        Ok(self.get_sync(id))
    }

    async fn list(&self) -> Result<Vec<Deployment>, GatewayError> {
        Ok(self.list_sync())
    }

    async fn credentials(&self, id: Uuid) -> Result<Option<CredentialSet>, GatewayError> {
        Ok(self.credentials_sync(id))
    }

    async fn compare_and_transition(
        &self,
        id: Uuid,
        expected_version: u64,
        event: &DeploymentEvent,
    ) -> Result<Deployment, GatewayError> {
        self.transition_sync(id, Some(expected_version), event)
    }

    async fn transition(
        &self,
        id: Uuid,
        event: &DeploymentEvent,
    ) -> Result<Deployment, GatewayError> {
        self.transition_sync(id, None, event)
    }

    async fn replace_token_hash(
        &self,
        id: Uuid,
        new_hash: String,
    ) -> Result<Deployment, GatewayError> {
        self.replace_token_hash_sync(id, new_hash)
    }

    async fn remove(&self, id: Uuid) -> Result<Option<Deployment>, GatewayError> {
        Ok(self.remove_sync(id))
    }
}
