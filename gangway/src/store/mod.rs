//! Deployment persistence
//!
//! Every write goes through a [`DeploymentStore`]. Records carry a version
//! counter that is bumped on each write; lifecycle writes made on the basis of
//! an earlier read use [`DeploymentStore::compare_and_transition`] and are
//! rejected with [`GatewayError::Conflict`] when the record moved on.

pub mod file;
pub mod logs;
pub mod memory;

use async_trait::async_trait;
use uuid::Uuid;

use crate::deploy::fsm::DeploymentEvent;
use crate::errors::GatewayError;
use crate::models::deployment::{CredentialSet, Deployment};

pub use file::FileStore;
pub use logs::LogBuffer;
pub use memory::MemoryStore;

#[async_trait]
pub trait DeploymentStore: Send + Sync {
    /// Insert a new record with its credential set.
    ///
    /// Fails with `Conflict` if the id or the token hash is already taken.
    async fn insert(
        &self,
        deployment: Deployment,
        credentials: CredentialSet,
    ) -> Result<Deployment, GatewayError>;

    async fn get(&self, id: Uuid) -> Result<Option<Deployment>, GatewayError>;

    async fn list(&self) -> Result<Vec<Deployment>, GatewayError>;

    async fn credentials(&self, id: Uuid) -> Result<Option<CredentialSet>, GatewayError>;

    /// Apply `event` only if the record is still at `expected_version`
    async fn compare_and_transition(
        &self,
        id: Uuid,
        expected_version: u64,
        event: &DeploymentEvent,
    ) -> Result<Deployment, GatewayError>;

    /// Apply `event` to whatever the current record is
    async fn transition(&self, id: Uuid, event: &DeploymentEvent)
        -> Result<Deployment, GatewayError>;

    /// Swap the access token hash. The old hash stops matching immediately.
    async fn replace_token_hash(&self, id: Uuid, new_hash: String)
        -> Result<Deployment, GatewayError>;

    /// Remove the record and its credentials; `None` if it was already gone
    async fn remove(&self, id: Uuid) -> Result<Option<Deployment>, GatewayError>;
}
