//! Machines API client

use machines_api::models::{CreateMachineRequest, LogEntry, LogsResponse, Machine};

use crate::errors::GatewayError;
use crate::http::client::HttpClient;

impl HttpClient {
    /// Create a machine under `app`
    pub async fn create_machine(
        &self,
        app: &str,
        request: &CreateMachineRequest,
    ) -> Result<Machine, GatewayError> {
        let path = format!("/apps/{}/machines", app);
        self.post(&path, request).await
    }

    /// Get a machine; `None` if it does not exist
    pub async fn get_machine(&self, app: &str, id: &str) -> Result<Option<Machine>, GatewayError> {
        let path = format!("/apps/{}/machines/{}", app, id);
        self.get_optional(&path).await
    }

    pub async fn start_machine(&self, app: &str, id: &str) -> Result<(), GatewayError> {
        let path = format!("/apps/{}/machines/{}/start", app, id);
        self.post_empty(&path).await
    }

    pub async fn stop_machine(&self, app: &str, id: &str) -> Result<(), GatewayError> {
        let path = format!("/apps/{}/machines/{}/stop", app, id);
        self.post_empty(&path).await
    }

    /// Force-destroy a machine; false if it was already gone
    pub async fn destroy_machine(&self, app: &str, id: &str) -> Result<bool, GatewayError> {
        let path = format!("/apps/{}/machines/{}?force=true", app, id);
        self.delete(&path).await
    }

    pub async fn get_machine_logs(&self, app: &str, id: &str) -> Result<Vec<LogEntry>, GatewayError> {
        let path = format!("/apps/{}/machines/{}/logs", app, id);
        let response: Option<LogsResponse> = self.get_optional(&path).await?;
        Ok(response.map(|r| r.lines).unwrap_or_default())
    }
}
