//! HTTP client implementation

use std::time::Duration;

use reqwest::{header, Client, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, error};

use crate::errors::GatewayError;

/// Longest upstream error body kept in an error message
const MAX_ERROR_BODY: usize = 512;

/// HTTP client for the compute provisioner API
pub struct HttpClient {
    client: Client,
    base_url: String,
    token: Option<SecretString>,
}

impl HttpClient {
    /// Create a new HTTP client
    pub fn new(
        base_url: &str,
        token: Option<SecretString>,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.header(
                header::AUTHORIZATION,
                format!("Bearer {}", token.expose_secret()),
            ),
            None => request,
        }
    }

    async fn send(&self, method: &str, request: RequestBuilder) -> Result<Response, GatewayError> {
        let response = self.authorize(request).send().await.map_err(|e| {
            error!("HTTP {} failed: {}", method, e);
            GatewayError::ProvisionerError(e.to_string())
        })?;
        Ok(response)
    }

    async fn fail(method: &str, response: Response) -> GatewayError {
        let status = response.status();
        let mut body = response.text().await.unwrap_or_default();
        if body.len() > MAX_ERROR_BODY {
            let mut end = MAX_ERROR_BODY;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            body.truncate(end);
        }
        error!("HTTP {} failed: {} - {}", method, status, body);
        GatewayError::ProvisionerError(format!("{}: {}", status, body))
    }

    /// Make a GET request; `None` on 404
    pub async fn get_optional<T: DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<Option<T>, GatewayError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("GET {}", url);

        let response = self.send("GET", self.client.get(&url)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Self::fail("GET", response).await);
        }

        let body = response.json().await?;
        Ok(Some(body))
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, GatewayError> {
        self.get_optional(path)
            .await?
            .ok_or_else(|| GatewayError::ProvisionerError(format!("{} not found", path)))
    }

    /// Make a POST request
    pub async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, GatewayError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("POST {}", url);

        let response = self.send("POST", self.client.post(&url).json(body)).await?;
        if !response.status().is_success() {
            return Err(Self::fail("POST", response).await);
        }

        let body = response.json().await?;
        Ok(body)
    }

    /// Make a POST request without a body, ignoring the response body
    pub async fn post_empty(&self, path: &str) -> Result<(), GatewayError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("POST {}", url);

        let response = self.send("POST", self.client.post(&url)).await?;
        if !response.status().is_success() {
            return Err(Self::fail("POST", response).await);
        }
        Ok(())
    }

    /// Make a DELETE request; false when the resource was already gone
    pub async fn delete(&self, path: &str) -> Result<bool, GatewayError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("DELETE {}", url);

        let response = self.send("DELETE", self.client.delete(&url)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if !response.status().is_success() {
            return Err(Self::fail("DELETE", response).await);
        }
        Ok(true)
    }
}
