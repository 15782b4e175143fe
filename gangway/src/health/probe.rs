//! Liveness probe

use std::time::Duration;

use reqwest::Client;
use tracing::debug;

use crate::errors::GatewayError;

/// Result of one probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// `/status` answered 200
    Healthy,
    /// Reachable but not 200
    BadStatus(u16),
    /// Connect error or timeout
    Unreachable,
}

/// Probes `GET {backend}/status`
pub struct Prober {
    client: Client,
}

impl Prober {
    pub fn new(timeout: Duration) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self { client })
    }

    pub async fn probe(&self, base_url: &str) -> ProbeOutcome {
        let url = format!("{}/status", base_url.trim_end_matches('/'));
        match self.client.get(&url).send().await {
            Ok(response) if response.status().is_success() => ProbeOutcome::Healthy,
            Ok(response) => {
                debug!("Probe {} returned {}", url, response.status());
                ProbeOutcome::BadStatus(response.status().as_u16())
            }
            Err(e) => {
                debug!("Probe {} failed: {}", url, e);
                ProbeOutcome::Unreachable
            }
        }
    }
}
