use async_trait::async_trait;
use std::time::Duration;

use crate::{models::WriteRequest, Result, TelemetryError};

/// Destination for simulated readings.
#[async_trait]
pub trait ReadingSink: Send + Sync {
    async fn submit(&self, request: &WriteRequest) -> Result<()>;
}

/// Posts readings to a running service's ingestion endpoint, exactly as an
/// external device would.
#[derive(Debug, Clone)]
pub struct HttpSink {
    client: reqwest::Client,
    write_url: String,
}

impl HttpSink {
    pub fn new(api_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TelemetryError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            write_url: format!("{}/data/", api_url.trim_end_matches('/')),
        })
    }

    pub fn write_url(&self) -> &str {
        &self.write_url
    }
}

#[async_trait]
impl ReadingSink for HttpSink {
    async fn submit(&self, request: &WriteRequest) -> Result<()> {
        let response = self
            .client
            .post(&self.write_url)
            .json(request)
            .send()
            .await
            .map_err(|e| TelemetryError::Submission(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(TelemetryError::Submission(format!("{} - {}", status, body)))
        }
    }
}
