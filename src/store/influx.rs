use async_trait::async_trait;
use reqwest::{
    header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
    Response, StatusCode,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use super::{annotated_csv, RawRow, TimeSeriesStore};
use crate::{config::InfluxConfig, point::Point, Result, TelemetryError};

/// Client for the InfluxDB v2 HTTP API.
///
/// Writes are synchronous: `write` returns only after the server has
/// answered. Every call is bounded by the configured timeout and nothing
/// is retried here.
#[derive(Debug, Clone)]
pub struct InfluxClient {
    client: reqwest::Client,
    url: String,
    token: String,
    org: String,
    bucket: String,
}

#[derive(Serialize)]
struct QueryBody<'a> {
    query: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    dialect: Dialect,
}

#[derive(Serialize)]
struct Dialect {
    header: bool,
    delimiter: &'static str,
    annotations: Vec<String>,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

impl InfluxClient {
    pub fn new(config: &InfluxConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| TelemetryError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: config.url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            org: config.org.clone(),
            bucket: config.bucket.clone(),
        })
    }

    fn auth_header(&self) -> String {
        format!("Token {}", self.token)
    }
}

#[async_trait]
impl TimeSeriesStore for InfluxClient {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    #[instrument(skip(self, point), fields(measurement = point.measurement()))]
    async fn write(&self, point: &Point) -> Result<()> {
        let line = point.to_line_protocol()?;

        let response = self
            .client
            .post(format!("{}/api/v2/write", self.url))
            .query(&[
                ("org", self.org.as_str()),
                ("bucket", self.bucket.as_str()),
                ("precision", "ns"),
            ])
            .header(AUTHORIZATION, self.auth_header())
            .header(CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(line)
            .send()
            .await
            .map_err(unavailable)?;

        let status = response.status();
        if status.is_success() {
            debug!("Point accepted");
            return Ok(());
        }

        let message = error_message(response).await;
        warn!(%status, "Write failed: {}", message);
        if is_transient(status) {
            Err(TelemetryError::StoreUnavailable(format!("{}: {}", status, message)))
        } else {
            Err(TelemetryError::StoreRejected(format!("{}: {}", status, message)))
        }
    }

    #[instrument(skip(self, flux))]
    async fn query(&self, flux: &str) -> Result<Vec<RawRow>> {
        let body = QueryBody {
            query: flux,
            kind: "flux",
            dialect: Dialect {
                header: true,
                delimiter: ",",
                annotations: Vec::new(),
            },
        };

        let response = self
            .client
            .post(format!("{}/api/v2/query", self.url))
            .query(&[("org", self.org.as_str())])
            .header(AUTHORIZATION, self.auth_header())
            .header(ACCEPT, "application/csv")
            .json(&body)
            .send()
            .await
            .map_err(unavailable)?;

        let status = response.status();
        if !status.is_success() {
            let message = error_message(response).await;
            warn!(%status, "Query failed: {}", message);
            return if is_transient(status) {
                Err(TelemetryError::StoreUnavailable(format!("{}: {}", status, message)))
            } else {
                Err(TelemetryError::QuerySyntax(format!("{}: {}", status, message)))
            };
        }

        let text = response.text().await.map_err(unavailable)?;
        let rows = annotated_csv::parse(&text)?;
        debug!(rows = rows.len(), "Query returned");
        Ok(rows)
    }

    async fn ping(&self) -> Result<()> {
        let response = self
            .client
            .get(format!("{}/ping", self.url))
            .send()
            .await
            .map_err(unavailable)?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(TelemetryError::StoreUnavailable(format!(
                "ping returned {}",
                response.status()
            )))
        }
    }
}

fn is_transient(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

fn unavailable(err: reqwest::Error) -> TelemetryError {
    if err.is_timeout() {
        TelemetryError::StoreUnavailable(format!("request timed out: {}", err))
    } else {
        TelemetryError::StoreUnavailable(err.to_string())
    }
}

async fn error_message(response: Response) -> String {
    let text = response.text().await.unwrap_or_default();
    serde_json::from_str::<ErrorBody>(&text)
        .map(|body| body.message)
        .unwrap_or(text)
}
