//! HTTP adapter for the platform's REST API

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use errors::{SyncError, SyncResult};
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::debug;

use super::{DeviceRef, EntityKind, Readings, TelemetrySource};
use crate::timestamp::to_millis_epoch_13;

/// Connection settings for [`HttpSource`]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HttpSourceConfig {
    /// Base URL, e.g. `https://iot.example.com`
    pub base_url: String,
    /// Bearer token sent as `X-Authorization`
    pub token: Option<String>,
    /// Entities per page when listing devices and assets
    pub page_size: u32,
    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for HttpSourceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            token: None,
            page_size: 100,
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Page {
    #[serde(default)]
    data: Vec<JsonValue>,
    #[serde(default)]
    has_next: bool,
}

pub struct HttpSource {
    client: Client,
    base_url: String,
    token: Option<String>,
    page_size: u32,
}

impl HttpSource {
    pub fn new(config: &HttpSourceConfig) -> SyncResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            page_size: config.page_size.max(1),
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, String)],
    ) -> SyncResult<T> {
        let mut request = self
            .client
            .get(format!("{}{}", self.base_url, endpoint))
            .query(query);
        if let Some(token) = &self.token {
            request = request.header("X-Authorization", format!("Bearer {}", token));
        }

        let response = request.send().await.map_err(|e| request_error(endpoint, e))?;

        if response.status().is_success() {
            response
                .json()
                .await
                .map_err(|e| SyncError::remote(endpoint, format!("bad response body: {}", e)))
        } else {
            Err(SyncError::remote(
                endpoint,
                format!("HTTP {}", response.status()),
            ))
        }
    }
}

fn request_error(endpoint: &str, err: reqwest::Error) -> SyncError {
    if err.is_timeout() {
        SyncError::Timeout(endpoint.to_string())
    } else if err.is_connect() || err.is_request() {
        SyncError::remote(endpoint, err.to_string())
    } else {
        SyncError::HttpClient(err)
    }
}

#[async_trait]
impl TelemetrySource for HttpSource {
    async fn list_entities(&self, kind: EntityKind) -> SyncResult<Vec<JsonValue>> {
        let endpoint = match kind {
            EntityKind::Device => "/api/tenant/devices",
            EntityKind::Asset => "/api/tenant/assets",
        };

        let mut entities = Vec::new();
        let mut page_no = 0u32;
        loop {
            let page: Page = self
                .get_json(
                    endpoint,
                    &[
                        ("pageSize", self.page_size.to_string()),
                        ("page", page_no.to_string()),
                    ],
                )
                .await?;
            debug!("{} page {}: {} entities", endpoint, page_no, page.data.len());
            entities.extend(page.data);

            if !page.has_next {
                break;
            }
            page_no += 1;
        }
        Ok(entities)
    }

    async fn timeseries_keys(&self, device: &DeviceRef) -> SyncResult<Vec<String>> {
        let endpoint = format!("/api/plugins/telemetry/DEVICE/{}/keys/timeseries", device.id);
        self.get_json(&endpoint, &[]).await
    }

    async fn readings(
        &self,
        device: &DeviceRef,
        keys: &[String],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: u32,
    ) -> SyncResult<Readings> {
        let endpoint = format!(
            "/api/plugins/telemetry/DEVICE/{}/values/timeseries",
            device.id
        );
        self.get_json(
            &endpoint,
            &[
                ("keys", keys.join(",")),
                ("startTs", to_millis_epoch_13(start).to_string()),
                ("endTs", to_millis_epoch_13(end).to_string()),
                ("limit", limit.to_string()),
            ],
        )
        .await
    }
}
