//! Remote platform interface
//!
//! The collector and entity syncer only see [`TelemetrySource`]; the HTTP
//! adapter lives in [`http`].

pub mod http;

pub use http::{HttpSource, HttpSourceConfig};

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use errors::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Entity families mirrored from the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Device,
    Asset,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Device => "device",
            Self::Asset => "asset",
        }
    }
}

/// Identity of a remote device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRef {
    pub id: String,
    pub name: String,
}

impl DeviceRef {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }

    /// Read id and name out of a raw entity payload.
    ///
    /// The id is either a plain string or an entity reference
    /// `{"entityType": .., "id": ..}`.
    pub fn from_payload(payload: &JsonValue) -> SyncResult<Self> {
        let id = match payload.get("id") {
            Some(JsonValue::String(id)) => id.clone(),
            Some(JsonValue::Object(reference)) => reference
                .get("id")
                .and_then(JsonValue::as_str)
                .map(str::to_string)
                .ok_or_else(|| SyncError::InvalidInput("entity reference without id".into()))?,
            _ => return Err(SyncError::InvalidInput("entity payload without id".into())),
        };
        let name = payload
            .get("name")
            .and_then(JsonValue::as_str)
            .unwrap_or_default()
            .to_string();
        Ok(Self { id, name })
    }
}

/// One raw telemetry reading as the platform returns it
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawReading {
    /// 13-digit epoch value
    pub ts: i64,
    /// Numeric text, a number, or the `"NaN"` sentinel
    pub value: JsonValue,
}

/// Readings per timeseries key
pub type Readings = BTreeMap<String, Vec<RawReading>>;

/// Read-only view of the remote platform
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    /// Every entity of `kind`, as raw nested payloads
    async fn list_entities(&self, kind: EntityKind) -> SyncResult<Vec<JsonValue>>;

    /// Timeseries keys declared by a device
    async fn timeseries_keys(&self, device: &DeviceRef) -> SyncResult<Vec<String>>;

    /// Readings of `keys` within `[start, end]`, at most `limit` per key
    async fn readings(
        &self,
        device: &DeviceRef,
        keys: &[String],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: u32,
    ) -> SyncResult<Readings>;

    /// Every device, reduced to its identity
    async fn list_devices(&self) -> SyncResult<Vec<DeviceRef>> {
        self.list_entities(EntityKind::Device)
            .await?
            .iter()
            .map(DeviceRef::from_payload)
            .collect()
    }
}
