//! Device and asset mirroring

use std::sync::Arc;

use errors::{SyncError, SyncResult};
use serde_json::{Map, Value as JsonValue};
use tracing::{debug, error, info};

use crate::flatten::flatten;
use crate::reconciler::Reconciler;
use crate::record::{FieldValue, Record};
use crate::report::RunReport;
use crate::schema::{ASSETS, DEVICES};
use crate::source::{EntityKind, TelemetrySource};
use crate::timestamp::to_instant;

/// Field holding the creation time as a 13-digit epoch value
pub const CREATED_TIME_FIELD: &str = "createdTime";

pub fn collection_for(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Device => DEVICES,
        EntityKind::Asset => ASSETS,
    }
}

pub struct EntitySyncer {
    source: Arc<dyn TelemetrySource>,
    reconciler: Arc<Reconciler>,
}

impl EntitySyncer {
    pub fn new(source: Arc<dyn TelemetrySource>, reconciler: Arc<Reconciler>) -> Self {
        Self { source, reconciler }
    }

    /// Mirror every remote entity of `kind` into its collection
    pub async fn sync(&self, kind: EntityKind) -> SyncResult<RunReport> {
        let collection = collection_for(kind);
        let entities = self.source.list_entities(kind).await?;
        info!("{} {} entities fetched", entities.len(), kind.as_str());

        let mut report = RunReport::new();
        for payload in &entities {
            let outcome = match entity_record(payload) {
                Ok(record) => self.reconciler.reconcile(collection, &record).await,
                Err(e) => Err(e),
            };
            match outcome {
                Ok(outcome) => {
                    debug!("{} {}: {}", kind.as_str(), entity_label(payload), outcome.as_str());
                    report.record(outcome);
                },
                Err(e) if e.is_fatal() => {
                    error!("Aborting {} sync: {}", kind.as_str(), e);
                    return Err(e);
                },
                Err(e) => {
                    debug!("{} {} failed: {}", kind.as_str(), entity_label(payload), e);
                    report.record_failure(&e);
                },
            }
        }

        report.log_summary(&format!("{} sync", kind.as_str()));
        Ok(report)
    }
}

fn entity_label(payload: &JsonValue) -> String {
    payload
        .get("name")
        .and_then(JsonValue::as_str)
        .unwrap_or("<unnamed>")
        .to_string()
}

/// `{"entityType": "DEVICE", "id": "..."}`
fn as_entity_ref(value: &JsonValue) -> Option<&str> {
    let map = value.as_object()?;
    if map.contains_key("entityType") {
        map.get("id").and_then(JsonValue::as_str)
    } else {
        None
    }
}

/// Entity payload -> flat record for its collection.
///
/// Entity references collapse to their id under the parent key before
/// flattening, so `"tenantId": {"entityType": "TENANT", "id": "t1"}` becomes
/// `tenantId = "t1"` instead of clobbering `id`.
pub fn entity_record(payload: &JsonValue) -> SyncResult<Record> {
    let map = payload
        .as_object()
        .ok_or_else(|| SyncError::InvalidInput("entity payload is not an object".into()))?;

    let collapsed: Map<String, JsonValue> = map
        .iter()
        .map(|(key, value)| {
            let value = match as_entity_ref(value) {
                Some(id) => JsonValue::String(id.to_string()),
                None => value.clone(),
            };
            (key.clone(), value)
        })
        .collect();

    let mut record = flatten(&JsonValue::Object(collapsed))?;
    if let Some(created) = record.get(CREATED_TIME_FIELD).cloned() {
        let converted = match created {
            FieldValue::Int(ms) => FieldValue::Timestamp(to_instant(ms)?),
            FieldValue::Null => FieldValue::Null,
            other => {
                return Err(SyncError::InvalidInput(format!(
                    "{} is not an epoch value: {}",
                    CREATED_TIME_FIELD, other
                )))
            },
        };
        record.insert(CREATED_TIME_FIELD.to_string(), converted);
    }
    Ok(record)
}
