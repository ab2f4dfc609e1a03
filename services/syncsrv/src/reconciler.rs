//! Upsert reconciler
//!
//! Writes one flat record into a collection, inserting it when its natural
//! key is new and updating the existing row otherwise:
//!
//! ```text
//! Start -> AttemptInsert -> Committed                       => Inserted
//!                        -> ConflictDetected -> AttemptUpdate
//!          AttemptUpdate -> Committed                       => Updated
//!                        -> NoRowsAffected                  => Unchanged
//!                        -> ConflictDetected                => Unchanged (warn)
//!                        -> more than one row               => MultiRowMutation
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use errors::{SyncError, SyncResult};
use serde::Serialize;
use tracing::{debug, warn};

use crate::record::{FieldValue, Record};
use crate::schema::SchemaReflector;
use crate::statement::{
    delete_statement, insert_statement, non_key_fields, select_statement, update_statement,
    Statement,
};
use crate::store::{Store, StoreError};

/// Terminal state of a successful reconcile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SyncOutcome {
    Inserted,
    Updated,
    Unchanged,
}

impl SyncOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inserted => "inserted",
            Self::Updated => "updated",
            Self::Unchanged => "unchanged",
        }
    }
}

/// Statements and key layout for one collection, built once per run
struct CollectionPlan {
    fields: Arc<Vec<String>>,
    /// Fields the insert binds: every field except a store-assigned rowid
    write_fields: Vec<String>,
    conflict_keys: Arc<Vec<String>>,
    insert: Statement,
    /// None when every field is part of the natural key
    update: Option<Statement>,
    /// Non-key fields in the order the update binds them
    update_fields: Vec<String>,
}

pub struct Reconciler {
    store: Arc<dyn Store>,
    reflector: Arc<SchemaReflector>,
    plans: DashMap<String, Arc<CollectionPlan>>,
    /// (collection, field) pairs already reported as absent or unknown
    reported: DashSet<(String, String)>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn Store>, reflector: Arc<SchemaReflector>) -> Self {
        Self {
            store,
            reflector,
            plans: DashMap::new(),
            reported: DashSet::new(),
        }
    }

    pub fn reflector(&self) -> &Arc<SchemaReflector> {
        &self.reflector
    }

    async fn plan(&self, collection: &str) -> SyncResult<Arc<CollectionPlan>> {
        if let Some(plan) = self.plans.get(collection) {
            return Ok(Arc::clone(&plan));
        }

        let fields = self.reflector.fields(collection).await?;
        let conflict_keys = self.reflector.conflict_keys(collection).await?;
        let columns = self.reflector.columns(collection).await?;

        // A lone INTEGER PRIMARY KEY that is not the natural key is left to the store
        let pk: Vec<_> = columns.iter().filter(|c| c.pk > 0).collect();
        let rowid = match pk.as_slice() {
            [only] if only.is_integer_type() && !conflict_keys.contains(&only.name) => {
                Some(only.name.as_str())
            },
            _ => None,
        };
        let write_fields: Vec<String> = fields
            .iter()
            .filter(|f| Some(f.as_str()) != rowid)
            .cloned()
            .collect();
        let insert = insert_statement(&write_fields, collection)?;

        let update_fields: Vec<String> = non_key_fields(&write_fields, &conflict_keys)
            .into_iter()
            .cloned()
            .collect();
        let update = if conflict_keys.is_empty() || update_fields.is_empty() {
            None
        } else {
            Some(update_statement(&write_fields, collection, &conflict_keys)?)
        };

        let plan = Arc::new(CollectionPlan {
            fields,
            write_fields,
            conflict_keys,
            insert,
            update,
            update_fields,
        });
        self.plans
            .insert(collection.to_string(), Arc::clone(&plan));
        Ok(plan)
    }

    /// Value of `field`, or null when the record lacks it (reported once)
    fn value_of(&self, collection: &str, record: &Record, field: &str) -> FieldValue {
        match record.get(field) {
            Some(value) => value.clone(),
            None => {
                if self
                    .reported
                    .insert((collection.to_string(), field.to_string()))
                {
                    debug!(
                        "{}: record has no {}, substituting null",
                        collection, field
                    );
                }
                FieldValue::Null
            },
        }
    }

    fn report_unknown_fields(&self, collection: &str, plan: &CollectionPlan, record: &Record) {
        for key in record.keys() {
            if !plan.fields.contains(key)
                && self.reported.insert((collection.to_string(), key.clone()))
            {
                debug!("{}: ignoring field {} not in the table", collection, key);
            }
        }
    }

    fn key_values(
        &self,
        collection: &str,
        conflict_keys: &[String],
        record: &Record,
    ) -> SyncResult<Vec<FieldValue>> {
        conflict_keys
            .iter()
            .map(|key| match record.get(key) {
                Some(value) if !value.is_null() => Ok(value.clone()),
                _ => Err(SyncError::MissingConflictValue {
                    collection: collection.to_string(),
                    field: key.clone(),
                }),
            })
            .collect()
    }

    /// Insert `record` into `collection`, or update the row sharing its
    /// natural key.
    ///
    /// A record without a value for every natural-key field is rejected
    /// before any statement runs.
    pub async fn reconcile(&self, collection: &str, record: &Record) -> SyncResult<SyncOutcome> {
        let plan = self.plan(collection).await?;
        self.report_unknown_fields(collection, &plan, record);

        let key_values = self.key_values(collection, &plan.conflict_keys, record)?;
        let values: Vec<FieldValue> = plan
            .write_fields
            .iter()
            .map(|f| self.value_of(collection, record, f))
            .collect();

        // AttemptInsert
        match self.store.execute(&plan.insert, &values).await {
            Ok(0) => debug!("{}: insert affected no rows, trying update", collection),
            Ok(_) => return Ok(SyncOutcome::Inserted),
            Err(StoreError::UniquenessViolation(msg)) => {
                debug!("{}: insert conflict ({}), trying update", collection, msg);
            },
            Err(e) => return Err(e.into()),
        }

        // AttemptUpdate
        let Some(update) = plan.update.as_ref() else {
            if plan.conflict_keys.is_empty() {
                return Err(SyncError::InvalidInput(format!(
                    "{} has no natural key to update by",
                    collection
                )));
            }
            // Every field is part of the key, so the existing row already matches
            return Ok(SyncOutcome::Unchanged);
        };

        let mut update_values: Vec<FieldValue> = plan
            .update_fields
            .iter()
            .map(|f| self.value_of(collection, record, f))
            .collect();
        update_values.extend(key_values);

        match self.store.execute_single(update, &update_values).await {
            Ok(0) => Ok(SyncOutcome::Unchanged),
            Ok(1) => Ok(SyncOutcome::Updated),
            Ok(rows) => Err(SyncError::MultiRowMutation {
                collection: collection.to_string(),
                rows,
            }),
            Err(StoreError::UniquenessViolation(msg)) => {
                warn!(
                    "{}: update would break a unique constraint, row left as is: {}",
                    collection, msg
                );
                Ok(SyncOutcome::Unchanged)
            },
            Err(e) => Err(e.into()),
        }
    }

    /// Delete the row addressed by the natural key of `record`.
    ///
    /// Returns the number of rows removed (0 or 1).
    pub async fn delete(&self, collection: &str, record: &Record) -> SyncResult<u64> {
        let plan = self.plan(collection).await?;
        let stmt = delete_statement(collection, &plan.conflict_keys)?;
        let key_values = self.key_values(collection, &plan.conflict_keys, record)?;

        match self.store.execute_single(&stmt, &key_values).await? {
            rows @ (0 | 1) => Ok(rows),
            rows => Err(SyncError::MultiRowMutation {
                collection: collection.to_string(),
                rows,
            }),
        }
    }

    /// Read one field of the row addressed by the natural key of `record`
    pub async fn lookup(
        &self,
        collection: &str,
        field: &str,
        record: &Record,
    ) -> SyncResult<Option<FieldValue>> {
        let plan = self.plan(collection).await?;
        if !plan.fields.iter().any(|f| f == field) {
            return Err(SyncError::InvalidInput(format!(
                "{} has no field {}",
                collection, field
            )));
        }
        let stmt = select_statement(field, collection, &plan.conflict_keys)?;
        let key_values = self.key_values(collection, &plan.conflict_keys, record)?;
        let value = self.store.fetch_value(&stmt, &key_values).await?;

        let columns = self.reflector.columns(collection).await?;
        let is_timestamp = columns
            .iter()
            .any(|c| c.name == field && c.is_timestamp());
        Ok(match value {
            Some(FieldValue::Text(text)) if is_timestamp => Some(parse_stored_timestamp(text)),
            other => other,
        })
    }
}

/// RFC 3339 text from a timestamp column; text that does not parse stays text
fn parse_stored_timestamp(text: String) -> FieldValue {
    match DateTime::parse_from_rfc3339(&text) {
        Ok(ts) => FieldValue::Timestamp(ts.with_timezone(&Utc)),
        Err(_) => FieldValue::Text(text),
    }
}
