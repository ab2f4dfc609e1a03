//! Schema reflection and the mirror's table definitions

use std::sync::Arc;

use common::sqlite::SqliteClient;
use dashmap::DashMap;
use errors::{SyncError, SyncResult};
use tracing::{debug, info};

use crate::store::{ColumnInfo, Store};

// ============================================================================
// Mirror Table DDL
// ============================================================================

/// Mirrored device entities, keyed by the platform id
pub const DEVICES_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS devices (
        id TEXT NOT NULL PRIMARY KEY,
        name TEXT,
        type TEXT,
        label TEXT,
        tenantId TEXT,
        customerId TEXT,
        deviceProfileId TEXT,
        createdTime TIMESTAMP,
        description TEXT
    )
"#;

/// Mirrored asset entities, keyed by the platform id
pub const ASSETS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS assets (
        id TEXT NOT NULL PRIMARY KEY,
        name TEXT,
        type TEXT,
        label TEXT,
        tenantId TEXT,
        customerId TEXT,
        createdTime TIMESTAMP,
        description TEXT
    )
"#;

/// One row per measurement point; the natural key is a UNIQUE clause, not
/// the primary key
pub const TELEMETRY_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS telemetry (
        device_id TEXT NOT NULL,
        device_name TEXT,
        ts_key TEXT NOT NULL,
        ontology TEXT,
        ts TIMESTAMP NOT NULL,
        value REAL,
        UNIQUE (device_id, ts_key, ts)
    )
"#;

/// Last successful window per collection run
pub const SYNC_METADATA_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS sync_metadata (
        source TEXT NOT NULL PRIMARY KEY,
        last_sync TIMESTAMP NOT NULL,
        window_start INTEGER,
        window_end INTEGER NOT NULL
    )
"#;

pub const DEVICES: &str = "devices";
pub const ASSETS: &str = "assets";
pub const TELEMETRY: &str = "telemetry";
pub const SYNC_METADATA: &str = "sync_metadata";

/// Create every mirror table that does not exist yet
pub async fn init_database(client: &SqliteClient) -> SyncResult<()> {
    for ddl in [
        DEVICES_TABLE,
        ASSETS_TABLE,
        TELEMETRY_TABLE,
        SYNC_METADATA_TABLE,
    ] {
        sqlx::query(ddl).execute(client.pool()).await?;
    }
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_telemetry_ts ON telemetry(ts)")
        .execute(client.pool())
        .await?;

    info!("Mirror schema ready: {}", client.path());
    Ok(())
}

// ============================================================================
// Schema Reflector
// ============================================================================

/// Reads field lists and natural keys from the store catalog.
///
/// Results are cached for the lifetime of the reflector (one run); schema
/// changes during a run are not picked up.
pub struct SchemaReflector {
    store: Arc<dyn Store>,
    columns: DashMap<String, Arc<Vec<ColumnInfo>>>,
    fields: DashMap<String, Arc<Vec<String>>>,
    conflict_keys: DashMap<String, Arc<Vec<String>>>,
}

impl SchemaReflector {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            columns: DashMap::new(),
            fields: DashMap::new(),
            conflict_keys: DashMap::new(),
        }
    }

    /// Catalog columns of `collection` with their declared types
    pub async fn columns(&self, collection: &str) -> SyncResult<Arc<Vec<ColumnInfo>>> {
        if let Some(cached) = self.columns.get(collection) {
            return Ok(Arc::clone(&cached));
        }

        let columns = self.store.table_columns(collection).await?;
        if columns.is_empty() {
            return Err(SyncError::UnknownCollection(collection.to_string()));
        }
        let columns = Arc::new(columns);
        self.columns
            .insert(collection.to_string(), Arc::clone(&columns));
        Ok(columns)
    }

    /// Field names of `collection` in catalog order
    pub async fn fields(&self, collection: &str) -> SyncResult<Arc<Vec<String>>> {
        if let Some(cached) = self.fields.get(collection) {
            return Ok(Arc::clone(&cached));
        }

        let columns = self.columns(collection).await?;
        let names = Arc::new(columns.iter().map(|c| c.name.clone()).collect::<Vec<_>>());
        debug!("{} fields: {:?}", collection, names);

        self.fields
            .insert(collection.to_string(), Arc::clone(&names));
        Ok(names)
    }

    /// Natural-key fields of `collection`
    ///
    /// @input collection: table name
    /// @output the declared primary key in key order, unless it is a lone
    /// `INTEGER PRIMARY KEY` (a store-assigned rowid) and a unique constraint
    /// exists, in which case that constraint's columns; with no primary key,
    /// the first non-partial unique constraint; else an empty list
    pub async fn conflict_keys(&self, collection: &str) -> SyncResult<Arc<Vec<String>>> {
        if let Some(cached) = self.conflict_keys.get(collection) {
            return Ok(Arc::clone(&cached));
        }

        let columns = self.columns(collection).await?;
        let mut pk: Vec<&ColumnInfo> = columns.iter().filter(|c| c.pk > 0).collect();
        pk.sort_by_key(|c| c.pk);

        let surrogate = matches!(pk.as_slice(), [only] if only.is_integer_type());
        let keys = if !pk.is_empty() && !surrogate {
            pk.iter().map(|c| c.name.clone()).collect()
        } else {
            let unique = self
                .store
                .unique_indexes(collection)
                .await?
                .into_iter()
                .next()
                .map(|idx| idx.columns);
            match unique {
                Some(columns) => {
                    if surrogate {
                        debug!("{} rowid key ignored in favour of its unique constraint", collection);
                    }
                    columns
                },
                None => pk.iter().map(|c| c.name.clone()).collect(),
            }
        };
        debug!("{} conflict keys: {:?}", collection, keys);

        let keys = Arc::new(keys);
        self.conflict_keys
            .insert(collection.to_string(), Arc::clone(&keys));
        Ok(keys)
    }

    /// Forget cached results (e.g. after a schema migration)
    pub fn invalidate(&self) {
        self.columns.clear();
        self.fields.clear();
        self.conflict_keys.clear();
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::store::SqliteStore;

    async fn reflector() -> (SqliteClient, SchemaReflector) {
        let client = SqliteClient::in_memory().await.unwrap();
        init_database(&client).await.unwrap();
        let store: Arc<dyn Store> = Arc::new(SqliteStore::new(client.clone()));
        (client, SchemaReflector::new(store))
    }

    #[tokio::test]
    async fn test_fields_in_catalog_order() {
        let (_client, reflector) = reflector().await;
        let fields = reflector.fields(TELEMETRY).await.unwrap();
        assert_eq!(
            *fields,
            vec!["device_id", "device_name", "ts_key", "ontology", "ts", "value"]
        );
    }

    #[tokio::test]
    async fn test_primary_key_is_conflict_key() {
        let (_client, reflector) = reflector().await;
        assert_eq!(*reflector.conflict_keys(DEVICES).await.unwrap(), vec!["id"]);
        assert_eq!(
            *reflector.conflict_keys(SYNC_METADATA).await.unwrap(),
            vec!["source"]
        );
    }

    #[tokio::test]
    async fn test_unique_clause_is_conflict_key_without_primary_key() {
        let (_client, reflector) = reflector().await;
        assert_eq!(
            *reflector.conflict_keys(TELEMETRY).await.unwrap(),
            vec!["device_id", "ts_key", "ts"]
        );
    }

    #[tokio::test]
    async fn test_composite_primary_key_order() {
        let (client, reflector) = reflector().await;
        sqlx::query("CREATE TABLE pairs (b TEXT, a TEXT, v TEXT, PRIMARY KEY (a, b))")
            .execute(client.pool())
            .await
            .unwrap();
        assert_eq!(*reflector.conflict_keys("pairs").await.unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_unique_constraint_wins_over_rowid_key() {
        let (client, reflector) = reflector().await;
        sqlx::query(
            "CREATE TABLE readings (id INTEGER PRIMARY KEY AUTOINCREMENT, k TEXT NOT NULL UNIQUE, v TEXT)",
        )
        .execute(client.pool())
        .await
        .unwrap();
        sqlx::query("CREATE TABLE counters (id INTEGER PRIMARY KEY, v TEXT)")
            .execute(client.pool())
            .await
            .unwrap();

        assert_eq!(*reflector.conflict_keys("readings").await.unwrap(), vec!["k"]);
        // Without a unique constraint the rowid is the only key there is
        assert_eq!(*reflector.conflict_keys("counters").await.unwrap(), vec!["id"]);
    }

    #[tokio::test]
    async fn test_column_types_are_reflected() {
        let (_client, reflector) = reflector().await;
        let columns = reflector.columns(DEVICES).await.unwrap();
        let timestamps: Vec<&str> = columns
            .iter()
            .filter(|c| c.is_timestamp())
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(timestamps, vec!["createdTime"]);
    }

    #[tokio::test]
    async fn test_table_without_keys() {
        let (client, reflector) = reflector().await;
        sqlx::query("CREATE TABLE loose (a TEXT, b TEXT)")
            .execute(client.pool())
            .await
            .unwrap();
        assert!(reflector.conflict_keys("loose").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_collection() {
        let (_client, reflector) = reflector().await;
        assert!(matches!(
            reflector.fields("nope").await,
            Err(SyncError::UnknownCollection(name)) if name == "nope"
        ));
        assert!(matches!(
            reflector.conflict_keys("nope").await,
            Err(SyncError::UnknownCollection(_))
        ));
    }

    #[tokio::test]
    async fn test_results_are_cached_for_the_run() {
        let (client, reflector) = reflector().await;
        let before = reflector.fields(DEVICES).await.unwrap();

        sqlx::query("ALTER TABLE devices ADD COLUMN extra TEXT")
            .execute(client.pool())
            .await
            .unwrap();
        assert_eq!(reflector.fields(DEVICES).await.unwrap(), before);

        reflector.invalidate();
        assert!(reflector
            .fields(DEVICES)
            .await
            .unwrap()
            .contains(&"extra".to_string()));
    }

    #[tokio::test]
    async fn test_init_database_is_idempotent() {
        let client = SqliteClient::in_memory().await.unwrap();
        init_database(&client).await.unwrap();
        init_database(&client).await.unwrap();
    }
}
