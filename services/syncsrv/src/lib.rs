//! syncsrv - local mirror of IoT platform entities and telemetry
//!
//! Pipeline, leaves first:
//! - [`flatten`] and [`timestamp`] turn remote payloads into flat records
//! - [`schema::SchemaReflector`] and [`statement`] derive SQL from the catalog
//! - [`reconciler::Reconciler`] inserts or updates each record by natural key
//! - [`collector::TelemetryCollector`] and [`entities::EntitySyncer`] drive
//!   runs against a [`source::TelemetrySource`]

pub mod collector;
pub mod config;
pub mod entities;
pub mod flatten;
pub mod reconciler;
pub mod record;
pub mod report;
pub mod schema;
pub mod source;
pub mod statement;
pub mod store;
pub mod timestamp;

use std::sync::Arc;

use common::sqlite::SqliteClient;

pub use collector::{CollectWindow, CollectorConfig, TelemetryCollector};
pub use config::SyncConfig;
pub use entities::EntitySyncer;
pub use reconciler::{Reconciler, SyncOutcome};
pub use record::{FieldValue, Record};
pub use report::RunReport;
pub use schema::SchemaReflector;
pub use source::{EntityKind, HttpSource, TelemetrySource};
pub use store::{SqliteStore, Store, StoreError};

/// Reconciler over a SQLite mirror, with a fresh per-run schema cache
pub fn sqlite_reconciler(client: SqliteClient) -> Arc<Reconciler> {
    let store: Arc<dyn Store> = Arc::new(SqliteStore::new(client));
    let reflector = Arc::new(SchemaReflector::new(Arc::clone(&store)));
    Arc::new(Reconciler::new(store, reflector))
}
