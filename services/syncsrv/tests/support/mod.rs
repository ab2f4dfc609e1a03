//! Shared helpers for syncsrv integration tests

#![allow(dead_code)]
#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

use std::sync::Arc;

use common::sqlite::SqliteClient;
use syncsrv::{schema, sqlite_reconciler, Reconciler};

/// In-memory mirror with every table created
pub async fn mirror() -> (SqliteClient, Arc<Reconciler>) {
    let client = SqliteClient::in_memory().await.unwrap();
    schema::init_database(&client).await.unwrap();
    let reconciler = sqlite_reconciler(client.clone());
    (client, reconciler)
}

/// Row count of `table`
pub async fn count(client: &SqliteClient, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM \"{}\"", table))
        .fetch_one(client.pool())
        .await
        .unwrap()
}
