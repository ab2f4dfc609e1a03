//! Store adapter
//!
//! The reconciler and reflector only talk to the [`Store`] trait. The
//! production implementation, [`SqliteStore`], runs statements through the
//! shared `common` SQLite pool.

use async_trait::async_trait;
use common::sqlite::SqliteClient;
use errors::SyncError;
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{query::Query, Row, Sqlite, TypeInfo, ValueRef};
use thiserror::Error;
use tracing::debug;

use crate::record::FieldValue;
use crate::statement::Statement;

/// Failure reported by a [`Store`]
#[derive(Debug, Error)]
pub enum StoreError {
    /// The statement would duplicate a value of a unique constraint
    #[error("uniqueness violation: {0}")]
    UniquenessViolation(String),

    /// The store could not be reached (pool closed, I/O, timeout)
    #[error("transport: {0}")]
    Transport(String),

    /// Any other database-side failure
    #[error("{0}")]
    Other(String),
}

impl StoreError {
    pub fn is_uniqueness_violation(&self) -> bool {
        matches!(self, Self::UniquenessViolation(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                Self::UniquenessViolation(db.message().to_string())
            },
            sqlx::Error::Io(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => Self::Transport(err.to_string()),
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Transport(msg) => SyncError::StoreTransport(msg),
            StoreError::UniquenessViolation(msg) | StoreError::Other(msg) => {
                SyncError::QueryFailed {
                    query: "store".to_string(),
                    error: msg,
                }
            },
        }
    }
}

/// One catalog column, in declaration order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    /// Declared type as written in the DDL, empty when none was given
    pub decl_type: String,
    /// 1-based position inside the primary key, 0 when not part of it
    pub pk: u32,
}

impl ColumnInfo {
    /// Declared TIMESTAMP or DATETIME; such values are kept as RFC 3339 text
    pub fn is_timestamp(&self) -> bool {
        let decl = self.decl_type.to_ascii_uppercase();
        decl.starts_with("TIMESTAMP") || decl.starts_with("DATETIME")
    }

    /// `INTEGER PRIMARY KEY` columns alias the rowid and are assigned by the store
    pub fn is_integer_type(&self) -> bool {
        self.decl_type.eq_ignore_ascii_case("INTEGER")
    }
}

/// A non-partial uniqueness constraint (UNIQUE clause or unique index)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniqueIndex {
    pub name: String,
    pub columns: Vec<String>,
}

/// Persistent store the mirror writes to
#[async_trait]
pub trait Store: Send + Sync {
    /// Run a statement, returning the number of affected rows
    async fn execute(&self, stmt: &Statement, values: &[FieldValue]) -> Result<u64, StoreError>;

    /// Run a statement that must affect at most one row.
    ///
    /// When more than one row is affected the change is rolled back and the
    /// row count is still returned, so the caller can report it.
    async fn execute_single(
        &self,
        stmt: &Statement,
        values: &[FieldValue],
    ) -> Result<u64, StoreError>;

    /// Fetch the first column of the first row, if any.
    ///
    /// Values come back by storage class (INTEGER, REAL, TEXT). Timestamps
    /// are TEXT here; callers that know the column type convert them.
    async fn fetch_value(
        &self,
        stmt: &Statement,
        values: &[FieldValue],
    ) -> Result<Option<FieldValue>, StoreError>;

    /// Columns of a table in catalog order; empty when the table is unknown
    async fn table_columns(&self, table: &str) -> Result<Vec<ColumnInfo>, StoreError>;

    /// Non-partial unique constraints of a table, in declaration order
    async fn unique_indexes(&self, table: &str) -> Result<Vec<UniqueIndex>, StoreError>;
}

/// [`Store`] over the shared SQLite client
#[derive(Clone)]
pub struct SqliteStore {
    client: SqliteClient,
}

impl SqliteStore {
    pub fn new(client: SqliteClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &SqliteClient {
        &self.client
    }
}

fn check_arity(stmt: &Statement, values: &[FieldValue]) -> Result<(), StoreError> {
    if stmt.placeholders() != values.len() {
        return Err(StoreError::Other(format!(
            "{} statement expects {} values, got {}",
            stmt.kind().as_str(),
            stmt.placeholders(),
            values.len()
        )));
    }
    Ok(())
}

fn bind_values<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    values: &'q [FieldValue],
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for value in values {
        query = match value {
            FieldValue::Null => query.bind(None::<String>),
            FieldValue::Bool(b) => query.bind(*b),
            FieldValue::Int(i) => query.bind(*i),
            FieldValue::Float(f) => query.bind(*f),
            FieldValue::Text(s) => query.bind(s.as_str()),
            FieldValue::Timestamp(ts) => query.bind(*ts),
        };
    }
    query
}

fn decode_first(row: &SqliteRow) -> Result<FieldValue, sqlx::Error> {
    let raw = row.try_get_raw(0)?;
    if raw.is_null() {
        return Ok(FieldValue::Null);
    }
    let storage = raw.type_info().name().to_string();
    let value = match storage.as_str() {
        "INTEGER" => FieldValue::Int(row.try_get::<i64, _>(0)?),
        "REAL" => FieldValue::Float(row.try_get::<f64, _>(0)?),
        _ => FieldValue::Text(row.try_get::<String, _>(0)?),
    };
    Ok(value)
}

#[async_trait]
impl Store for SqliteStore {
    async fn execute(&self, stmt: &Statement, values: &[FieldValue]) -> Result<u64, StoreError> {
        check_arity(stmt, values)?;
        let result = bind_values(sqlx::query(stmt.sql()), values)
            .execute(self.client.pool())
            .await?;
        Ok(result.rows_affected())
    }

    async fn execute_single(
        &self,
        stmt: &Statement,
        values: &[FieldValue],
    ) -> Result<u64, StoreError> {
        check_arity(stmt, values)?;
        let mut tx = self.client.pool().begin().await?;
        let rows = bind_values(sqlx::query(stmt.sql()), values)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        if rows > 1 {
            debug!("Rolling back {} statement: {} rows", stmt.kind().as_str(), rows);
            tx.rollback().await?;
        } else {
            tx.commit().await?;
        }
        Ok(rows)
    }

    async fn fetch_value(
        &self,
        stmt: &Statement,
        values: &[FieldValue],
    ) -> Result<Option<FieldValue>, StoreError> {
        check_arity(stmt, values)?;
        let row = bind_values(sqlx::query(stmt.sql()), values)
            .fetch_optional(self.client.pool())
            .await?;
        match row {
            Some(row) => Ok(Some(decode_first(&row)?)),
            None => Ok(None),
        }
    }

    async fn table_columns(&self, table: &str) -> Result<Vec<ColumnInfo>, StoreError> {
        let rows: Vec<(String, String, i64)> =
            sqlx::query_as("SELECT name, type, pk FROM pragma_table_info(?1) ORDER BY cid")
                .bind(table)
                .fetch_all(self.client.pool())
                .await?;

        Ok(rows
            .into_iter()
            .map(|(name, decl_type, pk)| ColumnInfo {
                name,
                decl_type,
                pk: pk as u32,
            })
            .collect())
    }

    async fn unique_indexes(&self, table: &str) -> Result<Vec<UniqueIndex>, StoreError> {
        // origin 'pk' is covered by table_columns; keep UNIQUE clauses and
        // CREATE UNIQUE INDEX
        let mut names: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM pragma_index_list(?1) \
             WHERE \"unique\" = 1 AND partial = 0 AND origin IN ('u', 'c')",
        )
        .bind(table)
        .fetch_all(self.client.pool())
        .await?;
        // Autoindex names carry their declaration ordinal
        names.sort();

        let mut indexes = Vec::with_capacity(names.len());
        for name in names {
            let columns: Vec<Option<String>> =
                sqlx::query_scalar("SELECT name FROM pragma_index_info(?1) ORDER BY seqno")
                    .bind(&name)
                    .fetch_all(self.client.pool())
                    .await?;
            // Expression indexes have no column name and cannot key a record
            if columns.iter().any(Option::is_none) {
                continue;
            }
            indexes.push(UniqueIndex {
                name,
                columns: columns.into_iter().flatten().collect(),
            });
        }
        Ok(indexes)
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use crate::statement::{insert_statement, select_statement, update_statement};

    async fn store_with(ddl: &str) -> SqliteStore {
        let client = SqliteClient::in_memory().await.unwrap();
        sqlx::query(ddl).execute(client.pool()).await.unwrap();
        SqliteStore::new(client)
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_execute_reports_affected_rows() {
        let store = store_with("CREATE TABLE t (id TEXT PRIMARY KEY, v INTEGER)").await;
        let insert = insert_statement(&names(&["id", "v"]), "t").unwrap();

        let rows = store
            .execute(&insert, &[FieldValue::from("a"), FieldValue::Int(1)])
            .await
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[tokio::test]
    async fn test_duplicate_insert_is_uniqueness_violation() {
        let store = store_with("CREATE TABLE t (id TEXT PRIMARY KEY, v INTEGER)").await;
        let insert = insert_statement(&names(&["id", "v"]), "t").unwrap();
        let values = [FieldValue::from("a"), FieldValue::Int(1)];

        store.execute(&insert, &values).await.unwrap();
        let err = store.execute(&insert, &values).await.unwrap_err();
        assert!(err.is_uniqueness_violation(), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_other_errors_are_not_uniqueness() {
        let store = store_with("CREATE TABLE t (id TEXT PRIMARY KEY)").await;
        let insert = insert_statement(&names(&["id", "missing"]), "t").unwrap();
        let err = store
            .execute(&insert, &[FieldValue::from("a"), FieldValue::Null])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Other(_)));
    }

    #[tokio::test]
    async fn test_arity_mismatch_rejected() {
        let store = store_with("CREATE TABLE t (id TEXT PRIMARY KEY)").await;
        let insert = insert_statement(&names(&["id"]), "t").unwrap();
        assert!(store.execute(&insert, &[]).await.is_err());
    }

    #[tokio::test]
    async fn test_execute_single_rolls_back_multi_row_changes() {
        let store = store_with("CREATE TABLE t (k TEXT, v INTEGER)").await;
        sqlx::query("INSERT INTO t VALUES ('x', 1), ('x', 2)")
            .execute(store.client().pool())
            .await
            .unwrap();

        let update = update_statement(&names(&["k", "v"]), "t", &names(&["k"])).unwrap();
        let rows = store
            .execute_single(&update, &[FieldValue::Int(9), FieldValue::from("x")])
            .await
            .unwrap();
        assert_eq!(rows, 2);

        let nines: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM t WHERE v = 9")
            .fetch_one(store.client().pool())
            .await
            .unwrap();
        assert_eq!(nines, 0);
    }

    #[tokio::test]
    async fn test_fetch_value_decodes_storage_class() {
        let store =
            store_with("CREATE TABLE t (id TEXT PRIMARY KEY, n INTEGER, ts TIMESTAMP)").await;
        let ts = Utc.with_ymd_and_hms(2020, 2, 19, 21, 28, 4).unwrap();
        let insert = insert_statement(&names(&["id", "n", "ts"]), "t").unwrap();
        store
            .execute(
                &insert,
                &[FieldValue::from("a"), FieldValue::Int(42), FieldValue::Timestamp(ts)],
            )
            .await
            .unwrap();

        let n = select_statement("n", "t", &names(&["id"])).unwrap();
        assert_eq!(
            store.fetch_value(&n, &[FieldValue::from("a")]).await.unwrap(),
            Some(FieldValue::Int(42))
        );
        let stored = select_statement("ts", "t", &names(&["id"])).unwrap();
        // Declared TIMESTAMP still comes back as its RFC 3339 text
        match store
            .fetch_value(&stored, &[FieldValue::from("a")])
            .await
            .unwrap()
        {
            Some(FieldValue::Text(text)) => {
                assert_eq!(DateTime::parse_from_rfc3339(&text).unwrap(), ts)
            },
            other => panic!("expected text, got {:?}", other),
        }
        assert_eq!(
            store.fetch_value(&n, &[FieldValue::from("zz")]).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_catalog_queries() {
        let store = store_with(
            "CREATE TABLE m (rowid_alias INTEGER PRIMARY KEY, a TEXT, b TEXT, c TEXT, UNIQUE(a, b))",
        )
        .await;

        let cols = store.table_columns("m").await.unwrap();
        let names: Vec<&str> = cols.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["rowid_alias", "a", "b", "c"]);
        assert_eq!(cols[0].pk, 1);
        assert!(cols[0].is_integer_type());
        assert_eq!(cols[1].pk, 0);
        assert_eq!(cols[1].decl_type, "TEXT");
        assert!(!cols[1].is_timestamp());

        let unique = store.unique_indexes("m").await.unwrap();
        assert_eq!(unique.len(), 1);
        assert_eq!(unique[0].columns, vec!["a".to_string(), "b".to_string()]);

        assert!(store.table_columns("nope").await.unwrap().is_empty());
    }
}
