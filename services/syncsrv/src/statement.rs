//! Statement synthesizer
//!
//! Builds parameterized INSERT / UPDATE / DELETE (and keyed SELECT) templates from field and
//! conflict-key lists. No I/O happens here; identifiers are quoted and every
//! value travels through a numbered placeholder (`?1`, `?2`, ...).

use errors::{SyncError, SyncResult};

/// Kind of statement, mostly for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Insert,
    Update,
    Delete,
    Select,
}

impl StatementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Select => "select",
        }
    }
}

/// A SQL template plus the number of positional values it expects
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    kind: StatementKind,
    sql: String,
    placeholders: usize,
}

impl Statement {
    pub fn kind(&self) -> StatementKind {
        self.kind
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Number of values that must be bound, in order
    pub fn placeholders(&self) -> usize {
        self.placeholders
    }
}

/// Quote an identifier for SQLite, doubling embedded quotes
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn check_identifier(kind: &str, ident: &str) -> SyncResult<()> {
    if ident.trim().is_empty() {
        return Err(SyncError::InvalidInput(format!("empty {} name", kind)));
    }
    if ident.contains('\0') {
        return Err(SyncError::InvalidInput(format!(
            "{} name contains a NUL byte",
            kind
        )));
    }
    Ok(())
}

fn check_fields(fields: &[String]) -> SyncResult<()> {
    if fields.is_empty() {
        return Err(SyncError::InvalidInput("field list is empty".to_string()));
    }
    for (i, field) in fields.iter().enumerate() {
        check_identifier("field", field)?;
        if fields[..i].contains(field) {
            return Err(SyncError::InvalidInput(format!(
                "field {} listed twice",
                field
            )));
        }
    }
    Ok(())
}

fn check_conflict_keys(fields: Option<&[String]>, conflict_keys: &[String]) -> SyncResult<()> {
    if conflict_keys.is_empty() {
        return Err(SyncError::InvalidInput(
            "conflict key list is empty".to_string(),
        ));
    }
    for key in conflict_keys {
        check_identifier("conflict key", key)?;
        if let Some(fields) = fields {
            if !fields.contains(key) {
                return Err(SyncError::InvalidInput(format!(
                    "conflict key {} is not one of the fields",
                    key
                )));
            }
        }
    }
    Ok(())
}

/// `INSERT INTO t (f1, .., fn) VALUES (?1, .., ?n)`
pub fn insert_statement(fields: &[String], collection: &str) -> SyncResult<Statement> {
    check_identifier("collection", collection)?;
    check_fields(fields)?;

    let columns: Vec<String> = fields.iter().map(|f| quote_ident(f)).collect();
    let values: Vec<String> = (1..=fields.len()).map(|i| format!("?{}", i)).collect();

    Ok(Statement {
        kind: StatementKind::Insert,
        sql: format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(collection),
            columns.join(", "),
            values.join(", ")
        ),
        placeholders: fields.len(),
    })
}

/// Fields of `fields` that are not conflict keys, in field order
pub fn non_key_fields<'a>(fields: &'a [String], conflict_keys: &[String]) -> Vec<&'a String> {
    fields
        .iter()
        .filter(|f| !conflict_keys.contains(f))
        .collect()
}

/// `UPDATE t SET a = ?1, b = ?2 WHERE k = ?3 AND (a IS NOT ?1 OR b IS NOT ?2)`
///
/// Binds the non-key fields in field order, then the conflict keys in key
/// order. The trailing guard reuses the SET placeholders so that writing
/// identical values matches no row.
pub fn update_statement(
    fields: &[String],
    collection: &str,
    conflict_keys: &[String],
) -> SyncResult<Statement> {
    check_identifier("collection", collection)?;
    check_fields(fields)?;
    check_conflict_keys(Some(fields), conflict_keys)?;

    let settable = non_key_fields(fields, conflict_keys);
    if settable.is_empty() {
        return Err(SyncError::InvalidInput(format!(
            "every field of {} is a conflict key, nothing to update",
            collection
        )));
    }

    let assignments: Vec<String> = settable
        .iter()
        .enumerate()
        .map(|(i, f)| format!("{} = ?{}", quote_ident(f), i + 1))
        .collect();
    let key_offset = settable.len();
    let predicates: Vec<String> = conflict_keys
        .iter()
        .enumerate()
        .map(|(i, k)| format!("{} = ?{}", quote_ident(k), key_offset + i + 1))
        .collect();
    let changed: Vec<String> = settable
        .iter()
        .enumerate()
        .map(|(i, f)| format!("{} IS NOT ?{}", quote_ident(f), i + 1))
        .collect();

    Ok(Statement {
        kind: StatementKind::Update,
        sql: format!(
            "UPDATE {} SET {} WHERE {} AND ({})",
            quote_ident(collection),
            assignments.join(", "),
            predicates.join(" AND "),
            changed.join(" OR ")
        ),
        placeholders: settable.len() + conflict_keys.len(),
    })
}

/// `DELETE FROM t WHERE k1 = ?1 AND k2 = ?2`
pub fn delete_statement(collection: &str, conflict_keys: &[String]) -> SyncResult<Statement> {
    check_identifier("collection", collection)?;
    check_conflict_keys(None, conflict_keys)?;

    let predicates: Vec<String> = conflict_keys
        .iter()
        .enumerate()
        .map(|(i, k)| format!("{} = ?{}", quote_ident(k), i + 1))
        .collect();

    Ok(Statement {
        kind: StatementKind::Delete,
        sql: format!(
            "DELETE FROM {} WHERE {}",
            quote_ident(collection),
            predicates.join(" AND ")
        ),
        placeholders: conflict_keys.len(),
    })
}

/// `SELECT f FROM t WHERE k1 = ?1 AND k2 = ?2`
pub fn select_statement(
    field: &str,
    collection: &str,
    conflict_keys: &[String],
) -> SyncResult<Statement> {
    check_identifier("collection", collection)?;
    check_identifier("field", field)?;
    check_conflict_keys(None, conflict_keys)?;

    let predicates: Vec<String> = conflict_keys
        .iter()
        .enumerate()
        .map(|(i, k)| format!("{} = ?{}", quote_ident(k), i + 1))
        .collect();

    Ok(Statement {
        kind: StatementKind::Select,
        sql: format!(
            "SELECT {} FROM {} WHERE {}",
            quote_ident(field),
            quote_ident(collection),
            predicates.join(" AND ")
        ),
        placeholders: conflict_keys.len(),
    })
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_insert_statement() {
        let stmt = insert_statement(&names(&["id", "name", "type"]), "devices").unwrap();
        assert_eq!(
            stmt.sql(),
            r#"INSERT INTO "devices" ("id", "name", "type") VALUES (?1, ?2, ?3)"#
        );
        assert_eq!(stmt.placeholders(), 3);
        assert_eq!(stmt.kind(), StatementKind::Insert);
    }

    #[test]
    fn test_update_statement_orders_non_keys_then_keys() {
        let stmt = update_statement(
            &names(&["device_id", "ts_key", "ts", "value"]),
            "telemetry",
            &names(&["device_id", "ts_key", "ts"]),
        )
        .unwrap();
        assert_eq!(
            stmt.sql(),
            r#"UPDATE "telemetry" SET "value" = ?1 WHERE "device_id" = ?2 AND "ts_key" = ?3 AND "ts" = ?4 AND ("value" IS NOT ?1)"#
        );
        assert_eq!(stmt.placeholders(), 4);
    }

    #[test]
    fn test_update_statement_multiple_settable_fields() {
        let stmt =
            update_statement(&names(&["id", "name", "type"]), "devices", &names(&["id"])).unwrap();
        assert_eq!(
            stmt.sql(),
            r#"UPDATE "devices" SET "name" = ?1, "type" = ?2 WHERE "id" = ?3 AND ("name" IS NOT ?1 OR "type" IS NOT ?2)"#
        );
        assert_eq!(stmt.placeholders(), 3);
    }

    #[test]
    fn test_delete_statement() {
        let stmt = delete_statement("telemetry", &names(&["device_id", "ts"])).unwrap();
        assert_eq!(
            stmt.sql(),
            r#"DELETE FROM "telemetry" WHERE "device_id" = ?1 AND "ts" = ?2"#
        );
        assert_eq!(stmt.placeholders(), 2);
    }

    #[test]
    fn test_select_statement() {
        let stmt = select_statement("last_end", "sync_metadata", &names(&["name"])).unwrap();
        assert_eq!(
            stmt.sql(),
            r#"SELECT "last_end" FROM "sync_metadata" WHERE "name" = ?1"#
        );
        assert_eq!(stmt.kind().as_str(), "select");
    }

    #[test]
    fn test_conflict_key_must_be_a_field() {
        let err = update_statement(&names(&["id", "name"]), "devices", &names(&["serial"]));
        assert!(matches!(err, Err(SyncError::InvalidInput(_))));
    }

    #[test]
    fn test_update_needs_a_non_key_field() {
        let err = update_statement(&names(&["id"]), "devices", &names(&["id"]));
        assert!(matches!(err, Err(SyncError::InvalidInput(_))));
    }

    #[test]
    fn test_empty_inputs_rejected() {
        assert!(insert_statement(&[], "devices").is_err());
        assert!(insert_statement(&names(&["id"]), "").is_err());
        assert!(delete_statement("devices", &[]).is_err());
        assert!(insert_statement(&names(&["id", "id"]), "devices").is_err());
    }

    #[test]
    fn test_identifiers_are_quoted_not_interpolated() {
        let stmt = insert_statement(&names(&["na\"me"]), "dev\"ices").unwrap();
        assert_eq!(
            stmt.sql(),
            r#"INSERT INTO "dev""ices" ("na""me") VALUES (?1)"#
        );
    }
}
