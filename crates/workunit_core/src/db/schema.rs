//! Table preparation for entity descriptors.
//!
//! # Responsibility
//! - Create missing entity tables with an autoincrement `id` key.
//! - Add columns that a descriptor declares but an existing table lacks.
//! - Create declared secondary indexes.
//!
//! # Invariants
//! - All changes for one call are applied in a single transaction.
//! - Re-running with the same descriptors is a no-op.
//! - Existing columns are never altered or dropped.

use super::record::EntityDescriptor;
use super::{validate_identifier, DbResult};
use log::info;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::time::Instant;

/// Brings the schema up to date with `descriptors`.
///
/// Columns added to an existing table go through `ALTER TABLE ADD COLUMN`,
/// so their declarations must be valid there (no `UNIQUE`, and `NOT NULL`
/// needs a default).
pub fn ensure_schema_for(conn: &Connection, descriptors: &[&EntityDescriptor]) -> DbResult<()> {
    let started_at = Instant::now();
    for descriptor in descriptors {
        validate_descriptor(descriptor)?;
    }

    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    let mut created_tables = 0usize;
    let mut added_columns = 0usize;
    for descriptor in descriptors {
        if table_exists(&tx, descriptor.table)? {
            added_columns += add_missing_columns(&tx, descriptor)?;
        } else {
            tx.execute_batch(&create_table_sql(descriptor))?;
            created_tables += 1;
        }
        for column in descriptor.indexes {
            tx.execute_batch(&format!(
                "CREATE INDEX IF NOT EXISTS idx_{0}_{1} ON {0} ({1});",
                descriptor.table, column
            ))?;
        }
    }
    tx.commit()?;

    info!(
        "event=schema_ensure module=db status=ok entities={} created_tables={} added_columns={} duration_ms={}",
        descriptors.len(),
        created_tables,
        added_columns,
        started_at.elapsed().as_millis()
    );
    Ok(())
}

fn validate_descriptor(descriptor: &EntityDescriptor) -> DbResult<()> {
    validate_identifier(descriptor.table)?;
    for column in descriptor.columns {
        validate_identifier(column.name)?;
    }
    for column in descriptor.indexes {
        validate_identifier(column)?;
    }
    Ok(())
}

fn create_table_sql(descriptor: &EntityDescriptor) -> String {
    let mut columns = vec!["id INTEGER PRIMARY KEY AUTOINCREMENT".to_string()];
    columns.extend(
        descriptor
            .columns
            .iter()
            .map(|column| format!("{} {}", column.name, column.decl)),
    );
    format!(
        "CREATE TABLE {} (\n    {}\n);",
        descriptor.table,
        columns.join(",\n    ")
    )
}

fn add_missing_columns(conn: &Connection, descriptor: &EntityDescriptor) -> DbResult<usize> {
    let existing = table_columns(conn, descriptor.table)?;
    let mut added = 0;
    for column in descriptor.columns {
        if existing.iter().any(|name| name == column.name) {
            continue;
        }
        conn.execute_batch(&format!(
            "ALTER TABLE {} ADD COLUMN {} {};",
            descriptor.table, column.name, column.decl
        ))?;
        added += 1;
    }
    Ok(added)
}

fn table_exists(conn: &Connection, table: &str) -> DbResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

pub(crate) fn table_columns(conn: &Connection, table: &str) -> DbResult<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table});"))?;
    let mut rows = stmt.query([])?;
    let mut columns = Vec::new();
    while let Some(row) = rows.next()? {
        columns.push(row.get::<_, String>(1)?);
    }
    Ok(columns)
}

#[cfg(test)]
mod tests {
    use super::create_table_sql;
    use crate::db::record::{ColumnDef, EntityDescriptor};

    static WIDGETS: EntityDescriptor = EntityDescriptor {
        table: "widgets",
        columns: &[
            ColumnDef::new("label", "TEXT NOT NULL"),
            ColumnDef::new("weight", "REAL"),
        ],
        indexes: &[],
        relations: &[],
    };

    #[test]
    fn create_table_sql_puts_id_first() {
        let sql = create_table_sql(&WIDGETS);
        assert!(sql.starts_with("CREATE TABLE widgets ("));
        let id_at = sql.find("id INTEGER PRIMARY KEY AUTOINCREMENT").unwrap();
        let label_at = sql.find("label TEXT NOT NULL").unwrap();
        assert!(id_at < label_at);
        assert!(sql.contains("weight REAL"));
    }
}
