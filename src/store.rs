use crate::error::EtlError;
use crate::table::{CleanedTable, Value};
use rusqlite::types::{ToSqlOutput, Value as SqlValue};
use rusqlite::{Connection, OptionalExtension, ToSql, params_from_iter};
use serde::Serialize;
use std::path::Path;
use tracing::{debug, info};

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Integer(v) => ToSqlOutput::Owned(SqlValue::Integer(*v)),
            Value::Real(v) => ToSqlOutput::Owned(SqlValue::Real(*v)),
            Value::Text(v) => ToSqlOutput::from(v.as_str()),
        })
    }
}

/// Shape of a table as read back from a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredTable {
    pub name: String,
    pub columns: Vec<String>,
    pub row_count: usize,
}

/// Writes `table` into `table_name`, returning the number of rows written.
///
/// With `replace` an existing table is dropped first; without it an existing table
/// is an error. Everything runs in one transaction, so a failed write leaves the
/// previous table in place.
pub fn persist(
    table: &CleanedTable,
    store_path: &Path,
    table_name: &str,
    replace: bool,
) -> Result<usize, EtlError> {
    let err = |e: rusqlite::Error| EtlError::storage(store_path, e);

    if table.columns.is_empty() {
        return Err(EtlError::storage(
            store_path,
            format!("table {table_name} has no columns"),
        ));
    }

    if let Some(parent) = store_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|e| EtlError::storage(store_path, e))?;
    }

    let mut conn = Connection::open(store_path).map_err(err)?;
    let tx = conn.transaction().map_err(err)?;

    if table_exists(&tx, table_name).map_err(err)? {
        if !replace {
            return Err(EtlError::storage(
                store_path,
                format!("table {table_name} already exists"),
            ));
        }
        tx.execute(&format!("DROP TABLE {}", quote_ident(table_name)), [])
            .map_err(err)?;
        debug!(table = table_name, store = %store_path.display(), "dropped previous table");
    }

    let column_defs: Vec<String> = table
        .columns
        .iter()
        .map(|c| format!("{} {}", quote_ident(&c.name), c.kind.sql_type()))
        .collect();
    tx.execute(
        &format!(
            "CREATE TABLE {} ({})",
            quote_ident(table_name),
            column_defs.join(", ")
        ),
        [],
    )
    .map_err(err)?;

    let placeholders = vec!["?"; table.columns.len()].join(", ");
    {
        let mut stmt = tx
            .prepare(&format!(
                "INSERT INTO {} VALUES ({placeholders})",
                quote_ident(table_name)
            ))
            .map_err(err)?;
        for row in &table.rows {
            stmt.execute(params_from_iter(row.iter())).map_err(err)?;
        }
    }
    tx.commit().map_err(err)?;

    info!(
        table = table_name,
        store = %store_path.display(),
        rows = table.rows.len(),
        columns = table.columns.len(),
        "table written"
    );
    Ok(table.rows.len())
}

pub fn list_tables(store_path: &Path) -> Result<Vec<String>, EtlError> {
    let err = |e: rusqlite::Error| EtlError::storage(store_path, e);
    let conn = open_existing(store_path)?;
    let mut stmt = conn
        .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
        .map_err(err)?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .map_err(err)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(err)?;
    Ok(names)
}

/// `None` when the table does not exist.
pub fn describe_table(
    store_path: &Path,
    table_name: &str,
) -> Result<Option<StoredTable>, EtlError> {
    let err = |e: rusqlite::Error| EtlError::storage(store_path, e);
    let conn = open_existing(store_path)?;
    if !table_exists(&conn, table_name).map_err(err)? {
        return Ok(None);
    }

    let columns = column_names(&conn, table_name).map_err(err)?;
    let row_count: i64 = conn
        .query_row(
            &format!("SELECT COUNT(*) FROM {}", quote_ident(table_name)),
            [],
            |row| row.get(0),
        )
        .map_err(err)?;

    Ok(Some(StoredTable {
        name: table_name.to_string(),
        columns,
        row_count: row_count as usize,
    }))
}

/// Number of NULL cells across every column of the table.
pub fn count_null_cells(store_path: &Path, table_name: &str) -> Result<u64, EtlError> {
    let err = |e: rusqlite::Error| EtlError::storage(store_path, e);
    let conn = open_existing(store_path)?;
    let columns = column_names(&conn, table_name).map_err(err)?;
    if columns.is_empty() {
        return Err(EtlError::storage(
            store_path,
            format!("table {table_name} not found"),
        ));
    }

    let terms: Vec<String> = columns
        .iter()
        .map(|c| format!("({} IS NULL)", quote_ident(c)))
        .collect();
    let nulls: i64 = conn
        .query_row(
            &format!(
                "SELECT COALESCE(SUM({}), 0) FROM {}",
                terms.join(" + "),
                quote_ident(table_name)
            ),
            [],
            |row| row.get(0),
        )
        .map_err(err)?;
    Ok(nulls as u64)
}

fn open_existing(store_path: &Path) -> Result<Connection, EtlError> {
    Connection::open_with_flags(store_path, rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY)
        .map_err(|e| EtlError::storage(store_path, e))
}

// SQLite resolves identifiers case-insensitively.
fn table_exists(conn: &Connection, table_name: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT 1 FROM sqlite_master WHERE type='table' AND name = ?1 COLLATE NOCASE",
        [table_name],
        |_| Ok(()),
    )
    .optional()
    .map(|found| found.is_some())
}

fn column_names(conn: &Connection, table_name: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(table_name)))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(names)
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
