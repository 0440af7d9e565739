//! SQLite capabilities.
//!
//! rusqlite is synchronous, so queries run on the blocking pool.

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::limits::Limit;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use serde_json::{json, Value};

use super::write_output;
use crate::capabilities::{arg, Capability, CapabilityContext, Param};

/// Opens an existing database; a missing file surfaces as `NotFound`.
///
/// Attaching is disabled. `ATTACH` and `VACUUM INTO` both name arbitrary
/// host files, and the guard only vetted `path`.
fn open_existing(path: &Path) -> Result<Connection> {
    std::fs::metadata(path).with_context(|| format!("opening {}", path.display()))?;
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .with_context(|| format!("opening {}", path.display()))?;
    conn.set_limit(Limit::SQLITE_LIMIT_ATTACHED, 0);
    Ok(conn)
}

fn sql_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => json!(i),
        ValueRef::Real(f) => json!(f),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => json!(b),
    }
}

// ── calculate_sales ──────────────────────────────────────

pub struct CalculateSales;

const CALCULATE_SALES_PARAMS: &[Param] = &[
    Param::text("ticket_type").optional(),
    Param::path("db_file").optional(),
    Param::path("output_file").optional(),
];

fn total_sales(db: &Path, ticket_type: &str) -> Result<f64> {
    let conn = open_existing(db)?;
    let total: Option<f64> = conn.query_row(
        "SELECT SUM(units * price) FROM tickets WHERE type = ?1",
        [ticket_type],
        |row| row.get(0),
    )?;
    Ok(total.unwrap_or(0.0))
}

#[async_trait]
impl Capability for CalculateSales {
    fn name(&self) -> &str {
        "calculate_sales"
    }

    fn description(&self) -> &str {
        "Total sales (units * price) for one ticket type in the tickets table and write it"
    }

    fn params(&self) -> &[Param] {
        CALCULATE_SALES_PARAMS
    }

    async fn execute(&self, args: &[String], ctx: &CapabilityContext) -> Result<Value> {
        let ticket_type = arg(args, 0)
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or("Gold")
            .to_string();
        let db = ctx.path_or(arg(args, 1), "ticket-sales.db")?;
        let output = ctx.path_or(arg(args, 2), "ticket-sales-gold.txt")?;

        let total = {
            let ticket_type = ticket_type.clone();
            tokio::task::spawn_blocking(move || total_sales(&db, &ticket_type)).await??
        };

        write_output(&output, total.to_string()).await?;
        Ok(json!({"status": "success", "ticket_type": ticket_type, "total_sales": total}))
    }
}

// ── run_sql ──────────────────────────────────────────────

pub struct RunSql;

const RUN_SQL_PARAMS: &[Param] = &[Param::text("query"), Param::path("db_file")];

fn query_rows(db: &Path, query: &str) -> Result<Vec<Value>> {
    let conn = open_existing(db)?;
    let mut stmt = conn.prepare(query)?;
    let columns = stmt.column_count();
    let mut rows = stmt.query([])?;

    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let values = (0..columns)
            .map(|i| row.get_ref(i).map(sql_to_json))
            .collect::<rusqlite::Result<Vec<_>>>()?;
        out.push(Value::Array(values));
    }
    Ok(out)
}

#[async_trait]
impl Capability for RunSql {
    fn name(&self) -> &str {
        "run_sql"
    }

    fn description(&self) -> &str {
        "Run a SQL query against a SQLite database file and return the rows"
    }

    fn params(&self) -> &[Param] {
        RUN_SQL_PARAMS
    }

    async fn execute(&self, args: &[String], ctx: &CapabilityContext) -> Result<Value> {
        let query = arg(args, 0).unwrap_or_default().to_string();
        let db = ctx.path_or(arg(args, 1), "database.db")?;

        let rows = tokio::task::spawn_blocking(move || query_rows(&db, &query)).await??;
        Ok(json!({"status": "success", "result": rows}))
    }
}
