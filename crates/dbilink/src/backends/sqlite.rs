//! SQLite backend over rusqlite.
//!
//! rusqlite is synchronous; a single connection behind a tokio mutex
//! serializes access, which is the right shape for a file database. The
//! driver binds colon-format named parameters natively. Stored procedure
//! operations are rejected at the interface: SQLite has none.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::types::{ToSqlOutput, Value, ValueRef};
use rusqlite::Connection;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::backends::{Backend, QueryOptions};
use crate::descriptor::{BackendFamily, ConnectionDescriptor};
use crate::dialect::Dialect;
use crate::error::{DbiError, Result};
use crate::frame::{QueryOutput, Row};
use crate::safety;
use crate::value::{Params, SqlValue};

impl rusqlite::ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Owned(Value::Null),
            SqlValue::Bool(v) => ToSqlOutput::Owned(Value::Integer(i64::from(*v))),
            SqlValue::I64(v) => ToSqlOutput::Owned(Value::Integer(*v)),
            SqlValue::F64(v) => ToSqlOutput::Owned(Value::Real(*v)),
            SqlValue::Text(v) => ToSqlOutput::Borrowed(ValueRef::Text(v.as_bytes())),
            SqlValue::Bytes(v) => ToSqlOutput::Borrowed(ValueRef::Blob(v)),
            SqlValue::Uuid(v) => ToSqlOutput::Owned(Value::Text(v.to_string())),
            SqlValue::Decimal(v) => ToSqlOutput::Owned(Value::Text(v.to_string())),
            SqlValue::DateTime(v) => {
                ToSqlOutput::Owned(Value::Text(v.format("%Y-%m-%d %H:%M:%S%.f").to_string()))
            }
        })
    }
}

/// SQLite backend bound to one database file.
pub struct SqliteBackend {
    conn: Arc<Mutex<Connection>>,
    path: String,
    dialect: Dialect,
}

impl SqliteBackend {
    /// Open the database file named by the descriptor.
    ///
    /// SQLite happily creates a fresh empty database for any path, which
    /// turns a typo into a silently wrong target; the file must already
    /// exist.
    pub async fn connect(descriptor: ConnectionDescriptor) -> Result<Self> {
        let path = descriptor.database().to_string();
        if !Path::new(&path).is_file() {
            return Err(DbiError::DatabaseFileNotFound { path });
        }

        let open_path = path.clone();
        let conn = tokio::task::spawn_blocking(move || Connection::open(open_path))
            .await
            .map_err(|e| DbiError::pool(e, "opening SQLite database"))??;

        info!(path = %path, "opened SQLite database");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
            dialect: Dialect::new(BackendFamily::Sqlite),
        })
    }

    fn run_statement(
        tx: &rusqlite::Transaction<'_>,
        stmt_text: &str,
        params: &Params,
        raw: bool,
    ) -> Result<QueryOutput> {
        let mut stmt = tx.prepare(stmt_text)?;
        bind_named(&mut stmt, params)?;

        // Zero columns means the statement returns no rows at all
        // (INSERT/UPDATE/DELETE/CREATE/...), as opposed to zero rows.
        if stmt.column_count() == 0 {
            stmt.raw_execute()?;
            return Ok(QueryOutput::Absent);
        }

        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let mut out: Vec<Row> = Vec::new();
        let mut rows = stmt.raw_query();
        while let Some(row) = rows.next()? {
            let mut cells = Vec::with_capacity(columns.len());
            for idx in 0..columns.len() {
                cells.push(decode_cell(row.get_ref(idx)?));
            }
            out.push(cells);
        }

        Ok(QueryOutput::from_rows(columns, out, raw))
    }
}

#[async_trait]
impl Backend for SqliteBackend {
    fn family(&self) -> BackendFamily {
        BackendFamily::Sqlite
    }

    fn database_name(&self) -> &str {
        &self.path
    }

    async fn execute_query(
        &self,
        stmt: &str,
        params: Option<&Params>,
        opts: QueryOptions,
    ) -> Result<QueryOutput> {
        if !opts.ignore_unsafe {
            safety::check(stmt)?;
        }
        let empty = Params::new();
        let params = params.unwrap_or(&empty);

        let mut conn = self.conn.lock().await;
        let outcome: Result<QueryOutput> = (|| {
            let tx = conn.transaction()?;
            let output = Self::run_statement(&tx, stmt, params, opts.raw)?;
            if opts.commit {
                tx.commit()?;
            }
            // Dropping the transaction uncommitted rolls it back.
            Ok(output)
        })();

        match outcome {
            Ok(output) => Ok(output),
            Err(err) => {
                error!(error = %err, "statement execution failed");
                Err(err)
            }
        }
    }

    async fn table_exists(
        &self,
        table: &str,
        database: Option<&str>,
        verbose: bool,
    ) -> Result<bool> {
        // An attached database has its own sqlite_master.
        let sql = match database {
            Some(db) => format!(
                "SELECT COUNT(*) FROM {}.sqlite_master WHERE type = 'table' AND name = :table",
                self.dialect.quote_ident(db)
            ),
            None => {
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = :table"
                    .to_string()
            }
        };

        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row(&sql, &[(":table", table)], |row| row.get(0))?;
        let exists = count > 0;
        if !exists && verbose {
            warn!(database = database.unwrap_or("main"), table, "table does not exist");
        }
        Ok(exists)
    }

    async fn close(&self) {
        // The file handle closes when the connection drops.
    }
}

fn bind_named(stmt: &mut rusqlite::Statement<'_>, params: &Params) -> Result<()> {
    let names: Vec<Option<String>> = (1..=stmt.parameter_count())
        .map(|idx| stmt.parameter_name(idx).map(str::to_string))
        .collect();

    for (offset, name) in names.iter().enumerate() {
        let idx = offset + 1;
        let name = name.as_deref().ok_or_else(|| {
            DbiError::Parameter(format!(
                "placeholder at index {} is positional; named parameters required",
                idx
            ))
        })?;
        let bare = name.trim_start_matches(':');
        let value = params.get(bare).ok_or_else(|| {
            DbiError::Parameter(format!("no binding supplied for parameter '{}'", name))
        })?;
        stmt.raw_bind_parameter(idx, value)?;
    }
    Ok(())
}

fn decode_cell(value: ValueRef<'_>) -> SqlValue {
    match value {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(v) => SqlValue::I64(v),
        ValueRef::Real(v) => SqlValue::F64(v),
        ValueRef::Text(v) => SqlValue::Text(String::from_utf8_lossy(v).to_string()),
        ValueRef::Blob(v) => SqlValue::Bytes(v.to_vec()),
    }
}
