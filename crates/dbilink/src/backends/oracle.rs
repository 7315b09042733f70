//! Oracle backend over the ODBC bridge.
//!
//! ODBC connections are cheap to open and not thread-safe, so this
//! backend opens a fresh connection per call and serializes calls behind
//! a mutex instead of pooling. Values are fetched through a text row set,
//! so non-NULL cells surface as [`SqlValue::Text`] and parameter bindings
//! are rendered inline as escaped SQL literals.
//!
//! Requires an Oracle ODBC driver to be installed; the driver name can be
//! overridden with a `driver=` option in the connection descriptor.

use std::sync::Arc;

use async_trait::async_trait;
use odbc_api::{buffers::TextRowSet, ConnectionOptions, Cursor, Environment, ResultSetMetadata};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::backends::{Backend, ProcedureResult, QueryOptions};
use crate::descriptor::{BackendFamily, ConnectionDescriptor};
use crate::error::{DbiError, Result};
use crate::frame::{QueryOutput, Row};
use crate::safety;
use crate::value::{Params, SqlValue};

const FETCH_BATCH_SIZE: usize = 1000;
const MAX_CELL_BYTES: usize = 4096;

/// Oracle backend with per-call ODBC connections.
pub struct OracleBackend {
    env: Arc<Environment>,
    connection_string: String,
    descriptor: ConnectionDescriptor,
    /// Serializes ODBC operations.
    conn_mutex: Mutex<()>,
}

impl OracleBackend {
    /// Build the engine and verify connectivity with one probe
    /// connection, disposed before returning.
    pub async fn connect(descriptor: ConnectionDescriptor) -> Result<Self> {
        let env = Environment::new().map_err(|e| {
            DbiError::pool(
                format!(
                    "failed to create ODBC environment: {}. \
                     Make sure an Oracle ODBC driver is installed.",
                    e
                ),
                "ODBC connection",
            )
        })?;

        let driver = descriptor.option("driver").unwrap_or("Oracle");
        let connection_string = format!(
            "Driver={{{}}};DBQ=//{}:{}/{};UID={};PWD={};",
            driver,
            descriptor.host(),
            descriptor.port(),
            descriptor.database(),
            descriptor.user(),
            descriptor.password(),
        );

        {
            let conn = env
                .connect_with_connection_string(&connection_string, ConnectionOptions::default())
                .map_err(|e| {
                    DbiError::pool(
                        format!("failed to connect to Oracle via ODBC: {}", e),
                        "ODBC connection",
                    )
                })?;
            let _ = conn.execute("SELECT 1 FROM DUAL", ());
        }

        info!(
            host = descriptor.host(),
            port = descriptor.port(),
            database = descriptor.database(),
            "connected to Oracle via ODBC"
        );

        Ok(Self {
            env: Arc::new(env),
            connection_string,
            descriptor,
            conn_mutex: Mutex::new(()),
        })
    }

    fn get_connection(&self) -> Result<odbc_api::Connection<'_>> {
        self.env
            .connect_with_connection_string(&self.connection_string, ConnectionOptions::default())
            .map_err(|e| {
                DbiError::pool(
                    format!("ODBC connection failed: {}", e),
                    "getting ODBC connection",
                )
            })
    }

    /// Run one statement on a fresh connection and package the result.
    fn run_statement(&self, sql: &str, opts: QueryOptions) -> Result<QueryOutput> {
        let conn = self.get_connection()?;
        conn.set_autocommit(false)?;

        let outcome = Self::fetch_all(&conn, sql, opts.raw);
        if outcome.is_ok() && opts.commit {
            conn.commit()?;
        } else {
            conn.rollback()?;
        }
        outcome
    }

    fn fetch_all(conn: &odbc_api::Connection<'_>, sql: &str, raw: bool) -> Result<QueryOutput> {
        match conn.execute(sql, ())? {
            // No cursor at all: the statement produced no result set.
            None => Ok(QueryOutput::Absent),
            Some(mut cursor) => {
                let columns: Vec<String> = cursor
                    .column_names()?
                    .collect::<std::result::Result<_, _>>()?;
                let num_cols = columns.len();

                let mut buffers =
                    TextRowSet::for_cursor(FETCH_BATCH_SIZE, &mut cursor, Some(MAX_CELL_BYTES))?;
                let mut row_cursor = cursor.bind_buffer(&mut buffers)?;

                let mut rows: Vec<Row> = Vec::new();
                while let Some(batch) = row_cursor.fetch()? {
                    for row_idx in 0..batch.num_rows() {
                        let mut cells = Vec::with_capacity(num_cols);
                        for col_idx in 0..num_cols {
                            let cell = batch
                                .at(col_idx, row_idx)
                                .map(|bytes| {
                                    SqlValue::Text(String::from_utf8_lossy(bytes).to_string())
                                })
                                .unwrap_or(SqlValue::Null);
                            cells.push(cell);
                        }
                        rows.push(cells);
                    }
                }

                Ok(QueryOutput::from_rows(columns, rows, raw))
            }
        }
    }

    /// Text-fetch helper for internal catalog lookups.
    fn query_text(&self, sql: &str) -> Result<Vec<Vec<Option<String>>>> {
        let conn = self.get_connection()?;
        let mut rows = Vec::new();

        if let Some(mut cursor) = conn.execute(sql, ())? {
            let num_cols = cursor.num_result_cols()? as usize;
            let mut buffers =
                TextRowSet::for_cursor(FETCH_BATCH_SIZE, &mut cursor, Some(MAX_CELL_BYTES))?;
            let mut row_cursor = cursor.bind_buffer(&mut buffers)?;

            while let Some(batch) = row_cursor.fetch()? {
                for row_idx in 0..batch.num_rows() {
                    let mut row = Vec::with_capacity(num_cols);
                    for col_idx in 0..num_cols {
                        row.push(
                            batch
                                .at(col_idx, row_idx)
                                .map(|bytes| String::from_utf8_lossy(bytes).to_string()),
                        );
                    }
                    rows.push(row);
                }
            }
        }

        Ok(rows)
    }
}

#[async_trait]
impl Backend for OracleBackend {
    fn family(&self) -> BackendFamily {
        BackendFamily::Oracle
    }

    fn database_name(&self) -> &str {
        self.descriptor.database()
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
        let sql = inline_named(stmt, params.unwrap_or(&empty))?;

        let _lock = self.conn_mutex.lock().await;
        match self.run_statement(&sql, opts) {
            Ok(output) => Ok(output),
            Err(err) => {
                error!(error = %err, "statement execution failed");
                Err(err)
            }
        }
    }

    async fn get_parameter_names(&self, proc: &str) -> Result<Vec<String>> {
        let sql = parameter_names_statement(proc);

        let _lock = self.conn_mutex.lock().await;
        let rows = self.query_text(&sql)?;

        // The catalog reports names uppercased; callers bind lowercase.
        let names: Vec<String> = rows
            .into_iter()
            .filter_map(|r| r.into_iter().next().flatten())
            .map(|n| n.to_lowercase())
            .collect();

        if names.is_empty() {
            return Err(DbiError::ProcedureNotFound {
                proc: proc.to_string(),
            });
        }
        debug!(procedure = proc, count = names.len(), "resolved procedure parameters");
        Ok(names)
    }

    async fn call_procedure(
        &self,
        proc: &str,
        params: Option<&Params>,
        paramnames: Option<&[String]>,
        raw: bool,
    ) -> Result<ProcedureResult> {
        let names = match paramnames {
            Some(names) => names.to_vec(),
            None => self.get_parameter_names(proc).await?,
        };
        let bindings: Vec<String> = names.iter().map(|n| format!(":{}", n)).collect();
        // ODBC procedure-call escape syntax.
        let stmt = format!("{{CALL {}({})}}", proc, bindings.join(", "));
        let opts = QueryOptions {
            raw,
            ..QueryOptions::default()
        };
        let output = self.execute_query(&stmt, params, opts).await?;
        let success = output.rows().map(|r| !r.is_empty()).unwrap_or(false);
        Ok(ProcedureResult { output, success })
    }

    async fn table_exists(
        &self,
        table: &str,
        database: Option<&str>,
        verbose: bool,
    ) -> Result<bool> {
        let sql = table_count_statement(table, database);

        let _lock = self.conn_mutex.lock().await;
        let rows = self.query_text(&sql)?;
        let count: i64 = rows
            .first()
            .and_then(|r| r.first())
            .and_then(|v| v.as_deref())
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);

        let exists = count > 0;
        if !exists && verbose {
            warn!(table, "table does not exist");
        }
        Ok(exists)
    }

    async fn close(&self) {
        // ODBC connections are closed when dropped.
    }
}

/// Double single quotes inside a string literal.
fn escape_literal(s: &str) -> String {
    s.replace('\'', "''")
}

fn parameter_names_statement(proc: &str) -> String {
    format!(
        "SELECT ARGUMENT_NAME FROM USER_ARGUMENTS \
         WHERE UPPER(OBJECT_NAME) = UPPER('{}') AND ARGUMENT_NAME IS NOT NULL \
         ORDER BY POSITION",
        escape_literal(proc)
    )
}

fn table_count_statement(table: &str, owner: Option<&str>) -> String {
    match owner {
        Some(owner) => format!(
            "SELECT COUNT(*) FROM ALL_TABLES \
             WHERE UPPER(TABLE_NAME) = UPPER('{}') AND UPPER(OWNER) = UPPER('{}')",
            escape_literal(table),
            escape_literal(owner)
        ),
        None => format!(
            "SELECT COUNT(*) FROM ALL_TABLES WHERE UPPER(TABLE_NAME) = UPPER('{}')",
            escape_literal(table)
        ),
    }
}

/// Render a bind value as an inline SQL literal.
fn render_literal(value: &SqlValue) -> String {
    match value {
        SqlValue::Null => "NULL".to_string(),
        SqlValue::Bool(v) => if *v { "1" } else { "0" }.to_string(),
        SqlValue::I64(v) => v.to_string(),
        SqlValue::F64(v) => v.to_string(),
        SqlValue::Text(v) => format!("'{}'", escape_literal(v)),
        SqlValue::Bytes(v) => {
            let hex: String = v.iter().map(|b| format!("{:02X}", b)).collect();
            format!("HEXTORAW('{}')", hex)
        }
        SqlValue::Uuid(v) => format!("'{}'", v),
        SqlValue::Decimal(v) => v.to_string(),
        SqlValue::DateTime(v) => format!(
            "TO_TIMESTAMP('{}', 'YYYY-MM-DD HH24:MI:SS.FF6')",
            v.format("%Y-%m-%d %H:%M:%S%.6f")
        ),
    }
}

/// Substitute colon-format named parameters with inline literals.
///
/// Same scanning rules as the positional rewrite: markers inside string
/// literals and quoted identifiers stay untouched and `::` never starts
/// a marker.
fn inline_named(stmt: &str, params: &Params) -> Result<String> {
    let mut sql = String::with_capacity(stmt.len());
    let mut chars = stmt.char_indices().peekable();

    while let Some((pos, ch)) = chars.next() {
        match ch {
            '\'' => {
                sql.push(ch);
                for (_, c) in chars.by_ref() {
                    sql.push(c);
                    if c == '\'' {
                        break;
                    }
                }
            }
            '"' => {
                sql.push(ch);
                for (_, c) in chars.by_ref() {
                    sql.push(c);
                    if c == '"' {
                        break;
                    }
                }
            }
            ':' => {
                if matches!(chars.peek(), Some((_, ':'))) {
                    sql.push_str("::");
                    chars.next();
                    continue;
                }
                let start = pos + 1;
                let mut end = start;
                while let Some((p, c)) = chars.peek().copied() {
                    if c.is_alphanumeric() || c == '_' {
                        end = p + c.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                if end == start {
                    sql.push(':');
                    continue;
                }
                let name = &stmt[start..end];
                let value = params.get(name).ok_or_else(|| {
                    DbiError::Parameter(format!("no binding supplied for parameter ':{}'", name))
                })?;
                sql.push_str(&render_literal(value));
            }
            _ => sql.push(ch),
        }
    }

    Ok(sql)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params;

    #[test]
    fn test_render_literal_escapes_quotes() {
        assert_eq!(
            render_literal(&SqlValue::Text("O'Brien".to_string())),
            "'O''Brien'"
        );
        assert_eq!(render_literal(&SqlValue::Null), "NULL");
        assert_eq!(render_literal(&SqlValue::I64(42)), "42");
    }

    #[test]
    fn test_inline_named_substitution() {
        let p = params! { "colour" => "Black", "qty" => 3i64 };
        let sql = inline_named(
            "select * from guitars where colour = :colour and qty > :qty",
            &p,
        )
        .unwrap();
        assert_eq!(sql, "select * from guitars where colour = 'Black' and qty > 3");
    }

    #[test]
    fn test_inline_named_skips_literals() {
        let p = params! { "c" => 1i64 };
        let sql = inline_named("select ':skip' from t where c = :c", &p).unwrap();
        assert_eq!(sql, "select ':skip' from t where c = 1");
    }

    #[test]
    fn test_inline_named_missing_binding() {
        let err = inline_named("select :missing from dual", &Params::new()).unwrap_err();
        assert!(matches!(err, DbiError::Parameter(_)));
    }

    #[test]
    fn test_parameter_names_statement() {
        assert_eq!(
            parameter_names_statement("sp_get_guitars"),
            "SELECT ARGUMENT_NAME FROM USER_ARGUMENTS \
             WHERE UPPER(OBJECT_NAME) = UPPER('sp_get_guitars') AND ARGUMENT_NAME IS NOT NULL \
             ORDER BY POSITION"
        );
    }

    #[test]
    fn test_table_count_statement() {
        assert_eq!(
            table_count_statement("guitars", None),
            "SELECT COUNT(*) FROM ALL_TABLES WHERE UPPER(TABLE_NAME) = UPPER('guitars')"
        );
        assert_eq!(
            table_count_statement("guitars", Some("stores")),
            "SELECT COUNT(*) FROM ALL_TABLES \
             WHERE UPPER(TABLE_NAME) = UPPER('guitars') AND UPPER(OWNER) = UPPER('stores')"
        );
        // A quote in the name cannot break out of the literal.
        assert_eq!(
            table_count_statement("o'brien", None),
            "SELECT COUNT(*) FROM ALL_TABLES WHERE UPPER(TABLE_NAME) = UPPER('o''brien')"
        );
    }

    #[test]
    fn test_injection_attempt_is_neutralized() {
        let p = params! { "name" => "'; DROP TABLE users" };
        let sql = inline_named("select * from t where name = :name", &p).unwrap();
        assert_eq!(sql, "select * from t where name = '''; DROP TABLE users'");
    }
}
