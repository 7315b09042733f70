//! Backend strategy implementations.
//!
//! One module per supported database family, each implementing [`Backend`]:
//!
//! - [`mssql`]: Microsoft SQL Server (tiberius + bb8 pool)
//! - [`mysql`]: MySQL/MariaDB (mysql_async pool)
//! - [`sqlite`]: SQLite (rusqlite)
//! - [`oracle`]: Oracle (ODBC bridge)
//!
//! Each driver is gated by the cargo feature of the same name.
//!
//! Operations a family cannot provide return
//! [`DbiError::Unsupported`](crate::error::DbiError) with the family and
//! operation named, never a silent no-op. The trait's default bodies are
//! those tagged rejections; a backend opts in to a capability by
//! overriding the method.

#[cfg(feature = "mssql")]
pub mod mssql;
#[cfg(feature = "mysql")]
pub mod mysql;
#[cfg(feature = "oracle")]
pub mod oracle;
#[cfg(feature = "sqlite")]
pub mod sqlite;

use async_trait::async_trait;

use crate::backup::ExitCode;
use crate::descriptor::BackendFamily;
use crate::error::{DbiError, Result};
use crate::frame::QueryOutput;
use crate::value::{Params, SqlValue};

/// Options controlling statement execution.
#[derive(Debug, Clone, Copy)]
pub struct QueryOptions {
    /// Return raw row tuples rather than a labeled frame. Defaults to
    /// true for efficiency.
    pub raw: bool,
    /// Commit the per-call transaction (default). When false the
    /// transaction is rolled back on scope exit, so the statement's
    /// effects are discarded (validation / dry-run).
    pub commit: bool,
    /// Bypass the statement safety filter. Responsibility for the
    /// statement's content shifts to the caller.
    pub ignore_unsafe: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            raw: true,
            commit: true,
            ignore_unsafe: false,
        }
    }
}

impl QueryOptions {
    /// Options producing a labeled [`Frame`](crate::frame::Frame) instead
    /// of raw tuples.
    pub fn frame() -> Self {
        Self {
            raw: false,
            ..Self::default()
        }
    }
}

/// Result of a read-oriented stored procedure call.
#[derive(Debug, Clone)]
pub struct ProcedureResult {
    /// Query-shaped output.
    pub output: QueryOutput,
    /// True when the procedure returned at least one row.
    pub success: bool,
}

/// Result of an update-oriented stored procedure call.
#[derive(Debug, Clone, Copy)]
pub struct UpdateResult {
    /// True when the call committed without error.
    pub success: bool,
    /// Identifier of the last inserted row, when requested and available.
    pub last_insert_id: Option<i64>,
}

/// The unified operation set every backend strategy exposes.
///
/// All methods are async because callers live in a tokio runtime;
/// synchronous drivers serialize internally. Each call borrows one pooled
/// connection for its duration and releases it on every exit path.
#[async_trait]
pub trait Backend: Send + Sync {
    /// The backend family this strategy serves.
    fn family(&self) -> BackendFamily;

    /// Name of the database the engine is bound to.
    fn database_name(&self) -> &str;

    /// Execute a parametrized statement.
    ///
    /// The statement passes the safety filter first unless
    /// [`QueryOptions::ignore_unsafe`] is set. Named bindings use colon
    /// format (`:name`). Statements producing no result set (DDL etc.)
    /// yield [`QueryOutput::Absent`] regardless of `raw`.
    ///
    /// Backend failures are logged once to the operator channel and
    /// returned as `Err` carrying the cause, so callers can distinguish
    /// "no rows" from "backend error".
    async fn execute_query(
        &self,
        stmt: &str,
        params: Option<&Params>,
        opts: QueryOptions,
    ) -> Result<QueryOutput>;

    /// Retrieve a stored procedure's parameter names from the backend's
    /// system catalog, in declaration order, with any backend-specific
    /// prefix character stripped.
    ///
    /// # Errors
    ///
    /// [`DbiError::ProcedureNotFound`] when the lookup yields nothing;
    /// one policy across all backends.
    async fn get_parameter_names(&self, proc: &str) -> Result<Vec<String>> {
        let _ = proc;
        Err(self.unsupported("get_parameter_names"))
    }

    /// Call a read-oriented stored procedure.
    ///
    /// When `paramnames` is omitted the names are derived via
    /// [`get_parameter_names`](Backend::get_parameter_names); pass them
    /// explicitly for repeated calls. Success means the procedure
    /// returned at least one row.
    async fn call_procedure(
        &self,
        proc: &str,
        params: Option<&Params>,
        paramnames: Option<&[String]>,
        raw: bool,
    ) -> Result<ProcedureResult> {
        let _ = (proc, params, paramnames, raw);
        Err(self.unsupported("call_procedure"))
    }

    /// Call an update/insert stored procedure.
    ///
    /// Absence of rows is the normal case; success means the call
    /// committed without error. Failures are logged to the operator
    /// channel before the `Err` is returned. With `return_id` the
    /// backend-specific last-inserted-identifier mechanism is invoked.
    async fn call_procedure_update(
        &self,
        proc: &str,
        data: &Params,
        paramnames: Option<&[String]>,
        return_id: bool,
    ) -> Result<UpdateResult> {
        let _ = (proc, data, paramnames, return_id);
        Err(self.unsupported("call_procedure_update"))
    }

    /// Call an update/insert stored procedure with **no** error
    /// interception: any backend failure propagates verbatim and nothing
    /// is logged. Exists so callers needing fine-grained control (e.g.
    /// distinguishing a duplicate-key violation) are not forced through
    /// the opinionated reporting path.
    async fn call_procedure_update_raw(
        &self,
        proc: &str,
        data: &Params,
        paramnames: Option<&[String]>,
    ) -> Result<()> {
        let _ = (proc, data, paramnames);
        Err(self.unsupported("call_procedure_update_raw"))
    }

    /// Call an update/insert stored procedure once per iterable item,
    /// passing `args` positionally ahead of the item. MySQL and SQL
    /// Server only.
    async fn call_procedure_update_many(
        &self,
        proc: &str,
        args: &[SqlValue],
        iterable: &[SqlValue],
    ) -> Result<bool> {
        let _ = (proc, args, iterable);
        Err(self.unsupported("call_procedure_update_many"))
    }

    /// Test whether a table exists, optionally in another database
    /// (SQL Server and SQLite only; other families query the connected
    /// database). When missing and `verbose`, a warning naming the
    /// qualified object is emitted.
    async fn table_exists(
        &self,
        table: &str,
        database: Option<&str>,
        verbose: bool,
    ) -> Result<bool>;

    /// Test whether a database exists. SQL Server only; other families
    /// have a fixed single database per connection.
    async fn database_exists(&self, database: &str, verbose: bool) -> Result<bool> {
        let _ = (database, verbose);
        Err(self.unsupported("database_exists"))
    }

    /// Order-independent aggregate hash over all rows of a table, `None`
    /// when the table does not exist. SQL Server only.
    async fn checksum(&self, table: &str, database: Option<&str>) -> Result<Option<i64>> {
        let _ = (table, database);
        Err(self.unsupported("checksum"))
    }

    /// Back the table up to the backup database and verify by checksum.
    /// SQL Server only.
    async fn backup(&self, table: &str, verbose: bool) -> Result<ExitCode> {
        let _ = (table, verbose);
        Err(self.unsupported("backup"))
    }

    /// Close the connection pool.
    async fn close(&self);

    /// Tagged rejection for an operation this family does not provide.
    fn unsupported(&self, operation: &'static str) -> DbiError {
        DbiError::Unsupported {
            family: self.family(),
            operation,
        }
    }
}
