//! SQL Server backend: tiberius over a bb8 connection pool.
//!
//! The only family implementing the full operation set, including the
//! backup-and-verify workflow. Statements arrive with colon-format named
//! parameters and are rewritten to `@Pn` placeholders before binding.

use async_trait::async_trait;
use bb8::{Pool, PooledConnection};
use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use tiberius::{AuthMethod, Client, ColumnType, Config, EncryptionLevel, Query};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::backends::{Backend, ProcedureResult, QueryOptions, UpdateResult};
use crate::backup::{backup_database_name, BackupOutcome, ExitCode};
use crate::descriptor::{BackendFamily, ConnectionDescriptor, PoolSettings};
use crate::dialect::Dialect;
use crate::error::{DbiError, Result};
use crate::frame::{Frame, QueryOutput, Row};
use crate::safety;
use crate::value::{Params, SqlValue};

type MssqlClient = Client<Compat<TcpStream>>;

/// Connection manager for bb8 pool with tiberius.
#[derive(Clone)]
struct TiberiusManager {
    descriptor: ConnectionDescriptor,
}

impl TiberiusManager {
    fn new(descriptor: ConnectionDescriptor) -> Self {
        Self { descriptor }
    }

    fn build_config(&self) -> Config {
        let mut config = Config::new();
        config.host(self.descriptor.host());
        config.port(self.descriptor.port());
        config.database(self.descriptor.database());
        config.authentication(AuthMethod::sql_server(
            self.descriptor.user(),
            self.descriptor.password(),
        ));

        match self
            .descriptor
            .option("encrypt")
            .map(str::to_lowercase)
            .as_deref()
        {
            Some("false") | Some("no") | Some("0") | Some("disable") => {
                config.encryption(EncryptionLevel::NotSupported);
            }
            _ => {
                if !matches!(
                    self.descriptor
                        .option("trust_server_certificate")
                        .map(str::to_lowercase)
                        .as_deref(),
                    Some("false") | Some("no") | Some("0")
                ) {
                    config.trust_cert();
                }
                config.encryption(EncryptionLevel::Required);
            }
        }

        config
    }
}

#[async_trait]
impl bb8::ManageConnection for TiberiusManager {
    type Connection = MssqlClient;
    type Error = tiberius::error::Error;

    async fn connect(&self) -> std::result::Result<Self::Connection, Self::Error> {
        let config = self.build_config();
        let tcp = TcpStream::connect(config.get_addr())
            .await
            .map_err(|e| tiberius::error::Error::Io {
                kind: e.kind(),
                message: e.to_string(),
            })?;

        tcp.set_nodelay(true).ok();

        Client::connect(config, tcp.compat_write()).await
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> std::result::Result<(), Self::Error> {
        conn.simple_query("SELECT 1").await?.into_row().await?;
        Ok(())
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}

/// SQL Server backend over a bb8 pool.
///
/// The pool holds exactly `PoolSettings::size` connections with no
/// overflow; acquisition waits up to the configured timeout. Connections
/// are validated on checkout and recycled after the configured lifetime,
/// so a long-idle engine never hands out a dead socket.
pub struct MssqlBackend {
    pool: Pool<TiberiusManager>,
    descriptor: ConnectionDescriptor,
    dialect: Dialect,
}

impl MssqlBackend {
    /// Build the pooled engine and verify connectivity with one probe
    /// round trip.
    pub async fn connect(descriptor: ConnectionDescriptor, settings: &PoolSettings) -> Result<Self> {
        let manager = TiberiusManager::new(descriptor.clone());
        let pool = Pool::builder()
            .max_size(settings.size)
            .connection_timeout(settings.acquire_timeout())
            .max_lifetime(Some(settings.recycle()))
            .test_on_check_out(settings.pre_ping)
            .build(manager)
            .await
            .map_err(|e| DbiError::pool(e, "building SQL Server pool"))?;

        {
            let mut conn = pool
                .get()
                .await
                .map_err(|e| DbiError::pool(e, "probing SQL Server pool"))?;
            conn.simple_query("SELECT 1").await?.into_row().await?;
        }

        info!(
            host = descriptor.host(),
            port = descriptor.port(),
            database = descriptor.database(),
            pool_size = settings.size,
            "connected to SQL Server"
        );

        Ok(Self {
            pool,
            descriptor,
            dialect: Dialect::new(BackendFamily::Mssql),
        })
    }

    async fn client(&self) -> Result<PooledConnection<'_, TiberiusManager>> {
        self.pool
            .get()
            .await
            .map_err(|e| DbiError::pool(e, "acquiring SQL Server connection"))
    }

    /// Execute one positional-placeholder statement inside an open
    /// transaction and package its result.
    async fn statement_exec(
        client: &mut MssqlClient,
        sql: &str,
        values: &[SqlValue],
        raw: bool,
    ) -> Result<QueryOutput> {
        let mut query = Query::new(sql.to_string());
        for value in values {
            bind_value(&mut query, value);
        }

        let mut stream = query.query(client).await?;
        let columns: Vec<String> = stream
            .columns()
            .await?
            .map(|cols| cols.iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();
        let sets = stream.into_results().await?;

        // No column metadata at all means the statement produced no
        // result set (DDL, INSERT, ...), as opposed to zero rows.
        if columns.is_empty() && sets.iter().all(|s| s.is_empty()) {
            return Ok(QueryOutput::Absent);
        }

        if raw {
            let rows: Vec<Row> = sets.into_iter().flatten().map(|r| decode_row(&r)).collect();
            return Ok(QueryOutput::Rows(rows));
        }

        // Procedures may yield several result sets; collapse them
        // through the stored-result adapter, each set labeled with its
        // own headers.
        let frames = sets.into_iter().filter(|s| !s.is_empty()).map(|set| -> Result<Frame> {
            let cols: Vec<String> = set
                .first()
                .map(|r| r.columns().iter().map(|c| c.name().to_string()).collect())
                .unwrap_or_default();
            let rows: Vec<Row> = set.iter().map(decode_row).collect();
            Ok(Frame::new(cols, rows))
        });
        let mut frame = Frame::from_stored_results(frames);
        if frame.columns().is_empty() {
            frame = Frame::with_columns(columns);
        }
        Ok(QueryOutput::Frame(frame))
    }

    /// Run a rewritten statement under a per-call transaction. The
    /// transaction commits only when the statement succeeded and the
    /// caller asked for a commit; otherwise it rolls back, which makes
    /// `commit = false` a dry run.
    async fn transactional_exec(
        &self,
        sql: &str,
        values: &[SqlValue],
        opts: QueryOptions,
    ) -> Result<QueryOutput> {
        let mut client = self.client().await?;
        client.execute("BEGIN TRAN", &[]).await?;
        let outcome = Self::statement_exec(&mut client, sql, values, opts.raw).await;
        let end = if outcome.is_ok() && opts.commit {
            "COMMIT TRAN"
        } else {
            "ROLLBACK TRAN"
        };
        let ended = client.execute(end, &[]).await.map(|_| ());
        settle(outcome, ended)
    }

    async fn resolve_paramnames(
        &self,
        proc: &str,
        paramnames: Option<&[String]>,
    ) -> Result<Vec<String>> {
        match paramnames {
            Some(names) => Ok(names.to_vec()),
            None => self.get_parameter_names(proc).await,
        }
    }

    /// Procedure update body shared by the logging and raw entry points.
    async fn update_inner(
        &self,
        proc: &str,
        data: &Params,
        paramnames: Option<&[String]>,
        return_id: bool,
    ) -> Result<Option<i64>> {
        let names = self.resolve_paramnames(proc, paramnames).await?;
        let stmt = self.dialect.procedure_call(proc, &names);
        let (sql, values) = self.dialect.rewrite_named(&stmt, data)?;

        let mut client = self.client().await?;
        client.execute("BEGIN TRAN", &[]).await?;
        let outcome = Self::update_exec(&mut client, &sql, &values, return_id).await;
        let end = if outcome.is_ok() {
            "COMMIT TRAN"
        } else {
            "ROLLBACK TRAN"
        };
        let ended = client.execute(end, &[]).await.map(|_| ());
        settle(outcome, ended)
    }

    async fn update_exec(
        client: &mut MssqlClient,
        sql: &str,
        values: &[SqlValue],
        return_id: bool,
    ) -> Result<Option<i64>> {
        let mut query = Query::new(sql.to_string());
        for value in values {
            bind_value(&mut query, value);
        }
        let sets = query.query(&mut *client).await?.into_results().await?;

        if !return_id {
            return Ok(None);
        }
        // Insert procedures conventionally return the new id as a
        // single-cell row. Fall back to the session identity, read on
        // the same connection inside the same transaction.
        let returned = sets
            .iter()
            .flatten()
            .next()
            .and_then(|r| r.try_get::<i64, _>(0).ok().flatten());
        if returned.is_some() {
            return Ok(returned);
        }
        let row = client
            .simple_query("SELECT CAST(@@IDENTITY AS BIGINT)")
            .await?
            .into_row()
            .await?;
        Ok(row.and_then(|r| r.try_get::<i64, _>(0).ok().flatten()))
    }

    /// Scalar `SELECT COUNT(*)` helper with one bound text parameter.
    async fn count_query(&self, sql: &str, bind: &str) -> Result<i64> {
        let mut client = self.client().await?;
        let mut query = Query::new(sql.to_string());
        query.bind(bind);
        let row = query.query(&mut client).await?.into_row().await?;
        Ok(row
            .and_then(|r| r.try_get::<i32, _>(0).ok().flatten())
            .map(i64::from)
            .unwrap_or(0))
    }
}

#[async_trait]
impl Backend for MssqlBackend {
    fn family(&self) -> BackendFamily {
        BackendFamily::Mssql
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
        let (sql, values) = self.dialect.rewrite_named(stmt, params.unwrap_or(&empty))?;

        match self.transactional_exec(&sql, &values, opts).await {
            Ok(output) => Ok(output),
            Err(err) => {
                error!(error = %err, "statement execution failed");
                Err(err)
            }
        }
    }

    async fn get_parameter_names(&self, proc: &str) -> Result<Vec<String>> {
        let mut client = self.client().await?;
        let mut query = Query::new(PARAMETER_NAMES_STATEMENT);
        query.bind(proc);
        let rows = query.query(&mut client).await?.into_first_result().await?;

        let names: Vec<String> = rows
            .iter()
            .filter_map(|r| r.try_get::<&str, _>(0).ok().flatten())
            .map(str::to_string)
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
        let names = self.resolve_paramnames(proc, paramnames).await?;
        let stmt = self.dialect.procedure_call(proc, &names);
        let opts = QueryOptions {
            raw,
            ..QueryOptions::default()
        };
        let output = self.execute_query(&stmt, params, opts).await?;
        let success = output.rows().map(|r| !r.is_empty()).unwrap_or(false);
        Ok(ProcedureResult { output, success })
    }

    async fn call_procedure_update(
        &self,
        proc: &str,
        data: &Params,
        paramnames: Option<&[String]>,
        return_id: bool,
    ) -> Result<UpdateResult> {
        match self.update_inner(proc, data, paramnames, return_id).await {
            Ok(last_insert_id) => Ok(UpdateResult {
                success: true,
                last_insert_id,
            }),
            Err(err) => {
                error!(procedure = proc, error = %err, "stored procedure update failed");
                Err(err)
            }
        }
    }

    async fn call_procedure_update_raw(
        &self,
        proc: &str,
        data: &Params,
        paramnames: Option<&[String]>,
    ) -> Result<()> {
        self.update_inner(proc, data, paramnames, false).await.map(|_| ())
    }

    async fn call_procedure_update_many(
        &self,
        proc: &str,
        args: &[SqlValue],
        iterable: &[SqlValue],
    ) -> Result<bool> {
        let sql = positional_exec_statement(proc, args.len() + 1);
        let mut client = self.client().await?;
        client.execute("BEGIN TRAN", &[]).await?;

        let mut outcome: Result<()> = Ok(());
        for item in iterable {
            let mut query = Query::new(sql.clone());
            for value in args {
                bind_value(&mut query, value);
            }
            bind_value(&mut query, item);
            let run = async {
                query.query(&mut *client).await?.into_results().await?;
                Ok(())
            }
            .await;
            if let Err(err) = run {
                outcome = Err(err);
                break;
            }
        }

        let end = if outcome.is_ok() {
            "COMMIT TRAN"
        } else {
            "ROLLBACK TRAN"
        };
        let ended = client.execute(end, &[]).await.map(|_| ());

        match settle(outcome, ended) {
            Ok(()) => Ok(true),
            Err(err) => {
                error!(procedure = proc, error = %err, "bulk stored procedure update failed");
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
        let db = database.unwrap_or_else(|| self.descriptor.database());
        let sql = table_count_statement(&self.dialect.quote_ident(db));
        let exists = self.count_query(&sql, table).await? > 0;
        if !exists && verbose {
            warn!(database = db, table, "table does not exist");
        }
        Ok(exists)
    }

    async fn database_exists(&self, database: &str, verbose: bool) -> Result<bool> {
        let exists = self.count_query(DATABASE_COUNT_STATEMENT, database).await? > 0;
        if !exists && verbose {
            warn!(database, "database does not exist");
        }
        Ok(exists)
    }

    async fn checksum(&self, table: &str, database: Option<&str>) -> Result<Option<i64>> {
        if !self.table_exists(table, database, false).await? {
            return Ok(None);
        }

        let db = database.unwrap_or_else(|| self.descriptor.database());
        let sql = checksum_statement(
            &self.dialect.quote_ident(db),
            &self.dialect.quote_ident(table),
        );

        let mut client = self.client().await?;
        let row = client.simple_query(sql.as_str()).await?.into_row().await?;
        Ok(row.and_then(|r| r.try_get::<i64, _>(0).ok().flatten()))
    }

    async fn backup(&self, table: &str, verbose: bool) -> Result<ExitCode> {
        let mut outcome = BackupOutcome::default();

        outcome.table_exists = self.table_exists(table, None, verbose).await?;
        if outcome.table_exists {
            let backup_db = backup_database_name(self.descriptor.database());
            outcome.backup_db_exists = self.database_exists(&backup_db, verbose).await?;

            if outcome.backup_db_exists {
                let src = format!(
                    "{}.dbo.{}",
                    self.dialect.quote_ident(self.descriptor.database()),
                    self.dialect.quote_ident(table)
                );
                let dst = format!(
                    "{}.dbo.{}",
                    self.dialect.quote_ident(&backup_db),
                    self.dialect.quote_ident(table)
                );

                {
                    let mut client = self.client().await?;
                    client
                        .execute(format!("DROP TABLE IF EXISTS {}", dst), &[])
                        .await?;
                    client
                        .execute(format!("SELECT * INTO {} FROM {}", dst, src), &[])
                        .await?;
                }

                let source_sum = self.checksum(table, None).await?;
                let backup_sum = self.checksum(table, Some(&backup_db)).await?;
                outcome.checksum_match = source_sum.is_some() && source_sum == backup_sum;
                debug!(?source_sum, ?backup_sum, table, "backup checksums");
            }
        }

        let code = outcome.exit_code();
        if verbose {
            if code.is_ok() {
                info!(table, "Table backup successful.");
            } else {
                error!(table, code = %code, "Table backup failed.");
            }
        }
        Ok(code)
    }

    async fn close(&self) {
        // bb8 drops pooled connections when the pool is dropped; nothing
        // to tear down eagerly.
    }
}

/// Resolve a transaction body's outcome against the COMMIT/ROLLBACK
/// result. A failed COMMIT surfaces; a failed ROLLBACK after a statement
/// error is logged so the original cause propagates.
fn settle<T>(
    outcome: Result<T>,
    ended: std::result::Result<(), tiberius::error::Error>,
) -> Result<T> {
    match ended {
        Ok(()) => outcome,
        Err(end_err) => match outcome {
            Ok(_) => Err(end_err.into()),
            Err(original) => {
                warn!(error = %end_err, "transaction rollback failed");
                Err(original)
            }
        },
    }
}

/// Bind one value onto a tiberius query in placeholder order.
fn bind_value<'a>(query: &mut Query<'a>, value: &'a SqlValue) {
    match value {
        SqlValue::Null => query.bind(Option::<&str>::None),
        SqlValue::Bool(v) => query.bind(*v),
        SqlValue::I64(v) => query.bind(*v),
        SqlValue::F64(v) => query.bind(*v),
        SqlValue::Text(v) => query.bind(v.as_str()),
        SqlValue::Bytes(v) => query.bind(v.as_slice()),
        SqlValue::Uuid(v) => query.bind(*v),
        // tiberius implements only the by-reference `ToSql` for
        // `rust_decimal::Decimal`, not the by-value `IntoSql` that
        // `Query::bind` requires; convert to `Numeric` the same way its
        // `ToSql` impl does.
        SqlValue::Decimal(v) => {
            let unpacked = v.unpack();
            let mut mantissa = (((unpacked.hi as u128) << 64)
                + ((unpacked.mid as u128) << 32)
                + unpacked.lo as u128) as i128;
            if v.is_sign_negative() {
                mantissa = -mantissa;
            }
            query.bind(tiberius::numeric::Numeric::new_with_scale(
                mantissa,
                v.scale() as u8,
            ));
        }
        SqlValue::DateTime(v) => query.bind(*v),
    }
}

/// `EXEC proc @P1, ..., @Pn` for positional bulk calls.
fn positional_exec_statement(proc: &str, params: usize) -> String {
    let placeholders: Vec<String> = (1..=params).map(|i| format!("@P{}", i)).collect();
    format!("EXEC {} {}", proc, placeholders.join(", "))
}

/// Parameter names carry a leading '@' in the catalog; the SUBSTRING
/// strips it so callers bind with the bare name.
const PARAMETER_NAMES_STATEMENT: &str = "SELECT SUBSTRING(p.name, 2, 128) \
     FROM sys.parameters p \
     JOIN sys.procedures sp ON p.object_id = sp.object_id \
     WHERE sp.name = @P1 \
     ORDER BY p.parameter_id";

const DATABASE_COUNT_STATEMENT: &str = "SELECT COUNT(*) FROM sys.databases WHERE name = @P1";

/// Table lookup in a named database's INFORMATION_SCHEMA. The database
/// identifier is quoted by the caller; the table name is bound.
fn table_count_statement(db_ident: &str) -> String {
    format!(
        "SELECT COUNT(*) FROM {}.INFORMATION_SCHEMA.TABLES WHERE TABLE_NAME = @P1",
        db_ident
    )
}

/// BINARY_CHECKSUM per row, CHECKSUM_AGG across rows: the aggregate is
/// order-independent, which is what a copy verification needs. NULL
/// (empty table) reads as 0 so two empty tables compare equal.
fn checksum_statement(db_ident: &str, table_ident: &str) -> String {
    format!(
        "SELECT CAST(ISNULL(CHECKSUM_AGG(BINARY_CHECKSUM(*)), 0) AS BIGINT) FROM {}.dbo.{}",
        db_ident, table_ident
    )
}

/// Decode a tiberius row into the uniform value model, widening integers
/// to `I64` and floats to `F64`.
fn decode_row(row: &tiberius::Row) -> Row {
    let mut out = Vec::with_capacity(row.columns().len());
    for (idx, col) in row.columns().iter().enumerate() {
        out.push(decode_cell(row, idx, col.column_type()));
    }
    out
}

fn decode_cell(row: &tiberius::Row, idx: usize, ty: ColumnType) -> SqlValue {
    match ty {
        ColumnType::Bit | ColumnType::Bitn => row
            .try_get::<bool, _>(idx)
            .ok()
            .flatten()
            .map(SqlValue::Bool)
            .unwrap_or(SqlValue::Null),
        ColumnType::Int1 => row
            .try_get::<u8, _>(idx)
            .ok()
            .flatten()
            .map(|v| SqlValue::I64(i64::from(v)))
            .unwrap_or(SqlValue::Null),
        ColumnType::Int2 => row
            .try_get::<i16, _>(idx)
            .ok()
            .flatten()
            .map(|v| SqlValue::I64(i64::from(v)))
            .unwrap_or(SqlValue::Null),
        ColumnType::Int4 => row
            .try_get::<i32, _>(idx)
            .ok()
            .flatten()
            .map(|v| SqlValue::I64(i64::from(v)))
            .unwrap_or(SqlValue::Null),
        ColumnType::Int8 => row
            .try_get::<i64, _>(idx)
            .ok()
            .flatten()
            .map(SqlValue::I64)
            .unwrap_or(SqlValue::Null),
        // Nullable integer columns report Intn with a per-value width.
        ColumnType::Intn => row
            .try_get::<i64, _>(idx)
            .ok()
            .flatten()
            .map(SqlValue::I64)
            .or_else(|| {
                row.try_get::<i32, _>(idx)
                    .ok()
                    .flatten()
                    .map(|v| SqlValue::I64(i64::from(v)))
            })
            .or_else(|| {
                row.try_get::<i16, _>(idx)
                    .ok()
                    .flatten()
                    .map(|v| SqlValue::I64(i64::from(v)))
            })
            .or_else(|| {
                row.try_get::<u8, _>(idx)
                    .ok()
                    .flatten()
                    .map(|v| SqlValue::I64(i64::from(v)))
            })
            .unwrap_or(SqlValue::Null),
        ColumnType::Float4 => row
            .try_get::<f32, _>(idx)
            .ok()
            .flatten()
            .map(|v| SqlValue::F64(f64::from(v)))
            .unwrap_or(SqlValue::Null),
        ColumnType::Float8 => row
            .try_get::<f64, _>(idx)
            .ok()
            .flatten()
            .map(SqlValue::F64)
            .unwrap_or(SqlValue::Null),
        ColumnType::Floatn => row
            .try_get::<f64, _>(idx)
            .ok()
            .flatten()
            .map(SqlValue::F64)
            .or_else(|| {
                row.try_get::<f32, _>(idx)
                    .ok()
                    .flatten()
                    .map(|v| SqlValue::F64(f64::from(v)))
            })
            .unwrap_or(SqlValue::Null),
        ColumnType::Guid => row
            .try_get::<Uuid, _>(idx)
            .ok()
            .flatten()
            .map(SqlValue::Uuid)
            .unwrap_or(SqlValue::Null),
        ColumnType::Datetime
        | ColumnType::Datetime2
        | ColumnType::Datetime4
        | ColumnType::Datetimen => row
            .try_get::<NaiveDateTime, _>(idx)
            .ok()
            .flatten()
            .map(SqlValue::DateTime)
            .unwrap_or(SqlValue::Null),
        ColumnType::Daten => row
            .try_get::<chrono::NaiveDate, _>(idx)
            .ok()
            .flatten()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(SqlValue::DateTime)
            .unwrap_or(SqlValue::Null),
        ColumnType::Timen => row
            .try_get::<chrono::NaiveTime, _>(idx)
            .ok()
            .flatten()
            .map(|t| SqlValue::Text(t.to_string()))
            .unwrap_or(SqlValue::Null),
        ColumnType::BigBinary | ColumnType::BigVarBin | ColumnType::Image => row
            .try_get::<&[u8], _>(idx)
            .ok()
            .flatten()
            .map(|v| SqlValue::Bytes(v.to_vec()))
            .unwrap_or(SqlValue::Null),
        ColumnType::Decimaln | ColumnType::Numericn | ColumnType::Money | ColumnType::Money4 => {
            row.try_get::<Decimal, _>(idx)
                .ok()
                .flatten()
                .map(SqlValue::Decimal)
                .or_else(|| {
                    row.try_get::<f64, _>(idx)
                        .ok()
                        .flatten()
                        .map(SqlValue::F64)
                })
                .unwrap_or(SqlValue::Null)
        }
        // Character data and anything exotic reads as text.
        _ => row
            .try_get::<&str, _>(idx)
            .ok()
            .flatten()
            .map(|s| SqlValue::Text(s.to_string()))
            .unwrap_or(SqlValue::Null),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positional_exec_statement() {
        assert_eq!(
            positional_exec_statement("usp_update_guitars", 3),
            "EXEC usp_update_guitars @P1, @P2, @P3"
        );
        assert_eq!(positional_exec_statement("usp_touch", 1), "EXEC usp_touch @P1");
    }

    fn dead_socket() -> tiberius::error::Error {
        tiberius::error::Error::Io {
            kind: std::io::ErrorKind::BrokenPipe,
            message: "connection gone".to_string(),
        }
    }

    #[test]
    fn test_settle_keeps_statement_error_over_rollback_failure() {
        let original: Result<()> = Err(DbiError::Parameter("boom".to_string()));
        let err = settle(original, Err(dead_socket())).unwrap_err();
        assert!(matches!(err, DbiError::Parameter(_)), "{:?}", err);
    }

    #[test]
    fn test_settle_surfaces_commit_failure() {
        let err = settle(Ok(()), Err(dead_socket())).unwrap_err();
        assert!(matches!(err, DbiError::Mssql(_)), "{:?}", err);
    }

    #[test]
    fn test_settle_passes_through_on_clean_end() {
        assert_eq!(settle(Ok(14), Ok(())).unwrap(), 14);
    }

    #[test]
    fn test_parameter_names_statement() {
        assert_eq!(
            PARAMETER_NAMES_STATEMENT,
            "SELECT SUBSTRING(p.name, 2, 128) \
             FROM sys.parameters p \
             JOIN sys.procedures sp ON p.object_id = sp.object_id \
             WHERE sp.name = @P1 \
             ORDER BY p.parameter_id"
        );
    }

    #[test]
    fn test_table_count_statement() {
        assert_eq!(
            table_count_statement("[stores]"),
            "SELECT COUNT(*) FROM [stores].INFORMATION_SCHEMA.TABLES WHERE TABLE_NAME = @P1"
        );
    }

    #[test]
    fn test_database_count_statement() {
        assert_eq!(
            DATABASE_COUNT_STATEMENT,
            "SELECT COUNT(*) FROM sys.databases WHERE name = @P1"
        );
    }

    #[test]
    fn test_checksum_statement() {
        assert_eq!(
            checksum_statement("[stores]", "[guitars]"),
            "SELECT CAST(ISNULL(CHECKSUM_AGG(BINARY_CHECKSUM(*)), 0) AS BIGINT) \
             FROM [stores].dbo.[guitars]"
        );
    }
}
