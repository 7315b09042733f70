//! MySQL/MariaDB backend over mysql_async.
//!
//! The driver binds colon-format named parameters natively, so statements
//! run unrewritten. Procedure metadata comes from
//! `information_schema.parameters`.

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, Timelike};
use mysql_async::prelude::*;
use mysql_async::{Conn, Opts, OptsBuilder, Pool, PoolConstraints, PoolOpts, QueryResult, TxOpts};
use tracing::{debug, error, info, warn};

use crate::backends::{Backend, ProcedureResult, QueryOptions, UpdateResult};
use crate::descriptor::{BackendFamily, ConnectionDescriptor, PoolSettings};
use crate::dialect::Dialect;
use crate::error::{DbiError, Result};
use crate::frame::{QueryOutput, Row};
use crate::safety;
use crate::value::{Params, SqlValue};

/// MySQL backend over the mysql_async pool.
pub struct MysqlBackend {
    pool: Pool,
    descriptor: ConnectionDescriptor,
    settings: PoolSettings,
    dialect: Dialect,
}

impl MysqlBackend {
    /// Build the pooled engine and verify connectivity with one ping.
    pub async fn connect(descriptor: ConnectionDescriptor, settings: &PoolSettings) -> Result<Self> {
        let constraints =
            PoolConstraints::new(1, settings.size as usize).unwrap_or_default();
        let pool_opts = PoolOpts::default()
            .with_constraints(constraints)
            .with_inactive_connection_ttl(settings.recycle());

        let opts = OptsBuilder::default()
            .ip_or_hostname(descriptor.host().to_string())
            .tcp_port(descriptor.port())
            .user(Some(descriptor.user().to_string()))
            .pass(Some(descriptor.password().to_string()))
            .db_name(Some(descriptor.database().to_string()))
            .pool_opts(pool_opts);

        let pool = Pool::new(Opts::from(opts));

        {
            let mut conn = pool
                .get_conn()
                .await
                .map_err(|e| DbiError::pool(e, "probing MySQL pool"))?;
            conn.ping().await?;
        }

        info!(
            host = descriptor.host(),
            port = descriptor.port(),
            database = descriptor.database(),
            pool_size = settings.size,
            "connected to MySQL"
        );

        Ok(Self {
            pool,
            descriptor,
            settings: settings.clone(),
            dialect: Dialect::new(BackendFamily::Mysql),
        })
    }

    /// Acquire a pooled connection, validating it first when pre-ping is
    /// on. Acquisition waits at most the configured timeout.
    async fn conn(&self) -> Result<Conn> {
        let mut conn = tokio::time::timeout(self.settings.acquire_timeout(), self.pool.get_conn())
            .await
            .map_err(|_| DbiError::pool("acquisition timed out", "acquiring MySQL connection"))?
            .map_err(|e| DbiError::pool(e, "acquiring MySQL connection"))?;
        if self.settings.pre_ping {
            conn.ping().await?;
        }
        Ok(conn)
    }

    async fn statement_exec(
        conn: &mut Conn,
        stmt: &str,
        params: &Params,
        opts: QueryOptions,
    ) -> Result<QueryOutput> {
        let mut tx = conn.start_transaction(TxOpts::default()).await?;
        let outcome = Self::run_in_tx(&mut tx, stmt, params, opts.raw).await;
        if outcome.is_ok() && opts.commit {
            tx.commit().await?;
        } else {
            tx.rollback().await?;
        }
        outcome
    }

    async fn run_in_tx(
        tx: &mut mysql_async::Transaction<'_>,
        stmt: &str,
        params: &Params,
        raw: bool,
    ) -> Result<QueryOutput> {
        if params.is_empty() {
            let mut result = tx.query_iter(stmt).await?;
            drain(&mut result, raw).await
        } else {
            let mut result = tx.exec_iter(stmt, to_mysql_params(params)).await?;
            drain(&mut result, raw).await
        }
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

    async fn update_inner(
        &self,
        proc: &str,
        data: &Params,
        paramnames: Option<&[String]>,
        return_id: bool,
    ) -> Result<Option<i64>> {
        let names = self.resolve_paramnames(proc, paramnames).await?;
        let stmt = self.dialect.procedure_call(proc, &names);

        let mut conn = self.conn().await?;
        let mut tx = conn.start_transaction(TxOpts::default()).await?;
        let outcome = Self::update_exec(&mut tx, &stmt, data, return_id).await;
        if outcome.is_ok() {
            tx.commit().await?;
        } else {
            tx.rollback().await?;
        }
        outcome
    }

    async fn update_exec(
        tx: &mut mysql_async::Transaction<'_>,
        stmt: &str,
        data: &Params,
        return_id: bool,
    ) -> Result<Option<i64>> {
        tx.exec_drop(stmt, to_mysql_params(data)).await?;
        if !return_id {
            return Ok(None);
        }
        // The CALL wrapper zeroes the driver-reported id, so ask the
        // session directly on the same connection.
        let id: Option<i64> = tx.exec_first("SELECT LAST_INSERT_ID()", ()).await?;
        Ok(id.filter(|v| *v != 0))
    }
}

#[async_trait]
impl Backend for MysqlBackend {
    fn family(&self) -> BackendFamily {
        BackendFamily::Mysql
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
        let params = params.unwrap_or(&empty);

        let mut conn = self.conn().await?;
        match Self::statement_exec(&mut conn, stmt, params, opts).await {
            Ok(output) => Ok(output),
            Err(err) => {
                error!(error = %err, "statement execution failed");
                Err(err)
            }
        }
    }

    async fn get_parameter_names(&self, proc: &str) -> Result<Vec<String>> {
        let mut conn = self.conn().await?;
        let rows: Vec<Option<String>> = conn
            .exec(
                PARAMETER_NAMES_STATEMENT,
                mysql_async::params! {
                    "proc" => proc,
                    "db" => self.descriptor.database(),
                },
            )
            .await?;

        let names: Vec<String> = rows.into_iter().flatten().collect();
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
        let placeholders = vec!["?"; args.len() + 1].join(", ");
        let stmt = format!("CALL {}({})", proc, placeholders);

        let mut conn = self.conn().await?;
        let mut tx = conn.start_transaction(TxOpts::default()).await?;

        let mut outcome: Result<()> = Ok(());
        for item in iterable {
            let mut values: Vec<mysql_async::Value> = args.iter().map(to_mysql_value).collect();
            values.push(to_mysql_value(item));
            if let Err(err) = tx
                .exec_drop(stmt.as_str(), mysql_async::Params::Positional(values))
                .await
            {
                outcome = Err(err.into());
                break;
            }
        }

        if outcome.is_ok() {
            tx.commit().await?;
        } else {
            tx.rollback().await?;
        }

        match outcome {
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
        let mut conn = self.conn().await?;
        let count: Option<i64> = conn
            .exec_first(
                TABLE_COUNT_STATEMENT,
                mysql_async::params! {
                    "db" => db,
                    "table" => table,
                },
            )
            .await?;

        let exists = count.unwrap_or(0) > 0;
        if !exists && verbose {
            warn!(database = db, table, "table does not exist");
        }
        Ok(exists)
    }

    async fn close(&self) {
        if let Err(err) = self.pool.clone().disconnect().await {
            warn!(error = %err, "error disconnecting MySQL pool");
        }
    }
}

const PARAMETER_NAMES_STATEMENT: &str = "SELECT PARAMETER_NAME \
     FROM information_schema.parameters \
     WHERE SPECIFIC_NAME = :proc AND SPECIFIC_SCHEMA = :db \
     ORDER BY ORDINAL_POSITION";

const TABLE_COUNT_STATEMENT: &str = "SELECT COUNT(*) \
     FROM information_schema.tables \
     WHERE table_schema = :db AND table_name = :table";

/// Drain one result set into query output. Column metadata absent means
/// the statement produced no result set at all.
async fn drain<'a, 't, P>(result: &mut QueryResult<'a, 't, P>, raw: bool) -> Result<QueryOutput>
where
    P: mysql_async::prelude::Protocol,
{
    let columns: Vec<String> = result
        .columns()
        .map(|cols| cols.iter().map(|c| c.name_str().to_string()).collect())
        .unwrap_or_default();
    let rows: Vec<mysql_async::Row> = result.collect().await?;

    if columns.is_empty() {
        return Ok(QueryOutput::Absent);
    }
    let rows: Vec<Row> = rows.into_iter().map(decode_row).collect();
    Ok(QueryOutput::from_rows(columns, rows, raw))
}

fn to_mysql_params(params: &Params) -> mysql_async::Params {
    if params.is_empty() {
        return mysql_async::Params::Empty;
    }
    let map = params
        .iter()
        .map(|(k, v)| (k.clone().into_bytes(), to_mysql_value(v)))
        .collect();
    mysql_async::Params::Named(map)
}

fn to_mysql_value(value: &SqlValue) -> mysql_async::Value {
    use mysql_async::Value;

    match value {
        SqlValue::Null => Value::NULL,
        SqlValue::Bool(v) => Value::Int(i64::from(*v)),
        SqlValue::I64(v) => Value::Int(*v),
        SqlValue::F64(v) => Value::Double(*v),
        SqlValue::Text(v) => Value::Bytes(v.clone().into_bytes()),
        SqlValue::Bytes(v) => Value::Bytes(v.clone()),
        SqlValue::Uuid(v) => Value::Bytes(v.to_string().into_bytes()),
        SqlValue::Decimal(v) => Value::Bytes(v.to_string().into_bytes()),
        SqlValue::DateTime(v) => Value::Date(
            v.year() as u16,
            v.month() as u8,
            v.day() as u8,
            v.hour() as u8,
            v.minute() as u8,
            v.second() as u8,
            v.nanosecond() / 1000,
        ),
    }
}

fn from_mysql_value(value: mysql_async::Value) -> SqlValue {
    use mysql_async::Value;

    match value {
        Value::NULL => SqlValue::Null,
        Value::Int(v) => SqlValue::I64(v),
        Value::UInt(v) => i64::try_from(v)
            .map(SqlValue::I64)
            .unwrap_or_else(|_| SqlValue::Text(v.to_string())),
        Value::Float(v) => SqlValue::F64(f64::from(v)),
        Value::Double(v) => SqlValue::F64(v),
        Value::Bytes(bytes) => match String::from_utf8(bytes) {
            Ok(s) => SqlValue::Text(s),
            Err(e) => SqlValue::Bytes(e.into_bytes()),
        },
        Value::Date(y, mo, d, h, mi, s, us) => NaiveDate::from_ymd_opt(i32::from(y), u32::from(mo), u32::from(d))
            .and_then(|date| date.and_hms_micro_opt(u32::from(h), u32::from(mi), u32::from(s), us))
            .map(SqlValue::DateTime)
            .unwrap_or(SqlValue::Null),
        Value::Time(neg, days, h, m, s, us) => {
            let sign = if neg { "-" } else { "" };
            let hours = u32::from(h) + days * 24;
            SqlValue::Text(format!("{}{:02}:{:02}:{:02}.{:06}", sign, hours, m, s, us))
        }
    }
}

fn decode_row(row: mysql_async::Row) -> Row {
    let len = row.len();
    let mut out = Vec::with_capacity(len);
    for idx in 0..len {
        let value = row
            .as_ref(idx)
            .cloned()
            .unwrap_or(mysql_async::Value::NULL);
        out.push(from_mysql_value(value));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_round_trip_shapes() {
        assert_eq!(from_mysql_value(mysql_async::Value::NULL), SqlValue::Null);
        assert_eq!(
            from_mysql_value(to_mysql_value(&SqlValue::I64(42))),
            SqlValue::I64(42)
        );
        assert_eq!(
            from_mysql_value(to_mysql_value(&SqlValue::Text("Black".to_string()))),
            SqlValue::Text("Black".to_string())
        );
    }

    #[test]
    fn test_datetime_conversion_preserves_micros() {
        let dt = NaiveDate::from_ymd_opt(2024, 3, 14)
            .and_then(|d| d.and_hms_micro_opt(9, 26, 53, 589793))
            .expect("valid timestamp");
        assert_eq!(
            from_mysql_value(to_mysql_value(&SqlValue::DateTime(dt))),
            SqlValue::DateTime(dt)
        );
    }

    #[test]
    fn test_named_params_carry_bare_names() {
        let p = crate::params! { "colour" => "Black" };
        match to_mysql_params(&p) {
            mysql_async::Params::Named(map) => {
                assert!(map.contains_key("colour".as_bytes()));
            }
            other => panic!("expected named params, got {:?}", other),
        }
    }

    #[test]
    fn test_parameter_names_statement() {
        assert_eq!(
            PARAMETER_NAMES_STATEMENT,
            "SELECT PARAMETER_NAME \
             FROM information_schema.parameters \
             WHERE SPECIFIC_NAME = :proc AND SPECIFIC_SCHEMA = :db \
             ORDER BY ORDINAL_POSITION"
        );
    }

    #[test]
    fn test_table_count_statement() {
        assert_eq!(
            TABLE_COUNT_STATEMENT,
            "SELECT COUNT(*) \
             FROM information_schema.tables \
             WHERE table_schema = :db AND table_name = :table"
        );
    }
}
