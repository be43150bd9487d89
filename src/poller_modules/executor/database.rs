//! Database checks: MySQL/MariaDB and PostgreSQL through sqlx, SQL Server
//! through tiberius. One connection per execution, closed on every path.
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlRow};
use sqlx::postgres::{PgConnection, PgRow};
use sqlx::{Column, ConnectOptions, Connection, Row, TypeInfo};
use std::collections::HashMap;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Instant;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tiberius::ColumnData;
use tokio::net::TcpStream;
use tokio_util::compat::TokioAsyncWriteCompatExt;
use tracing::debug;

use super::{CheckConfig, CheckKind, ExecutionError, elapsed_ms};
use crate::evaluation::conditions::{ConditionExpressionGroup, active_conditions};
use crate::models::CheckResult;

const DEFAULT_QUERY: &str = "SELECT 1";

/// Rows of stringified cells. NULL renders as `null`.
pub type QueryRows = Vec<Vec<String>>;

fn query_failed(message: impl Display) -> ExecutionError {
    ExecutionError::Database(format!("Database connection/query failed: {message}"))
}

pub fn normalize_query(raw: Option<&str>) -> String {
    match raw.map(str::trim) {
        Some(query) if !query.is_empty() => query.to_string(),
        _ => DEFAULT_QUERY.to_string(),
    }
}

/// Exactly one row with exactly one column.
pub fn single_value(rows: &[Vec<String>]) -> Result<&str, ExecutionError> {
    match rows {
        [] => Err(query_failed("Query returned no results")),
        [row] => match row.as_slice() {
            [value] => Ok(value.as_str()),
            [] => Err(query_failed("Query returned no results")),
            _ => Err(query_failed("Multiple columns were found, expected only one value")),
        },
        _ => Err(query_failed("Multiple values were found, expected only one value")),
    }
}

pub async fn check_database(kind: CheckKind, config: &CheckConfig<'_>) -> Result<CheckResult, ExecutionError> {
    let connection_string = config
        .str("databaseConnectionString")
        .ok_or_else(|| ExecutionError::Config("Database connection string is required".to_string()))?;
    let query = normalize_query(config.str("databaseQuery"));
    let conditions = active_conditions(config.raw("conditions"))?;

    let start = Instant::now();
    let rows = match kind {
        CheckKind::Mysql => query_mysql(connection_string, &query, config.str("radiusPassword")).await,
        CheckKind::Postgres => query_postgres(connection_string, &query).await,
        CheckKind::SqlServer => query_sqlserver(connection_string, &query).await,
        other => return Err(ExecutionError::Config(format!("{other} is not a database check"))),
    }?;
    let latency_ms = elapsed_ms(start);
    debug!(kind = %kind, rows = rows.len(), "Database query completed.");

    summarize(&rows, conditions.as_ref(), latency_ms)
}

fn summarize(
    rows: &[Vec<String>],
    conditions: Option<&ConditionExpressionGroup>,
    latency_ms: f64,
) -> Result<CheckResult, ExecutionError> {
    let Some(conditions) = conditions else {
        return Ok(CheckResult::up(format!("Rows: {}", rows.len()), Some(latency_ms)));
    };
    let value = single_value(rows)?;
    let context = HashMap::from([("result", value.to_string())]);
    if !conditions.evaluate(&context).map_err(query_failed)? {
        return Err(ExecutionError::ConditionsNotMet(format!(
            "Query result did not meet the specified conditions ({value})"
        )));
    }
    Ok(CheckResult::up("Query did meet specified conditions", Some(latency_ms)))
}

/// Tries each listed type in turn and renders the first that decodes.
macro_rules! render_cell {
    ($row:expr, $index:expr; $($ty:ty),+ $(,)?) => {{
        $(
            if let Ok(value) = $row.try_get::<Option<$ty>, _>($index) {
                return value.map_or_else(|| "null".to_string(), |v| v.to_string());
            }
        )+
        format!("<{}>", $row.column($index).type_info().name())
    }};
}

fn mysql_cell(row: &MySqlRow, index: usize) -> String {
    render_cell!(row, index;
        String, i64, u64, i32, i8, f64, f32, bool,
        serde_json::Value,
        chrono::NaiveDateTime, chrono::DateTime<chrono::Utc>, chrono::NaiveDate,
    )
}

fn pg_cell(row: &PgRow, index: usize) -> String {
    render_cell!(row, index;
        String, i64, i32, i16, f64, f32, bool,
        serde_json::Value,
        chrono::DateTime<chrono::Utc>, chrono::NaiveDateTime, chrono::NaiveDate,
    )
}

// Boxed so sqlx's executor lifetimes are settled here, not when the
// scheduler's task future is checked for Send.
fn query_mysql<'a>(
    connection_string: &'a str,
    query: &'a str,
    password: Option<&'a str>,
) -> BoxFuture<'a, Result<QueryRows, ExecutionError>> {
    async move {
        let mut options = MySqlConnectOptions::from_str(connection_string).map_err(query_failed)?;
        if let Some(password) = password {
            options = options.password(password);
        }
        let mut conn: MySqlConnection = options.connect().await.map_err(query_failed)?;
        let outcome = sqlx::Executor::fetch_all(&mut conn, sqlx::raw_sql(query)).await;
        if let Err(e) = conn.close().await {
            debug!(error = %e, "MySQL connection close failed.");
        }
        let rows = outcome.map_err(query_failed)?;
        Ok(rows
            .iter()
            .map(|row| (0..row.columns().len()).map(|i| mysql_cell(row, i)).collect())
            .collect())
    }
    .boxed()
}

fn query_postgres<'a>(connection_string: &'a str, query: &'a str) -> BoxFuture<'a, Result<QueryRows, ExecutionError>> {
    async move {
        let mut conn = PgConnection::connect(connection_string).await.map_err(query_failed)?;
        let outcome = sqlx::Executor::fetch_all(&mut conn, sqlx::raw_sql(query)).await;
        if let Err(e) = conn.close().await {
            debug!(error = %e, "PostgreSQL connection close failed.");
        }
        let rows = outcome.map_err(query_failed)?;
        Ok(rows
            .iter()
            .map(|row| (0..row.columns().len()).map(|i| pg_cell(row, i)).collect())
            .collect())
    }
    .boxed()
}

fn render_column_data(data: &ColumnData<'_>) -> String {
    fn or_null<T: Display>(value: &Option<T>) -> String {
        value.as_ref().map_or_else(|| "null".to_string(), ToString::to_string)
    }
    match data {
        ColumnData::U8(v) => or_null(v),
        ColumnData::I16(v) => or_null(v),
        ColumnData::I32(v) => or_null(v),
        ColumnData::I64(v) => or_null(v),
        ColumnData::F32(v) => or_null(v),
        ColumnData::F64(v) => or_null(v),
        ColumnData::Bit(v) => or_null(v),
        ColumnData::String(v) => or_null(v),
        ColumnData::Guid(v) => or_null(v),
        ColumnData::Numeric(v) => or_null(v),
        ColumnData::Binary(v) => v.as_ref().map_or_else(|| "null".to_string(), hex::encode),
        other => format!("{other:?}"),
    }
}

async fn query_sqlserver(connection_string: &str, query: &str) -> Result<QueryRows, ExecutionError> {
    let config = tiberius::Config::from_ado_string(connection_string).map_err(query_failed)?;
    let tcp = TcpStream::connect(config.get_addr()).await.map_err(query_failed)?;
    tcp.set_nodelay(true).map_err(query_failed)?;
    let mut client = tiberius::Client::connect(config, tcp.compat_write())
        .await
        .map_err(query_failed)?;

    let outcome = match client.simple_query(query).await {
        Ok(stream) => stream.into_first_result().await,
        Err(e) => Err(e),
    };
    if let Err(e) = client.close().await {
        debug!(error = %e, "SQL Server connection close failed.");
    }
    let rows = outcome.map_err(query_failed)?;
    Ok(rows
        .into_iter()
        .map(|row| row.into_iter().map(|cell| render_column_data(&cell)).collect())
        .collect())
}
