//! PostgreSQL Backend Implementation
//!
//! Implements the loader's connection traits on top of a sqlx pool. Rows are
//! fetched eagerly and served through [`BufferedResultSet`]; `?` markers are
//! rewritten to PostgreSQL's `$n` form at prepare time.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgArguments, PgPoolOptions, PgRow};
use sqlx::{Column, PgPool, Postgres, Row, TypeInfo, ValueRef};

use super::core::{
    BufferedResultSet, DatabaseConnection, PreparedStatement, ResultSet, SqlValue,
    StatementOptions,
};
use crate::error::{LoaderError, LoaderResult};

/// Connection backed by a shared sqlx pool
#[derive(Debug, Clone)]
pub struct PostgresConnection {
    pool: Arc<PgPool>,
}

impl PostgresConnection {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> LoaderResult<Self> {
        if !database_url.starts_with("postgresql://") && !database_url.starts_with("postgres://") {
            return Err(LoaderError::Configuration(
                "Invalid PostgreSQL URL scheme".to_string(),
            ));
        }
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| LoaderError::Database(format!("Failed to create PostgreSQL pool: {}", e)))?;
        Ok(Self::new(Arc::new(pool)))
    }
}

#[async_trait]
impl DatabaseConnection for PostgresConnection {
    async fn prepare(
        &mut self,
        sql: &str,
        options: StatementOptions,
    ) -> LoaderResult<Box<dyn PreparedStatement>> {
        if options.callable {
            return Err(LoaderError::Query(
                "callable statements are not supported by the PostgreSQL backend".to_string(),
            ));
        }
        let (native_sql, markers) = rewrite_placeholders(sql);
        Ok(Box::new(PostgresStatement {
            pool: self.pool.clone(),
            sql: sql.to_string(),
            native_sql,
            markers,
            binds: BTreeMap::new(),
            max_rows: None,
            query_timeout: None,
            scrollable: options
                .scroll_mode
                .map(|mode| mode.is_scrollable())
                .unwrap_or(false),
        }))
    }
}

struct PostgresStatement {
    pool: Arc<PgPool>,
    sql: String,
    native_sql: String,
    markers: usize,
    binds: BTreeMap<usize, SqlValue>,
    max_rows: Option<usize>,
    query_timeout: Option<u32>,
    scrollable: bool,
}

#[async_trait]
impl PreparedStatement for PostgresStatement {
    fn sql(&self) -> &str {
        &self.sql
    }

    fn bind(&mut self, index: usize, value: SqlValue) -> LoaderResult<()> {
        if index == 0 || index > self.markers {
            return Err(LoaderError::binding(
                index,
                format!("statement has {} parameter markers", self.markers),
            ));
        }
        self.binds.insert(index, value);
        Ok(())
    }

    fn register_out_parameter(&mut self, index: usize) -> LoaderResult<()> {
        Err(LoaderError::binding(
            index,
            "out parameters are not supported by the PostgreSQL backend",
        ))
    }

    fn set_max_rows(&mut self, max_rows: usize) {
        self.max_rows = Some(max_rows);
    }

    fn set_fetch_size(&mut self, fetch_size: u32) {
        // sqlx streams rows itself; the hint has no driver counterpart
        tracing::trace!("Ignoring fetch size {} for PostgreSQL statement", fetch_size);
    }

    fn set_query_timeout(&mut self, seconds: u32) {
        self.query_timeout = Some(seconds);
    }

    async fn execute_query(&mut self) -> LoaderResult<Box<dyn ResultSet>> {
        let mut query = sqlx::query::<Postgres>(&self.native_sql);
        for position in 1..=self.markers {
            let value = self.binds.get(&position).ok_or_else(|| {
                LoaderError::binding(position, "no value bound for parameter")
            })?;
            query = bind_sql_value(query, value, position)?;
        }

        let fetch = query.fetch_all(&*self.pool);
        let rows = match self.query_timeout {
            Some(seconds) => tokio::time::timeout(Duration::from_secs(seconds as u64), fetch)
                .await
                .map_err(|_| {
                    LoaderError::Database(format!("query timed out after {} seconds", seconds))
                })??,
            None => fetch.await?,
        };

        let columns: Vec<String> = rows
            .first()
            .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();
        let mut values = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut record = Vec::with_capacity(columns.len());
            for index in 0..columns.len() {
                record.push(postgres_value_to_sql_value(row, index)?);
            }
            values.push(record);
        }

        let mut result_set = BufferedResultSet::new(columns, values, self.scrollable);
        if let Some(max_rows) = self.max_rows {
            result_set.truncate(max_rows);
        }
        Ok(Box::new(result_set))
    }

    async fn close(&mut self) -> LoaderResult<()> {
        self.binds.clear();
        Ok(())
    }
}

/// Rewrite `?` markers to `$1..$n`, leaving quoted text and `?|`/`?&`
/// operators alone
pub fn rewrite_placeholders(sql: &str) -> (String, usize) {
    let mut out = String::with_capacity(sql.len() + 8);
    let mut count = 0;
    let mut in_quote = false;
    let mut chars = sql.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_quote = !in_quote;
                out.push(c);
            }
            '?' if !in_quote && !matches!(chars.peek(), Some('|') | Some('&')) => {
                count += 1;
                out.push('$');
                out.push_str(&count.to_string());
            }
            _ => out.push(c),
        }
    }
    (out, count)
}

fn bind_sql_value<'a>(
    query: sqlx::query::Query<'a, Postgres, PgArguments>,
    value: &SqlValue,
    position: usize,
) -> LoaderResult<sqlx::query::Query<'a, Postgres, PgArguments>> {
    match value {
        SqlValue::Null => Ok(query.bind(Option::<String>::None)),
        SqlValue::Bool(b) => Ok(query.bind(*b)),
        SqlValue::Int32(i) => Ok(query.bind(*i)),
        SqlValue::Int64(i) => Ok(query.bind(*i)),
        SqlValue::Float64(f) => Ok(query.bind(*f)),
        SqlValue::String(s) => Ok(query.bind(s.clone())),
        SqlValue::Bytes(b) => Ok(query.bind(b.clone())),
        SqlValue::Uuid(u) => Ok(query.bind(*u)),
        SqlValue::DateTime(dt) => Ok(query.bind(*dt)),
        SqlValue::Date(d) => Ok(query.bind(*d)),
        SqlValue::Time(t) => Ok(query.bind(*t)),
        SqlValue::Json(j) => Ok(query.bind(j.clone())),
        SqlValue::Array(_) | SqlValue::Tuple(_) => Err(LoaderError::binding(
            position,
            format!("{} values must be expanded before binding", value.type_name()),
        )),
    }
}

fn postgres_value_to_sql_value(row: &PgRow, index: usize) -> LoaderResult<SqlValue> {
    let column = &row.columns()[index];
    let name = column.name();
    let extraction = |e: sqlx::Error| LoaderError::extraction(name, e.to_string());

    let raw = row.try_get_raw(index).map_err(extraction)?;
    if raw.is_null() {
        return Ok(SqlValue::Null);
    }

    match column.type_info().name() {
        "BOOL" => Ok(SqlValue::Bool(row.try_get(index).map_err(extraction)?)),
        "INT2" => {
            let value: i16 = row.try_get(index).map_err(extraction)?;
            Ok(SqlValue::Int32(value as i32))
        }
        "INT4" => Ok(SqlValue::Int32(row.try_get(index).map_err(extraction)?)),
        "INT8" => Ok(SqlValue::Int64(row.try_get(index).map_err(extraction)?)),
        "FLOAT4" => {
            let value: f32 = row.try_get(index).map_err(extraction)?;
            Ok(SqlValue::Float64(value as f64))
        }
        "FLOAT8" => Ok(SqlValue::Float64(row.try_get(index).map_err(extraction)?)),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => {
            Ok(SqlValue::String(row.try_get(index).map_err(extraction)?))
        }
        "BYTEA" => Ok(SqlValue::Bytes(row.try_get(index).map_err(extraction)?)),
        "UUID" => Ok(SqlValue::Uuid(row.try_get(index).map_err(extraction)?)),
        "TIMESTAMPTZ" => Ok(SqlValue::DateTime(row.try_get(index).map_err(extraction)?)),
        "TIMESTAMP" => {
            let value: chrono::NaiveDateTime = row.try_get(index).map_err(extraction)?;
            Ok(SqlValue::DateTime(value.and_utc()))
        }
        "DATE" => Ok(SqlValue::Date(row.try_get(index).map_err(extraction)?)),
        "TIME" => Ok(SqlValue::Time(row.try_get(index).map_err(extraction)?)),
        "JSON" | "JSONB" => Ok(SqlValue::Json(row.try_get(index).map_err(extraction)?)),
        other => Err(LoaderError::extraction(
            name,
            format!("unsupported PostgreSQL type {}", other),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rewrite_placeholders() {
        let (sql, count) =
            rewrite_placeholders("select a from t where a = ? and b = '?' and c in (?, ?)");
        assert_eq!(sql, "select a from t where a = $1 and b = '?' and c in ($2, $3)");
        assert_eq!(count, 3);
    }

    #[test]
    fn test_rewrite_keeps_jsonb_operators() {
        let (sql, count) = rewrite_placeholders("select a from t where a ?| array['x'] and b = ?");
        assert_eq!(sql, "select a from t where a ?| array['x'] and b = $1");
        assert_eq!(count, 1);
    }
}
