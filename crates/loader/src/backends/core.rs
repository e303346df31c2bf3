//! Core Database Backend Traits
//!
//! The loader talks to a database only through the traits in this module.
//! They model a prepared-statement protocol: a statement is prepared from
//! SQL with `?` markers, values are bound by 1-based index, execution yields
//! a cursor that can be advanced (and, when prepared scrollable, positioned
//! absolutely), and both the cursor and the statement are released
//! explicitly.

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{LoaderError, LoaderResult};

/// Cursor scrollability requested at prepare time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScrollMode {
    ForwardOnly,
    ScrollInsensitive,
    ScrollSensitive,
}

impl ScrollMode {
    pub fn is_scrollable(&self) -> bool {
        !matches!(self, ScrollMode::ForwardOnly)
    }
}

/// Options applied when preparing a statement
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatementOptions {
    pub scroll_mode: Option<ScrollMode>,
    pub callable: bool,
}

/// Abstract database connection
#[async_trait]
pub trait DatabaseConnection: Send {
    /// Prepare a statement; markers are `?` regardless of the database
    async fn prepare(
        &mut self,
        sql: &str,
        options: StatementOptions,
    ) -> LoaderResult<Box<dyn PreparedStatement>>;
}

/// A prepared statement owned by one execution
#[async_trait]
pub trait PreparedStatement: Send {
    fn sql(&self) -> &str;

    /// Bind a value at a 1-based position
    fn bind(&mut self, index: usize, value: SqlValue) -> LoaderResult<()>;

    /// Register a result-set out parameter for callable statements
    fn register_out_parameter(&mut self, index: usize) -> LoaderResult<()>;

    /// Cap the number of rows the driver returns
    fn set_max_rows(&mut self, max_rows: usize);

    fn set_fetch_size(&mut self, fetch_size: u32);

    fn set_query_timeout(&mut self, seconds: u32);

    async fn execute_query(&mut self) -> LoaderResult<Box<dyn ResultSet>>;

    async fn close(&mut self) -> LoaderResult<()>;
}

/// A cursor over the rows of an executed query
#[async_trait]
pub trait ResultSet: Send {
    /// Move to the next row, returning false once the rows are exhausted
    async fn next(&mut self) -> LoaderResult<bool>;

    /// Position on the given 1-based row; only valid for scrollable cursors
    async fn absolute(&mut self, row: usize) -> LoaderResult<bool>;

    fn column_names(&self) -> &[String];

    /// Read the 0-based column of the current row
    fn get(&self, index: usize) -> LoaderResult<SqlValue>;

    async fn close(&mut self) -> LoaderResult<()>;
}

/// Database value type for parameter binding and extraction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Float64(f64),
    String(String),
    Bytes(Vec<u8>),
    Uuid(uuid::Uuid),
    DateTime(chrono::DateTime<chrono::Utc>),
    Date(chrono::NaiveDate),
    Time(chrono::NaiveTime),
    Json(JsonValue),
    /// Several values bound one per marker (list-valued filter parameters)
    Array(Vec<SqlValue>),
    /// Value of a multi-column type, one entry per column
    Tuple(Vec<SqlValue>),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        match self {
            SqlValue::Null => true,
            SqlValue::Tuple(values) => values.iter().all(SqlValue::is_null),
            _ => false,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            SqlValue::Null => "null",
            SqlValue::Bool(_) => "bool",
            SqlValue::Int32(_) => "int32",
            SqlValue::Int64(_) => "int64",
            SqlValue::Float64(_) => "float64",
            SqlValue::String(_) => "string",
            SqlValue::Bytes(_) => "bytes",
            SqlValue::Uuid(_) => "uuid",
            SqlValue::DateTime(_) => "timestamp",
            SqlValue::Date(_) => "date",
            SqlValue::Time(_) => "time",
            SqlValue::Json(_) => "json",
            SqlValue::Array(_) => "array",
            SqlValue::Tuple(_) => "tuple",
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Int32(i) => Some(*i as i64),
            SqlValue::Int64(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Convert to JSON value
    pub fn to_json(&self) -> JsonValue {
        match self {
            SqlValue::Null => JsonValue::Null,
            SqlValue::Bool(b) => JsonValue::Bool(*b),
            SqlValue::Int32(i) => JsonValue::Number(serde_json::Number::from(*i)),
            SqlValue::Int64(i) => JsonValue::Number(serde_json::Number::from(*i)),
            SqlValue::Float64(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            SqlValue::String(s) => JsonValue::String(s.clone()),
            SqlValue::Bytes(b) => JsonValue::Array(
                b.iter()
                    .map(|&x| JsonValue::Number(serde_json::Number::from(x)))
                    .collect(),
            ),
            SqlValue::Uuid(u) => JsonValue::String(u.to_string()),
            SqlValue::DateTime(dt) => JsonValue::String(dt.to_rfc3339()),
            SqlValue::Date(d) => JsonValue::String(d.to_string()),
            SqlValue::Time(t) => JsonValue::String(t.to_string()),
            SqlValue::Json(j) => j.clone(),
            SqlValue::Array(values) | SqlValue::Tuple(values) => {
                JsonValue::Array(values.iter().map(SqlValue::to_json).collect())
            }
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => write!(f, "null"),
            SqlValue::String(s) => write!(f, "'{}'", s),
            SqlValue::Tuple(values) | SqlValue::Array(values) => {
                write!(f, "(")?;
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", value)?;
                }
                write!(f, ")")
            }
            other => write!(f, "{}", other.to_json()),
        }
    }
}

// Identifiers are used as identity-map keys, so values need total equality.
// Floats compare by bit pattern and JSON by its canonical text.
impl PartialEq for SqlValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (SqlValue::Null, SqlValue::Null) => true,
            (SqlValue::Bool(a), SqlValue::Bool(b)) => a == b,
            (SqlValue::Int32(a), SqlValue::Int32(b)) => a == b,
            (SqlValue::Int64(a), SqlValue::Int64(b)) => a == b,
            (SqlValue::Int32(a), SqlValue::Int64(b)) | (SqlValue::Int64(b), SqlValue::Int32(a)) => {
                *a as i64 == *b
            }
            (SqlValue::Float64(a), SqlValue::Float64(b)) => a.to_bits() == b.to_bits(),
            (SqlValue::String(a), SqlValue::String(b)) => a == b,
            (SqlValue::Bytes(a), SqlValue::Bytes(b)) => a == b,
            (SqlValue::Uuid(a), SqlValue::Uuid(b)) => a == b,
            (SqlValue::DateTime(a), SqlValue::DateTime(b)) => a == b,
            (SqlValue::Date(a), SqlValue::Date(b)) => a == b,
            (SqlValue::Time(a), SqlValue::Time(b)) => a == b,
            (SqlValue::Json(a), SqlValue::Json(b)) => a == b,
            (SqlValue::Array(a), SqlValue::Array(b)) => a == b,
            (SqlValue::Tuple(a), SqlValue::Tuple(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for SqlValue {}

impl Hash for SqlValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            SqlValue::Null => 0u8.hash(state),
            SqlValue::Bool(b) => {
                1u8.hash(state);
                b.hash(state);
            }
            // Int32 and Int64 compare equal across widths, so hash alike
            SqlValue::Int32(i) => {
                2u8.hash(state);
                (*i as i64).hash(state);
            }
            SqlValue::Int64(i) => {
                2u8.hash(state);
                i.hash(state);
            }
            SqlValue::Float64(f) => {
                3u8.hash(state);
                f.to_bits().hash(state);
            }
            SqlValue::String(s) => {
                4u8.hash(state);
                s.hash(state);
            }
            SqlValue::Bytes(b) => {
                5u8.hash(state);
                b.hash(state);
            }
            SqlValue::Uuid(u) => {
                6u8.hash(state);
                u.hash(state);
            }
            SqlValue::DateTime(dt) => {
                7u8.hash(state);
                dt.hash(state);
            }
            SqlValue::Date(d) => {
                8u8.hash(state);
                d.hash(state);
            }
            SqlValue::Time(t) => {
                9u8.hash(state);
                t.hash(state);
            }
            SqlValue::Json(j) => {
                10u8.hash(state);
                j.to_string().hash(state);
            }
            SqlValue::Array(values) => {
                11u8.hash(state);
                values.hash(state);
            }
            SqlValue::Tuple(values) => {
                12u8.hash(state);
                values.hash(state);
            }
        }
    }
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        SqlValue::Bool(value)
    }
}

impl From<i32> for SqlValue {
    fn from(value: i32) -> Self {
        SqlValue::Int32(value)
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Int64(value)
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        SqlValue::Float64(value)
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::String(value)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::String(value.to_string())
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(value: Vec<u8>) -> Self {
        SqlValue::Bytes(value)
    }
}

impl From<uuid::Uuid> for SqlValue {
    fn from(value: uuid::Uuid) -> Self {
        SqlValue::Uuid(value)
    }
}

impl From<chrono::DateTime<chrono::Utc>> for SqlValue {
    fn from(value: chrono::DateTime<chrono::Utc>) -> Self {
        SqlValue::DateTime(value)
    }
}

impl From<chrono::NaiveDate> for SqlValue {
    fn from(value: chrono::NaiveDate) -> Self {
        SqlValue::Date(value)
    }
}

impl From<chrono::NaiveTime> for SqlValue {
    fn from(value: chrono::NaiveTime) -> Self {
        SqlValue::Time(value)
    }
}

impl From<JsonValue> for SqlValue {
    fn from(value: JsonValue) -> Self {
        SqlValue::Json(value)
    }
}

impl<T> From<Option<T>> for SqlValue
where
    T: Into<SqlValue>,
{
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => SqlValue::Null,
        }
    }
}

/// Result set whose rows are fully buffered in memory
///
/// Backends that fetch eagerly (sqlx, the in-memory backend) hand rows to
/// this type, which provides the cursor protocol on top of them.
#[derive(Debug, Clone)]
pub struct BufferedResultSet {
    columns: Vec<String>,
    rows: Vec<Vec<SqlValue>>,
    // 0 = before first row, rows.len() + 1 = after last row
    position: usize,
    scrollable: bool,
    closed: bool,
}

impl BufferedResultSet {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<SqlValue>>, scrollable: bool) -> Self {
        Self {
            columns,
            rows,
            position: 0,
            scrollable,
            closed: false,
        }
    }

    /// Drop rows past `max_rows`, mirroring a driver-side row cap
    pub fn truncate(&mut self, max_rows: usize) {
        self.rows.truncate(max_rows);
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn ensure_open(&self) -> LoaderResult<()> {
        if self.closed {
            return Err(LoaderError::IllegalState("result set is closed".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ResultSet for BufferedResultSet {
    async fn next(&mut self) -> LoaderResult<bool> {
        self.ensure_open()?;
        if self.position < self.rows.len() {
            self.position += 1;
            Ok(true)
        } else {
            self.position = self.rows.len() + 1;
            Ok(false)
        }
    }

    async fn absolute(&mut self, row: usize) -> LoaderResult<bool> {
        self.ensure_open()?;
        if !self.scrollable {
            return Err(LoaderError::IllegalState(
                "absolute positioning requires a scrollable result set".to_string(),
            ));
        }
        self.position = row.min(self.rows.len() + 1);
        Ok(row >= 1 && row <= self.rows.len())
    }

    fn column_names(&self) -> &[String] {
        &self.columns
    }

    fn get(&self, index: usize) -> LoaderResult<SqlValue> {
        self.ensure_open()?;
        if self.position == 0 || self.position > self.rows.len() {
            return Err(LoaderError::IllegalState(
                "result set is not positioned on a row".to_string(),
            ));
        }
        let column = self.columns.get(index).map(String::as_str).unwrap_or("?");
        self.rows[self.position - 1]
            .get(index)
            .cloned()
            .ok_or_else(|| LoaderError::extraction(column, format!("no column at index {}", index)))
    }

    async fn close(&mut self) -> LoaderResult<()> {
        self.closed = true;
        Ok(())
    }
}

/// Column label to index lookup, computed once per result set
#[derive(Debug, Default)]
pub struct ColumnNameCache {
    columns: OnceCell<HashMap<String, usize>>,
}

impl ColumnNameCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn index_of(&self, result_set: &dyn ResultSet, column: &str) -> LoaderResult<usize> {
        let columns = self.columns.get_or_init(|| {
            let mut map = HashMap::new();
            for (index, name) in result_set.column_names().iter().enumerate() {
                // first occurrence wins for duplicated labels
                map.entry(name.to_lowercase()).or_insert(index);
            }
            map
        });
        columns
            .get(&column.to_lowercase())
            .copied()
            .ok_or_else(|| LoaderError::extraction(column, "column not present in result set"))
    }

    pub fn is_initialized(&self) -> bool {
        self.columns.get().is_some()
    }
}

/// Result set paired with its column-name cache
pub struct ResultSetWrapper {
    inner: Box<dyn ResultSet>,
    columns: Arc<ColumnNameCache>,
}

impl ResultSetWrapper {
    pub fn new(inner: Box<dyn ResultSet>) -> Self {
        Self {
            inner,
            columns: Arc::new(ColumnNameCache::new()),
        }
    }

    pub async fn next(&mut self) -> LoaderResult<bool> {
        self.inner.next().await
    }

    pub async fn absolute(&mut self, row: usize) -> LoaderResult<bool> {
        self.inner.absolute(row).await
    }

    /// Read a column of the current row by its label
    pub fn get(&self, column: &str) -> LoaderResult<SqlValue> {
        let index = self.columns.index_of(self.inner.as_ref(), column)?;
        self.inner.get(index)
    }

    pub fn column_cache(&self) -> &ColumnNameCache {
        &self.columns
    }

    pub async fn close(&mut self) -> LoaderResult<()> {
        self.inner.close().await
    }
}

impl fmt::Debug for ResultSetWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultSetWrapper")
            .field("columns", &self.inner.column_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn result_set(scrollable: bool) -> BufferedResultSet {
        BufferedResultSet::new(
            vec!["id1_0_".to_string(), "NAME2_0_".to_string()],
            (1..=3)
                .map(|i| vec![SqlValue::Int64(i), SqlValue::String(format!("row{}", i))])
                .collect(),
            scrollable,
        )
    }

    #[tokio::test]
    async fn test_forward_cursor() {
        let mut rs = result_set(false);
        assert!(rs.get(0).is_err());
        let mut seen = Vec::new();
        while rs.next().await.unwrap() {
            seen.push(rs.get(0).unwrap());
        }
        assert_eq!(seen, vec![SqlValue::Int64(1), SqlValue::Int64(2), SqlValue::Int64(3)]);
        assert!(rs.absolute(1).await.is_err());
    }

    #[tokio::test]
    async fn test_absolute_positions_before_following_row() {
        let mut rs = result_set(true);
        assert!(rs.absolute(2).await.unwrap());
        assert!(rs.next().await.unwrap());
        assert_eq!(rs.get(0).unwrap(), SqlValue::Int64(3));
        assert!(!rs.next().await.unwrap());
    }

    #[tokio::test]
    async fn test_wrapper_reads_by_label_case_insensitively() {
        let mut wrapper = ResultSetWrapper::new(Box::new(result_set(false)));
        assert!(!wrapper.column_cache().is_initialized());
        assert!(wrapper.next().await.unwrap());
        assert_eq!(wrapper.get("name2_0_").unwrap(), SqlValue::from("row1"));
        assert!(wrapper.column_cache().is_initialized());
        assert!(matches!(
            wrapper.get("missing"),
            Err(LoaderError::Extraction { .. })
        ));
    }

    #[test]
    fn test_integer_widths_are_equal_keys() {
        let mut keys = HashSet::new();
        keys.insert(SqlValue::Int32(7));
        assert!(keys.contains(&SqlValue::Int64(7)));
        assert!(SqlValue::Tuple(vec![SqlValue::Null, SqlValue::Null]).is_null());
        assert!(!SqlValue::Tuple(vec![SqlValue::Null, SqlValue::Int32(1)]).is_null());
    }
}
