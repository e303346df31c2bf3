//! In-memory scripted backend
//!
//! `MemoryDatabase` answers every executed statement through a handler
//! closure and records what was prepared and bound. It backs the loader's
//! tests and can be used for dry runs that only need the generated SQL.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::core::{
    BufferedResultSet, DatabaseConnection, PreparedStatement, ResultSet, ScrollMode, SqlValue,
    StatementOptions,
};
use crate::error::{LoaderError, LoaderResult};

/// Rows returned for one statement
#[derive(Debug, Clone, Default)]
pub struct ResultTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<SqlValue>>,
}

impl ResultTable {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<SqlValue>>) -> Self {
        Self { columns, rows }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Build result rows for a generated select from rows keyed by
    /// `table.column`
    ///
    /// The select list and from clause of `sql` are parsed to map every
    /// `alias.column as label` back to its table; columns without a value in
    /// a source row read as null.
    pub fn project(sql: &str, source_rows: &[HashMap<String, SqlValue>]) -> LoaderResult<Self> {
        let projection = SelectProjection::parse(sql)?;
        let rows = source_rows
            .iter()
            .map(|source| {
                projection
                    .columns
                    .iter()
                    .map(|(qualified, _)| source.get(qualified).cloned().unwrap_or(SqlValue::Null))
                    .collect()
            })
            .collect();
        Ok(Self {
            columns: projection.columns.into_iter().map(|(_, label)| label).collect(),
            rows,
        })
    }
}

/// Build a source row for [`ResultTable::project`]
#[macro_export]
macro_rules! source_row {
    ($($key:expr => $value:expr),* $(,)?) => {{
        let mut row = ::std::collections::HashMap::<String, $crate::SqlValue>::new();
        $( row.insert($key.to_string(), $crate::SqlValue::from($value)); )*
        row
    }};
}

struct SelectProjection {
    // (table.column, label) in select-list order
    columns: Vec<(String, String)>,
}

impl SelectProjection {
    fn parse(sql: &str) -> LoaderResult<Self> {
        let lower = sql.to_lowercase();
        let select_start = lower
            .find("select ")
            .ok_or_else(|| LoaderError::Query(format!("not a select statement: {}", sql)))?;
        let from_start = lower
            .find(" from ")
            .ok_or_else(|| LoaderError::Query(format!("select without from clause: {}", sql)))?;

        let from_end = [" where ", " order by "]
            .iter()
            .filter_map(|marker| lower[from_start + 6..].find(marker).map(|i| i + from_start + 6))
            .min()
            .unwrap_or(lower.len());

        let mut tables = HashMap::new();
        let tokens: Vec<&str> = lower[from_start + 1..from_end].split_whitespace().collect();
        let mut i = 0;
        while i < tokens.len() {
            if tokens[i] == "from" || tokens[i] == "join" {
                if let (Some(table), Some(alias)) = (tokens.get(i + 1), tokens.get(i + 2)) {
                    let mut alias = *alias;
                    // "table for system_time as of ? alias"
                    if alias == "for" {
                        alias = tokens.get(i + 7).copied().unwrap_or(alias);
                    }
                    tables.insert(alias.to_string(), table.to_string());
                }
            }
            i += 1;
        }

        let mut select_list = &lower[select_start + 7..from_start];
        if let Some(rest) = select_list.strip_prefix("first ") {
            select_list = rest.splitn(2, ' ').nth(1).unwrap_or("");
        }
        if let Some(rest) = select_list.strip_prefix("top (?) ") {
            select_list = rest;
        }
        let mut columns = Vec::new();
        for item in select_list.split(',') {
            let item = item.trim();
            let (expr, label) = item
                .split_once(" as ")
                .ok_or_else(|| LoaderError::Query(format!("unlabelled select item '{}'", item)))?;
            let (alias, column) = expr
                .trim()
                .split_once('.')
                .ok_or_else(|| LoaderError::Query(format!("unqualified select item '{}'", item)))?;
            let table = tables
                .get(alias)
                .ok_or_else(|| LoaderError::Query(format!("unknown table alias '{}'", alias)))?;
            columns.push((format!("{}.{}", table, column), label.trim().to_string()));
        }
        Ok(Self { columns })
    }
}

/// A statement as it reached the backend
#[derive(Debug, Clone, Default)]
pub struct ExecutedStatement {
    pub sql: String,
    pub binds: BTreeMap<usize, SqlValue>,
    pub out_parameters: Vec<usize>,
    pub max_rows: Option<usize>,
    pub fetch_size: Option<u32>,
    pub query_timeout: Option<u32>,
    pub scroll_mode: Option<ScrollMode>,
    pub callable: bool,
}

impl ExecutedStatement {
    /// Bound values in position order
    pub fn bound_values(&self) -> Vec<SqlValue> {
        self.binds.values().cloned().collect()
    }
}

type Handler = dyn Fn(&ExecutedStatement) -> LoaderResult<ResultTable> + Send + Sync;

/// Scripted database shared by every connection it hands out
#[derive(Clone)]
pub struct MemoryDatabase {
    handler: Arc<Handler>,
    executed: Arc<Mutex<Vec<ExecutedStatement>>>,
    prepared: Arc<Mutex<Vec<String>>>,
    open_statements: Arc<AtomicUsize>,
}

impl MemoryDatabase {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&ExecutedStatement) -> LoaderResult<ResultTable> + Send + Sync + 'static,
    {
        Self {
            handler: Arc::new(handler),
            executed: Arc::new(Mutex::new(Vec::new())),
            prepared: Arc::new(Mutex::new(Vec::new())),
            open_statements: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A database that returns no rows for anything
    pub fn empty() -> Self {
        Self::new(|_| Ok(ResultTable::empty()))
    }

    pub fn connect(&self) -> MemoryConnection {
        MemoryConnection {
            database: self.clone(),
        }
    }

    pub fn executed(&self) -> Vec<ExecutedStatement> {
        self.executed.lock().clone()
    }

    /// SQL of every prepared statement, executed or not
    pub fn prepared_sql(&self) -> Vec<String> {
        self.prepared.lock().clone()
    }

    /// Statements prepared but not yet closed
    pub fn open_statements(&self) -> usize {
        self.open_statements.load(Ordering::SeqCst)
    }
}

pub struct MemoryConnection {
    database: MemoryDatabase,
}

#[async_trait]
impl DatabaseConnection for MemoryConnection {
    async fn prepare(
        &mut self,
        sql: &str,
        options: StatementOptions,
    ) -> LoaderResult<Box<dyn PreparedStatement>> {
        self.database.prepared.lock().push(sql.to_string());
        self.database.open_statements.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryStatement {
            database: self.database.clone(),
            statement: ExecutedStatement {
                sql: sql.to_string(),
                scroll_mode: options.scroll_mode,
                callable: options.callable,
                ..ExecutedStatement::default()
            },
            closed: false,
        }))
    }
}

struct MemoryStatement {
    database: MemoryDatabase,
    statement: ExecutedStatement,
    closed: bool,
}

#[async_trait]
impl PreparedStatement for MemoryStatement {
    fn sql(&self) -> &str {
        &self.statement.sql
    }

    fn bind(&mut self, index: usize, value: SqlValue) -> LoaderResult<()> {
        let markers = self.statement.sql.matches('?').count();
        if index == 0 || index > markers {
            return Err(LoaderError::binding(
                index,
                format!("statement has {} parameter markers", markers),
            ));
        }
        self.statement.binds.insert(index, value);
        Ok(())
    }

    fn register_out_parameter(&mut self, index: usize) -> LoaderResult<()> {
        if !self.statement.callable {
            return Err(LoaderError::binding(index, "statement is not callable"));
        }
        self.statement.out_parameters.push(index);
        Ok(())
    }

    fn set_max_rows(&mut self, max_rows: usize) {
        self.statement.max_rows = Some(max_rows);
    }

    fn set_fetch_size(&mut self, fetch_size: u32) {
        self.statement.fetch_size = Some(fetch_size);
    }

    fn set_query_timeout(&mut self, seconds: u32) {
        self.statement.query_timeout = Some(seconds);
    }

    async fn execute_query(&mut self) -> LoaderResult<Box<dyn ResultSet>> {
        if self.closed {
            return Err(LoaderError::IllegalState("statement is closed".to_string()));
        }
        self.database.executed.lock().push(self.statement.clone());
        let table = (self.database.handler)(&self.statement)?;
        let scrollable = self
            .statement
            .scroll_mode
            .map(|mode| mode.is_scrollable())
            .unwrap_or(false);
        let mut result_set = BufferedResultSet::new(table.columns, table.rows, scrollable);
        if let Some(max_rows) = self.statement.max_rows {
            result_set.truncate(max_rows);
        }
        Ok(Box::new(result_set))
    }

    async fn close(&mut self) -> LoaderResult<()> {
        if !self.closed {
            self.closed = true;
            self.database.open_statements.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}
