//! Row selection (pagination) rendering
//!
//! A [`LimitHandler`] rewrites the SQL for a row selection and binds the
//! values its markers need, either before every other parameter (markers
//! at the start of the statement) or after them.

use std::fmt::Debug;

use crate::backends::{PreparedStatement, SqlValue};
use crate::error::LoaderResult;
use crate::exec::RowSelection;

pub trait LimitHandler: Send + Sync + Debug {
    /// Whether the dialect can limit the number of rows in SQL
    fn supports_limit(&self) -> bool;

    /// Whether the dialect can also skip rows in SQL
    fn supports_limit_offset(&self) -> bool;

    /// Rewrite `sql` for the selection
    fn process_sql(&self, sql: &str, selection: &RowSelection) -> String;

    /// Bind markers placed before the statement's own parameters, starting
    /// at `index`; returns how many were bound
    fn bind_limit_parameters_at_start(
        &self,
        _selection: &RowSelection,
        _statement: &mut dyn PreparedStatement,
        _index: usize,
    ) -> LoaderResult<usize> {
        Ok(0)
    }

    /// Bind markers placed after the statement's own parameters
    fn bind_limit_parameters_at_end(
        &self,
        _selection: &RowSelection,
        _statement: &mut dyn PreparedStatement,
        _index: usize,
    ) -> LoaderResult<usize> {
        Ok(0)
    }

    /// Apply the selection through the driver instead of SQL
    fn set_max_rows(&self, _selection: &RowSelection, _statement: &mut dyn PreparedStatement) {}
}

/// Whether the handler should render the selection at all
pub fn use_limit(handler: &dyn LimitHandler, selection: &RowSelection) -> bool {
    handler.supports_limit() && selection.has_max_rows()
}

fn bind_int(statement: &mut dyn PreparedStatement, index: usize, value: usize) -> LoaderResult<()> {
    statement.bind(index, SqlValue::Int64(value as i64))
}

/// Handler for dialects without SQL pagination: caps the row count through
/// the driver and leaves the offset to cursor positioning
#[derive(Debug, Default)]
pub struct NoopLimitHandler;

impl LimitHandler for NoopLimitHandler {
    fn supports_limit(&self) -> bool {
        false
    }

    fn supports_limit_offset(&self) -> bool {
        false
    }

    fn process_sql(&self, sql: &str, _selection: &RowSelection) -> String {
        sql.to_string()
    }

    fn set_max_rows(&self, selection: &RowSelection, statement: &mut dyn PreparedStatement) {
        if let Some(max_rows) = selection.max_rows {
            statement.set_max_rows(max_rows + selection.first_row_or_zero());
        }
    }
}

/// `limit ? offset ?` (PostgreSQL, SQLite) or `limit ?, ?` (MySQL family)
#[derive(Debug)]
pub struct LimitOffsetLimitHandler {
    /// MySQL syntax: offset first, then the row count
    comma_form: bool,
}

impl LimitOffsetLimitHandler {
    pub const STANDARD: LimitOffsetLimitHandler = LimitOffsetLimitHandler { comma_form: false };
    pub const MYSQL: LimitOffsetLimitHandler = LimitOffsetLimitHandler { comma_form: true };
}

impl LimitHandler for LimitOffsetLimitHandler {
    fn supports_limit(&self) -> bool {
        true
    }

    fn supports_limit_offset(&self) -> bool {
        true
    }

    fn process_sql(&self, sql: &str, selection: &RowSelection) -> String {
        if !use_limit(self, selection) {
            return sql.to_string();
        }
        match (selection.has_first_row(), self.comma_form) {
            (false, _) => format!("{} limit ?", sql),
            (true, false) => format!("{} limit ? offset ?", sql),
            (true, true) => format!("{} limit ?, ?", sql),
        }
    }

    fn bind_limit_parameters_at_end(
        &self,
        selection: &RowSelection,
        statement: &mut dyn PreparedStatement,
        index: usize,
    ) -> LoaderResult<usize> {
        if !use_limit(self, selection) {
            return Ok(0);
        }
        let max_rows = selection.max_rows.unwrap_or_default();
        if !selection.has_first_row() {
            bind_int(statement, index, max_rows)?;
            return Ok(1);
        }
        let first_row = selection.first_row_or_zero();
        if self.comma_form {
            bind_int(statement, index, first_row)?;
            bind_int(statement, index + 1, max_rows)?;
        } else {
            bind_int(statement, index, max_rows)?;
            bind_int(statement, index + 1, first_row)?;
        }
        Ok(2)
    }
}

/// SQL Server 2012+: `top (?)` without an offset, `offset/fetch` with one
#[derive(Debug, Default)]
pub struct SqlServerLimitHandler;

impl SqlServerLimitHandler {
    fn uses_top(selection: &RowSelection) -> bool {
        !selection.has_first_row()
    }
}

impl LimitHandler for SqlServerLimitHandler {
    fn supports_limit(&self) -> bool {
        true
    }

    fn supports_limit_offset(&self) -> bool {
        true
    }

    fn process_sql(&self, sql: &str, selection: &RowSelection) -> String {
        if !use_limit(self, selection) {
            return sql.to_string();
        }
        if Self::uses_top(selection) {
            return insert_after_select(sql, "top (?) ");
        }
        // offset/fetch is only legal after an order by
        let ordered = if sql.to_lowercase().contains(" order by ") {
            sql.to_string()
        } else {
            format!("{} order by @@version", sql)
        };
        format!("{} offset ? rows fetch next ? rows only", ordered)
    }

    fn bind_limit_parameters_at_start(
        &self,
        selection: &RowSelection,
        statement: &mut dyn PreparedStatement,
        index: usize,
    ) -> LoaderResult<usize> {
        if !use_limit(self, selection) || !Self::uses_top(selection) {
            return Ok(0);
        }
        bind_int(statement, index, selection.max_rows.unwrap_or_default())?;
        Ok(1)
    }

    fn bind_limit_parameters_at_end(
        &self,
        selection: &RowSelection,
        statement: &mut dyn PreparedStatement,
        index: usize,
    ) -> LoaderResult<usize> {
        if !use_limit(self, selection) || Self::uses_top(selection) {
            return Ok(0);
        }
        bind_int(statement, index, selection.first_row_or_zero())?;
        bind_int(statement, index + 1, selection.max_rows.unwrap_or_default())?;
        Ok(2)
    }
}

/// Informix `select first N`: the count is inlined and covers the skipped
/// rows, which the executor then steps over
#[derive(Debug, Default)]
pub struct FirstLimitHandler;

impl LimitHandler for FirstLimitHandler {
    fn supports_limit(&self) -> bool {
        true
    }

    fn supports_limit_offset(&self) -> bool {
        false
    }

    fn process_sql(&self, sql: &str, selection: &RowSelection) -> String {
        if !use_limit(self, selection) {
            return sql.to_string();
        }
        let count = selection.max_rows.unwrap_or_default() + selection.first_row_or_zero();
        insert_after_select(sql, &format!("first {} ", count))
    }
}

fn insert_after_select(sql: &str, fragment: &str) -> String {
    let trimmed = sql.trim_start();
    let leading = &sql[..sql.len() - trimmed.len()];
    if trimmed.len() >= 7 && trimmed[..7].eq_ignore_ascii_case("select ") {
        format!("{}select {}{}", leading, fragment, &trimmed[7..])
    } else {
        sql.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{DatabaseConnection, MemoryDatabase, StatementOptions};

    fn page(first: usize, max: usize) -> RowSelection {
        RowSelection::new().with_first_row(first).with_max_rows(max)
    }

    #[test]
    fn test_limit_offset_rendering() {
        let sql = "select b.id from boy b";
        assert_eq!(
            LimitOffsetLimitHandler::STANDARD.process_sql(sql, &page(2, 2)),
            "select b.id from boy b limit ? offset ?"
        );
        assert_eq!(
            LimitOffsetLimitHandler::MYSQL.process_sql(sql, &page(2, 2)),
            "select b.id from boy b limit ?, ?"
        );
        assert_eq!(
            LimitOffsetLimitHandler::STANDARD.process_sql(sql, &RowSelection::new().with_max_rows(5)),
            "select b.id from boy b limit ?"
        );
        // an offset alone is left to cursor positioning
        assert_eq!(
            LimitOffsetLimitHandler::STANDARD.process_sql(sql, &RowSelection::new().with_first_row(3)),
            sql
        );
    }

    #[test]
    fn test_sql_server_rendering() {
        let handler = SqlServerLimitHandler;
        assert_eq!(
            handler.process_sql("select b.id from boy b", &RowSelection::new().with_max_rows(3)),
            "select top (?) b.id from boy b"
        );
        assert_eq!(
            handler.process_sql("select b.id from boy b", &page(1, 3)),
            "select b.id from boy b order by @@version offset ? rows fetch next ? rows only"
        );
        assert_eq!(
            handler.process_sql("select b.id from boy b order by b.id", &page(1, 3)),
            "select b.id from boy b order by b.id offset ? rows fetch next ? rows only"
        );
    }

    #[test]
    fn test_first_handler_inlines_count() {
        assert_eq!(
            FirstLimitHandler.process_sql("select b.id from boy b", &page(2, 2)),
            "select first 4 b.id from boy b"
        );
        assert!(!FirstLimitHandler.supports_limit_offset());
    }

    #[tokio::test]
    async fn test_bind_order() {
        let database = MemoryDatabase::empty();
        let mut connection = database.connect();
        let mut statement = connection
            .prepare("select b.id from boy b limit ? offset ?", StatementOptions::default())
            .await
            .unwrap();
        let bound = LimitOffsetLimitHandler::STANDARD
            .bind_limit_parameters_at_end(&page(2, 5), statement.as_mut(), 1)
            .unwrap();
        assert_eq!(bound, 2);
        statement.execute_query().await.unwrap();
        statement.close().await.unwrap();
        assert_eq!(
            database.executed()[0].bound_values(),
            vec![SqlValue::Int64(5), SqlValue::Int64(2)]
        );
    }

    #[tokio::test]
    async fn test_noop_caps_rows_through_driver() {
        let database = MemoryDatabase::empty();
        let mut connection = database.connect();
        let mut statement = connection
            .prepare("select b.id from boy b", StatementOptions::default())
            .await
            .unwrap();
        NoopLimitHandler.set_max_rows(&page(2, 2), statement.as_mut());
        statement.execute_query().await.unwrap();
        statement.close().await.unwrap();
        assert_eq!(database.executed()[0].max_rows, Some(4));
    }
}
