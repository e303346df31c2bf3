//! Statement preparation, binding and execution
//!
//! [`StatementExecutor::execute`] turns a statement template into an open
//! cursor positioned before the first wanted row. The statement is closed
//! before any error leaves this module; once a [`StatementWrapper`] has been
//! handed out, closing it is the caller's job.

use tracing::debug;

use crate::backends::{
    DatabaseConnection, PreparedStatement, ResultSetWrapper, ScrollMode, SqlValue, StatementOptions,
};
use crate::config::LoaderConfig;
use crate::dialect::{use_limit, Dialect, LimitHandler, NoopLimitHandler};
use crate::error::LoaderResult;

use super::filter::{process_parameters, ProcessedSql};
use super::parameters::QueryParameters;

/// An executed statement and its cursor
pub struct StatementWrapper {
    statement: Box<dyn PreparedStatement>,
    result_set: ResultSetWrapper,
}

impl StatementWrapper {
    pub fn sql(&self) -> &str {
        self.statement.sql()
    }

    pub fn result_set(&mut self) -> &mut ResultSetWrapper {
        &mut self.result_set
    }

    /// Close the cursor, then the statement; both are attempted even when
    /// the first fails
    pub async fn close(mut self) -> LoaderResult<()> {
        let result_set = self.result_set.close().await;
        let statement = self.statement.close().await;
        result_set.and(statement)
    }
}

static NOOP_LIMIT_HANDLER: NoopLimitHandler = NoopLimitHandler;

pub struct StatementExecutor<'a> {
    dialect: &'a dyn Dialect,
    config: &'a LoaderConfig,
}

impl<'a> StatementExecutor<'a> {
    pub fn new(dialect: &'a dyn Dialect, config: &'a LoaderConfig) -> Self {
        Self { dialect, config }
    }

    /// Handler actually used for `parameters`: the dialect's when it can
    /// render the selection, the no-op handler otherwise
    fn limit_handler(&self, parameters: &QueryParameters) -> &'a dyn LimitHandler {
        let handler = self.dialect.limit_handler();
        if use_limit(handler, &parameters.row_selection) {
            handler
        } else {
            &NOOP_LIMIT_HANDLER
        }
    }

    fn scroll_mode(&self, parameters: &QueryParameters, emulate_offset: bool) -> Option<ScrollMode> {
        if !self.config.scrollable_result_sets {
            return None;
        }
        if parameters.is_scroll_requested() {
            return parameters.scroll_mode;
        }
        if emulate_offset {
            return Some(ScrollMode::ScrollInsensitive);
        }
        None
    }

    /// Final SQL for the template: filters, pagination, locks, comment
    pub fn render_sql(
        &self,
        template: &str,
        parameters: &QueryParameters,
        root_alias: &str,
    ) -> LoaderResult<(String, ProcessedSql)> {
        let processed = process_parameters(template, parameters)?;
        let handler = self.limit_handler(parameters);
        let mut sql = handler.process_sql(&processed.sql, &parameters.row_selection);
        sql = self
            .dialect
            .apply_locks(&sql, &parameters.lock_options, root_alias)?;
        if self.config.use_sql_comments {
            if let Some(comment) = &parameters.comment {
                sql = self.dialect.add_sql_comment(&sql, comment);
            }
        }
        Ok((sql, processed))
    }

    pub async fn execute(
        &self,
        connection: &mut dyn DatabaseConnection,
        template: &str,
        parameters: &QueryParameters,
        root_alias: &str,
    ) -> LoaderResult<StatementWrapper> {
        let selection = &parameters.row_selection;
        let (sql, processed) = self.render_sql(template, parameters, root_alias)?;
        let handler = self.limit_handler(parameters);
        let native_offset =
            selection.has_first_row() && use_limit(handler, selection) && handler.supports_limit_offset();
        let emulate_offset = selection.has_first_row() && !native_offset;
        let scroll_mode = self.scroll_mode(parameters, emulate_offset);

        if self.config.show_sql {
            debug!("SQL: {}", sql);
        }
        let mut statement = connection
            .prepare(
                &sql,
                StatementOptions {
                    scroll_mode,
                    callable: parameters.callable,
                },
            )
            .await?;

        if let Err(err) = self.bind_parameters(statement.as_mut(), handler, &processed, parameters) {
            // the bind error wins over a close failure
            let _ = statement.close().await;
            return Err(err);
        }
        if let Some(fetch_size) = selection.fetch_size.or(self.config.fetch_size) {
            statement.set_fetch_size(fetch_size);
        }
        if let Some(timeout) = selection.timeout.or(self.config.query_timeout_seconds) {
            statement.set_query_timeout(timeout);
        }
        handler.set_max_rows(selection, statement.as_mut());

        let result_set = match statement.execute_query().await {
            Ok(result_set) => result_set,
            Err(err) => {
                let _ = statement.close().await;
                return Err(err);
            }
        };
        let mut wrapper = StatementWrapper {
            statement,
            result_set: ResultSetWrapper::new(result_set),
        };
        if emulate_offset {
            let scrollable = scroll_mode.map_or(false, |mode| mode.is_scrollable());
            if let Err(err) = advance(&mut wrapper.result_set, selection.first_row_or_zero(), scrollable).await {
                let _ = wrapper.close().await;
                return Err(err);
            }
        }
        Ok(wrapper)
    }

    /// Bind in fixed order: limit start, out parameter, positional, named,
    /// limit end, lock timeout
    fn bind_parameters(
        &self,
        statement: &mut dyn PreparedStatement,
        handler: &dyn LimitHandler,
        processed: &ProcessedSql,
        parameters: &QueryParameters,
    ) -> LoaderResult<usize> {
        let selection = &parameters.row_selection;
        let mut col = 1;
        col += handler.bind_limit_parameters_at_start(selection, statement, col)?;
        if parameters.callable {
            statement.register_out_parameter(col)?;
            col += 1;
        }
        for value in &processed.positional {
            value.ty.null_safe_set(statement, &value.value, col)?;
            col += value.span();
        }
        for value in &processed.named {
            value.ty.null_safe_set(statement, &value.value, col)?;
            col += value.span();
        }
        col += handler.bind_limit_parameters_at_end(selection, statement, col)?;
        let lock = &parameters.lock_options;
        if lock.is_locking() && self.dialect.is_lock_timeout_parameterized() {
            if let Some(seconds) = lock.timeout.seconds() {
                statement.bind(col, SqlValue::Int32(seconds as i32))?;
                col += 1;
            }
        }
        debug!("Bound {} parameters", col - 1);
        Ok(col - 1)
    }
}

/// Step over the first `first_row` rows
async fn advance(result_set: &mut ResultSetWrapper, first_row: usize, scrollable: bool) -> LoaderResult<()> {
    if first_row == 0 {
        return Ok(());
    }
    if scrollable {
        result_set.absolute(first_row).await?;
    } else {
        for _ in 0..first_row {
            if !result_set.next().await? {
                break;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{MemoryDatabase, ResultTable};
    use crate::dialect::{DialectKind, LockOptions, LockTimeout};
    use crate::exec::{RowSelection, TypedValue};
    use crate::metamodel::BasicType;

    fn numbers(count: i64) -> MemoryDatabase {
        MemoryDatabase::new(move |_| {
            Ok(ResultTable::new(
                vec!["n".to_string()],
                (1..=count).map(|n| vec![SqlValue::Int64(n)]).collect(),
            ))
        })
    }

    /// Read up to `limit` rows, the way the row loop honours max rows
    async fn collect(wrapper: &mut StatementWrapper, limit: usize) -> Vec<i64> {
        let mut out = Vec::new();
        while out.len() < limit && wrapper.result_set().next().await.unwrap() {
            out.push(wrapper.result_set().get("n").unwrap().as_i64().unwrap());
        }
        out
    }

    #[tokio::test]
    async fn test_bind_order_with_lock_timeout() {
        let database = numbers(0);
        let config = LoaderConfig::for_dialect(DialectKind::MariaDB);
        let dialect = config.dialect.dialect();
        let executor = StatementExecutor::new(dialect.as_ref(), &config);
        let mut parameters = QueryParameters::new()
            .with_positional(TypedValue::basic(BasicType::Long, 10i64))
            .with_named("name", TypedValue::basic(BasicType::String, "kite"))
            .with_row_selection(RowSelection::new().with_first_row(1).with_max_rows(5))
            .with_lock_options(LockOptions::upgrade().with_timeout(LockTimeout::Millis(2500)));
        parameters.set_filter_parameter("active.flag", TypedValue::basic(BasicType::Boolean, true));

        let mut connection = database.connect();
        let wrapper = executor
            .execute(
                &mut connection,
                "select t.n as n from toy t where t.active = :active.flag and t.id > ? and t.name = :name",
                &parameters,
                "t",
            )
            .await
            .unwrap();
        wrapper.close().await.unwrap();

        let executed = &database.executed()[0];
        assert_eq!(
            executed.sql,
            "select t.n as n from toy t where t.active = ? and t.id > ? and t.name = ? limit ?, ? for update wait ?"
        );
        assert_eq!(
            executed.bound_values(),
            vec![
                SqlValue::Bool(true),
                SqlValue::Int64(10),
                SqlValue::from("kite"),
                SqlValue::Int64(1),
                SqlValue::Int64(5),
                SqlValue::Int32(3),
            ]
        );
        assert_eq!(database.open_statements(), 0);
    }

    #[tokio::test]
    async fn test_offset_emulated_with_scrollable_cursor() {
        let database = numbers(5);
        let config = LoaderConfig::for_dialect(DialectKind::Informix);
        let dialect = config.dialect.dialect();
        let executor = StatementExecutor::new(dialect.as_ref(), &config);
        let parameters = QueryParameters::new()
            .with_row_selection(RowSelection::new().with_first_row(2).with_max_rows(2));

        let mut connection = database.connect();
        let mut wrapper = executor
            .execute(&mut connection, "select t.n as n from toy t", &parameters, "t")
            .await
            .unwrap();
        assert_eq!(collect(&mut wrapper, 2).await, vec![3, 4]);
        wrapper.close().await.unwrap();

        let executed = &database.executed()[0];
        assert_eq!(executed.sql, "select first 4 t.n as n from toy t");
        assert_eq!(executed.scroll_mode, Some(ScrollMode::ScrollInsensitive));
    }

    #[tokio::test]
    async fn test_offset_emulated_forward_only() {
        let database = numbers(5);
        let mut config = LoaderConfig::for_dialect(DialectKind::PostgreSQL);
        config.scrollable_result_sets = false;
        let dialect = config.dialect.dialect();
        let executor = StatementExecutor::new(dialect.as_ref(), &config);
        // an offset without a row cap cannot use the native handler
        let parameters = QueryParameters::new().with_row_selection(RowSelection::new().with_first_row(3));

        let mut connection = database.connect();
        let mut wrapper = executor
            .execute(&mut connection, "select t.n as n from toy t", &parameters, "t")
            .await
            .unwrap();
        assert_eq!(collect(&mut wrapper, usize::MAX).await, vec![4, 5]);
        wrapper.close().await.unwrap();
        assert_eq!(database.executed()[0].scroll_mode, None);
        assert_eq!(database.executed()[0].sql, "select t.n as n from toy t");
    }

    #[tokio::test]
    async fn test_bind_failure_closes_statement() {
        let database = numbers(1);
        let config = LoaderConfig::default();
        let dialect = config.dialect.dialect();
        let executor = StatementExecutor::new(dialect.as_ref(), &config);
        let parameters = QueryParameters::new().with_positional(TypedValue::basic(BasicType::Date, "not a date"));

        let mut connection = database.connect();
        let result = executor
            .execute(&mut connection, "select t.n as n from toy t where t.d = ?", &parameters, "t")
            .await;
        assert!(matches!(result, Err(crate::error::LoaderError::Binding { position: 1, .. })));
        assert_eq!(database.open_statements(), 0);
        assert!(database.executed().is_empty());
    }

    #[tokio::test]
    async fn test_comment_and_driver_settings() {
        let database = numbers(1);
        let mut config = LoaderConfig::default();
        config.use_sql_comments = true;
        config.fetch_size = Some(50);
        let dialect = config.dialect.dialect();
        let executor = StatementExecutor::new(dialect.as_ref(), &config);
        let parameters = QueryParameters::new()
            .with_comment("load Toy")
            .with_row_selection(RowSelection::new().with_timeout(9));

        let mut connection = database.connect();
        let wrapper = executor
            .execute(&mut connection, "select t.n as n from toy t", &parameters, "t")
            .await
            .unwrap();
        wrapper.close().await.unwrap();
        let executed = &database.executed()[0];
        assert_eq!(executed.sql, "/* load Toy */ select t.n as n from toy t");
        assert_eq!(executed.fetch_size, Some(50));
        assert_eq!(executed.query_timeout, Some(9));
    }
}
