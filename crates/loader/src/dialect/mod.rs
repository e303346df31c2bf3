//! SQL dialects
//!
//! A [`Dialect`] owns everything that varies between databases once the
//! statement shape is known: pagination, lock clauses, comments and
//! temporal table access.

pub mod builtin;
pub mod limit;
pub mod lock;
pub mod temporal;

use std::fmt::{self, Debug};
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::error::LoaderResult;

pub use builtin::{
    InformixDialect, MariaDbDialect, MySqlDialect, PostgreSqlDialect, SqlServerDialect, SqliteDialect,
};
pub use limit::{
    use_limit, FirstLimitHandler, LimitHandler, LimitOffsetLimitHandler, NoopLimitHandler,
    SqlServerLimitHandler,
};
pub use lock::{LockMode, LockOptions, LockTimeout};
pub use temporal::{
    MariaDbTemporalSupport, SingleTableTemporalSupport, SqlServerTemporalSupport, TemporalQueryFragments,
    TemporalStrategy, TemporalTableSupport, AS_OF_PARAMETER,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialectKind {
    PostgreSQL,
    MySQL,
    MariaDB,
    SQLite,
    SQLServer,
    Informix,
}

impl DialectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DialectKind::PostgreSQL => "postgresql",
            DialectKind::MySQL => "mysql",
            DialectKind::MariaDB => "mariadb",
            DialectKind::SQLite => "sqlite",
            DialectKind::SQLServer => "sqlserver",
            DialectKind::Informix => "informix",
        }
    }

    pub fn dialect(&self) -> Arc<dyn Dialect> {
        match self {
            DialectKind::PostgreSQL => Arc::new(PostgreSqlDialect),
            DialectKind::MySQL => Arc::new(MySqlDialect),
            DialectKind::MariaDB => Arc::new(MariaDbDialect),
            DialectKind::SQLite => Arc::new(SqliteDialect),
            DialectKind::SQLServer => Arc::new(SqlServerDialect),
            DialectKind::Informix => Arc::new(InformixDialect),
        }
    }
}

impl fmt::Display for DialectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DialectKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "postgresql" | "postgres" | "pg" => Ok(DialectKind::PostgreSQL),
            "mysql" => Ok(DialectKind::MySQL),
            "mariadb" => Ok(DialectKind::MariaDB),
            "sqlite" => Ok(DialectKind::SQLite),
            "sqlserver" | "mssql" => Ok(DialectKind::SQLServer),
            "informix" => Ok(DialectKind::Informix),
            _ => Err(ConfigError::invalid_value(
                "dialect",
                s,
                "postgresql, mysql, mariadb, sqlite, sqlserver or informix",
            )),
        }
    }
}

pub trait Dialect: Send + Sync + Debug {
    fn kind(&self) -> DialectKind;

    fn limit_handler(&self) -> &dyn LimitHandler;

    /// Clause appended to the statement for the lock, if any
    fn for_update_clause(&self, lock: &LockOptions) -> Option<String>;

    /// Whether a timed lock wait is rendered as a `?` bound last
    fn is_lock_timeout_parameterized(&self) -> bool {
        false
    }

    /// Decorate `sql` for the lock; `root_alias` is the alias of the table
    /// the lock applies to
    fn apply_locks(&self, sql: &str, lock: &LockOptions, _root_alias: &str) -> LoaderResult<String> {
        if !lock.is_locking() {
            return Ok(sql.to_string());
        }
        Ok(match self.for_update_clause(lock) {
            Some(clause) => format!("{} {}", sql, clause),
            None => sql.to_string(),
        })
    }

    fn add_sql_comment(&self, sql: &str, comment: &str) -> String {
        format!("/* {} */ {}", comment.replace("*/", "* /"), sql)
    }

    fn temporal_support(&self) -> &dyn TemporalTableSupport;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parsing() {
        assert_eq!("postgres".parse::<DialectKind>().unwrap(), DialectKind::PostgreSQL);
        assert_eq!("MSSQL".parse::<DialectKind>().unwrap(), DialectKind::SQLServer);
        assert!("oracle".parse::<DialectKind>().is_err());
        for kind in [
            DialectKind::PostgreSQL,
            DialectKind::MySQL,
            DialectKind::MariaDB,
            DialectKind::SQLite,
            DialectKind::SQLServer,
            DialectKind::Informix,
        ] {
            assert_eq!(kind.to_string().parse::<DialectKind>().unwrap(), kind);
            assert_eq!(kind.dialect().kind(), kind);
        }
        assert_eq!(serde_json::to_string(&DialectKind::SQLServer).unwrap(), "\"sqlserver\"");
    }

    #[test]
    fn test_comment_cannot_close_early() {
        let sql = PostgreSqlDialect.add_sql_comment("select 1", "load Boy */ drop");
        assert_eq!(sql, "/* load Boy * / drop */ select 1");
    }
}
