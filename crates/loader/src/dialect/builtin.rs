//! Built-in dialects

use tracing::warn;

use crate::error::{LoaderError, LoaderResult};

use super::limit::{FirstLimitHandler, LimitHandler, LimitOffsetLimitHandler, SqlServerLimitHandler};
use super::lock::{LockMode, LockOptions, LockTimeout};
use super::temporal::{
    MariaDbTemporalSupport, SingleTableTemporalSupport, SqlServerTemporalSupport, TemporalTableSupport,
};
use super::{Dialect, DialectKind};

/// `for update` / `for share` with `nowait` and `skip locked`
fn standard_lock_clause(kind: DialectKind, lock: &LockOptions) -> Option<String> {
    let base = match lock.mode {
        LockMode::None => return None,
        LockMode::PessimisticRead => "for share",
        LockMode::PessimisticWrite => "for update",
    };
    Some(match lock.timeout {
        LockTimeout::WaitForever => base.to_string(),
        LockTimeout::NoWait => format!("{} nowait", base),
        LockTimeout::SkipLocked => format!("{} skip locked", base),
        LockTimeout::Millis(ms) => {
            warn!("{} cannot wait {}ms for a row lock; waiting indefinitely", kind, ms);
            base.to_string()
        }
    })
}

static STANDARD_LIMIT: LimitOffsetLimitHandler = LimitOffsetLimitHandler::STANDARD;
static MYSQL_LIMIT: LimitOffsetLimitHandler = LimitOffsetLimitHandler::MYSQL;
static SQL_SERVER_LIMIT: SqlServerLimitHandler = SqlServerLimitHandler;
static FIRST_LIMIT: FirstLimitHandler = FirstLimitHandler;

static SQL_SERVER_TEMPORAL: SqlServerTemporalSupport = SqlServerTemporalSupport;
static MARIADB_TEMPORAL: MariaDbTemporalSupport = MariaDbTemporalSupport;
static POSTGRES_TEMPORAL: SingleTableTemporalSupport =
    SingleTableTemporalSupport::new("timestamp(6) with time zone");
static MYSQL_TEMPORAL: SingleTableTemporalSupport = SingleTableTemporalSupport::new("datetime(6)");
static SQLITE_TEMPORAL: SingleTableTemporalSupport = SingleTableTemporalSupport::new("timestamp");
static INFORMIX_TEMPORAL: SingleTableTemporalSupport =
    SingleTableTemporalSupport::new("datetime year to fraction(5)");

#[derive(Debug, Clone, Copy, Default)]
pub struct PostgreSqlDialect;

impl Dialect for PostgreSqlDialect {
    fn kind(&self) -> DialectKind {
        DialectKind::PostgreSQL
    }

    fn limit_handler(&self) -> &dyn LimitHandler {
        &STANDARD_LIMIT
    }

    fn for_update_clause(&self, lock: &LockOptions) -> Option<String> {
        standard_lock_clause(self.kind(), lock)
    }

    fn temporal_support(&self) -> &dyn TemporalTableSupport {
        &POSTGRES_TEMPORAL
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlDialect;

impl Dialect for MySqlDialect {
    fn kind(&self) -> DialectKind {
        DialectKind::MySQL
    }

    fn limit_handler(&self) -> &dyn LimitHandler {
        &MYSQL_LIMIT
    }

    fn for_update_clause(&self, lock: &LockOptions) -> Option<String> {
        standard_lock_clause(self.kind(), lock)
    }

    fn temporal_support(&self) -> &dyn TemporalTableSupport {
        &MYSQL_TEMPORAL
    }
}

/// MariaDB: MySQL pagination, native system versioning and `wait n` locks
#[derive(Debug, Clone, Copy, Default)]
pub struct MariaDbDialect;

impl Dialect for MariaDbDialect {
    fn kind(&self) -> DialectKind {
        DialectKind::MariaDB
    }

    fn limit_handler(&self) -> &dyn LimitHandler {
        &MYSQL_LIMIT
    }

    fn for_update_clause(&self, lock: &LockOptions) -> Option<String> {
        let base = match lock.mode {
            LockMode::None => return None,
            LockMode::PessimisticRead => "lock in share mode",
            LockMode::PessimisticWrite => "for update",
        };
        Some(match (lock.mode, lock.timeout) {
            (LockMode::PessimisticWrite, LockTimeout::NoWait) => "for update nowait".to_string(),
            (LockMode::PessimisticWrite, LockTimeout::SkipLocked) => "for update skip locked".to_string(),
            (_, LockTimeout::Millis(_)) => format!("{} wait ?", base),
            _ => base.to_string(),
        })
    }

    fn is_lock_timeout_parameterized(&self) -> bool {
        true
    }

    fn temporal_support(&self) -> &dyn TemporalTableSupport {
        &MARIADB_TEMPORAL
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl Dialect for SqliteDialect {
    fn kind(&self) -> DialectKind {
        DialectKind::SQLite
    }

    fn limit_handler(&self) -> &dyn LimitHandler {
        &STANDARD_LIMIT
    }

    fn for_update_clause(&self, lock: &LockOptions) -> Option<String> {
        if lock.is_locking() {
            warn!("SQLite has no row locks; {:?} ignored", lock.mode);
        }
        None
    }

    fn temporal_support(&self) -> &dyn TemporalTableSupport {
        &SQLITE_TEMPORAL
    }
}

/// SQL Server 2012+: locks are table hints on the root table reference
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlServerDialect;

impl SqlServerDialect {
    fn lock_hint(lock: &LockOptions) -> Option<String> {
        let mut hints = match lock.mode {
            LockMode::None => return None,
            LockMode::PessimisticRead => vec!["holdlock", "rowlock"],
            LockMode::PessimisticWrite => vec!["updlock", "rowlock"],
        };
        match lock.timeout {
            LockTimeout::NoWait => hints.push("nowait"),
            LockTimeout::SkipLocked => hints.push("readpast"),
            LockTimeout::Millis(ms) => {
                warn!("SQL Server lock waits are session settings; {}ms ignored", ms)
            }
            LockTimeout::WaitForever => {}
        }
        Some(format!("with ({})", hints.join(", ")))
    }
}

impl Dialect for SqlServerDialect {
    fn kind(&self) -> DialectKind {
        DialectKind::SQLServer
    }

    fn limit_handler(&self) -> &dyn LimitHandler {
        &SQL_SERVER_LIMIT
    }

    fn for_update_clause(&self, _lock: &LockOptions) -> Option<String> {
        None
    }

    fn apply_locks(&self, sql: &str, lock: &LockOptions, root_alias: &str) -> LoaderResult<String> {
        let Some(hint) = Self::lock_hint(lock) else {
            return Ok(sql.to_string());
        };
        let lower = sql.to_lowercase();
        let from = lower
            .find(" from ")
            .ok_or_else(|| LoaderError::Query(format!("no from clause to lock in: {}", sql)))?;
        let needle = format!(" {}", root_alias.to_lowercase());
        let mut search = from;
        while let Some(found) = lower[search..].find(&needle) {
            let end = search + found + needle.len();
            let boundary = lower[end..]
                .chars()
                .next()
                .map_or(true, |c| c.is_whitespace());
            if boundary {
                return Ok(format!("{} {}{}", &sql[..end], hint, &sql[end..]));
            }
            search = end;
        }
        Err(LoaderError::Query(format!(
            "alias '{}' not found in the from clause: {}",
            root_alias, sql
        )))
    }

    fn temporal_support(&self) -> &dyn TemporalTableSupport {
        &SQL_SERVER_TEMPORAL
    }
}

/// Informix: `select first n` only, no native offset
#[derive(Debug, Clone, Copy, Default)]
pub struct InformixDialect;

impl Dialect for InformixDialect {
    fn kind(&self) -> DialectKind {
        DialectKind::Informix
    }

    fn limit_handler(&self) -> &dyn LimitHandler {
        &FIRST_LIMIT
    }

    fn for_update_clause(&self, lock: &LockOptions) -> Option<String> {
        match lock.mode {
            LockMode::None => None,
            mode => {
                if lock.timeout != LockTimeout::WaitForever {
                    warn!("Informix lock waits are session settings; {:?} ignored", lock.timeout);
                }
                if mode == LockMode::PessimisticRead {
                    warn!("Informix has no shared row lock clause; using for update");
                }
                Some("for update".to_string())
            }
        }
    }

    fn temporal_support(&self) -> &dyn TemporalTableSupport {
        &INFORMIX_TEMPORAL
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_lock_clauses() {
        let dialect = PostgreSqlDialect;
        assert_eq!(dialect.for_update_clause(&LockOptions::NONE), None);
        assert_eq!(
            dialect.for_update_clause(&LockOptions::upgrade()).as_deref(),
            Some("for update")
        );
        assert_eq!(
            dialect
                .for_update_clause(&LockOptions::upgrade().with_timeout(LockTimeout::NoWait))
                .as_deref(),
            Some("for update nowait")
        );
        assert_eq!(
            dialect
                .for_update_clause(&LockOptions::new(LockMode::PessimisticRead).with_timeout(LockTimeout::SkipLocked))
                .as_deref(),
            Some("for share skip locked")
        );
        assert_eq!(
            dialect
                .apply_locks("select b.id from boy b", &LockOptions::upgrade(), "b")
                .unwrap(),
            "select b.id from boy b for update"
        );
    }

    #[test]
    fn test_mariadb_parameterizes_wait() {
        let lock = LockOptions::upgrade().with_timeout(LockTimeout::Millis(1500));
        assert_eq!(MariaDbDialect.for_update_clause(&lock).as_deref(), Some("for update wait ?"));
        assert!(MariaDbDialect.is_lock_timeout_parameterized());
        assert!(!PostgreSqlDialect.is_lock_timeout_parameterized());
    }

    #[test]
    fn test_sql_server_hint_follows_root_alias() {
        let sql = "select boy0_.id as id1_0_ from boy boy0_ left outer join toy toys1_ on boy0_.id=toys1_.boy_id";
        assert_eq!(
            SqlServerDialect
                .apply_locks(sql, &LockOptions::upgrade(), "boy0_")
                .unwrap(),
            "select boy0_.id as id1_0_ from boy boy0_ with (updlock, rowlock) left outer join toy toys1_ on boy0_.id=toys1_.boy_id"
        );
        assert!(SqlServerDialect
            .apply_locks(sql, &LockOptions::upgrade(), "girl0_")
            .is_err());
        assert_eq!(
            SqlServerDialect.apply_locks(sql, &LockOptions::NONE, "boy0_").unwrap(),
            sql
        );
    }

    #[test]
    fn test_temporal_strategies() {
        use crate::dialect::TemporalStrategy;
        assert_eq!(SqlServerDialect.temporal_support().strategy(), TemporalStrategy::Native);
        assert_eq!(MariaDbDialect.temporal_support().strategy(), TemporalStrategy::Native);
        assert_eq!(PostgreSqlDialect.temporal_support().strategy(), TemporalStrategy::SingleTable);
        assert_eq!(InformixDialect.temporal_support().strategy(), TemporalStrategy::SingleTable);
    }
}
