//! Temporal (system-versioned) table support
//!
//! Dialects with native system versioning query history with
//! `for system_time as of`; everywhere else the row validity columns live
//! on the entity table itself and history is read with a range restriction.

use std::fmt::Debug;

use crate::error::{LoaderError, LoaderResult};
use crate::metamodel::{EntityPersister, TemporalMapping};

/// Name of the pseudo filter parameter carrying the "as of" instant
pub const AS_OF_PARAMETER: &str = "__temporal.as_of";

fn as_of_marker() -> String {
    format!(":{}", AS_OF_PARAMETER)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemporalStrategy {
    /// The database keeps history itself
    Native,
    /// Validity columns on the entity table, maintained by the application
    SingleTable,
}

/// Fragments contributed to a query over a temporal table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemporalQueryFragments {
    /// Table reference for the from clause, alias included
    pub table_reference: String,
    /// Restriction to add to the where clause or join condition
    pub restriction: Option<String>,
}

pub trait TemporalTableSupport: Send + Sync + Debug {
    fn strategy(&self) -> TemporalStrategy;

    /// Column type of the row start and row end columns
    fn row_column_type(&self) -> &'static str;

    /// Clause declaring the validity period inside `create table`
    fn period_clause(&self, _mapping: &TemporalMapping) -> Option<String> {
        None
    }

    /// Options appended after the closing parenthesis of `create table`
    fn table_options(&self) -> Option<String> {
        None
    }

    /// Whether the table needs a check constraint on its validity columns
    fn requires_check_constraint(&self) -> bool {
        false
    }

    fn check_constraint(&self, mapping: &TemporalMapping) -> Option<String> {
        if !self.requires_check_constraint() {
            return None;
        }
        Some(format!(
            "check ({end} is null or {start} < {end})",
            start = mapping.row_start_column,
            end = mapping.row_end_column
        ))
    }

    fn supports_excluded_columns(&self) -> bool;

    /// Attribute appended to an excluded column's definition
    fn excluded_column_option(&self) -> Option<&'static str> {
        None
    }

    /// Reject mappings the dialect cannot honour
    fn validate(&self, persister: &EntityPersister) -> LoaderResult<()> {
        if let Some(mapping) = &persister.temporal {
            if !mapping.excluded_columns.is_empty() && !self.supports_excluded_columns() {
                return Err(LoaderError::Temporal(format!(
                    "Entity '{}' excludes columns {:?} from versioning, which this dialect does not support",
                    persister.entity_name, mapping.excluded_columns
                )));
            }
            for column in &mapping.excluded_columns {
                if !persister.state_columns().contains(&column.as_str()) {
                    return Err(LoaderError::Temporal(format!(
                        "Entity '{}' excludes unknown column '{}' from versioning",
                        persister.entity_name, column
                    )));
                }
            }
        }
        Ok(())
    }

    /// Table reference and restriction for reading the table, as of the
    /// session instant when `as_of` is set
    fn render(&self, table: &str, alias: &str, mapping: &TemporalMapping, as_of: bool) -> TemporalQueryFragments;
}

/// SQL Server system-versioned tables
#[derive(Debug, Default)]
pub struct SqlServerTemporalSupport;

impl TemporalTableSupport for SqlServerTemporalSupport {
    fn strategy(&self) -> TemporalStrategy {
        TemporalStrategy::Native
    }

    fn row_column_type(&self) -> &'static str {
        "datetime2(7)"
    }

    fn period_clause(&self, mapping: &TemporalMapping) -> Option<String> {
        Some(format!(
            "period for system_time ({}, {})",
            mapping.row_start_column, mapping.row_end_column
        ))
    }

    fn table_options(&self) -> Option<String> {
        Some("with (system_versioning = on)".to_string())
    }

    fn supports_excluded_columns(&self) -> bool {
        false
    }

    fn render(&self, table: &str, alias: &str, _mapping: &TemporalMapping, as_of: bool) -> TemporalQueryFragments {
        native_render(table, alias, as_of)
    }
}

/// MariaDB `with system versioning` tables
#[derive(Debug, Default)]
pub struct MariaDbTemporalSupport;

impl TemporalTableSupport for MariaDbTemporalSupport {
    fn strategy(&self) -> TemporalStrategy {
        TemporalStrategy::Native
    }

    fn row_column_type(&self) -> &'static str {
        "timestamp(6)"
    }

    fn period_clause(&self, mapping: &TemporalMapping) -> Option<String> {
        Some(format!(
            "period for system_time ({}, {})",
            mapping.row_start_column, mapping.row_end_column
        ))
    }

    fn table_options(&self) -> Option<String> {
        Some("with system versioning".to_string())
    }

    fn supports_excluded_columns(&self) -> bool {
        true
    }

    fn excluded_column_option(&self) -> Option<&'static str> {
        Some("without system versioning")
    }

    fn render(&self, table: &str, alias: &str, _mapping: &TemporalMapping, as_of: bool) -> TemporalQueryFragments {
        native_render(table, alias, as_of)
    }
}

fn native_render(table: &str, alias: &str, as_of: bool) -> TemporalQueryFragments {
    let table_reference = if as_of {
        format!("{} for system_time as of {} {}", table, as_of_marker(), alias)
    } else {
        format!("{} {}", table, alias)
    };
    TemporalQueryFragments {
        table_reference,
        restriction: None,
    }
}

/// Validity columns on the entity table itself
#[derive(Debug)]
pub struct SingleTableTemporalSupport {
    column_type: &'static str,
}

impl SingleTableTemporalSupport {
    pub const fn new(column_type: &'static str) -> Self {
        Self { column_type }
    }
}

impl TemporalTableSupport for SingleTableTemporalSupport {
    fn strategy(&self) -> TemporalStrategy {
        TemporalStrategy::SingleTable
    }

    fn row_column_type(&self) -> &'static str {
        self.column_type
    }

    fn requires_check_constraint(&self) -> bool {
        true
    }

    fn supports_excluded_columns(&self) -> bool {
        true
    }

    fn render(&self, table: &str, alias: &str, mapping: &TemporalMapping, as_of: bool) -> TemporalQueryFragments {
        let start = format!("{}.{}", alias, mapping.row_start_column);
        let end = format!("{}.{}", alias, mapping.row_end_column);
        let restriction = if as_of {
            format!(
                "{start} <= {marker} and ({end} is null or {end} > {marker})",
                start = start,
                end = end,
                marker = as_of_marker()
            )
        } else {
            format!("{} is null", end)
        };
        TemporalQueryFragments {
            table_reference: format!("{} {}", table, alias),
            restriction: Some(restriction),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metamodel::{BasicType, Property};

    fn mapping() -> TemporalMapping {
        TemporalMapping::new("valid_from", "valid_to")
    }

    #[test]
    fn test_native_as_of() {
        let fragments = SqlServerTemporalSupport.render("boy", "boy0_", &mapping(), true);
        assert_eq!(
            fragments.table_reference,
            "boy for system_time as of :__temporal.as_of boy0_"
        );
        assert_eq!(fragments.restriction, None);
        let current = MariaDbTemporalSupport.render("boy", "boy0_", &mapping(), false);
        assert_eq!(current.table_reference, "boy boy0_");
    }

    #[test]
    fn test_single_table_restriction() {
        let support = SingleTableTemporalSupport::new("timestamp(6)");
        let fragments = support.render("boy", "b", &mapping(), true);
        assert_eq!(
            fragments.restriction.as_deref(),
            Some("b.valid_from <= :__temporal.as_of and (b.valid_to is null or b.valid_to > :__temporal.as_of)")
        );
        assert_eq!(
            support.render("boy", "b", &mapping(), false).restriction.as_deref(),
            Some("b.valid_to is null")
        );
        assert_eq!(
            support.check_constraint(&mapping()).as_deref(),
            Some("check (valid_to is null or valid_from < valid_to)")
        );
        assert_eq!(SqlServerTemporalSupport.check_constraint(&mapping()), None);
    }

    #[test]
    fn test_excluded_columns_validation() {
        let persister = EntityPersister::new("Boy", "boy")
            .with_property(Property::basic("name", "name", BasicType::String))
            .with_temporal(mapping().excluding("name"));
        assert!(MariaDbTemporalSupport.validate(&persister).is_ok());
        assert!(matches!(
            SqlServerTemporalSupport.validate(&persister),
            Err(LoaderError::Temporal(_))
        ));

        let unknown = EntityPersister::new("Boy", "boy").with_temporal(mapping().excluding("nope"));
        assert!(MariaDbTemporalSupport.validate(&unknown).is_err());
        assert_eq!(SqlServerTemporalSupport.table_options().as_deref(), Some("with (system_versioning = on)"));
        assert_eq!(SqlServerTemporalSupport.row_column_type(), "datetime2(7)");
    }
}
