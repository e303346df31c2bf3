//! Parameters of one statement execution

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};

use crate::backends::{ScrollMode, SqlValue};
use crate::dialect::LockOptions;
use crate::metamodel::{BasicType, Type};

/// A value together with the type that binds it
#[derive(Debug, Clone)]
pub struct TypedValue {
    pub ty: Type,
    pub value: SqlValue,
}

impl TypedValue {
    pub fn new(ty: Type, value: impl Into<SqlValue>) -> Self {
        Self {
            ty,
            value: value.into(),
        }
    }

    pub fn basic(ty: BasicType, value: impl Into<SqlValue>) -> Self {
        Self::new(Type::Basic(ty), value)
    }

    /// Number of markers one value of this type occupies
    pub fn span(&self) -> usize {
        self.ty.column_span()
    }

    /// Values of a list parameter, or the value itself
    pub fn elements(&self) -> Vec<TypedValue> {
        match &self.value {
            SqlValue::Array(values) => values
                .iter()
                .map(|v| TypedValue::new(self.ty.clone(), v.clone()))
                .collect(),
            _ => vec![self.clone()],
        }
    }
}

/// Pagination and driver hints
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RowSelection {
    /// Number of rows to skip
    pub first_row: Option<usize>,
    pub max_rows: Option<usize>,
    pub fetch_size: Option<u32>,
    /// Query timeout in seconds
    pub timeout: Option<u32>,
}

impl RowSelection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_first_row(mut self, first_row: usize) -> Self {
        self.first_row = Some(first_row);
        self
    }

    pub fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = Some(max_rows);
        self
    }

    pub fn with_fetch_size(mut self, fetch_size: u32) -> Self {
        self.fetch_size = Some(fetch_size);
        self
    }

    pub fn with_timeout(mut self, seconds: u32) -> Self {
        self.timeout = Some(seconds);
        self
    }

    pub fn has_first_row(&self) -> bool {
        self.first_row_or_zero() > 0
    }

    pub fn has_max_rows(&self) -> bool {
        self.max_rows.is_some()
    }

    pub fn first_row_or_zero(&self) -> usize {
        self.first_row.unwrap_or(0)
    }

    /// Whether rows have to be skipped or capped at all
    pub fn defines_limits(&self) -> bool {
        self.has_first_row() || self.has_max_rows()
    }
}

/// Everything bound to or configured on one statement
#[derive(Debug, Clone, Default)]
pub struct QueryParameters {
    /// Values for `?` markers, in textual order
    pub positional: Vec<TypedValue>,
    /// Values for `:name` markers
    pub named: BTreeMap<String, TypedValue>,
    /// Values for `:filter.param` markers, keyed `filter.param`
    pub filter_parameters: HashMap<String, TypedValue>,
    pub row_selection: RowSelection,
    pub lock_options: LockOptions,
    pub comment: Option<String>,
    /// Overrides the persistence context's read-only default
    pub read_only: Option<bool>,
    /// Scroll mode requested by the caller
    pub scroll_mode: Option<ScrollMode>,
    /// The first marker is a result-set out parameter
    pub callable: bool,
    /// Read temporal entities as of this instant
    pub temporal_as_of: Option<DateTime<Utc>>,
}

impl QueryParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_positional(mut self, value: TypedValue) -> Self {
        self.positional.push(value);
        self
    }

    pub fn with_named(mut self, name: impl Into<String>, value: TypedValue) -> Self {
        self.named.insert(name.into(), value);
        self
    }

    pub fn with_row_selection(mut self, selection: RowSelection) -> Self {
        self.row_selection = selection;
        self
    }

    pub fn with_lock_options(mut self, lock_options: LockOptions) -> Self {
        self.lock_options = lock_options;
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = Some(read_only);
        self
    }

    pub fn with_scroll_mode(mut self, scroll_mode: ScrollMode) -> Self {
        self.scroll_mode = Some(scroll_mode);
        self
    }

    pub fn with_temporal_as_of(mut self, instant: DateTime<Utc>) -> Self {
        self.temporal_as_of = Some(instant);
        self
    }

    pub fn set_filter_parameter(&mut self, key: impl Into<String>, value: TypedValue) {
        self.filter_parameters.insert(key.into(), value);
    }

    /// Whether the caller asked for a scrollable cursor
    pub fn is_scroll_requested(&self) -> bool {
        self.scroll_mode.map_or(false, |mode| mode.is_scrollable())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_selection_flags() {
        let selection = RowSelection::new();
        assert!(!selection.defines_limits());
        assert!(!RowSelection::new().with_first_row(0).has_first_row());
        let page = RowSelection::new().with_first_row(2).with_max_rows(2);
        assert!(page.has_first_row() && page.has_max_rows());
    }

    #[test]
    fn test_list_values_split_into_elements() {
        let list = TypedValue::basic(
            BasicType::String,
            SqlValue::Array(vec![SqlValue::from("a"), SqlValue::from("b")]),
        );
        assert_eq!(list.elements().len(), 2);
        assert_eq!(TypedValue::basic(BasicType::Long, 3i64).elements().len(), 1);
    }
}
