//! Statement execution
//!
//! Turns a rendered statement template plus [`QueryParameters`] into an
//! open cursor: filter and named markers are rewritten, the dialect applies
//! pagination, locks and comments, and values are bound in a fixed order.

pub mod executor;
pub mod filter;
pub mod parameters;

pub use executor::{StatementExecutor, StatementWrapper};
pub use filter::{named_parameter_locations, process_parameters, scan_markers, ParameterMarker, ProcessedSql};
pub use parameters::{QueryParameters, RowSelection, TypedValue};
