//! Parameter marker processing
//!
//! Statement templates carry three kinds of markers: `?` for positional
//! values, `:name` for named values and `:filter.param` for enabled filter
//! parameters. Before execution every marker becomes `?`; filter values are
//! spliced into the positional values at the place they appear, and list
//! values expand to one marker per element.

use std::collections::BTreeMap;
use std::ops::Range;

use crate::error::{LoaderError, LoaderResult};

use super::parameters::{QueryParameters, TypedValue};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParameterMarker {
    Positional,
    Named(String),
    Filter { filter: String, parameter: String },
}

impl ParameterMarker {
    fn filter_key(filter: &str, parameter: &str) -> String {
        format!("{}.{}", filter, parameter)
    }
}

fn is_identifier_start(c: u8) -> bool {
    c.is_ascii_alphabetic() || c == b'_'
}

fn is_identifier_part(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_'
}

/// Find every marker outside quoted text, in textual order
pub fn scan_markers(sql: &str) -> Vec<(Range<usize>, ParameterMarker)> {
    let bytes = sql.as_bytes();
    let mut markers = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'\'' | b'"') => {
                i += 1;
                while i < bytes.len() {
                    if bytes[i] == quote {
                        // doubled quote is an escape
                        if i + 1 < bytes.len() && bytes[i + 1] == quote {
                            i += 2;
                            continue;
                        }
                        break;
                    }
                    i += 1;
                }
                i += 1;
            }
            b'?' => {
                markers.push((i..i + 1, ParameterMarker::Positional));
                i += 1;
            }
            b':' if i + 1 < bytes.len() && bytes[i + 1] == b':' => {
                // `::type` cast
                i += 2;
            }
            b':' if i + 1 < bytes.len() && is_identifier_start(bytes[i + 1]) => {
                let start = i;
                let mut end = i + 1;
                while end < bytes.len() && is_identifier_part(bytes[end]) {
                    end += 1;
                }
                let name = &sql[start + 1..end];
                if end + 1 < bytes.len() && bytes[end] == b'.' && is_identifier_start(bytes[end + 1]) {
                    let parameter_start = end + 1;
                    let mut parameter_end = parameter_start;
                    while parameter_end < bytes.len() && is_identifier_part(bytes[parameter_end]) {
                        parameter_end += 1;
                    }
                    markers.push((
                        start..parameter_end,
                        ParameterMarker::Filter {
                            filter: name.to_string(),
                            parameter: sql[parameter_start..parameter_end].to_string(),
                        },
                    ));
                    i = parameter_end;
                } else {
                    markers.push((start..end, ParameterMarker::Named(name.to_string())));
                    i = end;
                }
            }
            _ => i += 1,
        }
    }
    markers
}

/// Ordinals of every occurrence of each named parameter among the named
/// markers of `sql`
pub fn named_parameter_locations(sql: &str) -> LoaderResult<BTreeMap<String, Vec<usize>>> {
    let mut locations: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    let mut ordinal = 0;
    for (_, marker) in scan_markers(sql) {
        match marker {
            ParameterMarker::Named(name) => {
                locations.entry(name).or_default().push(ordinal);
                ordinal += 1;
            }
            ParameterMarker::Positional if ordinal > 0 => {
                return Err(LoaderError::Query(format!(
                    "positional parameter after named parameters in: {}",
                    sql
                )))
            }
            _ => {}
        }
    }
    Ok(locations)
}

/// SQL with only `?` markers plus the values to bind, in bind order
#[derive(Debug, Clone)]
pub struct ProcessedSql {
    pub sql: String,
    /// Filter values and caller positional values, in textual order
    pub positional: Vec<TypedValue>,
    /// Named values, one per occurrence, in textual order
    pub named: Vec<TypedValue>,
}

fn markers_for(value: &TypedValue, what: &str) -> LoaderResult<(String, Vec<TypedValue>)> {
    let elements = value.elements();
    if elements.is_empty() {
        return Err(LoaderError::Query(format!("{} is bound to an empty list", what)));
    }
    let group = vec!["?"; value.span().max(1)].join(", ");
    let group = if value.span() > 1 {
        format!("({})", group)
    } else {
        group
    };
    let rendered = vec![group; elements.len()].join(", ");
    Ok((rendered, elements))
}

/// Rewrite every marker of `sql` to `?` and collect the values in bind order
pub fn process_parameters(sql: &str, parameters: &QueryParameters) -> LoaderResult<ProcessedSql> {
    let mut out = String::with_capacity(sql.len());
    let mut positional = Vec::new();
    let mut named = Vec::new();
    let mut caller_values = parameters.positional.iter();
    // markers still owed to the current multi-column positional value
    let mut pending_span = 0usize;
    let mut cursor = 0;

    for (range, marker) in scan_markers(sql) {
        out.push_str(&sql[cursor..range.start]);
        cursor = range.end;
        match marker {
            ParameterMarker::Positional => {
                if !named.is_empty() {
                    return Err(LoaderError::Query(format!(
                        "positional parameter after named parameters in: {}",
                        sql
                    )));
                }
                if pending_span == 0 {
                    let value = caller_values.next().ok_or_else(|| {
                        LoaderError::Query(format!(
                            "statement has more positional markers than the {} values supplied",
                            parameters.positional.len()
                        ))
                    })?;
                    pending_span = value.span().max(1);
                    positional.push(value.clone());
                }
                pending_span -= 1;
                out.push('?');
            }
            ParameterMarker::Filter { filter, parameter } => {
                if pending_span > 0 {
                    return Err(LoaderError::Query(format!(
                        "filter parameter :{}.{} splits a multi-column value",
                        filter, parameter
                    )));
                }
                let key = ParameterMarker::filter_key(&filter, &parameter);
                let value = parameters.filter_parameters.get(&key).ok_or_else(|| {
                    LoaderError::Query(format!("filter parameter '{}' has no value", key))
                })?;
                let (rendered, values) = markers_for(value, &format!("filter parameter '{}'", key))?;
                out.push_str(&rendered);
                positional.extend(values);
            }
            ParameterMarker::Named(name) => {
                let value = parameters.named.get(&name).ok_or_else(|| {
                    LoaderError::Query(format!("named parameter '{}' has no value", name))
                })?;
                let (rendered, values) = markers_for(value, &format!("named parameter '{}'", name))?;
                out.push_str(&rendered);
                named.extend(values);
            }
        }
    }
    out.push_str(&sql[cursor..]);

    if pending_span > 0 || caller_values.next().is_some() {
        return Err(LoaderError::Query(format!(
            "{} positional values do not match the markers of: {}",
            parameters.positional.len(),
            sql
        )));
    }
    Ok(ProcessedSql {
        sql: out,
        positional,
        named,
    })
}
