//! Value types of the metamodel
//!
//! A [`Type`] knows how many columns it spans, how to bind a value into a
//! statement and how to read one back from a result set by column alias.

use std::fmt;
use std::sync::Arc;

use crate::backends::{PreparedStatement, ResultSetWrapper, SqlValue};
use crate::error::{LoaderError, LoaderResult};
use crate::plan::FetchStrategy;

/// Single-column value types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BasicType {
    Boolean,
    Integer,
    Long,
    Double,
    String,
    Binary,
    Uuid,
    Timestamp,
    Date,
    Time,
    Json,
}

impl BasicType {
    /// Normalise a value to this type's representation
    pub fn coerce(&self, value: SqlValue) -> Result<SqlValue, String> {
        use SqlValue as V;
        let coerced = match (self, value) {
            (_, V::Null) => V::Null,
            (BasicType::Boolean, V::Bool(b)) => V::Bool(b),
            (BasicType::Boolean, V::Int32(i)) => V::Bool(i != 0),
            (BasicType::Boolean, V::Int64(i)) => V::Bool(i != 0),
            (BasicType::Integer, V::Int32(i)) => V::Int32(i),
            (BasicType::Integer, V::Int64(i)) => V::Int32(
                i32::try_from(i).map_err(|_| format!("{} does not fit an integer", i))?,
            ),
            (BasicType::Long, V::Int32(i)) => V::Int64(i as i64),
            (BasicType::Long, V::Int64(i)) => V::Int64(i),
            (BasicType::Double, V::Float64(f)) => V::Float64(f),
            (BasicType::Double, V::Int32(i)) => V::Float64(i as f64),
            (BasicType::Double, V::Int64(i)) => V::Float64(i as f64),
            (BasicType::String, V::String(s)) => V::String(s),
            (BasicType::Binary, V::Bytes(b)) => V::Bytes(b),
            (BasicType::Uuid, V::Uuid(u)) => V::Uuid(u),
            (BasicType::Uuid, V::String(s)) => {
                V::Uuid(uuid::Uuid::parse_str(&s).map_err(|e| e.to_string())?)
            }
            (BasicType::Uuid, V::Bytes(b)) => {
                V::Uuid(uuid::Uuid::from_slice(&b).map_err(|e| e.to_string())?)
            }
            (BasicType::Timestamp, V::DateTime(dt)) => V::DateTime(dt),
            (BasicType::Timestamp, V::String(s)) => V::DateTime(
                chrono::DateTime::parse_from_rfc3339(&s)
                    .map_err(|e| e.to_string())?
                    .with_timezone(&chrono::Utc),
            ),
            (BasicType::Date, V::Date(d)) => V::Date(d),
            (BasicType::Time, V::Time(t)) => V::Time(t),
            (BasicType::Json, V::Json(j)) => V::Json(j),
            (BasicType::Json, V::String(s)) => {
                V::Json(serde_json::from_str(&s).map_err(|e| e.to_string())?)
            }
            (expected, other) => {
                return Err(format!("expected {:?}, found {}", expected, other.type_name()))
            }
        };
        Ok(coerced)
    }
}

/// A named property of an entity or component
#[derive(Debug, Clone)]
pub struct Property {
    pub name: String,
    /// Columns on the owning table; empty for collections
    pub columns: Vec<String>,
    pub ty: Type,
    pub fetch: FetchStrategy,
    pub nullable: bool,
}

impl Property {
    pub fn basic(name: impl Into<String>, column: impl Into<String>, ty: BasicType) -> Self {
        Self {
            name: name.into(),
            columns: vec![column.into()],
            ty: Type::Basic(ty),
            fetch: FetchStrategy::EAGER_SELECT,
            nullable: true,
        }
    }

    /// An embedded value; its columns are those of the component's properties
    pub fn component(name: impl Into<String>, component: ComponentType) -> Self {
        let columns = component.columns();
        Self {
            name: name.into(),
            columns,
            ty: Type::Component(Arc::new(component)),
            fetch: FetchStrategy::JOIN,
            nullable: true,
        }
    }

    /// A to-one association holding the target's identifier in `columns`
    pub fn many_to_one(
        name: impl Into<String>,
        columns: Vec<String>,
        target: impl Into<String>,
        target_identifier: Type,
        fetch: FetchStrategy,
    ) -> Self {
        Self {
            name: name.into(),
            columns,
            ty: Type::ManyToOne(Arc::new(EntityAssociation {
                entity_name: target.into(),
                identifier: target_identifier,
            })),
            fetch,
            nullable: true,
        }
    }

    pub fn collection(name: impl Into<String>, role: impl Into<String>, fetch: FetchStrategy) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            ty: Type::Collection(role.into()),
            fetch,
            nullable: true,
        }
    }

    /// Mark the property as non-nullable; required to-one associations
    /// render inner joins
    pub fn required(mut self) -> Self {
        self.nullable = false;
        self
    }
}

/// An embeddable value made of properties
#[derive(Debug, Clone)]
pub struct ComponentType {
    pub name: String,
    pub properties: Vec<Property>,
}

impl ComponentType {
    pub fn new(name: impl Into<String>, properties: Vec<Property>) -> Self {
        Self {
            name: name.into(),
            properties,
        }
    }

    pub fn columns(&self) -> Vec<String> {
        self.properties
            .iter()
            .flat_map(|p| p.columns.iter().cloned())
            .collect()
    }

    pub fn property_index(&self, name: &str) -> Option<usize> {
        self.properties.iter().position(|p| p.name == name)
    }
}

/// Target of a to-one association
#[derive(Debug, Clone)]
pub struct EntityAssociation {
    pub entity_name: String,
    /// Type of the target's identifier, which the foreign key mirrors
    pub identifier: Type,
}

#[derive(Clone)]
pub enum Type {
    Basic(BasicType),
    Component(Arc<ComponentType>),
    ManyToOne(Arc<EntityAssociation>),
    /// Collection role name
    Collection(String),
}

impl Type {
    pub fn column_span(&self) -> usize {
        match self {
            Type::Basic(_) => 1,
            Type::Component(component) => component
                .properties
                .iter()
                .map(|p| p.ty.column_span())
                .sum(),
            Type::ManyToOne(association) => association.identifier.column_span(),
            Type::Collection(_) => 0,
        }
    }

    pub fn is_association(&self) -> bool {
        matches!(self, Type::ManyToOne(_) | Type::Collection(_))
    }

    pub fn is_component(&self) -> bool {
        matches!(self, Type::Component(_))
    }

    pub fn as_component(&self) -> Option<&Arc<ComponentType>> {
        match self {
            Type::Component(component) => Some(component),
            _ => None,
        }
    }

    pub fn associated_entity(&self) -> Option<&str> {
        match self {
            Type::ManyToOne(association) => Some(&association.entity_name),
            _ => None,
        }
    }

    /// Bind `value` starting at the 1-based `index`, one position per column
    pub fn null_safe_set(
        &self,
        statement: &mut dyn PreparedStatement,
        value: &SqlValue,
        index: usize,
    ) -> LoaderResult<()> {
        match self {
            Type::Basic(basic) => {
                let coerced = basic
                    .coerce(value.clone())
                    .map_err(|message| LoaderError::binding(index, message))?;
                statement.bind(index, coerced)
            }
            Type::Component(component) => {
                let span = self.column_span();
                let parts = split_tuple(value, component.properties.len(), index)?;
                let mut position = index;
                for (property, part) in component.properties.iter().zip(parts.iter()) {
                    property.ty.null_safe_set(statement, part, position)?;
                    position += property.ty.column_span();
                }
                debug_assert_eq!(position, index + span);
                Ok(())
            }
            Type::ManyToOne(association) => {
                association.identifier.null_safe_set(statement, value, index)
            }
            Type::Collection(role) => Err(LoaderError::binding(
                index,
                format!("collection '{}' cannot be bound as a parameter", role),
            )),
        }
    }

    /// Read a value from the current row; `aliases` has one entry per column
    pub fn extract(&self, result_set: &ResultSetWrapper, aliases: &[String]) -> LoaderResult<SqlValue> {
        if aliases.len() != self.column_span() {
            return Err(LoaderError::Mapping(format!(
                "type spans {} columns but {} aliases were supplied",
                self.column_span(),
                aliases.len()
            )));
        }
        match self {
            Type::Basic(basic) => {
                let raw = result_set.get(&aliases[0])?;
                basic
                    .coerce(raw)
                    .map_err(|message| LoaderError::extraction(&aliases[0], message))
            }
            Type::Component(component) => {
                let mut values = Vec::with_capacity(component.properties.len());
                let mut offset = 0;
                for property in &component.properties {
                    let span = property.ty.column_span();
                    values.push(property.ty.extract(result_set, &aliases[offset..offset + span])?);
                    offset += span;
                }
                let tuple = SqlValue::Tuple(values);
                Ok(if tuple.is_null() { SqlValue::Null } else { tuple })
            }
            Type::ManyToOne(association) => association.identifier.extract(result_set, aliases),
            Type::Collection(role) => Err(LoaderError::Mapping(format!(
                "collection '{}' has no columns to extract",
                role
            ))),
        }
    }
}

fn split_tuple(value: &SqlValue, arity: usize, index: usize) -> LoaderResult<Vec<SqlValue>> {
    match value {
        SqlValue::Null => Ok(vec![SqlValue::Null; arity]),
        SqlValue::Tuple(parts) if parts.len() == arity => Ok(parts.clone()),
        other => Err(LoaderError::binding(
            index,
            format!("expected a tuple of {} values, found {}", arity, other.type_name()),
        )),
    }
}

impl fmt::Debug for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Basic(basic) => write!(f, "{:?}", basic),
            Type::Component(component) => write!(f, "Component({})", component.name),
            Type::ManyToOne(association) => write!(f, "ManyToOne({})", association.entity_name),
            Type::Collection(role) => write!(f, "Collection({})", role),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address() -> ComponentType {
        ComponentType::new(
            "Address",
            vec![
                Property::basic("street", "street", BasicType::String),
                Property::basic("zip", "zip", BasicType::Integer),
            ],
        )
    }

    #[test]
    fn test_column_spans() {
        assert_eq!(Type::Basic(BasicType::Long).column_span(), 1);
        assert_eq!(Type::Component(Arc::new(address())).column_span(), 2);
        let association = Type::ManyToOne(Arc::new(EntityAssociation {
            entity_name: "Person".to_string(),
            identifier: Type::Component(Arc::new(address())),
        }));
        assert_eq!(association.column_span(), 2);
        assert_eq!(Type::Collection("Boy.toys".to_string()).column_span(), 0);
    }

    #[test]
    fn test_coercion() {
        assert_eq!(BasicType::Long.coerce(SqlValue::Int32(4)).unwrap(), SqlValue::Int64(4));
        assert_eq!(BasicType::Boolean.coerce(SqlValue::Int32(0)).unwrap(), SqlValue::Bool(false));
        assert!(BasicType::Integer.coerce(SqlValue::Int64(i64::MAX)).is_err());
        assert!(BasicType::Date.coerce(SqlValue::from("x")).is_err());
        let id = uuid::Uuid::new_v4();
        assert_eq!(
            BasicType::Uuid.coerce(SqlValue::String(id.to_string())).unwrap(),
            SqlValue::Uuid(id)
        );
    }
}
