//! Load-time filters.
//!
//! # Purpose
//! A [`Filter`] restricts which stored rows a filtered load brings into the
//! model. Three representations are accepted:
//! - raw SQL predicate text, passed through verbatim,
//! - a field map of column name to required value, ANDed together,
//! - an opaque query modifier closure that writes its own predicate.
//!
//! # Security considerations
//! - Raw predicates are not sanitized. Never build one from untrusted input.
//! - Field-map keys are checked against the rule columns before they are
//!   written into SQL; values are always bound parameters.
use crate::codec::{PolicyRule, RuleColumn};
use crate::errors::{AdapterError, AdapterResult};
use serde_json::Value;
use sqlx::{Postgres, QueryBuilder};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Closure that appends one boolean SQL expression to a query.
pub type QueryModifier = Arc<dyn for<'q> Fn(&mut QueryBuilder<'q, Postgres>) + Send + Sync>;

#[derive(Clone)]
pub enum Filter {
    Raw(String),
    Fields(BTreeMap<String, String>),
    Predicate(QueryModifier),
}

impl Filter {
    pub fn raw(predicate: impl Into<String>) -> Self {
        Filter::Raw(predicate.into())
    }

    pub fn fields<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Filter::Fields(
            pairs
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }

    pub fn predicate<F>(modifier: F) -> Self
    where
        F: for<'q> Fn(&mut QueryBuilder<'q, Postgres>) + Send + Sync + 'static,
    {
        Filter::Predicate(Arc::new(modifier))
    }

    /// Append ` WHERE (...)` for this filter to `query`.
    ///
    /// An empty field map adds nothing and so matches every row.
    ///
    /// # Errors
    /// - [`AdapterError::InvalidFilterKind`] for a blank raw predicate.
    /// - [`AdapterError::UnknownField`] for a field-map key that is not a rule column.
    pub fn push_where<'q>(&self, query: &mut QueryBuilder<'q, Postgres>) -> AdapterResult<()> {
        match self {
            Filter::Raw(predicate) => {
                if predicate.trim().is_empty() {
                    return Err(AdapterError::InvalidFilterKind(
                        "empty raw predicate".to_string(),
                    ));
                }
                query.push(" WHERE (").push(predicate).push(")");
            }
            Filter::Fields(fields) => {
                let columns = resolve_columns(fields)?;
                if columns.is_empty() {
                    return Ok(());
                }
                query.push(" WHERE (");
                for (index, (column, value)) in columns.into_iter().enumerate() {
                    if index > 0 {
                        query.push(" AND ");
                    }
                    query.push(column.name()).push(" = ");
                    query.push_bind(value.to_string());
                }
                query.push(")");
            }
            Filter::Predicate(modifier) => {
                query.push(" WHERE (");
                modifier(query);
                query.push(")");
            }
        }
        Ok(())
    }

    /// Evaluate the filter against an in-memory row.
    ///
    /// # Errors
    /// - [`AdapterError::UnsupportedFilter`] for raw and predicate filters,
    ///   which only have meaning to a SQL backend.
    pub fn matches(&self, rule: &PolicyRule) -> AdapterResult<bool> {
        match self {
            Filter::Raw(_) => Err(AdapterError::UnsupportedFilter("raw predicate")),
            Filter::Predicate(_) => Err(AdapterError::UnsupportedFilter("query modifier")),
            Filter::Fields(fields) => Ok(resolve_columns(fields)?
                .into_iter()
                .all(|(column, value)| column.value_of(rule) == Some(value))),
        }
    }
}

fn resolve_columns(fields: &BTreeMap<String, String>) -> AdapterResult<Vec<(RuleColumn, &str)>> {
    fields
        .iter()
        .map(|(name, value)| {
            RuleColumn::parse(name)
                .map(|column| (column, value.as_str()))
                .ok_or_else(|| AdapterError::UnknownField(name.clone()))
        })
        .collect()
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::Raw(predicate) => f.debug_tuple("Raw").field(predicate).finish(),
            Filter::Fields(fields) => f.debug_tuple("Fields").field(fields).finish(),
            Filter::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

impl TryFrom<Value> for Filter {
    type Error = AdapterError;

    /// Strings become raw predicates and objects of strings become field maps.
    fn try_from(value: Value) -> AdapterResult<Self> {
        match value {
            Value::String(predicate) => Ok(Filter::Raw(predicate)),
            Value::Object(map) => {
                let mut fields = BTreeMap::new();
                for (key, value) in map {
                    let Value::String(value) = value else {
                        return Err(AdapterError::InvalidFilterKind(format!(
                            "field {key} must be a string"
                        )));
                    };
                    fields.insert(key, value);
                }
                Ok(Filter::Fields(fields))
            }
            other => Err(AdapterError::InvalidFilterKind(kind_name(&other).to_string())),
        }
    }
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
