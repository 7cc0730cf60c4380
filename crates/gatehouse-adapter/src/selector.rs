//! Row selectors for removal and update.
//!
//! A [`RuleSelector`] pins the ptype and optionally constrains each value
//! column. It is built either from a (possibly partial) rule or from a field
//! index plus consecutive values, and renders to the same SQL predicate the
//! in-memory backend evaluates with [`RuleSelector::matches`].
use crate::codec::{MAX_FIELDS, PolicyRule, RULE_COLUMNS, trim_tuple};
use crate::errors::{AdapterError, AdapterResult};
use sqlx::{Postgres, QueryBuilder};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSelector {
    pub ptype: String,
    pub values: [Option<String>; MAX_FIELDS],
}

impl RuleSelector {
    /// Select rows whose leading fields equal the non-empty positions of `rule`.
    ///
    /// Positions beyond `rule.len()` and empty positions are unconstrained,
    /// so `["alice"]` selects every `alice` rule regardless of arity.
    ///
    /// # Errors
    /// - [`AdapterError::TupleTooLong`] when `rule` has more than six fields.
    pub fn from_rule<S: AsRef<str>>(ptype: &str, rule: &[S]) -> AdapterResult<Self> {
        if rule.len() > MAX_FIELDS {
            return Err(AdapterError::TupleTooLong { len: rule.len() });
        }
        let mut values: [Option<String>; MAX_FIELDS] = Default::default();
        for (slot, value) in values.iter_mut().zip(rule) {
            let value = value.as_ref();
            if !value.is_empty() {
                *slot = Some(value.to_string());
            }
        }
        Ok(Self {
            ptype: ptype.to_string(),
            values,
        })
    }

    /// Constrain `v{field_index + k}` to `field_values[k]` for every non-empty value.
    ///
    /// Positions past `v5` are ignored. With no non-empty values this selects
    /// every row of the ptype.
    pub fn from_field_index<S: AsRef<str>>(
        ptype: &str,
        field_index: usize,
        field_values: &[S],
    ) -> Self {
        let mut values: [Option<String>; MAX_FIELDS] = Default::default();
        for (offset, value) in field_values.iter().enumerate() {
            let Some(position) = field_index.checked_add(offset) else {
                break;
            };
            let Some(slot) = values.get_mut(position) else {
                break;
            };
            let value = value.as_ref();
            if !value.is_empty() {
                *slot = Some(value.to_string());
            }
        }
        Self {
            ptype: ptype.to_string(),
            values,
        }
    }

    pub fn is_unconstrained(&self) -> bool {
        self.values.iter().all(Option::is_none)
    }

    /// The constrained positions as a rule tuple, for error reporting.
    pub fn to_tuple(&self) -> Vec<String> {
        let padded: Vec<String> = self
            .values
            .iter()
            .map(|value| value.clone().unwrap_or_default())
            .collect();
        trim_tuple(&padded)
    }

    pub fn matches(&self, rule: &PolicyRule) -> bool {
        rule.ptype == self.ptype
            && self
                .values
                .iter()
                .enumerate()
                .all(|(index, expected)| match expected {
                    Some(expected) => rule.field(index) == Some(expected.as_str()),
                    None => true,
                })
    }

    /// Append ` WHERE ptype = $n AND v{i} = $m ...` to `query`.
    pub fn push_where<'q>(&self, query: &mut QueryBuilder<'q, Postgres>) {
        query.push(" WHERE ptype = ");
        query.push_bind(self.ptype.clone());
        for (index, value) in self.values.iter().enumerate() {
            if let Some(value) = value {
                query.push(" AND ").push(RULE_COLUMNS[index + 1]).push(" = ");
                query.push_bind(value.clone());
            }
        }
    }
}
