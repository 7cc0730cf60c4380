//! Rule codec: fixed-width rows <-> variable-arity policy tuples.
//!
//! # Purpose
//! Stored rows always carry six value columns (`v0`..`v5`) while casbin
//! rules have anywhere from zero to six fields. This module owns both
//! directions of that mapping plus the comma-separated line form used by
//! the filtered load path.
//!
//! # Key invariants
//! - Encoding never drops fields: more than [`MAX_FIELDS`] values is an error.
//! - Trimming removes trailing empty values only; an empty value followed by
//!   a non-empty one is part of the rule.
//! - Trimming is idempotent.
use crate::errors::{AdapterError, AdapterResult};
use casbin::Model;
use serde::{Deserialize, Serialize};

/// Number of value columns in a stored row.
pub const MAX_FIELDS: usize = 6;

/// Rule columns in table order. Index `i + 1` holds `v{i}`.
pub const RULE_COLUMNS: [&str; MAX_FIELDS + 1] = ["ptype", "v0", "v1", "v2", "v3", "v4", "v5"];

/// A column a filter may constrain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleColumn {
    Ptype,
    Value(usize),
}

impl RuleColumn {
    pub fn parse(name: &str) -> Option<Self> {
        let position = RULE_COLUMNS.iter().position(|column| *column == name)?;
        Some(match position {
            0 => RuleColumn::Ptype,
            index => RuleColumn::Value(index - 1),
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            RuleColumn::Ptype => RULE_COLUMNS[0],
            RuleColumn::Value(index) => RULE_COLUMNS[index + 1],
        }
    }

    pub fn value_of(self, rule: &PolicyRule) -> Option<&str> {
        match self {
            RuleColumn::Ptype => Some(rule.ptype.as_str()),
            RuleColumn::Value(index) => rule.field(index),
        }
    }
}

/// One policy rule in its storage shape.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRule {
    pub ptype: String,
    pub values: [Option<String>; MAX_FIELDS],
}

impl PolicyRule {
    /// Encode `tuple` under `ptype`, assigning `v{i} = tuple[i]`.
    ///
    /// # Errors
    /// - [`AdapterError::TupleTooLong`] when `tuple` has more than six fields.
    pub fn encode<S: AsRef<str>>(ptype: &str, tuple: &[S]) -> AdapterResult<Self> {
        if tuple.len() > MAX_FIELDS {
            return Err(AdapterError::TupleTooLong { len: tuple.len() });
        }
        let mut values: [Option<String>; MAX_FIELDS] = Default::default();
        for (slot, value) in values.iter_mut().zip(tuple) {
            *slot = Some(value.as_ref().to_string());
        }
        Ok(Self {
            ptype: ptype.to_string(),
            values,
        })
    }

    pub fn field(&self, index: usize) -> Option<&str> {
        self.values.get(index).and_then(|value| value.as_deref())
    }

    /// Decode back to the logical tuple, dropping trailing empty fields.
    pub fn to_tuple(&self) -> Vec<String> {
        let padded: Vec<String> = self
            .values
            .iter()
            .map(|value| value.clone().unwrap_or_default())
            .collect();
        trim_tuple(&padded)
    }

    /// Render the row as a policy line: `ptype, v0, v1, ...`.
    ///
    /// Absent and empty columns are skipped wherever they occur, matching the
    /// line format the filtered load path has always produced.
    pub fn to_line(&self) -> String {
        std::iter::once(self.ptype.as_str())
            .chain(self.values.iter().filter_map(|value| value.as_deref()))
            .filter(|value| !value.is_empty())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Drop trailing empty values, keeping every value up to the last non-empty one.
pub fn trim_tuple<S: AsRef<str>>(tuple: &[S]) -> Vec<String> {
    let end = tuple
        .iter()
        .rposition(|value| !value.as_ref().is_empty())
        .map_or(0, |index| index + 1);
    tuple[..end]
        .iter()
        .map(|value| value.as_ref().to_string())
        .collect()
}

/// Model section a ptype belongs to (`p` rules or `g` groupings).
pub fn section_of(ptype: &str) -> Option<&'static str> {
    match ptype.chars().next()? {
        'p' => Some("p"),
        'g' => Some("g"),
        _ => None,
    }
}

/// Whether `model` declares `ptype` under `sec`.
pub fn model_has_ptype(model: &dyn Model, sec: &str, ptype: &str) -> bool {
    model
        .get_model()
        .get(sec)
        .is_some_and(|assertions| assertions.contains_key(ptype))
}

/// Parse one policy line and add it to the model.
///
/// The first token is the ptype and selects the section; the remaining
/// tokens form the rule. Returns `false` for blank or comment lines, unknown
/// ptypes, and rules the model already holds.
pub fn load_policy_line(line: &str, model: &mut dyn Model) -> bool {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return false;
    }
    let mut tokens = line.split(',').map(|token| token.trim().to_string());
    let Some(ptype) = tokens.next() else {
        return false;
    };
    let Some(sec) = section_of(&ptype) else {
        return false;
    };
    if !model_has_ptype(model, sec, &ptype) {
        return false;
    }
    model.add_policy(sec, &ptype, tokens.collect())
}
