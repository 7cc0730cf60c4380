use crate::codec::MAX_FIELDS;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("invalid filter kind: {0}")]
    InvalidFilterKind(String),
    #[error("unknown filter field: {0}")]
    UnknownField(String),
    #[error("filter requires a sql backend: {0}")]
    UnsupportedFilter(&'static str),
    #[error("no stored rule of ptype {ptype} matches {rule:?}")]
    RuleNotFound { ptype: String, rule: Vec<String> },
    #[error("rule has {len} fields, at most {} can be stored", MAX_FIELDS)]
    TupleTooLong { len: usize },
    #[error("batch length mismatch: {old} old rules, {new} new rules")]
    BatchLengthMismatch { old: usize, new: usize },
    #[error(transparent)]
    Storage(#[from] sqlx::Error),
    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

pub type AdapterResult<T> = Result<T, AdapterError>;
