use crate::codec::PolicyRule;
use crate::errors::AdapterResult;
use crate::filter::Filter;
use crate::selector::RuleSelector;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub mod memory;
pub mod postgres;

/// A rule row as it sits in storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRule {
    pub id: i64,
    pub rule: PolicyRule,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// A row as it was before and after an in-place update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdatedRule {
    pub before: StoredRule,
    pub after: StoredRule,
}

/// Storage seam for rule rows.
///
/// Reads return rows in storage order (ascending `id`). Methods documented
/// as atomic apply all of their work or none of it; the rest rely on the
/// backend's per-statement atomicity.
#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn load_rules(&self) -> AdapterResult<Vec<StoredRule>>;
    async fn load_filtered_rules(&self, filter: &Filter) -> AdapterResult<Vec<StoredRule>>;

    async fn insert_rule(&self, rule: PolicyRule, at: DateTime<Utc>) -> AdapterResult<()>;
    /// Atomic.
    async fn insert_rules(&self, rules: Vec<PolicyRule>, at: DateTime<Utc>) -> AdapterResult<()>;

    async fn delete_rules(&self, selector: &RuleSelector) -> AdapterResult<u64>;
    /// Atomic.
    async fn delete_rules_batch(&self, selectors: &[RuleSelector]) -> AdapterResult<u64>;
    /// Delete matching rows and return them as they were before deletion.
    async fn take_rules(&self, selector: &RuleSelector) -> AdapterResult<Vec<StoredRule>>;

    /// Overwrite the `Some` value columns of `replacement` on the lowest-id
    /// row matching `selector`. Returns `None` when nothing matched.
    async fn update_rule(
        &self,
        selector: &RuleSelector,
        replacement: &PolicyRule,
        at: DateTime<Utc>,
    ) -> AdapterResult<Option<UpdatedRule>>;
    /// Atomic; fails with `RuleNotFound` on the first selector without a match.
    async fn update_rules(
        &self,
        updates: &[(RuleSelector, PolicyRule)],
        at: DateTime<Utc>,
    ) -> AdapterResult<()>;
    /// Atomic: take the rows matching `selector`, then insert `rules`.
    async fn replace_rules(
        &self,
        selector: &RuleSelector,
        rules: Vec<PolicyRule>,
        at: DateTime<Utc>,
    ) -> AdapterResult<Vec<StoredRule>>;

    async fn clear(&self) -> AdapterResult<()>;

    async fn health_check(&self) -> AdapterResult<()>;
    fn is_durable(&self) -> bool;
    fn backend_name(&self) -> &'static str;
}
