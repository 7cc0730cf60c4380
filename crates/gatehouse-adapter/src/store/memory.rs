//! In-memory implementation of the rule store.
//!
//! # Purpose
//! Implements [`RuleStore`] over a `Vec` guarded by `tokio::sync::RwLock`. It
//! exists for tests, local development, and single-process deployments that
//! do not need durability.
//!
//! # Durability and consistency
//! - **Not durable**: all rows are lost on restart.
//! - Batch operations stage their changes on a copy of the table and swap it
//!   in only when every step succeeded, so a failing batch leaves no trace.
//! - Raw and predicate filters need SQL and are rejected here.
use super::{RuleStore, StoredRule, UpdatedRule};
use crate::codec::PolicyRule;
use crate::errors::{AdapterError, AdapterResult};
use crate::filter::Filter;
use crate::selector::RuleSelector;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Default)]
struct RuleTable {
    next_id: i64,
    // Always sorted by id: ids are assigned increasing and rows are only appended.
    rows: Vec<StoredRule>,
}

impl RuleTable {
    fn insert(&mut self, rule: PolicyRule, at: DateTime<Utc>) {
        self.next_id += 1;
        self.rows.push(StoredRule {
            id: self.next_id,
            rule,
            created_at: Some(at),
            updated_at: Some(at),
        });
    }

    fn take(&mut self, selector: &RuleSelector) -> Vec<StoredRule> {
        let (taken, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.rows)
            .into_iter()
            .partition(|row| selector.matches(&row.rule));
        self.rows = kept;
        taken
    }

    fn update_first(
        &mut self,
        selector: &RuleSelector,
        replacement: &PolicyRule,
        at: DateTime<Utc>,
    ) -> Option<UpdatedRule> {
        let row = self.rows.iter_mut().find(|row| selector.matches(&row.rule))?;
        let before = row.clone();
        for (slot, value) in row.rule.values.iter_mut().zip(&replacement.values) {
            if let Some(value) = value {
                *slot = Some(value.clone());
            }
        }
        row.updated_at = Some(at);
        Some(UpdatedRule {
            before,
            after: row.clone(),
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryRuleStore {
    table: Arc<RwLock<RuleTable>>,
}

impl InMemoryRuleStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RuleStore for InMemoryRuleStore {
    async fn load_rules(&self) -> AdapterResult<Vec<StoredRule>> {
        Ok(self.table.read().await.rows.clone())
    }

    async fn load_filtered_rules(&self, filter: &Filter) -> AdapterResult<Vec<StoredRule>> {
        let table = self.table.read().await;
        let mut rows = Vec::new();
        for row in &table.rows {
            if filter.matches(&row.rule)? {
                rows.push(row.clone());
            }
        }
        Ok(rows)
    }

    async fn insert_rule(&self, rule: PolicyRule, at: DateTime<Utc>) -> AdapterResult<()> {
        self.table.write().await.insert(rule, at);
        Ok(())
    }

    async fn insert_rules(&self, rules: Vec<PolicyRule>, at: DateTime<Utc>) -> AdapterResult<()> {
        let mut table = self.table.write().await;
        for rule in rules {
            table.insert(rule, at);
        }
        Ok(())
    }

    async fn delete_rules(&self, selector: &RuleSelector) -> AdapterResult<u64> {
        Ok(self.table.write().await.take(selector).len() as u64)
    }

    async fn delete_rules_batch(&self, selectors: &[RuleSelector]) -> AdapterResult<u64> {
        let mut table = self.table.write().await;
        let mut removed = 0;
        for selector in selectors {
            removed += table.take(selector).len() as u64;
        }
        Ok(removed)
    }

    async fn take_rules(&self, selector: &RuleSelector) -> AdapterResult<Vec<StoredRule>> {
        Ok(self.table.write().await.take(selector))
    }

    async fn update_rule(
        &self,
        selector: &RuleSelector,
        replacement: &PolicyRule,
        at: DateTime<Utc>,
    ) -> AdapterResult<Option<UpdatedRule>> {
        Ok(self
            .table
            .write()
            .await
            .update_first(selector, replacement, at))
    }

    async fn update_rules(
        &self,
        updates: &[(RuleSelector, PolicyRule)],
        at: DateTime<Utc>,
    ) -> AdapterResult<()> {
        let mut table = self.table.write().await;
        let mut staged = table.clone();
        for (selector, replacement) in updates {
            if staged.update_first(selector, replacement, at).is_none() {
                return Err(AdapterError::RuleNotFound {
                    ptype: selector.ptype.clone(),
                    rule: selector.to_tuple(),
                });
            }
        }
        *table = staged;
        Ok(())
    }

    async fn replace_rules(
        &self,
        selector: &RuleSelector,
        rules: Vec<PolicyRule>,
        at: DateTime<Utc>,
    ) -> AdapterResult<Vec<StoredRule>> {
        let mut table = self.table.write().await;
        let taken = table.take(selector);
        for rule in rules {
            table.insert(rule, at);
        }
        Ok(taken)
    }

    async fn clear(&self) -> AdapterResult<()> {
        self.table.write().await.rows.clear();
        Ok(())
    }

    async fn health_check(&self) -> AdapterResult<()> {
        Ok(())
    }

    fn is_durable(&self) -> bool {
        false
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
