//! Bulk loader and mutation engine.
//!
//! # Purpose
//! [`DatabaseAdapter`] moves policy rules between a casbin [`Model`] and a
//! [`RuleStore`]. Loads read rows in storage order and feed them to the model;
//! mutations encode casbin tuples into rows and write them through the store.
//!
//! # Key invariants
//! - Loads never reorder rows and never write.
//! - Batch mutations are all-or-nothing (delegated to the store's atomic
//!   methods); single-row mutations are one statement.
//! - Every mutation that changed storage invalidates the read cache and
//!   broadcasts a [`RuleEvent`].
//! - The read cache only sees writes made through this adapter. Call
//!   [`DatabaseAdapter::invalidate_cache`] when another writer may have
//!   changed storage.
//! - Loads are split into a fallible fetch and an infallible apply, so a
//!   caller can fetch first and touch its model only once the rows are in.
//!
//! # Concurrency model
//! - The adapter is `Send + Sync` and meant to be shared behind an `Arc`.
//! - The `filtered` flag is atomic; its value reflects the last load call to
//!   finish.
use crate::cache::RuleCache;
use crate::codec::{
    MAX_FIELDS, PolicyRule, load_policy_line, model_has_ptype, section_of, trim_tuple,
};
use crate::config::{AdapterConfig, PostgresConfig};
use crate::errors::{AdapterError, AdapterResult};
use crate::events::{RuleEvent, RuleEvents};
use crate::filter::Filter;
use crate::selector::RuleSelector;
use crate::store::memory::InMemoryRuleStore;
use crate::store::postgres::PostgresRuleStore;
use crate::store::{RuleStore, StoredRule, UpdatedRule};
use casbin::Model;
use chrono::Utc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;

/// Policy sections persisted by [`DatabaseAdapter::save_policy`].
const POLICY_SECTIONS: [&str; 2] = ["p", "g"];

pub struct DatabaseAdapter {
    store: Arc<dyn RuleStore>,
    filtered: AtomicBool,
    cache: Option<RuleCache>,
    events: RuleEvents,
}

impl DatabaseAdapter {
    pub fn new(store: Arc<dyn RuleStore>, config: &AdapterConfig) -> Self {
        Self {
            store,
            filtered: AtomicBool::new(false),
            cache: config.cache_rules.then(RuleCache::default),
            events: RuleEvents::new(),
        }
    }

    /// Connect to Postgres (running migrations) and wrap the store.
    ///
    /// # Errors
    /// - Connection or migration failures from [`PostgresRuleStore::connect`].
    pub async fn connect(pg: &PostgresConfig, config: &AdapterConfig) -> AdapterResult<Self> {
        let store = PostgresRuleStore::connect(pg).await?;
        Ok(Self::new(Arc::new(store), config))
    }

    pub fn in_memory(config: &AdapterConfig) -> Self {
        Self::new(Arc::new(InMemoryRuleStore::new()), config)
    }

    pub fn store(&self) -> &Arc<dyn RuleStore> {
        &self.store
    }

    /// Receive a [`RuleEvent`] for every mutation made through this adapter.
    pub fn subscribe(&self) -> broadcast::Receiver<RuleEvent> {
        self.events.subscribe()
    }

    /// Load every stored rule into `model`, in storage order.
    ///
    /// Rows whose ptype the model does not declare are skipped with a warning.
    /// A successful load clears the filtered flag.
    pub async fn load_policy(&self, model: &mut dyn Model) -> AdapterResult<()> {
        let rows = self.fetch_policy().await?;
        self.apply_policy(model, &rows);
        Ok(())
    }

    /// Every stored row in storage order, served from the cache when enabled.
    pub async fn fetch_policy(&self) -> AdapterResult<Arc<Vec<StoredRule>>> {
        let Some(cache) = &self.cache else {
            return Ok(Arc::new(self.store.load_rules().await?));
        };
        if let Some(rows) = cache.get().await {
            return Ok(rows);
        }
        let generation = cache.generation();
        let rows = Arc::new(self.store.load_rules().await?);
        cache.put(generation, Arc::clone(&rows)).await;
        Ok(rows)
    }

    /// Add fetched `rows` to `model` and clear the filtered flag.
    pub fn apply_policy(&self, model: &mut dyn Model, rows: &[StoredRule]) {
        let mut loaded: u64 = 0;
        for row in rows {
            let ptype = row.rule.ptype.as_str();
            let sec = section_of(ptype).filter(|sec| model_has_ptype(&*model, sec, ptype));
            let Some(sec) = sec else {
                tracing::warn!(id = row.id, ptype, "skipping rule with undeclared ptype");
                continue;
            };
            model.add_policy(sec, ptype, row.rule.to_tuple());
            loaded += 1;
        }
        metrics::counter!("gatehouse_rules_loaded_total").increment(loaded);
        tracing::debug!(rows = rows.len(), loaded, "policy loaded");
        self.set_filtered(false);
    }

    /// Load only the rows selected by `filter`, then mark the adapter filtered.
    ///
    /// The flag is set even when nothing matched.
    ///
    /// # Errors
    /// - [`AdapterError::InvalidFilterKind`] / [`AdapterError::UnknownField`]
    ///   for malformed filters.
    /// - [`AdapterError::UnsupportedFilter`] when the backend cannot run it.
    pub async fn load_filtered_policy(
        &self,
        model: &mut dyn Model,
        filter: &Filter,
    ) -> AdapterResult<()> {
        let rows = self.fetch_filtered_policy(filter).await?;
        self.apply_filtered_policy(model, &rows);
        Ok(())
    }

    /// The rows selected by `filter`, in storage order. Never cached.
    pub async fn fetch_filtered_policy(&self, filter: &Filter) -> AdapterResult<Vec<StoredRule>> {
        let rows = self.store.load_filtered_rules(filter).await?;
        tracing::debug!(rows = rows.len(), ?filter, "filtered rows fetched");
        Ok(rows)
    }

    /// Feed fetched `rows` to `model` as policy lines and set the filtered flag.
    pub fn apply_filtered_policy(&self, model: &mut dyn Model, rows: &[StoredRule]) {
        let mut loaded: u64 = 0;
        for row in rows {
            if load_policy_line(&row.rule.to_line(), model) {
                loaded += 1;
            }
        }
        metrics::counter!("gatehouse_rules_loaded_total").increment(loaded);
        tracing::debug!(rows = rows.len(), loaded, "filtered policy loaded");
        self.set_filtered(true);
    }

    /// Drop cached rows so the next full load reads storage.
    pub fn invalidate_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.invalidate();
        }
    }

    /// Whether storage holds a `ptype` row equal to `rule` (trailing empty
    /// fields ignored).
    pub async fn has_stored_policy(&self, ptype: &str, rule: &[String]) -> AdapterResult<bool> {
        let wanted = trim_tuple(rule);
        if wanted.len() > MAX_FIELDS {
            return Err(AdapterError::TupleTooLong { len: wanted.len() });
        }
        let mut fields = vec![("ptype".to_string(), ptype.to_string())];
        fields.extend(
            wanted
                .iter()
                .enumerate()
                .filter(|(_, value)| !value.is_empty())
                .map(|(index, value)| (format!("v{index}"), value.clone())),
        );
        let rows = self
            .store
            .load_filtered_rules(&Filter::fields(fields))
            .await?;
        Ok(rows.iter().any(|row| row.rule.to_tuple() == wanted))
    }

    pub fn is_filtered(&self) -> bool {
        self.filtered.load(Ordering::Acquire)
    }

    pub fn set_filtered(&self, filtered: bool) {
        self.filtered.store(filtered, Ordering::Release);
    }

    /// Insert every `p` and `g` rule of `model` in one transaction.
    ///
    /// Existing rows are kept; call [`DatabaseAdapter::clear_policy`] first for
    /// an overwrite.
    pub async fn save_policy(&self, model: &dyn Model) -> AdapterResult<()> {
        let mut rules = Vec::new();
        for sec in POLICY_SECTIONS {
            let Some(assertions) = model.get_model().get(sec) else {
                continue;
            };
            let mut ptypes: Vec<&String> = assertions.keys().collect();
            ptypes.sort();
            for ptype in ptypes {
                for rule in model.get_policy(sec, ptype) {
                    rules.push(PolicyRule::encode(ptype, &rule)?);
                }
            }
        }
        if rules.is_empty() {
            return Ok(());
        }
        let count = rules.len();
        self.store.insert_rules(rules, Utc::now()).await?;
        tracing::info!(rules = count, "policy saved");
        self.changed(RuleEvent::Saved);
        Ok(())
    }

    pub async fn clear_policy(&self) -> AdapterResult<()> {
        self.store.clear().await?;
        tracing::info!("stored policy cleared");
        self.changed(RuleEvent::Deleted);
        Ok(())
    }

    pub async fn add_policy(&self, sec: &str, ptype: &str, rule: &[String]) -> AdapterResult<()> {
        let rule = PolicyRule::encode(ptype, rule)?;
        self.store.insert_rule(rule, Utc::now()).await?;
        tracing::debug!(sec, ptype, "rule added");
        self.changed(RuleEvent::Saved);
        Ok(())
    }

    /// Insert `rules` as one batch. Nothing is written if any rule fails to encode.
    pub async fn add_policies(
        &self,
        sec: &str,
        ptype: &str,
        rules: &[Vec<String>],
    ) -> AdapterResult<()> {
        let rules = rules
            .iter()
            .map(|rule| PolicyRule::encode(ptype, rule))
            .collect::<AdapterResult<Vec<_>>>()?;
        if rules.is_empty() {
            return Ok(());
        }
        let count = rules.len();
        self.store.insert_rules(rules, Utc::now()).await?;
        tracing::debug!(sec, ptype, rules = count, "rules added");
        self.changed(RuleEvent::Saved);
        Ok(())
    }

    /// Delete every row of `ptype` whose fields equal the non-empty positions
    /// of `rule`. Returns the number of rows deleted.
    pub async fn remove_policy(
        &self,
        sec: &str,
        ptype: &str,
        rule: &[String],
    ) -> AdapterResult<u64> {
        let selector = RuleSelector::from_rule(ptype, rule)?;
        let removed = self.store.delete_rules(&selector).await?;
        tracing::debug!(sec, ptype, removed, "rule removed");
        if removed > 0 {
            self.changed(RuleEvent::Deleted);
        }
        Ok(removed)
    }

    /// [`DatabaseAdapter::remove_policy`] for each rule, in one transaction.
    pub async fn remove_policies(
        &self,
        sec: &str,
        ptype: &str,
        rules: &[Vec<String>],
    ) -> AdapterResult<u64> {
        let selectors = rules
            .iter()
            .map(|rule| RuleSelector::from_rule(ptype, rule))
            .collect::<AdapterResult<Vec<_>>>()?;
        let removed = self.store.delete_rules_batch(&selectors).await?;
        tracing::debug!(sec, ptype, removed, "rules removed");
        if removed > 0 {
            self.changed(RuleEvent::Deleted);
        }
        Ok(removed)
    }

    /// Delete rows of `ptype` whose `v{field_index + k}` equals
    /// `field_values[k]` for every non-empty value, returning the removed
    /// rules in storage order.
    ///
    /// With no non-empty values every row of `ptype` is removed.
    pub async fn remove_filtered_policy(
        &self,
        sec: &str,
        ptype: &str,
        field_index: usize,
        field_values: &[String],
    ) -> AdapterResult<Vec<Vec<String>>> {
        let selector = RuleSelector::from_field_index(ptype, field_index, field_values);
        let removed = self.store.take_rules(&selector).await?;
        tracing::debug!(sec, ptype, field_index, removed = removed.len(), "filtered rules removed");
        if !removed.is_empty() {
            self.changed(RuleEvent::Deleted);
        }
        Ok(tuples(&removed))
    }

    /// Overwrite the first stored rule matching `old` (lowest id) with the
    /// positions present in `new`. Returns that rule's tuple before and after
    /// the write.
    ///
    /// # Errors
    /// - [`AdapterError::RuleNotFound`] when no stored rule matches `old`.
    /// - [`AdapterError::TupleTooLong`] when either tuple exceeds six fields.
    pub async fn update_policy(
        &self,
        sec: &str,
        ptype: &str,
        old: &[String],
        new: &[String],
    ) -> AdapterResult<(Vec<String>, Vec<String>)> {
        let selector = RuleSelector::from_rule(ptype, old)?;
        let replacement = PolicyRule::encode(ptype, new)?;
        let Some(UpdatedRule { before, after }) = self
            .store
            .update_rule(&selector, &replacement, Utc::now())
            .await?
        else {
            return Err(AdapterError::RuleNotFound {
                ptype: ptype.to_string(),
                rule: trim_tuple(old),
            });
        };
        tracing::debug!(sec, ptype, id = before.id, "rule updated");
        self.changed(RuleEvent::Saved);
        Ok((before.rule.to_tuple(), after.rule.to_tuple()))
    }

    /// Apply `olds[i] -> news[i]` for every pair in one transaction.
    ///
    /// # Errors
    /// - [`AdapterError::BatchLengthMismatch`] when the slices differ in length.
    /// - [`AdapterError::RuleNotFound`] for the first pair without a match; no
    ///   pair is applied in that case.
    pub async fn update_policies(
        &self,
        sec: &str,
        ptype: &str,
        olds: &[Vec<String>],
        news: &[Vec<String>],
    ) -> AdapterResult<()> {
        if olds.len() != news.len() {
            return Err(AdapterError::BatchLengthMismatch {
                old: olds.len(),
                new: news.len(),
            });
        }
        let updates = olds
            .iter()
            .zip(news)
            .map(|(old, new)| -> AdapterResult<_> {
                Ok((
                    RuleSelector::from_rule(ptype, old)?,
                    PolicyRule::encode(ptype, new)?,
                ))
            })
            .collect::<AdapterResult<Vec<_>>>()?;
        if updates.is_empty() {
            return Ok(());
        }
        self.store.update_rules(&updates, Utc::now()).await?;
        tracing::debug!(sec, ptype, rules = updates.len(), "rules updated");
        self.changed(RuleEvent::Saved);
        Ok(())
    }

    /// Replace the rows selected by `field_index`/`field_values` with
    /// `new_policies` in one transaction, returning the replaced rules.
    pub async fn update_filtered_policies(
        &self,
        sec: &str,
        ptype: &str,
        new_policies: &[Vec<String>],
        field_index: usize,
        field_values: &[String],
    ) -> AdapterResult<Vec<Vec<String>>> {
        let rules = new_policies
            .iter()
            .map(|rule| PolicyRule::encode(ptype, rule))
            .collect::<AdapterResult<Vec<_>>>()?;
        let selector = RuleSelector::from_field_index(ptype, field_index, field_values);
        let inserted = rules.len();
        let removed = self.store.replace_rules(&selector, rules, Utc::now()).await?;
        tracing::debug!(
            sec,
            ptype,
            removed = removed.len(),
            inserted,
            "filtered rules replaced"
        );
        if !removed.is_empty() {
            self.changed(RuleEvent::Deleted);
        }
        if inserted > 0 {
            self.changed(RuleEvent::Saved);
        }
        Ok(tuples(&removed))
    }

    fn changed(&self, event: RuleEvent) {
        self.invalidate_cache();
        self.events.emit(event);
    }
}

fn tuples(rows: &[StoredRule]) -> Vec<Vec<String>> {
    rows.iter().map(|row| row.rule.to_tuple()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[tokio::test]
    async fn filtered_flag_round_trips() {
        let adapter = DatabaseAdapter::in_memory(&AdapterConfig::default());
        assert!(!adapter.is_filtered());
        adapter.set_filtered(true);
        assert!(adapter.is_filtered());
        adapter.set_filtered(false);
        assert!(!adapter.is_filtered());
    }

    #[tokio::test]
    async fn mismatched_batch_is_rejected_before_storage() {
        let adapter = DatabaseAdapter::in_memory(&AdapterConfig::default());
        let err = adapter
            .update_policies("p", "p", &[rule(&["alice"])], &[])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AdapterError::BatchLengthMismatch { old: 1, new: 0 }
        ));
    }

    #[tokio::test]
    async fn cache_serves_until_mutation() {
        let adapter = DatabaseAdapter::in_memory(&AdapterConfig { cache_rules: true });
        adapter
            .add_policy("p", "p", &rule(&["alice", "data1", "read"]))
            .await
            .expect("add");
        let first = adapter.fetch_policy().await.expect("read");
        let second = adapter.fetch_policy().await.expect("read");
        assert!(Arc::ptr_eq(&first, &second));

        adapter
            .add_policy("p", "p", &rule(&["bob", "data2", "write"]))
            .await
            .expect("add");
        let third = adapter.fetch_policy().await.expect("read");
        assert_eq!(third.len(), 2);
    }

    #[tokio::test]
    async fn peer_writes_show_after_invalidation() {
        let store: Arc<dyn RuleStore> = Arc::new(InMemoryRuleStore::new());
        let config = AdapterConfig { cache_rules: true };
        let reader = DatabaseAdapter::new(Arc::clone(&store), &config);
        let writer = DatabaseAdapter::new(store, &config);
        assert!(reader.fetch_policy().await.expect("read").is_empty());

        writer
            .add_policy("p", "p", &rule(&["alice", "data1", "read"]))
            .await
            .expect("add");
        // The reader's cache has not seen the peer's write yet.
        assert!(reader.fetch_policy().await.expect("read").is_empty());

        reader.invalidate_cache();
        assert_eq!(reader.fetch_policy().await.expect("read").len(), 1);
    }

    #[tokio::test]
    async fn stored_policy_lookup_is_exact() {
        let adapter = DatabaseAdapter::in_memory(&AdapterConfig::default());
        adapter
            .add_policy("p", "p", &rule(&["alice", "data1", "read"]))
            .await
            .expect("add");

        assert!(
            adapter
                .has_stored_policy("p", &rule(&["alice", "data1", "read"]))
                .await
                .expect("lookup")
        );
        assert!(
            adapter
                .has_stored_policy("p", &rule(&["alice", "data1", "read", ""]))
                .await
                .expect("lookup")
        );
        assert!(
            !adapter
                .has_stored_policy("p", &rule(&["alice", "data1"]))
                .await
                .expect("lookup")
        );
        assert!(
            !adapter
                .has_stored_policy("g", &rule(&["alice", "data1", "read"]))
                .await
                .expect("lookup")
        );
    }

    #[tokio::test]
    async fn removing_nothing_emits_nothing() {
        let adapter = DatabaseAdapter::in_memory(&AdapterConfig::default());
        let mut events = adapter.subscribe();
        let removed = adapter
            .remove_policy("p", "p", &rule(&["nobody"]))
            .await
            .expect("remove");
        assert_eq!(removed, 0);
        assert!(events.try_recv().is_err());
    }
}
