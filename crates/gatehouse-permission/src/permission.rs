//! Permission handle: a casbin enforcer kept in step with stored policy.
//!
//! # Purpose
//! [`Permission`] owns one [`Enforcer`] and the [`DatabaseAdapter`] that
//! persists its rules. Hosts construct it once and pass it around behind an
//! `Arc`; there is no global instance.
//!
//! # Key invariants
//! - Every mutation is persisted through the adapter before the in-memory
//!   model changes. A storage error leaves the model untouched.
//! - Reloads fetch rows before clearing the model, so a failed reload keeps
//!   the previous policy.
//! - Updates apply to the model exactly the row storage rewrote.
//! - Role links are rebuilt after any change to `g` rules.
//! - After a successful mutation the attached watcher (if any) is notified.
//!
//! # Concurrency model
//! - The enforcer sits behind a `tokio::sync::RwLock`. Mutations hold the
//!   write lock across the storage call so concurrent writers apply in the
//!   same order to storage and model.
//! - Reloads triggered by a watcher run as spawned tasks and take the same
//!   write lock.
use crate::config::{PermissionConfig, StorageBackend};
use crate::errors::PermissionResult;
use crate::model::load_model;
use crate::watcher::Watcher;
use anyhow::Context;
use casbin::{CoreApi, DefaultModel, Enforcer, MemoryAdapter, RbacApi};
use gatehouse_adapter::{DatabaseAdapter, Filter, PolicyRule, RuleSelector};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

pub struct Permission {
    enforcer: RwLock<Enforcer>,
    adapter: Arc<DatabaseAdapter>,
    watcher: Mutex<Option<Box<dyn Watcher>>>,
}

impl Permission {
    /// Build the adapter and model described by `config` and load every
    /// stored rule.
    ///
    /// # Errors
    /// - `Config` when Postgres storage is selected without connection settings
    ///   or the model file cannot be read.
    /// - `Adapter` for connection, migration, or load failures.
    /// - `Casbin` for an invalid model.
    pub async fn start(config: &PermissionConfig) -> PermissionResult<Self> {
        let adapter = match config.storage {
            StorageBackend::Memory => DatabaseAdapter::in_memory(&config.adapter),
            StorageBackend::Postgres => {
                let pg = config
                    .postgres
                    .as_ref()
                    .context("postgres configuration missing")?;
                DatabaseAdapter::connect(pg, &config.adapter).await?
            }
        };
        let model = load_model(&config.model).await?;
        Self::new(model, Arc::new(adapter)).await
    }

    pub async fn new(model: DefaultModel, adapter: Arc<DatabaseAdapter>) -> PermissionResult<Self> {
        let mut enforcer = Enforcer::new(model, MemoryAdapter::default()).await?;
        adapter.load_policy(enforcer.get_mut_model()).await?;
        enforcer.build_role_links()?;
        tracing::info!(
            backend = adapter.store().backend_name(),
            durable = adapter.store().is_durable(),
            "permission handle started"
        );
        Ok(Self {
            enforcer: RwLock::new(enforcer),
            adapter,
            watcher: Mutex::new(None),
        })
    }

    pub fn adapter(&self) -> &Arc<DatabaseAdapter> {
        &self.adapter
    }

    /// Register `watcher` so peer updates trigger a full reload of this handle.
    ///
    /// Must be called from within a tokio runtime. The callback holds only a
    /// weak reference, so the watcher does not keep the handle alive.
    pub async fn attach_watcher(self: &Arc<Self>, mut watcher: Box<dyn Watcher>) {
        let permission = Arc::downgrade(self);
        let runtime = tokio::runtime::Handle::current();
        watcher.set_update_callback(Box::new(move || {
            let Some(permission) = permission.upgrade() else {
                return;
            };
            runtime.spawn(async move {
                if let Err(err) = permission.load_policy().await {
                    tracing::warn!(error = %err, "policy reload after peer update failed");
                }
            });
        }));
        *self.watcher.lock().await = Some(watcher);
    }

    pub async fn enforce(&self, sub: &str, obj: &str, act: &str) -> PermissionResult<bool> {
        Ok(self.enforcer.read().await.enforce((sub, obj, act))?)
    }

    /// Add one permission rule. Returns `false` if the model already holds it.
    pub async fn add_policy(&self, rule: Vec<String>) -> PermissionResult<bool> {
        self.add_rules("p", vec![rule]).await
    }

    /// Add the rules the model does not already hold, as one stored batch.
    pub async fn add_policies(&self, rules: Vec<Vec<String>>) -> PermissionResult<bool> {
        self.add_rules("p", rules).await
    }

    /// Remove every permission rule matching the non-empty positions of `rule`.
    pub async fn remove_policy(&self, rule: Vec<String>) -> PermissionResult<bool> {
        self.remove_rules("p", vec![rule]).await
    }

    pub async fn remove_policies(&self, rules: Vec<Vec<String>>) -> PermissionResult<bool> {
        self.remove_rules("p", rules).await
    }

    /// Remove permission rules by field index, returning the removed rules.
    pub async fn remove_filtered_policy(
        &self,
        field_index: usize,
        field_values: Vec<String>,
    ) -> PermissionResult<Vec<Vec<String>>> {
        let mut enforcer = self.enforcer.write().await;
        let removed = self
            .adapter
            .remove_filtered_policy("p", "p", field_index, &field_values)
            .await?;
        let model = enforcer.get_mut_model();
        for rule in &removed {
            model.remove_policy("p", "p", rule.clone());
        }
        drop(enforcer);
        if !removed.is_empty() {
            self.notify().await;
        }
        Ok(removed)
    }

    /// Rewrite the lowest-id stored permission rule matching `old` with the
    /// positions present in `new`; later positions of that rule are kept.
    /// The model swaps the same rule for its rewritten form.
    ///
    /// # Errors
    /// - `Adapter(RuleNotFound)` when no stored rule matches `old`.
    pub async fn update_policy(&self, old: Vec<String>, new: Vec<String>) -> PermissionResult<()> {
        let mut enforcer = self.enforcer.write().await;
        let (before, after) = self.adapter.update_policy("p", "p", &old, &new).await?;
        let model = enforcer.get_mut_model();
        model.remove_policy("p", "p", before);
        model.add_policy("p", "p", after);
        drop(enforcer);
        self.notify().await;
        Ok(())
    }

    pub async fn add_role_for_user(&self, user: &str, role: &str) -> PermissionResult<bool> {
        self.add_rules("g", vec![vec![user.to_string(), role.to_string()]])
            .await
    }

    pub async fn delete_role_for_user(&self, user: &str, role: &str) -> PermissionResult<bool> {
        self.remove_rules("g", vec![vec![user.to_string(), role.to_string()]])
            .await
    }

    /// Remove every role grouping of `user`.
    pub async fn delete_roles_for_user(&self, user: &str) -> PermissionResult<bool> {
        self.remove_rules("g", vec![vec![user.to_string()]]).await
    }

    pub async fn add_permission_for_user(
        &self,
        user: &str,
        permission: Vec<String>,
    ) -> PermissionResult<bool> {
        self.add_policy(prefixed(user, permission)).await
    }

    pub async fn delete_permission_for_user(
        &self,
        user: &str,
        permission: Vec<String>,
    ) -> PermissionResult<bool> {
        self.remove_policy(prefixed(user, permission)).await
    }

    /// Direct permission rules whose subject is `user`.
    pub async fn get_permissions_for_user(&self, user: &str) -> Vec<Vec<String>> {
        self.rules_with_field("p", 0, user).await
    }

    /// Users (or roles) directly granted `role`.
    pub async fn get_users_for_role(&self, role: &str) -> Vec<String> {
        self.rules_with_field("g", 1, role)
            .await
            .into_iter()
            .filter_map(|rule| rule.into_iter().next())
            .collect()
    }

    pub async fn get_roles_for_user(&self, user: &str) -> Vec<String> {
        self.enforcer.write().await.get_roles_for_user(user, None)
    }

    pub async fn has_role_for_user(&self, user: &str, role: &str) -> bool {
        self.enforcer
            .write()
            .await
            .has_role_for_user(user, role, None)
    }

    pub async fn get_policy(&self) -> Vec<Vec<String>> {
        self.enforcer.read().await.get_model().get_policy("p", "p")
    }

    pub async fn has_policy(&self, rule: Vec<String>) -> bool {
        self.enforcer
            .read()
            .await
            .get_model()
            .has_policy("p", "p", rule)
    }

    /// Replace the in-memory policy with everything in storage.
    ///
    /// Always reads storage: the adapter cache is dropped first, since peers
    /// write through adapters of their own.
    pub async fn load_policy(&self) -> PermissionResult<()> {
        let mut enforcer = self.enforcer.write().await;
        self.adapter.invalidate_cache();
        let rows = self.adapter.fetch_policy().await?;
        let model = enforcer.get_mut_model();
        model.clear_policy();
        self.adapter.apply_policy(model, &rows);
        enforcer.build_role_links()?;
        tracing::info!(rules = rows.len(), "policy reloaded");
        Ok(())
    }

    /// Replace the in-memory policy with the stored rules selected by `filter`.
    ///
    /// On error the previous policy stays in place.
    pub async fn load_filtered_policy(&self, filter: &Filter) -> PermissionResult<()> {
        let mut enforcer = self.enforcer.write().await;
        let rows = self.adapter.fetch_filtered_policy(filter).await?;
        let model = enforcer.get_mut_model();
        model.clear_policy();
        self.adapter.apply_filtered_policy(model, &rows);
        enforcer.build_role_links()?;
        tracing::info!(?filter, rules = rows.len(), "filtered policy loaded");
        Ok(())
    }

    pub fn is_filtered(&self) -> bool {
        self.adapter.is_filtered()
    }

    // A filtered model may lack rules that storage holds, so storage is
    // consulted too before anything is inserted.
    async fn add_rules(&self, sec: &str, rules: Vec<Vec<String>>) -> PermissionResult<bool> {
        let mut enforcer = self.enforcer.write().await;
        let filtered = self.adapter.is_filtered();
        let mut fresh: Vec<Vec<String>> = Vec::new();
        for rule in rules {
            if fresh.contains(&rule) || enforcer.get_model().has_policy(sec, sec, rule.clone()) {
                continue;
            }
            if filtered && self.adapter.has_stored_policy(sec, &rule).await? {
                continue;
            }
            fresh.push(rule);
        }
        if fresh.is_empty() {
            return Ok(false);
        }
        self.adapter.add_policies(sec, sec, &fresh).await?;
        enforcer.get_mut_model().add_policies(sec, sec, fresh);
        if sec == "g" {
            enforcer.build_role_links()?;
        }
        drop(enforcer);
        self.notify().await;
        Ok(true)
    }

    async fn remove_rules(&self, sec: &str, rules: Vec<Vec<String>>) -> PermissionResult<bool> {
        let selectors = rules
            .iter()
            .map(|rule| RuleSelector::from_rule(sec, rule))
            .collect::<Result<Vec<_>, _>>()?;
        let mut enforcer = self.enforcer.write().await;
        let removed = self.adapter.remove_policies(sec, sec, &rules).await?;

        let model = enforcer.get_mut_model();
        let doomed: Vec<Vec<String>> = model
            .get_policy(sec, sec)
            .into_iter()
            .filter(|rule| {
                selectors
                    .iter()
                    .any(|selector| matches_selector(selector, sec, rule))
            })
            .collect();
        for rule in doomed {
            model.remove_policy(sec, sec, rule);
        }
        if sec == "g" {
            enforcer.build_role_links()?;
        }
        drop(enforcer);
        if removed == 0 {
            return Ok(false);
        }
        self.notify().await;
        Ok(true)
    }

    async fn rules_with_field(&self, sec: &str, index: usize, value: &str) -> Vec<Vec<String>> {
        self.enforcer
            .read()
            .await
            .get_model()
            .get_policy(sec, sec)
            .into_iter()
            .filter(|rule| rule.get(index).is_some_and(|field| field == value))
            .collect()
    }

    async fn notify(&self) {
        if let Some(watcher) = self.watcher.lock().await.as_ref() {
            watcher.update();
        }
    }
}

fn prefixed(subject: &str, rest: Vec<String>) -> Vec<String> {
    std::iter::once(subject.to_string()).chain(rest).collect()
}

fn matches_selector(selector: &RuleSelector, ptype: &str, rule: &[String]) -> bool {
    PolicyRule::encode(ptype, rule).is_ok_and(|stored| selector.matches(&stored))
}
