//! Optional read cache for full policy loads.
//!
//! The cache holds the last full row set. Every mutation bumps a generation
//! counter and clears the slot; a load that started before a mutation will
//! not repopulate the slot with its (now stale) rows.
use crate::store::StoredRule;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
pub(crate) struct RuleCache {
    generation: AtomicU64,
    rows: RwLock<Option<(u64, Arc<Vec<StoredRule>>)>>,
}

impl RuleCache {
    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub(crate) async fn get(&self) -> Option<Arc<Vec<StoredRule>>> {
        let current = self.generation();
        match self.rows.read().await.as_ref() {
            Some((generation, rows)) if *generation == current => Some(Arc::clone(rows)),
            _ => None,
        }
    }

    /// Store `rows` read at `generation`, unless a mutation happened since.
    pub(crate) async fn put(&self, generation: u64, rows: Arc<Vec<StoredRule>>) {
        let mut slot = self.rows.write().await;
        if generation == self.generation() {
            *slot = Some((generation, rows));
        }
    }

    pub(crate) fn invalidate(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }
}
