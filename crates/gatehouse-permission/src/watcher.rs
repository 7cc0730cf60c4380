//! Change notification between permission handles.
//!
//! # Purpose
//! A [`Watcher`] tells other processes (or other handles in this process)
//! that stored policy changed. The owner registers one callback; peers invoke
//! it when they publish an update, and the callback typically triggers a full
//! reload.
//!
//! # Notes
//! [`LocalWatcher`] is an in-process implementation over a tokio broadcast
//! channel. A handle never receives its own updates.
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

const HUB_CAPACITY: usize = 64;

pub type UpdateCallback = Box<dyn Fn() + Send + Sync>;

pub trait Watcher: Send + Sync {
    /// Replace the callback run when a peer publishes an update.
    fn set_update_callback(&mut self, callback: UpdateCallback);
    /// Tell every peer that stored policy changed.
    fn update(&self);
}

/// Shared channel that [`LocalWatcher`]s publish to and listen on.
#[derive(Debug, Clone)]
pub struct WatchHub {
    sender: broadcast::Sender<u64>,
    next_id: Arc<AtomicU64>,
}

impl Default for WatchHub {
    fn default() -> Self {
        Self::new()
    }
}

impl WatchHub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(HUB_CAPACITY);
        Self {
            sender,
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn watcher(&self) -> LocalWatcher {
        LocalWatcher {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            sender: self.sender.clone(),
            listener: None,
        }
    }
}

#[derive(Debug)]
pub struct LocalWatcher {
    id: u64,
    sender: broadcast::Sender<u64>,
    listener: Option<JoinHandle<()>>,
}

impl Watcher for LocalWatcher {
    /// Must be called from within a tokio runtime; the listener runs as a task.
    fn set_update_callback(&mut self, callback: UpdateCallback) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
        let mut receiver = self.sender.subscribe();
        let id = self.id;
        self.listener = Some(tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(origin) if origin == id => {}
                    Ok(_) => callback(),
                    Err(RecvError::Lagged(skipped)) => {
                        // Missed updates collapse into one reload.
                        tracing::warn!(watcher = id, skipped, "policy watcher lagged");
                        callback();
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }));
    }

    fn update(&self) {
        let _ = self.sender.send(self.id);
    }
}

impl Drop for LocalWatcher {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
    }
}
