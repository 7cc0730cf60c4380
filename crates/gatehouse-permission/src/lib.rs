//! Permission handle for hosts that enforce casbin policy stored in a
//! relational database.
//!
//! A [`Permission`] owns the enforcer and its [`gatehouse_adapter::DatabaseAdapter`].
//! Mutations go to storage first and then to the in-memory model; an attached
//! [`watcher::Watcher`] lets other handles reload when policy changes.
//!
//! ```rust,no_run
//! use gatehouse_permission::{Permission, PermissionConfig};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PermissionConfig::from_env_or_yaml()?;
//! let permission = Permission::start(&config).await?;
//! permission
//!     .add_policy(vec!["alice".into(), "data1".into(), "read".into()])
//!     .await?;
//! assert!(permission.enforce("alice", "data1", "read").await?);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod errors;
pub mod model;
pub mod observability;
mod permission;
pub mod watcher;

pub use config::{ModelSource, PermissionConfig, StorageBackend};
pub use errors::{PermissionError, PermissionResult};
pub use permission::Permission;
pub use watcher::{LocalWatcher, WatchHub, Watcher};
