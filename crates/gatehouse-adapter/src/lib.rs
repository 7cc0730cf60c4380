//! Relational persistence for casbin policy rules.
//!
//! Rules live in a single `casbin_rule` table with a `ptype` column and six
//! nullable value columns. [`DatabaseAdapter`] loads them into a casbin
//! [`casbin::Model`], optionally through a [`Filter`], and writes model
//! changes back through a [`store::RuleStore`] backend (Postgres or memory).
//!
//! ```rust,no_run
//! use casbin::DefaultModel;
//! use gatehouse_adapter::{AdapterConfig, DatabaseAdapter, Filter};
//!
//! # async fn demo(model_text: &str) -> Result<(), Box<dyn std::error::Error>> {
//! let adapter = DatabaseAdapter::in_memory(&AdapterConfig::default());
//! adapter
//!     .add_policy("p", "p", &["alice".into(), "data1".into(), "read".into()])
//!     .await?;
//!
//! let mut model = DefaultModel::from_str(model_text).await?;
//! adapter
//!     .load_filtered_policy(&mut model, &Filter::fields([("v0", "alice")]))
//!     .await?;
//! assert!(adapter.is_filtered());
//! # Ok(())
//! # }
//! ```

mod adapter;
mod cache;
pub mod codec;
pub mod config;
pub mod errors;
pub mod events;
pub mod filter;
pub mod selector;
pub mod store;

pub use adapter::DatabaseAdapter;
pub use codec::{MAX_FIELDS, PolicyRule};
pub use config::{AdapterConfig, PostgresConfig};
pub use errors::{AdapterError, AdapterResult};
pub use events::RuleEvent;
pub use filter::Filter;
pub use selector::RuleSelector;
