//! Row-level multi-tenancy.
//!
//! All tenants share the same tables; rows are told apart by a tenant key
//! column (`company_id`, `account_id`, ...). A [`TenantEngine`] narrows every
//! registered entity type to a single tenant for the duration of a closure:
//!
//! - **Registration** records which entity types are tenant-scoped and how to
//!   read their tenant key.
//! - **Context** installs `default_filter AND key = tenant` for every
//!   registered type on entry and puts the original filters back on exit,
//!   including when the closure panics.
//! - **Enforcement** rejects instances whose tenant key names a different
//!   tenant, however they were loaded.
//!
//! The engine does not store anything itself. It works against a
//! [`FilterCatalog`], the persistence layer's per-type default filters;
//! [`MemoryStore`](crate::MemoryStore) is an in-memory one.
//!
//! # Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use rowfence_core::tenant::{TenantEngine, TenantId, TenantKey};
//! use rowfence_core::{MemoryStore, Record};
//!
//! let store = Arc::new(MemoryStore::new());
//! let engine = TenantEngine::new(Arc::clone(&store));
//! engine.register("Post", TenantKey::column::<Record>("account_id"))?;
//!
//! let post = engine.try_with_tenant(TenantId::new("acme"), || {
//!     // New rows pick up the tenant key from the overlay.
//!     store.insert(Record::new("Post").with("title", "hello"))
//! })?;
//! assert_eq!(post.get("account_id"), Some(&"acme".into()));
//! # Ok::<(), rowfence_core::TenantError>(())
//! ```
//!
//! # Concurrency
//!
//! The overlay is written into state the collaborator shares across
//! threads, so one engine runs one context at a time. A context entered on
//! another thread blocks until the active one exits. Entering a context
//! from inside another one on the same thread fails with
//! [`ReentrantContext`](crate::ErrorCode::ReentrantContext) instead of
//! deadlocking.

mod catalog;
mod config;
mod context;
mod enforce;
mod engine;
mod registry;

pub use catalog::{FilterCatalog, MaterializeHook};
pub use config::{CONFIG_FILE_NAME, DuplicateRegistration, EngineConfig, EngineConfigBuilder};
pub use context::{TenantContext, TenantHandle, TenantId, TenantInfo};
pub use engine::TenantEngine;
pub use registry::{EntityType, RegisterOptions, RegistrationRecord, TenantKey};
