//! # Rowfence
//!
//! Row-level multi-tenancy for shared tables.
//!
//! Rowfence provides:
//! - Registration of tenant-scoped entity types with a typed tenant key
//! - Scoped tenant contexts that narrow every registered type's default filter
//!   and put it back afterwards, even on panic
//! - Enforcement on every loaded or built instance, so another tenant's rows
//!   cannot slip in through an unscoped query
//! - An in-memory store for tests and demos
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use rowfence::prelude::*;
//!
//! let store = Arc::new(MemoryStore::new());
//! let engine = TenantEngine::new(Arc::clone(&store));
//! engine.register("User", TenantKey::column::<Record>("company_id"))?;
//!
//! store.insert(Record::new("User").with("name", "bob").with("company_id", 1))?;
//! store.insert(Record::new("User").with("name", "tim").with("company_id", 2))?;
//!
//! let users: EntityType = "User".into();
//! let mine = engine.try_with_tenant(TenantId::new(1), || store.find_all(&users))?;
//! assert_eq!(mine.len(), 1);
//! # Ok::<(), TenantError>(())
//! ```
//!
//! Any persistence layer can be plugged in by implementing
//! [`FilterCatalog`]: expose a default filter per entity type and run the
//! engine's hook whenever an instance materializes.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

/// Tenant engine, registry and configuration.
pub mod tenant {
    pub use rowfence_core::tenant::*;
}

/// Logging setup.
pub mod logging {
    pub use rowfence_core::logging::*;
}

/// Prelude module for convenient imports.
pub mod prelude {
    pub use rowfence_core::prelude::*;
}

// Re-export key types at the crate root
pub use rowfence_core::{
    DuplicateRegistration, EngineConfig, EngineConfigBuilder, EntityType, ErrorCode,
    ErrorContext, FieldAccess, Filter, FilterCatalog, FilterValue, MaterializeHook, MemoryStore,
    Record, RegisterOptions, RegistrationRecord, Suggestion, TenantContext, TenantEngine,
    TenantError, TenantHandle, TenantId, TenantInfo, TenantKey, TenantResult,
};
