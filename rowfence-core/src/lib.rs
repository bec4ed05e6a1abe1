//! # rowfence-core
//!
//! Tenant-context engine for row-level multi-tenancy.
//!
//! Entity types that share tables across tenants are registered with a
//! tenant key. Inside [`TenantEngine::with_tenant`] every registered type's
//! default filter is narrowed to the active tenant, and every instance that
//! is loaded or built is checked against it:
//!
//! ```rust
//! use std::sync::Arc;
//! use rowfence_core::{MemoryStore, Record, TenantEngine, TenantId, TenantKey};
//!
//! let store = Arc::new(MemoryStore::new());
//! let engine = TenantEngine::new(Arc::clone(&store));
//! engine.register("User", TenantKey::column::<Record>("company_id"))?;
//!
//! let bob = store.insert(Record::new("User").with("name", "bob").with("company_id", 1))?;
//! store.insert(Record::new("User").with("name", "tim").with("company_id", 2))?;
//! let users: rowfence_core::EntityType = "User".into();
//!
//! engine.with_tenant(TenantId::new(1), || {
//!     // Scoped finders only see company 1.
//!     assert_eq!(store.find_all(&users).unwrap(), vec![bob.clone()]);
//!
//!     // Unscoped finders still go through enforcement.
//!     let err = store.find_all_unscoped(&users).unwrap_err();
//!     assert!(err.is_access_violation());
//! })?;
//!
//! // Outside a context nothing is filtered.
//! assert_eq!(store.find_all(&users)?.len(), 2);
//! # Ok::<(), rowfence_core::TenantError>(())
//! ```
//!
//! ## Filters
//!
//! Default filters are [`Filter`] values. The overlay installed for a tenant
//! keeps whatever filter the type already had:
//!
//! ```rust
//! use rowfence_core::Filter;
//!
//! let active = Filter::eq("active", true);
//! let overlay = active.clone().and_then(Filter::eq("company_id", 1));
//!
//! let (sql, params) = overlay.to_sql(0);
//! assert_eq!(sql, "(active = $1 AND company_id = $2)");
//! assert_eq!(params.len(), 2);
//! ```
//!
//! ## Errors
//!
//! ```rust
//! use rowfence_core::{ErrorCode, TenantError};
//!
//! let err = TenantError::access_violation("User", "company_id", 1.into(), 2.into());
//! assert_eq!(err.code, ErrorCode::AccessViolation);
//! assert!(err.to_string().starts_with("[R9101]"));
//! ```

pub mod error;
pub mod filter;
pub mod logging;
pub mod store;
pub mod tenant;

pub use error::{ErrorCode, ErrorContext, Suggestion, TenantError, TenantResult};
pub use filter::{FieldAccess, Filter, FilterValue};
pub use store::{MemoryStore, Record};
pub use tenant::{
    DuplicateRegistration, EngineConfig, EngineConfigBuilder, EntityType, FilterCatalog,
    MaterializeHook, RegisterOptions, RegistrationRecord, TenantContext, TenantEngine,
    TenantHandle, TenantId, TenantInfo, TenantKey,
};

// Re-export logging utilities
pub use logging::{
    LogFormat, get_log_format, get_log_level, init as init_logging, init_with_level,
    is_debug_enabled,
};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::error::{TenantError, TenantResult};
    pub use crate::filter::{FieldAccess, Filter, FilterValue};
    pub use crate::store::{MemoryStore, Record};
    pub use crate::tenant::{
        EngineConfig, EntityType, FilterCatalog, RegisterOptions, TenantContext, TenantEngine,
        TenantHandle, TenantId, TenantKey,
    };
}
