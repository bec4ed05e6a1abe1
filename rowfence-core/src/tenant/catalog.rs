//! The boundary between the tenant engine and the persistence layer.

use std::any::Any;
use std::sync::Arc;

use super::registry::EntityType;
use crate::error::TenantResult;
use crate::filter::{Filter, FilterValue};

/// Callback a collaborator runs once per materialized instance.
///
/// The instance is passed as `&dyn Any`; the callback downcasts it to the
/// concrete type it was registered for.
pub type MaterializeHook = Arc<dyn Fn(&dyn Any) -> TenantResult<()> + Send + Sync>;

/// A persistence layer that keeps a default query filter per entity type.
///
/// The engine reads and replaces these filters when a tenant context is
/// entered and exited, and hands the collaborator a hook to run whenever an
/// instance of a registered type is loaded or constructed.
///
/// Implementations must not call back into the engine while they are inside
/// `get_filter` or `set_filter`.
pub trait FilterCatalog: Send + Sync {
    /// Current default filter of an entity type ([`Filter::None`] if unset).
    fn get_filter(&self, entity: &EntityType) -> Filter;

    /// Replace the default filter of an entity type.
    fn set_filter(&self, entity: &EntityType, filter: Filter) -> TenantResult<()>;

    /// Build the single-field equality used as the tenant overlay term.
    fn equality_predicate(&self, field: &str, value: FilterValue) -> Filter {
        Filter::eq(field, value)
    }

    /// Run `hook` after every load and every construction of `entity`.
    fn register_post_materialization_hook(&self, entity: &EntityType, hook: MaterializeHook);

    /// Treat `field` as readonly once it holds a non-null value.
    fn protect_field(&self, entity: &EntityType, field: &str) {
        let _ = (entity, field);
    }

    /// Undo [`protect_field`](Self::protect_field) after the tenant key moved
    /// to another field.
    fn unprotect_field(&self, entity: &EntityType, field: &str) {
        let _ = (entity, field);
    }
}
