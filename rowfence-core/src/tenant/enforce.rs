//! Enforcement of the tenant key on materialized instances.
//!
//! The overlay filter keeps other tenants' rows out of scoped queries, but
//! instances can still arrive through unscoped finders or be built by hand.
//! The check here runs on every one of them while a context is active.

use std::any::Any;

use super::catalog::FilterCatalog;
use super::engine::{Shared, TenantEngine};
use super::registry::{EntityType, KeyRead, TenantKey};
use crate::error::{TenantError, TenantResult};
use crate::filter::FilterValue;

/// What the check needs, copied out of the engine state.
struct Snapshot {
    expected: FilterValue,
    key: TenantKey,
}

impl Shared {
    fn snapshot(&self, entity: &EntityType, hook_only: bool) -> Option<Snapshot> {
        let state = self.state.lock();
        let tenant = state.current_tenant.as_ref()?;
        let record = state.registry.get(entity)?;
        if hook_only && !record.options.enforce_on_materialize {
            return None;
        }
        Some(Snapshot {
            expected: tenant.tenant_id(),
            key: record.key.clone(),
        })
    }

    /// Entry point for hooks handed to the collaborator.
    pub(crate) fn check_materialized(
        &self,
        entity: &EntityType,
        instance: &dyn Any,
    ) -> TenantResult<()> {
        match self.snapshot(entity, true) {
            Some(snapshot) => verify(entity, snapshot, instance),
            None => Ok(()),
        }
    }

    pub(crate) fn check(&self, entity: &EntityType, instance: &dyn Any) -> TenantResult<()> {
        match self.snapshot(entity, false) {
            Some(snapshot) => verify(entity, snapshot, instance),
            None => Ok(()),
        }
    }
}

// The accessor runs without the engine lock held.
fn verify(entity: &EntityType, snapshot: Snapshot, instance: &dyn Any) -> TenantResult<()> {
    let Snapshot { expected, key } = snapshot;
    match key.read(instance) {
        KeyRead::Unset => Ok(()),
        KeyRead::WrongType => Err(TenantError::instance_mismatch(
            entity.as_str(),
            key.instance_type(),
        )),
        KeyRead::Value(actual) if actual.loosely_eq(&expected) => Ok(()),
        KeyRead::Value(actual) => {
            tracing::warn!(
                entity = %entity,
                field = key.field(),
                expected = %expected,
                actual = %actual,
                "Blocked instance belonging to another tenant"
            );
            Err(TenantError::access_violation(
                entity.as_str(),
                key.field(),
                expected,
                actual,
            ))
        }
    }
}

impl<C: FilterCatalog> TenantEngine<C> {
    /// Check that `instance` belongs to the active tenant.
    ///
    /// Passes when no context is active, when `entity` is not registered,
    /// and when the instance's tenant key is unset. A key holding any other
    /// tenant's identity is an [`AccessViolation`](crate::ErrorCode::AccessViolation).
    ///
    /// Hooks installed at registration run this same check, so calling it by
    /// hand is only needed for instances the collaborator never sees.
    pub fn check(&self, entity: impl Into<EntityType>, instance: &dyn Any) -> TenantResult<()> {
        self.shared().check(&entity.into(), instance)
    }
}
